//! Parsing of SMTP command lines

/// A command line received outside of DATA mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpCommand<'a> {
    /// `HELO` or `EHLO`, argument ignored
    Hello,
    /// Raw text after `MAIL FROM:`
    Mail(&'a str),
    /// Raw text after `RCPT TO:`
    Rcpt(&'a str),
    Data,
    Noop,
    Quit,
    Unknown,
}

impl<'a> SmtpCommand<'a> {
    /// Parse a command line. Verbs are matched case-insensitively.
    pub fn parse(line: &'a str) -> Self {
        if let Some(arg) = strip_prefix_ignore_case(line, "MAIL FROM:") {
            return SmtpCommand::Mail(arg);
        }
        if let Some(arg) = strip_prefix_ignore_case(line, "RCPT TO:") {
            return SmtpCommand::Rcpt(arg);
        }
        if strip_prefix_ignore_case(line, "HELO").is_some()
            || strip_prefix_ignore_case(line, "EHLO").is_some()
        {
            return SmtpCommand::Hello;
        }

        let line = line.trim_end();
        if line.eq_ignore_ascii_case("DATA") {
            SmtpCommand::Data
        } else if line.eq_ignore_ascii_case("NOOP") {
            SmtpCommand::Noop
        } else if line.eq_ignore_ascii_case("QUIT") {
            SmtpCommand::Quit
        } else {
            SmtpCommand::Unknown
        }
    }
}

/// Extract the mailbox from a `MAIL FROM:` argument.
///
/// `Name <addr> PARAM=x` yields `addr`; an argument without brackets is
/// returned trimmed. Returns `None` when the argument is blank.
pub fn parse_sender(arg: &str) -> Option<&str> {
    let arg = arg.trim();
    if arg.is_empty() {
        return None;
    }
    let address = match arg.find('<') {
        Some(open) => match arg[open + 1..].find('>') {
            Some(close) => &arg[open + 1..open + 1 + close],
            None => arg,
        },
        None => arg,
    };
    Some(address.trim())
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}
