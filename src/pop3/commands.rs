//! Parsing of POP3 command lines

/// A POP3 command with its raw arguments.
///
/// Numeric arguments are kept as text; the session validates them against
/// its snapshot so that each failure maps to the right error reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pop3Command<'a> {
    /// `USER name` or `APOP name digest`: the first token names the mailbox
    User(&'a str),
    Capa,
    Noop,
    Quit,
    Unknown,
    /// A command that needs a selected mailbox
    Mailbox(MailboxCommand<'a>),
}

/// Commands answered with `No user given` until USER or APOP has run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxCommand<'a> {
    Pass,
    Stat,
    List(Option<&'a str>),
    Uidl(Option<&'a str>),
    Retr(&'a str),
    Top(&'a str, Option<&'a str>),
    Dele(&'a str),
    Rset,
}

impl<'a> Pop3Command<'a> {
    /// Parse a command line. Verbs are matched case-insensitively.
    pub fn parse(line: &'a str) -> Self {
        let (verb, arg) = match line.split_once(|c: char| c.is_ascii_whitespace()) {
            Some((verb, rest)) => (verb, Some(rest)),
            None => (line, None),
        };
        let arg = arg.map(str::trim).filter(|a| !a.is_empty());

        let command = match (verb.to_ascii_uppercase().as_str(), arg) {
            ("USER" | "APOP", Some(arg)) => {
                return Pop3Command::User(arg.split_ascii_whitespace().next().unwrap_or(arg));
            }
            ("CAPA", None) => return Pop3Command::Capa,
            ("NOOP", None) => return Pop3Command::Noop,
            ("QUIT", None) => return Pop3Command::Quit,
            ("PASS", Some(_)) => MailboxCommand::Pass,
            ("STAT", None) => MailboxCommand::Stat,
            ("LIST", arg) => MailboxCommand::List(arg),
            ("UIDL", arg) => MailboxCommand::Uidl(arg),
            ("RETR", Some(arg)) => MailboxCommand::Retr(arg),
            ("TOP", Some(arg)) => match arg.split_once(|c: char| c.is_ascii_whitespace()) {
                Some((index, lines)) => MailboxCommand::Top(index, Some(lines.trim())),
                None => MailboxCommand::Top(arg, None),
            },
            ("DELE", Some(arg)) => MailboxCommand::Dele(arg),
            ("RSET", None) => MailboxCommand::Rset,
            _ => return Pop3Command::Unknown,
        };
        Pop3Command::Mailbox(command)
    }
}

/// Parse a non-negative decimal made of ASCII digits only
pub fn parse_number(text: &str) -> Option<usize> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}
