//! POP3 response handling

/// A POP3 reply: a status line, optionally followed by a dot-terminated body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pop3Response {
    /// `+OK` with optional text
    Ok(Option<String>),
    /// `-ERR` with a reason
    Err(&'static str),
    /// `+OK` status line followed by payload lines and a terminating `.`
    MultiLine {
        status: Option<String>,
        lines: Vec<String>,
    },
}

impl Pop3Response {
    pub fn ok() -> Self {
        Pop3Response::Ok(None)
    }

    pub fn ok_with(text: impl Into<String>) -> Self {
        Pop3Response::Ok(Some(text.into()))
    }

    pub fn greeting() -> Self {
        Self::ok_with("Test Mail Server")
    }

    pub fn multi_line(lines: Vec<String>) -> Self {
        Pop3Response::MultiLine {
            status: None,
            lines,
        }
    }

    pub fn no_user() -> Self {
        Pop3Response::Err("No user given")
    }

    pub fn invalid_number() -> Self {
        Pop3Response::Err("Invalid message number")
    }

    pub fn message_deleted() -> Self {
        Pop3Response::Err("Message deleted")
    }

    pub fn invalid_lines_count() -> Self {
        Pop3Response::Err("Invalid lines count format")
    }

    pub fn not_implemented() -> Self {
        Pop3Response::Err("Not implemented")
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, Pop3Response::Err(_))
    }

    /// Format the response for sending over the wire.
    ///
    /// Payload lines starting with `.` are byte-stuffed.
    pub fn format(&self) -> String {
        match self {
            Pop3Response::Ok(None) => "+OK\r\n".to_owned(),
            Pop3Response::Ok(Some(text)) => format!("+OK {text}\r\n"),
            Pop3Response::Err(reason) => format!("-ERR {reason}\r\n"),
            Pop3Response::MultiLine { status, lines } => {
                let mut result = match status {
                    Some(text) => format!("+OK {text}\r\n"),
                    None => "+OK\r\n".to_owned(),
                };
                for line in lines {
                    if line.starts_with('.') {
                        result.push('.');
                    }
                    result.push_str(line);
                    result.push_str("\r\n");
                }
                result.push_str(".\r\n");
                result
            }
        }
    }
}
