//! SMTP response handling

/// Represents an SMTP response that can be sent to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpResponse {
    /// The SMTP response code (e.g., "250", "354", "500")
    pub code: String,
    /// The human-readable message
    pub message: String,
}

impl SmtpResponse {
    /// Create a new SMTP response
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_owned(),
            message: message.to_owned(),
        }
    }

    /// Create a success response (250 OK)
    pub fn ok() -> Self {
        Self::new("250", "OK")
    }

    /// Create a greeting response (220)
    pub fn greeting() -> Self {
        Self::new("220", "Test Mail Server")
    }

    pub fn sender_ok(sender: &str) -> Self {
        Self::new("250", &format!("sender {sender} OK"))
    }

    pub fn recipient_ok(recipient: &str) -> Self {
        Self::new("250", &format!("recipient {recipient} OK"))
    }

    /// Create a DATA intermediate response (354)
    pub fn data_start() -> Self {
        Self::new("354", "enter mail, end with line containing only \".\"")
    }

    pub fn bytes_accepted(size: u64) -> Self {
        Self::new("250", &format!("{size} bytes accepted"))
    }

    pub fn no_sender() -> Self {
        Self::new("550", "no sender given")
    }

    pub fn no_recipient() -> Self {
        Self::new("550", "no recipient given")
    }

    /// DATA issued before any RCPT
    pub fn no_recipients() -> Self {
        Self::new("554", "no recipients given")
    }

    /// Create a QUIT response (221)
    pub fn quit() -> Self {
        Self::new("221", "Closing connection")
    }

    /// Unrecognized command
    pub fn error() -> Self {
        Self::new("500", "ERROR")
    }

    /// Format the response for sending over the wire
    pub fn format(&self) -> String {
        format!("{} {}\r\n", self.code, self.message)
    }

    /// Check if this is a success response (2xx)
    pub fn is_success(&self) -> bool {
        self.code.starts_with('2')
    }

    /// Check if this is an error response (4xx or 5xx)
    pub fn is_error(&self) -> bool {
        self.code.starts_with('4') || self.code.starts_with('5')
    }
}
