//! Server configuration

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Limits, ServerError};

/// Conventional SMTP port of the test server
pub const DEFAULT_SMTP_PORT: u16 = 2500;

/// Conventional POP3 port of the test server
pub const DEFAULT_POP3_PORT: u16 = 1100;

/// Name of the mailbox directory created under the working directory
pub const DEFAULT_MAIL_DIR_NAME: &str = ".test-mail-server";

/// Settings shared by every listener and session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the listeners bind to
    pub host: IpAddr,
    /// SMTP port, `None` leaves SMTP disabled
    pub smtp_port: Option<u16>,
    /// POP3 port, `None` leaves POP3 disabled
    pub pop3_port: Option<u16>,
    /// Root of the mailbox directories
    pub mail_dir: PathBuf,
    /// Deliver every message to its sender instead of its recipients
    pub redirect_to_sender: bool,
    /// Read inactivity after which a connection is closed
    pub idle_timeout: Duration,
    /// Longest accepted line, excluding the terminator
    pub max_line_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            smtp_port: None,
            pop3_port: None,
            mail_dir: default_mail_dir(),
            redirect_to_sender: false,
            idle_timeout: Duration::from_secs(Limits::IDLE_TIMEOUT_SECS),
            max_line_length: Limits::MAX_LINE_LENGTH,
        }
    }
}

impl ServerConfig {
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    pub fn with_smtp_port(mut self, port: u16) -> Self {
        self.smtp_port = Some(port);
        self
    }

    pub fn with_pop3_port(mut self, port: u16) -> Self {
        self.pop3_port = Some(port);
        self
    }

    pub fn with_mail_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mail_dir = dir.into();
        self
    }

    pub fn with_redirect_to_sender(mut self, redirect: bool) -> Self {
        self.redirect_to_sender = redirect;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_line_length(mut self, length: usize) -> Self {
        self.max_line_length = length;
        self
    }

    /// Check values the socket layer would reject
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.idle_timeout.is_zero() {
            return Err(ServerError::Config(
                "idle timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_line_length == 0 {
            return Err(ServerError::Config(
                "maximum line length must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// `.test-mail-server` under the current directory, or under the home
/// directory when the current one is unavailable
pub fn default_mail_dir() -> PathBuf {
    std::env::current_dir()
        .ok()
        .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_MAIL_DIR_NAME)
}
