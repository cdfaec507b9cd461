//! # Test Mail Server
//!
//! An SMTP and POP3 test double. Messages submitted over SMTP are stored in
//! per-recipient directories on the local filesystem and can be read back
//! over POP3, so mail code can be tested against real protocol endpoints
//! without a real mail server.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use test_mail_server::{MailServer, NoopObserver, ServerConfig};
//!
//! let config = ServerConfig::default()
//!     .with_mail_dir("/tmp/test-mail")
//!     .with_smtp_port(2500)
//!     .with_pop3_port(1100);
//!
//! let mut server = MailServer::new(config, Arc::new(NoopObserver)).unwrap();
//! server.start().unwrap();
//!
//! // Application sends mail to localhost:2500 and reads it from localhost:1100
//! // ...
//!
//! let mailboxes = server.store().list_mailboxes().unwrap();
//! println!("Mailboxes with mail: {mailboxes:?}");
//! ```
//!
//! ## Supported SMTP commands
//!
//! - `HELO` / `EHLO` - Always accepted
//! - `MAIL FROM` - Specify the sender's address
//! - `RCPT TO` - Add a recipient (may be repeated)
//! - `DATA` - Send the message, terminated by a line containing only `.`
//! - `NOOP` - Do nothing
//! - `QUIT` - Close connection
//!
//! ## Supported POP3 commands
//!
//! `USER`, `APOP`, `PASS`, `CAPA`, `STAT`, `LIST`, `UIDL`, `RETR`, `TOP`,
//! `DELE`, `RSET`, `NOOP`, `QUIT`.
//!
//! `USER` (or `APOP`) names the mailbox; passwords are never checked.
//! The message list is frozen when the mailbox is selected and deletions
//! are applied on `QUIT`.
//!
//! ## Storage layout
//!
//! ```text
//! <mail dir>/
//!     jane.doe@example.com/
//!         20240307090502042.msg
//!         20240307090511378.msg
//! ```
//!
//! Message files hold the raw message exactly as received (dot-stuffing
//! removed, CRLF line endings). File names are millisecond timestamps, so
//! name order is delivery order.
//!
//! ## Redirect to sender
//!
//! With [`ServerConfig::redirect_to_sender`] set, every message is delivered
//! only to its sender's mailbox, whatever the recipients.
//!
//! ## Notes
//!
//! - No relaying: messages never leave the local directory.
//! - No authentication and no TLS.
//! - Message content is not validated.

pub mod config;
pub mod error;
pub mod event;
pub mod mailbox;
pub mod pop3;
pub mod server;
pub mod smtp;

pub use config::ServerConfig;
pub use error::{Limits, ServerError, StorageError};
pub use event::{
    ChannelObserver, Direction, Event, MailboxEvent, MailboxEventKind, NoopObserver, Observer,
    Service, SessionId, TracingObserver,
};
pub use mailbox::{MailboxStore, MessageHandle, MessageId};
pub use pop3::{Pop3Response, Pop3Session, Pop3State};
pub use server::{ListenerHandle, MailServer, Reply, Session};
pub use smtp::{SmtpResponse, SmtpSession, SmtpState};
