//! Mailbox storage shared by the SMTP and POP3 sessions

pub mod message;
pub mod store;

pub use message::{MESSAGE_SUFFIX, MessageId, strip_address};
pub use store::{MailboxStore, MessageHandle};
