//! SMTP ingestion

pub mod commands;
pub mod response;
pub mod session;

pub use response::SmtpResponse;
pub use session::{SmtpSession, SmtpState};
