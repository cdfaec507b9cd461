//! POP3 retrieval

pub mod commands;
pub mod response;
pub mod session;

pub use response::Pop3Response;
pub use session::{Pop3Session, Pop3State};
