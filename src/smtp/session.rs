//! SMTP session state management

use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tempfile::NamedTempFile;
use tracing::info;

use crate::error::StorageError;
use crate::event::Service;
use crate::mailbox::MailboxStore;
use crate::server::{Reply, Session};
use crate::smtp::commands::{SmtpCommand, parse_sender};
use crate::smtp::response::SmtpResponse;

/// Represents the current state of an SMTP session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpState {
    /// No sender yet
    Ready,
    /// MAIL FROM received
    HaveSender,
    /// Sender and at least one recipient known, DATA allowed
    HaveRecipients,
    /// Collecting message body lines
    InData,
    /// QUIT processed
    Closed,
}

/// Message body being received, spooled to a temporary file.
/// The file is removed when this value is dropped.
struct BodyBuffer {
    writer: BufWriter<NamedTempFile>,
    size: u64,
}

impl BodyBuffer {
    fn create() -> Result<Self, StorageError> {
        let file = tempfile::Builder::new()
            .prefix("mail")
            .suffix(".msg")
            .tempfile()
            .map_err(|e| StorageError::io(std::env::temp_dir(), e))?;
        Ok(Self {
            writer: BufWriter::new(file),
            size: 0,
        })
    }

    fn path(&self) -> PathBuf {
        self.writer.get_ref().path().to_path_buf()
    }

    fn append_line(&mut self, line: &str) -> Result<(), StorageError> {
        self.writer
            .write_all(line.as_bytes())
            .and_then(|_| self.writer.write_all(b"\r\n"))
            .map_err(|e| StorageError::io(self.path(), e))?;
        self.size += line.len() as u64 + 2;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), StorageError> {
        self.writer
            .flush()
            .map_err(|e| StorageError::io(self.path(), e))
    }
}

/// Manages the state and data for a single SMTP connection
pub struct SmtpSession {
    store: Arc<MailboxStore>,
    redirect_to_sender: Arc<AtomicBool>,
    /// Sender address from MAIL FROM, brackets removed
    from: Option<String>,
    /// Recipients from RCPT TO, as given by the client
    to: Vec<String>,
    /// Present while in DATA mode
    body: Option<BodyBuffer>,
    closed: bool,
}

impl SmtpSession {
    /// Create a new SMTP session
    pub fn new(store: Arc<MailboxStore>, redirect_to_sender: Arc<AtomicBool>) -> Self {
        Self {
            store,
            redirect_to_sender,
            from: None,
            to: Vec::new(),
            body: None,
            closed: false,
        }
    }

    pub fn state(&self) -> SmtpState {
        if self.closed {
            return SmtpState::Closed;
        }
        match (&self.body, &self.from) {
            (Some(_), _) => SmtpState::InData,
            (None, Some(_)) if !self.to.is_empty() => SmtpState::HaveRecipients,
            (None, Some(_)) => SmtpState::HaveSender,
            (None, None) => SmtpState::Ready,
        }
    }

    pub fn sender(&self) -> Option<&str> {
        self.from.as_deref()
    }

    pub fn recipients(&self) -> &[String] {
        &self.to
    }

    /// Process one line from the client.
    ///
    /// Returns `None` for body lines, which get no reply.
    pub fn process_line(&mut self, line: &str) -> Result<Option<SmtpResponse>, StorageError> {
        if self.body.is_some() {
            if line == "." {
                return self.finish_data().map(Some);
            }
            let line = if line == ".." { "." } else { line };
            if let Some(body) = self.body.as_mut() {
                body.append_line(line)?;
            }
            return Ok(None);
        }

        let response = match SmtpCommand::parse(line) {
            SmtpCommand::Hello | SmtpCommand::Noop => SmtpResponse::ok(),
            SmtpCommand::Mail(arg) => match parse_sender(arg) {
                Some(sender) => {
                    let response = SmtpResponse::sender_ok(sender);
                    self.from = Some(sender.to_owned());
                    response
                }
                None => SmtpResponse::no_sender(),
            },
            SmtpCommand::Rcpt(arg) => {
                let recipient = arg.trim();
                if recipient.is_empty() {
                    SmtpResponse::no_recipient()
                } else {
                    self.to.push(recipient.to_owned());
                    SmtpResponse::recipient_ok(recipient)
                }
            }
            SmtpCommand::Data => {
                if self.from.is_none() {
                    SmtpResponse::no_sender()
                } else if self.to.is_empty() {
                    SmtpResponse::no_recipients()
                } else {
                    self.body = Some(BodyBuffer::create()?);
                    SmtpResponse::data_start()
                }
            }
            SmtpCommand::Quit => {
                self.closed = true;
                SmtpResponse::quit()
            }
            SmtpCommand::Unknown => SmtpResponse::error(),
        };
        Ok(Some(response))
    }

    /// Deliver the collected body. The envelope is kept, so another DATA
    /// replays it with a new body.
    fn finish_data(&mut self) -> Result<SmtpResponse, StorageError> {
        let Some(mut body) = self.body.take() else {
            return Ok(SmtpResponse::error());
        };
        body.finish()?;

        let from = self.from.as_deref().unwrap_or_default();
        let redirect = self.redirect_to_sender.load(Ordering::Relaxed);
        let files = self.store.deliver(from, &self.to, &body.path(), redirect)?;
        info!("Message saved to {files:?}");

        Ok(SmtpResponse::bytes_accepted(body.size))
    }
}

impl Session for SmtpSession {
    const SERVICE: Service = Service::Smtp;

    fn greeting(&self) -> String {
        SmtpResponse::greeting().format()
    }

    fn handle_line(&mut self, line: &str) -> Result<Reply, StorageError> {
        Ok(match self.process_line(line)? {
            Some(response) => Reply::new(response.format(), self.closed),
            None => Reply::silent(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NoopObserver;
    use std::fs;
    use tempfile::TempDir;

    fn create_session(redirect: bool) -> (TempDir, Arc<MailboxStore>, SmtpSession) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MailboxStore::new(dir.path(), Arc::new(NoopObserver)));
        let session = SmtpSession::new(store.clone(), Arc::new(AtomicBool::new(redirect)));
        (dir, store, session)
    }

    fn send(session: &mut SmtpSession, line: &str) -> Option<String> {
        session
            .process_line(line)
            .unwrap()
            .map(|response| response.format())
    }

    fn stored_bodies(store: &MailboxStore, mailbox: &str) -> Vec<Vec<u8>> {
        store
            .list_messages(mailbox)
            .unwrap()
            .iter()
            .map(|id| store.locate(mailbox, id).read().unwrap())
            .collect()
    }

    #[test]
    fn test_new_session() {
        let (_dir, _store, session) = create_session(false);
        assert_eq!(session.state(), SmtpState::Ready);
        assert!(session.sender().is_none());
        assert!(session.recipients().is_empty());
    }

    #[test]
    fn test_greeting() {
        let (_dir, _store, session) = create_session(false);
        assert_eq!(session.greeting(), "220 Test Mail Server\r\n");
    }

    #[test]
    fn test_complete_transaction() {
        let (_dir, store, mut session) = create_session(false);

        assert_eq!(send(&mut session, "HELO a").unwrap(), "250 OK\r\n");
        assert_eq!(
            send(&mut session, "MAIL FROM:<a@x>").unwrap(),
            "250 sender a@x OK\r\n"
        );
        assert_eq!(session.state(), SmtpState::HaveSender);
        assert_eq!(
            send(&mut session, "RCPT TO:<b@x>").unwrap(),
            "250 recipient <b@x> OK\r\n"
        );
        assert_eq!(session.state(), SmtpState::HaveRecipients);
        assert_eq!(
            send(&mut session, "DATA").unwrap(),
            "354 enter mail, end with line containing only \".\"\r\n"
        );
        assert_eq!(session.state(), SmtpState::InData);
        assert_eq!(send(&mut session, "Hello"), None);
        assert_eq!(
            send(&mut session, ".").unwrap(),
            "250 7 bytes accepted\r\n"
        );

        let reply = session.handle_line("QUIT").unwrap();
        assert_eq!(reply.text.as_deref(), Some("221 Closing connection\r\n"));
        assert!(reply.close);

        assert_eq!(stored_bodies(&store, "b@x"), vec![b"Hello\r\n".to_vec()]);
    }

    #[test]
    fn test_only_quit_closes_connection() {
        let (_dir, _store, mut session) = create_session(false);

        for line in ["HELO a", "NOOP", "RSET", "MAIL FROM:<a@x>", "RCPT TO:<b@x>"] {
            let reply = session.handle_line(line).unwrap();
            assert!(!reply.close, "{line}");
        }
        session.handle_line("DATA").unwrap();
        assert_eq!(session.handle_line("QUIT").unwrap(), Reply::silent());
        session.handle_line(".").unwrap();

        let reply = session.handle_line("quit").unwrap();
        assert!(reply.close);
        assert_eq!(session.state(), SmtpState::Closed);
    }

    #[test]
    fn test_dot_unstuffing() {
        let (_dir, store, mut session) = create_session(false);
        send(&mut session, "MAIL FROM:<a@x>");
        send(&mut session, "RCPT TO:<b@x>");
        send(&mut session, "DATA");
        for line in ["Subject: dots", "", "..", "...", "..x", "end"] {
            assert_eq!(send(&mut session, line), None);
        }
        send(&mut session, ".");

        assert_eq!(
            stored_bodies(&store, "b@x"),
            vec![b"Subject: dots\r\n\r\n.\r\n...\r\n..x\r\nend\r\n".to_vec()]
        );
    }

    #[test]
    fn test_empty_arguments_rejected() {
        let (_dir, _store, mut session) = create_session(false);
        assert_eq!(
            send(&mut session, "MAIL FROM:  ").unwrap(),
            "550 no sender given\r\n"
        );
        assert_eq!(
            send(&mut session, "RCPT TO:").unwrap(),
            "550 no recipient given\r\n"
        );
        assert_eq!(session.state(), SmtpState::Ready);
    }

    #[test]
    fn test_data_preconditions() {
        let (_dir, _store, mut session) = create_session(false);
        assert_eq!(
            send(&mut session, "DATA").unwrap(),
            "550 no sender given\r\n"
        );
        send(&mut session, "MAIL FROM:<a@x>");
        assert_eq!(
            send(&mut session, "DATA").unwrap(),
            "554 no recipients given\r\n"
        );
        assert_eq!(session.state(), SmtpState::HaveSender);
    }

    #[test]
    fn test_unknown_command() {
        let (_dir, _store, mut session) = create_session(false);
        assert_eq!(send(&mut session, "RSET").unwrap(), "500 ERROR\r\n");
        assert_eq!(send(&mut session, "").unwrap(), "500 ERROR\r\n");
        assert_eq!(send(&mut session, "NOOP").unwrap(), "250 OK\r\n");
        assert_eq!(session.state(), SmtpState::Ready);
    }

    #[test]
    fn test_envelope_kept_after_data() {
        let (_dir, store, mut session) = create_session(false);
        send(&mut session, "MAIL FROM:<a@x>");
        send(&mut session, "RCPT TO:<b@x>");
        send(&mut session, "DATA");
        send(&mut session, "first");
        send(&mut session, ".");

        assert_eq!(session.state(), SmtpState::HaveRecipients);
        std::thread::sleep(std::time::Duration::from_millis(5));

        send(&mut session, "DATA");
        send(&mut session, "second");
        send(&mut session, ".");

        assert_eq!(
            stored_bodies(&store, "b@x"),
            vec![b"first\r\n".to_vec(), b"second\r\n".to_vec()]
        );
    }

    #[test]
    fn test_duplicate_recipients_delivered_once() {
        let (_dir, store, mut session) = create_session(false);
        send(&mut session, "MAIL FROM:<a@x>");
        send(&mut session, "RCPT TO:<b@x>");
        send(&mut session, "RCPT TO:b@x");
        send(&mut session, "RCPT TO:<c@x>");
        assert_eq!(session.recipients().len(), 3);
        send(&mut session, "DATA");
        send(&mut session, "body");
        send(&mut session, ".");

        assert_eq!(store.list_messages("b@x").unwrap().len(), 1);
        assert_eq!(
            store.list_messages("b@x").unwrap(),
            store.list_messages("c@x").unwrap()
        );
    }

    #[test]
    fn test_redirect_to_sender() {
        let (_dir, store, mut session) = create_session(true);
        send(&mut session, "MAIL FROM:<author@x>");
        send(&mut session, "RCPT TO:<b@x>");
        send(&mut session, "RCPT TO:<c@x>");
        send(&mut session, "DATA");
        send(&mut session, "bounce");
        send(&mut session, ".");

        assert_eq!(stored_bodies(&store, "author@x"), vec![b"bounce\r\n".to_vec()]);
        assert!(store.list_messages("b@x").unwrap().is_empty());
        assert!(store.list_messages("c@x").unwrap().is_empty());
    }

    #[test]
    fn test_temporary_body_removed_on_drop() {
        let (_dir, store, mut session) = create_session(false);
        send(&mut session, "MAIL FROM:<a@x>");
        send(&mut session, "RCPT TO:<b@x>");
        send(&mut session, "DATA");
        send(&mut session, "never finished");

        let temp = session.body.as_ref().unwrap().path();
        assert!(temp.exists());
        drop(session);
        assert!(!temp.exists());
        assert!(store.list_mailboxes().unwrap().is_empty());
    }

    #[test]
    fn test_delivery_failure_propagates() {
        let (dir, _store, mut session) = create_session(false);
        // A plain file where the mailbox directory should go
        fs::write(dir.path().join("b@x"), "in the way").unwrap();

        send(&mut session, "MAIL FROM:<a@x>");
        send(&mut session, "RCPT TO:<b@x>");
        send(&mut session, "DATA");
        send(&mut session, "body");
        assert!(session.handle_line(".").is_err());
    }
}
