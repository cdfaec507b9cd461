//! POP3 session state management

use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;

use tracing::debug;

use crate::error::StorageError;
use crate::event::Service;
use crate::mailbox::{MailboxStore, MessageId};
use crate::pop3::commands::{MailboxCommand, Pop3Command, parse_number};
use crate::pop3::response::Pop3Response;
use crate::server::{Reply, Session};

/// Capabilities advertised by CAPA
const CAPABILITIES: [&str; 3] = ["USER", "TOP", "UIDL"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pop3State {
    /// No mailbox selected yet
    Unauthenticated,
    /// USER or APOP selected a mailbox
    Authenticated,
    /// QUIT processed
    Closed,
}

/// Mailbox selected by USER/APOP, with the message list frozen at that moment
#[derive(Debug)]
struct Selection {
    mailbox: String,
    snapshot: Vec<MessageId>,
    deleted: BTreeSet<MessageId>,
}

impl Selection {
    /// Resolve a 1-based message number from the client
    fn entry(&self, number: &str) -> Option<&MessageId> {
        let number = parse_number(number)?;
        self.snapshot.get(number.checked_sub(1)?)
    }

    fn is_deleted(&self, id: &MessageId) -> bool {
        self.deleted.contains(id)
    }
}

/// Manages the state for a single POP3 connection.
///
/// Deletions are only marked during the session and applied on QUIT.
pub struct Pop3Session {
    store: Arc<MailboxStore>,
    selection: Option<Selection>,
    closed: bool,
}

impl Pop3Session {
    pub fn new(store: Arc<MailboxStore>) -> Self {
        Self {
            store,
            selection: None,
            closed: false,
        }
    }

    pub fn state(&self) -> Pop3State {
        match (&self.selection, self.closed) {
            (_, true) => Pop3State::Closed,
            (Some(_), false) => Pop3State::Authenticated,
            (None, false) => Pop3State::Unauthenticated,
        }
    }

    pub fn mailbox(&self) -> Option<&str> {
        self.selection.as_ref().map(|s| s.mailbox.as_str())
    }

    /// Process one command line
    pub fn process_line(&mut self, line: &str) -> Result<Pop3Response, StorageError> {
        let command = match Pop3Command::parse(line) {
            Pop3Command::User(name) => return self.select(name),
            Pop3Command::Capa => {
                return Ok(Pop3Response::multi_line(
                    CAPABILITIES.iter().map(|c| (*c).to_owned()).collect(),
                ));
            }
            Pop3Command::Noop => return Ok(Pop3Response::ok()),
            Pop3Command::Quit => return Ok(self.quit()),
            Pop3Command::Unknown => return Ok(Pop3Response::not_implemented()),
            Pop3Command::Mailbox(command) => command,
        };

        let Some(selection) = self.selection.as_mut() else {
            return Ok(Pop3Response::no_user());
        };
        let store = &self.store;

        let response = match command {
            MailboxCommand::Pass => Pop3Response::ok(),
            MailboxCommand::Stat => {
                // Vanished files still count, they only stop adding bytes
                let size: u64 = selection
                    .snapshot
                    .iter()
                    .filter_map(|id| store.locate(&selection.mailbox, id).size())
                    .sum();
                Pop3Response::ok_with(format!("{} {size}", selection.snapshot.len()))
            }
            MailboxCommand::List(None) => {
                let lines = selection
                    .snapshot
                    .iter()
                    .enumerate()
                    .filter(|(_, id)| !selection.is_deleted(id))
                    .map(|(i, id)| {
                        let size = store.locate(&selection.mailbox, id).size().unwrap_or(0);
                        format!("{} {size}", i + 1)
                    })
                    .collect();
                Pop3Response::multi_line(lines)
            }
            MailboxCommand::List(Some(number)) => match selection.entry(number) {
                None => Pop3Response::invalid_number(),
                Some(id) if selection.is_deleted(id) => Pop3Response::multi_line(Vec::new()),
                Some(id) => {
                    let size = store.locate(&selection.mailbox, id).size().unwrap_or(0);
                    Pop3Response::multi_line(vec![format!("{number} {size}")])
                }
            },
            MailboxCommand::Uidl(None) => Pop3Response::multi_line(
                selection
                    .snapshot
                    .iter()
                    .enumerate()
                    .map(|(i, id)| format!("{} {id}", i + 1))
                    .collect(),
            ),
            MailboxCommand::Uidl(Some(number)) => match selection.entry(number) {
                Some(id) => Pop3Response::ok_with(format!("{number} {id}")),
                None => Pop3Response::invalid_number(),
            },
            MailboxCommand::Retr(number) => match read_message(store, selection, number)? {
                Ok(content) => Pop3Response::MultiLine {
                    status: Some(content.len().to_string()),
                    lines: split_lines(&content),
                },
                Err(response) => response,
            },
            MailboxCommand::Top(number, lines) => match read_message(store, selection, number)? {
                Ok(content) => match lines.and_then(parse_number) {
                    Some(count) => Pop3Response::multi_line(top_lines(&content, count)),
                    None => Pop3Response::invalid_lines_count(),
                },
                Err(response) => response,
            },
            MailboxCommand::Dele(number) => match selection.entry(number).cloned() {
                None => Pop3Response::invalid_number(),
                Some(id) if selection.is_deleted(&id) => Pop3Response::message_deleted(),
                Some(id) => {
                    selection.deleted.insert(id);
                    Pop3Response::ok()
                }
            },
            MailboxCommand::Rset => {
                selection.deleted.clear();
                Pop3Response::ok()
            }
        };
        Ok(response)
    }

    /// Select a mailbox and freeze its current message list
    fn select(&mut self, mailbox: &str) -> Result<Pop3Response, StorageError> {
        let snapshot: Vec<MessageId> = self.store.list_messages(mailbox)?.into_iter().collect();
        debug!("Mailbox {mailbox} selected with {} messages", snapshot.len());
        self.selection = Some(Selection {
            mailbox: mailbox.to_owned(),
            snapshot,
            deleted: BTreeSet::new(),
        });
        Ok(Pop3Response::ok())
    }

    /// Apply the deletions marked in this session
    fn quit(&mut self) -> Pop3Response {
        self.closed = true;
        if let Some(selection) = self.selection.as_mut() {
            for id in std::mem::take(&mut selection.deleted) {
                if self.store.locate(&selection.mailbox, &id).exists() {
                    self.store.delete(&selection.mailbox, &id);
                }
            }
        }
        Pop3Response::ok()
    }
}

/// Content of a message that is in the snapshot, not marked deleted, and
/// still readable on disk. Otherwise the error reply to send.
fn read_message(
    store: &MailboxStore,
    selection: &Selection,
    number: &str,
) -> Result<Result<Vec<u8>, Pop3Response>, StorageError> {
    let Some(id) = selection.entry(number) else {
        return Ok(Err(Pop3Response::invalid_number()));
    };
    if selection.is_deleted(id) {
        return Ok(Err(Pop3Response::message_deleted()));
    }

    match store.locate(&selection.mailbox, id).read() {
        Ok(content) => Ok(Ok(content)),
        Err(StorageError::Io { source, .. }) if is_unreadable(source.kind()) => {
            debug!("Message {id} in {} is gone or unreadable: {source}", selection.mailbox);
            Ok(Err(Pop3Response::message_deleted()))
        }
        Err(e) => Err(e),
    }
}

/// Read failures meaning the message file is gone or cannot be opened
fn is_unreadable(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied | io::ErrorKind::IsADirectory
    )
}

/// Split stored content into lines, accepting CRLF, LF or CR terminators
fn split_lines(content: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(content);
    let mut lines = Vec::new();
    let mut rest = text.as_ref();
    while !rest.is_empty() {
        match rest.find(['\r', '\n']) {
            Some(end) => {
                lines.push(rest[..end].to_owned());
                let skip = if rest[end..].starts_with("\r\n") { 2 } else { 1 };
                rest = &rest[end + skip..];
            }
            None => {
                lines.push(rest.to_owned());
                break;
            }
        }
    }
    lines
}

/// Header block up to and including the first blank line, then `count` body lines
fn top_lines(content: &[u8], count: usize) -> Vec<String> {
    let lines = split_lines(content);
    let header_end = lines
        .iter()
        .position(|line| line.is_empty())
        .map_or(lines.len(), |blank| blank + 1);
    lines.into_iter().take(header_end.saturating_add(count)).collect()
}

impl Session for Pop3Session {
    const SERVICE: Service = Service::Pop3;

    fn greeting(&self) -> String {
        Pop3Response::greeting().format()
    }

    fn handle_line(&mut self, line: &str) -> Result<Reply, StorageError> {
        let response = self.process_line(line)?;
        Ok(Reply::new(response.format(), self.closed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ChannelObserver, Event, MailboxEvent};
    use std::fs;
    use std::path::Path;
    use std::sync::mpsc;
    use tempfile::TempDir;

    const FIRST: &str = "20240101100000000.msg";
    const SECOND: &str = "20240101100000001.msg";

    fn write_message(root: &Path, mailbox: &str, name: &str, content: &str) {
        let dir = root.join(mailbox);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), content).unwrap();
    }

    fn create_session() -> (TempDir, Pop3Session, mpsc::Receiver<Event>) {
        let dir = TempDir::new().unwrap();
        write_message(dir.path(), "b@x", FIRST, "Subject: one\r\n\r\nHello\r\n");
        write_message(
            dir.path(),
            "b@x",
            SECOND,
            "Subject: two\r\nX-Test: yes\r\n\r\nline 1\r\n.\r\nline 3\r\n",
        );
        let (observer, rx) = ChannelObserver::channel();
        let store = Arc::new(MailboxStore::new(dir.path(), Arc::new(observer)));
        (dir, Pop3Session::new(store), rx)
    }

    fn send(session: &mut Pop3Session, line: &str) -> String {
        session.process_line(line).unwrap().format()
    }

    fn login(session: &mut Pop3Session) {
        assert_eq!(send(session, "USER b@x"), "+OK\r\n");
        assert_eq!(send(session, "PASS anything"), "+OK\r\n");
    }

    #[test]
    fn test_greeting_and_initial_state() {
        let (_dir, session, _rx) = create_session();
        assert_eq!(session.greeting(), "+OK Test Mail Server\r\n");
        assert_eq!(session.state(), Pop3State::Unauthenticated);
        assert!(session.mailbox().is_none());
    }

    #[test]
    fn test_commands_require_user() {
        let (_dir, mut session, _rx) = create_session();
        for command in ["PASS x", "STAT", "LIST", "LIST 1", "UIDL", "RETR 1", "TOP 1 0", "DELE 1", "RSET"] {
            assert_eq!(send(&mut session, command), "-ERR No user given\r\n", "{command}");
        }
        assert_eq!(send(&mut session, "NOOP"), "+OK\r\n");
        assert_eq!(send(&mut session, "XTND"), "-ERR Not implemented\r\n");
    }

    #[test]
    fn test_capa() {
        let (_dir, mut session, _rx) = create_session();
        let capa = send(&mut session, "CAPA");
        assert!(capa.starts_with("+OK\r\n"));
        assert!(capa.contains("\r\nUIDL\r\n"));
        assert!(capa.ends_with("\r\n.\r\n"));
    }

    #[test]
    fn test_apop_selects_mailbox() {
        let (_dir, mut session, _rx) = create_session();
        assert_eq!(send(&mut session, "APOP b@x 0123456789abcdef"), "+OK\r\n");
        assert_eq!(session.mailbox(), Some("b@x"));
        assert_eq!(session.state(), Pop3State::Authenticated);
    }

    #[test]
    fn test_stat_and_list() {
        let (_dir, mut session, _rx) = create_session();
        login(&mut session);

        assert_eq!(send(&mut session, "STAT"), "+OK 2 71\r\n");
        assert_eq!(send(&mut session, "LIST"), "+OK\r\n1 23\r\n2 48\r\n.\r\n");
        assert_eq!(send(&mut session, "LIST 2"), "+OK\r\n2 48\r\n.\r\n");
        assert_eq!(send(&mut session, "LIST 3"), "-ERR Invalid message number\r\n");
        assert_eq!(send(&mut session, "LIST 0"), "-ERR Invalid message number\r\n");
        assert_eq!(send(&mut session, "LIST x"), "-ERR Invalid message number\r\n");
    }

    #[test]
    fn test_unknown_mailbox_is_empty() {
        let (_dir, mut session, _rx) = create_session();
        assert_eq!(send(&mut session, "USER nobody@x"), "+OK\r\n");
        assert_eq!(send(&mut session, "STAT"), "+OK 0 0\r\n");
        assert_eq!(send(&mut session, "LIST"), "+OK\r\n.\r\n");
        assert_eq!(send(&mut session, "RETR 1"), "-ERR Invalid message number\r\n");
    }

    #[test]
    fn test_uidl() {
        let (_dir, mut session, _rx) = create_session();
        login(&mut session);
        send(&mut session, "DELE 1");

        assert_eq!(
            send(&mut session, "UIDL"),
            format!("+OK\r\n1 {FIRST}\r\n2 {SECOND}\r\n.\r\n")
        );
        assert_eq!(send(&mut session, "UIDL 2"), format!("+OK 2 {SECOND}\r\n"));
        assert_eq!(send(&mut session, "UIDL 9"), "-ERR Invalid message number\r\n");
    }

    #[test]
    fn test_retr() {
        let (_dir, mut session, _rx) = create_session();
        login(&mut session);

        assert_eq!(
            send(&mut session, "RETR 1"),
            "+OK 23\r\nSubject: one\r\n\r\nHello\r\n.\r\n"
        );
        assert_eq!(
            send(&mut session, "RETR 2"),
            "+OK 48\r\nSubject: two\r\nX-Test: yes\r\n\r\nline 1\r\n..\r\nline 3\r\n.\r\n"
        );
        assert_eq!(send(&mut session, "RETR 3"), "-ERR Invalid message number\r\n");
    }

    #[test]
    fn test_top() {
        let (_dir, mut session, _rx) = create_session();
        login(&mut session);

        assert_eq!(
            send(&mut session, "TOP 2 0"),
            "+OK\r\nSubject: two\r\nX-Test: yes\r\n\r\n.\r\n"
        );
        assert_eq!(
            send(&mut session, "TOP 2 1"),
            "+OK\r\nSubject: two\r\nX-Test: yes\r\n\r\nline 1\r\n.\r\n"
        );
        assert_eq!(
            send(&mut session, "TOP 1 100"),
            "+OK\r\nSubject: one\r\n\r\nHello\r\n.\r\n"
        );
        assert_eq!(send(&mut session, "TOP 1 x"), "-ERR Invalid lines count format\r\n");
        assert_eq!(send(&mut session, "TOP 1"), "-ERR Invalid lines count format\r\n");
        assert_eq!(send(&mut session, "TOP 5 1"), "-ERR Invalid message number\r\n");
    }

    #[test]
    fn test_dele_and_rset() {
        let (_dir, mut session, _rx) = create_session();
        login(&mut session);

        assert_eq!(send(&mut session, "DELE 1"), "+OK\r\n");
        assert_eq!(send(&mut session, "DELE 1"), "-ERR Message deleted\r\n");
        assert_eq!(send(&mut session, "RETR 1"), "-ERR Message deleted\r\n");
        assert_eq!(send(&mut session, "TOP 1 0"), "-ERR Message deleted\r\n");
        assert_eq!(send(&mut session, "LIST"), "+OK\r\n2 48\r\n.\r\n");
        assert_eq!(send(&mut session, "LIST 1"), "+OK\r\n.\r\n");
        // Marked messages still count
        assert_eq!(send(&mut session, "STAT"), "+OK 2 71\r\n");

        assert_eq!(send(&mut session, "RSET"), "+OK\r\n");
        assert_eq!(send(&mut session, "LIST 1"), "+OK\r\n1 23\r\n.\r\n");
        assert!(send(&mut session, "RETR 1").starts_with("+OK 23\r\n"));
    }

    #[test]
    fn test_quit_commits_deletions() {
        let (dir, mut session, rx) = create_session();
        login(&mut session);
        send(&mut session, "DELE 2");

        let reply = session.handle_line("QUIT").unwrap();
        assert_eq!(reply.text.as_deref(), Some("+OK\r\n"));
        assert!(reply.close);
        assert_eq!(session.state(), Pop3State::Closed);

        assert!(dir.path().join("b@x").join(FIRST).exists());
        assert!(!dir.path().join("b@x").join(SECOND).exists());
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![Event::Mailbox(MailboxEvent::deleted("b@x", SECOND))]
        );
    }

    #[test]
    fn test_quit_without_deletions_keeps_messages() {
        let (dir, mut session, rx) = create_session();
        login(&mut session);
        send(&mut session, "DELE 1");
        send(&mut session, "RSET");
        send(&mut session, "QUIT");

        assert!(dir.path().join("b@x").join(FIRST).exists());
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn test_quit_without_user() {
        let (_dir, mut session, _rx) = create_session();
        let reply = session.handle_line("QUIT").unwrap();
        assert_eq!(reply.text.as_deref(), Some("+OK\r\n"));
        assert!(reply.close);
    }

    #[test]
    fn test_snapshot_ignores_new_mail() {
        let (dir, mut session, _rx) = create_session();
        login(&mut session);
        write_message(dir.path(), "b@x", "20240101100000002.msg", "late");

        assert_eq!(send(&mut session, "STAT"), "+OK 2 71\r\n");
        assert_eq!(send(&mut session, "RETR 3"), "-ERR Invalid message number\r\n");

        // A new USER takes a fresh snapshot
        send(&mut session, "USER b@x");
        assert_eq!(send(&mut session, "STAT"), "+OK 3 75\r\n");
    }

    #[test]
    fn test_message_removed_by_another_session() {
        let (dir, mut session, rx) = create_session();
        login(&mut session);
        send(&mut session, "DELE 1");
        fs::remove_file(dir.path().join("b@x").join(FIRST)).unwrap();
        fs::remove_file(dir.path().join("b@x").join(SECOND)).unwrap();

        // Count keeps the snapshot size, the byte total drops vanished files
        assert_eq!(send(&mut session, "STAT"), "+OK 2 0\r\n");
        assert_eq!(send(&mut session, "RETR 2"), "-ERR Message deleted\r\n");

        // Committing a deletion of a vanished file is silently skipped
        session.handle_line("QUIT").unwrap();
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn test_unreadable_message_is_reported_deleted() {
        let (dir, mut session, _rx) = create_session();
        login(&mut session);

        // Replaced by a directory after the snapshot was taken
        let path = dir.path().join("b@x").join(SECOND);
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();

        assert_eq!(send(&mut session, "RETR 2"), "-ERR Message deleted\r\n");
        assert_eq!(send(&mut session, "TOP 2 0"), "-ERR Message deleted\r\n");
        assert!(send(&mut session, "RETR 1").starts_with("+OK 23\r\n"));
    }

    #[cfg(unix)]
    #[test]
    fn test_message_without_read_permission() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, mut session, _rx) = create_session();
        login(&mut session);

        let path = dir.path().join("b@x").join(FIRST);
        fs::set_permissions(&path, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read(&path).is_ok() {
            // Permission bits do not apply to root
            return;
        }

        assert_eq!(send(&mut session, "RETR 1"), "-ERR Message deleted\r\n");
        assert_eq!(send(&mut session, "TOP 1 0"), "-ERR Message deleted\r\n");
        assert_eq!(send(&mut session, "NOOP"), "+OK\r\n");

        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
    }

    #[test]
    fn test_split_lines() {
        assert_eq!(split_lines(b"a\r\nb\nc\rd"), vec!["a", "b", "c", "d"]);
        assert_eq!(split_lines(b"a\r\n\r\n"), vec!["a", ""]);
        assert!(split_lines(b"").is_empty());
    }
}
