//! Filesystem-backed mailbox store

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info};

use crate::error::StorageError;
use crate::event::{MailboxEvent, Observer};
use crate::mailbox::message::{MessageId, is_valid_mailbox_name, strip_address};

/// Mailboxes kept as directories under a root, one file per message.
///
/// The store holds no locks. Concurrent sessions may deliver to and delete
/// from the same mailbox; every read checks the filesystem again.
pub struct MailboxStore {
    root: PathBuf,
    observer: Arc<dyn Observer>,
}

/// Reference to a message file. Existence is not guaranteed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub mailbox: String,
    pub id: MessageId,
    pub path: PathBuf,
}

impl MessageHandle {
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Current size in bytes, `None` if the file is gone
    pub fn size(&self) -> Option<u64> {
        fs::metadata(&self.path).ok().map(|meta| meta.len())
    }

    pub fn read(&self) -> Result<Vec<u8>, StorageError> {
        fs::read(&self.path).map_err(|e| StorageError::io(&self.path, e))
    }
}

impl MailboxStore {
    pub fn new(root: impl Into<PathBuf>, observer: Arc<dyn Observer>) -> Self {
        let root = root.into();
        info!("Using '{}' directory to store user mailboxes", root.display());
        Self { root, observer }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of every mailbox currently holding at least one message
    pub fn list_mailboxes(&self) -> Result<BTreeSet<String>, StorageError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(StorageError::io(&self.root, e)),
        };

        let mut mailboxes = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&self.root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !self.list_messages(&name)?.is_empty() {
                mailboxes.insert(name);
            }
        }
        Ok(mailboxes)
    }

    /// Every message identifier in a mailbox, in ascending order.
    /// A missing mailbox is simply empty.
    pub fn list_messages(&self, mailbox: &str) -> Result<BTreeSet<MessageId>, StorageError> {
        let mut messages = BTreeSet::new();
        if !is_valid_mailbox_name(mailbox) {
            return Ok(messages);
        }

        let dir = self.root.join(mailbox);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
                return Ok(messages);
            }
            Err(e) => return Err(StorageError::io(&dir, e)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&dir, e))?;
            if !entry.path().is_file() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(MessageId::from_file_name) {
                messages.insert(id);
            }
        }
        Ok(messages)
    }

    /// Copy `body` into the mailbox of every target under one fresh identifier.
    ///
    /// Targets are the stripped, deduplicated recipients, or only the stripped
    /// sender when `redirect_to_sender` is set. Copies already written stay in
    /// place if a later one fails.
    pub fn deliver(
        &self,
        sender: &str,
        recipients: &[String],
        body: &Path,
        redirect_to_sender: bool,
    ) -> Result<BTreeSet<PathBuf>, StorageError> {
        let id = MessageId::now();

        let targets: BTreeSet<&str> = if redirect_to_sender {
            BTreeSet::from([strip_address(sender)])
        } else {
            recipients.iter().map(|r| strip_address(r)).collect()
        };

        if let Some(bad) = targets.iter().find(|t| !is_valid_mailbox_name(t)) {
            return Err(StorageError::InvalidMailbox((*bad).to_owned()));
        }

        let mut written = BTreeSet::new();
        for mailbox in &targets {
            let dir = self.root.join(mailbox);
            let dest = dir.join(id.as_str());
            if let Err(e) = fs::create_dir_all(&dir).and_then(|_| fs::copy(body, &dest)) {
                error!(
                    "Could not copy file '{}' to '{}': {e}",
                    body.display(),
                    dest.display()
                );
                return Err(StorageError::io(dest, e));
            }
            written.insert(absolute(dest));
        }

        for mailbox in &targets {
            self.observer
                .on_mailbox_changed(&MailboxEvent::created(mailbox, id.as_str()));
        }

        Ok(written)
    }

    /// Handle for a message; the file may or may not exist
    pub fn locate(&self, mailbox: &str, id: &MessageId) -> MessageHandle {
        MessageHandle {
            mailbox: mailbox.to_owned(),
            id: id.clone(),
            path: self.root.join(mailbox).join(id.as_str()),
        }
    }

    /// Remove a message. Returns whether a file was actually removed.
    pub fn delete(&self, mailbox: &str, id: &MessageId) -> bool {
        if !is_valid_mailbox_name(mailbox) {
            return false;
        }
        let handle = self.locate(mailbox, id);
        match fs::remove_file(&handle.path) {
            Ok(()) => {
                self.observer
                    .on_mailbox_changed(&MailboxEvent::deleted(mailbox, id.as_str()));
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                error!("Could not delete file '{}': {e}", handle.path.display());
                false
            }
        }
    }
}

fn absolute(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}
