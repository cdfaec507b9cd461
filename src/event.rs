//! Session and mailbox notifications for an external observer
//!
//! The server core calls an [`Observer`] synchronously. Observers must be cheap;
//! anything slow belongs on the other side of a channel (see [`ChannelObserver`]).

use std::fmt;
use std::sync::Mutex;
use std::sync::mpsc;

use tracing::{debug, info};
use uuid::Uuid;

/// Protocol served by a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Smtp,
    Pop3,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Smtp => f.write_str("SMTP"),
            Service::Pop3 => f.write_str("POP3"),
        }
    }
}

/// Identifier of a single client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Which side of the conversation produced a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxEventKind {
    Created,
    Deleted,
}

/// A message appeared in or disappeared from a mailbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxEvent {
    pub mailbox: String,
    pub message: String,
    pub kind: MailboxEventKind,
}

impl MailboxEvent {
    pub fn created(mailbox: &str, message: &str) -> Self {
        Self {
            mailbox: mailbox.to_owned(),
            message: message.to_owned(),
            kind: MailboxEventKind::Created,
        }
    }

    pub fn deleted(mailbox: &str, message: &str) -> Self {
        Self {
            mailbox: mailbox.to_owned(),
            message: message.to_owned(),
            kind: MailboxEventKind::Deleted,
        }
    }
}

/// Receiver of server notifications. Every method defaults to a no-op.
pub trait Observer: Send + Sync {
    fn on_session_created(&self, _service: Service, _session: SessionId) {}

    fn on_session_closed(&self, _service: Service, _session: SessionId) {}

    fn on_message(&self, _service: Service, _session: SessionId, _direction: Direction, _text: &str) {
    }

    fn on_mailbox_changed(&self, _event: &MailboxEvent) {}
}

/// Observer for headless operation
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Writes every notification to the `tracing` log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_session_created(&self, service: Service, session: SessionId) {
        debug!("{service} session {session} created");
    }

    fn on_session_closed(&self, service: Service, session: SessionId) {
        debug!("{service} session {session} closed");
    }

    fn on_mailbox_changed(&self, event: &MailboxEvent) {
        match event.kind {
            MailboxEventKind::Created => {
                info!("Message {} added to mailbox {}", event.message, event.mailbox)
            }
            MailboxEventKind::Deleted => {
                info!("Message {} removed from mailbox {}", event.message, event.mailbox)
            }
        }
    }
}

/// Owned form of a notification, as sent by [`ChannelObserver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    SessionCreated(Service, SessionId),
    SessionClosed(Service, SessionId),
    Message {
        service: Service,
        session: SessionId,
        direction: Direction,
        text: String,
    },
    Mailbox(MailboxEvent),
}

/// Forwards notifications to an `mpsc` channel.
///
/// Send errors (no receiver left) are ignored.
#[derive(Debug)]
pub struct ChannelObserver {
    sender: Mutex<mpsc::Sender<Event>>,
}

impl ChannelObserver {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }

    /// Create an observer together with the receiving end of its channel
    pub fn channel() -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), rx)
    }

    fn send(&self, event: Event) {
        if let Ok(sender) = self.sender.lock() {
            let _ = sender.send(event);
        }
    }
}

impl Observer for ChannelObserver {
    fn on_session_created(&self, service: Service, session: SessionId) {
        self.send(Event::SessionCreated(service, session));
    }

    fn on_session_closed(&self, service: Service, session: SessionId) {
        self.send(Event::SessionClosed(service, session));
    }

    fn on_message(&self, service: Service, session: SessionId, direction: Direction, text: &str) {
        self.send(Event::Message {
            service,
            session,
            direction,
            text: text.to_owned(),
        });
    }

    fn on_mailbox_changed(&self, event: &MailboxEvent) {
        self.send(Event::Mailbox(event.clone()));
    }
}
