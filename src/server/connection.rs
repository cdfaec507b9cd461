//! Per-connection line loop shared by the SMTP and POP3 listeners

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::{ServerError, StorageError};
use crate::event::{Direction, Observer, Service, SessionId};

/// What to send back after one client line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Wire text including line terminators, `None` to stay silent
    pub text: Option<String>,
    /// Close the connection once the text is written
    pub close: bool,
}

impl Reply {
    pub fn new(text: String, close: bool) -> Self {
        Self {
            text: Some(text),
            close,
        }
    }

    pub fn silent() -> Self {
        Self {
            text: None,
            close: false,
        }
    }
}

/// Protocol state machine driven by decoded lines.
///
/// One value lives for exactly one connection and is dropped when the
/// connection ends, whatever the reason.
pub trait Session: Send + 'static {
    const SERVICE: Service;

    /// Banner sent right after connecting
    fn greeting(&self) -> String;

    /// Handle one line, newline already stripped. A storage error aborts the connection.
    fn handle_line(&mut self, line: &str) -> Result<Reply, StorageError>;
}

/// Settings every connection handler needs
#[derive(Clone)]
pub(crate) struct ConnectionContext {
    pub observer: Arc<dyn Observer>,
    pub idle_timeout: Duration,
    pub max_line_length: usize,
    /// Open connections of the listener this context belongs to
    pub connections: Arc<Connections>,
}

/// Sockets of the sessions still running on one listener
#[derive(Debug, Default)]
pub(crate) struct Connections {
    open: Mutex<HashMap<SessionId, TcpStream>>,
    drained: Condvar,
}

impl Connections {
    pub fn register(&self, id: SessionId, stream: &TcpStream) {
        let clone = match stream.try_clone() {
            Ok(clone) => clone,
            Err(e) => {
                warn!("Could not track connection {id}: {e}");
                return;
            }
        };
        if let Ok(mut open) = self.open.lock() {
            open.insert(id, clone);
        }
    }

    pub fn unregister(&self, id: SessionId) {
        if let Ok(mut open) = self.open.lock() {
            open.remove(&id);
        }
        self.drained.notify_all();
    }

    pub fn len(&self) -> usize {
        self.open.lock().map(|open| open.len()).unwrap_or(0)
    }

    /// Shut down every open socket, then wait up to `grace` for the sessions to end
    pub fn close_all(&self, grace: Duration) {
        let Ok(open) = self.open.lock() else {
            return;
        };
        for (id, stream) in open.iter() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!("Could not shut down connection {id}: {e}");
            }
        }
        match self
            .drained
            .wait_timeout_while(open, grace, |open| !open.is_empty())
        {
            Ok((open, result)) if result.timed_out() => {
                warn!("{} connections still open after shutdown", open.len());
            }
            Ok(_) => {}
            Err(e) => error!("Connection registry poisoned: {e}"),
        }
    }
}

/// Serve one client until it quits, disconnects, idles out, or fails.
/// The connection must already be registered under `id`.
pub(crate) fn handle_client<S: Session>(
    stream: TcpStream,
    mut session: S,
    id: SessionId,
    ctx: &ConnectionContext,
) -> Result<(), ServerError> {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    info!("Client connected: {peer} ({} session {id})", S::SERVICE);
    ctx.observer.on_session_created(S::SERVICE, id);

    let result = converse(stream, &mut session, id, &peer, ctx);

    // Releases per-session resources before the close is reported
    drop(session);
    info!("Client disconnected: {peer}");
    ctx.observer.on_session_closed(S::SERVICE, id);
    ctx.connections.unregister(id);
    result
}

fn converse<S: Session>(
    stream: TcpStream,
    session: &mut S,
    id: SessionId,
    peer: &str,
    ctx: &ConnectionContext,
) -> Result<(), ServerError> {
    stream.set_read_timeout(Some(ctx.idle_timeout))?;
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    send_response(&mut writer, &session.greeting(), id, S::SERVICE, ctx)?;

    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        let limit = ctx.max_line_length as u64 + 2;
        match (&mut reader).take(limit).read_until(b'\n', &mut buffer) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                info!("Closing client connection {peer} because idle timeout has expired");
                break;
            }
            Err(e) => {
                warn!("Error reading from client {peer}: {e}");
                break;
            }
        }

        if buffer.last() != Some(&b'\n') {
            if buffer.len() as u64 >= limit {
                warn!(
                    "Closing client connection {peer}: line exceeds {} bytes",
                    ctx.max_line_length
                );
            }
            // Unterminated data before EOF is dropped
            break;
        }

        let line = decode_line(&buffer);
        debug!("<<: {line}");
        ctx.observer
            .on_message(S::SERVICE, id, Direction::Client, &line);

        let reply = match session.handle_line(&line) {
            Ok(reply) => reply,
            Err(e) => {
                error!("Aborting {} connection {peer}: {e}", S::SERVICE);
                return Err(e.into());
            }
        };
        if let Some(text) = &reply.text {
            send_response(&mut writer, text, id, S::SERVICE, ctx)?;
        }
        if reply.close {
            break;
        }
    }

    Ok(())
}

/// Strip the line terminator and decode, replacing invalid bytes
fn decode_line(buffer: &[u8]) -> String {
    let line = buffer.strip_suffix(b"\n").unwrap_or(buffer);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// Send a response to the client
fn send_response(
    stream: &mut TcpStream,
    text: &str,
    id: SessionId,
    service: Service,
    ctx: &ConnectionContext,
) -> Result<(), ServerError> {
    stream.write_all(text.as_bytes())?;
    stream.flush()?;
    debug!(">>: {}", text.trim_end());
    ctx.observer
        .on_message(service, id, Direction::Server, text);
    Ok(())
}
