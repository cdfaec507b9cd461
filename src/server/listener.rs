//! Accept loops and their control handles

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::ServerError;
use crate::event::{Service, SessionId};
use crate::server::connection::{ConnectionContext, Connections, Session, handle_client};

/// How long [`ListenerHandle::stop`] waits for closed sessions to clean up
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A running listener. Dropping the handle leaves the listener running;
/// call [`ListenerHandle::stop`] to shut it down.
#[derive(Debug)]
pub struct ListenerHandle {
    service: Service,
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    connections: Arc<Connections>,
    thread: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn service(&self) -> Service {
        self.service
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Number of client connections currently being served
    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    /// Stop accepting connections, then close the open ones. Returns once
    /// their sessions are dropped, so unfinished SMTP bodies are already removed.
    pub fn stop(&mut self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Stopping {} server...", self.service);
        // Wake the blocking accept call
        if let Err(e) = TcpStream::connect(wake_addr(self.local_addr)) {
            warn!("Could not wake {} listener: {e}", self.service);
        }
        self.join();
        self.connections.close_all(SHUTDOWN_GRACE);
    }

    /// Block until the accept loop exits
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("{} accept loop panicked", self.service);
            }
        }
    }
}

/// Spawn the accept loop for `listener`. Every connection gets its own thread
/// and a fresh session from `new_session`.
pub(crate) fn spawn<S, F>(
    listener: TcpListener,
    new_session: F,
    ctx: ConnectionContext,
) -> Result<ListenerHandle, ServerError>
where
    S: Session,
    F: Fn() -> S + Send + 'static,
{
    let local_addr = listener.local_addr()?;
    let shutdown = Arc::new(AtomicBool::new(false));
    info!("{} server listening on {local_addr}", S::SERVICE);

    let connections = ctx.connections.clone();
    let flag = shutdown.clone();
    let thread = thread::Builder::new()
        .name(format!("{}-listener", S::SERVICE).to_lowercase())
        .spawn(move || accept_loop(listener, new_session, ctx, flag))?;

    Ok(ListenerHandle {
        service: S::SERVICE,
        local_addr,
        shutdown,
        connections,
        thread: Some(thread),
    })
}

fn accept_loop<S, F>(
    listener: TcpListener,
    new_session: F,
    ctx: ConnectionContext,
    shutdown: Arc<AtomicBool>,
) where
    S: Session,
    F: Fn() -> S,
{
    for stream in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let id = SessionId::new();
                ctx.connections.register(id, &stream);
                let session = new_session();
                let worker_ctx = ctx.clone();
                let worker = thread::Builder::new()
                    .name(format!("{}-worker", S::SERVICE).to_lowercase())
                    .spawn(move || {
                        if let Err(e) = handle_client(stream, session, id, &worker_ctx) {
                            warn!("Error handling client: {e}");
                        }
                    });
                if let Err(e) = worker {
                    error!("Could not spawn connection thread: {e}");
                    ctx.connections.unregister(id);
                }
            }
            Err(e) => {
                error!("Error accepting connection: {e}");
            }
        }
    }
    info!("{} server stopped", S::SERVICE);
}

/// Address to connect to when waking a listener bound to a wildcard address
fn wake_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}
