//! TCP front end: listeners, connection threads, and the server that owns them

mod connection;
mod listener;

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

pub use connection::{Reply, Session};
pub use listener::ListenerHandle;

use crate::config::ServerConfig;
use crate::error::{ServerError, StorageError};
use crate::event::Observer;
use crate::mailbox::MailboxStore;
use crate::pop3::Pop3Session;
use crate::smtp::SmtpSession;
use connection::ConnectionContext;

/// SMTP and POP3 listeners sharing one mailbox store
pub struct MailServer {
    config: ServerConfig,
    store: Arc<MailboxStore>,
    observer: Arc<dyn Observer>,
    redirect_to_sender: Arc<AtomicBool>,
    smtp: Option<ListenerHandle>,
    pop3: Option<ListenerHandle>,
}

impl MailServer {
    /// Create a server, creating the mail directory if needed.
    /// No listener is started yet.
    pub fn new(config: ServerConfig, observer: Arc<dyn Observer>) -> Result<Self, ServerError> {
        config.validate()?;
        std::fs::create_dir_all(&config.mail_dir)
            .map_err(|e| StorageError::io(&config.mail_dir, e))?;

        let store = Arc::new(MailboxStore::new(&config.mail_dir, observer.clone()));
        let redirect_to_sender = Arc::new(AtomicBool::new(config.redirect_to_sender));

        Ok(Self {
            config,
            store,
            observer,
            redirect_to_sender,
            smtp: None,
            pop3: None,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MailboxStore> {
        &self.store
    }

    pub fn is_redirect_to_sender(&self) -> bool {
        self.redirect_to_sender.load(Ordering::Relaxed)
    }

    /// Takes effect for deliveries completed after the call, including in open sessions
    pub fn set_redirect_to_sender(&self, redirect: bool) {
        self.redirect_to_sender.store(redirect, Ordering::Relaxed);
    }

    /// Start every listener with a configured port
    pub fn start(&mut self) -> Result<(), ServerError> {
        if self.config.smtp_port.is_none() && self.config.pop3_port.is_none() {
            return Err(ServerError::Config(
                "neither an SMTP nor a POP3 port is configured".to_string(),
            ));
        }
        if let Some(port) = self.config.smtp_port {
            self.start_smtp(port)?;
        }
        if let Some(port) = self.config.pop3_port {
            self.start_pop3(port)?;
        }
        Ok(())
    }

    /// Start SMTP on `port` of the configured host, replacing any running SMTP listener
    pub fn start_smtp(&mut self, port: u16) -> Result<SocketAddr, ServerError> {
        info!("Starting SMTP server on port {port}...");
        let listener = TcpListener::bind((self.config.host, port))?;
        self.start_smtp_with_listener(listener)
    }

    /// Start SMTP on an already bound listener
    pub fn start_smtp_with_listener(
        &mut self,
        listener: TcpListener,
    ) -> Result<SocketAddr, ServerError> {
        self.stop_smtp();
        let store = self.store.clone();
        let redirect = self.redirect_to_sender.clone();
        let handle = listener::spawn(
            listener,
            move || SmtpSession::new(store.clone(), redirect.clone()),
            self.context(),
        )?;
        let addr = handle.local_addr();
        self.smtp = Some(handle);
        Ok(addr)
    }

    pub fn stop_smtp(&mut self) {
        if let Some(mut handle) = self.smtp.take() {
            handle.stop();
        }
    }

    pub fn is_smtp_started(&self) -> bool {
        self.smtp.as_ref().is_some_and(ListenerHandle::is_running)
    }

    pub fn smtp_addr(&self) -> Option<SocketAddr> {
        self.smtp.as_ref().map(ListenerHandle::local_addr)
    }

    /// Start POP3 on `port` of the configured host, replacing any running POP3 listener
    pub fn start_pop3(&mut self, port: u16) -> Result<SocketAddr, ServerError> {
        info!("Starting POP3 server on port {port}...");
        let listener = TcpListener::bind((self.config.host, port))?;
        self.start_pop3_with_listener(listener)
    }

    /// Start POP3 on an already bound listener
    pub fn start_pop3_with_listener(
        &mut self,
        listener: TcpListener,
    ) -> Result<SocketAddr, ServerError> {
        self.stop_pop3();
        let store = self.store.clone();
        let handle = listener::spawn(
            listener,
            move || Pop3Session::new(store.clone()),
            self.context(),
        )?;
        let addr = handle.local_addr();
        self.pop3 = Some(handle);
        Ok(addr)
    }

    pub fn stop_pop3(&mut self) {
        if let Some(mut handle) = self.pop3.take() {
            handle.stop();
        }
    }

    pub fn is_pop3_started(&self) -> bool {
        self.pop3.as_ref().is_some_and(ListenerHandle::is_running)
    }

    pub fn pop3_addr(&self) -> Option<SocketAddr> {
        self.pop3.as_ref().map(ListenerHandle::local_addr)
    }

    /// Stop all listeners and close their open connections
    pub fn shutdown(&mut self) {
        self.stop_smtp();
        self.stop_pop3();
    }

    fn context(&self) -> ConnectionContext {
        ConnectionContext {
            observer: self.observer.clone(),
            idle_timeout: self.config.idle_timeout,
            max_line_length: self.config.max_line_length,
            connections: Arc::default(),
        }
    }
}

impl Drop for MailServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
