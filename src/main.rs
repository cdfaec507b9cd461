use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing::info;
use tracing_subscriber::EnvFilter;

use test_mail_server::config::default_mail_dir;
use test_mail_server::{MailServer, ServerConfig, TracingObserver};

/// SMTP and POP3 test server storing mail in a local directory
#[derive(Parser, Debug)]
#[command(name = "test-mail-server", author, version, about, long_about = None)]
struct Args {
    /// SMTP port to listen to, 0 leaves SMTP disabled
    #[arg(short, long, env = "TEST_MAIL_SERVER_SMTP_PORT")]
    smtp_port: Option<u16>,

    /// Redirect all incoming messages to sender
    #[arg(long, visible_alias = "sr", env = "TEST_MAIL_SERVER_SMTP_REDIRECT")]
    smtp_redirect: bool,

    /// POP3 port to listen to, 0 leaves POP3 disabled
    #[arg(short, long, env = "TEST_MAIL_SERVER_POP3_PORT")]
    pop3_port: Option<u16>,

    /// Directory to store mailboxes [default: ./.test-mail-server]
    #[arg(short, long, env = "TEST_MAIL_SERVER_MAIL_DIR")]
    mail_dir: Option<PathBuf>,

    /// Address to bind the listeners to
    #[arg(long, default_value = "0.0.0.0", env = "TEST_MAIL_SERVER_HOST")]
    host: IpAddr,

    /// Seconds of client inactivity before a connection is closed
    #[arg(long, default_value_t = 60, env = "TEST_MAIL_SERVER_IDLE_TIMEOUT")]
    idle_timeout: u64,

    /// Log every protocol line
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "test_mail_server=debug"
    } else {
        "test_mail_server=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Port 0 means the service is not started
fn enabled_port(port: Option<u16>) -> Option<u16> {
    port.filter(|port| *port > 0)
}

/// Block until SIGINT (Ctrl-C) or, on Unix, SIGTERM arrives
fn wait_for_shutdown_signal() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Could not create signal runtime")?;

    runtime.block_on(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut terminate = signal(SignalKind::terminate())?;
            tokio::select! {
                result = tokio::signal::ctrl_c() => result?,
                _ = terminate.recv() => {}
            }
        }
        #[cfg(not(unix))]
        tokio::signal::ctrl_c().await?;

        Ok::<(), std::io::Error>(())
    })
    .context("Could not install signal handler")
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let smtp_port = enabled_port(args.smtp_port);
    let pop3_port = enabled_port(args.pop3_port);
    if smtp_port.is_none() && pop3_port.is_none() {
        Args::command().print_help()?;
        return Ok(ExitCode::FAILURE);
    }

    let mut config = ServerConfig::default()
        .with_host(args.host)
        .with_mail_dir(args.mail_dir.unwrap_or_else(default_mail_dir))
        .with_redirect_to_sender(args.smtp_redirect)
        .with_idle_timeout(Duration::from_secs(args.idle_timeout));
    config.smtp_port = smtp_port;
    config.pop3_port = pop3_port;

    let mut server = MailServer::new(config, Arc::new(TracingObserver)).with_context(|| {
        "Could not create mail server (check the mail directory and settings)".to_string()
    })?;
    server.start().context("Could not start listeners")?;

    if server.is_redirect_to_sender() {
        info!("All incoming messages are redirected to their sender");
    }

    wait_for_shutdown_signal()?;
    info!("Received shutdown signal, shutting down.");
    server.shutdown();
    Ok(ExitCode::SUCCESS)
}
