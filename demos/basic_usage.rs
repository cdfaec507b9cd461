//! Basic usage example for the test mail server
//!
//! Starts SMTP and POP3 on ephemeral ports, sends a message with lettre,
//! and reads it back both from the store and over POP3.

use std::error::Error;
use std::io::{BufRead, BufReader, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::Arc;

use lettre::message::{Mailbox, Message};
use lettre::{SmtpTransport, Transport};
use test_mail_server::{MailServer, ServerConfig, TracingObserver};

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("test_mail_server=info")
        .init();

    println!("Test Mail Server Basic Usage Example");
    println!("====================================");

    let mail_dir = tempfile::tempdir()?;
    let config = ServerConfig::default()
        .with_host(Ipv4Addr::LOCALHOST.into())
        .with_mail_dir(mail_dir.path());
    let mut server = MailServer::new(config, Arc::new(TracingObserver))?;
    let smtp = server.start_smtp(0)?;
    let pop3 = server.start_pop3(0)?;
    println!("SMTP listening on {smtp}, POP3 on {pop3}");

    println!("\nSending test email...");
    let message = Message::builder()
        .from("sender@example.com".parse::<Mailbox>()?)
        .to("recipient@example.com".parse::<Mailbox>()?)
        .subject("Test Email")
        .body("This is a test email from the basic usage example.".to_owned())?;
    let mailer = SmtpTransport::builder_dangerous("127.0.0.1")
        .port(smtp.port())
        .build();
    mailer.send(&message)?;

    println!("\nMailboxes on disk:");
    let store = server.store();
    for mailbox in store.list_mailboxes()? {
        for id in store.list_messages(&mailbox)? {
            let size = store.locate(&mailbox, &id).size().unwrap_or(0);
            println!("  {mailbox}/{id} ({size} bytes)");
        }
    }

    println!("\nReading it back over POP3:");
    for line in fetch_first_message(pop3, "recipient@example.com")? {
        println!("    {line}");
    }

    server.shutdown();
    println!("\nServer stopped");
    Ok(())
}

fn fetch_first_message(addr: SocketAddr, mailbox: &str) -> Result<Vec<String>, Box<dyn Error>> {
    let mut stream = TcpStream::connect(addr)?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();

    let command = |stream: &mut TcpStream, text: &str| -> std::io::Result<()> {
        write!(stream, "{text}\r\n")?;
        stream.flush()
    };

    reader.read_line(&mut line)?;
    command(&mut stream, &format!("USER {mailbox}"))?;
    line.clear();
    reader.read_line(&mut line)?;
    command(&mut stream, "RETR 1")?;
    line.clear();
    reader.read_line(&mut line)?;
    if !line.starts_with("+OK") {
        return Err(format!("RETR failed: {}", line.trim_end()).into());
    }

    let mut lines = Vec::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let text = line.trim_end_matches(['\r', '\n']);
        if text == "." {
            break;
        }
        lines.push(text.strip_prefix('.').unwrap_or(text).to_owned());
    }

    command(&mut stream, "QUIT")?;
    Ok(lines)
}
