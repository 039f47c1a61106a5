//! IMAP mailbox access over TLS.
//!
//! Hand-rolled tagged IMAP commands over rustls. `list_unread` only reads
//! (BODY.PEEK leaves the \Seen flag untouched); `mark_read` is the single
//! operation that mutates mailbox state, so the classification step can run
//! between the two without the mailbox changing underneath it.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use mail_parser::MessageParser;
use secrecy::ExposeSecret;

use crate::config::Config;
use crate::error::{ProtocolError, SessionError};

/// One unread message, materialized at listing time.
#[derive(Debug, Clone)]
pub struct MailMessage {
    /// Server-assigned identifier, valid for the lifetime of the session.
    pub uid: String,
    /// Bare sender address.
    pub sender: String,
    pub subject: String,
    /// Decoded body text. Empty when no part could be decoded.
    pub body: String,
    /// Message-ID header, when present. Used for the In-Reply-To header.
    pub message_id: Option<String>,
}

/// Mailbox operations the check cycle needs.
pub trait Mailbox {
    /// List the messages currently flagged unread. Read-only; a message
    /// delivered after this call returns is not included.
    fn list_unread(&mut self) -> Result<Vec<MailMessage>, ProtocolError>;

    /// Flag the given message as read.
    fn mark_read(&mut self, uid: &str) -> Result<(), ProtocolError>;
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// An authenticated IMAP session with INBOX selected.
///
/// LOGOUT is sent on `logout()` and, as a fallback, on drop.
pub struct ImapSession {
    stream: TlsStream,
    tag: u32,
    logged_out: bool,
}

impl ImapSession {
    /// Connect, authenticate, and select INBOX.
    pub fn connect(config: &Config) -> Result<Self, SessionError> {
        let host = &config.imap_host;
        let connection_err = |reason: String| SessionError::Connection {
            host: host.clone(),
            reason,
        };

        let tcp = TcpStream::connect((host.as_str(), config.imap_port))
            .map_err(|e| connection_err(format!("TCP connect failed: {e}")))?;
        tcp.set_read_timeout(Some(Duration::from_secs(30)))
            .map_err(|e| connection_err(format!("failed to set read timeout: {e}")))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name: rustls::pki_types::ServerName<'_> =
            rustls::pki_types::ServerName::try_from(host.clone())
                .map_err(|e| connection_err(format!("invalid server name: {e}")))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| connection_err(format!("TLS setup failed: {e}")))?;
        let stream = rustls::StreamOwned::new(conn, tcp);

        let mut session = Self {
            stream,
            tag: 0,
            logged_out: false,
        };

        session
            .read_line()
            .map_err(|e| connection_err(format!("no server greeting: {e}")))?;

        let login = format!(
            "LOGIN \"{}\" \"{}\"",
            config.address,
            config.password.expose_secret()
        );
        let resp = session
            .command(&login)
            .map_err(|e| connection_err(format!("LOGIN exchange failed: {e}")))?;
        if !tagged_ok(&resp) {
            return Err(SessionError::Authentication {
                host: host.clone(),
                reason: last_line(&resp),
            });
        }

        let resp = session
            .command("SELECT \"INBOX\"")
            .map_err(|e| connection_err(format!("SELECT exchange failed: {e}")))?;
        if !tagged_ok(&resp) {
            return Err(connection_err(format!(
                "SELECT INBOX rejected: {}",
                last_line(&resp)
            )));
        }

        Ok(session)
    }

    /// Send LOGOUT and consume the session.
    pub fn logout(mut self) {
        self.send_logout();
    }

    fn send_logout(&mut self) {
        if self.logged_out {
            return;
        }
        self.logged_out = true;
        let _ = self.command("LOGOUT");
    }

    /// Read one CRLF-terminated line from the server.
    fn read_line(&mut self) -> Result<String, ProtocolError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.stream.read(&mut byte) {
                Ok(0) => return Err(ProtocolError::ConnectionClosed),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(ProtocolError::Io(e)),
            }
        }
    }

    /// Send a tagged command and collect response lines up to the tagged
    /// completion line.
    fn command(&mut self, cmd: &str) -> Result<Vec<String>, ProtocolError> {
        self.tag += 1;
        let tag = format!("A{}", self.tag);
        let full = format!("{tag} {cmd}\r\n");
        self.stream.write_all(full.as_bytes())?;
        self.stream.flush()?;

        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let done = line.starts_with(&tag);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }
}

impl Mailbox for ImapSession {
    fn list_unread(&mut self) -> Result<Vec<MailMessage>, ProtocolError> {
        let resp = self.command("SEARCH UNSEEN")?;
        if !tagged_ok(&resp) {
            return Err(ProtocolError::CommandRejected {
                command: "SEARCH UNSEEN".to_string(),
                response: last_line(&resp),
            });
        }

        let uids = parse_search_response(&resp);
        let mut messages = Vec::with_capacity(uids.len());

        for uid in uids {
            // BODY.PEEK so the fetch itself does not flip \Seen.
            let resp = self.command(&format!("FETCH {uid} (BODY.PEEK[])"))?;
            if !tagged_ok(&resp) {
                // Message likely deleted between SEARCH and FETCH. Leave it
                // for the next cycle rather than failing the listing.
                tracing::warn!(uid = %uid, "Fetch rejected: {}", last_line(&resp));
                continue;
            }

            let raw = fetch_payload(&resp);
            match parse_message(raw.as_bytes(), &uid) {
                Some(message) => messages.push(message),
                None => {
                    tracing::warn!(uid = %uid, "Fetched payload did not parse as a message");
                }
            }
        }

        Ok(messages)
    }

    fn mark_read(&mut self, uid: &str) -> Result<(), ProtocolError> {
        let cmd = format!("STORE {uid} +FLAGS (\\Seen)");
        let resp = self.command(&cmd)?;
        if tagged_ok(&resp) {
            Ok(())
        } else {
            Err(ProtocolError::CommandRejected {
                command: cmd,
                response: last_line(&resp),
            })
        }
    }
}

impl Drop for ImapSession {
    fn drop(&mut self) {
        self.send_logout();
    }
}

// ── Response parsing helpers ────────────────────────────────────────

/// True when the tagged completion line reports OK.
fn tagged_ok(lines: &[String]) -> bool {
    lines.last().is_some_and(|l| l.contains("OK"))
}

fn last_line(lines: &[String]) -> String {
    lines.last().map(|l| l.trim().to_string()).unwrap_or_default()
}

/// Pull message identifiers out of `* SEARCH n n n` response lines.
fn parse_search_response(lines: &[String]) -> Vec<String> {
    let mut uids = Vec::new();
    for line in lines {
        if line.starts_with("* SEARCH") {
            uids.extend(line.split_whitespace().skip(2).map(str::to_string));
        }
    }
    uids
}

/// Join the message payload out of a FETCH response, dropping the untagged
/// FETCH line and the tagged completion line.
fn fetch_payload(lines: &[String]) -> String {
    lines
        .iter()
        .skip(1)
        .take(lines.len().saturating_sub(2))
        .cloned()
        .collect()
}

/// Parse raw RFC822 bytes into a `MailMessage`.
///
/// Returns `None` only when the payload does not parse as a message at all.
/// A body that fails to decode yields an empty string; classification then
/// runs against the subject alone.
fn parse_message(raw: &[u8], uid: &str) -> Option<MailMessage> {
    let parsed = MessageParser::default().parse(raw)?;

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let subject = parsed.subject().unwrap_or_default().to_string();
    let message_id = parsed.message_id().map(|s| s.to_string());
    let body = extract_body(&parsed);

    Some(MailMessage {
        uid: uid.to_string(),
        sender,
        subject,
        body,
        message_id,
    })
}

/// Decoded body text: the plain-text part when present, stripped HTML as a
/// fallback, empty when neither decodes. Attachments are ignored.
fn extract_body(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

/// Strip HTML tags from content (basic), normalizing whitespace.
fn strip_html(html: &str) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Tests ───────────────────────────────────────────────────────────
