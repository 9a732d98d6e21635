//! IMAP mailbox session over rustls.
//!
//! A small synchronous IMAP4rev1 client: tagged commands, untagged response
//! lines, and `{n}` literals for message bodies. All message addressing uses
//! UIDs. Blocking; the poll loop runs it inside `spawn_blocking`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::channels::MailboxSession;
use crate::config::EmailConfig;
use crate::error::SessionError;

/// TLS stream used for real connections.
pub type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest literal the client will accept from the server.
pub const MAX_LITERAL_BYTES: usize = 64 * 1024 * 1024;

/// Untagged lines and literals collected for one command.
#[derive(Debug, Default)]
struct Response {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
}

/// A logged-in IMAP session.
pub struct ImapSession<S = TlsStream> {
    stream: BufReader<S>,
    tag_counter: u32,
}

impl ImapSession<TlsStream> {
    /// Connect over TLS and log in.
    pub fn connect(config: &EmailConfig) -> Result<Self, SessionError> {
        let tcp = TcpStream::connect((config.imap_host.as_str(), config.imap_port)).map_err(
            |e| SessionError::Connect {
                host: config.imap_host.clone(),
                port: config.imap_port,
                reason: e.to_string(),
            },
        )?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = ServerName::try_from(config.imap_host.clone())
            .map_err(|e| SessionError::Tls(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| SessionError::Tls(e.to_string()))?;

        let mut session = Self::from_stream(rustls::StreamOwned::new(conn, tcp))?;
        session.login(&config.username, config.password.expose_secret())?;
        info!(
            host = %config.imap_host,
            port = config.imap_port,
            username = %config.username,
            "IMAP session established"
        );
        Ok(session)
    }
}

impl<S: Read + Write> ImapSession<S> {
    /// Wrap an already-connected stream and consume the server greeting.
    pub fn from_stream(stream: S) -> Result<Self, SessionError> {
        let mut session = Self {
            stream: BufReader::new(stream),
            tag_counter: 0,
        };
        let greeting = session.read_line()?;
        if !(greeting.starts_with("* OK") || greeting.starts_with("* PREAUTH")) {
            return Err(SessionError::Disconnected(format!(
                "unexpected greeting: {}",
                greeting.trim_end()
            )));
        }
        Ok(session)
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<(), SessionError> {
        let cmd = match (quote(username), quote(password)) {
            (Ok(user), Ok(pass)) => format!("LOGIN {user} {pass}"),
            _ => {
                return Err(SessionError::AuthFailed {
                    username: username.escape_debug().to_string(),
                });
            }
        };
        match self.command(&cmd) {
            Ok(_) => Ok(()),
            Err(SessionError::Command { .. }) => Err(SessionError::AuthFailed {
                username: username.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    fn next_tag(&mut self) -> String {
        self.tag_counter += 1;
        format!("A{}", self.tag_counter)
    }

    fn read_line(&mut self) -> Result<String, SessionError> {
        let mut buf = Vec::new();
        if self.stream.read_until(b'\n', &mut buf)? == 0 {
            return Err(SessionError::Disconnected("connection closed by server".into()));
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Read a `{n}` literal. An oversized one leaves the stream unusable.
    fn read_literal(&mut self, len: usize) -> Result<Vec<u8>, SessionError> {
        if len > MAX_LITERAL_BYTES {
            return Err(SessionError::Disconnected(format!(
                "server announced a {len} byte literal, limit is {MAX_LITERAL_BYTES}"
            )));
        }
        let mut buf = Vec::with_capacity(len);
        let read = (&mut self.stream).take(len as u64).read_to_end(&mut buf)?;
        if read < len {
            return Err(SessionError::Disconnected(
                "connection closed inside literal".into(),
            ));
        }
        Ok(buf)
    }

    /// Send one tagged command and collect its response.
    ///
    /// `NO` and `BAD` completions become [`SessionError::Command`].
    fn command(&mut self, cmd: &str) -> Result<Response, SessionError> {
        let tag = self.next_tag();
        let verb = command_verb(cmd);
        debug!(tag = %tag, command = %verb, "IMAP command");

        let writer = self.stream.get_mut();
        writer.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        writer.flush()?;

        let mut response = Response::default();
        loop {
            let line = self.read_line()?;
            if let Some(len) = literal_length(&line) {
                let literal = self.read_literal(len)?;
                response.literals.push(literal);
                response.lines.push(line);
                continue;
            }
            if let Some(rest) = line.strip_prefix(tag.as_str()).and_then(|r| r.strip_prefix(' ')) {
                let rest = rest.trim_end();
                if rest.starts_with("OK") {
                    return Ok(response);
                }
                return Err(SessionError::Command {
                    command: verb,
                    reason: rest.to_string(),
                });
            }
            response.lines.push(line);
        }
    }
}

impl<S: Read + Write + Send> MailboxSession for ImapSession<S> {
    fn select(&mut self, mailbox: &str) -> Result<(), SessionError> {
        self.command(&format!("SELECT {}", quote(mailbox)?))?;
        Ok(())
    }

    fn search(&mut self, criterion: &str) -> Result<Vec<String>, SessionError> {
        let response = self.command(&format!("UID SEARCH {criterion}"))?;
        Ok(parse_search(&response.lines))
    }

    fn fetch(&mut self, id: &str) -> Result<Vec<u8>, SessionError> {
        let uid = checked_uid(id, "FETCH")?;
        let mut response = self.command(&format!("UID FETCH {uid} RFC822"))?;
        if response.literals.is_empty() {
            return Err(SessionError::Command {
                command: "FETCH".into(),
                reason: format!("no message body returned for UID {uid}"),
            });
        }
        Ok(response.literals.swap_remove(0))
    }

    fn move_to(&mut self, id: &str, folder: &str) -> Result<(), SessionError> {
        let uid = checked_uid(id, "COPY")?;
        self.command(&format!("UID COPY {uid} {}", quote(folder)?))?;
        self.command(&format!("UID STORE {uid} +FLAGS.SILENT (\\Deleted)"))?;
        self.command("EXPUNGE")?;
        debug!(uid, folder, "Message moved");
        Ok(())
    }

    fn logout(&mut self) -> Result<(), SessionError> {
        self.command("LOGOUT")?;
        Ok(())
    }
}

/// Quote an IMAP string argument. Control characters cannot appear in a
/// quoted string and are refused.
fn quote(s: &str) -> Result<String, SessionError> {
    if s.chars().any(char::is_control) {
        return Err(SessionError::Command {
            command: "QUOTE".into(),
            reason: "argument contains control characters".into(),
        });
    }
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    Ok(format!("\"{escaped}\""))
}

/// Command name for logs and errors; never includes arguments.
fn command_verb(cmd: &str) -> String {
    let mut words = cmd.split_whitespace();
    match words.next() {
        Some("UID") => format!("UID {}", words.next().unwrap_or_default()),
        Some(verb) => verb.to_string(),
        None => String::new(),
    }
}

fn checked_uid<'a>(id: &'a str, command: &str) -> Result<&'a str, SessionError> {
    if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
        Ok(id)
    } else {
        Err(SessionError::Command {
            command: command.into(),
            reason: format!("invalid message UID {id:?}"),
        })
    }
}

/// Length of a `{n}` literal announced at the end of a response line.
fn literal_length(line: &str) -> Option<usize> {
    let line = line.trim_end_matches(['\r', '\n']);
    let inner = line.strip_suffix('}')?;
    let start = inner.rfind('{')?;
    inner[start + 1..].parse().ok()
}

/// Identifiers from `* SEARCH` lines.
fn parse_search(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| line.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace())
        .filter(|id| id.bytes().all(|b| b.is_ascii_digit()))
        .map(str::to_string)
        .collect()
}
