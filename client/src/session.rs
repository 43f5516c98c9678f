//! One connected session: handshake, interactive loop, teardown.
//!
//! `run_once` drives a single connection. The caller owns the reconnect
//! policy; anything returned as an error except [`ClientError::Auth`] is
//! retryable.

use std::collections::VecDeque;
use std::io::Write as _;
use std::time::Duration;

use bytes::BytesMut;
use cmdchat_crypto::{CryptoError, KeyPair, SessionCipher};
use cmdchat_wire::{
    recv_frame, sanitize_name, sanitize_room, write_frame, Envelope, ErrorCode, WireError,
};
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

use crate::commands::{self, Command, HELP_TEXT};
use crate::files::{IncomingTransfers, OutgoingFile};
use crate::history::{History, HistoryRecord};
use crate::net::{self, TlsSettings};
use crate::render::Renderer;

const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(10);

/// Client configuration assembled from the CLI
pub struct ClientConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Auth token, if the server demands one
    pub token: Option<String>,
    /// Rendered-line backlog kept in memory
    pub buffer_size: usize,
    /// TLS settings
    pub tls: TlsSettings,
    /// Suppress per-retry status output
    pub quiet_reconnect: bool,
}

/// Mutable identity that survives reconnects (`/nick` and `/join` update it)
pub struct Identity {
    /// Current display name
    pub name: String,
    /// Current room
    pub room: String,
}

/// How a session ended
pub enum SessionEnd {
    /// User asked to quit; do not reconnect
    Quit,
    /// Server closed cleanly; reconnect applies
    Disconnected,
}

/// Session-fatal client errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// The server rejected the token; retrying cannot help
    #[error("server rejected the auth token")]
    Auth,

    /// The server refused the handshake for another reason
    #[error("handshake rejected: {0}")]
    Rejected(String),

    /// Connection establishment failed
    #[error("{0}")]
    Connect(anyhow::Error),

    /// No handshake reply in time
    #[error("handshake timed out")]
    Timeout,

    /// Server closed the stream
    #[error("connection closed by server")]
    Closed,

    /// Frame or envelope failure
    #[error("protocol: {0}")]
    Wire(#[from] WireError),

    /// Cryptographic failure
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),
}

/// Connect, handshake, and run the interactive loop until the session ends.
pub async fn run_once(
    config: &ClientConfig,
    identity: &mut Identity,
    renderer: &dyn Renderer,
    mut history: Option<&mut History>,
    lines: &mut mpsc::Receiver<String>,
) -> Result<SessionEnd, ClientError> {
    let stream = net::connect(&config.host, config.port, &config.tls)
        .await
        .map_err(ClientError::Connect)?;
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buf = BytesMut::with_capacity(8 * 1024);

    // Fresh keypair per attempt; the wrapped session key comes back in
    // session-init.
    let keys = KeyPair::generate()?;
    let hello = Envelope::Hello {
        public_key: keys.public_key_pem().to_string(),
        name: identity.name.clone(),
        room: identity.room.clone(),
        token: config.token.clone(),
    };
    write_frame(&mut writer, &hello.encode()).await?;

    let frame = timeout(HANDSHAKE_DEADLINE, recv_frame(&mut reader, &mut buf))
        .await
        .map_err(|_| ClientError::Timeout)??
        .ok_or(ClientError::Closed)?;

    let (cipher, client_id) = match Envelope::decode(&frame)? {
        Envelope::SessionInit {
            wrapped_key,
            client_id,
            ..
        } => (SessionCipher::new(keys.unwrap_key(&wrapped_key)?), client_id),
        Envelope::Error {
            code: ErrorCode::Auth,
            ..
        } => return Err(ClientError::Auth),
        Envelope::Error { code, detail } => {
            return Err(ClientError::Rejected(format!(
                "{}: {}",
                code.as_str(),
                detail.unwrap_or_default()
            )))
        }
        _ => return Err(ClientError::Rejected("unexpected handshake reply".to_string())),
    };

    println!(
        "connected to {}:{} as {} in room {} (client id {client_id})",
        config.host, config.port, identity.name, identity.room
    );
    println!("type a message to chat; /help lists commands");

    let mut transfers = IncomingTransfers::new(dirs::download_dir());
    let mut outgoing: Option<OutgoingFile> = None;
    let mut backlog: VecDeque<String> = VecDeque::with_capacity(config.buffer_size);

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    // stdin closed
                    let _ = send_sealed(&mut writer, &cipher, &Envelope::CmdQuit).await;
                    return Ok(SessionEnd::Quit);
                };
                match commands::parse(&line) {
                    Command::Empty => {}
                    Command::Chat(text) => {
                        send_sealed(&mut writer, &cipher, &Envelope::Chat {
                            sender: None,
                            room: None,
                            text,
                            ts: None,
                            seq: None,
                        }).await?;
                    }
                    Command::Nick(name) => {
                        let name = sanitize_name(&name);
                        send_sealed(&mut writer, &cipher, &Envelope::CmdNick { name: name.clone() }).await?;
                        identity.name = name;
                    }
                    Command::Join(room) => {
                        let room = sanitize_room(&room);
                        send_sealed(&mut writer, &cipher, &Envelope::CmdJoin { room: room.clone() }).await?;
                        identity.room = room;
                    }
                    Command::SendFile(path) => {
                        if outgoing.is_some() {
                            println!("[file] a transfer is already in progress");
                        } else {
                            match OutgoingFile::load(&path, &identity.name).await {
                                Ok(out) => {
                                    send_sealed(&mut writer, &cipher, &out.start_envelope()).await?;
                                    println!(
                                        "[file] sending {} ({} chunks)",
                                        out.filename(),
                                        out.total_chunks()
                                    );
                                    outgoing = Some(out);
                                }
                                Err(msg) => println!("[error] {msg}"),
                            }
                        }
                    }
                    Command::Clear => {
                        backlog.clear();
                        print!("\x1b[2J\x1b[H");
                        let _ = std::io::stdout().flush();
                    }
                    Command::Help => println!("{HELP_TEXT}"),
                    Command::Quit => {
                        let _ = send_sealed(&mut writer, &cipher, &Envelope::CmdQuit).await;
                        return Ok(SessionEnd::Quit);
                    }
                    Command::Unknown(command) => {
                        println!("unknown command: {command} (/help lists commands)");
                    }
                    Command::Usage(usage) => println!("{usage}"),
                }
            }

            // Paced drip of the outgoing transfer, if one is active
            _ = async {
                match &outgoing {
                    Some(out) => tokio::time::sleep_until(out.next_at).await,
                    None => std::future::pending().await,
                }
            } => {
                if let Some(out) = outgoing.as_mut() {
                    if let Some(chunk) = out.next_chunk() {
                        send_sealed(&mut writer, &cipher, &chunk).await?;
                        if let Some(progress) = out.progress() {
                            println!("{progress}");
                        }
                    }
                    if out.is_done() {
                        println!("[file] transfer complete: {}", out.filename());
                        outgoing = None;
                    }
                }
            }

            inbound = recv_frame(&mut reader, &mut buf) => {
                let frame = match inbound {
                    Ok(Some(frame)) => frame,
                    Ok(None) => return Ok(SessionEnd::Disconnected),
                    Err(e) => return Err(e.into()),
                };
                let plaintext = cipher.open(&frame)?;
                let envelope = match Envelope::decode(&plaintext) {
                    Ok(envelope) => envelope,
                    Err(WireError::UnknownType(tag)) => {
                        debug!(tag = %tag, "ignoring unknown envelope type");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };

                match envelope {
                    Envelope::Ping { nonce } => {
                        send_sealed(&mut writer, &cipher, &Envelope::Pong { nonce }).await?;
                    }
                    Envelope::Pong { .. } => {}
                    Envelope::FileStart {
                        ref transfer_id,
                        ref filename,
                        size,
                        total_chunks,
                        ..
                    } => {
                        transfers.start(transfer_id, filename, size, total_chunks);
                        show(renderer, &mut backlog, config.buffer_size, &envelope);
                    }
                    Envelope::FileChunk {
                        ref transfer_id,
                        index,
                        ref data,
                        ..
                    } => {
                        if let Some(note) = transfers.chunk(transfer_id, index, data) {
                            println!("{note}");
                        }
                    }
                    Envelope::FileEnd { ref transfer_id, .. } => {
                        show(renderer, &mut backlog, config.buffer_size, &envelope);
                        if let Some(note) = transfers.finish(transfer_id).await {
                            println!("{note}");
                        }
                    }
                    envelope => {
                        if let Some(h) = history.as_deref_mut() {
                            if let Some(record) = to_history_record(&envelope) {
                                if let Err(e) = h.append(&record) {
                                    debug!(error = %e, "history append failed");
                                }
                            }
                        }
                        show(renderer, &mut backlog, config.buffer_size, &envelope);
                    }
                }
            }
        }
    }
}

fn show(renderer: &dyn Renderer, backlog: &mut VecDeque<String>, cap: usize, envelope: &Envelope) {
    if let Some(line) = renderer.render(envelope) {
        if backlog.len() == cap {
            backlog.pop_front();
        }
        backlog.push_back(line.clone());
        println!("{line}");
    }
}

fn to_history_record(envelope: &Envelope) -> Option<HistoryRecord> {
    match envelope {
        Envelope::Chat {
            sender,
            room,
            text,
            ts,
            ..
        } => Some(HistoryRecord {
            ts: ts.unwrap_or_default(),
            room: room.clone().unwrap_or_default(),
            sender: sender.clone().unwrap_or_else(|| "?".to_string()),
            text: text.clone(),
        }),
        Envelope::System { text, room, ts } => Some(HistoryRecord {
            ts: ts.unwrap_or_default(),
            room: room.clone().unwrap_or_default(),
            sender: "system".to_string(),
            text: text.clone(),
        }),
        _ => None,
    }
}

async fn send_sealed<W>(
    writer: &mut W,
    cipher: &SessionCipher,
    envelope: &Envelope,
) -> Result<(), ClientError>
where
    W: AsyncWrite + Unpin,
{
    let sealed = cipher.seal(&envelope.encode())?;
    write_frame(writer, &sealed).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_record_extraction() {
        let chat = Envelope::Chat {
            sender: Some("alice".to_string()),
            room: Some("lobby".to_string()),
            text: "hi".to_string(),
            ts: Some(5),
            seq: Some(0),
        };
        let record = to_history_record(&chat).unwrap();
        assert_eq!(record.sender, "alice");
        assert_eq!(record.room, "lobby");
        assert_eq!(record.text, "hi");
        assert_eq!(record.ts, 5);

        let system = Envelope::System {
            text: "bob joined the room".to_string(),
            room: Some("lobby".to_string()),
            ts: Some(6),
        };
        assert_eq!(to_history_record(&system).unwrap().sender, "system");

        assert!(to_history_record(&Envelope::Ping { nonce: 1 }).is_none());
    }
}
