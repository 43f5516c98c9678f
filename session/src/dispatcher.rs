//! Per-session dispatch: handshake, operational loop, termination.
//!
//! `run_session` owns one accepted stream from first byte to teardown. A
//! single `select!` loop multiplexes inbound frames, the session's send
//! queue, heartbeat ticks, and the server shutdown signal; being the only
//! writer gives the session a total outbound order for free.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use cmdchat_crypto::{PublicKey, SessionCipher};
use cmdchat_wire::{
    recv_frame, sanitize_name, sanitize_room, sanitize_text, write_frame, Envelope, ErrorCode,
    WireError,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::heartbeat::{build_ping, build_pong};
use crate::session::{SendQueue, Session, SessionConfig};
use crate::state::ServerState;

enum Flow {
    Continue,
    Quit,
}

/// Drive one client connection from handshake to teardown.
///
/// Session-scoped errors are logged here with sanitized context and consumed;
/// the returned error is informational for the caller.
pub async fn run_session<S>(
    state: Arc<ServerState>,
    stream: S,
    peer: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let config = state.config.clone();
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buf = BytesMut::with_capacity(8 * 1024);

    let handshake_result = timeout(
        config.handshake_timeout,
        handshake(&state, &mut reader, &mut writer, &mut buf, peer),
    )
    .await;

    let (mut session, queue) = match handshake_result {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            warn!(%peer, error = %e, "handshake failed");
            return Err(e);
        }
        Err(_) => {
            warn!(%peer, "handshake deadline expired");
            return Err(SessionError::Timeout);
        }
    };

    let mut ping_timer = interval(config.heartbeat_interval);
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // An interval fires immediately once; swallow that tick so the first
    // ping lands a full interval after the handshake.
    ping_timer.tick().await;

    let result: Result<(), SessionError> = loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break Ok(()),

            _ = ping_timer.tick() => {
                if let Err(e) = send_sealed(&mut writer, &session.cipher, &build_ping()).await {
                    break Err(e);
                }
            }

            // Watchdog: fires the moment the last pong is a full timeout old
            _ = tokio::time::sleep_until((session.last_pong + config.heartbeat_timeout).into()) => {
                break Err(SessionError::Timeout);
            }

            outbound = queue.pop() => match outbound {
                Some(envelope) => {
                    if let Err(e) = send_sealed(&mut writer, &session.cipher, &envelope).await {
                        break Err(e);
                    }
                }
                None => break Err(SessionError::Backpressure),
            },

            inbound = recv_frame(&mut reader, &mut buf) => match inbound {
                Ok(Some(frame)) => {
                    match handle_frame(&state, &mut session, &mut writer, &frame).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Quit) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
                // Clean close is only legal between frames
                Ok(None) => break Ok(()),
                Err(e) => break Err(e.into()),
            },
        }
    };

    match &result {
        Ok(()) => info!(client_id = session.client_id, %peer, "session ended"),
        Err(e) if e.is_benign() => debug!(client_id = session.client_id, %peer, "session dropped"),
        Err(e) => warn!(client_id = session.client_id, %peer, error = %e, "session terminated"),
    }

    teardown(&state, &session, &queue, &mut writer, &config).await;
    result
}

/// Server half of the handshake: hello in, session-init out.
async fn handshake<S>(
    state: &ServerState,
    reader: &mut ReadHalf<S>,
    writer: &mut WriteHalf<S>,
    buf: &mut BytesMut,
    peer: SocketAddr,
) -> Result<(Session, Arc<SendQueue>), SessionError>
where
    S: AsyncRead + AsyncWrite,
{
    let frame = recv_frame(reader, buf)
        .await?
        .ok_or(SessionError::Closed)?;
    let envelope = Envelope::decode(&frame)?;

    let (public_key, name, room, token) = match envelope {
        Envelope::Hello {
            public_key,
            name,
            room,
            token,
        } => (public_key, name, room, token),
        _ => return Err(SessionError::Protocol("expected hello")),
    };

    if !state.token_ok(token.as_deref()) {
        warn!(
            %peer,
            token = %cmdchat_wire::mask_token(token.as_deref().unwrap_or("")),
            "rejecting unauthorized connection"
        );
        send_plain(
            writer,
            &Envelope::Error {
                code: ErrorCode::Auth,
                detail: Some("unauthorized".to_string()),
            },
        )
        .await?;
        return Err(SessionError::Auth);
    }

    let name = sanitize_name(&name);
    let room = sanitize_room(&room);

    let peer_key = match PublicKey::from_pem(&public_key) {
        Ok(key) => key,
        Err(e) => {
            send_plain(
                writer,
                &Envelope::Error {
                    code: ErrorCode::Handshake,
                    detail: Some("unusable public key".to_string()),
                },
            )
            .await?;
            return Err(e.into());
        }
    };

    let cipher = SessionCipher::generate();
    let wrapped_key = peer_key.wrap_key(cipher.key_bytes())?;
    let client_id = state.registry.next_client_id();

    send_plain(
        writer,
        &Envelope::SessionInit {
            wrapped_key,
            client_id,
            server_time: state.now_ms(),
        },
    )
    .await?;

    let queue = Arc::new(SendQueue::new(state.config.send_queue_depth));
    state.registry.insert(client_id, &room, queue.clone());
    state.broadcast_system(&room, Some(client_id), format!("{name} joined the room"));

    info!(
        client_id,
        %peer,
        name = %name,
        room = %room,
        total = state.registry.len(),
        "client connected"
    );

    Ok((
        Session::new(client_id, name, room, cipher, &state.config),
        queue,
    ))
}

/// Decrypt, decode, and dispatch one operational frame.
async fn handle_frame<W>(
    state: &ServerState,
    session: &mut Session,
    writer: &mut W,
    frame: &[u8],
) -> Result<Flow, SessionError>
where
    W: AsyncWrite + Unpin,
{
    let plaintext = session.cipher.open(frame)?;
    let envelope = match Envelope::decode(&plaintext) {
        Ok(envelope) => envelope,
        Err(WireError::UnknownType(tag)) => {
            debug!(client_id = session.client_id, tag = %tag, "ignoring unknown envelope type");
            return Ok(Flow::Continue);
        }
        Err(e) => return Err(e.into()),
    };

    match envelope {
        Envelope::Chat { text, .. } => {
            if !session.rate.accept(Instant::now()) {
                send_sealed(writer, &session.cipher, &rate_error()).await?;
                return Ok(Flow::Continue);
            }
            let text = sanitize_text(&text);
            state.broadcast_chat(&session.room, &session.name, session.client_id, text);
        }

        Envelope::CmdNick { name } => {
            let new_name = sanitize_name(&name);
            if new_name != session.name {
                let old_name = std::mem::replace(&mut session.name, new_name.clone());
                state.broadcast_system(
                    &session.room,
                    None,
                    format!("{old_name} is now known as {new_name}"),
                );
            }
        }

        Envelope::CmdJoin { room } => {
            let new_room = sanitize_room(&room);
            if new_room == session.room {
                return Ok(Flow::Continue);
            }
            state.broadcast_system(
                &session.room,
                Some(session.client_id),
                format!("{} left the room", session.name),
            );
            if state
                .registry
                .rename_room(session.client_id, &new_room)
                .is_some()
            {
                session.room = new_room.clone();
            }
            state.broadcast_system(
                &new_room,
                Some(session.client_id),
                format!("{} joined the room", session.name),
            );
            send_sealed(
                writer,
                &session.cipher,
                &Envelope::System {
                    text: format!("joined room {new_room}"),
                    room: Some(new_room),
                    ts: Some(state.now_ms()),
                },
            )
            .await?;
        }

        Envelope::CmdQuit => return Ok(Flow::Quit),

        Envelope::FileStart {
            transfer_id,
            filename,
            size,
            total_chunks,
            ..
        } => {
            session
                .transfers
                .start(&transfer_id, &filename, size, total_chunks)?;
            state.broadcast(
                &session.room,
                Some(session.client_id),
                Envelope::FileStart {
                    transfer_id,
                    sender: Some(session.name.clone()),
                    filename,
                    size,
                    total_chunks,
                },
            );
        }

        Envelope::FileChunk {
            transfer_id,
            index,
            data,
            ..
        } => {
            if !session.rate.accept(Instant::now()) {
                send_sealed(writer, &session.cipher, &rate_error()).await?;
                return Ok(Flow::Continue);
            }
            let completed = session.transfers.chunk(&transfer_id, index, data.len())?;
            state.broadcast(
                &session.room,
                Some(session.client_id),
                Envelope::FileChunk {
                    transfer_id: transfer_id.clone(),
                    sender: Some(session.name.clone()),
                    index,
                    data,
                },
            );
            if let Some(done) = completed {
                state.broadcast(
                    &session.room,
                    Some(session.client_id),
                    Envelope::FileEnd {
                        transfer_id,
                        sender: Some(session.name.clone()),
                        filename: done.filename,
                    },
                );
            }
        }

        Envelope::Pong { .. } => session.last_pong = Instant::now(),

        Envelope::Ping { nonce } => {
            send_sealed(writer, &session.cipher, &build_pong(nonce)).await?;
        }

        Envelope::Hello { .. } | Envelope::SessionInit { .. } => {
            return Err(SessionError::Protocol("handshake envelope after session-init"));
        }

        Envelope::System { .. } | Envelope::FileEnd { .. } | Envelope::Error { .. } => {
            return Err(SessionError::Protocol("server-originated envelope from client"));
        }
    }

    Ok(Flow::Continue)
}

/// Remove the session everywhere, announce the departure, and give queued
/// writes a bounded drain before the stream closes.
async fn teardown<W>(
    state: &ServerState,
    session: &Session,
    queue: &SendQueue,
    writer: &mut W,
    config: &SessionConfig,
) where
    W: AsyncWrite + Unpin,
{
    queue.close();

    if let Some(room) = state.registry.remove(session.client_id) {
        state.broadcast_system(&room, None, format!("{} left the chat", session.name));
    }

    let drain = async {
        while let Some(envelope) = queue.pop().await {
            if send_sealed(writer, &session.cipher, &envelope).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    };
    let _ = timeout(config.drain_deadline, drain).await;
}

async fn send_sealed<W>(
    writer: &mut W,
    cipher: &SessionCipher,
    envelope: &Envelope,
) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let sealed = cipher.seal(&envelope.encode())?;
    write_frame(writer, &sealed).await?;
    Ok(())
}

async fn send_plain<W>(writer: &mut W, envelope: &Envelope) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &envelope.encode()).await?;
    Ok(())
}

fn rate_error() -> Envelope {
    Envelope::Error {
        code: ErrorCode::Rate,
        detail: Some("message rate limit reached".to_string()),
    }
}
