//! Per-session state, tunables, and the bounded send queue.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use cmdchat_crypto::SessionCipher;
use cmdchat_wire::Envelope;
use tokio::sync::Notify;

use crate::rate::RateLimiter;
use crate::transfer::{TransferTable, MAX_FILE_SIZE};

/// Tunables for session behavior. Tests shrink the intervals; production
/// uses the defaults.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Deadline for the first handshake frame
    pub handshake_timeout: Duration,
    /// Interval between ping probes
    pub heartbeat_interval: Duration,
    /// Staleness bound on the last pong
    pub heartbeat_timeout: Duration,
    /// Grace period for in-flight writes at termination
    pub drain_deadline: Duration,
    /// Rate limiter window
    pub rate_window: Duration,
    /// Rate limiter capacity per window
    pub rate_max: usize,
    /// Largest accepted file announcement
    pub max_file_size: u64,
    /// Outbound queue bound per session
    pub send_queue_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(45),
            drain_deadline: Duration::from_secs(2),
            rate_window: Duration::from_secs(5),
            rate_max: 12,
            max_file_size: MAX_FILE_SIZE,
            send_queue_depth: 256,
        }
    }
}

/// State owned by one session's task.
///
/// Only the session's own task mutates this; other sessions interact solely
/// through the [`SendQueue`] registered for this client id.
pub struct Session {
    /// Server-assigned id, unique for process lifetime
    pub client_id: u64,
    /// Sanitized display name, mutable via `cmd-nick`
    pub name: String,
    /// Current room, mutable via `cmd-join`
    pub room: String,
    /// Session cipher; the key is zeroized when the session drops
    pub cipher: SessionCipher,
    /// Instant of the last pong (or handshake)
    pub last_pong: Instant,
    /// Send-side rate limiter
    pub rate: RateLimiter,
    /// Inbound transfers in flight
    pub transfers: TransferTable,
}

impl Session {
    /// Assemble session state at handshake completion.
    pub fn new(client_id: u64, name: String, room: String, cipher: SessionCipher, config: &SessionConfig) -> Self {
        Self {
            client_id,
            name,
            room,
            cipher,
            last_pong: Instant::now(),
            rate: RateLimiter::new(config.rate_window, config.rate_max),
            transfers: TransferTable::new(config.max_file_size),
        }
    }
}

struct QueueInner {
    items: VecDeque<Envelope>,
    backpressure_pending: bool,
    closed: bool,
    overflowed: bool,
}

/// Bounded outbound queue for one session.
///
/// Overflow policy: the oldest non-system envelope is evicted to admit the
/// newcomer and one `system{"backpressure"}` notice is emitted before the
/// next drained envelope. If nothing can be evicted the queue closes and the
/// owning session is terminated.
pub struct SendQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    depth: usize,
}

impl SendQueue {
    /// Create a queue bounded at `depth` envelopes.
    pub fn new(depth: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(depth.min(64)),
                backpressure_pending: false,
                closed: false,
                overflowed: false,
            }),
            notify: Notify::new(),
            depth,
        }
    }

    /// Non-blocking enqueue. Pushes to a closed queue are silently dropped
    /// (the target session is already on its way out).
    pub fn push(&self, envelope: Envelope) {
        let mut inner = self.inner.lock().expect("send queue poisoned");
        if inner.closed {
            return;
        }

        if inner.items.len() >= self.depth {
            let evictable = inner.items.iter().position(|e| !e.is_system());
            match evictable {
                Some(pos) => {
                    inner.items.remove(pos);
                    inner.backpressure_pending = true;
                }
                None => {
                    inner.closed = true;
                    inner.overflowed = true;
                    inner.items.clear();
                    drop(inner);
                    self.notify.notify_one();
                    return;
                }
            }
        }

        inner.items.push_back(envelope);
        drop(inner);
        self.notify.notify_one();
    }

    /// Await the next envelope. Returns `None` once the queue is closed and
    /// drained; the caller should then terminate the session (checking
    /// [`SendQueue::overflowed`] for the reason).
    pub async fn pop(&self) -> Option<Envelope> {
        loop {
            {
                let mut inner = self.inner.lock().expect("send queue poisoned");
                if inner.backpressure_pending {
                    inner.backpressure_pending = false;
                    return Some(Envelope::System {
                        text: "backpressure".to_string(),
                        room: None,
                        ts: None,
                    });
                }
                if let Some(envelope) = inner.items.pop_front() {
                    return Some(envelope);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Stop accepting envelopes; pending ones can still be drained by `pop`.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("send queue poisoned");
        inner.closed = true;
        drop(inner);
        self.notify.notify_one();
    }

    /// Whether the queue closed because overflow could not be absorbed.
    pub fn overflowed(&self) -> bool {
        self.inner.lock().expect("send queue poisoned").overflowed
    }

    /// Envelopes currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("send queue poisoned").items.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
