//! Heartbeat probes.
//!
//! The session task pings on a fixed interval and records the instant of
//! every pong; its watchdog reaps the session once the last pong is a full
//! timeout old.

use cmdchat_wire::Envelope;
use rand::Rng;

/// Build a ping probe with a fresh random nonce.
pub fn build_ping() -> Envelope {
    Envelope::Ping {
        nonce: rand::thread_rng().gen(),
    }
}

/// Build the reply to a received ping.
pub fn build_pong(nonce: u64) -> Envelope {
    Envelope::Pong { nonce }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_nonces_vary() {
        let nonces: Vec<u64> = (0..8)
            .map(|_| match build_ping() {
                Envelope::Ping { nonce } => nonce,
                _ => unreachable!(),
            })
            .collect();
        let first = nonces[0];
        assert!(nonces.iter().any(|n| *n != first) || nonces.len() == 1);
    }

    #[test]
    fn test_pong_echoes_nonce() {
        assert_eq!(build_pong(42), Envelope::Pong { nonce: 42 });
    }

}
