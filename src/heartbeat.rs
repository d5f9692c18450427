//! Heartbeat keep-alive state, driven from within the record layer's
//! receive wait computation (no separate thread).

use std::time::{Duration, Instant};

use rand::rngs::OsRng;
use rand::RngCore;

use crate::config::HeartbeatConfig;

/// What to do when the heartbeat deadline fires.
#[derive(Debug)]
pub(crate) enum HeartbeatEvent {
    /// Emit this request payload.
    SendRequest(Vec<u8>),
    /// The in-flight request went unanswered; the peer is gone.
    PeerDead,
}

pub(crate) struct Heartbeat {
    idle: Duration,
    timeout: Duration,
    /// We may emit requests (peer advertised peer_allowed_to_send).
    can_send: bool,
    /// We answer the peer's requests.
    respond: bool,
    in_flight: Option<Vec<u8>>,
    next_action: Instant,
}

impl Heartbeat {
    pub fn new(config: HeartbeatConfig, can_send: bool, respond: bool) -> Self {
        Heartbeat {
            idle: config.idle,
            timeout: config.timeout,
            can_send,
            respond,
            in_flight: None,
            next_action: Instant::now() + config.idle,
        }
    }

    pub fn responds_to_requests(&self) -> bool {
        self.respond
    }

    /// Next instant at which [`Heartbeat::on_deadline`] wants to run.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.can_send.then_some(self.next_action)
    }

    /// Called when the deadline passed: either start a request cycle or
    /// declare the peer dead because the previous one went unanswered.
    pub fn on_deadline(&mut self, now: Instant) -> HeartbeatEvent {
        if self.in_flight.is_some() {
            return HeartbeatEvent::PeerDead;
        }

        let mut payload = vec![0u8; 16];
        OsRng.fill_bytes(&mut payload);
        self.in_flight = Some(payload.clone());
        self.next_action = now + self.timeout;
        HeartbeatEvent::SendRequest(payload)
    }

    /// A heartbeat response arrived; cancels the pending timeout if the
    /// payload matches the in-flight request.
    pub fn on_response(&mut self, payload: &[u8], now: Instant) {
        if self.in_flight.as_deref() == Some(payload) {
            self.in_flight = None;
            self.next_action = now + self.idle;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn config() -> HeartbeatConfig {
        HeartbeatConfig {
            idle: Duration::from_secs(10),
            timeout: Duration::from_secs(2),
            allow_peer_requests: true,
        }
    }

    #[test]
    fn request_then_matching_response() {
        let mut hb = Heartbeat::new(config(), true, true);
        let now = Instant::now();

        let payload = match hb.on_deadline(now) {
            HeartbeatEvent::SendRequest(p) => p,
            other => panic!("expected request, got {:?}", other),
        };

        // Deadline is now the response timeout.
        assert_eq!(hb.next_deadline(), Some(now + Duration::from_secs(2)));

        hb.on_response(&payload, now + Duration::from_millis(100));
        assert_eq!(
            hb.next_deadline(),
            Some(now + Duration::from_millis(100) + Duration::from_secs(10))
        );
    }

    #[test]
    fn unanswered_request_is_fatal() {
        let mut hb = Heartbeat::new(config(), true, true);
        let now = Instant::now();

        let _ = hb.on_deadline(now);
        assert!(matches!(
            hb.on_deadline(now + Duration::from_secs(3)),
            HeartbeatEvent::PeerDead
        ));
    }

    #[test]
    fn mismatched_response_keeps_timeout() {
        let mut hb = Heartbeat::new(config(), true, true);
        let now = Instant::now();

        let _ = hb.on_deadline(now);
        hb.on_response(b"wrong payload bytes", now);
        assert!(matches!(
            hb.on_deadline(now + Duration::from_secs(3)),
            HeartbeatEvent::PeerDead
        ));
    }

    #[test]
    fn passive_side_has_no_deadline() {
        let hb = Heartbeat::new(config(), false, true);
        assert!(hb.next_deadline().is_none());
    }
}
