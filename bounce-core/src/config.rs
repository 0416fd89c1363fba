//! Tunables for rooms, sessions, and the registry.

use std::time::Duration;

/// Knobs shared by the whole engine.
///
/// The derived values ([`read_deadline`](Config::read_deadline),
/// [`keep_window`](Config::keep_window), [`clean_cadence`](Config::clean_cadence))
/// follow the base knobs so tests that shrink the grace window get
/// proportionally faster retention and cleaning too.
#[derive(Debug, Clone)]
pub struct Config {
    /// How often a session pings its peer.
    pub ping_interval: Duration,
    /// Per-write upper bound on the transport.
    pub write_deadline: Duration,
    /// How long a disconnected session may be replaced before it becomes
    /// a leaver.
    pub reconnection_grace: Duration,
    /// Hard cap on one inbound message; overshoot closes the transport.
    pub max_message_bytes: usize,
    /// Per-room active-session cap enforced at admission.
    pub max_clients_per_room: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(60),
            write_deadline: Duration::from_secs(10),
            reconnection_grace: Duration::from_secs(4),
            max_message_bytes: 60 * 1024,
            max_clients_per_room: 50,
        }
    }
}

impl Config {
    /// Maximum idle on the read side. Must exceed the ping interval so a
    /// healthy peer's pongs always arrive in time.
    pub fn read_deadline(&self) -> Duration {
        self.ping_interval * 5 / 4
    }

    /// Retention keep window: 1.1 x the grace, so a resume request that
    /// starts right at the boundary still finds its seq.
    pub fn keep_window(&self) -> Duration {
        self.reconnection_grace * 11 / 10
    }

    /// Cadence of the room's background buffer-clean tick.
    pub fn clean_cadence(&self) -> Duration {
        let cadence = self.reconnection_grace / 4;
        // interval(ZERO) panics; clamp for pathological test configs.
        cadence.max(Duration::from_millis(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.ping_interval, Duration::from_secs(60));
        assert_eq!(cfg.write_deadline, Duration::from_secs(10));
        assert_eq!(cfg.reconnection_grace, Duration::from_secs(4));
        assert_eq!(cfg.max_message_bytes, 60 * 1024);
        assert_eq!(cfg.max_clients_per_room, 50);
    }

    #[test]
    fn test_read_deadline_exceeds_ping() {
        let cfg = Config::default();
        assert_eq!(cfg.read_deadline(), Duration::from_secs(75));
        assert!(cfg.read_deadline() > cfg.ping_interval);
    }

    #[test]
    fn test_keep_window_exceeds_grace() {
        let cfg = Config {
            reconnection_grace: Duration::from_secs(10),
            ..Config::default()
        };
        assert_eq!(cfg.keep_window(), Duration::from_secs(11));
    }

    #[test]
    fn test_clean_cadence_is_quarter_grace() {
        let cfg = Config {
            reconnection_grace: Duration::from_secs(8),
            ..Config::default()
        };
        assert_eq!(cfg.clean_cadence(), Duration::from_secs(2));
    }
}
