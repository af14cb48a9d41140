//! A per-connection counters snapshot (SPEC_FULL §4), in the style of
//! the teacher's `tcp::metrics::ConnectionCount`/`ConnectionSnapshot`
//! split — plain counters here rather than atomics, since a `Conn` is
//! only ever touched from the single task driving it. Exposed for
//! `quic-server`'s logging only; this core has no metrics-export surface.

use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct Stats {
    packets_sent: u64,
    packets_received: u64,
    created_at: Option<Instant>,
    handshake_duration: Option<Duration>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub handshake_duration: Option<Duration>,
}

impl Stats {
    pub fn started(now: Instant) -> Self {
        Self { created_at: Some(now), ..Default::default() }
    }

    pub fn record_packet_sent(&mut self) {
        self.packets_sent += 1;
    }

    pub fn record_packet_received(&mut self) {
        self.packets_received += 1;
    }

    pub fn record_handshake_confirmed(&mut self, now: Instant) {
        if self.handshake_duration.is_none() {
            if let Some(created_at) = self.created_at {
                self.handshake_duration = Some(now.duration_since(created_at));
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_sent: self.packets_sent,
            packets_received: self.packets_received,
            handshake_duration: self.handshake_duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_duration_is_recorded_once() {
        let t0 = Instant::now();
        let mut stats = Stats::started(t0);
        let t1 = t0 + Duration::from_millis(50);
        stats.record_handshake_confirmed(t1);
        let first = stats.snapshot().handshake_duration;
        stats.record_handshake_confirmed(t1 + Duration::from_millis(50));
        assert_eq!(stats.snapshot().handshake_duration, first);
    }

    #[test]
    fn counters_accumulate() {
        let mut stats = Stats::started(Instant::now());
        stats.record_packet_sent();
        stats.record_packet_sent();
        stats.record_packet_received();
        let snap = stats.snapshot();
        assert_eq!(snap.packets_sent, 2);
        assert_eq!(snap.packets_received, 1);
    }
}
