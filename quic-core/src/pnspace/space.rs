use crate::pnspace::ack_ranges::AckRangeSet;

/// Which of the three independent packet-number domains a space tracks
/// (spec §3: "ACKs never cross spaces").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SpaceId {
    Initial,
    Handshake,
    Application,
}

impl SpaceId {
    /// The encryption level mapping for *outbound* packet construction.
    /// 0-RTT shares the Application space but is not represented here
    /// since this core never sends 0-RTT (spec §1 Non-goals).
    pub fn from_level(level: crate::level::EncryptionLevel) -> Self {
        use crate::level::EncryptionLevel as L;
        match level {
            L::Initial => SpaceId::Initial,
            L::Handshake => SpaceId::Handshake,
            L::ZeroRtt | L::Application => SpaceId::Application,
        }
    }

    /// Index into a `[T; 3]` array of per-space state.
    pub fn idx(self) -> usize {
        match self {
            SpaceId::Initial => 0,
            SpaceId::Handshake => 1,
            SpaceId::Application => 2,
        }
    }
}

#[derive(Default)]
pub struct TxState {
    /// Next packet number to assign in this space.
    pub next_pn: u64,
}

pub struct RxState {
    /// -1 if nothing has been received yet.
    pub largest_pn: i64,
    pub largest_acked_pn: i64,
    pub nb_ack_eliciting: u64,
    pub ack_ranges: AckRangeSet,
}

impl Default for RxState {
    fn default() -> Self {
        Self { largest_pn: -1, largest_acked_pn: -1, nb_ack_eliciting: 0, ack_ranges: AckRangeSet::new() }
    }
}

#[derive(Default)]
pub struct SpaceFlags {
    pub ack_required: bool,
}

/// Per-packet-number-space bookkeeping (spec §3/§4.4): everything needed
/// to assign outgoing PNs, reconstruct incoming ones, and decide when an
/// ACK is owed.
#[derive(Default)]
pub struct Space {
    pub tx: TxState,
    pub rx: RxState,
    pub flags: SpaceFlags,
}

impl Space {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an incoming packet number: update `largest_pn` and insert
    /// into the ACK-range set (spec §4.8, "Always update...").
    pub fn on_packet_received(&mut self, pn: u64, ack_eliciting: bool) {
        self.rx.largest_pn = self.rx.largest_pn.max(pn as i64);
        self.rx.ack_ranges.insert(pn);
        if ack_eliciting {
            self.rx.nb_ack_eliciting += 1;
            if self.rx.nb_ack_eliciting % 2 == 1 {
                self.flags.ack_required = true;
            }
        }
    }

    /// Reserve the next packet number for an outgoing packet.
    pub fn next_pn(&mut self) -> u64 {
        let pn = self.tx.next_pn;
        self.tx.next_pn += 1;
        pn
    }

    pub fn largest_acked(&self) -> Option<u64> {
        if self.rx.largest_acked_pn < 0 {
            None
        } else {
            Some(self.rx.largest_acked_pn as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn largest_pn_is_non_decreasing() {
        let mut space = Space::new();
        space.on_packet_received(5, false);
        space.on_packet_received(2, false);
        space.on_packet_received(9, false);
        assert_eq!(space.rx.largest_pn, 9);
    }

    #[test]
    fn ack_required_toggles_every_two_eliciting_packets() {
        let mut space = Space::new();
        space.on_packet_received(0, true);
        assert!(space.flags.ack_required);
        space.flags.ack_required = false; // simulate having sent the ACK
        space.on_packet_received(1, true);
        assert!(!space.flags.ack_required);
        space.on_packet_received(2, true);
        assert!(space.flags.ack_required);
    }

    #[test]
    fn pn_allocation_is_strictly_increasing() {
        let mut space = Space::new();
        let a = space.next_pn();
        let b = space.next_pn();
        let c = space.next_pn();
        assert_eq!((a, b, c), (0, 1, 2));
    }
}
