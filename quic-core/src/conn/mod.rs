//! The connection object (spec §4.6): the aggregate that owns a client's
//! four encryption levels, three packet-number spaces, negotiated
//! transport parameters, and TX datagram ring. Everything else in this
//! crate operates on a `&mut Conn`.

pub mod stats;
pub mod state;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::RngCore;

use crate::codec::ConnectionId;
use crate::crypto::initial;
use crate::level::{EncryptionLevel, LevelState};
use crate::pnspace::{Space, SpaceId};
use crate::send::ring::TxRing;
use crate::transport_params::TransportParameters;

pub use stats::{Stats, StatsSnapshot};
pub use state::ConnState;

/// Default local connection-ID length this core issues (spec §3).
pub const DEFAULT_LOCAL_CID_LEN: usize = 8;

/// Bytes of unacknowledged CRYPTO data allowed in flight before the send
/// path stalls (spec §5 resource bounds).
pub const QUIC_CRYPTO_IN_FLIGHT_MAX: usize = 4096;

pub struct Conn {
    pub version: u32,
    /// The client's original DCID, echoed in
    /// `original_destination_connection_id` and never used again for I/O.
    pub odcid: ConnectionId,
    /// The peer's SCID: what this endpoint addresses its outgoing
    /// long-header packets' DCID field with.
    pub dcid: ConnectionId,
    /// This endpoint's own CID, of length `local_cid_len`.
    pub scid: ConnectionId,
    /// Length this endpoint generates every local CID at, including
    /// `scid` and every CID `issue_new_connection_ids` hands out
    /// (configured per listener, spec §3: "negotiates a fixed local CID
    /// length L for CIDs it issues").
    local_cid_len: usize,
    /// Every local CID currently registered with the listener (just
    /// `scid` until NEW_CONNECTION_ID issuance is driven by the
    /// handshake driver's post-completion step).
    pub local_cids: Vec<ConnectionId>,
    pub remote_addr: SocketAddr,

    levels: [LevelState; 4],
    spaces: [Space; 3],

    pub local_params: TransportParameters,
    pub peer_params: Option<TransportParameters>,

    pub state: ConnState,
    /// Sum of in-flight CRYPTO bytes across all levels (invariant,
    /// spec §8 property 3).
    pub crypto_in_flight: usize,
    pub retransmit: bool,
    /// Set once the handshake completes; the next Application-level
    /// packet the builder emits carries a HANDSHAKE_DONE frame and
    /// clears this (spec §4.12 step 4).
    pub handshake_done_pending: bool,

    pub tx_ring: TxRing,
    pub stats: Stats,

    last_activity: Instant,

    /// NEW_CONNECTION_ID records the send pipeline still needs to frame
    /// (spec §4.12: emitted once, right after handshake completion).
    pending_new_cid_frames: Vec<(u64, ConnectionId, [u8; 16])>,
    /// CIDs issued via `issue_new_connection_ids` that the listener has
    /// not yet registered into its routing table.
    unregistered_cids: Vec<ConnectionId>,
    next_cid_seq: u64,
    new_cids_issued: bool,
}

impl Conn {
    /// `new_server_conn` (spec §4.6): instantiate from the first Initial
    /// packet's DCID/SCID. Derives and installs Initial secrets; every
    /// other level starts with no keys installed.
    pub fn new_server_conn(
        version: u32,
        client_dcid: ConnectionId,
        client_scid: ConnectionId,
        remote_addr: SocketAddr,
        local_params: TransportParameters,
        local_cid_len: usize,
    ) -> Self {
        let mut scid_bytes = [0u8; crate::codec::MAX_CID_LEN];
        rand::rng().fill_bytes(&mut scid_bytes[..local_cid_len]);
        let scid = ConnectionId::from_slice(&scid_bytes[..local_cid_len]).expect("local_cid_len within max");

        let mut levels: [LevelState; 4] = Default::default();
        let (rx, tx) = initial::derive_initial_secrets(true, &client_dcid);
        let initial_pending = levels[EncryptionLevel::Initial.idx()].install_rx_secrets(rx);
        debug_assert!(initial_pending.is_empty());
        levels[EncryptionLevel::Initial.idx()].install_tx_secrets(tx);

        let mut local_params = local_params;
        local_params.original_destination_connection_id = Some(client_dcid.as_slice().to_vec());
        let now = Instant::now();

        Self {
            version,
            odcid: client_dcid,
            dcid: client_scid,
            scid,
            local_cid_len,
            local_cids: vec![scid],
            remote_addr,
            levels,
            spaces: Default::default(),
            local_params,
            peer_params: None,
            state: ConnState::ServerInitial,
            crypto_in_flight: 0,
            retransmit: false,
            handshake_done_pending: false,
            tx_ring: TxRing::new(),
            stats: Stats::started(now),
            last_activity: now,
            pending_new_cid_frames: Vec::new(),
            unregistered_cids: Vec::new(),
            next_cid_seq: 1,
            new_cids_issued: false,
        }
    }

    pub fn level(&self, level: EncryptionLevel) -> &LevelState {
        &self.levels[level.idx()]
    }

    pub fn level_mut(&mut self, level: EncryptionLevel) -> &mut LevelState {
        &mut self.levels[level.idx()]
    }

    pub fn space(&self, id: SpaceId) -> &Space {
        &self.spaces[id.idx()]
    }

    pub fn space_mut(&mut self, id: SpaceId) -> &mut Space {
        &mut self.spaces[id.idx()]
    }

    pub fn mark_activity(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn is_idle_timed_out(&self, now: Instant, max_idle: Duration) -> bool {
        max_idle > Duration::ZERO && now.duration_since(self.last_activity) >= max_idle
    }

    /// Enter the draining state (spec §5 "Cancellation and timeouts"): no
    /// further data is sent except possibly one CONNECTION_CLOSE, and all
    /// RX frames other than CONNECTION_CLOSE are discarded from here on.
    pub fn enter_draining(&mut self) {
        self.state = ConnState::Draining;
    }

    pub fn is_handshake_confirmed(&self) -> bool {
        self.state == ConnState::Confirmed
    }

    /// Recompute `crypto_in_flight` from the authoritative per-level
    /// records (spec §8 invariant 3), after an ACK moves bytes out of
    /// flight.
    pub fn recompute_crypto_in_flight(&mut self) {
        self.crypto_in_flight = self.levels.iter().map(|l| l.tx_frames.in_flight_bytes()).sum();
    }

    pub fn levels(&self) -> &[LevelState; 4] {
        &self.levels
    }

    pub fn levels_mut(&mut self) -> &mut [LevelState; 4] {
        &mut self.levels
    }

    /// Issue `active_connection_id_limit - 1` additional local CIDs, once,
    /// right after handshake completion (spec §4.12: "one per
    /// active_connection_id_limit advertised by peer, minus 1 for the
    /// primary"). A no-op on every call after the first.
    pub fn issue_new_connection_ids(&mut self, peer_active_connection_id_limit: u64) {
        if self.new_cids_issued {
            return;
        }
        self.new_cids_issued = true;
        let extra = peer_active_connection_id_limit.saturating_sub(1);
        for _ in 0..extra {
            let mut bytes = [0u8; crate::codec::MAX_CID_LEN];
            rand::rng().fill_bytes(&mut bytes[..self.local_cid_len]);
            let cid = ConnectionId::from_slice(&bytes[..self.local_cid_len]).expect("local_cid_len within max");
            let mut reset_token = [0u8; 16];
            rand::rng().fill_bytes(&mut reset_token);
            let seq = self.next_cid_seq;
            self.next_cid_seq += 1;
            self.local_cids.push(cid);
            self.pending_new_cid_frames.push((seq, cid, reset_token));
            self.unregistered_cids.push(cid);
        }
    }

    pub fn has_pending_new_cid_frames(&self) -> bool {
        !self.pending_new_cid_frames.is_empty()
    }

    /// Drain the NEW_CONNECTION_ID records the builder should frame into
    /// the next Application packet.
    pub fn drain_new_cid_frames(&mut self) -> Vec<(u64, ConnectionId, [u8; 16])> {
        std::mem::take(&mut self.pending_new_cid_frames)
    }

    /// Drain CIDs issued since the last call, for the listener to route
    /// to this connection (spec §4.7 CID table, `register_cid`).
    pub fn drain_cids_to_register(&mut self) -> Vec<ConnectionId> {
        std::mem::take(&mut self.unregistered_cids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Conn {
        let dcid = ConnectionId::from_slice(&hex::decode("8394c8f03e515708").unwrap()).unwrap();
        let scid = ConnectionId::from_slice(&[0xaa; 8]).unwrap();
        let addr: SocketAddr = "127.0.0.1:4433".parse().unwrap();
        Conn::new_server_conn(1, dcid, scid, addr, TransportParameters::default(), 8)
    }

    #[test]
    fn new_server_conn_installs_initial_keys_only() {
        let conn = test_conn();
        assert!(conn.level(EncryptionLevel::Initial).has_rx_keys());
        assert!(conn.level(EncryptionLevel::Initial).has_tx_keys());
        assert!(!conn.level(EncryptionLevel::Handshake).has_rx_keys());
        assert!(!conn.level(EncryptionLevel::Application).has_tx_keys());
    }

    #[test]
    fn original_destination_connection_id_is_echoed() {
        let conn = test_conn();
        assert_eq!(
            conn.local_params.original_destination_connection_id.as_deref(),
            Some(hex::decode("8394c8f03e515708").unwrap().as_slice())
        );
    }

    #[test]
    fn idle_timeout_fires_after_max_idle_elapsed() {
        let mut conn = test_conn();
        let t0 = Instant::now();
        conn.mark_activity(t0);
        assert!(!conn.is_idle_timed_out(t0, Duration::from_secs(30)));
        let later = t0 + Duration::from_secs(31);
        assert!(conn.is_idle_timed_out(later, Duration::from_secs(30)));
    }

    #[test]
    fn scid_and_issued_cids_honor_a_non_default_local_cid_len() {
        let dcid = ConnectionId::from_slice(&hex::decode("8394c8f03e515708").unwrap()).unwrap();
        let scid = ConnectionId::from_slice(&[0xaa; 4]).unwrap();
        let addr: SocketAddr = "127.0.0.1:4433".parse().unwrap();
        let mut conn = Conn::new_server_conn(1, dcid, scid, addr, TransportParameters::default(), 4);
        assert_eq!(conn.scid.len(), 4);

        conn.issue_new_connection_ids(3);
        assert_eq!(conn.local_cids.len(), 3);
        for cid in &conn.local_cids {
            assert_eq!(cid.len(), 4, "every issued CID must match the connection's local_cid_len");
        }
    }
}
