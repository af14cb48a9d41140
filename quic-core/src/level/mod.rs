//! Per-encryption-level state (spec §3/§4.5): keys, the CRYPTO stream in
//! each direction, and the packets that arrived before this level's keys
//! did.

pub mod crypto_stream;

use std::collections::BTreeSet;

use crate::crypto::LevelSecrets;

use crypto_stream::{RxCryptoStream, TxCryptoFrames, TxCryptoStream};

/// The four QUIC encryption levels (spec §1). 0-RTT is tracked only so
/// a packet carrying it can be recognized and discarded — this core
/// never installs 0-RTT keys or sends 0-RTT data (spec §1 Non-goals).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum EncryptionLevel {
    Initial,
    ZeroRtt,
    Handshake,
    Application,
}

impl EncryptionLevel {
    pub fn all() -> [EncryptionLevel; 4] {
        [Self::Initial, Self::ZeroRtt, Self::Handshake, Self::Application]
    }

    /// Index into a `[T; 4]` array of per-level state, in handshake order.
    pub fn idx(self) -> usize {
        match self {
            Self::Initial => 0,
            Self::ZeroRtt => 1,
            Self::Handshake => 2,
            Self::Application => 3,
        }
    }
}

impl std::fmt::Display for EncryptionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initial => "initial",
            Self::ZeroRtt => "0-rtt",
            Self::Handshake => "handshake",
            Self::Application => "application",
        };
        f.write_str(s)
    }
}

/// A datagram that arrived before this level's read keys were installed,
/// held back so the handshake driver can reprocess it once the TLS
/// engine supplies the secret (spec §4.5 `queue_rx_protected`).
pub struct PendingProtectedPacket {
    pub datagram: Vec<u8>,
    /// Byte offset of the first protected header byte within `datagram`.
    pub packet_start: usize,
}

/// Everything one encryption level needs to track: its keys, its CRYPTO
/// stream in each direction, the frames it has sent but not yet had
/// acknowledged, and any packets still waiting on keys.
#[derive(Default)]
pub struct LevelState {
    rx_secrets: Option<LevelSecrets>,
    tx_secrets: Option<LevelSecrets>,
    rx_pending_hp: Vec<PendingProtectedPacket>,
    /// Packet numbers already opened and dispatched at this level, kept
    /// to reject a replayed duplicate rather than process its frames twice.
    rx_seen_pns: BTreeSet<u64>,
    pub crypto_tx: TxCryptoStream,
    pub crypto_rx: RxCryptoStream,
    pub tx_frames: TxCryptoFrames,
}

impl LevelState {
    pub fn has_rx_keys(&self) -> bool {
        self.rx_secrets.is_some()
    }

    pub fn has_tx_keys(&self) -> bool {
        self.tx_secrets.is_some()
    }

    pub fn rx_secrets(&self) -> Option<&LevelSecrets> {
        self.rx_secrets.as_ref()
    }

    pub fn tx_secrets(&self) -> Option<&LevelSecrets> {
        self.tx_secrets.as_ref()
    }

    /// Install the read keys for this level (spec §4.5 `install_read_secret`
    /// glue). Returns the packets queued while keys were unavailable so
    /// the caller can feed them back through the receive path.
    pub fn install_rx_secrets(&mut self, secrets: LevelSecrets) -> Vec<PendingProtectedPacket> {
        self.rx_secrets = Some(secrets);
        std::mem::take(&mut self.rx_pending_hp)
    }

    pub fn install_tx_secrets(&mut self, secrets: LevelSecrets) {
        self.tx_secrets = Some(secrets);
    }

    pub fn queue_rx_protected(&mut self, datagram: Vec<u8>, packet_start: usize) {
        self.rx_pending_hp.push(PendingProtectedPacket { datagram, packet_start });
    }

    pub fn rx_pending_count(&self) -> usize {
        self.rx_pending_hp.len()
    }

    pub fn has_rx_pending(&self) -> bool {
        !self.rx_pending_hp.is_empty()
    }

    /// Drain every packet parked while this level's RX keys were absent,
    /// for the handshake driver to reprocess now that they're installed
    /// (spec §4.5 `flush_pending_hp` — reprocessing itself happens
    /// through the normal receive pipeline entry point, not here).
    pub fn take_rx_pending(&mut self) -> Vec<PendingProtectedPacket> {
        std::mem::take(&mut self.rx_pending_hp)
    }

    /// Record that `pn` was just opened and dispatched. Returns `false`
    /// if it was already seen (a duplicate that must not be redelivered).
    pub fn mark_received(&mut self, pn: u64) -> bool {
        self.rx_seen_pns.insert(pn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets() -> LevelSecrets {
        use crate::crypto::hkdf::Prk;
        use crate::crypto::suite::{CipherSuite, Md};
        let prk = Prk::from_secret(Md::Sha256, &[0u8; 32]);
        LevelSecrets::derive(CipherSuite::Aes128Gcm, &prk)
    }

    #[test]
    fn pending_packets_drain_on_key_install() {
        let mut level = LevelState::default();
        assert!(!level.has_rx_keys());
        level.queue_rx_protected(vec![1, 2, 3], 1);
        level.queue_rx_protected(vec![4, 5, 6], 1);
        let drained = level.install_rx_secrets(secrets());
        assert!(level.has_rx_keys());
        assert_eq!(drained.len(), 2);
    }

    #[test]
    fn duplicate_packet_numbers_are_rejected() {
        let mut level = LevelState::default();
        assert!(level.mark_received(7));
        assert!(!level.mark_received(7));
        assert!(level.mark_received(8));
    }
}
