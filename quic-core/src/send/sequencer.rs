//! The per-connection send sequencer (spec §4.11/§4.12): for each level
//! with TX keys installed, retransmit-pending CRYPTO first, then fresh
//! ACKs/CRYPTO, coalescing everything into the connection's TX ring.

use tracing::trace;

use super::builder::{build_packet, build_retransmit_packet};
use super::ring::MTU;
use crate::conn::Conn;
use crate::error::Result;
use crate::level::EncryptionLevel;

/// Build and enqueue as many packets as there is data or ACK obligation
/// for, across every level with TX keys installed, in handshake order.
/// Returns the number of packets enqueued into the TX ring.
pub fn drive_send(conn: &mut Conn) -> Result<usize> {
    let mut built = 0usize;

    for level in [EncryptionLevel::Initial, EncryptionLevel::Handshake, EncryptionLevel::Application] {
        if !conn.level(level).has_tx_keys() {
            continue;
        }

        let retransmits = conn.level_mut(level).tx_frames.drain_retransmit_pending();
        for record in retransmits {
            let packet = build_retransmit_packet(conn, level, record)?;
            trace!(%level, len = packet.len(), "retransmitting crypto frame");
            conn.tx_ring.append_packet(&packet)?;
            conn.stats.record_packet_sent();
            built += 1;
        }

        while let Some(packet) = build_packet(conn, level, MTU)? {
            conn.tx_ring.append_packet(&packet)?;
            conn.stats.record_packet_sent();
            built += 1;
        }
    }

    if built > 0 {
        conn.tx_ring.flush()?;
        conn.retransmit = false;
    }

    Ok(built)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ConnectionId;
    use crate::transport_params::TransportParameters;

    fn server_conn() -> Conn {
        let dcid = ConnectionId::from_slice(&hex::decode("8394c8f03e515708").unwrap()).unwrap();
        let scid = ConnectionId::from_slice(&[0x22; 8]).unwrap();
        let addr = "127.0.0.1:4433".parse().unwrap();
        Conn::new_server_conn(1, dcid, scid, addr, TransportParameters::default(), 8)
    }

    #[test]
    fn server_initial_crypto_produces_one_padded_datagram() {
        let mut conn = server_conn();
        conn.level_mut(EncryptionLevel::Initial).crypto_tx.append(b"server hello bytes").unwrap();
        let built = drive_send(&mut conn).unwrap();
        assert_eq!(built, 1);
        let drained = conn.tx_ring.drain_ready();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].len(), super::builder::QUIC_INITIAL_PACKET_MINLEN);
    }

    #[test]
    fn nothing_pending_produces_no_packets() {
        let mut conn = server_conn();
        let built = drive_send(&mut conn).unwrap();
        assert_eq!(built, 0);
    }
}
