//! The per-packet receive pipeline (spec §4.8/§4.9): header-protection
//! removal, packet-number reconstruction, AEAD-open, and frame dispatch.
//! CRYPTO payloads that become ready for delivery are handed to the
//! caller through `on_crypto` rather than reaching into a TLS engine
//! directly — that wiring belongs to the handshake driver (spec §4.12).

use tracing::{debug, trace, warn};

use crate::codec::varint;
use crate::conn::Conn;
use crate::crypto::{aead, header_protection};
use crate::error::{QuicError, Result};
use crate::frame::{self, Frame};
use crate::level::EncryptionLevel;
use crate::pnspace::{reconstruct_pn, SpaceId};
use crate::recv::header::{self, LongPacketType};

/// First-header-byte mask width: low 4 bits for long headers, low 5 for
/// short (spec §4.2/§4.8).
const LONG_HEADER_HP_MASK: u8 = 0x0f;
const SHORT_HEADER_HP_MASK: u8 = 0x1f;

#[derive(Debug)]
pub struct ConnectionCloseInfo {
    pub is_app: bool,
    pub error_code: u64,
    pub reason: String,
}

#[derive(Debug)]
pub enum PacketOutcome {
    /// Keys for this level weren't installed yet; the packet was parked
    /// on the level's pending list (spec §4.5 `queue_rx_protected`).
    Deferred,
    /// AEAD authentication failed, or the packet number was a duplicate;
    /// dropped silently (spec §7).
    Dropped,
    Processed { ack_eliciting: bool, connection_close: Option<ConnectionCloseInfo> },
}

/// Process one already-delimited packet (header included) found within a
/// UDP datagram. `pn_offset`/`first_byte_mask` come from the caller's
/// header parse; `packet` may still be header-protected.
///
/// `on_crypto` receives, for each in-order CRYPTO payload now ready
/// (spec §3: in-order delivery only), the bytes to feed the TLS engine.
pub fn process_level_packet(
    conn: &mut Conn,
    level: EncryptionLevel,
    packet: &mut [u8],
    pn_offset: usize,
    first_byte_mask: u8,
    on_crypto: &mut dyn FnMut(EncryptionLevel, &[u8]),
) -> Result<PacketOutcome> {
    let space_id = SpaceId::from_level(level);

    let Some(rx_secrets) = conn.level(level).rx_secrets() else {
        conn.level_mut(level).queue_rx_protected(packet.to_vec(), pn_offset);
        return Ok(PacketOutcome::Deferred);
    };
    let suite = rx_secrets.suite;

    let sample_offset = header_protection::sample_offset(pn_offset);
    if packet.len() < sample_offset + header_protection::SAMPLE_LEN {
        return Err(QuicError::ShortBuffer);
    }
    let sample = packet[sample_offset..sample_offset + header_protection::SAMPLE_LEN].to_vec();
    let mask = header_protection::compute_mask(suite, &rx_secrets.hp_key, &sample)?;

    header_protection::apply(packet, pn_offset, 0, &mask, first_byte_mask);
    let pn_len = (packet[0] & 0x03) as usize + 1;
    header_protection::apply(packet, pn_offset, pn_len, &mask, 0x00);

    let truncated = read_be(&packet[pn_offset..pn_offset + pn_len]);
    let largest = conn.space(space_id).rx.largest_pn;
    let pn = reconstruct_pn(largest, truncated, (pn_len * 8) as u32);

    if !conn.level_mut(level).mark_received(pn) {
        debug!(%level, pn, "dropping duplicate packet number");
        return Ok(PacketOutcome::Dropped);
    }

    let header_len = pn_offset + pn_len;
    let aad_len = header_len;
    let rx_secrets = conn.level(level).rx_secrets().expect("checked above");
    let key = rx_secrets.key.to_vec();
    let iv = rx_secrets.iv.to_vec();

    let aad = packet[..aad_len].to_vec();
    let ciphertext = &packet[header_len..];
    let plaintext = match aead::open(suite, &key, &iv, pn, &aad, ciphertext) {
        Ok(pt) => pt,
        Err(_) => {
            trace!(%level, pn, "AEAD open failed, dropping packet");
            return Ok(PacketOutcome::Dropped);
        }
    };

    let (ack_eliciting, connection_close) = dispatch_frames(conn, level, space_id, pn, &plaintext, on_crypto)?;
    conn.space_mut(space_id).on_packet_received(pn, ack_eliciting);

    Ok(PacketOutcome::Processed { ack_eliciting, connection_close })
}

fn read_be(bytes: &[u8]) -> u64 {
    let mut v = 0u64;
    for &b in bytes {
        v = (v << 8) | b as u64;
    }
    v
}

/// Stage D (spec §4.8): walk the decrypted payload frame by frame and
/// dispatch each to the appropriate handler.
fn dispatch_frames(
    conn: &mut Conn,
    level: EncryptionLevel,
    space_id: SpaceId,
    pn: u64,
    mut payload: &[u8],
    on_crypto: &mut dyn FnMut(EncryptionLevel, &[u8]),
) -> Result<(bool, Option<ConnectionCloseInfo>)> {
    let mut ack_eliciting = false;
    let mut connection_close = None;

    while !payload.is_empty() {
        let (f, consumed) = frame::decode_next(payload)?;
        payload = &payload[consumed..];

        match f {
            Frame::Padding => {}
            Frame::Ping => ack_eliciting = true,
            Frame::Ack { largest, ranges, .. } => {
                handle_ack(conn, level, space_id, largest, &ranges)?;
            }
            Frame::Crypto { offset, data } => {
                ack_eliciting = true;
                let ready = conn.level_mut(level).crypto_rx.on_frame(offset, &data);
                if ready.is_empty() {
                    trace!(%level, pn, offset, "out-of-order CRYPTO frame deferred");
                }
                for chunk in ready {
                    on_crypto(level, &chunk);
                }
            }
            Frame::ConnectionClose { is_app, error_code, reason, .. } => {
                if level == EncryptionLevel::Application {
                    connection_close = Some(ConnectionCloseInfo { is_app, error_code, reason });
                } else {
                    warn!(%level, "CONNECTION_CLOSE at non-application level, ignoring per spec");
                }
            }
            Frame::NewConnectionId { .. } | Frame::HandshakeDone | Frame::Ignored { .. } => {
                ack_eliciting = true;
            }
        }
    }

    Ok((ack_eliciting, connection_close))
}

/// ACK frame handling (spec §4.9): validate against the space's send
/// state, remove acknowledged CRYPTO frame records, and move any gap
/// between consecutive ranges to the retransmit-pending set.
fn handle_ack(
    conn: &mut Conn,
    level: EncryptionLevel,
    space_id: SpaceId,
    largest_ack: u64,
    ranges: &[frame::AckRangeWire],
) -> Result<()> {
    if largest_ack > conn.space(space_id).tx.next_pn {
        return Err(QuicError::FrameEncodingError("largest_ack exceeds the highest packet number sent".into()));
    }

    for r in ranges {
        conn.level_mut(level).tx_frames.on_ack(r.largest, r.smallest);
    }

    for w in ranges.windows(2) {
        let (higher, lower) = (&w[0], &w[1]);
        let largest_gap = higher.smallest - 1;
        let smallest_gap = lower.largest + 1;
        conn.level_mut(level).tx_frames.on_gap(largest_gap, smallest_gap);
        conn.retransmit = true;
    }

    let space = conn.space_mut(space_id);
    space.rx.largest_acked_pn = space.rx.largest_acked_pn.max(largest_ack as i64);

    conn.recompute_crypto_in_flight();
    Ok(())
}

/// Parse the long-header packet type into the encryption level it maps
/// to, or `None` for levels this core never processes (0-RTT, Retry —
/// spec §1 Non-goals).
pub fn level_for_long_header(packet_type: LongPacketType) -> Option<EncryptionLevel> {
    match packet_type {
        LongPacketType::Initial => Some(EncryptionLevel::Initial),
        LongPacketType::Handshake => Some(EncryptionLevel::Handshake),
        LongPacketType::ZeroRtt | LongPacketType::Retry => None,
    }
}

pub fn long_header_mask() -> u8 {
    LONG_HEADER_HP_MASK
}

pub fn short_header_mask() -> u8 {
    SHORT_HEADER_HP_MASK
}

/// Parse and dispatch one packet at the front of `buf` (the listener
/// demux's per-datagram loop, spec §4.7 step 5). Returns the number of
/// bytes consumed, so the caller can continue with any coalesced packet
/// that follows.
pub fn process_one(
    conn: &mut Conn,
    buf: &mut [u8],
    local_cid_len: usize,
    on_crypto: &mut dyn FnMut(EncryptionLevel, &[u8]),
) -> Result<(usize, PacketOutcome)> {
    let byte0 = *buf.first().ok_or(QuicError::ShortBuffer)?;
    if header::is_long_header(byte0) {
        let parsed = header::parse_long_header(buf)?;
        let packet_len = parsed.pn_offset + parsed.length as usize;
        if buf.len() < packet_len {
            return Err(QuicError::ShortBuffer);
        }
        let Some(level) = level_for_long_header(parsed.packet_type) else {
            // 0-RTT / Retry: not processed by this core; consume and drop.
            return Ok((packet_len, PacketOutcome::Dropped));
        };
        let outcome =
            process_level_packet(conn, level, &mut buf[..packet_len], parsed.pn_offset, long_header_mask(), on_crypto)?;
        Ok((packet_len, outcome))
    } else {
        let parsed = header::parse_short_header(buf, local_cid_len)?;
        let packet_len = buf.len(); // short header consumes the rest of the datagram
        let outcome = process_level_packet(
            conn,
            EncryptionLevel::Application,
            &mut buf[..packet_len],
            parsed.pn_offset,
            short_header_mask(),
            on_crypto,
        )?;
        Ok((packet_len, outcome))
    }
}

#[allow(dead_code)]
fn varint_len_of(v: u64) -> usize {
    varint::encoded_len(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ConnectionId;
    use crate::conn::Conn;
    use crate::send::builder;
    use crate::transport_params::TransportParameters;

    fn server_conn() -> Conn {
        let dcid = ConnectionId::from_slice(&hex::decode("8394c8f03e515708").unwrap()).unwrap();
        let scid = ConnectionId::from_slice(&[0x11; 8]).unwrap();
        let addr = "127.0.0.1:4433".parse().unwrap();
        Conn::new_server_conn(1, dcid, scid, addr, TransportParameters::default(), 8)
    }

    #[test]
    fn unknown_keys_defer_the_packet() {
        let mut conn = server_conn();
        // Handshake keys are never installed in this fixture.
        let mut packet = vec![0xe0u8, 0, 0, 0, 1];
        packet.extend_from_slice(&[0u8; 20]);
        let mut noop = |_: EncryptionLevel, _: &[u8]| {};
        let outcome =
            process_level_packet(&mut conn, EncryptionLevel::Handshake, &mut packet, 5, long_header_mask(), &mut noop)
                .unwrap();
        assert!(matches!(outcome, PacketOutcome::Deferred));
        assert_eq!(conn.level(EncryptionLevel::Handshake).rx_pending_count(), 1);
    }

    #[test]
    fn server_initial_round_trip_through_pipeline() {
        // Build a server Initial packet with the send-side builder, then
        // feed it back through the receive pipeline against a *client*
        // role connection (RX keys = server's TX keys) to exercise the
        // full header-protection/AEAD/frame-dispatch path end to end.
        let mut server = server_conn();
        server.level_mut(EncryptionLevel::Initial).crypto_tx.append(b"server hello bytes").unwrap();

        let mut built = builder::build_packet(&mut server, EncryptionLevel::Initial, 1200).unwrap().expect("has data");

        // Flip to a pretend client: its RX secrets equal the server's TX secrets.
        let client_dcid = ConnectionId::from_slice(&hex::decode("8394c8f03e515708").unwrap()).unwrap();
        let (client_rx, _client_tx) = crate::crypto::initial::derive_initial_secrets(false, &client_dcid);
        let mut client = server_conn();
        client.level_mut(EncryptionLevel::Initial).install_rx_secrets(client_rx);

        let mut received_crypto = Vec::new();
        let mut on_crypto = |_level: EncryptionLevel, bytes: &[u8]| received_crypto.extend_from_slice(bytes);
        let (consumed, outcome) =
            process_one(&mut client, &mut built, 8, &mut on_crypto).unwrap();
        assert_eq!(consumed, built.len());
        assert!(matches!(outcome, PacketOutcome::Processed { ack_eliciting: true, .. }));
        assert_eq!(received_crypto, b"server hello bytes");
    }
}
