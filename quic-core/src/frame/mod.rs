//! QUIC frame encode/decode (RFC 9000 §19), restricted to the frame types
//! this core's receive pipeline recognizes (spec §4.8's dispatch table)
//! plus the handful of frame encoders the send pipeline needs to emit
//! (ACK, CRYPTO, PADDING, CONNECTION_CLOSE, NEW_CONNECTION_ID,
//! HANDSHAKE_DONE).

use crate::codec::{varint, ConnectionId};
use crate::error::{QuicError, Result};

pub const TYPE_PADDING: u64 = 0x00;
pub const TYPE_PING: u64 = 0x01;
pub const TYPE_ACK: u64 = 0x02;
pub const TYPE_ACK_ECN: u64 = 0x03;
pub const TYPE_CRYPTO: u64 = 0x06;
pub const TYPE_NEW_CONNECTION_ID: u64 = 0x18;
pub const TYPE_CONNECTION_CLOSE_TRANSPORT: u64 = 0x1c;
pub const TYPE_CONNECTION_CLOSE_APP: u64 = 0x1d;
pub const TYPE_HANDSHAKE_DONE: u64 = 0x1e;

/// One decoded ACK range, `[smallest, largest]` inclusive, in the order
/// a sender's ACK frame wire format walks them (largest range first).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckRangeWire {
    pub smallest: u64,
    pub largest: u64,
}

/// The frame types this core recognizes on receipt (spec §4.8). Any
/// other frame type present in a packet's payload is skipped by length
/// where the type carries a known shape (STREAM_*), or otherwise treated
/// as a protocol violation — this core never originates or needs to
/// interpret application stream data itself (spec §1 Non-goals).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Padding,
    Ping,
    Ack { largest: u64, delay: u64, ranges: Vec<AckRangeWire> },
    Crypto { offset: u64, data: Vec<u8> },
    ConnectionClose { is_app: bool, error_code: u64, frame_type: Option<u64>, reason: String },
    NewConnectionId { sequence: u64, retire_prior_to: u64, cid: ConnectionId, reset_token: [u8; 16] },
    HandshakeDone,
    /// STREAM_* (0x08..=0x0f) or any other ack-eliciting frame this core
    /// doesn't act on beyond noting it occurred (spec §4.8: "mark
    /// ack-eliciting; this core does not process application streams").
    Ignored { ack_eliciting: bool },
}

impl Frame {
    pub fn is_ack_eliciting(&self) -> bool {
        !matches!(self, Frame::Padding | Frame::Ack { .. })
    }
}

/// Decode one frame from the front of `buf`, returning it and the number
/// of bytes consumed. PADDING frames coalesce: a single `Frame::Padding`
/// is returned for a run of consecutive `0x00` bytes (spec §4.8: "skip").
pub fn decode_next(buf: &[u8]) -> Result<(Frame, usize)> {
    let (frame_type, type_len) = varint::decode(buf)?;
    match frame_type {
        TYPE_PADDING => {
            let mut n = type_len;
            while buf.get(n) == Some(&0) {
                n += 1;
            }
            Ok((Frame::Padding, n))
        }
        TYPE_PING => Ok((Frame::Ping, type_len)),
        TYPE_ACK | TYPE_ACK_ECN => decode_ack(buf, type_len, frame_type == TYPE_ACK_ECN),
        TYPE_CRYPTO => decode_crypto(buf, type_len),
        TYPE_NEW_CONNECTION_ID => decode_new_connection_id(buf, type_len),
        TYPE_CONNECTION_CLOSE_TRANSPORT => decode_connection_close(buf, type_len, false),
        TYPE_CONNECTION_CLOSE_APP => decode_connection_close(buf, type_len, true),
        TYPE_HANDSHAKE_DONE => Ok((Frame::HandshakeDone, type_len)),
        0x08..=0x0f => decode_stream_skip(buf, type_len, frame_type),
        _ => Err(QuicError::FrameEncodingError(format!("unrecognized frame type {frame_type:#x}"))),
    }
}

fn decode_ack(buf: &[u8], mut pos: usize, has_ecn: bool) -> Result<(Frame, usize)> {
    let (largest, n) = varint::decode(&buf[pos..])?;
    pos += n;
    let (delay, n) = varint::decode(&buf[pos..])?;
    pos += n;
    let (range_count, n) = varint::decode(&buf[pos..])?;
    pos += n;
    let (first_range, n) = varint::decode(&buf[pos..])?;
    pos += n;

    if first_range > largest {
        return Err(QuicError::FrameEncodingError("first_ack_range exceeds largest_ack".into()));
    }
    let mut ranges = vec![AckRangeWire { smallest: largest - first_range, largest }];

    let mut smallest_so_far = largest - first_range;
    for _ in 0..range_count {
        let (gap, n) = varint::decode(&buf[pos..])?;
        pos += n;
        let (range_len, n) = varint::decode(&buf[pos..])?;
        pos += n;
        if smallest_so_far < gap + 2 {
            return Err(QuicError::FrameEncodingError("ack range gap underflows packet number space".into()));
        }
        let range_largest = smallest_so_far - gap - 2;
        if range_largest < range_len {
            return Err(QuicError::FrameEncodingError("ack range underflows".into()));
        }
        let range_smallest = range_largest - range_len;
        ranges.push(AckRangeWire { smallest: range_smallest, largest: range_largest });
        smallest_so_far = range_smallest;
    }

    if has_ecn {
        for _ in 0..3 {
            let (_, n) = varint::decode(&buf[pos..])?;
            pos += n;
        }
    }

    Ok((Frame::Ack { largest, delay, ranges }, pos))
}

fn decode_crypto(buf: &[u8], mut pos: usize) -> Result<(Frame, usize)> {
    let (offset, n) = varint::decode(&buf[pos..])?;
    pos += n;
    let (len, n) = varint::decode(&buf[pos..])?;
    pos += n;
    let len = len as usize;
    if buf.len() < pos + len {
        return Err(QuicError::ShortBuffer);
    }
    let data = buf[pos..pos + len].to_vec();
    pos += len;
    Ok((Frame::Crypto { offset, data }, pos))
}

fn decode_new_connection_id(buf: &[u8], mut pos: usize) -> Result<(Frame, usize)> {
    let (sequence, n) = varint::decode(&buf[pos..])?;
    pos += n;
    let (retire_prior_to, n) = varint::decode(&buf[pos..])?;
    pos += n;
    let cid_len = *buf.get(pos).ok_or(QuicError::ShortBuffer)? as usize;
    pos += 1;
    if buf.len() < pos + cid_len + 16 {
        return Err(QuicError::ShortBuffer);
    }
    let cid = ConnectionId::from_slice(&buf[pos..pos + cid_len])?;
    pos += cid_len;
    let mut reset_token = [0u8; 16];
    reset_token.copy_from_slice(&buf[pos..pos + 16]);
    pos += 16;
    Ok((Frame::NewConnectionId { sequence, retire_prior_to, cid, reset_token }, pos))
}

fn decode_connection_close(buf: &[u8], mut pos: usize, is_app: bool) -> Result<(Frame, usize)> {
    let (error_code, n) = varint::decode(&buf[pos..])?;
    pos += n;
    let frame_type = if is_app {
        None
    } else {
        let (ft, n) = varint::decode(&buf[pos..])?;
        pos += n;
        Some(ft)
    };
    let (reason_len, n) = varint::decode(&buf[pos..])?;
    pos += n;
    let reason_len = reason_len as usize;
    if buf.len() < pos + reason_len {
        return Err(QuicError::ShortBuffer);
    }
    let reason = String::from_utf8_lossy(&buf[pos..pos + reason_len]).into_owned();
    pos += reason_len;
    Ok((Frame::ConnectionClose { is_app, error_code, frame_type, reason }, pos))
}

/// STREAM frames (0x08..=0x0f) carry optional OFF/LEN/FIN bits in the low
/// three bits of the type. This core never processes application stream
/// data (spec §1 Non-goals) but must still skip the frame correctly to
/// keep parsing the rest of the packet (spec §4.8: "mark ack-eliciting").
fn decode_stream_skip(buf: &[u8], mut pos: usize, frame_type: u64) -> Result<(Frame, usize)> {
    let has_offset = frame_type & 0x04 != 0;
    let has_len = frame_type & 0x02 != 0;

    let (_stream_id, n) = varint::decode(&buf[pos..])?;
    pos += n;
    if has_offset {
        let (_offset, n) = varint::decode(&buf[pos..])?;
        pos += n;
    }
    let len = if has_len {
        let (len, n) = varint::decode(&buf[pos..])?;
        pos += n;
        len as usize
    } else {
        buf.len() - pos
    };
    if buf.len() < pos + len {
        return Err(QuicError::ShortBuffer);
    }
    pos += len;
    Ok((Frame::Ignored { ack_eliciting: true }, pos))
}

/// Encode an ACK frame from a descending, disjoint range list (the shape
/// `AckRangeSet::ranges()` returns): `ranges[0]` is the highest range.
pub fn encode_ack(out: &mut Vec<u8>, ranges: &[crate::pnspace::ack_ranges::Range], delay: u64) {
    debug_assert!(!ranges.is_empty());
    varint::encode(out, TYPE_ACK);
    let largest = ranges[0].last;
    varint::encode(out, largest);
    varint::encode(out, delay);
    varint::encode(out, (ranges.len() - 1) as u64);
    varint::encode(out, largest - ranges[0].first);

    let mut prev_smallest = ranges[0].first;
    for r in &ranges[1..] {
        let gap = prev_smallest - r.last - 2;
        let range_len = r.last - r.first;
        varint::encode(out, gap);
        varint::encode(out, range_len);
        prev_smallest = r.first;
    }
}

pub fn encode_crypto(out: &mut Vec<u8>, offset: u64, data: &[u8]) {
    varint::encode(out, TYPE_CRYPTO);
    varint::encode(out, offset);
    varint::encode(out, data.len() as u64);
    out.extend_from_slice(data);
}

/// The length, in bytes, a `CRYPTO` frame header (type + offset + length
/// varints) would occupy for the given offset/length — used by the
/// packet builder to size how much stream data actually fits.
pub fn crypto_header_len(offset: u64, len: usize) -> usize {
    varint::encoded_len(TYPE_CRYPTO) + varint::encoded_len(offset) + varint::encoded_len(len as u64)
}

pub fn encode_padding(out: &mut Vec<u8>, count: usize) {
    out.resize(out.len() + count, 0);
}

pub fn encode_connection_close(out: &mut Vec<u8>, is_app: bool, error_code: u64, reason: &str) {
    varint::encode(out, if is_app { TYPE_CONNECTION_CLOSE_APP } else { TYPE_CONNECTION_CLOSE_TRANSPORT });
    varint::encode(out, error_code);
    if !is_app {
        varint::encode(out, 0); // triggering frame type, unknown/generic
    }
    let reason = reason.as_bytes();
    varint::encode(out, reason.len() as u64);
    out.extend_from_slice(reason);
}

pub fn encode_new_connection_id(
    out: &mut Vec<u8>,
    sequence: u64,
    retire_prior_to: u64,
    cid: &ConnectionId,
    reset_token: &[u8; 16],
) {
    varint::encode(out, TYPE_NEW_CONNECTION_ID);
    varint::encode(out, sequence);
    varint::encode(out, retire_prior_to);
    out.push(cid.len() as u8);
    out.extend_from_slice(cid.as_slice());
    out.extend_from_slice(reset_token);
}

pub fn encode_handshake_done(out: &mut Vec<u8>) {
    varint::encode(out, TYPE_HANDSHAKE_DONE);
}

pub fn encode_ping(out: &mut Vec<u8>) {
    varint::encode(out, TYPE_PING);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pnspace::ack_ranges::AckRangeSet;

    #[test]
    fn padding_run_coalesces_into_one_frame() {
        let buf = [0u8, 0, 0, 0x01];
        let (frame, consumed) = decode_next(&buf).unwrap();
        assert_eq!(frame, Frame::Padding);
        assert_eq!(consumed, 3);
    }

    #[test]
    fn crypto_frame_roundtrips() {
        let mut buf = Vec::new();
        encode_crypto(&mut buf, 42, b"client hello bytes");
        let (frame, consumed) = decode_next(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        match frame {
            Frame::Crypto { offset, data } => {
                assert_eq!(offset, 42);
                assert_eq!(data, b"client hello bytes");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn ack_frame_roundtrips_multiple_ranges() {
        let mut set = AckRangeSet::new();
        for pn in [0u64, 2, 5, 6, 7] {
            set.insert(pn);
        }
        let mut buf = Vec::new();
        encode_ack(&mut buf, set.ranges(), 10);
        let (frame, consumed) = decode_next(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        match frame {
            Frame::Ack { largest, delay, ranges } => {
                assert_eq!(largest, 7);
                assert_eq!(delay, 10);
                assert_eq!(
                    ranges,
                    vec![
                        AckRangeWire { smallest: 5, largest: 7 },
                        AckRangeWire { smallest: 0, largest: 0 },
                        AckRangeWire { smallest: 2, largest: 2 },
                    ]
                );
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn connection_close_transport_roundtrips() {
        let mut buf = Vec::new();
        encode_connection_close(&mut buf, false, 0x0a, "bad frame");
        let (frame, consumed) = decode_next(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(
            frame,
            Frame::ConnectionClose { is_app: false, error_code: 0x0a, frame_type: Some(0), reason: "bad frame".into() }
        );
    }

    #[test]
    fn new_connection_id_roundtrips() {
        let cid = ConnectionId::from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let mut buf = Vec::new();
        encode_new_connection_id(&mut buf, 1, 0, &cid, &[0xab; 16]);
        let (frame, consumed) = decode_next(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(
            frame,
            Frame::NewConnectionId { sequence: 1, retire_prior_to: 0, cid, reset_token: [0xab; 16] }
        );
    }

    #[test]
    fn malformed_ack_range_is_rejected() {
        let mut buf = Vec::new();
        varint::encode(&mut buf, TYPE_ACK);
        varint::encode(&mut buf, 5); // largest
        varint::encode(&mut buf, 0); // delay
        varint::encode(&mut buf, 1); // one extra range
        varint::encode(&mut buf, 0); // first_ack_range
        varint::encode(&mut buf, 100); // gap way too big
        varint::encode(&mut buf, 0);
        assert!(decode_next(&buf).is_err());
    }
}
