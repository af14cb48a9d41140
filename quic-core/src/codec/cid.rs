use std::fmt;

use crate::error::{QuicError, Result};

/// Maximum length of a QUIC connection ID (RFC 9000 §17.2).
pub const MAX_CID_LEN: usize = 20;

/// An opaque QUIC connection ID, 0..=20 bytes.
///
/// Stored inline (no heap allocation) since CIDs are small and copied
/// frequently across header parsing, map lookups, and retransmits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    len: u8,
    bytes: [u8; MAX_CID_LEN],
}

impl ConnectionId {
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() > MAX_CID_LEN {
            return Err(QuicError::ProtocolViolation(format!(
                "connection ID length {} exceeds {MAX_CID_LEN}",
                slice.len()
            )));
        }
        let mut bytes = [0u8; MAX_CID_LEN];
        bytes[..slice.len()].copy_from_slice(slice);
        Ok(Self { len: slice.len() as u8, bytes })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read a length-prefixed connection ID as found on a long header:
    /// one length byte followed by that many bytes. Returns the CID and
    /// the number of bytes consumed.
    pub fn read_long(buf: &[u8]) -> Result<(Self, usize)> {
        let len = *buf.first().ok_or(QuicError::ShortBuffer)? as usize;
        if len > MAX_CID_LEN {
            return Err(QuicError::ProtocolViolation(format!(
                "connection ID length {len} exceeds {MAX_CID_LEN}"
            )));
        }
        if buf.len() < 1 + len {
            return Err(QuicError::ShortBuffer);
        }
        Ok((Self::from_slice(&buf[1..1 + len])?, 1 + len))
    }

    pub fn write_long(&self, out: &mut Vec<u8>) {
        out.push(self.len);
        out.extend_from_slice(self.as_slice());
    }

    /// Concatenate this CID with a socket address, for the listener's
    /// Initial-phase `(DCID || sockaddr)` disambiguation key (spec §3/§4.7).
    pub fn keyed_with(&self, addr: std::net::SocketAddr) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.len() + 18);
        key.extend_from_slice(self.as_slice());
        match addr {
            std::net::SocketAddr::V4(a) => {
                key.extend_from_slice(&a.ip().octets());
                key.extend_from_slice(&a.port().to_be_bytes());
            }
            std::net::SocketAddr::V6(a) => {
                key.extend_from_slice(&a.ip().octets());
                key.extend_from_slice(&a.port().to_be_bytes());
            }
        }
        key
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cid(")?;
        for b in self.as_slice() {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_header_roundtrip() {
        let cid = ConnectionId::from_slice(&[0x83, 0x94, 0xc8, 0xf0]).unwrap();
        let mut buf = Vec::new();
        cid.write_long(&mut buf);
        assert_eq!(buf, vec![4, 0x83, 0x94, 0xc8, 0xf0]);
        let (decoded, consumed) = ConnectionId::read_long(&buf).unwrap();
        assert_eq!(decoded, cid);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn rejects_oversized_cid() {
        assert!(ConnectionId::from_slice(&[0u8; 21]).is_err());
        let mut buf = vec![21u8];
        buf.extend_from_slice(&[0u8; 21]);
        assert!(ConnectionId::read_long(&buf).is_err());
    }

    #[test]
    fn short_buffer() {
        assert!(ConnectionId::read_long(&[]).is_err());
        assert!(ConnectionId::read_long(&[4, 1, 2]).is_err());
    }
}
