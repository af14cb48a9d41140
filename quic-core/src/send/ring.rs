//! The TX datagram ring (spec §3): a fixed number of MTU-sized buffers the
//! packet builder coalesces packets into, drained to UDP by the caller.

use crate::error::{QuicError, Result};

/// Number of ring slots. Power of two, per spec §5 resource bounds.
pub const TX_BUFS_NB: usize = 8;
/// Capacity of one slot; large enough to hold a server Initial padded to
/// `QUIC_INITIAL_PACKET_MINLEN` plus room for coalescing.
pub const MTU: usize = 1452;

#[derive(Default)]
pub struct TxRing {
    bufs: Vec<Vec<u8>>,
    /// Write cursor, monotonically increasing modulo `TX_BUFS_NB`.
    wbuf: u64,
    /// Read cursor, monotonically increasing modulo `TX_BUFS_NB`.
    rbuf: u64,
}

impl TxRing {
    pub fn new() -> Self {
        Self { bufs: vec![Vec::with_capacity(MTU); TX_BUFS_NB], wbuf: 0, rbuf: 0 }
    }

    fn slot(&mut self, index: u64) -> &mut Vec<u8> {
        &mut self.bufs[(index as usize) % TX_BUFS_NB]
    }

    /// `true` once every slot is occupied by an undrained buffer — the
    /// current write slot plus `TX_BUFS_NB - 1` others still awaiting
    /// drain — so advancing further would wrap onto a slot the reader
    /// hasn't drained yet.
    fn is_full(&self) -> bool {
        self.wbuf - self.rbuf >= TX_BUFS_NB as u64 - 1
    }

    /// Append one already-built packet to the current write buffer,
    /// advancing to the next slot first if there isn't room
    /// (spec §3: "an empty write buffer permits appending another
    /// packet; once full it advances").
    pub fn append_packet(&mut self, packet: &[u8]) -> Result<()> {
        if packet.len() > MTU {
            return Err(QuicError::FrameEncodingError("packet exceeds MTU".into()));
        }
        if !self.slot(self.wbuf).is_empty() && self.slot(self.wbuf).len() + packet.len() > MTU {
            self.advance_write()?;
        }
        self.slot(self.wbuf).extend_from_slice(packet);
        Ok(())
    }

    fn advance_write(&mut self) -> Result<()> {
        if self.is_full() {
            return Err(QuicError::TxRingFull);
        }
        self.wbuf += 1;
        Ok(())
    }

    /// Finalize the current write buffer even if only partially filled,
    /// so a send-pipeline pass that ends mid-buffer still ships what it
    /// built. A no-op if the current buffer is empty.
    pub fn flush(&mut self) -> Result<()> {
        if !self.slot(self.wbuf).is_empty() {
            self.advance_write()?;
        }
        Ok(())
    }

    /// Pop every buffer between `rbuf` and `wbuf`, oldest first, for the
    /// caller to hand to the UDP send interface. Drained slots are reset
    /// and become reusable write targets again.
    pub fn drain_ready(&mut self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while self.rbuf < self.wbuf {
            let idx = (self.rbuf as usize) % TX_BUFS_NB;
            out.push(std::mem::replace(&mut self.bufs[idx], Vec::with_capacity(MTU)));
            self.rbuf += 1;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packets_coalesce_until_mtu_then_advance() {
        let mut ring = TxRing::new();
        ring.append_packet(&vec![1u8; 1000]).unwrap();
        ring.append_packet(&vec![2u8; 400]).unwrap(); // fits: 1400 <= MTU
        ring.append_packet(&vec![3u8; 400]).unwrap(); // doesn't fit, new slot
        ring.flush().unwrap();
        let drained = ring.drain_ready();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].len(), 1400);
        assert_eq!(drained[1].len(), 400);
    }

    #[test]
    fn flush_is_a_no_op_on_empty_buffer() {
        let mut ring = TxRing::new();
        ring.flush().unwrap();
        assert!(ring.drain_ready().is_empty());
    }

    #[test]
    fn ring_rejects_overflow_when_all_slots_pending() {
        let mut ring = TxRing::new();
        for _ in 0..TX_BUFS_NB {
            ring.append_packet(&vec![0u8; MTU]).unwrap();
        }
        // next append can't fit in the current (full) slot and there's no
        // free slot to advance into.
        assert!(matches!(ring.append_packet(&vec![0u8; MTU]), Err(QuicError::TxRingFull)));
    }
}
