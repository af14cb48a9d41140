//! The connection demux (spec §4.7): maps incoming datagrams to a `Conn`,
//! creating one on an Initial packet with an unrecognized DCID. Owns no
//! I/O itself — the caller (the `quic-server` UDP loop) reads datagrams
//! and hands them to [`Listener::handle_datagram`].

use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::{debug, info, warn};

use crate::codec::ConnectionId;
use crate::conn::Conn;
use crate::error::{QuicError, Result};
use crate::level::EncryptionLevel;
use crate::recv::{self, PacketOutcome};
use crate::transport_params::TransportParameters;

/// QUIC v1 version number this listener accepts (RFC 9000 §15).
pub const QUIC_VERSION_1: u32 = 1;

/// Everything that happened while processing one inbound datagram, for
/// the caller to act on (hand CRYPTO to a handshake driver, drive a send
/// pass, tear the connection down).
pub struct DatagramOutcome {
    /// The connection's primary key, for `Listener::get_mut`.
    pub primary_cid: ConnectionId,
    pub crypto: Vec<(EncryptionLevel, Vec<u8>)>,
    pub any_ack_eliciting: bool,
    pub connection_closed: bool,
}

/// The connection table (spec §4.7). `cids` maps every CID a connection
/// answers to — its original server-issued SCID plus any later
/// NEW_CONNECTION_ID — onto that connection's primary key (its original
/// SCID); `conns` holds the actual state keyed by that primary. `icids`
/// disambiguates Initial-phase packets, whose DCID alone isn't yet
/// unique to one connection (several clients could pick the same random
/// DCID before the handshake completes), by also keying on the client's
/// socket address.
#[derive(Default)]
pub struct Listener {
    icids: HashMap<Vec<u8>, ConnectionId>,
    cids: HashMap<ConnectionId, ConnectionId>,
    conns: HashMap<ConnectionId, Conn>,
    local_params_template: TransportParameters,
}

impl Listener {
    pub fn new(local_params_template: TransportParameters) -> Self {
        Self { icids: HashMap::new(), cids: HashMap::new(), conns: HashMap::new(), local_params_template }
    }

    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    /// Every connection's primary key, a stable snapshot for callers that
    /// need to iterate the connection table without holding a borrow on
    /// it (the `quic-server` event loop's send/sweep passes).
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.conns.keys().copied().collect()
    }

    pub fn get(&self, primary_cid: &ConnectionId) -> Option<&Conn> {
        self.conns.get(primary_cid)
    }

    pub fn get_mut(&mut self, primary_cid: &ConnectionId) -> Option<&mut Conn> {
        self.conns.get_mut(primary_cid)
    }

    /// Demux and process every coalesced packet in `datagram` (spec §4.7
    /// step 5: "repeat ... for any further packet sharing the first
    /// packet's DCID"). A datagram whose first packet addresses an
    /// unknown DCID is treated as a new connection's client Initial; any
    /// further packet in the same datagram whose DCID doesn't match the
    /// first is discarded rather than demuxed separately.
    pub fn handle_datagram(
        &mut self,
        datagram: &mut [u8],
        local_cid_len: usize,
        remote_addr: SocketAddr,
    ) -> Result<Option<DatagramOutcome>> {
        let byte0 = *datagram.first().ok_or(QuicError::ShortBuffer)?;
        let first_dcid = peek_dcid(datagram, byte0, local_cid_len)?;

        let primary_cid = match self.resolve_or_create(&first_dcid, datagram, byte0, local_cid_len, remote_addr)? {
            Some(cid) => cid,
            None => return Ok(None),
        };

        let conn = self.conns.get_mut(&primary_cid).expect("just resolved");
        if conn.state.is_draining_or_closed() {
            debug!(cid = ?primary_cid, "dropping datagram for draining/closed connection");
            return Ok(None);
        }
        conn.mark_activity(std::time::Instant::now());

        let mut crypto = Vec::new();
        let mut any_ack_eliciting = false;
        let mut connection_closed = false;
        let mut offset = 0usize;

        while offset < datagram.len() {
            let remaining = &mut datagram[offset..];
            let packet_dcid = peek_dcid(remaining, remaining[0], local_cid_len)?;
            if packet_dcid != first_dcid && offset > 0 {
                break; // non-matching coalesced packet: drop the rest of the datagram
            }

            let mut on_crypto = |level: EncryptionLevel, bytes: &[u8]| {
                crypto.push((level, bytes.to_vec()));
            };
            let (consumed, outcome) = recv::process_one(conn, remaining, local_cid_len, &mut on_crypto)?;
            match outcome {
                PacketOutcome::Processed { ack_eliciting, connection_close } => {
                    conn.stats.record_packet_received();
                    any_ack_eliciting |= ack_eliciting;
                    if let Some(info) = connection_close {
                        info!(cid = ?primary_cid, code = info.error_code, reason = %info.reason, "peer closed connection");
                        conn.enter_draining();
                        connection_closed = true;
                    }
                }
                PacketOutcome::Deferred | PacketOutcome::Dropped => {}
            }
            offset += consumed;
        }

        Ok(Some(DatagramOutcome { primary_cid, crypto, any_ack_eliciting, connection_closed }))
    }

    /// Look up the connection this datagram's first packet belongs to,
    /// creating one if the packet is a client Initial with a DCID this
    /// listener hasn't seen (spec §4.7 step 3/4). Returns `None` for any
    /// packet that cannot be routed (no such connection, not an Initial).
    fn resolve_or_create(
        &mut self,
        first_dcid: &ConnectionId,
        datagram: &[u8],
        byte0: u8,
        local_cid_len: usize,
        remote_addr: SocketAddr,
    ) -> Result<Option<ConnectionId>> {
        if let Some(primary) = self.cids.get(first_dcid) {
            return Ok(Some(*primary));
        }

        if !crate::recv::header::is_long_header(byte0) {
            debug!(dcid = ?first_dcid, "short header packet for unknown connection ID, dropping");
            return Ok(None);
        }
        let header = crate::recv::header::parse_long_header(datagram)?;
        if header.packet_type != crate::recv::header::LongPacketType::Initial {
            debug!(dcid = ?first_dcid, "non-Initial long header for unknown connection, dropping");
            return Ok(None);
        }
        if header.version != QUIC_VERSION_1 {
            warn!(version = header.version, "unsupported QUIC version, dropping");
            return Ok(None);
        }
        if datagram.len() < crate::send::QUIC_INITIAL_PACKET_MINLEN {
            warn!(len = datagram.len(), "client Initial below minimum datagram size, dropping");
            return Ok(None);
        }

        let icid_key = header.dcid.keyed_with(remote_addr);
        if let Some(existing) = self.icids.get(&icid_key) {
            return Ok(Some(*existing));
        }

        let conn = Conn::new_server_conn(
            header.version,
            header.dcid,
            header.scid,
            remote_addr,
            self.local_params_template.clone(),
            local_cid_len,
        );
        let primary_cid = conn.scid;
        info!(dcid = ?header.dcid, scid = ?primary_cid, %remote_addr, "new connection");
        self.icids.insert(icid_key, primary_cid);
        self.cids.insert(primary_cid, primary_cid);
        self.conns.insert(primary_cid, conn);
        Ok(Some(primary_cid))
    }

    /// Make an additional CID this connection issued via NEW_CONNECTION_ID
    /// (spec §4.6 `local_cids`) routable to the same connection.
    pub fn register_cid(&mut self, cid: ConnectionId, primary_cid: ConnectionId) {
        self.cids.insert(cid, primary_cid);
    }

    /// Route every CID the connection keyed by `primary_cid` issued since
    /// the last call (spec §4.12 post-handshake NEW_CONNECTION_ID
    /// issuance). Call once per driver iteration after `Driver::advance`.
    /// A no-op if `primary_cid` names no live connection.
    pub fn register_pending_cids(&mut self, primary_cid: ConnectionId) {
        let Some(conn) = self.conns.get_mut(&primary_cid) else { return };
        let pending = conn.drain_cids_to_register();
        for cid in pending {
            self.cids.insert(cid, primary_cid);
        }
    }

    /// Remove a connection and every CID routing to it (idle timeout or
    /// draining expiry).
    pub fn remove(&mut self, primary_cid: &ConnectionId) {
        if let Some(conn) = self.conns.remove(primary_cid) {
            self.cids.retain(|_, p| p != primary_cid);
            drop(conn);
        }
    }
}

fn peek_dcid(buf: &[u8], byte0: u8, local_cid_len: usize) -> Result<ConnectionId> {
    if crate::recv::header::is_long_header(byte0) {
        let (dcid, _) = ConnectionId::read_long(&buf[1 + 4..])?;
        Ok(dcid)
    } else {
        if buf.len() < 1 + local_cid_len {
            return Err(QuicError::ShortBuffer);
        }
        ConnectionId::from_slice(&buf[1..1 + local_cid_len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_client_initial(dcid: &ConnectionId) -> Vec<u8> {
        let mut datagram = vec![0xc3u8];
        datagram.extend_from_slice(&1u32.to_be_bytes());
        dcid.write_long(&mut datagram);
        ConnectionId::from_slice(&[0xaa; 8]).unwrap().write_long(&mut datagram);
        crate::codec::varint::encode(&mut datagram, 0); // token length
        let remaining_payload = crate::send::QUIC_INITIAL_PACKET_MINLEN - datagram.len() - 2;
        crate::codec::varint::encode(&mut datagram, remaining_payload as u64);
        datagram.resize(datagram.len() + remaining_payload, 0);
        datagram
    }

    #[test]
    fn client_initial_with_unknown_dcid_creates_a_connection() {
        let mut listener = Listener::new(TransportParameters::default());
        let dcid = ConnectionId::from_slice(&[0x83, 0x94, 0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x08]).unwrap();
        let mut datagram = build_client_initial(&dcid);

        let addr = "127.0.0.1:5000".parse().unwrap();
        let outcome = listener.handle_datagram(&mut datagram, 8, addr).unwrap();
        assert!(outcome.is_some());
        assert_eq!(listener.connection_count(), 1);
    }

    #[test]
    fn second_datagram_from_same_dcid_reuses_the_connection() {
        let mut listener = Listener::new(TransportParameters::default());
        let dcid = ConnectionId::from_slice(&[0x83, 0x94, 0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x08]).unwrap();
        let addr = "127.0.0.1:5000".parse().unwrap();

        let mut first = build_client_initial(&dcid);
        listener.handle_datagram(&mut first, 8, addr).unwrap();
        assert_eq!(listener.connection_count(), 1);

        let mut second = build_client_initial(&dcid);
        listener.handle_datagram(&mut second, 8, addr).unwrap();
        assert_eq!(listener.connection_count(), 1, "same client DCID must not spawn a second connection");
    }

    #[test]
    fn registering_a_new_cid_routes_to_the_same_connection() {
        let mut listener = Listener::new(TransportParameters::default());
        let dcid = ConnectionId::from_slice(&[0x83, 0x94, 0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x08]).unwrap();
        let mut datagram = build_client_initial(&dcid);
        let addr = "127.0.0.1:5000".parse().unwrap();
        listener.handle_datagram(&mut datagram, 8, addr).unwrap();
        let primary = *listener.cids.values().next().unwrap();

        let extra = ConnectionId::from_slice(&[0x55; 8]).unwrap();
        listener.register_cid(extra, primary);
        assert!(listener.cids.get(&extra).is_some());
        assert_eq!(listener.connection_count(), 1);
    }
}
