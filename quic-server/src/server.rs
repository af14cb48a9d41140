//! The UDP event loop (SPEC_FULL §4.12/§5): reads datagrams, demuxes
//! them through [`quic_core::listener::Listener`], drives each
//! connection's TLS handshake and packet-number spaces forward, and
//! drains the TX ring back onto the socket. Mirrors the shape of the
//! teacher's `tcp::listener`/`tcp::handler` accept loop, adapted from a
//! per-connection task model to a single-task UDP demux (QUIC multiplexes
//! many connections over one socket, unlike TCP).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use quic_core::codec::ConnectionId;
use quic_core::conn::Conn;
use quic_core::handshake::Driver;
use quic_core::level::EncryptionLevel;
use quic_core::listener::Listener;
use quic_core::send;
use quic_tls::{build_server_config, RustlsQuicEngine, SecretLog};
use rustls::ServerConfig;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bind failed: {0}")]
    Bind(std::io::Error),
    #[error("socket error: {0}")]
    Socket(std::io::Error),
    #[error(transparent)]
    Quic(#[from] quic_core::error::QuicError),
}

/// Housekeeping cadence for idle-timeout sweeps (SPEC_FULL §4 "idle
/// timeout enforcement"). Independent of any per-connection timer.
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run(config: Arc<Config>) -> Result<(), ServerError> {
    let socket = UdpSocket::bind(config.listen).await.map_err(ServerError::Bind)?;
    info!(addr = %config.listen, "quic listener bound");

    let local_params = config.local_transport_params();
    let mut listener = Listener::new(local_params);
    let mut engines: HashMap<ConnectionId, RustlsQuicEngine> = HashMap::new();

    let tls_config = build_server_config(&config.cert_path, &config.key_path, &config.alpn)?;

    let mut buf = vec![0u8; 65535];
    let mut sweep = interval(IDLE_SWEEP_INTERVAL);

    loop {
        tokio::select! {
            recv = socket.recv_from(&mut buf) => {
                let (len, peer) = recv.map_err(ServerError::Socket)?;
                if let Err(err) = handle_datagram(
                    &mut listener,
                    &mut engines,
                    &tls_config,
                    config.as_ref(),
                    &mut buf[..len],
                    peer,
                ) {
                    warn!(%peer, %err, "failed to process datagram");
                }
                let peers = peer_addrs(&listener);
                flush_sends(&mut listener, &socket, &peers).await;
            }
            _ = sweep.tick() => {
                sweep_idle_connections(&mut listener, &mut engines);
            }
        }
    }
}

fn peer_addrs(listener: &Listener) -> Vec<(ConnectionId, std::net::SocketAddr)> {
    // `Listener` doesn't expose iteration over every live connection's
    // address directly from outside; this helper exists purely to keep
    // `flush_sends` agnostic of listener internals. Built fresh each pass
    // since the connection set can change between sends.
    listener.connection_ids().iter().filter_map(|cid| listener.get(cid).map(|c| (*cid, c.remote_addr))).collect()
}

fn handle_datagram(
    listener: &mut Listener,
    engines: &mut HashMap<ConnectionId, RustlsQuicEngine>,
    tls_config: &Arc<ServerConfig>,
    config: &Config,
    datagram: &mut [u8],
    peer: std::net::SocketAddr,
) -> Result<(), quic_core::error::QuicError> {
    let Some(outcome) = listener.handle_datagram(datagram, config.local_cid_len, peer)? else {
        return Ok(());
    };

    let primary_cid = outcome.primary_cid;
    let engine = match engines.entry(primary_cid) {
        std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
        std::collections::hash_map::Entry::Vacant(e) => {
            let per_conn_secret_log = Arc::new(SecretLog::new());
            let per_conn_config = quic_tls::for_connection(tls_config, per_conn_secret_log.clone());
            let local_params_blob = config.local_transport_params().encode()?;
            e.insert(RustlsQuicEngine::new_server(per_conn_config, local_params_blob, per_conn_secret_log)?)
        }
    };

    let conn = listener.get_mut(&primary_cid).expect("just resolved by handle_datagram");
    drive_handshake(conn, engine, outcome.crypto, config.local_cid_len)?;

    if outcome.connection_closed {
        debug!(cid = ?primary_cid, "removing connection after peer-initiated close");
        listener.remove(&primary_cid);
        engines.remove(&primary_cid);
        return Ok(());
    }

    listener.register_pending_cids(primary_cid);
    let conn = listener.get_mut(&primary_cid).expect("still present");
    send::drive_send(conn)?;
    Ok(())
}

/// Repeatedly feed CRYPTO payloads to the TLS engine and reprocess any
/// packets a level's keys unblocked, until a pass produces nothing new
/// (spec §4.12 steps 1-3, `flush_pending_hp` loop).
fn drive_handshake(
    conn: &mut Conn,
    engine: &mut RustlsQuicEngine,
    mut crypto_in: Vec<(EncryptionLevel, Vec<u8>)>,
    local_cid_len: usize,
) -> Result<(), quic_core::error::QuicError> {
    loop {
        let outcome = Driver::advance(conn, engine, &crypto_in)?;

        if let Some((level, alert)) = outcome.fatal_alert {
            warn!(cid = ?conn.scid, %level, alert, "closing connection after fatal TLS alert");
            close_with_alert(conn, level, alert)?;
            return Ok(());
        }

        if outcome.newly_confirmed {
            info!(cid = ?conn.scid, "connection established");
        }

        let pending = Driver::reprocess_pending(conn, local_cid_len)?;
        if pending.is_empty() {
            break;
        }
        crypto_in = pending;
    }
    Ok(())
}

fn close_with_alert(
    conn: &mut Conn,
    alert_level: EncryptionLevel,
    alert: u8,
) -> Result<(), quic_core::error::QuicError> {
    let code = 0x100u64 + alert as u64;
    for level in [alert_level, EncryptionLevel::Initial, EncryptionLevel::Handshake, EncryptionLevel::Application] {
        if let Some(packet) = send::build_close_packet(conn, level, false, code, "tls alert")? {
            conn.tx_ring.append_packet(&packet)?;
            conn.tx_ring.flush()?;
            conn.enter_draining();
            return Ok(());
        }
    }
    conn.enter_draining();
    Ok(())
}

async fn flush_sends(listener: &mut Listener, socket: &UdpSocket, peers: &[(ConnectionId, std::net::SocketAddr)]) {
    for (cid, addr) in peers {
        let Some(conn) = listener.get_mut(cid) else { continue };
        for datagram in conn.tx_ring.drain_ready() {
            if let Err(err) = socket.send_to(&datagram, addr).await {
                error!(%addr, %err, "udp send failed");
            }
        }
    }
}

fn sweep_idle_connections(listener: &mut Listener, engines: &mut HashMap<ConnectionId, RustlsQuicEngine>) {
    let now = Instant::now();
    for cid in listener.connection_ids() {
        let Some(conn) = listener.get_mut(&cid) else { continue };
        if Driver::check_idle_timeout(conn, now) {
            info!(cid = ?cid, "connection idle timeout");
            listener.remove(&cid);
            engines.remove(&cid);
        }
    }
}
