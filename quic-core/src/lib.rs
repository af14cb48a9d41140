#![forbid(unsafe_code)]
//! Server-side QUIC v1 transport core: packet protection, packet-number
//! spaces, encryption-level state, and the connection/listener/recv/send
//! machinery that sits on top of them.
//!
//! This crate implements the transport layer only (RFC 9000/9001's wire
//! format and packet-protection rules). It does not speak TLS itself —
//! see the `tls` module for the boundary a concrete TLS engine plugs
//! into.

pub mod codec;
pub mod conn;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod level;
pub mod listener;
pub mod pnspace;
pub mod recv;
pub mod send;
pub mod tls;
pub mod transport_params;

pub use error::{QuicError, Result};
pub use level::EncryptionLevel;
