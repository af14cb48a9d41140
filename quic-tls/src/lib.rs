//! A concrete `quic_core::tls::QuicTlsEngine` backed by `rustls`'s QUIC
//! integration (`rustls::quic`), the way `quic-core`'s TLS-glue boundary
//! (spec §4.10/§6) expects: this crate drives the TLS 1.3 state machine
//! and hands `quic-core` raw per-level traffic secrets plus handshake
//! message bytes; `quic-core` derives packet-protection keys and performs
//! AEAD/header-protection itself.
//!
//! `rustls::quic::Connection` doesn't hand back raw traffic secrets
//! directly (it derives ready-to-use sealer/opener objects internally) —
//! the one stable, public surface that exposes them by label is the
//! `rustls::KeyLog` trait, normally used for `SSLKEYLOGFILE` debugging.
//! [`secret_log::SecretLog`] repurposes it as the bridge between rustls's
//! internal key schedule and `quic-core`'s own HKDF-Expand-Label
//! derivation, keeping AEAD/HP entirely inside `quic-core` as spec'd.

pub mod config;
pub mod engine;
mod secret_log;
mod suite;

pub use config::{build_server_config, for_connection};
pub use engine::RustlsQuicEngine;
pub use secret_log::SecretLog;
