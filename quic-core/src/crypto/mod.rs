//! Connection-independent cryptographic primitives: HKDF, AEAD seal/open,
//! and header-protection mask generation (spec §4.2), plus the Initial
//! secret derivation and per-level key schedule that sit directly on top
//! of them (spec §4.3).

pub mod aead;
pub mod header_protection;
pub mod hkdf;
pub mod initial;
pub mod schedule;
pub mod suite;

pub use schedule::LevelSecrets;
pub use suite::CipherSuite;
