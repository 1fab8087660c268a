//! LoRaWAN protocol primitives used by the application server.
//!
//! This crate is intentionally free of I/O. It covers:
//! - identifier and key newtypes with hex (de)serialization
//! - AES-128 / CMAC / RFC 3394 key-wrap helpers and FRMPayload encryption
//! - join-request, rejoin-request and join-accept frames
//! - session, join-server and multicast key derivation
//! - the application-layer packages used for FUOTA (multicast setup,
//!   fragmentation with forward error correction, clock synchronization)
//! - GPS epoch time conversion
pub mod applayer;
pub mod crypto;
pub mod gps;
pub mod keys;
pub mod phy;
mod types;

pub use types::{AES128Key, DevAddr, NetID, EUI64};

use thiserror::Error;

pub type LoRaWANResult<T, E = LoRaWANError> = Result<T, E>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoRaWANError {
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
    #[error("invalid hex value: {0}")]
    InvalidHex(String),
    #[error("unexpected message type: {0:#04x}")]
    InvalidMType(u8),
    #[error("unknown command identifier {cid:#04x}")]
    UnknownCommand { cid: u8 },
    #[error("invalid field value: {0}")]
    InvalidField(String),
    #[error("crypto error: {0}")]
    Crypto(String),
}
