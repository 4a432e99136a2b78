//! Error types shared across the transport, framer, endpoint and mux layers.

use thiserror::Error;

/// Errors surfaced by the mux core and its collaborators.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A `ByteSource::read_exact` call returned fewer bytes than requested
    /// before hitting EOF. The framer folds this into
    /// `ProtocolError::Truncated` once it's mid-frame; this variant is the
    /// primitive form callers outside the framer (e.g. `Transport::read_byte`)
    /// still raise directly.
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    /// A full packet could not be reassembled.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The peer's effective uid did not map to an allowed identity.
    #[error("credential rejected: effective uid {0}")]
    CredentialRejected(u32),

    /// A per-frame buffer allocation could not be satisfied.
    #[error("resource exhausted: could not allocate {0} bytes")]
    ResourceExhausted(usize),
}

/// Framing-layer failures. `UnknownType` and `Truncated` have different
/// recovery policies depending on which reader observed them (see the
/// mux core and endpoint modules).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown packet type byte 0x{0:02x}")]
    UnknownType(u8),
    #[error("truncated frame")]
    Truncated,
}

pub type Result<T> = std::result::Result<T, Error>;
