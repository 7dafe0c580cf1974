//! Error types for melodylink-core

use crate::song::Digest;
use thiserror::Error;

/// Result type alias for melodylink-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in melodylink-core
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The MIDI file could not be parsed
    #[error("MIDI error: {0}")]
    Midi(String),

    /// A sequence without any playable events
    #[error("Sequence contains no events")]
    EmptySequence,

    /// Content bytes did not hash to the claimed digest
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: Digest, actual: Digest },

    /// A wire frame that could not be decoded
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// A wire frame with an unknown message tag
    #[error("Unknown message tag: {0:#04x}")]
    UnknownMessage(u8),

    /// A system exclusive message that is truncated or fails its checksum
    #[error("Invalid system exclusive message: {0}")]
    SysEx(String),

    /// The runtime thread is gone and no longer accepts messages
    #[error("Runtime is not running")]
    RuntimeClosed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}
