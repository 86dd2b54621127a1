//! Error types for the STTP engine.
//!
//! Strongly-typed errors per layer: key configuration and persistence
//! (`KeyError`) and the two protocol directions (`SendError`,
//! `ReceiveError`). Nothing in the engine panics or terminates the process;
//! every failure is a recoverable result value for the caller.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors from key-material configuration, loading, and persistence.
#[derive(Debug, Error)]
pub enum KeyError {
    /// Builder was given a size that cannot derive a valid key layout
    #[error("invalid size: {reason}")]
    InvalidSize {
        /// Which constraint the requested size violated
        reason: &'static str,
    },

    /// Key file cannot hold a digest plus at least one message byte
    #[error("key file too small: {len} bytes, need more than {min}")]
    KeyTooSmall {
        /// Length of the rejected key file
        len: u64,
        /// Minimum exclusive bound (the digest length)
        min: usize,
    },

    /// Key file exceeds the fixed buffer limit
    #[error("key file too large: {len} bytes, limit {max}")]
    KeyTooLarge {
        /// Length of the rejected key file
        len: u64,
        /// Maximum allowed key length
        max: usize,
    },

    /// Backing path exists but is a directory
    #[error("not a file: {path}")]
    NotAFile {
        /// The offending path
        path: PathBuf,
    },

    /// `save()` called with no backing file associated
    #[error("no backing file set for key material")]
    NoBackingFile,

    /// Underlying file I/O failure
    #[error("key file I/O: {0}")]
    Io(#[from] io::Error),
}

impl KeyError {
    /// Returns true if this error is a configuration mistake (fixable by the
    /// caller) rather than an environmental I/O failure.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidSize { .. }
                | Self::KeyTooSmall { .. }
                | Self::KeyTooLarge { .. }
                | Self::NotAFile { .. }
                | Self::NoBackingFile
        )
    }
}

/// Errors from sending a message through the tunnel.
#[derive(Debug, Error)]
pub enum SendError {
    /// Transport write or flush failed mid-message
    #[error("send failed after {chests_sent} chests: {source}")]
    Io {
        /// Chests fully written before the failure
        chests_sent: usize,
        /// The underlying transport error
        #[source]
        source: io::Error,
    },

    /// Message length does not fit the 4-byte length header
    #[error("message too large for length header: {len} bytes, limit {max}")]
    MessageTooLarge {
        /// Length of the rejected message
        len: usize,
        /// Maximum length the header can carry
        max: u32,
    },
}

/// Errors from receiving a message through the tunnel.
#[derive(Debug, Error)]
pub enum ReceiveError {
    /// Transport read failed (short read on header or chest data)
    #[error("receive failed: {source}")]
    Io {
        /// The underlying transport error
        #[source]
        source: io::Error,
    },

    /// Chest digest did not match its payload: tampering, transport noise,
    /// or a desynchronized key. No partial message is returned.
    #[error("chest {chest}/{total} failed integrity check: corrupted data or wrong key")]
    Corrupted {
        /// 1-based index of the failing chest
        chest: usize,
        /// Total chests in the message
        total: usize,
    },
}

impl ReceiveError {
    /// Returns true if the failure indicates corrupted data or a wrong key,
    /// as opposed to a transport-level read failure.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupted { .. })
    }
}

impl From<io::Error> for ReceiveError {
    fn from(source: io::Error) -> Self {
        Self::Io { source }
    }
}
