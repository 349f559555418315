//! Store-specific error types.

use std::path::PathBuf;

use thiserror::Error;

use super::codec::CodecError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(
        "corrupt header in {}: declares {declared} records, payload holds {payload_len} bytes",
        path.display()
    )]
    CorruptHeader {
        path: PathBuf,
        declared: usize,
        payload_len: usize,
    },

    #[error("corrupt record {index} in {}: {source}", path.display())]
    CorruptRecord {
        path: PathBuf,
        index: usize,
        #[source]
        source: CodecError,
    },

    #[error("no chain at position {0}")]
    ChainNotFound(usize),

    #[error("invalid chain name: {0}")]
    InvalidName(String),

    #[error("weekly chains need 1 to 7 days per week, got {0}")]
    InvalidMinDays(u8),

    #[error("timestamp {0} is outside years 1 to 9999")]
    InvalidTimestamp(i64),

    #[error("invalid tag: {0}")]
    InvalidTag(String),

    #[error("chain already stopped")]
    AlreadyStopped,

    #[error("chain is not stopped")]
    NotStopped,

    #[error("{what} full (capacity: {max})")]
    CapacityExceeded { what: &'static str, max: usize },
}

impl StoreError {
    /// True for errors caused by what the caller asked for, as opposed to
    /// I/O failures or corrupted files.
    pub fn is_user_error(&self) -> bool {
        !matches!(
            self,
            Self::Io(_) | Self::CorruptHeader { .. } | Self::CorruptRecord { .. }
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
