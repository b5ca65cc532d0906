use std::io;

use shakmaty::fen::ParseFenError;
use shakmaty::{Chess, PositionError};
use thiserror::Error;

/// Failures surfaced by the binary codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The stream ended before `expected` bytes could be read.
    #[error("truncated read: expected {expected} bytes, got {read}")]
    Truncated { expected: usize, read: usize },

    #[error("negative length prefix {0}")]
    NegativeLength(i32),

    #[error("string payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// End of stream reached before a single byte of the value was consumed.
    pub fn is_clean_eof(&self) -> bool {
        matches!(self, CodecError::Truncated { read: 0, .. })
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self, CodecError::Truncated { .. })
    }
}

#[derive(Debug, Error)]
pub enum ChessError {
    #[error("invalid FEN: {0}")]
    Fen(#[from] ParseFenError),

    #[error("invalid position: {0}")]
    Position(#[from] PositionError<Chess>),
}
