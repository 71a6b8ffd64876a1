//! Error types for lzmalite operations.
//!
//! All fallible operations in the workspace return [`Result`]. Errors are
//! plain values; the encoder never panics on bad input or a full output
//! buffer.

use thiserror::Error;

/// The main error type for lzmalite operations.
#[derive(Debug, Error)]
pub enum LzmaError {
    /// Invalid LZMA properties (lc, lp, pb out of range).
    #[error("invalid LZMA properties: lc={lc} lp={lp} pb={pb}")]
    InvalidProperties {
        /// Literal context bits (valid range 0..=8).
        lc: u32,
        /// Literal position bits (valid range 0..=4).
        lp: u32,
        /// Position bits (valid range 0..=4).
        pb: u32,
    },

    /// Destination capacity exhausted.
    ///
    /// The encoder state has been rewound to the last committed checkpoint;
    /// everything written so far is a consistent prefix of the stream.
    #[error("destination capacity exhausted ({capacity} bytes)")]
    NoSpace {
        /// Remaining capacity when the encoder gave up.
        capacity: usize,
    },

    /// The matchfinder ran out of input.
    ///
    /// This is the end-of-stream sentinel the matchfinder returns once every
    /// input position has been consumed; the encode loop absorbs it and it
    /// only escapes to callers that drive the matchfinder directly.
    #[error("no further input available to the matchfinder")]
    EndOfInput,

    /// Dictionary size below the supported minimum.
    #[error("dictionary size {dict_size} is below the minimum of {min} bytes")]
    DictSizeTooSmall {
        /// Requested dictionary size.
        dict_size: u32,
        /// Smallest supported dictionary size.
        min: u32,
    },
}

/// Result type alias for lzmalite operations.
pub type Result<T> = std::result::Result<T, LzmaError>;

impl LzmaError {
    /// Create an invalid properties error.
    pub fn invalid_properties(lc: u32, lp: u32, pb: u32) -> Self {
        Self::InvalidProperties { lc, lp, pb }
    }

    /// Create a capacity exhausted error.
    pub fn no_space(capacity: usize) -> Self {
        Self::NoSpace { capacity }
    }

    /// Create a dictionary size error.
    pub fn dict_size_too_small(dict_size: u32, min: u32) -> Self {
        Self::DictSizeTooSmall { dict_size, min }
    }

    /// Whether this error is the capacity exhausted condition.
    pub fn is_no_space(&self) -> bool {
        matches!(self, Self::NoSpace { .. })
    }
}
