//! # lzmalite
//!
//! A pure Rust encoder for the classic LZMA `.lzma` "alone" format.
//!
//! The crate produces streams any standard LZMA decoder accepts, and adds one
//! capability the usual encoders lack: **destination-size bounding**. Give the
//! encoder a hard output budget and it packs as much input as fits, always
//! leaving a decodable stream behind. That mode is built on a range coder
//! whose byte emission is deferred and checkpointable, so the encoder can
//! speculatively code across the budget boundary and rewind.
//!
//! ## Usage
//!
//! ```ignore
//! use lzmalite::{compress, compress_with_limit};
//!
//! let data = b"Hello, World! Hello, World!";
//!
//! // A complete stream at level 6: 13-byte header plus the coded body.
//! let stream = compress(data, 6)?;
//!
//! // As much of `data` as fits in 64 bytes, end-marker terminated.
//! let (stream, consumed) = compress_with_limit(data, 6, 64)?;
//! ```
//!
//! Levels 0..=9 map to [`EncoderOptions`] defaults; pass hand-tuned options
//! to [`LzmaEncoder`] directly for anything else.
//!
//! ## Stream format
//!
//! An alone stream consists of:
//! 1. Properties byte (`(pb * 5 + lp) * 9 + lc`)
//! 2. Dictionary size (4 bytes, little-endian)
//! 3. Uncompressed size (8 bytes, little-endian; all-ones = unknown, the
//!    stream then ends with an end-of-payload marker)
//! 4. Range-coded data
//!
//! ## Pieces
//!
//! - [`range_coder`]: adaptive binary range coder with a deferred operation
//!   ring and checkpoint/restore
//! - [`model`]: the LZMA probability model and state machine
//! - [`match_finder`]: hash-chain duplicate finder
//! - [`encoder`]: fast parser, symbol emitter and the destination-size
//!   controller
//!
//! Decoding is out of scope; the test suite round-trips through an
//! independent decoder instead.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod encoder;
pub mod match_finder;
pub mod model;
pub mod range_coder;

// Re-exports
pub use encoder::{
    ALONE_HEADER_LEN, DICT_SIZE_MIN, EncoderOptions, LzmaEncoder, compress, compress_with_limit,
};
pub use match_finder::{Match, MatchFinder};
pub use model::{LzmaProperties, State};

pub use lzmalite_core::error::{LzmaError, Result};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_length() {
        // Properties byte + dict size + uncompressed size.
        assert_eq!(ALONE_HEADER_LEN, 1 + 4 + 8);
    }

    #[test]
    fn test_level_defaults_are_valid() {
        for level in 0..=9 {
            let options = EncoderOptions::from_level(level);
            assert!(options.validate().is_ok(), "level {} invalid", level);
            assert!(options.dict_size >= DICT_SIZE_MIN);
        }
    }
}
