//! Hash-chain matchfinder.
//!
//! Finds duplicated byte runs inside a single contiguous window. A 16-bit
//! exact table catches length-2 matches at the nearest position, a hashed
//! 3-byte chain walked nearest-first supplies the longer candidates. The
//! reported list is sorted by strictly ascending length (and therefore
//! ascending distance), which is what the fast parser expects.
//!
//! The finder runs ahead of the encoder: [`MatchFinder::find`] indexes the
//! head position and advances, while `lookahead` counts positions that have
//! been indexed but not yet coded. `cur - lookahead` is always the encoder's
//! current position.

use crate::model::MATCH_LEN_MAX;
use lzmalite_core::error::{LzmaError, Result};

/// Sentinel for an empty table slot.
const NO_POS: u32 = u32::MAX;

/// Size of the exact 2-byte head table.
const HASH2_SIZE: usize = 1 << 16;

/// Size of the hashed 3-byte head table.
const HASH3_SIZE: usize = 1 << 16;

/// A match candidate reported by the finder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    /// Match length in bytes (2..=273, capped by the remaining input).
    pub len: u32,
    /// 1-based distance: 1 means the immediately preceding byte.
    pub dist: u32,
}

/// Hash-chain matchfinder over one input window.
#[derive(Debug)]
pub struct MatchFinder {
    /// Maximum distance a candidate may span.
    pub dict_size: u32,
    /// A match at least this long ends the search immediately.
    pub nice_len: u32,
    /// Maximum number of chain candidates examined per position.
    pub depth: u32,
    /// Next position to index.
    pub cur: u32,
    /// Positions indexed but not yet consumed by the encoder.
    pub lookahead: u32,
    /// Most recent position per 2-byte value.
    hash2: Vec<u32>,
    /// Most recent position per 3-byte hash.
    hash3: Vec<u32>,
    /// Previous position with the same 3-byte hash, per position.
    chain: Vec<u32>,
}

impl MatchFinder {
    /// Create a finder with the given window and search parameters.
    pub fn new(dict_size: u32, nice_len: u32, depth: u32) -> Self {
        let mut mf = Self {
            dict_size: 0,
            nice_len: 0,
            depth: 0,
            cur: 0,
            lookahead: 0,
            hash2: Vec::new(),
            hash3: Vec::new(),
            chain: Vec::new(),
        };
        mf.reset(dict_size, nice_len, depth);
        mf
    }

    /// Clear all tables and rewind to the start of the window.
    pub fn reset(&mut self, dict_size: u32, nice_len: u32, depth: u32) {
        self.dict_size = dict_size;
        self.nice_len = nice_len.clamp(crate::model::MATCH_LEN_MIN, MATCH_LEN_MAX);
        self.depth = depth.max(1);
        self.cur = 0;
        self.lookahead = 0;
        if self.hash2.len() == HASH2_SIZE {
            self.hash2.fill(NO_POS);
            self.hash3.fill(NO_POS);
        } else {
            self.hash2 = vec![NO_POS; HASH2_SIZE];
            self.hash3 = vec![NO_POS; HASH3_SIZE];
        }
        self.chain.clear();
    }

    /// FNV-style hash of the three bytes at `pos`.
    fn hash3(buf: &[u8], pos: usize) -> usize {
        let mut h = 2166136261u32;
        h ^= u32::from(buf[pos]);
        h = h.wrapping_mul(16777619);
        h ^= u32::from(buf[pos + 1]);
        h = h.wrapping_mul(16777619);
        h ^= u32::from(buf[pos + 2]);
        h = h.wrapping_mul(16777619);
        (h as usize) & (HASH3_SIZE - 1)
    }

    /// Report matches at the head position, then advance past it.
    ///
    /// Matches land in `matches` sorted by strictly ascending length; the
    /// count is returned. Once the window is exhausted this returns
    /// [`LzmaError::EndOfInput`]; `finish` declares that no further input
    /// will ever arrive, which is always the case for the single-window
    /// encoder driving this finder.
    pub fn find(&mut self, buf: &[u8], matches: &mut Vec<Match>, finish: bool) -> Result<usize> {
        matches.clear();
        let pos = self.cur as usize;
        if pos >= buf.len() {
            // Single-window operation: the driver always declares finish.
            debug_assert!(finish);
            return Err(LzmaError::EndOfInput);
        }

        let len_limit = (buf.len() - pos).min(MATCH_LEN_MAX as usize);
        let window = (self.dict_size as usize).min(pos);

        if len_limit >= 2 {
            let mut best = 1usize;

            // Nearest 2-byte candidate; exact table, no verification needed.
            let h2 = usize::from(buf[pos]) | (usize::from(buf[pos + 1]) << 8);
            let cand = self.hash2[h2];
            if cand != NO_POS && pos - cand as usize <= window {
                let cand = cand as usize;
                let len = 2 + match_len(buf, cand + 2, pos + 2, len_limit - 2);
                matches.push(Match {
                    len: len as u32,
                    dist: (pos - cand) as u32,
                });
                best = len;
            }

            // Walk the 3-byte chain nearest-first for longer candidates.
            if best < len_limit && len_limit >= 3 && (best as u32) < self.nice_len {
                let mut cand = self.hash3[Self::hash3(buf, pos)];
                let mut depth = self.depth;
                while cand != NO_POS && depth > 0 {
                    let c = cand as usize;
                    if pos - c > window {
                        break;
                    }
                    // Cheap filters before the full extension.
                    if buf[c + best] == buf[pos + best]
                        && buf[c] == buf[pos]
                        && buf[c + 1] == buf[pos + 1]
                        && buf[c + 2] == buf[pos + 2]
                    {
                        let len = match_len(buf, c, pos, len_limit);
                        if len > best {
                            matches.push(Match {
                                len: len as u32,
                                dist: (pos - c) as u32,
                            });
                            best = len;
                            if best == len_limit || best as u32 >= self.nice_len {
                                break;
                            }
                        }
                    }
                    let next = self.chain[c];
                    debug_assert!(next == NO_POS || next < cand);
                    cand = next;
                    depth -= 1;
                }
            }
        }

        self.insert(buf, pos);
        self.cur += 1;
        self.lookahead += 1;
        Ok(matches.len())
    }

    /// Index `n` positions without reporting matches.
    pub fn skip(&mut self, buf: &[u8], n: u32) {
        for _ in 0..n {
            let pos = self.cur as usize;
            if pos < buf.len() {
                self.insert(buf, pos);
            }
            self.cur += 1;
            self.lookahead += 1;
        }
    }

    /// Add `pos` to the head tables and the chain.
    fn insert(&mut self, buf: &[u8], pos: usize) {
        let remaining = buf.len() - pos;
        if remaining < 2 {
            return;
        }
        let h2 = usize::from(buf[pos]) | (usize::from(buf[pos + 1]) << 8);
        self.hash2[h2] = pos as u32;

        if remaining >= 3 {
            if pos >= self.chain.len() {
                self.chain.resize(pos + 1, NO_POS);
            }
            let h3 = Self::hash3(buf, pos);
            self.chain[pos] = self.hash3[h3];
            self.hash3[h3] = pos as u32;
        }
    }
}

/// Length of the common prefix of `buf[back..]` and `buf[pos..]`, at most
/// `max` bytes.
pub(crate) fn match_len(buf: &[u8], back: usize, pos: usize, max: usize) -> usize {
    let mut len = 0;
    while len < max && buf[back + len] == buf[pos + len] {
        len += 1;
    }
    len
}
