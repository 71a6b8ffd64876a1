//! LZMA compression.
//!
//! This module ties the pieces together: the fast parser turns matchfinder
//! output into literal/match/rep-match symbols, the emitter codes them
//! through the deferred range coder, and the flush controller drains the
//! coder into the output while honoring an optional hard capacity.
//!
//! ## Destination-size bounding
//!
//! With [`LzmaEncoder::set_dest_capacity`] the encoder guarantees the coded
//! body never exceeds the given budget. Pending coder operations are drained
//! once per symbol; as the budget tightens the controller snapshots the coder
//! before each drain, speculatively codes an end marker against scratch
//! probabilities to learn its exact size, and reserves room for it. When a
//! drain would overshoot, the coder is rewound to the snapshot and
//! [`LzmaError::NoSpace`] is returned with everything written so far still a
//! consistent stream prefix.

use crate::match_finder::{Match, MatchFinder, match_len};
use crate::model::{
    ALIGN_BITS, ALIGN_MASK, ALIGN_OFF, DIST_SLOT_BITS, END_ALIGN_OFF, END_FLAGS_OFF, END_LEN_OFF,
    END_POS_SLOT_OFF, FULL_DISTANCES, LEN_ENCODER_SIZE, LEN_HIGH_BITS, LEN_LOW_BITS, LEN_LOW_SIZE,
    LEN_LOW_SYMBOLS, LzmaProperties, MATCH_LEN_MAX, MATCH_LEN_MIN, MATCH_LEN_OFF, NUM_REPS,
    POS_SLOT_OFF, ProbModel, REP_LEN_OFF, SPEC_POS_OFF, START_POS_MODEL_INDEX, State,
    get_len_state, get_pos_slot,
};
use crate::range_coder::{Checkpoint, FLUSH_BYTES, RangeEncoder};
use log::{debug, trace};
use lzmalite_core::error::{LzmaError, Result};

/// Sentinel `back` value marking a literal.
const MARK_LIT: u32 = u32::MAX;

/// Worst-case bytes one symbol can add to the output.
///
/// A symbol codes at most 22 adaptive bits (probabilities are clamped to
/// [31, 2017], so a bit costs at most ~6 output bits) plus 26 direct bits:
/// fewer than 160 bits in total.
const MAX_SYMBOL_BYTES: u32 = 20;

/// Size of the reserved end-marker buffer: one marker plus the coder tail.
const ENDING_MAX: usize = MAX_SYMBOL_BYTES as usize + FLUSH_BYTES;

/// Length of the `.lzma` "alone" header.
pub const ALONE_HEADER_LEN: usize = 13;

/// Smallest dictionary size the encoder accepts.
pub const DICT_SIZE_MIN: u32 = 1 << 12;

/// Unknown uncompressed size in the alone header; the stream is then
/// terminated by an end-of-payload marker.
const UNKNOWN_SIZE: u64 = u64::MAX;

/// Prefer the nearer match unless the farther one is at least 128 times
/// as distant and strictly longer.
#[inline]
fn change_pair(small_dist: u32, big_dist: u32) -> bool {
    (big_dist >> 7) > small_dist
}

/// Everything the encoder needs to know at reset time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderOptions {
    /// Literal/position properties written to the stream header.
    pub props: LzmaProperties,
    /// Sliding-window size a match distance may span.
    pub dict_size: u32,
    /// Match length that stops the search immediately.
    pub nice_len: u32,
    /// Matchfinder chain depth.
    pub depth: u32,
}

impl EncoderOptions {
    /// Default options for a compression level (0..=9, higher values are
    /// clamped).
    ///
    /// Every level keeps `lc=3, lp=0, pb=2`. The window doubles per level
    /// from 64 KiB, and levels 7 and up look for longer matches with a
    /// deeper chain walk.
    pub fn from_level(level: u32) -> Self {
        let level = level.min(9);
        let nice_len = if level < 7 { 32 } else { 64 };
        Self {
            props: LzmaProperties::default(),
            dict_size: DICT_SIZE_MIN << (4 + level),
            nice_len,
            depth: (16 + nice_len / 2) / 2,
        }
    }

    /// Check the property ranges and the dictionary size.
    pub fn validate(&self) -> Result<()> {
        self.props.validate()?;
        if self.dict_size < DICT_SIZE_MIN {
            return Err(LzmaError::dict_size_too_small(self.dict_size, DICT_SIZE_MIN));
        }
        Ok(())
    }
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self::from_level(6)
    }
}

/// One fast-parser decision: `nlits` literals, then a match of `len` bytes
/// (`len == 0` means no match follows).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sequence {
    nlits: u32,
    /// `< 4`: rep slot; `>= 4`: 0-based distance plus 4. Meaningless when
    /// `len == 0`.
    back: u32,
    len: u32,
}

impl Sequence {
    fn literal() -> Self {
        Self {
            nlits: 1,
            back: 0,
            len: 0,
        }
    }
}

/// Bookkeeping for destination-size-bounded output.
#[derive(Debug)]
struct DestSize {
    /// Coder snapshot to rewind to on overflow.
    cp: Checkpoint,
    /// Output length at the snapshot.
    mark: usize,
    /// Remaining body budget in bytes.
    capacity: u32,
    /// Input bytes represented by the drained output.
    committed: u32,
    committed_mark: u32,
    /// Reserved end marker matching the state at the last snapshot.
    ending: [u8; ENDING_MAX],
    esz: usize,
}

impl DestSize {
    fn new(capacity: u32) -> Self {
        Self {
            cp: Checkpoint::default(),
            mark: 0,
            capacity,
            committed: 0,
            committed_mark: 0,
            ending: [0; ENDING_MAX],
            esz: 0,
        }
    }
}

/// LZMA "alone" encoder with a fast parser.
pub struct LzmaEncoder {
    mf: MatchFinder,
    rc: RangeEncoder,
    model: ProbModel,
    out: Vec<u8>,

    state: State,
    /// The four most recent match distances, 1-based, most recent first.
    reps: [u32; NUM_REPS],

    /// Matchfinder output cached across lazy-parser rounds.
    matches: Vec<Match>,
    matches_count: usize,

    need_eopm: bool,
    dst: Option<DestSize>,
    no_space: bool,
}

impl LzmaEncoder {
    /// Create an encoder ready to compress one window of input.
    pub fn new(options: &EncoderOptions) -> Result<Self> {
        options.validate()?;
        let mut encoder = Self {
            mf: MatchFinder::new(options.dict_size, options.nice_len, options.depth),
            rc: RangeEncoder::new(),
            model: ProbModel::new(&options.props),
            out: Vec::new(),
            state: State::new(),
            reps: [1; NUM_REPS],
            matches: Vec::with_capacity(MATCH_LEN_MAX as usize),
            matches_count: 0,
            need_eopm: false,
            dst: None,
            no_space: false,
        };
        encoder.reset(options)?;
        Ok(encoder)
    }

    /// Reset to a fresh stream with the given options.
    ///
    /// Clears any bounded-output configuration; call
    /// [`Self::set_dest_capacity`] again afterwards if needed.
    pub fn reset(&mut self, options: &EncoderOptions) -> Result<()> {
        options.validate()?;
        self.mf
            .reset(options.dict_size, options.nice_len, options.depth);
        self.rc.reset();
        self.model.reset(&options.props);
        self.out.clear();
        self.state = State::new();
        self.reps = [1; NUM_REPS];
        self.matches.clear();
        self.matches_count = 0;
        self.need_eopm = false;
        self.dst = None;
        self.no_space = false;
        debug!(
            "encoder reset: lc={} lp={} pb={} dict_size={} nice_len={} depth={}",
            options.props.lc,
            options.props.lp,
            options.props.pb,
            options.dict_size,
            options.nice_len,
            options.depth
        );
        Ok(())
    }

    /// Bound the coded body to `capacity` bytes.
    pub fn set_dest_capacity(&mut self, capacity: u32) {
        self.dst = Some(DestSize::new(capacity));
    }

    /// Terminate the stream with an end-of-payload marker instead of relying
    /// on a known uncompressed size.
    pub fn set_need_eopm(&mut self, need_eopm: bool) {
        self.need_eopm = need_eopm;
    }

    /// Uncompressed bytes consumed so far.
    pub fn position(&self) -> u32 {
        self.mf.cur - self.mf.lookahead
    }

    /// Encode the whole window.
    ///
    /// Returns `Ok(())` once the input is exhausted. In bounded mode
    /// [`LzmaError::NoSpace`] means the budget ran out; the output kept so
    /// far is a consistent prefix and [`Self::finish`] still produces a
    /// decodable stream when an end marker was reserved.
    pub fn encode(&mut self, input: &[u8]) -> Result<()> {
        loop {
            let seq = match self.optimum_fast(input) {
                Ok(seq) => seq,
                Err(LzmaError::EndOfInput) => return Ok(()),
                Err(err) => return Err(err),
            };
            match self.encode_sequence(input, &seq) {
                Ok(()) => {}
                Err(err @ LzmaError::NoSpace { .. }) => {
                    self.no_space = true;
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Finalize the stream and return the coded body.
    ///
    /// After a clean [`Self::encode`] this drains the last symbol, codes the
    /// end marker if requested and flushes the coder. After `NoSpace` it
    /// instead appends the end marker reserved at the last checkpoint.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        if self.no_space {
            // Symbols coded after the rewind were never drained; the
            // reserved ending matches the checkpointed stream.
            self.rc.discard_pending();
            if let Some(dst) = &self.dst {
                let esz = dst.esz;
                let ending = dst.ending;
                self.out.extend_from_slice(&ending[..esz]);
            }
            return Ok(self.out);
        }
        self.rc.encode(&mut self.model.probs, &mut self.out);
        if self.need_eopm {
            self.encode_eopm();
        }
        self.rc.flush();
        self.rc.encode(&mut self.model.probs, &mut self.out);
        Ok(self.out)
    }

    /// Decide the next symbol(s) from matchfinder output.
    ///
    /// Returns the number of leading literals plus an optional match. The
    /// lazy part keeps deferring by one literal while the next position
    /// offers a strictly better match than the current winner.
    fn optimum_fast(&mut self, input: &[u8]) -> Result<Sequence> {
        let nice_len = self.mf.nice_len;

        let mut matches_count = if self.mf.lookahead == 0 {
            self.mf.find(input, &mut self.matches, true)?
        } else {
            self.matches_count
        };

        let ip = (self.mf.cur - self.mf.lookahead) as usize;

        // Nothing to gain, or not enough input left to code a match.
        if matches_count == 0 || input.len() - ip <= 2 {
            return Ok(Sequence::literal());
        }

        let ilimit = input.len().min(ip + MATCH_LEN_MAX as usize);

        let mut best_replen = 0u32;
        let mut best_rep = 0u32;

        for r in 0..NUM_REPS {
            let repp = ip - self.reps[r] as usize;
            if input[ip..ip + 2] != input[repp..repp + 2] {
                continue;
            }
            let len = (2 + match_len(input, repp + 2, ip + 2, ilimit - ip - 2)) as u32;

            // A rep this long wins outright.
            if len >= nice_len {
                self.mf.skip(input, len - 1);
                return Ok(Sequence {
                    nlits: 0,
                    back: r as u32,
                    len,
                });
            }
            if len > best_replen {
                best_rep = r as u32;
                best_replen = len;
            }
        }

        let mut longest_len = self.matches[matches_count - 1].len;
        let mut longest_back = self.matches[matches_count - 1].dist;
        if longest_len >= nice_len {
            self.mf.skip(input, longest_len - 1);
            return Ok(Sequence {
                nlits: 0,
                back: NUM_REPS as u32 + longest_back - 1,
                len: longest_len,
            });
        }

        // Trade at most one byte of length for a much nearer distance.
        while matches_count > 1 {
            let victim = self.matches[matches_count - 2];
            if longest_len > victim.len + 1 {
                break;
            }
            if !change_pair(victim.dist, longest_back) {
                break;
            }
            matches_count -= 1;
            longest_len = victim.len;
            longest_back = victim.dist;
        }

        if longest_len > best_replen + 1 {
            best_replen = 0;
            // A length-2 match far away costs more than the literal.
            if longest_len < 3 && longest_back > 0x80 {
                return Ok(Sequence::literal());
            }
        } else {
            longest_len = best_replen;
            longest_back = 0;
        }

        let ista = ip;
        let mut ip = ip;
        let mut exhausted = false;

        loop {
            let count = match self.mf.find(input, &mut self.matches, true) {
                Ok(count) => count,
                Err(LzmaError::EndOfInput) => {
                    self.matches_count = 0;
                    exhausted = true;
                    break;
                }
                Err(err) => return Err(err),
            };
            self.matches_count = count;
            if count == 0 {
                break;
            }

            let victim = self.matches[count - 1];

            // Both sides have already paid for the extra literal.
            if victim.len + 1 < longest_len {
                break;
            }

            let mut len;
            if best_replen == 0 {
                // The winner is a normal match; a rep covering almost the
                // same span at the next position beats it, so bail out and
                // emit the literals only.
                let ip1 = ip + 1;
                let rl = (longest_len.max(3) - 1) as usize;
                for r in 0..NUM_REPS {
                    let rep = self.reps[r] as usize;
                    if input[ip1..ip1 + rl] == input[ip1 - rep..ip1 - rep + rl] {
                        return Ok(Sequence {
                            nlits: (ip1 - ista) as u32,
                            back: 0,
                            len: 0,
                        });
                    }
                }
                len = u32::MAX;
            } else {
                len = 0;
            }

            let mut new_rep = best_rep;
            for r in 0..NUM_REPS {
                if self.reps[r] == victim.dist {
                    len = victim.len;
                    new_rep = r as u32;
                    break;
                }
            }

            // A rep winner is only displaced by a longer rep.
            if len <= best_replen {
                break;
            }

            if len == u32::MAX {
                if victim.len + 1 == longest_len && !change_pair(victim.dist, longest_back) {
                    break;
                }
                if victim.len == longest_len
                    && get_pos_slot(victim.dist - 1) >= get_pos_slot(longest_back)
                {
                    break;
                }
                len = 0;
            }

            longest_len = victim.len;
            longest_back = victim.dist;
            best_replen = len;
            best_rep = new_rep;
            ip += 1;
        }

        let back = if best_replen != 0 {
            best_rep
        } else {
            NUM_REPS as u32 + longest_back - 1
        };
        let len = longest_len;
        self.mf.skip(input, len - 2 + u32::from(exhausted));
        Ok(Sequence {
            nlits: (ip - ista) as u32,
            back,
            len,
        })
    }

    fn encode_sequence(&mut self, input: &[u8], seq: &Sequence) -> Result<()> {
        for _ in 0..seq.nlits {
            self.encode_symbol(input, MARK_LIT, 0)?;
        }
        if seq.len == 0 {
            return Ok(());
        }
        self.encode_symbol(input, seq.back, seq.len)
    }

    /// Code one classified symbol and consume its bytes from the lookahead.
    fn encode_symbol(&mut self, input: &[u8], back: u32, len: u32) -> Result<()> {
        self.flush_symbol()?;

        let position = self.position();
        let pos_state = position & self.model.pb_mask;
        let state = self.state;
        let mut len = len;

        if back == MARK_LIT {
            self.rc.bit(self.model.is_match(state, pos_state), 0);
            self.encode_literal(input, position);
            len = 1;
        } else {
            self.rc.bit(self.model.is_match(state, pos_state), 1);
            if back < NUM_REPS as u32 {
                self.rc.bit(self.model.is_rep(state), 1);
                self.encode_rep_match(pos_state, back, len);
            } else {
                self.rc.bit(self.model.is_rep(state), 0);
                self.encode_match(pos_state, back - NUM_REPS as u32, len);
            }
        }

        debug_assert!(self.mf.lookahead >= len);
        self.mf.lookahead -= len;
        Ok(())
    }

    fn encode_literal(&mut self, input: &[u8], position: u32) {
        let pos = position as usize;
        let byte = u32::from(input[pos]);
        let prev_byte = if pos > 0 { input[pos - 1] } else { 0 };
        let probs = self.model.literal_base(position, prev_byte);

        if self.state.is_literal() {
            self.rc.bittree(probs, 8, byte);
        } else {
            // The previous symbol was a match: code against the byte the
            // most recent distance predicts.
            let match_byte = u32::from(input[pos - self.reps[0] as usize]);
            self.encode_literal_matched(probs, match_byte, byte);
        }
        self.state.update_literal();
    }

    /// Matched literal: bits agree with the predicted byte until the first
    /// mismatch, after which `offset` collapses to zero and the remaining
    /// bits use the plain sub-tree.
    fn encode_literal_matched(&mut self, probs: usize, match_byte: u32, symbol: u32) {
        let mut offset = 0x100u32;
        let mut match_byte = match_byte;
        let mut symbol = symbol + 0x100;

        loop {
            match_byte <<= 1;
            let match_bit = match_byte & offset;
            let bit = (symbol >> 7) & 1;
            self.rc
                .bit(probs + (offset + match_bit + (symbol >> 8)) as usize, bit);
            symbol <<= 1;
            offset &= !(match_byte ^ symbol);
            if symbol >= 0x10000 {
                break;
            }
        }
    }

    /// Code a match length against the length encoder at `enc`.
    ///
    /// Lengths 2..=9 take the low tree of the position state, 10..=17 the mid
    /// tree, longer ones the shared 8-bit high tree.
    fn encode_length(&mut self, enc: usize, pos_state: u32, len: u32) {
        let mut sym = len - MATCH_LEN_MIN;
        let mut probs = enc;

        if sym >= LEN_LOW_SYMBOLS {
            self.rc.bit(probs, 1);
            probs += LEN_LOW_SYMBOLS as usize;
            if sym >= LEN_LOW_SYMBOLS * 2 {
                self.rc.bit(probs, 1);
                self.rc
                    .bittree(enc + LEN_LOW_SIZE, LEN_HIGH_BITS, sym - LEN_LOW_SYMBOLS * 2);
                return;
            }
            sym -= LEN_LOW_SYMBOLS;
        }
        self.rc.bit(probs, 0);
        self.rc.bittree(
            probs + ((pos_state as usize) << (LEN_LOW_BITS as usize + 1)),
            LEN_LOW_BITS,
            sym,
        );
    }

    /// Code a normal match with a 0-based distance.
    fn encode_match(&mut self, pos_state: u32, dist: u32, len: u32) {
        let pos_slot = get_pos_slot(dist);

        self.state.update_match();
        self.encode_length(MATCH_LEN_OFF, pos_state, len);
        self.rc.bittree(
            self.model.pos_slot(get_len_state(len)),
            DIST_SLOT_BITS,
            pos_slot,
        );

        if dist >= START_POS_MODEL_INDEX {
            let footer_bits = (pos_slot >> 1) - 1;
            let base = (2 | (pos_slot & 1)) << footer_bits;

            if dist < FULL_DISTANCES {
                self.rc
                    .bittree_reverse(SPEC_POS_OFF + base as usize, footer_bits, dist - base);
            } else {
                let dist_reduced = dist - base;
                self.rc
                    .direct(dist_reduced >> ALIGN_BITS, footer_bits - ALIGN_BITS);
                self.rc
                    .bittree_reverse(ALIGN_OFF, ALIGN_BITS, dist_reduced & ALIGN_MASK);
            }
        }

        self.reps[3] = self.reps[2];
        self.reps[2] = self.reps[1];
        self.reps[1] = self.reps[0];
        // The end marker's pseudo-distance wraps to zero; nothing is coded
        // after it.
        self.reps[0] = dist.wrapping_add(1);
    }

    /// Code a match reusing one of the four remembered distances.
    fn encode_rep_match(&mut self, pos_state: u32, rep: u32, len: u32) {
        let state = self.state;

        if rep == 0 {
            self.rc.bit(self.model.is_rep_g0(state), 0);
            self.rc
                .bit(self.model.is_rep0_long(state, pos_state), u32::from(len != 1));
        } else {
            let distance = self.reps[rep as usize];
            self.rc.bit(self.model.is_rep_g0(state), 1);
            if rep == 1 {
                self.rc.bit(self.model.is_rep_g1(state), 0);
            } else {
                self.rc.bit(self.model.is_rep_g1(state), 1);
                self.rc.bit(self.model.is_rep_g2(state), rep - 2);
                if rep == 3 {
                    self.reps[3] = self.reps[2];
                }
                self.reps[2] = self.reps[1];
            }
            self.reps[1] = self.reps[0];
            self.reps[0] = distance;
        }

        if len == 1 {
            self.state.update_short_rep();
        } else {
            self.encode_length(REP_LEN_OFF, pos_state, len);
            self.state.update_long_rep();
        }
    }

    /// Code the end-of-payload marker into the live stream: a length-2 match
    /// at the impossible distance `0xFFFF_FFFF`.
    fn encode_eopm(&mut self) {
        let pos_state = self.position() & self.model.pb_mask;
        let state = self.state;

        self.rc.bit(self.model.is_match(state, pos_state), 1);
        self.rc.bit(self.model.is_rep(state), 0);
        self.encode_match(pos_state, u32::MAX, MATCH_LEN_MIN);
    }

    /// Code an end marker against scratch copies of the affected
    /// probabilities, leaving the live model untouched. Used to measure the
    /// exact marker size when reserving space.
    fn encode_eopm_stateless(&mut self) {
        let pos_state = self.position() & self.model.pb_mask;
        let state = self.state;

        let is_match = self.model.is_match(state, pos_state);
        let is_rep = self.model.is_rep(state);
        self.model.probs[END_FLAGS_OFF] = self.model.probs[is_match];
        self.model.probs[END_FLAGS_OFF + 1] = self.model.probs[is_rep];
        self.model
            .probs
            .copy_within(MATCH_LEN_OFF..MATCH_LEN_OFF + LEN_ENCODER_SIZE, END_LEN_OFF);

        self.rc.bit(END_FLAGS_OFF, 1);
        self.rc.bit(END_FLAGS_OFF + 1, 0);
        self.encode_length(END_LEN_OFF, pos_state, MATCH_LEN_MIN);

        // Pos-slot 63 is six one-bits along the right spine of the tree.
        for i in 0..DIST_SLOT_BITS as usize {
            self.model.probs[END_POS_SLOT_OFF + i] =
                self.model.probs[POS_SLOT_OFF + (1 << (i + 1)) - 1];
            self.rc.bit(END_POS_SLOT_OFF + i, 1);
        }

        self.rc.direct((1 << 26) - 1, 30 - ALIGN_BITS);

        for i in 0..ALIGN_BITS as usize {
            self.model.probs[END_ALIGN_OFF + i] = self.model.probs[ALIGN_OFF + (1 << (i + 1)) - 1];
            self.rc.bit(END_ALIGN_OFF + i, 1);
        }
    }

    /// Drain the previous symbol's pending operations before coding the next
    /// one.
    fn flush_symbol(&mut self) -> Result<()> {
        if self.rc.pending() != 0 && self.dst.is_some() {
            let safemargin = 5 + (MAX_SYMBOL_BYTES << u32::from(self.need_eopm));
            if self.dst.as_ref().is_some_and(|d| d.capacity < safemargin) {
                return self.flush_symbol_destsize();
            }

            let position = self.position();
            let before = self.out.len();
            self.rc.encode(&mut self.model.probs, &mut self.out);
            let written = (self.out.len() - before) as u32;
            if let Some(dst) = self.dst.as_mut() {
                debug_assert!(written <= dst.capacity);
                dst.capacity = dst.capacity.saturating_sub(written);
                dst.committed = position;
            }
            return Ok(());
        }

        self.rc.encode(&mut self.model.probs, &mut self.out);
        Ok(())
    }

    /// Bounded flush once the remaining budget is below the safety margin.
    ///
    /// Snapshots the coder, drains, and verifies the drained bytes (plus a
    /// freshly measured end marker, when one is required) still fit. On
    /// overflow the coder and output are rewound to the snapshot and the
    /// budget is zeroed.
    fn flush_symbol_destsize(&mut self) -> Result<()> {
        let position = self.position();
        let capacity = match self.dst.as_ref() {
            Some(dst) => dst.capacity,
            None => return Ok(()),
        };
        if capacity < 5 {
            return Err(LzmaError::no_space(capacity as usize));
        }

        let cp = self.rc.checkpoint();
        let mark = self.out.len();
        if let Some(dst) = self.dst.as_mut() {
            dst.cp = cp;
            dst.mark = mark;
            dst.committed_mark = dst.committed;
        }

        self.rc.encode(&mut self.model.probs, &mut self.out);
        let symbols_size = (self.out.len() - mark) as u32;

        if capacity < symbols_size + 5 {
            self.restore_dest();
            return Err(LzmaError::no_space(capacity as usize));
        }

        let mut esz = 0usize;
        if self.need_eopm && capacity < symbols_size + MAX_SYMBOL_BYTES + 5 {
            let cp2 = self.rc.checkpoint();
            self.encode_eopm_stateless();
            self.rc.flush();

            let mut ending = Vec::with_capacity(ENDING_MAX);
            self.rc.encode(&mut self.model.probs, &mut ending);
            esz = ending.len();
            debug_assert!(esz <= ENDING_MAX);

            if capacity < symbols_size + esz as u32 {
                self.restore_dest();
                return Err(LzmaError::no_space(capacity as usize));
            }
            self.rc.restore(&cp2);

            if let Some(dst) = self.dst.as_mut() {
                dst.ending[..esz].copy_from_slice(&ending);
                dst.esz = esz;
            }
            trace!(
                "reserved {}-byte end marker at position {} ({} bytes of budget left)",
                esz,
                position,
                capacity - symbols_size
            );
        }

        if let Some(dst) = self.dst.as_mut() {
            dst.capacity -= symbols_size;
            dst.esz = esz;
            dst.committed = position;
        }
        Ok(())
    }

    /// Rewind coder and output to the last snapshot and end bounded mode.
    fn restore_dest(&mut self) {
        if let Some(dst) = self.dst.as_mut() {
            self.rc.restore(&dst.cp);
            self.out.truncate(dst.mark);
            dst.committed = dst.committed_mark;
            dst.capacity = 0;
        }
    }
}

impl std::fmt::Debug for LzmaEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LzmaEncoder")
            .field("position", &self.position())
            .field("state", &self.state)
            .field("reps", &self.reps)
            .field("need_eopm", &self.need_eopm)
            .field("bounded", &self.dst.is_some())
            .finish_non_exhaustive()
    }
}

fn write_alone_header(out: &mut Vec<u8>, options: &EncoderOptions, unpacked_size: u64) {
    out.push(options.props.to_byte());
    out.extend_from_slice(&options.dict_size.to_le_bytes());
    out.extend_from_slice(&unpacked_size.to_le_bytes());
}

/// Compress `data` into a complete `.lzma` "alone" stream.
///
/// `level` selects the [`EncoderOptions::from_level`] defaults. The header
/// carries the exact uncompressed size, so no end marker is coded.
pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let options = EncoderOptions::from_level(level);
    let mut encoder = LzmaEncoder::new(&options)?;

    let mut out = Vec::with_capacity(ALONE_HEADER_LEN + data.len() / 2 + 64);
    write_alone_header(&mut out, &options, data.len() as u64);

    encoder.encode(data)?;
    out.extend_from_slice(&encoder.finish()?);
    Ok(out)
}

/// Compress as much of `data` as fits into `max_len` total output bytes.
///
/// The stream uses an unknown-size header and is terminated by an
/// end-of-payload marker, so any committed prefix decodes cleanly. Returns
/// the stream and the number of input bytes it represents.
pub fn compress_with_limit(
    data: &[u8],
    level: u32,
    max_len: usize,
) -> Result<(Vec<u8>, usize)> {
    if max_len < ALONE_HEADER_LEN + FLUSH_BYTES {
        return Err(LzmaError::no_space(max_len));
    }
    let capacity = (max_len - ALONE_HEADER_LEN).min(u32::MAX as usize) as u32;

    let options = EncoderOptions::from_level(level);
    let mut encoder = LzmaEncoder::new(&options)?;
    encoder.set_need_eopm(true);
    encoder.set_dest_capacity(capacity);

    match encoder.encode(data) {
        Ok(()) => {}
        Err(LzmaError::NoSpace { .. }) => {}
        Err(err) => return Err(err),
    }

    let consumed = if encoder.no_space {
        // Without a reserved marker the truncated body is not decodable.
        if encoder.dst.as_ref().is_none_or(|d| d.esz == 0) {
            return Err(LzmaError::no_space(max_len));
        }
        encoder.dst.as_ref().map_or(0, |d| d.committed) as usize
    } else {
        data.len()
    };

    let mut out = Vec::with_capacity(ALONE_HEADER_LEN + capacity as usize);
    write_alone_header(&mut out, &options, UNKNOWN_SIZE);
    out.extend_from_slice(&encoder.finish()?);
    debug_assert!(out.len() <= max_len);
    Ok((out, consumed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_options() -> EncoderOptions {
        EncoderOptions {
            props: LzmaProperties::default(),
            dict_size: 1 << 16,
            nice_len: 32,
            depth: 16,
        }
    }

    /// Reproducible pseudo-random bytes.
    fn lcg_bytes(n: usize, mut seed: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity(n);
        for _ in 0..n {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            data.push((seed >> 32) as u8);
        }
        data
    }

    #[test]
    fn test_options_from_level() {
        let fast = EncoderOptions::from_level(0);
        assert_eq!(fast.dict_size, 1 << 16);
        assert_eq!(fast.nice_len, 32);
        assert_eq!(fast.depth, 16);

        let best = EncoderOptions::from_level(9);
        assert_eq!(best.dict_size, 1 << 25);
        assert_eq!(best.nice_len, 64);
        assert_eq!(best.depth, 24);

        // The window doubles per level; out-of-range levels clamp.
        assert_eq!(EncoderOptions::from_level(5).dict_size, 1 << 21);
        assert_eq!(EncoderOptions::from_level(99), best);
    }

    #[test]
    fn test_invalid_properties_rejected() {
        let mut options = test_options();
        options.props = LzmaProperties::new(9, 0, 2);
        assert!(LzmaEncoder::new(&options).is_err());
    }

    #[test]
    fn test_tiny_dictionary_rejected() {
        let mut options = test_options();
        options.dict_size = DICT_SIZE_MIN - 1;
        assert!(matches!(
            LzmaEncoder::new(&options),
            Err(LzmaError::DictSizeTooSmall { .. })
        ));
        assert!(EncoderOptions::from_level(0).validate().is_ok());
    }

    #[test]
    fn test_rep_ring_rotation() {
        let mut encoder = LzmaEncoder::new(&test_options()).unwrap();

        encoder.reps = [5, 9, 13, 17];
        encoder.encode_rep_match(0, 2, 3);
        assert_eq!(encoder.reps, [13, 5, 9, 17]);

        encoder.reps = [5, 9, 13, 17];
        encoder.encode_rep_match(0, 3, 3);
        assert_eq!(encoder.reps, [17, 5, 9, 13]);

        encoder.reps = [5, 9, 13, 17];
        encoder.encode_rep_match(0, 1, 3);
        assert_eq!(encoder.reps, [9, 5, 13, 17]);

        // rep0 keeps the ring as-is.
        encoder.reps = [5, 9, 13, 17];
        encoder.encode_rep_match(0, 0, 1);
        assert_eq!(encoder.reps, [5, 9, 13, 17]);
    }

    #[test]
    fn test_rep_state_transitions() {
        let mut encoder = LzmaEncoder::new(&test_options()).unwrap();

        encoder.encode_rep_match(0, 0, 1);
        assert_eq!(encoder.state.value(), 9, "short rep from a literal state");

        let mut encoder = LzmaEncoder::new(&test_options()).unwrap();
        encoder.encode_rep_match(0, 0, 4);
        assert_eq!(encoder.state.value(), 8, "long rep from a literal state");
    }

    #[test]
    fn test_match_updates_rep_ring() {
        let mut encoder = LzmaEncoder::new(&test_options()).unwrap();
        encoder.reps = [5, 9, 13, 17];
        encoder.encode_match(0, 41, 4);
        assert_eq!(encoder.reps, [42, 5, 9, 13]);
        assert_eq!(encoder.state.value(), 7);
    }

    #[test]
    fn test_stateless_eopm_leaves_model_untouched() {
        let mut encoder = LzmaEncoder::new(&test_options()).unwrap();
        let before = encoder.model.probs.clone();

        encoder.encode_eopm_stateless();
        encoder.rc.flush();
        let mut sink = Vec::new();
        encoder.rc.encode(&mut encoder.model.probs, &mut sink);

        assert!(!sink.is_empty());
        assert_eq!(
            &encoder.model.probs[..END_FLAGS_OFF],
            &before[..END_FLAGS_OFF],
            "live probabilities must not adapt during the speculative marker"
        );
    }

    #[test]
    fn test_parser_consumes_exactly_the_input() {
        let inputs: [&[u8]; 4] = [
            b"abcde",
            b"HABEABDABABABHHHEAAAAAAAA",
            b"abcde_bcdefgh_abcdefghxxxxxxx",
            &[0u8; 300],
        ];
        for input in inputs {
            let mut encoder = LzmaEncoder::new(&test_options()).unwrap();
            let mut consumed = 0u32;
            loop {
                let seq = match encoder.optimum_fast(input) {
                    Ok(seq) => seq,
                    Err(LzmaError::EndOfInput) => break,
                    Err(err) => panic!("unexpected error: {err}"),
                };
                assert!(
                    seq.len == 0 || (MATCH_LEN_MIN..=MATCH_LEN_MAX).contains(&seq.len),
                    "bad length {}",
                    seq.len
                );
                consumed += seq.nlits + seq.len;
                encoder.encode_sequence(input, &seq).unwrap();
            }
            assert_eq!(consumed as usize, input.len());
            assert_eq!(encoder.position() as usize, input.len());
        }
    }

    #[test]
    fn test_parser_emits_rep_match_for_runs() {
        let input = b"HABEABDABABABHHHEAAAAAAAA";
        let mut encoder = LzmaEncoder::new(&test_options()).unwrap();
        let mut saw_rep = false;
        loop {
            let seq = match encoder.optimum_fast(input) {
                Ok(seq) => seq,
                Err(LzmaError::EndOfInput) => break,
                Err(err) => panic!("unexpected error: {err}"),
            };
            if seq.len != 0 && seq.back < NUM_REPS as u32 {
                saw_rep = true;
            }
            encoder.encode_sequence(input, &seq).unwrap();
        }
        assert!(saw_rep, "the AAAAAAAA run should reuse a recent distance");
    }

    #[test]
    fn test_parser_emits_normal_match() {
        let input = b"abcde_bcdefgh_abcdefghxxxxxxx";
        let mut encoder = LzmaEncoder::new(&test_options()).unwrap();
        let mut saw_match = false;
        loop {
            let seq = match encoder.optimum_fast(input) {
                Ok(seq) => seq,
                Err(LzmaError::EndOfInput) => break,
                Err(err) => panic!("unexpected error: {err}"),
            };
            if seq.len != 0 && seq.back >= NUM_REPS as u32 {
                saw_match = true;
            }
            encoder.encode_sequence(input, &seq).unwrap();
        }
        assert!(saw_match);
    }

    #[test]
    fn test_compress_is_deterministic() {
        let data = lcg_bytes(4096, 0x1234_5678_9ABC_DEF0);
        let a = compress(&data, 6).unwrap();
        let b = compress(&data, 6).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_run_compresses_tightly() {
        // One literal plus rep matches with high-branch lengths.
        let out = compress(&[0u8; 4096], 6).unwrap();
        assert!(out.len() < 64, "4096 zeros took {} bytes", out.len());
    }

    #[test]
    fn test_bounded_encode_reports_no_space() {
        let data = lcg_bytes(25, 42);
        let options = test_options();
        let mut encoder = LzmaEncoder::new(&options).unwrap();
        encoder.set_need_eopm(true);
        encoder.set_dest_capacity(9);

        let err = encoder.encode(&data).unwrap_err();
        assert!(err.is_no_space());

        let committed = encoder.dst.as_ref().unwrap().committed;
        assert!(committed < data.len() as u32);

        let body = encoder.finish().unwrap();
        assert!(body.len() <= 9, "body of {} bytes exceeds capacity", body.len());
    }

    #[test]
    fn test_bounded_encode_fits_when_capacity_is_plenty() {
        let data = b"abcabcabcabc";
        let mut encoder = LzmaEncoder::new(&test_options()).unwrap();
        encoder.set_need_eopm(true);
        encoder.set_dest_capacity(4096);
        encoder.encode(data).unwrap();
        let body = encoder.finish().unwrap();
        assert!(!body.is_empty());
        assert!(body.len() <= 4096);
    }

    #[test]
    fn test_compress_with_limit_tiny_budget() {
        assert!(compress_with_limit(b"abc", 6, 10).is_err());
    }
}
