//! LZMA probability model.
//!
//! LZMA drives its range coder with context-dependent adaptive probabilities:
//!
//! - Literal coding (context = previous byte bits + position bits)
//! - Match/rep-match selection per coder state
//! - Match length coding
//! - Distance slot, short-distance refinement and alignment coding
//!
//! Every probability lives in one flat arena ([`ProbModel::probs`]) so the
//! deferred range-coder operations can address cells by index while the model
//! keeps a single owner (see [`crate::range_coder`]). The arena starts with a
//! fixed-layout region described by the `*_OFF` constants below, followed by
//! the literal table whose size depends on `lc + lp`.

use crate::range_coder::{PROB_INIT, Prob};
use lzmalite_core::error::{LzmaError, Result};

/// Number of states in the LZMA state machine.
pub const NUM_STATES: usize = 12;

/// Maximum number of position states (`1 << pb` with `pb <= 4`).
pub const POS_STATES_MAX: usize = 1 << 4;

/// Number of remembered rep distances.
pub const NUM_REPS: usize = 4;

/// Minimum length of a match.
pub const MATCH_LEN_MIN: u32 = 2;

/// Maximum length of a match (`2 + 8 + 8 + 256 - 1`).
pub const MATCH_LEN_MAX: u32 = 273;

/// Number of bits in the low/mid length trees.
pub const LEN_LOW_BITS: u32 = 3;
/// Number of symbols in one low/mid length tree.
pub const LEN_LOW_SYMBOLS: u32 = 1 << LEN_LOW_BITS;
/// Number of bits in the high length tree.
pub const LEN_HIGH_BITS: u32 = 8;
/// Number of symbols in the high length tree.
pub const LEN_HIGH_SYMBOLS: usize = 1 << LEN_HIGH_BITS;

/// Number of length states used to select a distance-slot tree.
pub const LEN_TO_POS_STATES: usize = 4;

/// Number of bits in a distance slot.
pub const DIST_SLOT_BITS: u32 = 6;
/// Number of distance slots.
pub const DIST_SLOTS: usize = 1 << DIST_SLOT_BITS;

/// Distances below this value get a refinement bit tree instead of direct
/// bits (`1 << (END_POS_MODEL_INDEX >> 1)`).
pub const FULL_DISTANCES: u32 = 128;
/// First distance coded with extra bits at all.
pub const START_POS_MODEL_INDEX: u32 = 4;

/// Number of alignment bits for far distances.
pub const ALIGN_BITS: u32 = 4;
/// Size of the alignment table.
pub const ALIGN_SIZE: usize = 1 << ALIGN_BITS;
/// Mask extracting the alignment bits of a reduced distance.
pub const ALIGN_MASK: u32 = ALIGN_SIZE as u32 - 1;

/// One length encoder: `low` holds the choice bits and the per-pos-state
/// low/mid trees, `high` the shared 8-bit tree.
pub const LEN_LOW_SIZE: usize = POS_STATES_MAX << (LEN_LOW_BITS as usize + 1);
/// Total cells of one length encoder (low block + high tree).
pub const LEN_ENCODER_SIZE: usize = LEN_LOW_SIZE + LEN_HIGH_SYMBOLS;

// Fixed arena layout. Offsets are in probability cells.
pub(crate) const IS_MATCH_OFF: usize = 0;
pub(crate) const IS_REP_OFF: usize = IS_MATCH_OFF + NUM_STATES * POS_STATES_MAX;
pub(crate) const IS_REP_G0_OFF: usize = IS_REP_OFF + NUM_STATES;
pub(crate) const IS_REP_G1_OFF: usize = IS_REP_G0_OFF + NUM_STATES;
pub(crate) const IS_REP_G2_OFF: usize = IS_REP_G1_OFF + NUM_STATES;
pub(crate) const IS_REP0_LONG_OFF: usize = IS_REP_G2_OFF + NUM_STATES;
pub(crate) const POS_SLOT_OFF: usize = IS_REP0_LONG_OFF + NUM_STATES * POS_STATES_MAX;
pub(crate) const SPEC_POS_OFF: usize = POS_SLOT_OFF + LEN_TO_POS_STATES * DIST_SLOTS;
pub(crate) const ALIGN_OFF: usize = SPEC_POS_OFF + FULL_DISTANCES as usize;
pub(crate) const MATCH_LEN_OFF: usize = ALIGN_OFF + ALIGN_SIZE;
pub(crate) const REP_LEN_OFF: usize = MATCH_LEN_OFF + LEN_ENCODER_SIZE;

// Scratch cells for coding an end marker without touching the live model:
// copies of the two selection flags, the match length encoder, and the
// all-ones paths of the slot and align trees.
pub(crate) const END_FLAGS_OFF: usize = REP_LEN_OFF + LEN_ENCODER_SIZE;
pub(crate) const END_LEN_OFF: usize = END_FLAGS_OFF + 2;
pub(crate) const END_POS_SLOT_OFF: usize = END_LEN_OFF + LEN_ENCODER_SIZE;
pub(crate) const END_ALIGN_OFF: usize = END_POS_SLOT_OFF + DIST_SLOT_BITS as usize;

/// Cells before the literal table.
pub(crate) const FIXED_PROBS: usize = END_ALIGN_OFF + ALIGN_BITS as usize;
/// Start of the literal table.
pub(crate) const LITERAL_OFF: usize = FIXED_PROBS;

/// LZMA state machine state.
///
/// States 0..=6 follow at least one literal, 7..=11 follow a match. The state
/// selects the `isMatch`/`isRep*` contexts and whether a literal is coded
/// against the match byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct State(u8);

impl State {
    /// Initial state.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Get the state value (0..=11).
    pub fn value(self) -> usize {
        self.0 as usize
    }

    /// Check if the previous symbol was a literal.
    pub fn is_literal(self) -> bool {
        self.0 < 7
    }

    /// Update state after a literal.
    pub fn update_literal(&mut self) {
        self.0 = match self.0 {
            0..=3 => 0,
            4..=9 => self.0 - 3,
            _ => self.0 - 6,
        };
        debug_assert!(self.0 < NUM_STATES as u8);
    }

    /// Update state after a normal match.
    pub fn update_match(&mut self) {
        self.0 = if self.0 < 7 { 7 } else { 10 };
    }

    /// Update state after a length-1 rep0 match.
    pub fn update_short_rep(&mut self) {
        self.0 = if self.0 < 7 { 9 } else { 11 };
    }

    /// Update state after a rep match.
    pub fn update_long_rep(&mut self) {
        self.0 = if self.0 < 7 { 8 } else { 11 };
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

/// LZMA literal/position properties (lc, lp, pb).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LzmaProperties {
    /// Literal context bits (0..=8).
    pub lc: u32,
    /// Literal position bits (0..=4).
    pub lp: u32,
    /// Position bits (0..=4).
    pub pb: u32,
}

impl LzmaProperties {
    /// Create new properties.
    pub fn new(lc: u32, lp: u32, pb: u32) -> Self {
        Self { lc, lp, pb }
    }

    /// Check the ranges required by the stream format.
    pub fn validate(&self) -> Result<()> {
        if self.lc > 8 || self.lp > 4 || self.pb > 4 {
            return Err(LzmaError::invalid_properties(self.lc, self.lp, self.pb));
        }
        Ok(())
    }

    /// Parse from the header properties byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        let pb = u32::from(byte) / 45;
        let remaining = u32::from(byte) - pb * 45;
        let lp = remaining / 9;
        let lc = remaining - lp * 9;

        let props = Self { lc, lp, pb };
        props.validate().ok()?;
        Some(props)
    }

    /// Encode to the header properties byte.
    pub fn to_byte(&self) -> u8 {
        ((self.pb * 5 + self.lp) * 9 + self.lc) as u8
    }
}

impl Default for LzmaProperties {
    fn default() -> Self {
        Self {
            lc: 3,
            lp: 0,
            pb: 2,
        }
    }
}

/// All adaptive probabilities of the encoder, plus the derived context masks.
#[derive(Debug, Clone)]
pub(crate) struct ProbModel {
    /// Flat probability arena: fixed region, then the literal table.
    pub probs: Vec<Prob>,
    pub lc: u32,
    pub lp: u32,
    pub pb: u32,
    /// `(1 << pb) - 1`.
    pub pb_mask: u32,
    /// `(0x100 << lp) - (0x100 >> lc)`; see [`ProbModel::literal_base`].
    pub lp_mask: u32,
}

impl ProbModel {
    pub fn new(props: &LzmaProperties) -> Self {
        let mut model = Self {
            probs: Vec::new(),
            lc: 0,
            lp: 0,
            pb: 0,
            pb_mask: 0,
            lp_mask: 0,
        };
        model.reset(props);
        model
    }

    /// Reset every probability to its initial value and apply `props`.
    ///
    /// The literal table is reallocated when `lc + lp` changes.
    pub fn reset(&mut self, props: &LzmaProperties) {
        self.lc = props.lc;
        self.lp = props.lp;
        self.pb = props.pb;
        self.pb_mask = (1 << props.pb) - 1;
        self.lp_mask = (0x100 << props.lp) - (0x100 >> props.lc);

        let total = FIXED_PROBS + (0x300 << (props.lc + props.lp));
        if self.probs.len() != total {
            self.probs = vec![PROB_INIT; total];
        } else {
            self.probs.fill(PROB_INIT);
        }
    }

    #[inline]
    pub fn is_match(&self, state: State, pos_state: u32) -> usize {
        IS_MATCH_OFF + state.value() * POS_STATES_MAX + pos_state as usize
    }

    #[inline]
    pub fn is_rep(&self, state: State) -> usize {
        IS_REP_OFF + state.value()
    }

    #[inline]
    pub fn is_rep_g0(&self, state: State) -> usize {
        IS_REP_G0_OFF + state.value()
    }

    #[inline]
    pub fn is_rep_g1(&self, state: State) -> usize {
        IS_REP_G1_OFF + state.value()
    }

    #[inline]
    pub fn is_rep_g2(&self, state: State) -> usize {
        IS_REP_G2_OFF + state.value()
    }

    #[inline]
    pub fn is_rep0_long(&self, state: State, pos_state: u32) -> usize {
        IS_REP0_LONG_OFF + state.value() * POS_STATES_MAX + pos_state as usize
    }

    #[inline]
    pub fn pos_slot(&self, len_state: u32) -> usize {
        POS_SLOT_OFF + len_state as usize * DIST_SLOTS
    }

    /// Base of the literal sub-table for the given position and previous
    /// byte. The single masked expression extracts `position & ((1<<lp)-1)`
    /// and the top `lc` bits of the previous byte in one step.
    #[inline]
    pub fn literal_base(&self, position: u32, prev_byte: u8) -> usize {
        // Only the bits under lp_mask survive, so the shift may wrap.
        let ctx = ((position.wrapping_shl(8) | u32::from(prev_byte)) & self.lp_mask) << self.lc;
        LITERAL_OFF + 3 * ctx as usize
    }
}

/// Distance slot of a 0-based match distance.
///
/// Slots 0..=3 are the distance itself; above that a slot is the bit length
/// category refined by footer bits.
#[inline]
pub(crate) fn get_pos_slot(dist: u32) -> u32 {
    if dist <= 4 {
        dist
    } else {
        let zz = 31 - dist.leading_zeros();
        (zz << 1) + ((dist >> (zz - 1)) & 1)
    }
}

/// Length state selecting the distance-slot tree.
#[inline]
pub(crate) fn get_len_state(len: u32) -> u32 {
    (len - MATCH_LEN_MIN).min(LEN_TO_POS_STATES as u32 - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        // Literal next-state table from the LZMA specification.
        let expected = [0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 4, 5];
        for (i, &next) in expected.iter().enumerate() {
            let mut state = State(i as u8);
            state.update_literal();
            assert_eq!(state.value(), next, "literal transition from {}", i);
        }

        let mut state = State::new();
        state.update_match();
        assert_eq!(state.value(), 7);
        assert!(!state.is_literal());
        state.update_match();
        assert_eq!(state.value(), 10);

        let mut state = State::new();
        state.update_short_rep();
        assert_eq!(state.value(), 9);
        state.update_short_rep();
        assert_eq!(state.value(), 11);

        let mut state = State::new();
        state.update_long_rep();
        assert_eq!(state.value(), 8);
        state.update_long_rep();
        assert_eq!(state.value(), 11);
    }

    #[test]
    fn test_properties_byte() {
        let props = LzmaProperties::default();
        assert_eq!(props.to_byte(), 0x5D);

        let decoded = LzmaProperties::from_byte(0x5D).unwrap();
        assert_eq!(decoded, props);

        for lc in 0..=8 {
            for lp in 0..=4 {
                for pb in 0..=4 {
                    let props = LzmaProperties::new(lc, lp, pb);
                    assert_eq!(LzmaProperties::from_byte(props.to_byte()), Some(props));
                }
            }
        }
    }

    #[test]
    fn test_properties_validation() {
        assert!(LzmaProperties::new(9, 0, 2).validate().is_err());
        assert!(LzmaProperties::new(3, 5, 2).validate().is_err());
        assert!(LzmaProperties::new(3, 0, 5).validate().is_err());
        assert!(LzmaProperties::new(8, 4, 4).validate().is_ok());
    }

    #[test]
    fn test_pos_slot() {
        // Slots partition distances as [base, base + 2^footer) with
        // base = (2 | (slot & 1)) << ((slot >> 1) - 1).
        let expected = [
            (0, 0),
            (1, 1),
            (2, 2),
            (3, 3),
            (4, 4),
            (5, 4),
            (6, 5),
            (7, 5),
            (8, 6),
            (11, 6),
            (12, 7),
            (96, 13),
            (127, 13),
            (128, 14),
            (191, 14),
            (192, 15),
            (1 << 30, 62),
            (u32::MAX, 63),
        ];
        for (dist, slot) in expected {
            assert_eq!(get_pos_slot(dist), slot, "slot of {}", dist);
        }

        // Consistency with the footer/base reconstruction.
        for dist in 4u32..4096 {
            let slot = get_pos_slot(dist);
            let footer = (slot >> 1) - 1;
            let base = (2 | (slot & 1)) << footer;
            assert!(base <= dist && dist < base + (1 << footer), "dist {}", dist);
        }
    }

    #[test]
    fn test_len_state() {
        assert_eq!(get_len_state(2), 0);
        assert_eq!(get_len_state(3), 1);
        assert_eq!(get_len_state(4), 2);
        assert_eq!(get_len_state(5), 3);
        assert_eq!(get_len_state(273), 3);
    }

    #[test]
    fn test_model_reset() {
        let mut model = ProbModel::new(&LzmaProperties::default());
        assert_eq!(model.probs.len(), FIXED_PROBS + (0x300 << 3));
        assert!(model.probs.iter().all(|&p| p == PROB_INIT));
        assert_eq!(model.pb_mask, 3);
        assert_eq!(model.lp_mask, 0xE0);

        model.probs[IS_REP_OFF] = 77;
        model.reset(&LzmaProperties::new(0, 0, 0));
        assert_eq!(model.probs.len(), FIXED_PROBS + 0x300);
        assert!(model.probs.iter().all(|&p| p == PROB_INIT));
        assert_eq!(model.pb_mask, 0);
        // lc = 0 keeps no previous-byte bits: one literal sub-table.
        assert_eq!(model.lp_mask, 0);
    }

    #[test]
    fn test_literal_base() {
        // Defaults: lc=3, lp=0 selects the top three bits of the previous byte.
        let model = ProbModel::new(&LzmaProperties::default());
        assert_eq!(model.literal_base(0, 0), LITERAL_OFF);
        assert_eq!(model.literal_base(5, 0xFF), LITERAL_OFF + 3 * (7 << 8));
        assert_eq!(model.literal_base(5, 0x40), LITERAL_OFF + 3 * (2 << 8));

        // lp=2: two position bits above the lc bits.
        let model = ProbModel::new(&LzmaProperties::new(3, 2, 2));
        assert_eq!(
            model.literal_base(1, 0),
            LITERAL_OFF + 3 * ((1 << 3) << 8)
        );
        assert_eq!(
            model.literal_base(3, 0xE0),
            LITERAL_OFF + 3 * (((3 << 3) | 7) << 8)
        );
    }

    #[test]
    fn test_arena_layout_is_disjoint() {
        // The end-marker scratch region must sit between the rep length
        // encoder and the literal table.
        assert_eq!(REP_LEN_OFF + LEN_ENCODER_SIZE, END_FLAGS_OFF);
        assert_eq!(END_ALIGN_OFF + ALIGN_BITS as usize, LITERAL_OFF);
        assert!(POS_SLOT_OFF > IS_REP0_LONG_OFF);
    }
}
