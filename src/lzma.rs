use crate::{
    dict::Dictionary,
    range_dec::{RangeDecoder, PROB_INIT},
    state::{State, STATES},
    Result,
};

const POS_STATES_MAX: usize = 1 << 4;

const MATCH_LEN_MIN: usize = 2;
const LOW_SYMBOLS: usize = 1 << 3;
const MID_SYMBOLS: usize = 1 << 3;
const HIGH_SYMBOLS: usize = 1 << 8;

const DIST_STATES: usize = 4;
const DIST_SLOTS: usize = 1 << 6;
const DIST_MODEL_START: u32 = 4;
const DIST_MODEL_END: u32 = 14;

const ALIGN_BITS: u32 = 4;
const ALIGN_SIZE: usize = 1 << ALIGN_BITS;

// The reverse bit-trees for slots 4..14 share one flat table; these are the
// per-slot subranges (tree sizes 2, 2, 4, 4, 8, 8, 16, 16, 32, 32).
const DIST_SPECIAL_INDEX: [usize; 10] = [0, 2, 4, 8, 12, 20, 28, 44, 60, 92];
const DIST_SPECIAL_END: [usize; 10] = [2, 4, 8, 12, 20, 28, 44, 60, 92, 124];

#[inline(always)]
fn init_probs(probs: &mut [u16]) {
    probs.fill(PROB_INIT);
}

/// Distance-slot context selected by the match length.
#[inline(always)]
fn dist_state(len: u32) -> usize {
    if (len as usize) < DIST_STATES + MATCH_LEN_MIN {
        len as usize - MATCH_LEN_MIN
    } else {
        DIST_STATES - 1
    }
}

/// The LZMA decoding engine: state machine, probability contexts and the
/// literal/match/rep decoders, writing decoded bytes into a [`Dictionary`]
/// through bits pulled from a [`RangeDecoder`].
pub(crate) struct LzmaDecoder {
    pos_mask: u32,
    reps: [u32; 4],
    state: State,
    is_match: [[u16; POS_STATES_MAX]; STATES],
    is_rep: [u16; STATES],
    is_rep0: [u16; STATES],
    is_rep1: [u16; STATES],
    is_rep2: [u16; STATES],
    is_rep0_long: [[u16; POS_STATES_MAX]; STATES],
    dist_slots: [[u16; DIST_SLOTS]; DIST_STATES],
    dist_special: [u16; 124],
    dist_align: [u16; ALIGN_SIZE],
    literal: LiteralDecoder,
    match_len: LengthDecoder,
    rep_len: LengthDecoder,
}

impl LzmaDecoder {
    /// `lc`, `lp` and `pb` must already be validated by the caller.
    pub(crate) fn new(lc: u32, lp: u32, pb: u32) -> Self {
        let mut decoder = Self {
            pos_mask: (1 << pb) - 1,
            reps: [0; 4],
            state: State::default(),
            is_match: [[PROB_INIT; POS_STATES_MAX]; STATES],
            is_rep: [PROB_INIT; STATES],
            is_rep0: [PROB_INIT; STATES],
            is_rep1: [PROB_INIT; STATES],
            is_rep2: [PROB_INIT; STATES],
            is_rep0_long: [[PROB_INIT; POS_STATES_MAX]; STATES],
            dist_slots: [[PROB_INIT; DIST_SLOTS]; DIST_STATES],
            dist_special: [PROB_INIT; 124],
            dist_align: [PROB_INIT; ALIGN_SIZE],
            literal: LiteralDecoder::new(lc, lp),
            match_len: LengthDecoder::new(),
            rep_len: LengthDecoder::new(),
        };
        decoder.reset();
        decoder
    }

    /// Resets the coder state, rep history and every probability counter.
    pub(crate) fn reset(&mut self) {
        self.reps = [0; 4];
        self.state.reset();
        for probs in self.is_match.iter_mut() {
            init_probs(probs);
        }
        init_probs(&mut self.is_rep);
        init_probs(&mut self.is_rep0);
        init_probs(&mut self.is_rep1);
        init_probs(&mut self.is_rep2);
        for probs in self.is_rep0_long.iter_mut() {
            init_probs(probs);
        }
        for probs in self.dist_slots.iter_mut() {
            init_probs(probs);
        }
        init_probs(&mut self.dist_special);
        init_probs(&mut self.dist_align);
        self.literal.reset();
        self.match_len.reset();
        self.rep_len.reset();
    }

    /// Decodes packets until the dictionary limit is reached.
    pub(crate) fn decode(&mut self, dict: &mut Dictionary, rc: &mut RangeDecoder) -> Result<()> {
        dict.repeat_pending()?;

        while dict.has_space() {
            let pos_state = dict.pos() as u32 & self.pos_mask;
            let state = self.state.get();

            if rc.decode_bit(&mut self.is_match[state][pos_state as usize])? == 0 {
                self.decode_literal(dict, rc)?;
            } else {
                let len = if rc.decode_bit(&mut self.is_rep[state])? == 0 {
                    self.decode_match(pos_state, rc)?
                } else {
                    self.decode_rep_match(pos_state, rc)?
                };
                dict.repeat(self.reps[0] as usize, len as usize)?;
            }
        }

        rc.normalize()
    }

    fn decode_literal(&mut self, dict: &mut Dictionary, rc: &mut RangeDecoder) -> Result<()> {
        let index = self.literal.sub_index(dict.get_byte(0) as u32, dict.pos() as u32);
        let probs = &mut self.literal.subs[index].probs;

        let mut symbol: u32 = 1;
        if self.state.is_literal_state() {
            while symbol < 0x100 {
                symbol = (symbol << 1) | rc.decode_bit(&mut probs[symbol as usize])?;
            }
        } else {
            // After a match, each bit is predicted against the matching bit
            // of the byte at the last match distance, until they diverge.
            let mut match_byte = dict.get_byte(self.reps[0] as usize) as u32;
            let mut offset: u32 = 0x100;
            while symbol < 0x100 {
                match_byte <<= 1;
                let match_bit = match_byte & offset;
                let bit = rc.decode_bit(&mut probs[(offset + match_bit + symbol) as usize])?;
                symbol = (symbol << 1) | bit;
                if bit != 0 {
                    offset &= match_bit;
                } else {
                    offset &= !match_bit;
                }
            }
        }

        dict.put_byte(symbol as u8);
        self.state.update_literal();
        Ok(())
    }

    fn decode_match(&mut self, pos_state: u32, rc: &mut RangeDecoder) -> Result<u32> {
        self.state.update_match();
        self.reps[3] = self.reps[2];
        self.reps[2] = self.reps[1];
        self.reps[1] = self.reps[0];

        let len = self.match_len.decode(pos_state as usize, rc)?;
        let slot = rc.decode_bit_tree(&mut self.dist_slots[dist_state(len)])?;

        if slot < DIST_MODEL_START {
            self.reps[0] = slot;
        } else {
            let limit = (slot >> 1) - 1;
            let mut dist = (2 | (slot & 1)) << limit;
            if slot < DIST_MODEL_END {
                let sub = (slot - DIST_MODEL_START) as usize;
                let probs = &mut self.dist_special[DIST_SPECIAL_INDEX[sub]..DIST_SPECIAL_END[sub]];
                dist |= rc.decode_reverse_bit_tree(probs)?;
            } else {
                dist |= rc.decode_direct_bits(limit - ALIGN_BITS)? << ALIGN_BITS;
                dist |= rc.decode_reverse_bit_tree(&mut self.dist_align)?;
            }
            self.reps[0] = dist;
        }

        Ok(len)
    }

    fn decode_rep_match(&mut self, pos_state: u32, rc: &mut RangeDecoder) -> Result<u32> {
        let state = self.state.get();
        if rc.decode_bit(&mut self.is_rep0[state])? == 0 {
            if rc.decode_bit(&mut self.is_rep0_long[state][pos_state as usize])? == 0 {
                self.state.update_short_rep();
                return Ok(1);
            }
        } else {
            let dist;
            if rc.decode_bit(&mut self.is_rep1[state])? == 0 {
                dist = self.reps[1];
            } else {
                if rc.decode_bit(&mut self.is_rep2[state])? == 0 {
                    dist = self.reps[2];
                } else {
                    dist = self.reps[3];
                    self.reps[3] = self.reps[2];
                }
                self.reps[2] = self.reps[1];
            }
            self.reps[1] = self.reps[0];
            self.reps[0] = dist;
        }

        self.state.update_long_rep();
        self.rep_len.decode(pos_state as usize, rc)
    }
}

struct LiteralDecoder {
    lc: u32,
    literal_pos_mask: u32,
    subs: Vec<LiteralSubDecoder>,
}

#[derive(Clone)]
struct LiteralSubDecoder {
    probs: [u16; 0x300],
}

impl LiteralDecoder {
    fn new(lc: u32, lp: u32) -> Self {
        Self {
            lc,
            literal_pos_mask: (1 << lp) - 1,
            subs: vec![
                LiteralSubDecoder {
                    probs: [PROB_INIT; 0x300]
                };
                1 << (lc + lp)
            ],
        }
    }

    fn reset(&mut self) {
        for sub in self.subs.iter_mut() {
            init_probs(&mut sub.probs);
        }
    }

    /// Selects the sub-table from the previous byte's high `lc` bits and
    /// the low `lp` bits of the write position.
    #[inline(always)]
    fn sub_index(&self, prev_byte: u32, pos: u32) -> usize {
        let low = prev_byte >> (8 - self.lc);
        let high = (pos & self.literal_pos_mask) << self.lc;
        (low + high) as usize
    }
}

/// Three-tier length decoder: 2..9 via the low tree, 10..17 via the mid
/// tree, 18..273 via the high tree. One instance for new matches, one for
/// repeated matches.
struct LengthDecoder {
    choice: [u16; 2],
    low: [[u16; LOW_SYMBOLS]; POS_STATES_MAX],
    mid: [[u16; MID_SYMBOLS]; POS_STATES_MAX],
    high: [u16; HIGH_SYMBOLS],
}

impl LengthDecoder {
    fn new() -> Self {
        Self {
            choice: [PROB_INIT; 2],
            low: [[PROB_INIT; LOW_SYMBOLS]; POS_STATES_MAX],
            mid: [[PROB_INIT; MID_SYMBOLS]; POS_STATES_MAX],
            high: [PROB_INIT; HIGH_SYMBOLS],
        }
    }

    fn reset(&mut self) {
        init_probs(&mut self.choice);
        for probs in self.low.iter_mut() {
            init_probs(probs);
        }
        for probs in self.mid.iter_mut() {
            init_probs(probs);
        }
        init_probs(&mut self.high);
    }

    fn decode(&mut self, pos_state: usize, rc: &mut RangeDecoder) -> Result<u32> {
        if rc.decode_bit(&mut self.choice[0])? == 0 {
            return Ok(rc.decode_bit_tree(&mut self.low[pos_state])? + MATCH_LEN_MIN as u32);
        }
        if rc.decode_bit(&mut self.choice[1])? == 0 {
            return Ok(rc.decode_bit_tree(&mut self.mid[pos_state])?
                + (MATCH_LEN_MIN + LOW_SYMBOLS) as u32);
        }
        Ok(rc.decode_bit_tree(&mut self.high)? + (MATCH_LEN_MIN + LOW_SYMBOLS + MID_SYMBOLS) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DICT_SIZE_MIN;

    #[test]
    fn decodes_a_raw_lzma_stream() {
        // "Hello, world!" coded with lc=3, lp=0, pb=2; initialization byte,
        // four code bytes, then the coded payload including an end marker
        // that the 13-byte output limit stops short of.
        let payload: &[u8] = &[
            0, 36, 25, 73, 152, 111, 22, 2, 140, 232, 230, 91, 177, 71, 198, 206, 183, 99, 255,
            255, 60, 172, 0, 0,
        ];

        let mut rc = RangeDecoder::new(payload.len());
        rc.prepare(&mut &payload[..], payload.len()).unwrap();

        let mut dict = Dictionary::new(DICT_SIZE_MIN).unwrap();
        dict.set_limit(13);

        let mut lzma = LzmaDecoder::new(3, 0, 2);
        lzma.decode(&mut dict, &mut rc).unwrap();

        let mut out = [0u8; 16];
        let produced = dict.flush(&mut out, 0);
        assert_eq!(&out[..produced], b"Hello, world!");
    }

    #[test]
    fn length_decoder_tiers_cover_the_full_range() {
        // All-zero coded input decodes the shortest symbol of every tree.
        let payload = [0u8; 32];
        let mut rc = RangeDecoder::new(payload.len());
        rc.prepare(&mut &payload[..], payload.len()).unwrap();

        let mut lengths = LengthDecoder::new();
        let len = lengths.decode(0, &mut rc).unwrap();
        assert_eq!(len, MATCH_LEN_MIN as u32);
    }
}
