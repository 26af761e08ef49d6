//! Run-length bit sequence with ordinal search
//!
//! Backs host-address allocation within a pool. The sequence is stored as
//! runs of identical 32-bit words, so a pool as large as an IPv6 /64 (2^64
//! host ids) costs a handful of runs rather than a dense array. Ordinal 0 is
//! the first address of the pool.

use thiserror::Error;

/// Result type for bitmap operations
pub type Result<T> = std::result::Result<T, BitmapError>;

/// Bit sequence errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BitmapError {
    /// The ordinal lies beyond the sequence capacity
    #[error("ordinal is beyond the sequence capacity")]
    OutOfRange,

    /// Every bit in the requested window is already set
    #[error("no free bit is available")]
    NoBitAvailable,

    /// The bit is already set
    #[error("bit is already allocated")]
    BitAllocated,
}

const WORD_BITS: u64 = 32;
const FULL_WORD: u32 = u32::MAX;

/// A run of `count` consecutive words all equal to `pattern`. Bit 0 of a
/// word is its most-significant bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Run {
    pattern: u32,
    count: u64,
}

/// Large bit set with first-free-bit search
///
/// `set_any(serial)` hands out the lowest free bit when `serial`, otherwise
/// it scans forward from the bit after the previous allocation and wraps
/// once, which keeps freed bits out of circulation for as long as possible.
#[derive(Debug, Clone)]
pub struct Bitmap {
    bits: u64,
    unselected: u64,
    runs: Vec<Run>,
    curr: u64,
}

impl Bitmap {
    /// Create a sequence of `bits` unset bits.
    pub fn new(bits: u64) -> Self {
        let words = bits / WORD_BITS + u64::from(bits % WORD_BITS != 0);
        let runs = if words > 0 {
            vec![Run { pattern: 0, count: words }]
        } else {
            Vec::new()
        };
        Self {
            bits,
            unselected: bits,
            runs,
            curr: 0,
        }
    }

    /// Total capacity in bits.
    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// Number of bits still unset.
    pub fn unselected(&self) -> u64 {
        self.unselected
    }

    /// Set the bit at `ordinal`.
    pub fn set(&mut self, ordinal: u64) -> Result<()> {
        if ordinal >= self.bits {
            return Err(BitmapError::OutOfRange);
        }
        if self.read_bit(ordinal) {
            return Err(BitmapError::BitAllocated);
        }
        self.write_bit(ordinal, true);
        self.unselected -= 1;
        Ok(())
    }

    /// Clear the bit at `ordinal`. Clearing an unset bit is a no-op.
    pub fn unset(&mut self, ordinal: u64) -> Result<()> {
        if ordinal >= self.bits {
            return Err(BitmapError::OutOfRange);
        }
        if self.read_bit(ordinal) {
            self.write_bit(ordinal, false);
            self.unselected += 1;
        }
        Ok(())
    }

    /// Report whether the bit at `ordinal` is set.
    pub fn is_set(&self, ordinal: u64) -> Result<bool> {
        if ordinal >= self.bits {
            return Err(BitmapError::OutOfRange);
        }
        Ok(self.read_bit(ordinal))
    }

    /// Set and return a free bit anywhere in the sequence.
    pub fn set_any(&mut self, serial: bool) -> Result<u64> {
        if self.unselected == 0 {
            return Err(BitmapError::NoBitAvailable);
        }
        let last = self.bits - 1;
        let ordinal = if serial {
            self.first_unset_in(0, last)
        } else {
            let from = if self.curr >= self.bits { 0 } else { self.curr };
            self.first_unset_in(from, last).or_else(|| {
                if from > 0 {
                    self.first_unset_in(0, from - 1)
                } else {
                    None
                }
            })
        }
        .ok_or(BitmapError::NoBitAvailable)?;

        self.take(ordinal);
        Ok(ordinal)
    }

    /// Set and return a free bit within `[start, end]` (both inclusive).
    pub fn set_any_in_range(&mut self, start: u64, end: u64, serial: bool) -> Result<u64> {
        if start > end || end >= self.bits {
            return Err(BitmapError::OutOfRange);
        }
        if self.unselected == 0 {
            return Err(BitmapError::NoBitAvailable);
        }
        let ordinal = if serial || self.curr <= start || self.curr > end {
            self.first_unset_in(start, end)
        } else {
            self.first_unset_in(self.curr, end)
                .or_else(|| self.first_unset_in(start, self.curr - 1))
        }
        .ok_or(BitmapError::NoBitAvailable)?;

        self.take(ordinal);
        Ok(ordinal)
    }

    fn take(&mut self, ordinal: u64) {
        self.write_bit(ordinal, true);
        self.unselected -= 1;
        self.curr = if ordinal + 1 == self.bits { 0 } else { ordinal + 1 };
    }

    fn read_bit(&self, ordinal: u64) -> bool {
        let word = ordinal / WORD_BITS;
        let mask = bit_mask((ordinal % WORD_BITS) as u32);
        let mut base = 0u64;
        for run in &self.runs {
            if word < base + run.count {
                return run.pattern & mask != 0;
            }
            base += run.count;
        }
        false
    }

    /// Flip the bit at `ordinal`, splitting the containing run and merging
    /// equal neighbors afterwards.
    fn write_bit(&mut self, ordinal: u64, set: bool) {
        let word = ordinal / WORD_BITS;
        let mask = bit_mask((ordinal % WORD_BITS) as u32);

        let mut base = 0u64;
        let mut idx = 0usize;
        while idx < self.runs.len() {
            let count = self.runs[idx].count;
            if word < base + count {
                break;
            }
            base += count;
            idx += 1;
        }

        let run = self.runs[idx];
        let pattern = if set {
            run.pattern | mask
        } else {
            run.pattern & !mask
        };
        if pattern == run.pattern {
            return;
        }

        let offset = word - base;
        let mut replacement = Vec::with_capacity(3);
        if offset > 0 {
            replacement.push(Run {
                pattern: run.pattern,
                count: offset,
            });
        }
        replacement.push(Run { pattern, count: 1 });
        if run.count - offset > 1 {
            replacement.push(Run {
                pattern: run.pattern,
                count: run.count - offset - 1,
            });
        }
        self.runs.splice(idx..=idx, replacement);
        self.coalesce();
    }

    fn coalesce(&mut self) {
        let mut merged: Vec<Run> = Vec::with_capacity(self.runs.len());
        for run in self.runs.drain(..) {
            match merged.last_mut() {
                Some(last) if last.pattern == run.pattern => last.count += run.count,
                _ => merged.push(run),
            }
        }
        self.runs = merged;
    }

    /// First unset ordinal in `[from, to]`, scanning whole runs at a time.
    /// Within a run all words are identical, so at most two candidate words
    /// per run need bit-level inspection (the window-clipped first word and
    /// the first unclipped one).
    fn first_unset_in(&self, from: u64, to: u64) -> Option<u64> {
        let to = to.min(self.bits - 1);
        if from > to {
            return None;
        }
        let from_word = from / WORD_BITS;

        let mut base = 0u64;
        for run in &self.runs {
            let run_end = base + run.count;
            if run_end <= from_word || run.pattern == FULL_WORD {
                base = run_end;
                continue;
            }

            let start_word = from_word.max(base);
            for word in [start_word, start_word + 1] {
                if word >= run_end {
                    break;
                }
                let word_lo = word * WORD_BITS;
                if word_lo > to {
                    return None;
                }
                let lo_bit = if from > word_lo {
                    (from - word_lo) as u32
                } else {
                    0
                };
                let hi_bit = if to < word_lo + (WORD_BITS - 1) {
                    (to - word_lo) as u32
                } else {
                    31
                };
                if let Some(bit) = first_zero_bit(run.pattern, lo_bit, hi_bit) {
                    return Some(word_lo + bit as u64);
                }
                if lo_bit == 0 {
                    // A window starting at bit 0 saw every candidate this
                    // run's pattern can offer.
                    break;
                }
            }
            base = run_end;
        }
        None
    }
}

fn bit_mask(bit: u32) -> u32 {
    1u32 << (31 - bit)
}

fn first_zero_bit(pattern: u32, lo: u32, hi: u32) -> Option<u32> {
    (lo..=hi).find(|&bit| pattern & bit_mask(bit) == 0)
}
