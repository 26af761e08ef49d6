//! Draw-without-replacement over an integer range
//!
//! A Fisher-Yates shuffle evaluated lazily: instead of materializing the
//! range `[0, imax)` (which may span 2^56 values for a ULA catalog), the
//! shuffler keeps a sparse permutation map and swaps the drawn position with
//! the last reachable one. Each value is produced at most once between
//! give-backs, and a full drain yields a uniform random permutation of the
//! range.
//!
//! Walkthrough for the range `[0, 6)`, starting with `i = 6` and no
//! permutations tracked:
//!
//! ```text
//! i = 6
//! Position: [ 0 ] [ 1 ] [ 2 ] [ 3 ] [ 4 ] [ 5 ]
//! Value:    [ 0 ] [ 1 ] [ 2 ] [ 3 ] [ 4 ] [ 5 ]
//! ```
//!
//! A draw picks a random position below `i`, say 3. No permutation is
//! recorded there, so 3 itself is returned, and the value at the last
//! reachable position (5) moves into slot 3:
//!
//! ```text
//! i = 5
//! Position: [ 0 ] [ 1 ] [ 2 ] [ 3 ] [ 4 ] / [ 5 ]
//! Value:    [ 0 ] [ 1 ] [ 2 ] [ 5 ] [ 4 ] / [   ]
//! Returned: 3
//! ```
//!
//! Drawing position 3 again now returns the permuted value 5, and slot 3
//! receives the value at position 4. Giving a value back appends it at
//! position `i` and re-grows the range by one.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

pub(crate) struct Shuffler {
    rng: StdRng,
    permuts: HashMap<u64, u64>,
    i: u64,
}

impl Shuffler {
    /// A shuffler over `[0, imax)` drawing from the given seed.
    pub(crate) fn new(imax: u64, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            permuts: HashMap::new(),
            i: imax,
        }
    }

    /// Draw the next value, or `None` once the range is exhausted.
    pub(crate) fn pick_random(&mut self) -> Option<u64> {
        if self.i == 0 {
            return None;
        }

        let pos = self.rng.gen_range(0..self.i);

        self.i -= 1;
        let val = self.at_pos(pos);
        let last = self.at_pos(self.i);
        self.permuts.insert(pos, last);
        self.permuts.remove(&(self.i + 1));

        Some(val)
    }

    /// Return a previously drawn value to the pool.
    pub(crate) fn give_back(&mut self, v: u64) {
        self.permuts.insert(self.i, v);
        self.i += 1;
    }

    /// The value currently at `pos`: the recorded permutation if one exists,
    /// the position itself otherwise.
    fn at_pos(&self, pos: u64) -> u64 {
        self.permuts.get(&pos).copied().unwrap_or(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_all_is_a_permutation() {
        let mut s = Shuffler::new(6, 1);

        let mut picked: Vec<u64> = (0..6).map(|_| s.pick_random().unwrap()).collect();
        assert_eq!(s.pick_random(), None);

        picked.sort_unstable();
        assert_eq!(picked, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = Shuffler::new(100, 7);
        let mut b = Shuffler::new(100, 7);
        for _ in 0..100 {
            assert_eq!(a.pick_random(), b.pick_random());
        }
    }

    #[test]
    fn test_give_back_regrows_the_range() {
        let mut s = Shuffler::new(10, 3);

        let mut picked: Vec<u64> = (0..6).map(|_| s.pick_random().unwrap()).collect();
        let returned = picked[4];
        s.give_back(returned);

        // Five values were never drawn, plus the one given back.
        for _ in 0..5 {
            picked.push(s.pick_random().unwrap());
        }
        assert_eq!(s.pick_random(), None);

        let mut sorted = picked.clone();
        sorted.sort_unstable();
        let mut expected: Vec<u64> = (0..10).collect();
        expected.push(returned);
        expected.sort_unstable();
        assert_eq!(sorted, expected);

        // The given-back value was drawn a second time.
        assert_eq!(picked.iter().filter(|&&v| v == returned).count(), 2);
    }

    #[test]
    fn test_exhausted_until_give_back() {
        let mut s = Shuffler::new(1, 9);
        assert_eq!(s.pick_random(), Some(0));
        assert_eq!(s.pick_random(), None);
        assert_eq!(s.pick_random(), None);

        s.give_back(0);
        assert_eq!(s.pick_random(), Some(0));
        assert_eq!(s.pick_random(), None);
    }

    #[test]
    fn test_first_draw_is_roughly_uniform() {
        // Over many seeds, every value of a small range shows up as the
        // first draw a comparable number of times.
        let mut histogram = [0u32; 4];
        for seed in 0..800 {
            let mut s = Shuffler::new(4, seed);
            histogram[s.pick_random().unwrap() as usize] += 1;
        }
        for &count in &histogram {
            // Expected 200 per bucket; allow a generous band.
            assert!((100..=300).contains(&count), "histogram: {histogram:?}");
        }
    }

    #[test]
    fn test_large_range_draws_are_distinct() {
        let mut s = Shuffler::new(1 << 56, 5);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            let v = s.pick_random().unwrap();
            assert!(v < 1 << 56);
            assert!(seen.insert(v), "value {v} drawn twice");
        }
    }
}
