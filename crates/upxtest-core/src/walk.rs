//! Index-chained checksum walk.
//!
//! Starting from `i = input & INDEX_MASK` and `v = 0`, every one of the 18
//! buffers is visited in fixed order: the index advances by the current
//! accumulator (`i = (i + v) & INDEX_MASK`) and the word at `i` is folded in
//! by wrapping addition or xor depending on the slot. Because the next index
//! depends on everything folded so far, the fingerprint is sensitive to the
//! order and exact values of every buffer class, not just their sums.

use crate::mutator::start_index;
use crate::seed::INDEX_MASK;
use crate::storage::{BankView, GenerationSet, Slot};

/// Accumulation step for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fold {
    /// `v = v.wrapping_add(word)`
    Add,
    /// `v ^= word`
    Xor,
}

impl Fold {
    #[inline]
    #[must_use]
    pub const fn apply(self, acc: u32, word: u32) -> u32 {
        match self {
            Self::Add => acc.wrapping_add(word),
            Self::Xor => acc ^ word,
        }
    }
}

/// Walk every buffer visible through `view` and return the raw accumulator.
///
/// The low bit is not forced here; workers do that after the settle delay.
#[must_use]
pub fn walk(view: &BankView<'_>, input: i32) -> u32 {
    let mut index = start_index(input) as u32;
    let mut acc = 0u32;
    for set in GenerationSet::ALL {
        for slot in Slot::ALL {
            index = index.wrapping_add(acc) & INDEX_MASK;
            let word = view.word(set, slot, index as usize);
            acc = slot.fold().apply(acc, word);
        }
    }
    acc
}

/// Force the parity bit on a raw accumulator.
#[inline]
#[must_use]
pub const fn seal(raw: u32) -> u32 {
    raw | 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::{SeedGenerator, SeedTables};
    use crate::storage::StorageBank;

    #[test]
    fn zero_tables_fold_to_zero() {
        let bank = StorageBank::new(SeedTables::from_generators([SeedGenerator::Zero; 3]));
        let view = bank.enter();
        for input in [0, 1, 77, 1_000_000] {
            assert_eq!(walk(&view, input), 0);
        }
        assert_eq!(seal(walk(&view, 0)), 1);
    }

    #[test]
    fn ramp_tables_follow_the_index_chain() {
        // Hops for input 1: 1, 2, 5, 13, 18, 41, 103, 268, ... worked by hand.
        let bank = StorageBank::new(SeedTables::from_generators([SeedGenerator::Ramp; 3]));
        let view = bank.enter();
        assert_eq!(walk(&view, 1), 894);
    }

    #[test]
    fn standard_tables_golden_fingerprints() {
        let bank = StorageBank::new(SeedTables::standard());
        let view = bank.enter();
        assert_eq!(walk(&view, 0), 0x95b7_c9b6);
        assert_eq!(seal(walk(&view, 0)), 0x95b7_c9b7);
        assert_eq!(walk(&view, 1), 0xf02b_e51f);
        assert_eq!(seal(walk(&view, 3)), 0xe2ca_c87d);
    }

    #[test]
    fn walk_sees_thread_local_content() {
        let bank = StorageBank::new(SeedTables::standard());
        let alt = SeedTables::from_generators([SeedGenerator::XorShift; 3]);
        let view = bank.enter_with(&alt);
        assert_eq!(seal(walk(&view, 0)), 0x68c7_0173);
    }

    #[test]
    fn fold_apply() {
        assert_eq!(Fold::Add.apply(u32::MAX, 2), 1);
        assert_eq!(Fold::Xor.apply(0b1010, 0b0110), 0b1100);
    }
}
