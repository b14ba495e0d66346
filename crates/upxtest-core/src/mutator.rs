//! Sparse, gated perturbation of the mutable buffers.
//!
//! When the input exceeds [`GATE_THRESHOLD`], each of the 12 mutable buffers
//! gets `buffer[i] ^= mask` at `i = input & INDEX_MASK`, unless `i` is a
//! multiple of that buffer's prime. Distinct primes and masks give every
//! buffer its own pattern, so an aliased or swapped buffer shows up as a
//! different fingerprint.

use crate::seed::INDEX_MASK;
use crate::storage::{BankView, GenerationSet, MutableSlot};

/// Inputs strictly above this value enable the mutation pass.
pub const GATE_THRESHOLD: i32 = 999_999;

/// One row of the mutation plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationRule {
    pub set: GenerationSet,
    pub slot: MutableSlot,
    /// The word is left alone when the index is a multiple of `prime`.
    pub prime: u32,
    pub mask: u32,
}

impl MutationRule {
    const fn new(set: GenerationSet, slot: MutableSlot, prime: u32, mask: u32) -> Self {
        Self {
            set,
            slot,
            prime,
            mask,
        }
    }

    /// Whether this rule writes at `index`.
    #[inline]
    #[must_use]
    pub const fn applies_at(&self, index: usize) -> bool {
        index % self.prime as usize != 0
    }
}

/// Fixed enumeration order of the 12 mutable buffers.
pub const MUTATION_PLAN: [MutationRule; 12] = {
    use GenerationSet::{Set01, Set02, Set03};
    use MutableSlot::{Extern, ExternThread, Static, StaticThread};
    [
        MutationRule::new(Set01, Static, 11, 1),
        MutationRule::new(Set01, Extern, 13, 2),
        MutationRule::new(Set01, StaticThread, 17, 3),
        MutationRule::new(Set01, ExternThread, 19, 4),
        MutationRule::new(Set02, Static, 23, 5),
        MutationRule::new(Set02, Extern, 29, 6),
        MutationRule::new(Set02, StaticThread, 31, 7),
        MutationRule::new(Set02, ExternThread, 37, 8),
        MutationRule::new(Set03, Static, 41, 9),
        MutationRule::new(Set03, Extern, 43, 10),
        MutationRule::new(Set03, StaticThread, 47, 11),
        MutationRule::new(Set03, ExternThread, 53, 12),
    ]
};

/// Starting index derived from the input scalar.
///
/// Negative inputs wrap through their two's-complement bit pattern.
#[inline]
#[must_use]
pub const fn start_index(input: i32) -> usize {
    ((input as u32) & INDEX_MASK) as usize
}

#[inline]
#[must_use]
pub const fn gate_active(input: i32) -> bool {
    input > GATE_THRESHOLD
}

/// Apply the mutation pass to `view`. Returns the number of words toggled.
pub fn mutate(view: &mut BankView<'_>, input: i32) -> usize {
    if !gate_active(input) {
        return 0;
    }
    let index = start_index(input);
    let mut toggled = 0;
    for rule in &MUTATION_PLAN {
        if rule.applies_at(index) {
            view.toggle(rule.set, rule.slot, index, rule.mask);
            toggled += 1;
        }
    }
    toggled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::SeedTables;
    use crate::storage::{Slot, StorageBank};

    #[test]
    fn plan_uses_distinct_primes_and_masks() {
        let mut primes: Vec<u32> = MUTATION_PLAN.iter().map(|r| r.prime).collect();
        primes.dedup();
        assert_eq!(primes, vec![11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53]);
        let masks: Vec<u32> = MUTATION_PLAN.iter().map(|r| r.mask).collect();
        assert_eq!(masks, (1..=12).collect::<Vec<_>>());
    }

    #[test]
    fn gate_boundary() {
        assert!(!gate_active(0));
        assert!(!gate_active(999_999));
        assert!(gate_active(1_000_000));
        assert!(!gate_active(-5));
    }

    #[test]
    fn start_index_wraps() {
        assert_eq!(start_index(0), 0);
        assert_eq!(start_index(16_385), 1);
        assert_eq!(start_index(1_000_000), 576);
        assert_eq!(start_index(1_015_830), 22);
        assert_eq!(start_index(-1), 16_383);
    }

    #[test]
    fn inactive_gate_leaves_bank_untouched() {
        let bank = StorageBank::new(SeedTables::standard());
        let mut view = bank.enter();
        assert_eq!(mutate(&mut view, 999_999), 0);
        assert!(bank.deviations().is_empty());
        assert_eq!(view.into_local(), crate::storage::LocalBuffers::from_seeds(bank.seeds()));
    }

    #[test]
    fn gated_index_576_toggles_every_buffer() {
        // 576 = 2^6 * 3^2: no prime in the plan divides it.
        let bank = StorageBank::new(SeedTables::standard());
        let mut view = bank.enter();
        assert_eq!(mutate(&mut view, 1_000_000), MUTATION_PLAN.len());

        let deviations = bank.deviations();
        assert_eq!(deviations.len(), 6);
        assert!(deviations.iter().all(|d| d.index == 576));
        assert!(
            deviations
                .iter()
                .any(|d| d.set == GenerationSet::Set01 && d.slot == Slot::Static && d.flipped() == 1)
        );
        assert_eq!(view.word(GenerationSet::Set01, Slot::StaticThread, 576), 3);
        assert_eq!(view.word(GenerationSet::Set01, Slot::ExternThread, 576), 4);
    }

    #[test]
    fn multiple_of_eleven_spares_data01_static() {
        // 1_015_830 & 16383 = 22 = 2 * 11.
        let bank = StorageBank::new(SeedTables::standard());
        let mut view = bank.enter();
        assert_eq!(mutate(&mut view, 1_015_830), 11);

        let deviations = bank.deviations();
        assert_eq!(deviations.len(), 5);
        assert!(
            deviations
                .iter()
                .all(|d| d.index == 22 && !(d.set == GenerationSet::Set01 && d.slot == Slot::Static))
        );
        assert_eq!(view.word(GenerationSet::Set01, Slot::Static, 22), 0);
        assert_eq!(view.word(GenerationSet::Set01, Slot::StaticThread, 22), 3);
    }

    #[test]
    fn second_pass_restores_seed() {
        let bank = StorageBank::new(SeedTables::standard());
        let mut view = bank.enter();
        mutate(&mut view, 1_000_001);
        mutate(&mut view, 1_000_001);
        assert!(bank.deviations().is_empty());
        assert_eq!(view.into_local(), crate::storage::LocalBuffers::from_seeds(bank.seeds()));
    }
}
