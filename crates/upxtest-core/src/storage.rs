//! Storage bank: 18 buffers across storage-class combinations.
//!
//! ## Layout
//!
//! Each [`GenerationSet`] owns six [`Slot`]s seeded from one table:
//!
//! | slot           | mutability | duration | linkage  |
//! |----------------|------------|----------|----------|
//! | `Static`       | mutable    | process  | internal |
//! | `StaticConst`  | read-only  | process  | internal |
//! | `Extern`       | mutable    | process  | external |
//! | `ExternConst`  | read-only  | process  | external |
//! | `StaticThread` | mutable    | thread   | internal |
//! | `ExternThread` | mutable    | thread   | external |
//!
//! Process-duration buffers live in the [`StorageBank`] and are shared by
//! reference between workers. Thread-duration buffers live in a per-worker
//! [`LocalBuffers`] created by [`StorageBank::enter`] from the immutable seed
//! tables; they are never shared.
//!
//! ## Shared mutable buffers
//!
//! Mutable process-wide words are accessed with a relaxed load followed by a
//! relaxed store. There is no lock and no read-modify-write atomic: two
//! workers toggling the same word concurrently may lose one toggle, exactly
//! like the plain `^=` on a data-section global this models. The atomics only
//! keep the program free of undefined behavior; they impose no ordering.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::seed::{BUFFER_WORDS, SeedTables};
use crate::walk::Fold;

/// One of the three generation sets (`data01`, `data02`, `data03`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GenerationSet {
    Set01,
    Set02,
    Set03,
}

impl GenerationSet {
    pub const COUNT: usize = 3;

    /// Walk order.
    pub const ALL: [Self; Self::COUNT] = [Self::Set01, Self::Set02, Self::Set03];

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Set01 => 0,
            Self::Set02 => 1,
            Self::Set03 => 2,
        }
    }

    /// Dataset name used for symbols and emitted headers.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Set01 => "data01",
            Self::Set02 => "data02",
            Self::Set03 => "data03",
        }
    }
}

impl fmt::Display for GenerationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Whether a buffer may be written after initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mutability {
    Mutable,
    ReadOnly,
}

/// Lifetime/sharing class of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageDuration {
    /// One instance shared by every worker.
    Process,
    /// One instance per worker, reset to the seed at worker start.
    Thread,
}

/// Symbol visibility of the modeled data-section object.
///
/// Carried for reporting only; it has no effect on the checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Linkage {
    Internal,
    External,
}

/// Position of a buffer inside a generation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    Static,
    StaticConst,
    Extern,
    ExternConst,
    StaticThread,
    ExternThread,
}

impl Slot {
    pub const COUNT: usize = 6;

    /// Walk order within a generation set.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Static,
        Self::StaticConst,
        Self::Extern,
        Self::ExternConst,
        Self::StaticThread,
        Self::ExternThread,
    ];

    #[must_use]
    pub const fn mutability(self) -> Mutability {
        match self {
            Self::StaticConst | Self::ExternConst => Mutability::ReadOnly,
            Self::Static | Self::Extern | Self::StaticThread | Self::ExternThread => {
                Mutability::Mutable
            }
        }
    }

    #[must_use]
    pub const fn duration(self) -> StorageDuration {
        match self {
            Self::StaticThread | Self::ExternThread => StorageDuration::Thread,
            _ => StorageDuration::Process,
        }
    }

    #[must_use]
    pub const fn linkage(self) -> Linkage {
        match self {
            Self::Static | Self::StaticConst | Self::StaticThread => Linkage::Internal,
            Self::Extern | Self::ExternConst | Self::ExternThread => Linkage::External,
        }
    }

    /// How the walk folds a word read from this slot.
    #[must_use]
    pub const fn fold(self) -> Fold {
        match self {
            Self::Static | Self::Extern | Self::StaticThread => Fold::Add,
            Self::StaticConst | Self::ExternConst | Self::ExternThread => Fold::Xor,
        }
    }

    /// Symbol suffix, e.g. `data02_extern_const`.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::StaticConst => "static_const",
            Self::Extern => "extern",
            Self::ExternConst => "extern_const",
            Self::StaticThread => "static_thread",
            Self::ExternThread => "extern_thread",
        }
    }

    /// Narrow to a mutation target, if this slot is writable.
    #[must_use]
    pub const fn as_mutable(self) -> Option<MutableSlot> {
        match self {
            Self::Static => Some(MutableSlot::Static),
            Self::Extern => Some(MutableSlot::Extern),
            Self::StaticThread => Some(MutableSlot::StaticThread),
            Self::ExternThread => Some(MutableSlot::ExternThread),
            Self::StaticConst | Self::ExternConst => None,
        }
    }
}

/// The writable subset of [`Slot`]. Read-only slots cannot be named as a
/// mutation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutableSlot {
    Static,
    Extern,
    StaticThread,
    ExternThread,
}

impl From<MutableSlot> for Slot {
    fn from(slot: MutableSlot) -> Self {
        match slot {
            MutableSlot::Static => Self::Static,
            MutableSlot::Extern => Self::Extern,
            MutableSlot::StaticThread => Self::StaticThread,
            MutableSlot::ExternThread => Self::ExternThread,
        }
    }
}

// ---------------------------------------------------------------------------
// Process-wide buffers
// ---------------------------------------------------------------------------

/// Unsynchronized process-wide mutable buffer.
pub struct SharedBuffer {
    words: Box<[AtomicU32]>,
}

impl SharedBuffer {
    fn from_seed(seed: &[u32]) -> Self {
        Self {
            words: seed.iter().map(|&w| AtomicU32::new(w)).collect(),
        }
    }

    #[inline]
    #[must_use]
    pub fn load(&self, index: usize) -> u32 {
        self.words[index].load(Ordering::Relaxed)
    }

    /// XOR `mask` into `words[index]` as a separate load and store.
    #[inline]
    pub fn toggle(&self, index: usize, mask: u32) {
        let word = self.words[index].load(Ordering::Relaxed);
        self.words[index].store(word ^ mask, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<u32> {
        self.words.iter().map(|w| w.load(Ordering::Relaxed)).collect()
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("len", &self.words.len())
            .finish()
    }
}

/// A shared word that no longer matches its seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deviation {
    pub set: GenerationSet,
    pub slot: Slot,
    pub index: usize,
    pub seed: u32,
    pub observed: u32,
}

impl Deviation {
    /// Bits that differ from the seed.
    #[must_use]
    pub const fn flipped(&self) -> u32 {
        self.seed ^ self.observed
    }
}

/// Catalog of the process-duration buffers plus the seed tables that
/// initialize every per-worker view.
#[derive(Debug)]
pub struct StorageBank {
    seeds: SeedTables,
    /// `[set][0]` = `Static`, `[set][1]` = `Extern`.
    mutable: [[SharedBuffer; 2]; GenerationSet::COUNT],
    /// `[set][0]` = `StaticConst`, `[set][1]` = `ExternConst`.
    read_only: [[Box<[u32]>; 2]; GenerationSet::COUNT],
}

impl StorageBank {
    /// Lay out all process-duration buffers from `seeds`. Cannot fail.
    #[must_use]
    pub fn new(seeds: SeedTables) -> Self {
        let mutable = GenerationSet::ALL.map(|set| {
            let seed = seeds.table(set);
            [SharedBuffer::from_seed(seed), SharedBuffer::from_seed(seed)]
        });
        let read_only = GenerationSet::ALL.map(|set| {
            let seed = seeds.table(set);
            [Box::<[u32]>::from(seed), Box::<[u32]>::from(seed)]
        });
        Self {
            seeds,
            mutable,
            read_only,
        }
    }

    #[must_use]
    pub fn seeds(&self) -> &SeedTables {
        &self.seeds
    }

    /// Open a per-worker view. Call from inside the worker thread: the view
    /// owns that worker's thread-duration buffers.
    #[must_use]
    pub fn enter(&self) -> BankView<'_> {
        self.enter_with(&self.seeds)
    }

    /// Open a per-worker view whose thread-duration buffers are seeded from
    /// `local_seeds` instead of the bank's own tables.
    #[must_use]
    pub fn enter_with(&self, local_seeds: &SeedTables) -> BankView<'_> {
        BankView {
            bank: self,
            local: LocalBuffers::from_seeds(local_seeds),
        }
    }

    fn shared(&self, set: GenerationSet, slot: Slot) -> Option<&SharedBuffer> {
        let pair = &self.mutable[set.index()];
        match slot {
            Slot::Static => Some(&pair[0]),
            Slot::Extern => Some(&pair[1]),
            _ => None,
        }
    }

    fn constant(&self, set: GenerationSet, slot: Slot) -> Option<&[u32]> {
        let pair = &self.read_only[set.index()];
        match slot {
            Slot::StaticConst => Some(&pair[0]),
            Slot::ExternConst => Some(&pair[1]),
            _ => None,
        }
    }

    /// Current contents of a process-duration buffer.
    ///
    /// Returns `None` for thread-duration slots: those only exist inside a
    /// worker's [`BankView`].
    #[must_use]
    pub fn buffer(&self, set: GenerationSet, slot: Slot) -> Option<Vec<u32>> {
        if let Some(shared) = self.shared(set, slot) {
            return Some(shared.snapshot());
        }
        self.constant(set, slot).map(<[u32]>::to_vec)
    }

    /// Every shared mutable word that differs from its seed, in walk order.
    #[must_use]
    pub fn deviations(&self) -> Vec<Deviation> {
        let mut out = Vec::new();
        for set in GenerationSet::ALL {
            let seed = self.seeds.table(set);
            for slot in [Slot::Static, Slot::Extern] {
                let Some(shared) = self.shared(set, slot) else {
                    continue;
                };
                for (index, &expected) in seed.iter().enumerate() {
                    let observed = shared.load(index);
                    if observed != expected {
                        out.push(Deviation {
                            set,
                            slot,
                            index,
                            seed: expected,
                            observed,
                        });
                    }
                }
            }
        }
        out
    }

    /// BLAKE3 digest over the shared mutable buffers.
    #[must_use]
    pub fn shared_digest(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        for pair in &self.mutable {
            for buffer in pair {
                hash_words(&mut hasher, &buffer.snapshot());
            }
        }
        hasher.finalize()
    }
}

// ---------------------------------------------------------------------------
// Thread-duration buffers
// ---------------------------------------------------------------------------

/// One worker's private copy of the thread-duration buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBuffers {
    /// `[set][0]` = `StaticThread`, `[set][1]` = `ExternThread`.
    words: [[Vec<u32>; 2]; GenerationSet::COUNT],
}

impl LocalBuffers {
    /// Fresh buffers holding the seed content.
    #[must_use]
    pub fn from_seeds(seeds: &SeedTables) -> Self {
        Self {
            words: GenerationSet::ALL.map(|set| {
                let seed = seeds.table(set);
                [seed.to_vec(), seed.to_vec()]
            }),
        }
    }

    fn pos(slot: Slot) -> Option<usize> {
        match slot {
            Slot::StaticThread => Some(0),
            Slot::ExternThread => Some(1),
            _ => None,
        }
    }

    /// Contents of a thread-duration buffer, `None` for other slots.
    #[must_use]
    pub fn buffer(&self, set: GenerationSet, slot: Slot) -> Option<&[u32]> {
        Self::pos(slot).map(|p| self.words[set.index()][p].as_slice())
    }

    /// BLAKE3 digest over all six thread-duration buffers.
    #[must_use]
    pub fn digest(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        for pair in &self.words {
            for buffer in pair {
                hash_words(&mut hasher, buffer);
            }
        }
        hasher.finalize()
    }
}

fn hash_words(hasher: &mut blake3::Hasher, words: &[u32]) {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    hasher.update(&bytes);
}

// ---------------------------------------------------------------------------
// Per-worker view
// ---------------------------------------------------------------------------

/// A worker's window onto the bank: shared buffers by reference, its own
/// thread-duration buffers by value.
#[derive(Debug)]
pub struct BankView<'a> {
    bank: &'a StorageBank,
    local: LocalBuffers,
}

impl<'a> BankView<'a> {
    #[must_use]
    pub fn bank(&self) -> &'a StorageBank {
        self.bank
    }

    #[must_use]
    pub fn local(&self) -> &LocalBuffers {
        &self.local
    }

    #[must_use]
    pub fn into_local(self) -> LocalBuffers {
        self.local
    }

    /// Read `buffer(set, slot)[index]`. `index` must be below [`BUFFER_WORDS`].
    #[inline]
    #[must_use]
    pub fn word(&self, set: GenerationSet, slot: Slot, index: usize) -> u32 {
        debug_assert!(index < BUFFER_WORDS);
        match slot {
            Slot::Static | Slot::Extern => {
                let pos = usize::from(slot == Slot::Extern);
                self.bank.mutable[set.index()][pos].load(index)
            }
            Slot::StaticConst | Slot::ExternConst => {
                let pos = usize::from(slot == Slot::ExternConst);
                self.bank.read_only[set.index()][pos][index]
            }
            Slot::StaticThread | Slot::ExternThread => {
                let pos = usize::from(slot == Slot::ExternThread);
                self.local.words[set.index()][pos][index]
            }
        }
    }

    /// XOR `mask` into `buffer(set, slot)[index]`.
    #[inline]
    pub fn toggle(&mut self, set: GenerationSet, slot: MutableSlot, index: usize, mask: u32) {
        debug_assert!(index < BUFFER_WORDS);
        let s = set.index();
        match slot {
            MutableSlot::Static => self.bank.mutable[s][0].toggle(index, mask),
            MutableSlot::Extern => self.bank.mutable[s][1].toggle(index, mask),
            MutableSlot::StaticThread => self.local.words[s][0][index] ^= mask,
            MutableSlot::ExternThread => self.local.words[s][1][index] ^= mask,
        }
    }
}
