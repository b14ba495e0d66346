//! Deterministic seed content for the three generation sets.
//!
//! Content generation is pure: two banks built independently, in any thread,
//! hold bit-identical seeds.

use std::sync::Arc;

use crate::error::HarnessError;
use crate::storage::GenerationSet;

/// Words per buffer.
pub const BUFFER_WORDS: usize = 16384;

/// Mask reducing any index or input to `0..BUFFER_WORDS`.
pub const INDEX_MASK: u32 = (BUFFER_WORDS as u32) - 1;

/// Content generator for one seed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeedGenerator {
    /// Every word is zero (`data01`).
    Zero,
    /// `word[i] = i & 0xff` (`data02`).
    Ramp,
    /// Two-register xorshift sequence seeded with `(1, 2)` (`data03`).
    XorShift,
}

impl SeedGenerator {
    /// Generator used by `set` in the standard layout.
    #[must_use]
    pub const fn standard(set: GenerationSet) -> Self {
        match set {
            GenerationSet::Set01 => Self::Zero,
            GenerationSet::Set02 => Self::Ramp,
            GenerationSet::Set03 => Self::XorShift,
        }
    }

    /// Produce a full table of [`BUFFER_WORDS`] words.
    #[must_use]
    pub fn generate(self) -> Vec<u32> {
        match self {
            Self::Zero => vec![0; BUFFER_WORDS],
            Self::Ramp => (0..BUFFER_WORDS as u32).map(|i| i & 0xff).collect(),
            Self::XorShift => {
                let mut out = Vec::with_capacity(BUFFER_WORDS);
                let (mut a, mut b) = (1u32, 2u32);
                for _ in 0..BUFFER_WORDS {
                    b ^= b << 17;
                    b ^= a ^ (b >> 7) ^ (a >> 16);
                    out.push(a.wrapping_add(b));
                    std::mem::swap(&mut a, &mut b);
                }
                out
            }
        }
    }
}

/// Immutable seed tables, one per generation set.
///
/// Cloning is cheap; the tables are shared behind `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedTables {
    tables: [Arc<[u32]>; GenerationSet::COUNT],
}

impl SeedTables {
    /// Standard layout: zero, ramp, xorshift.
    #[must_use]
    pub fn standard() -> Self {
        Self::from_generators(GenerationSet::ALL.map(SeedGenerator::standard))
    }

    /// Build tables from one generator per set.
    #[must_use]
    pub fn from_generators(generators: [SeedGenerator; GenerationSet::COUNT]) -> Self {
        Self {
            tables: generators.map(|g| Arc::from(g.generate())),
        }
    }

    /// Build tables from explicit words.
    ///
    /// Each table must hold exactly [`BUFFER_WORDS`] words.
    pub fn from_words(words: [Vec<u32>; GenerationSet::COUNT]) -> Result<Self, HarnessError> {
        for (set, table) in GenerationSet::ALL.iter().zip(words.iter()) {
            if table.len() != BUFFER_WORDS {
                return Err(HarnessError::SeedLength {
                    set: *set,
                    len: table.len(),
                    expected: BUFFER_WORDS,
                });
            }
        }
        Ok(Self {
            tables: words.map(Arc::from),
        })
    }

    /// Seed table of `set`.
    #[must_use]
    pub fn table(&self, set: GenerationSet) -> &[u32] {
        &self.tables[set.index()]
    }
}

impl Default for SeedTables {
    fn default() -> Self {
        Self::standard()
    }
}

/// Render a table in the C header layout the packer test sources include:
/// a count banner, then rows of four words prefixed by their offset.
#[must_use]
pub fn render_c_table(words: &[u32]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(words.len() * 12 + 64);
    let _ = writeln!(out, "/* {} entries */", words.len());
    for (row, chunk) in words.chunks(4).enumerate() {
        let _ = write!(out, "/* 0x{:04x} */ ", row * 4);
        let last_row = (row + 1) * 4 >= words.len();
        for (col, word) in chunk.iter().enumerate() {
            let _ = write!(out, "0x{word:08x}");
            if !(last_row && col + 1 == chunk.len()) {
                out.push(',');
            }
        }
        out.push('\n');
    }
    out
}
