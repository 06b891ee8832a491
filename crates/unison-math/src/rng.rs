//! Seeded deterministic PRNG.
//!
//! A two-word xorshift generator. The `(s0, s1)` state is plain data that the
//! snapshot layer captures and restores, which is what lets a rolled-back or
//! late-joining peer draw exactly the sequence the authoritative peer drew.
//!
//! The world gates access to the generator so that it only advances inside
//! the `update` and `physics` phases; this module just provides the pure
//! state machine.

use serde::{Deserialize, Serialize};

use crate::fixed::Fixed;

/// Replacement state used when a seed hashes to all-zero (an all-zero
/// xorshift state is a fixed point and would emit zeros forever).
const ZERO_SEED_FALLBACK: (u32, u32) = (0x9E37_79B9, 0x85EB_CA6B);

// ---------------------------------------------------------------------------
// DeterministicRng
// ---------------------------------------------------------------------------

/// Xorshift PRNG over a `(s0, s1)` pair of 32-bit words.
///
/// `next_u32` is a pure function of the state: two generators with equal
/// state produce equal sequences, and the state round-trips losslessly
/// through [`state`](Self::state) / [`restore`](Self::restore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    s0: u32,
    s1: u32,
}

impl DeterministicRng {
    /// Create a generator from explicit state words.
    ///
    /// An all-zero state is remapped to a fixed non-zero fallback.
    pub fn new(s0: u32, s1: u32) -> Self {
        if s0 == 0 && s1 == 0 {
            let (f0, f1) = ZERO_SEED_FALLBACK;
            Self { s0: f0, s1: f1 }
        } else {
            Self { s0, s1 }
        }
    }

    /// Seed from a textual label (typically the room id).
    ///
    /// Two FNV-1a rounds with distinct offset bases produce the two state
    /// words, so every peer in the same room starts from the same state.
    pub fn seed_from_label(label: &str) -> Self {
        Self::new(fnv1a(label.as_bytes(), 0x811C_9DC5), fnv1a(label.as_bytes(), 0xCBF2_9CE4))
    }

    /// Advance the generator and return the next 32-bit value.
    pub fn next_u32(&mut self) -> u32 {
        let mut t = self.s0;
        let s = self.s1;
        self.s0 = s;
        t ^= t << 13;
        t ^= t >> 17;
        t ^= s ^ (s << 5);
        self.s1 = t;
        t.wrapping_add(s)
    }

    /// A fixed-point value in `[0, 1)`, from the low 16 bits of the next draw.
    pub fn next_fixed(&mut self) -> Fixed {
        Fixed::from_raw((self.next_u32() & 0xFFFF) as i32)
    }

    /// A uniformly distributed integer in `[lo, hi)`.
    ///
    /// # Panics
    ///
    /// Panics if `lo >= hi`.
    pub fn next_range(&mut self, lo: i32, hi: i32) -> i32 {
        assert!(lo < hi, "next_range: empty range {lo}..{hi}");
        let span = (hi as i64 - lo as i64) as u64;
        lo + (u64::from(self.next_u32()) % span) as i32
    }

    /// The current `(s0, s1)` state, for snapshots.
    pub fn state(&self) -> (u32, u32) {
        (self.s0, self.s1)
    }

    /// Restore a previously captured state.
    pub fn restore(&mut self, state: (u32, u32)) {
        self.s0 = state.0;
        self.s1 = state.1;
    }
}

/// FNV-1a over `bytes`, starting from `basis`.
fn fnv1a(bytes: &[u8], basis: u32) -> u32 {
    let mut hash = basis;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
