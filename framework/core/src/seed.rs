use std::fmt;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// The seed of a run.
///
/// Submitters may provide either an integer or an arbitrary string. Both are kept in their textual
/// form so that `42` and `"42"` address the same run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Seed(String);

impl Seed {
    pub fn new(seed: impl Into<String>) -> Self {
        Self(seed.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable 64 bit projection of the seed, using FNV-1a over the UTF-8 bytes.
    pub fn to_u64(&self) -> u64 {
        fnv1a(self.0.as_bytes())
    }
}

impl From<u64> for Seed {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for Seed {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Deterministic run id for a seed, shaped like a UUID.
///
/// The id is the first 128 bits of `sha256(seed)`, so re-running a seed always lands on the same
/// replay entry.
pub fn derive_run_id(seed: &Seed) -> String {
    let digest = format!("{:x}", Sha256::digest(seed.as_str().as_bytes()));
    format!(
        "{}-{}-{}-{}-{}",
        &digest[0..8],
        &digest[8..12],
        &digest[12..16],
        &digest[16..20],
        &digest[20..32]
    )
}

/// Explicit seeded pseudo-random source.
///
/// Every random decision in a simulation goes through one of these, never through ambient
/// randomness, so that a seed fully determines the generated population and their choices.
#[derive(Debug, Clone)]
pub struct SimRng {
    inner: StdRng,
}

impl SimRng {
    pub fn from_seed(seed: &Seed) -> Self {
        Self {
            inner: StdRng::seed_from_u64(seed.to_u64()),
        }
    }

    /// An independent stream for one purpose, for example the persona of agent `index`.
    ///
    /// Streams derived from the same `(seed, stream, index)` always produce the same sequence,
    /// regardless of how many values other streams have consumed.
    pub fn for_stream(seed: &Seed, stream: &str, index: u64) -> Self {
        let key = format!("{}/{stream}/{index}", seed.as_str());
        Self {
            inner: StdRng::seed_from_u64(fnv1a(key.as_bytes())),
        }
    }

    /// Uniform value in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        self.inner.gen::<f64>()
    }

    pub fn chance(&mut self, probability: f64) -> bool {
        self.next_f64() < probability
    }

    /// Uniform index in `[0, n)`, or `0` when `n` is zero.
    pub fn below(&mut self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        self.inner.gen_range(0..n)
    }

    pub fn between(&mut self, low: u32, high_inclusive: u32) -> u32 {
        if high_inclusive <= low {
            return low;
        }
        self.inner.gen_range(low..=high_inclusive)
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.inner);
    }

    pub fn hex_token(&mut self, len: usize) -> String {
        (0..len)
            .map(|_| char::from_digit(self.inner.gen_range(0..16), 16).unwrap_or('0'))
            .collect()
    }
}
