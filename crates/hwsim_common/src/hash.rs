//! Content fingerprints for elaborated structures.

use serde::{Deserialize, Serialize};
use std::fmt;
use xxhash_rust::xxh3::Xxh3;

/// A 128-bit XXH3 fingerprint.
///
/// Two elaborations of the same IR must produce equal fingerprints; the
/// elaborator hashes its bind order and address-space region maps into one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Hashes a byte slice in one shot.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(xxhash_rust::xxh3::xxh3_128(data).to_le_bytes())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Incremental builder for a [`ContentHash`].
///
/// Strings are length-prefixed so that `("ab", "c")` and `("a", "bc")` hash
/// differently.
pub struct ContentHasher {
    state: Xxh3,
}

impl ContentHasher {
    /// Starts an empty fingerprint.
    pub fn new() -> Self {
        Self { state: Xxh3::new() }
    }

    /// Feeds raw bytes.
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.state.update(data);
        self
    }

    /// Feeds a length-prefixed string.
    pub fn update_str(&mut self, s: &str) -> &mut Self {
        self.state.update(&(s.len() as u64).to_le_bytes());
        self.state.update(s.as_bytes());
        self
    }

    /// Feeds a `u64` in little-endian order.
    pub fn update_u64(&mut self, v: u64) -> &mut Self {
        self.state.update(&v.to_le_bytes());
        self
    }

    /// Produces the fingerprint.
    pub fn finish(&self) -> ContentHash {
        ContentHash(self.state.digest128().to_le_bytes())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}
