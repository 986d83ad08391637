//! Simulated time with femtosecond resolution and delta cycles.
//!
//! [`SimTime`] orders first by femtoseconds and then by delta index, so every
//! delta step of an instant sorts before the next real instant.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

pub use hwsim_common::units::{FS_PER_MS, FS_PER_NS, FS_PER_PS, FS_PER_US};

/// A point in simulated time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimTime {
    /// Real time in femtoseconds.
    pub fs: u64,
    /// Delta step within the instant.
    pub delta: u32,
}

impl SimTime {
    /// Time zero.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Delta 0 of an instant given in femtoseconds.
    pub fn from_fs(fs: u64) -> Self {
        Self { fs, delta: 0 }
    }

    /// Delta 0 of an instant given in nanoseconds.
    pub fn from_ns(ns: u64) -> Self {
        Self::from_fs(ns.saturating_mul(FS_PER_NS))
    }

    /// The next delta step of the same instant.
    pub fn next_delta(&self) -> Self {
        Self {
            fs: self.fs,
            delta: self.delta.saturating_add(1),
        }
    }

    /// Delta 0 of the instant `delay_fs` later.
    pub fn after(&self, delay_fs: u64) -> Self {
        Self::from_fs(self.fs.saturating_add(delay_fs))
    }

    /// Nanoseconds, truncated.
    pub fn to_ns(&self) -> u64 {
        self.fs / FS_PER_NS
    }
}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fs.cmp(&other.fs).then(self.delta.cmp(&other.delta))
    }
}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fs = self.fs;
        let units = [
            (FS_PER_MS, "ms"),
            (FS_PER_US, "us"),
            (FS_PER_NS, "ns"),
            (FS_PER_PS, "ps"),
        ];
        match units
            .iter()
            .find(|(scale, _)| fs >= *scale && fs % scale == 0)
        {
            Some((scale, unit)) => write!(f, "{} {unit}", fs / scale)?,
            None => write!(f, "{fs} fs")?,
        }
        if self.delta > 0 {
            write!(f, "+d{}", self.delta)?;
        }
        Ok(())
    }
}
