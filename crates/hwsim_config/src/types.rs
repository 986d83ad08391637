//! Settings types deserialized from `hwsim.toml`.

use crate::duration::{parse_duration, FS_PER_NS};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

/// The whole settings file.
#[derive(Debug, Deserialize)]
pub struct SimConfig {
    /// Run settings.
    pub simulation: SimulationSection,
    /// Signal tracing.
    #[serde(default)]
    pub trace: TraceSection,
    /// Clocks driven on root signals.
    #[serde(default)]
    pub clock: Vec<ClockDef>,
    /// Initial values for root inputs, by field name.
    #[serde(default)]
    pub inputs: BTreeMap<String, i64>,
}

fn default_max_comb_depth() -> usize {
    1000
}

/// The `[simulation]` table.
#[derive(Debug, Deserialize)]
pub struct SimulationSection {
    /// Name of the root component type.
    pub top: String,
    /// Default run length.
    #[serde(default)]
    pub time: Option<SimDuration>,
    /// Bound on nested comb re-evaluation.
    #[serde(default = "default_max_comb_depth")]
    pub max_comb_depth: usize,
}

/// The `[trace]` table.
#[derive(Debug, Default, Deserialize)]
pub struct TraceSection {
    /// Record and print every signal change.
    #[serde(default)]
    pub enabled: bool,
}

/// One `[[clock]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ClockDef {
    /// Root field toggled by the clock.
    pub signal: String,
    /// Full period; the signal toggles every half period.
    pub period: SimDuration,
}

/// A duration in femtoseconds, written as `"10ns"` or as a bare integer
/// number of nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SimDuration(pub u64);

impl SimDuration {
    /// The duration in femtoseconds.
    pub fn as_fs(self) -> u64 {
        self.0
    }
}

impl<'de> Deserialize<'de> for SimDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = SimDuration;

            fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                formatter.write_str("a duration string like \"10ns\" or an integer of nanoseconds")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                parse_duration(v).map(SimDuration).map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                let ns = u64::try_from(v).map_err(|_| E::custom("duration must not be negative"))?;
                self.visit_u64(ns)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                v.checked_mul(FS_PER_NS)
                    .map(SimDuration)
                    .ok_or_else(|| E::custom("duration out of range"))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}
