//! Parsing and validation of `hwsim.toml` simulation settings.
//!
//! A settings file names the top component, the run length, the clocks to
//! drive and the initial values of root inputs. Durations are carried in
//! femtoseconds throughout.

#![warn(missing_docs)]

pub mod duration;
pub mod error;
pub mod loader;
pub mod types;

pub use duration::parse_duration;
pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, validate_config, CONFIG_FILE};
pub use types::*;
