//! Settings file loading and validation.

use crate::error::ConfigError;
use crate::types::SimConfig;
use std::path::Path;

/// File name looked up by [`load_config`].
pub const CONFIG_FILE: &str = "hwsim.toml";

/// Loads and validates `<dir>/hwsim.toml`, or `path` itself when it names
/// a file.
pub fn load_config(path: &Path) -> Result<SimConfig, ConfigError> {
    let file = if path.is_dir() {
        path.join(CONFIG_FILE)
    } else {
        path.to_path_buf()
    };
    let content = std::fs::read_to_string(&file)?;
    load_config_from_str(&content)
}

/// Parses and validates settings from a string.
pub fn load_config_from_str(content: &str) -> Result<SimConfig, ConfigError> {
    let config: SimConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Checks required fields and value ranges.
pub fn validate_config(config: &SimConfig) -> Result<(), ConfigError> {
    if config.simulation.top.trim().is_empty() {
        return Err(ConfigError::MissingField("simulation.top".to_string()));
    }
    if config.simulation.max_comb_depth == 0 {
        return Err(ConfigError::ValidationError(
            "simulation.max_comb_depth must be at least 1".to_string(),
        ));
    }
    for clock in &config.clock {
        if clock.signal.is_empty() {
            return Err(ConfigError::MissingField("clock.signal".to_string()));
        }
        if clock.period.as_fs() < 2 {
            return Err(ConfigError::ValidationError(format!(
                "clock '{}' period is too short to toggle",
                clock.signal
            )));
        }
        if config.inputs.contains_key(&clock.signal) {
            return Err(ConfigError::ValidationError(format!(
                "'{}' is both a clock and a fixed input",
                clock.signal
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration::FS_PER_NS;

    #[test]
    fn parse_minimal_config() {
        let config = load_config_from_str("[simulation]\ntop = \"Counter\"\n").unwrap();
        assert_eq!(config.simulation.top, "Counter");
        assert_eq!(config.simulation.max_comb_depth, 1000);
        assert!(config.simulation.time.is_none());
        assert!(!config.trace.enabled);
        assert!(config.clock.is_empty());
        assert!(config.inputs.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[simulation]
top = "Counter"
time = "200ns"
max_comb_depth = 64

[trace]
enabled = true

[[clock]]
signal = "clock"
period = "10ns"

[inputs]
reset = 0
enable = 1
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.simulation.time.map(|d| d.as_fs()), Some(200 * FS_PER_NS));
        assert_eq!(config.simulation.max_comb_depth, 64);
        assert!(config.trace.enabled);
        assert_eq!(config.clock.len(), 1);
        assert_eq!(config.clock[0].period.as_fs(), 10 * FS_PER_NS);
        assert_eq!(config.inputs["enable"], 1);
    }

    #[test]
    fn missing_top_errors() {
        let err = load_config_from_str("[simulation]\ntop = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn missing_simulation_table_is_parse_error() {
        let err = load_config_from_str("[trace]\nenabled = true\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn invalid_toml_errors() {
        let err = load_config_from_str("this is not valid toml {{{}}}").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn zero_comb_depth_rejected() {
        let err =
            load_config_from_str("[simulation]\ntop = \"T\"\nmax_comb_depth = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn clock_driven_as_input_rejected() {
        let toml = r#"
[simulation]
top = "T"
[[clock]]
signal = "clk"
period = "10ns"
[inputs]
clk = 0
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[simulation]\ntop = \"Top\"\n").unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.simulation.top, "Top");
    }

    #[test]
    fn load_from_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("custom.toml");
        std::fs::write(&file, "[simulation]\ntop = \"Other\"\n").unwrap();
        assert_eq!(load_config(&file).unwrap().simulation.top, "Other");
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
