//! Configuration and state file I/O.

use coolq_core::{ControllerConfig, PersistedState};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use crate::Result;

/// Parse a TOML controller configuration. Missing keys take their defaults;
/// out-of-range values are logged here and replaced at tick time.
pub fn load_config(path: impl AsRef<Path>) -> Result<ControllerConfig> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let config: ControllerConfig = toml::from_str(&text)?;

    for warning in config.validate() {
        log::warn!("{}: {}", path.display(), warning);
    }
    log::info!("loaded config {} ({})", path.display(), &config_digest(&config)?[..12]);
    Ok(config)
}

/// Default configuration rendered as TOML.
pub fn default_config_toml() -> Result<String> {
    Ok(toml::to_string_pretty(&ControllerConfig::default())?)
}

/// SHA-256 over the canonical JSON form, hex encoded. Identifies the
/// configuration a run or a state file was produced with.
pub fn config_digest(config: &ControllerConfig) -> Result<String> {
    let canonical = serde_json::to_vec(config)?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

/// Read a persisted controller state file.
pub fn load_state_file(path: impl AsRef<Path>) -> Result<PersistedState> {
    let data = fs::read(path.as_ref())?;
    Ok(serde_json::from_slice(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_toml_round_trips() {
        let text = default_config_toml().unwrap();
        let parsed: ControllerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, ControllerConfig::default());
    }

    #[test]
    fn test_partial_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "timer_interval_secs = 30\n\n[learning]\nalpha = 0.2\n\n[actions]\npower_levels = [0, 40, 70, 100]\n"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.timer_interval_secs, 30);
        assert_eq!(config.learning.alpha, 0.2);
        assert_eq!(config.learning.gamma, 0.9);
        assert_eq!(config.actions.power_levels, vec![0, 40, 70, 100]);
    }

    #[test]
    fn test_digest_tracks_changes() {
        let a = ControllerConfig::default();
        let mut b = a.clone();
        assert_eq!(config_digest(&a).unwrap(), config_digest(&b).unwrap());

        b.learning.alpha = 0.2;
        let digest = config_digest(&b).unwrap();
        assert_ne!(config_digest(&a).unwrap(), digest);
        assert_eq!(digest.len(), 64);
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[learning\nalpha = ").unwrap();
        assert!(load_config(file.path()).is_err());
    }
}
