//! Record/replay session configuration (spec section 6.3).
//!
//! `config.rs` in the teacher hand-rolls its JSON to dodge a serde
//! dependency on a single struct; everywhere else it actually needs
//! structured JSON (`version_check.rs`'s `GitHubRelease`) it reaches
//! for `#[derive(Deserialize)]`. This config has no such constraint,
//! so it follows the derive path and adds `Serialize` for the
//! round-trip `save`/`load` this session needs that a one-way update
//! check doesn't.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

fn default_suffix() -> String {
    "replay_qcow".to_string()
}

fn json_as_io(e: serde_json::Error) -> crate::error::ReplayError {
    crate::error::ReplayError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Options recognized when activating record or play (spec section 6.3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Log file path.
    pub fname: PathBuf,
    /// Filename suffix for disk images used in snapshots.
    #[serde(default = "default_suffix")]
    pub suffix: String,
    /// Left-shift applied to the instruction counter when deriving
    /// virtual CPU time; 0 disables icount-based clock.
    #[serde(default)]
    pub icount: u8,
    /// Auto-snapshot interval in RECORD, in milliseconds; 0 means
    /// snapshot once at startup only.
    #[serde(default)]
    pub period: u64,
}

impl ReplayConfig {
    pub fn new(fname: impl Into<PathBuf>) -> Self {
        Self {
            fname: fname.into(),
            suffix: default_suffix(),
            icount: 0,
            period: 0,
        }
    }

    /// Loads a config from a JSON file on disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(json_as_io)
    }

    /// Saves the config as JSON, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(json_as_io)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = ReplayConfig::new("session.rr");
        assert_eq!(cfg.suffix, "replay_qcow");
        assert_eq!(cfg.icount, 0);
        assert_eq!(cfg.period, 0);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay_config.json");

        let mut cfg = ReplayConfig::new("session.rr");
        cfg.icount = 4;
        cfg.period = 1_000;
        cfg.save(&path).unwrap();

        let loaded = ReplayConfig::load(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn missing_optional_fields_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay_config.json");
        fs::write(&path, r#"{"fname": "a.rr"}"#).unwrap();

        let loaded = ReplayConfig::load(&path).unwrap();
        assert_eq!(loaded.suffix, "replay_qcow");
        assert_eq!(loaded.icount, 0);
        assert_eq!(loaded.period, 0);
    }
}
