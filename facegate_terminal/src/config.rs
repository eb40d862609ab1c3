//! FaceGate Terminal - Configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::embeddings::DEFAULT_DATASET_FILE;
use crate::envelope::DEFAULT_REPLAY_WINDOW_SECS;
use crate::error::{TerminalError, TerminalResult};
use crate::pairing::DEFAULT_PAIRING_PATH;

pub const DEFAULT_DATASET_PATH: &str = "/api/terminal/dataset";

// ═══════════════════════════════════════════════════════════════════════════════
// MATCHING
// ═══════════════════════════════════════════════════════════════════════════════

/// Recognition and calibration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Threshold used when calibration is not possible
    pub default_threshold: f32,
    pub target_false_match_rate: f64,
    /// Max impostor pairs sampled per calibration
    pub sample_limit: usize,
    pub min_identities: usize,
    pub min_impostor_pairs: usize,
    pub threshold_floor: f32,
    pub threshold_ceiling: f32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            default_threshold: 1.15,
            target_false_match_rate: 1e-4,
            sample_limit: 6000,
            min_identities: 6,
            min_impostor_pairs: 20,
            threshold_floor: 0.6,
            threshold_ceiling: 1.35,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TERMINAL
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Root for the dataset file
    pub data_dir: PathBuf,
    /// Keystore directory; `<data_dir>/keys` when unset
    pub keyvault_dir: Option<PathBuf>,
    pub dataset_file: String,
    pub replay_window_secs: u64,
    pub pairing_path: String,
    pub dataset_path: String,
    pub matching: MatchConfig,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            keyvault_dir: None,
            dataset_file: DEFAULT_DATASET_FILE.into(),
            replay_window_secs: DEFAULT_REPLAY_WINDOW_SECS,
            pairing_path: DEFAULT_PAIRING_PATH.into(),
            dataset_path: DEFAULT_DATASET_PATH.into(),
            matching: MatchConfig::default(),
        }
    }
}

impl TerminalConfig {
    /// Defaults rooted at `data_dir`
    pub fn with_data_dir<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn keyvault_dir(&self) -> PathBuf {
        self.keyvault_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("keys"))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> TerminalResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| {
            TerminalError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_slice(&data).map_err(|e| {
            TerminalError::Config(format!("invalid config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> TerminalResult<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> TerminalResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> TerminalResult<()> {
        if self.replay_window_secs == 0 {
            return Err(TerminalError::Config("replay_window_secs must be positive".into()));
        }
        if self.dataset_file.trim().is_empty() {
            return Err(TerminalError::Config("dataset_file must not be empty".into()));
        }

        let m = &self.matching;
        if !(m.target_false_match_rate > 0.0 && m.target_false_match_rate <= 1.0) {
            return Err(TerminalError::Config(format!(
                "target_false_match_rate must be in (0, 1], got {}",
                m.target_false_match_rate
            )));
        }
        if !(m.threshold_floor <= m.threshold_ceiling) {
            return Err(TerminalError::Config(format!(
                "threshold_floor {} exceeds threshold_ceiling {}",
                m.threshold_floor, m.threshold_ceiling
            )));
        }
        if !m.default_threshold.is_finite() || m.default_threshold <= 0.0 {
            return Err(TerminalError::Config("default_threshold must be positive".into()));
        }
        Ok(())
    }
}

/// `<local data dir>/facegate`, or `./facegate` when the platform has none
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("facegate")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = TerminalConfig::with_data_dir("/var/lib/facegate");
        assert_eq!(config.keyvault_dir(), PathBuf::from("/var/lib/facegate/keys"));
        assert_eq!(config.dataset_file, "dataset.json");
        assert_eq!(config.replay_window_secs, 300);
        assert_eq!(config.matching.sample_limit, 6000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("facegate.json");
        std::fs::write(
            &path,
            br#"{"data_dir": "/srv/gate", "matching": {"target_false_match_rate": 0.001}}"#,
        )
        .unwrap();

        let config = TerminalConfig::load(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/gate"));
        assert_eq!(config.matching.target_false_match_rate, 0.001);
        assert_eq!(config.matching.min_identities, 6);
        assert_eq!(config.pairing_path, "/api/terminal/pair");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("facegate.json");

        let mut config = TerminalConfig::with_data_dir(dir.path());
        config.replay_window_secs = 120;
        config.save(&path).unwrap();

        assert_eq!(TerminalConfig::load(&path).unwrap(), config);
        assert_eq!(TerminalConfig::load_or_default(&path).unwrap(), config);
        assert!(TerminalConfig::load_or_default(dir.path().join("missing.json")).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = TerminalConfig::default();
        config.replay_window_secs = 0;
        assert!(matches!(config.validate(), Err(TerminalError::Config(_))));

        let mut config = TerminalConfig::default();
        config.matching.target_false_match_rate = 0.0;
        assert!(config.validate().is_err());
        config.matching.target_false_match_rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = TerminalConfig::default();
        config.matching.threshold_floor = 1.4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unreadable_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(TerminalConfig::load(&path), Err(TerminalError::Config(_))));
    }
}
