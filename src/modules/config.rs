use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for placement pacing, error ceilings and storage locations.
///
/// Every field has a default, so a config file only needs the keys it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Root holding one subdirectory per structure category.
    pub schematics_dir: PathBuf,
    pub categories: Vec<String>,
    /// Root for per-agent persisted build state.
    pub state_dir: PathBuf,

    pub placement_delay_ms: u64,
    pub layer_delay_ms: u64,
    pub rotation_settle_ms: u64,
    pub verify_delay_ms: u64,
    pub error_cooldown_ms: u64,

    /// Health (out of 20) below which a survival build pauses.
    pub health_threshold: f32,
    pub layer_error_limit: u32,
    pub soft_error_ceiling: u32,
    pub hard_error_ceiling: u32,
    pub max_material_retries: u32,
    pub snapshot_every: u32,

    pub reach: f64,
    pub storage_radius: f64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            schematics_dir: PathBuf::from("schematics"),
            categories: ["buildings", "decorations", "farms", "utility", "misc"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            state_dir: PathBuf::from(".voxelwright"),
            placement_delay_ms: 100,
            layer_delay_ms: 500,
            rotation_settle_ms: 250,
            verify_delay_ms: 150,
            error_cooldown_ms: 5_000,
            health_threshold: 6.0,
            layer_error_limit: 30,
            soft_error_ceiling: 50,
            hard_error_ceiling: 75,
            max_material_retries: 3,
            snapshot_every: 10,
            reach: 4.5,
            storage_radius: 16.0,
        }
    }
}

impl BuildConfig {
    /// Same thresholds, no pacing delays. Used by tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            placement_delay_ms: 0,
            layer_delay_ms: 0,
            rotation_settle_ms: 0,
            verify_delay_ms: 0,
            error_cooldown_ms: 0,
            ..Self::default()
        }
    }

    pub fn placement_delay(&self) -> Duration {
        Duration::from_millis(self.placement_delay_ms)
    }

    pub fn layer_delay(&self) -> Duration {
        Duration::from_millis(self.layer_delay_ms)
    }

    pub fn rotation_settle(&self) -> Duration {
        Duration::from_millis(self.rotation_settle_ms)
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }

    pub fn error_cooldown(&self) -> Duration {
        Duration::from_millis(self.error_cooldown_ms)
    }
}

/// Load a config file; a missing or empty file yields the defaults.
pub fn load_config(path: &Path) -> io::Result<BuildConfig> {
    if !path.exists() {
        return Ok(BuildConfig::default());
    }

    let bytes = fs::read(path)?;
    if bytes.is_empty() {
        return Ok(BuildConfig::default());
    }

    let config: BuildConfig = serde_json::from_slice(&bytes).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("failed to parse config {}: {}", path.display(), e),
        )
    })?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, BuildConfig::default());
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "layer_error_limit": 5, "reach": 3.0 }"#).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.layer_error_limit, 5);
        assert_eq!(config.reach, 3.0);
        assert_eq!(config.hard_error_ceiling, 75);
        assert_eq!(config.categories.len(), 5);
    }

    #[test]
    fn malformed_file_is_invalid_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ nope").unwrap();
        let err = load_config(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
