use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CullConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Distance from the reference point within which instances get full
    /// detail. Compared squared at runtime.
    #[serde(default = "CullConfig::default_distance")]
    pub distance: f32,
}

impl CullConfig {
    fn default_distance() -> f32 {
        75.0
    }

    pub fn max_distance_sq(&self) -> f32 {
        self.distance * self.distance
    }
}

impl Default for CullConfig {
    fn default() -> Self {
        Self { enabled: false, distance: Self::default_distance() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrowdConfig {
    #[serde(default)]
    pub cull: CullConfig,
    /// Index of the mesh subset used for the indirect draw arguments.
    #[serde(default)]
    pub submesh_index: usize,
    #[serde(default = "CrowdConfig::default_clear_color")]
    pub clear_color: [f64; 4],
}

impl CrowdConfig {
    fn default_clear_color() -> [f64; 4] {
        [0.05, 0.06, 0.1, 1.0]
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read crowd config {}", path.display()))?;
        let config: CrowdConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse crowd config {}", path.display()))?;
        Ok(config)
    }
}

impl Default for CrowdConfig {
    fn default() -> Self {
        Self {
            cull: CullConfig::default(),
            submesh_index: 0,
            clear_color: Self::default_clear_color(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_disable_culling() {
        let config = CrowdConfig::default();
        assert!(!config.cull.enabled);
        assert_eq!(config.submesh_index, 0);
        assert_eq!(config.cull.distance, 75.0);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: CrowdConfig =
            serde_json::from_str(r#"{ "cull": { "enabled": true, "distance": 30.0 } }"#).unwrap();
        assert!(config.cull.enabled);
        assert_eq!(config.cull.distance, 30.0);
        assert_eq!(config.cull.max_distance_sq(), 900.0);
        assert_eq!(config.submesh_index, 0);
    }

    #[test]
    fn load_from_path_reports_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = CrowdConfig::load_from_path(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }
}
