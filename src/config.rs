//! Viewer configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config and
//! equals [`ViewerConfig::default`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cubemap::{Coloring, DEFAULT_FACE_SIZE};
use crate::render::DEFAULT_BLUR_ITERATIONS;

fn default_title() -> String {
    "Bloom MVP".to_string()
}

fn default_width() -> u32 {
    800
}

fn default_height() -> u32 {
    600
}

fn default_sample_count() -> u32 {
    4
}

fn default_blur_iterations() -> u32 {
    DEFAULT_BLUR_ITERATIONS
}

fn default_face_size() -> u32 {
    DEFAULT_FACE_SIZE
}

/// Skybox scene settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkyboxConfig {
    #[serde(default)]
    pub coloring: Coloring,

    /// Edge length of each cubemap face in texels.
    #[serde(default = "default_face_size")]
    pub face_size: u32,

    /// Where to write `pos_x.png` / `pos_y.png`. No dump when unset.
    #[serde(default)]
    pub dump_dir: Option<PathBuf>,
}

impl Default for SkyboxConfig {
    fn default() -> Self {
        Self {
            coloring: Coloring::default(),
            face_size: default_face_size(),
            dump_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerConfig {
    #[serde(default = "default_title")]
    pub title: String,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// MSAA samples of the window framebuffer (1 or 4).
    #[serde(default = "default_sample_count")]
    pub sample_count: u32,

    #[serde(default = "default_blur_iterations")]
    pub blur_iterations: u32,

    #[serde(default)]
    pub skybox: SkyboxConfig,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            width: default_width(),
            height: default_height(),
            sample_count: default_sample_count(),
            blur_iterations: default_blur_iterations(),
            skybox: SkyboxConfig::default(),
        }
    }
}

impl ViewerConfig {
    /// Load a config from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {:?}: {}", path, e))?;
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config file {:?}: {}", path, e))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err("Width and height must be positive".to_string());
        }
        if !matches!(self.sample_count, 1 | 4) {
            return Err(format!("Sample count must be 1 or 4, got {}", self.sample_count));
        }
        if self.skybox.face_size == 0 {
            return Err("Cubemap face size must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_fixed_window() {
        let config = ViewerConfig::default();
        assert_eq!(config.title, "Bloom MVP");
        assert_eq!((config.width, config.height), (800, 600));
        assert_eq!(config.sample_count, 4);
        assert_eq!(config.blur_iterations, 10);
        assert_eq!(config.skybox.face_size, 1024);
        assert_eq!(config.skybox.coloring, Coloring::Gradient);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_json_equals_default() {
        let config: ViewerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ViewerConfig::default());
    }

    #[test]
    fn test_camel_case_fields() {
        let json = r#"{
            "sampleCount": 1,
            "blurIterations": 3,
            "skybox": { "coloring": "noise", "faceSize": 64, "dumpDir": "faces" }
        }"#;
        let config: ViewerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.sample_count, 1);
        assert_eq!(config.blur_iterations, 3);
        assert_eq!(config.skybox.coloring, Coloring::Noise);
        assert_eq!(config.skybox.face_size, 64);
        assert_eq!(config.skybox.dump_dir, Some(PathBuf::from("faces")));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = ViewerConfig {
            width: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.width = 800;
        config.sample_count = 2;
        assert!(config.validate().is_err());

        config.sample_count = 1;
        config.skybox.face_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("viewer.json");
        std::fs::write(&path, r#"{ "width": 320, "height": 240 }"#).unwrap();

        let config = ViewerConfig::from_file(&path).unwrap();
        assert_eq!((config.width, config.height), (320, 240));

        assert!(ViewerConfig::from_file(&dir.path().join("missing.json")).is_err());
    }
}
