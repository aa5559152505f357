use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::camera::DEFAULT_CAPTURE_QUALITY;
use crate::estimation::DEFAULT_PROMPT;

pub const CONFIG_FILE: &str = "calorie_snap.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub display: DisplayConfig,
    pub camera: CameraConfig,
    pub estimation: EstimationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraBackend {
    Libcamera,
    TestPattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub backend: CameraBackend,
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
    pub frame_interval_ms: u64,
    pub frame_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimationConfig {
    /// Environment variable holding the service credential.
    pub credential_env: String,
    /// Program (plus arguments) that performs the inference call.
    pub command: String,
    pub model: String,
    pub prompt: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            display: DisplayConfig {
                width: 720,
                height: 900,
                fullscreen: false,
            },
            camera: CameraConfig {
                backend: CameraBackend::Libcamera,
                width: 1280,
                height: 960,
                jpeg_quality: DEFAULT_CAPTURE_QUALITY,
                frame_interval_ms: 100,
                frame_path: PathBuf::from("/tmp/calorie_snap_preview.jpg"),
            },
            estimation: EstimationConfig {
                credential_env: "GEMINI_API_KEY".to_string(),
                command: "calorie-snap-estimate".to_string(),
                model: "gemini-2.5-flash".to_string(),
                prompt: DEFAULT_PROMPT.to_string(),
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from(CONFIG_FILE);

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            log::info!("Config file not found, creating default configuration");
            let default_config = Self::default();
            default_config.save_to_file(&config_path)?;
            Ok(default_config)
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| "Failed to parse configuration file")?;

        config.validate()?;
        log::info!("Configuration loaded from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
            }
        }

        std::fs::write(path.as_ref(), contents)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        log::info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.display.width == 0 || self.display.height == 0 {
            return Err(anyhow::anyhow!("Invalid display dimensions"));
        }

        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow::anyhow!(
                "Invalid camera resolution: {}x{}",
                self.camera.width,
                self.camera.height
            ));
        }

        if !(1..=100).contains(&self.camera.jpeg_quality) {
            return Err(anyhow::anyhow!("Invalid JPEG quality: {}", self.camera.jpeg_quality));
        }

        if self.camera.frame_interval_ms == 0 {
            return Err(anyhow::anyhow!("Invalid camera frame interval"));
        }

        if self.estimation.credential_env.trim().is_empty() {
            return Err(anyhow::anyhow!("Credential environment variable name is empty"));
        }

        if self.estimation.command.trim().is_empty() {
            return Err(anyhow::anyhow!("Estimation command is empty"));
        }

        Ok(())
    }

    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.camera.frame_interval_ms)
    }

    /// Desktop development without camera hardware.
    pub fn development_desktop() -> Self {
        Config {
            camera: CameraConfig {
                backend: CameraBackend::TestPattern,
                width: 640,
                height: 480,
                ..Config::default().camera
            },
            ..Default::default()
        }
    }
}

// Configuration builder for easier setup
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn display_size(mut self, width: u32, height: u32) -> Self {
        self.config.display.width = width;
        self.config.display.height = height;
        self
    }

    pub fn camera_backend(mut self, backend: CameraBackend) -> Self {
        self.config.camera.backend = backend;
        self
    }

    pub fn camera_resolution(mut self, width: u32, height: u32) -> Self {
        self.config.camera.width = width;
        self.config.camera.height = height;
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.camera.jpeg_quality = quality;
        self
    }

    pub fn credential_env(mut self, var: &str) -> Self {
        self.config.estimation.credential_env = var.to_string();
        self
    }

    pub fn estimation_command(mut self, command: &str) -> Self {
        self.config.estimation.command = command.to_string();
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.camera.jpeg_quality, 90);
        assert_eq!(config.estimation.credential_env, "GEMINI_API_KEY");
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .display_size(1024, 768)
            .camera_backend(CameraBackend::TestPattern)
            .camera_resolution(640, 480)
            .jpeg_quality(75)
            .credential_env("FOOD_API_KEY")
            .build()
            .unwrap();

        assert_eq!(config.display.width, 1024);
        assert_eq!(config.camera.backend, CameraBackend::TestPattern);
        assert_eq!(config.camera.width, 640);
        assert_eq!(config.camera.jpeg_quality, 75);
        assert_eq!(config.estimation.credential_env, "FOOD_API_KEY");
    }

    #[test]
    fn test_config_validation() {
        assert!(ConfigBuilder::new().jpeg_quality(0).build().is_err());
        assert!(ConfigBuilder::new().jpeg_quality(101).build().is_err());
        assert!(ConfigBuilder::new().camera_resolution(0, 480).build().is_err());
        assert!(ConfigBuilder::new().credential_env(" ").build().is_err());
        assert!(ConfigBuilder::new().estimation_command("").build().is_err());
    }

    #[test]
    fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("test_config.toml");

        let original_config = Config::development_desktop();
        original_config.save_to_file(&config_path).unwrap();

        let loaded_config = Config::load_from_file(&config_path).unwrap();

        assert_eq!(loaded_config.camera.backend, CameraBackend::TestPattern);
        assert_eq!(original_config.camera.width, loaded_config.camera.width);
        assert_eq!(original_config.estimation.prompt, loaded_config.estimation.prompt);
    }

    #[test]
    fn test_backend_names_in_toml() {
        let toml_text = toml::to_string_pretty(&Config::development_desktop()).unwrap();
        assert!(toml_text.contains("backend = \"test_pattern\""));
    }
}
