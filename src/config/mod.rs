mod loader;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use loader::load_config;

use crate::sync::FenceTimeout;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub scene: SceneConfig,
}

/// Window configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WindowConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_window_extent")]
    pub width: u32,
    #[serde(default = "default_window_extent")]
    pub height: u32,
}

fn default_title() -> String {
    "Compute shader ray tracing".to_string()
}

fn default_window_extent() -> u32 {
    720
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            width: default_window_extent(),
            height: default_window_extent(),
        }
    }
}

/// Renderer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RenderConfig {
    /// Edge length of the square shared image written by the compute stage
    #[serde(default = "default_target_size")]
    pub target_size: u32,
    /// Resize the shared image to the surface instead of keeping `target_size`
    #[serde(default)]
    pub follow_surface: bool,
    #[serde(default = "default_frames_in_flight")]
    pub frames_in_flight: usize,
    #[serde(default)]
    pub present_mode: PresentMode,
    /// Compute fence wait timeout; absent means wait forever
    #[serde(default)]
    pub fence_timeout_ms: Option<u64>,
    #[serde(default)]
    pub validation: bool,
    #[serde(default = "default_shader_dir")]
    pub shader_dir: PathBuf,
    /// Use a compute-only queue family when the device exposes one
    #[serde(default = "default_prefer_dedicated_compute")]
    pub prefer_dedicated_compute: bool,
}

fn default_target_size() -> u32 {
    2048
}

fn default_frames_in_flight() -> usize {
    2
}

fn default_shader_dir() -> PathBuf {
    PathBuf::from("shaders")
}

fn default_prefer_dedicated_compute() -> bool {
    true
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            target_size: default_target_size(),
            follow_surface: false,
            frames_in_flight: default_frames_in_flight(),
            present_mode: PresentMode::default(),
            fence_timeout_ms: None,
            validation: false,
            shader_dir: default_shader_dir(),
            prefer_dedicated_compute: default_prefer_dedicated_compute(),
        }
    }
}

impl RenderConfig {
    pub fn fence_timeout(&self) -> FenceTimeout {
        match self.fence_timeout_ms {
            Some(ms) => FenceTimeout::Bounded(Duration::from_millis(ms)),
            None => FenceTimeout::Unbounded,
        }
    }
}

/// Swapchain presentation mode
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresentMode {
    #[default]
    Fifo,
    Mailbox,
    Immediate,
}

/// Scene uniforms fed to the compute shader
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SceneConfig {
    #[serde(default)]
    pub light_position: [f32; 3],
    #[serde(default)]
    pub fog_color: [f32; 4],
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub light_orbit: LightOrbitConfig,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            light_position: [0.0; 3],
            fog_color: [0.0; 4],
            camera: CameraConfig::default(),
            light_orbit: LightOrbitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub position: [f32; 3],
    #[serde(default = "default_look_at")]
    pub look_at: [f32; 3],
    /// Field of view in degrees
    #[serde(default = "default_fov")]
    pub fov: f32,
}

fn default_look_at() -> [f32; 3] {
    [0.0, 0.5, 0.0]
}

fn default_fov() -> f32 {
    10.0
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            look_at: default_look_at(),
            fov: default_fov(),
        }
    }
}

/// Animates the light on a circle around the scene origin
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LightOrbitConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_orbit_radius")]
    pub radius: f32,
    /// Revolutions per second
    #[serde(default = "default_orbit_speed")]
    pub speed: f32,
}

fn default_orbit_radius() -> f32 {
    2.0
}

fn default_orbit_speed() -> f32 {
    0.25
}

impl Default for LightOrbitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            radius: default_orbit_radius(),
            speed: default_orbit_speed(),
        }
    }
}

impl AppConfig {
    /// Load and validate configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise fall back to defaults
    pub fn load_or_default(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        match config_path {
            Some(path) => Self::from_file(path),
            None => {
                log::debug!("No config file given, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Validation(
                "window width and height must be non-zero".to_string(),
            ));
        }
        if self.render.target_size == 0 {
            return Err(ConfigError::Validation(
                "render.target_size must be non-zero".to_string(),
            ));
        }
        if !(1..=8).contains(&self.render.frames_in_flight) {
            return Err(ConfigError::Validation(format!(
                "render.frames_in_flight must be between 1 and 8, got {}",
                self.render.frames_in_flight
            )));
        }
        if self.render.fence_timeout_ms == Some(0) {
            return Err(ConfigError::Validation(
                "render.fence_timeout_ms must be non-zero; omit it to wait without a limit"
                    .to_string(),
            ));
        }
        let fov = self.scene.camera.fov;
        if !(fov > 0.0 && fov < 180.0) {
            return Err(ConfigError::Validation(format!(
                "scene.camera.fov must be in (0, 180) degrees, got {}",
                fov
            )));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to read configuration file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window.width, 720);
        assert_eq!(config.render.target_size, 2048);
        assert_eq!(config.render.frames_in_flight, 2);
        assert_eq!(config.scene.camera.look_at, [0.0, 0.5, 0.0]);
    }

    #[test]
    fn test_fence_timeout_policy() {
        let mut render = RenderConfig::default();
        assert_eq!(render.fence_timeout(), FenceTimeout::Unbounded);

        render.fence_timeout_ms = Some(500);
        assert_eq!(
            render.fence_timeout(),
            FenceTimeout::Bounded(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_present_mode_deserialize() {
        let fifo: PresentMode = serde_yaml::from_str("fifo").unwrap();
        let mailbox: PresentMode = serde_yaml::from_str("mailbox").unwrap();
        let immediate: PresentMode = serde_yaml::from_str("immediate").unwrap();
        assert_eq!(fifo, PresentMode::Fifo);
        assert_eq!(mailbox, PresentMode::Mailbox);
        assert_eq!(immediate, PresentMode::Immediate);
    }

    #[test]
    fn test_validation_rejects_zero_target() {
        let mut config = AppConfig::default();
        config.render.target_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_frames_in_flight_out_of_range() {
        let mut config = AppConfig::default();
        config.render.frames_in_flight = 0;
        assert!(config.validate().is_err());
        config.render.frames_in_flight = 9;
        assert!(config.validate().is_err());
        config.render.frames_in_flight = 3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_fence_timeout() {
        let mut config = AppConfig::default();
        config.render.fence_timeout_ms = Some(0);
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Validation(_)
        ));

        config.render.fence_timeout_ms = Some(1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_fov() {
        let mut config = AppConfig::default();
        config.scene.camera.fov = 0.0;
        assert!(config.validate().is_err());
        config.scene.camera.fov = 180.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_default_without_path() {
        let config = AppConfig::load_or_default(None).unwrap();
        assert_eq!(config.window.title, "Compute shader ray tracing");
    }
}
