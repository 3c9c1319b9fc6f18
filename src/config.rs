use image::Rgb;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::error::Result;
use crate::overlay::{BoxStyle, BOX_STROKE_WIDTH};
use crate::types::{CameraSelectorMode, Orientation, ScreenSize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub defaults: Defaults,
    pub screen: ScreenConfig,
    pub view: ViewConfig,
    pub overlay: OverlayConfig,
    pub camera: CameraConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub camera: CameraSelectorMode,
    pub orientation: Orientation,
}

/// Display size used for gaze mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    pub width: u32,
    pub height: u32,
}

/// Size of the overlay view the preview is rendered into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub box_color_hex: String, // e.g. "#FFFFFF"
    pub box_stroke_width: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub front_index: u32,
    pub back_index: u32,
    /// Clockwise rotation that turns a sensor frame upright.
    pub rotation_degrees: u32,
    pub frame_interval_ms: u64,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 2280,
        }
    }
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 2280,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            box_color_hex: "#FFFFFF".to_string(),
            box_stroke_width: BOX_STROKE_WIDTH,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            front_index: 0,
            back_index: 1,
            // Sensors are landscape; a quarter turn gives the portrait default.
            rotation_degrees: 90,
            frame_interval_ms: 33,
        }
    }
}

impl AppConfig {
    /// Reads the config at `path`. A missing file yields defaults, which are
    /// written out. A file that parses is written back so new fields show up
    /// in it. A file that fails to parse is left alone and defaults are used.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("Configuration file not found. Creating default at {}", path.display());
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)?;
        match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => {
                warn!("Error parsing config {}: {}. Using defaults, file left unchanged.", path.display(), e);
                Ok(Self::default())
            }
        }
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn screen_size(&self) -> ScreenSize {
        ScreenSize::new(self.screen.width, self.screen.height)
    }

    pub fn box_style(&self) -> BoxStyle {
        BoxStyle {
            color: parse_hex(&self.overlay.box_color_hex),
            stroke_width: self.overlay.box_stroke_width,
        }
    }
}

/// `#RRGGBB` to a color; anything else falls back to white.
pub fn parse_hex(hex: &str) -> Rgb<u8> {
    let channel = |range: std::ops::Range<usize>| {
        hex.get(range).and_then(|s| u8::from_str_radix(s, 16).ok())
    };
    if hex.len() == 7 && hex.starts_with('#') {
        if let (Some(r), Some(g), Some(b)) = (channel(1..3), channel(3..5), channel(5..7)) {
            return Rgb([r, g, b]);
        }
    }
    Rgb([255, 255, 255])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("gaze-overlay-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("#FF0000"), Rgb([255, 0, 0]));
        assert_eq!(parse_hex("#00FF00"), Rgb([0, 255, 0]));
        assert_eq!(parse_hex("#0000ff"), Rgb([0, 0, 255]));
        assert_eq!(parse_hex("invalid"), Rgb([255, 255, 255])); // Fallback
        assert_eq!(parse_hex("#GG0000"), Rgb([255, 255, 255]));
    }

    #[test]
    fn missing_file_writes_defaults() {
        let path = temp_path("missing.json");
        let _ = fs::remove_file(&path);

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());
        assert_eq!(config.defaults.camera, CameraSelectorMode::Front);
        assert_eq!(config.screen_size(), ScreenSize::new(1080, 2280));
        assert!(config.defaults.orientation.accepts_rotation(config.camera.rotation_degrees));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let path = temp_path("partial.json");
        fs::write(&path, r#"{ "defaults": { "camera": "back", "orientation": "landscape" }, "screen": { "width": 1920 } }"#).unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.defaults.camera, CameraSelectorMode::Back);
        assert_eq!(config.defaults.orientation, Orientation::Landscape);
        assert_eq!(config.screen.width, 1920);
        assert_eq!(config.screen.height, 2280);
        assert_eq!(config.box_style(), BoxStyle::default());

        // Written back with every field present.
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("box_stroke_width"));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn broken_file_falls_back_to_defaults() {
        let path = temp_path("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config, AppConfig::default());
        // The user's file is kept for them to fix.
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
        fs::remove_file(&path).unwrap();
    }
}
