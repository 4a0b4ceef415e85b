// Configuration - load settings from config.toml
//
// Provides sensible defaults if the config file is missing or has errors.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Quad Renderer".to_string(),
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Render pass clear color, RGBA in the 0-1 range.
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
        }
    }
}

impl Config {
    /// Load configuration from config.toml, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {}. Using defaults.", e);
            Config::default()
        })
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_a_windowed_800_by_600_black_clear() {
        let config = Config::default();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.graphics.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert!(config.debug.validation_layers);
    }

    #[test]
    fn partial_config_fills_missing_sections() {
        let config: Config = toml::from_str("[window]\nwidth = 1024\nheight = 768\n").unwrap();
        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 768);
        assert_eq!(config.window.title, "Quad Renderer");
        assert_eq!(config.graphics.clear_color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load_from_path("does-not-exist.toml").unwrap();
        assert_eq!(config.window.width, 800);
    }
}
