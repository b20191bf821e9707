// src/config.rs
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::events::Rectangle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyboardConfig {
    pub repeat_delay_ms: u64,
    pub repeat_rate_hz: u32, // Repeats per second once the delay has elapsed
    /// When set, the dispatcher generates repeats itself and drops hardware autorepeat.
    pub synthesize_repeat: bool,
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self {
            repeat_delay_ms: 600,
            repeat_rate_hz: 25,
            synthesize_repeat: true,
        }
    }
}

impl KeyboardConfig {
    pub fn repeat_delay(&self) -> Duration {
        Duration::from_millis(self.repeat_delay_ms)
    }

    pub fn repeat_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.repeat_rate_hz.max(1)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointerConfig {
    pub acceleration: f64, // -1.0 (slowest) ..= 1.0 (fastest), 0.0 is unaccelerated
    pub scroll_speed: f64,
    pub natural_scrolling: bool,
    pub left_handed: bool,
}

impl Default for PointerConfig {
    fn default() -> Self {
        Self {
            acceleration: 0.0,
            scroll_speed: 1.0,
            natural_scrolling: false,
            left_handed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TouchConfig {
    pub tap_to_click: bool,
    pub disable_while_typing: bool,
    // Display area absolute touch coordinates are mapped onto.
    pub target_width: f32,
    pub target_height: f32,
}

impl Default for TouchConfig {
    fn default() -> Self {
        Self {
            tap_to_click: true,
            disable_while_typing: true,
            target_width: 1920.0,
            target_height: 1080.0,
        }
    }
}

impl TouchConfig {
    pub fn target_rect(&self) -> Rectangle {
        Rectangle::new(0.0, 0.0, self.target_width, self.target_height)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Pending, unacknowledged events per channel before observers are told the client is blocked.
    pub backpressure_threshold: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            backpressure_threshold: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "text" or "json"
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InputConfig {
    #[serde(default)]
    pub keyboard: KeyboardConfig,
    #[serde(default)]
    pub pointer: PointerConfig,
    #[serde(default)]
    pub touch: TouchConfig,
    #[serde(default)]
    pub sender: SenderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl InputConfig {
    /// Loads the configuration from a TOML file.
    ///
    /// A missing file yields the defaults. Unreadable files, malformed TOML and
    /// out-of-range values are errors.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("InputConfig: Loading configuration from '{}'.", path.display());
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("InputConfig: Config file '{}' not found. Using default configuration.", path.display());
                return Ok(InputConfig::default());
            }
            Err(source) => {
                return Err(ConfigError::ReadError {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let config = Self::from_toml_str(&contents)?;
        debug!("InputConfig: Loaded {:?}", config);
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: InputConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(-1.0..=1.0).contains(&self.pointer.acceleration) {
            return Err(ConfigError::ValidationError(format!(
                "pointer.acceleration must be within -1.0..=1.0, got {}",
                self.pointer.acceleration
            )));
        }
        if self.pointer.scroll_speed <= 0.0 {
            return Err(ConfigError::ValidationError(
                "pointer.scroll_speed must be positive".to_string(),
            ));
        }
        if self.keyboard.repeat_rate_hz == 0 {
            return Err(ConfigError::ValidationError(
                "keyboard.repeat_rate_hz must be positive".to_string(),
            ));
        }
        if self.touch.target_width <= 0.0 || self.touch.target_height <= 0.0 {
            return Err(ConfigError::ValidationError(
                "touch target area must not be empty".to_string(),
            ));
        }
        if self.sender.backpressure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "sender.backpressure_threshold must be positive".to_string(),
            ));
        }
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "logging.level '{}' is not a known level",
                    other
                )))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = InputConfig::load_from_file(&dir.path().join("input.toml")).unwrap();
        assert_eq!(config, InputConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults_for_missing_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[keyboard]\nrepeat_delay_ms = 250\n\n[sender]\nbackpressure_threshold = 4\n"
        )
        .unwrap();

        let config = InputConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.keyboard.repeat_delay_ms, 250);
        assert_eq!(config.keyboard.repeat_rate_hz, 25);
        assert_eq!(config.sender.backpressure_threshold, 4);
        assert_eq!(config.pointer, PointerConfig::default());
    }

    #[test]
    fn test_invalid_threshold_is_rejected() {
        let err = InputConfig::from_toml_str("[sender]\nbackpressure_threshold = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = InputConfig::from_toml_str("[pointer\nacceleration = 2").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_repeat_interval_from_rate() {
        let keyboard = KeyboardConfig {
            repeat_rate_hz: 50,
            ..KeyboardConfig::default()
        };
        assert_eq!(keyboard.repeat_interval(), Duration::from_millis(20));
    }
}
