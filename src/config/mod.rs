//! Configuration management for mwl
//!
//! Settings are loaded from a TOML file. Every section is optional; missing
//! sections and fields fall back to their defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main configuration struct containing all mwl settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MwlConfig {
    /// Logging and diagnostics
    #[serde(default)]
    pub general: GeneralConfig,

    /// Toplevel window defaults
    #[serde(default)]
    pub window: WindowConfig,

    /// Input decoding
    #[serde(default)]
    pub input: InputConfig,
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable debug logging
    pub debug: bool,

    /// env_logger filter used when `debug` is off
    pub log_filter: String,
}

/// Window settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    /// xdg_toplevel app id reported to the compositor
    pub app_id: String,

    /// Color `show()` clears a new window to (0xAARRGGBB, alpha ignored)
    pub clear_color: u32,

    /// Ask for server-side decorations when the compositor offers them
    pub server_side_decorations: bool,

    /// Track the compositor's preferred fractional scale
    pub fractional_scale: bool,
}

/// Input settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InputConfig {
    /// Flip every decoded scroll value on top of the natural scrolling flag
    pub scroll_invert: bool,

    /// Surface units one wheel notch corresponds to for sources that only
    /// report continuous axis values (touchpads, trackpoints)
    pub continuous_scroll_step: f64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            debug: false,
            log_filter: "info".to_string(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            app_id: "mwl".to_string(),
            clear_color: 0xFF22_2222,
            server_side_decorations: true,
            fractional_scale: true,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            scroll_invert: false,
            continuous_scroll_step: 10.0,
        }
    }
}

impl MwlConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Expand ~ to home directory
        let expanded_path = if path.to_string_lossy().starts_with('~') {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            Path::new(&home).join(path.strip_prefix("~").unwrap_or(path))
        } else {
            path.to_path_buf()
        };

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: MwlConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.window.app_id.trim().is_empty() {
            anyhow::bail!("Invalid app_id: must not be empty");
        }

        if !(self.input.continuous_scroll_step > 0.0) {
            anyhow::bail!(
                "Invalid continuous_scroll_step: {} (must be greater than 0.0)",
                self.input.continuous_scroll_step
            );
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }

    /// env_logger filter implied by the general section
    pub fn log_filter(&self) -> &str {
        if self.general.debug {
            "debug"
        } else {
            &self.general.log_filter
        }
    }
}

#[cfg(test)]
mod tests;
