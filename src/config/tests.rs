//! Unit tests for configuration module
//!
//! Tests configuration parsing, validation, serialization/deserialization,
//! and edge cases in configuration handling.

use super::*;
use anyhow::Result;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_default_configuration_is_valid() {
    let config = MwlConfig::default();

    assert!(config.validate().is_ok());
    assert_eq!(config.window.app_id, "mwl");
    assert_eq!(config.window.clear_color, 0xFF22_2222);
    assert!(config.window.server_side_decorations);
    assert!(!config.input.scroll_invert);
    assert!(config.input.continuous_scroll_step > 0.0);
}

#[test]
fn test_configuration_serialization_roundtrip() -> Result<()> {
    let mut original_config = MwlConfig::default();
    original_config.window.app_id = "voxel-game".to_string();
    original_config.input.scroll_invert = true;

    let toml_string = toml::to_string(&original_config)?;
    let deserialized_config: MwlConfig = toml::from_str(&toml_string)?;

    assert_eq!(original_config, deserialized_config);

    Ok(())
}

#[test]
fn test_configuration_from_file() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("test_config.toml");

    let test_config = r#"
[general]
debug = false
log_filter = "mwl=trace"

[window]
app_id = "voxel-game"
clear_color = 4278190335
server_side_decorations = false
fractional_scale = true

[input]
scroll_invert = true
continuous_scroll_step = 12.5
"#;

    fs::write(&file_path, test_config)?;

    let config = MwlConfig::load(&file_path)?;

    assert_eq!(config.general.log_filter, "mwl=trace");
    assert_eq!(config.window.app_id, "voxel-game");
    assert_eq!(config.window.clear_color, 0xFF00_00FF);
    assert!(!config.window.server_side_decorations);
    assert!(config.input.scroll_invert);
    assert_eq!(config.input.continuous_scroll_step, 12.5);

    Ok(())
}

#[test]
fn test_partial_configuration_uses_defaults() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("partial_config.toml");

    let partial_config = r#"
[window]
app_id = "checkerboard"
"#;

    fs::write(&file_path, partial_config)?;

    let config = MwlConfig::load(&file_path)?;

    assert_eq!(config.window.app_id, "checkerboard");
    // Fields missing from the section keep their defaults
    assert_eq!(config.window.clear_color, WindowConfig::default().clear_color);
    assert_eq!(config.input, InputConfig::default());
    assert_eq!(config.general, GeneralConfig::default());

    Ok(())
}

#[test]
fn test_malformed_toml_handling() {
    let dir = tempdir().unwrap();
    let file_path = dir.path().join("malformed_config.toml");

    let malformed_config = r#"
[window
app_id = "x"

[input]
continuous_scroll_step = "not a number"
"#;

    fs::write(&file_path, malformed_config).unwrap();

    let result = MwlConfig::load(&file_path);
    assert!(result.is_err());
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempdir().unwrap();
    let result = MwlConfig::load(dir.path().join("does_not_exist.toml"));
    assert!(result.is_err());
}

#[test]
fn test_configuration_validation() {
    let config = MwlConfig::default();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.window.app_id = "   ".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.input.continuous_scroll_step = 0.0;
    assert!(invalid_config.validate().is_err());

    invalid_config.input.continuous_scroll_step = f64::NAN;
    assert!(invalid_config.validate().is_err());
}

#[test]
fn test_save_then_load() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("saved.toml");

    let mut config = MwlConfig::default();
    config.general.debug = true;
    config.save(&file_path)?;

    let loaded = MwlConfig::load(&file_path)?;
    assert_eq!(loaded, config);
    assert_eq!(loaded.log_filter(), "debug");

    Ok(())
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_scroll_step_bounds(step in -20.0f64..20.0f64) {
            let mut config = MwlConfig::default();
            config.input.continuous_scroll_step = step;

            let result = config.validate();
            if step > 0.0 {
                prop_assert!(result.is_ok());
            } else {
                prop_assert!(result.is_err());
            }
        }
    }
}
