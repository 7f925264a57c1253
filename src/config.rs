//! Run configuration: kernel arity, launch geometry, verification tolerance
//! and device selection.
//!
//! Configuration is plain JSON. Every field has a default, so a partial file
//! (or no file at all) is valid.

use std::fs;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::accumulation_plan::KernelArity;
use crate::errors::{ConfigError, ConfigResult};
use crate::gpu::shaders::DEFAULT_WORKGROUP_SIZE;
use crate::verification::Tolerance;

/// Largest workgroup the default wgpu limits allow.
pub const MAX_WORKGROUP_SIZE: u32 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendSelection {
    #[default]
    Primary,
    All,
    Vulkan,
    Metal,
    Dx12,
    Gl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerPreference {
    None,
    LowPower,
    #[default]
    HighPerformance,
}

/// Which compute device to open.
///
/// Passed explicitly to the device context; nothing is read from the
/// process environment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub backends: BackendSelection,
    pub power_preference: PowerPreference,
    /// Index into the enumerated adapters. Overrides `power_preference`.
    pub adapter_index: Option<usize>,
    pub force_fallback_adapter: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorConfig {
    pub arity: KernelArity,
    pub workgroup_size: u32,
    pub tolerance: Tolerance,
    pub device: DeviceConfig,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            arity: KernelArity::Binary,
            workgroup_size: DEFAULT_WORKGROUP_SIZE,
            tolerance: Tolerance::default(),
            device: DeviceConfig::default(),
        }
    }
}

impl AccumulatorConfig {
    pub fn with_arity(mut self, arity: KernelArity) -> Self {
        self.arity = arity;
        self
    }

    pub fn with_workgroup_size(mut self, workgroup_size: u32) -> Self {
        self.workgroup_size = workgroup_size;
        self
    }

    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        self.device = device;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.workgroup_size == 0 || self.workgroup_size > MAX_WORKGROUP_SIZE {
            return Err(ConfigError::Validation {
                field: "workgroup_size".to_string(),
                message: format!(
                    "Workgroup size must be between 1 and {}, got {}",
                    MAX_WORKGROUP_SIZE, self.workgroup_size
                ),
            });
        }

        self.tolerance
            .validate()
            .map_err(|e| ConfigError::Validation {
                field: "tolerance".to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }
}

/// Configuration loader that handles JSON files with fallbacks
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load a configuration file, falling back to defaults when it does not exist.
    pub fn load_config(path: &str) -> ConfigResult<AccumulatorConfig> {
        let config = match fs::read_to_string(path) {
            Ok(content) => Self::parse(path, &content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Config file '{}' not found, using default configuration",
                    path
                );
                AccumulatorConfig::default()
            }
            Err(e) => {
                return Err(ConfigError::Io {
                    path: path.to_string(),
                    source: e,
                });
            }
        };
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn parse(path: &str, content: &str) -> ConfigResult<AccumulatorConfig> {
        let config: AccumulatorConfig =
            serde_json::from_str(content).map_err(|e| ConfigError::Parse {
                path: path.to_string(),
                source: e,
            })?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AccumulatorConfig::default();
        assert_eq!(config.arity, KernelArity::Binary);
        assert_eq!(config.workgroup_size, 64);
        assert_eq!(config.tolerance.relative, 0.001);
        assert_eq!(config.device.adapter_index, None);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_partial_config() {
        let config = ConfigLoader::parse(
            "inline",
            r#"{ "arity": "ternary", "device": { "adapter_index": 0, "backends": "vulkan" } }"#,
        )
        .unwrap();

        assert_eq!(config.arity, KernelArity::Ternary);
        assert_eq!(config.workgroup_size, DEFAULT_WORKGROUP_SIZE);
        assert_eq!(config.device.adapter_index, Some(0));
        assert_eq!(config.device.backends, BackendSelection::Vulkan);
        assert_eq!(config.device.power_preference, PowerPreference::HighPerformance);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            ConfigLoader::parse("inline", r#"{ "arity": "quaternary" }"#),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            ConfigLoader::parse("inline", r#"{ "workgroup_size": 0 }"#),
            Err(ConfigError::Validation { field, .. }) if field == "workgroup_size"
        ));
        assert!(matches!(
            ConfigLoader::parse("inline", r#"{ "workgroup_size": 1024 }"#),
            Err(ConfigError::Validation { .. })
        ));
        assert!(matches!(
            ConfigLoader::parse("inline", r#"{ "tolerance": { "relative": -1.0 } }"#),
            Err(ConfigError::Validation { field, .. }) if field == "tolerance"
        ));
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let config = ConfigLoader::load_config("does/not/exist/accumulator.json").unwrap();
        assert_eq!(config, AccumulatorConfig::default());
    }
}
