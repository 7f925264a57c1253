//! Tests for loading accumulator configuration files.

use std::io::Write;

use chained_accumulator::config::{BackendSelection, ConfigLoader, PowerPreference};
use chained_accumulator::errors::ConfigError;
use chained_accumulator::{AccumulatorConfig, ChainedAccumulator, HostRuntime, KernelArity};
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_full_config() {
    let file = write_config(
        r#"{
            "arity": "ternary",
            "workgroup_size": 128,
            "tolerance": { "relative": 0.01, "absolute": 0.0001 },
            "device": {
                "backends": "vulkan",
                "power_preference": "low_power",
                "adapter_index": 1,
                "force_fallback_adapter": true
            }
        }"#,
    );

    let config = ConfigLoader::load_config(file.path().to_str().unwrap()).unwrap();

    assert_eq!(config.arity, KernelArity::Ternary);
    assert_eq!(config.workgroup_size, 128);
    assert_eq!(config.tolerance.relative, 0.01);
    assert_eq!(config.tolerance.absolute, 0.0001);
    assert_eq!(config.device.backends, BackendSelection::Vulkan);
    assert_eq!(config.device.power_preference, PowerPreference::LowPower);
    assert_eq!(config.device.adapter_index, Some(1));
    assert!(config.device.force_fallback_adapter);
}

#[test]
fn test_partial_config_uses_defaults() {
    let file = write_config(r#"{ "arity": "ternary" }"#);

    let config = ConfigLoader::load_config(file.path().to_str().unwrap()).unwrap();

    assert_eq!(config.arity, KernelArity::Ternary);
    assert_eq!(config.workgroup_size, AccumulatorConfig::default().workgroup_size);
    assert_eq!(config.device, AccumulatorConfig::default().device);
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.json");

    let config = ConfigLoader::load_config(path.to_str().unwrap()).unwrap();

    assert_eq!(config, AccumulatorConfig::default());
}

#[test]
fn test_malformed_file_is_an_error() {
    let file = write_config("{ \"arity\": ");

    let result = ConfigLoader::load_config(file.path().to_str().unwrap());

    assert!(matches!(result, Err(ConfigError::Parse { .. })));
}

#[test]
fn test_invalid_values_are_rejected() {
    let file = write_config(r#"{ "workgroup_size": 1024 }"#);

    let result = ConfigLoader::load_config(file.path().to_str().unwrap());

    match result {
        Err(ConfigError::Validation { field, .. }) => assert_eq!(field, "workgroup_size"),
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[test]
fn test_loaded_config_drives_accumulator() {
    let file = write_config(r#"{ "arity": "ternary", "workgroup_size": 32 }"#);
    let config = ConfigLoader::load_config(file.path().to_str().unwrap()).unwrap();

    let mut acc = ChainedAccumulator::new(HostRuntime::new(), &config).unwrap();
    let output = acc
        .accumulate(&[vec![1.0; 40], vec![2.0; 40], vec![3.0; 40]])
        .unwrap();

    assert_eq!(output.launches, 1);
    assert_eq!(output.values, vec![6.0; 40]);
}
