//! GPU cache configuration
//!
//! Capacity and low-water mark can be set programmatically, from
//! environment variables, or from a TOML file. Sizes are configured in
//! megabytes and stored in bytes.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::lru::{default_low_water, validate_capacity, CapacityError};

const MB: usize = 1024 * 1024;

/// Environment variable overriding the cache capacity, in MB
pub const CAPACITY_ENV: &str = "GPU_OBJECT_CACHE_CAPACITY_MB";

/// Environment variable overriding the low-water mark, in MB
pub const LOW_WATER_ENV: &str = "GPU_OBJECT_CACHE_LOW_WATER_MB";

/// Configuration for a [`GpuResourceCache`](crate::GpuResourceCache)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuCacheConfig {
    /// Maximum total resource size in bytes
    pub capacity: usize,
    /// Low-water mark in bytes; 75% of capacity when unset
    pub low_water: Option<usize>,
}

impl Default for GpuCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 64 * MB,
            low_water: None,
        }
    }
}

/// On-disk representation
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    capacity_mb: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    low_water_mb: Option<usize>,
}

impl GpuCacheConfig {
    /// Creates a configuration with the given capacity in megabytes.
    pub fn new(capacity_mb: usize) -> Self {
        Self {
            capacity: capacity_mb.saturating_mul(MB),
            low_water: None,
        }
    }

    /// Sets the capacity in megabytes.
    pub fn with_capacity_mb(mut self, mb: usize) -> Self {
        self.capacity = mb.saturating_mul(MB);
        self
    }

    /// Sets the low-water mark in megabytes.
    pub fn with_low_water_mb(mut self, mb: usize) -> Self {
        self.low_water = Some(mb.saturating_mul(MB));
        self
    }

    /// Returns the effective low-water mark in bytes.
    pub fn low_water(&self) -> usize {
        self.low_water
            .unwrap_or_else(|| default_low_water(self.capacity))
    }

    pub fn capacity_mb(&self) -> usize {
        self.capacity / MB
    }

    /// Checks the same constraints the cache constructor enforces.
    pub fn validate(&self) -> Result<(), CapacityError> {
        validate_capacity(self.capacity, self.low_water())
    }

    /// Loads configuration from environment variables.
    ///
    /// - `GPU_OBJECT_CACHE_CAPACITY_MB`: capacity in MB (default: 64)
    /// - `GPU_OBJECT_CACHE_LOW_WATER_MB`: low-water mark in MB (default: 75%
    ///   of capacity)
    ///
    /// # Errors
    /// Returns an error if a variable is not a number or the resulting
    /// configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var(CAPACITY_ENV) {
            config.capacity = parse_mb(CAPACITY_ENV, &val)?;
        }

        if let Ok(val) = std::env::var(LOW_WATER_ENV) {
            config.low_water = Some(parse_mb(LOW_WATER_ENV, &val)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// ```toml
    /// capacity_mb = 64
    /// low_water_mb = 48
    /// ```
    ///
    /// Missing keys keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(toml_str)?;

        let mut config = Self::default();
        if let Some(mb) = file.capacity_mb {
            config.capacity = mb_to_bytes("capacity_mb", mb)?;
        }
        if let Some(mb) = file.low_water_mb {
            config.low_water = Some(mb_to_bytes("low_water_mb", mb)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }

    fn to_toml(&self) -> Result<String, ConfigError> {
        let file = ConfigFile {
            capacity_mb: Some(self.capacity / MB),
            low_water_mb: self.low_water.map(|bytes| bytes / MB),
        };
        Ok(toml::to_string(&file)?)
    }
}

fn parse_mb(key: &str, value: &str) -> Result<usize, ConfigError> {
    let mb = value
        .trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))?;
    mb_to_bytes(key, mb)
}

fn mb_to_bytes(key: &str, mb: usize) -> Result<usize, ConfigError> {
    mb.checked_mul(MB)
        .ok_or_else(|| ConfigError::InvalidValue(key.to_string()))
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error(transparent)]
    Capacity(#[from] CapacityError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = GpuCacheConfig::default();
        assert_eq!(config.capacity, 64 * MB);
        assert_eq!(config.low_water(), 48 * MB);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = GpuCacheConfig::new(16).with_low_water_mb(8);
        assert_eq!(config.capacity, 16 * MB);
        assert_eq!(config.low_water(), 8 * MB);
        assert_eq!(config.capacity_mb(), 16);

        let config = config.with_capacity_mb(32);
        assert_eq!(config.capacity, 32 * MB);
        assert_eq!(config.low_water(), 8 * MB);
    }

    #[test]
    fn test_validate_rejects_high_low_water() {
        let config = GpuCacheConfig::new(16).with_low_water_mb(16);
        assert!(matches!(
            config.validate(),
            Err(CapacityError::LowWaterTooHigh { .. })
        ));

        let config = GpuCacheConfig::new(0);
        assert_eq!(config.validate(), Err(CapacityError::ZeroCapacity));
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            # Test configuration
            capacity_mb = 128
            low_water_mb = 100
        "#;

        let config = GpuCacheConfig::from_toml(toml).unwrap();
        assert_eq!(config.capacity, 128 * MB);
        assert_eq!(config.low_water(), 100 * MB);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = GpuCacheConfig::from_toml("capacity_mb = 8").unwrap();
        assert_eq!(config.capacity, 8 * MB);
        assert_eq!(config.low_water, None);
        assert_eq!(config.low_water(), 6 * MB);
    }

    #[test]
    fn test_from_toml_errors() {
        assert!(matches!(
            GpuCacheConfig::from_toml("capacity_mb = \"lots\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            GpuCacheConfig::from_toml("capacity_mb = 4\nlow_water_mb = 8"),
            Err(ConfigError::Capacity(_))
        ));
    }

    #[test]
    fn test_from_toml_size_overflow() {
        assert!(matches!(
            GpuCacheConfig::from_toml("capacity_mb = 9007199254740992"),
            Err(ConfigError::InvalidValue(key)) if key == "capacity_mb"
        ));
        assert!(matches!(
            GpuCacheConfig::from_toml("capacity_mb = 4\nlow_water_mb = 9007199254740992"),
            Err(ConfigError::InvalidValue(key)) if key == "low_water_mb"
        ));
    }

    #[test]
    fn test_builder_saturates_huge_sizes() {
        let config = GpuCacheConfig::new(usize::MAX).with_low_water_mb(usize::MAX);
        assert_eq!(config.capacity, usize::MAX);
        assert_eq!(config.low_water(), usize::MAX);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_save_and_load() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let path = temp.path().join("gpu_cache.toml");

        let config = GpuCacheConfig::new(32).with_low_water_mb(20);
        config.save_to_file(&path).unwrap();

        let loaded = GpuCacheConfig::from_file(&path).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_from_missing_file() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let result = GpuCacheConfig::from_file(temp.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(&[CAPACITY_ENV, LOW_WATER_ENV]);

        env::set_var(CAPACITY_ENV, "256");
        env::set_var(LOW_WATER_ENV, "128");

        let config = GpuCacheConfig::from_env().unwrap();
        assert_eq!(config.capacity, 256 * MB);
        assert_eq!(config.low_water(), 128 * MB);
    }

    #[test]
    #[serial]
    fn test_from_env_partial() {
        let _guard = EnvGuard::new(&[CAPACITY_ENV, LOW_WATER_ENV]);

        env::remove_var(LOW_WATER_ENV);
        env::set_var(CAPACITY_ENV, "100");

        let config = GpuCacheConfig::from_env().unwrap();
        assert_eq!(config.capacity, 100 * MB);
        assert_eq!(config.low_water(), 75 * MB);
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(&[CAPACITY_ENV, LOW_WATER_ENV]);

        env::remove_var(LOW_WATER_ENV);
        env::set_var(CAPACITY_ENV, "not_a_number");
        assert!(matches!(
            GpuCacheConfig::from_env(),
            Err(ConfigError::InvalidValue(key)) if key == CAPACITY_ENV
        ));
    }

    #[test]
    #[serial]
    fn test_from_env_overflow() {
        let _guard = EnvGuard::new(&[CAPACITY_ENV, LOW_WATER_ENV]);

        env::remove_var(LOW_WATER_ENV);
        env::set_var(CAPACITY_ENV, "9007199254740992");
        assert!(matches!(
            GpuCacheConfig::from_env(),
            Err(ConfigError::InvalidValue(key)) if key == CAPACITY_ENV
        ));
    }

    // Saves and restores environment variables
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), env::var(name).ok()))
                .collect();
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }
}
