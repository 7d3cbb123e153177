// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//

//! Shuffle manager configuration

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::result;
use std::sync::LazyLock;

use crate::error::{Result, ShuffleError};
use crate::writer::MAX_SERIALIZED_MODE_PARTITIONS;

/// Force every shuffle onto the general (deserialized) path.
pub const BALLISTA_SHUFFLE_FORCE_GENERAL: &str = "ballista.shuffle.force_general";
/// Maximum number of output partitions eligible for the serialized path.
/// Can not exceed [`MAX_SERIALIZED_MODE_PARTITIONS`].
pub const BALLISTA_SHUFFLE_MAX_SERIALIZED_PARTITIONS: &str =
    "ballista.shuffle.max_serialized_partitions";
/// Purge producer output when a shuffle is unregistered, and sweep the
/// storage when the manager stops.
pub const BALLISTA_SHUFFLE_PURGE_OUTPUT: &str = "ballista.shuffle.purge_output";
/// Initial capacity in bytes of a writer's in-memory buffer.
pub const BALLISTA_SHUFFLE_INITIAL_BUFFER_SIZE: &str =
    "ballista.shuffle.initial_buffer_size";
/// Root directory used by the local disk storage.
pub const BALLISTA_SHUFFLE_WORK_DIR: &str = "ballista.shuffle.work_dir";

pub type ParseResult<T> = result::Result<T, String>;

static CONFIG_ENTRIES: LazyLock<HashMap<String, ConfigEntry>> = LazyLock::new(|| {
    let entries = vec![
        ConfigEntry::new(BALLISTA_SHUFFLE_FORCE_GENERAL.to_string(),
                         "Always use the general shuffle path, even when the serialized path applies".to_string(),
                         ConfigType::Boolean, Some(false.to_string())),
        ConfigEntry::new(BALLISTA_SHUFFLE_MAX_SERIALIZED_PARTITIONS.to_string(),
                         "Maximum number of output partitions for the serialized shuffle path".to_string(),
                         ConfigType::UInt64, Some(MAX_SERIALIZED_MODE_PARTITIONS.to_string())),
        ConfigEntry::new(BALLISTA_SHUFFLE_PURGE_OUTPUT.to_string(),
                         "Delete shuffle output on unregister and purge the storage on stop".to_string(),
                         ConfigType::Boolean, Some(true.to_string())),
        ConfigEntry::new(BALLISTA_SHUFFLE_INITIAL_BUFFER_SIZE.to_string(),
                         "Initial in-memory buffer size in bytes for shuffle writers".to_string(),
                         ConfigType::UInt64, Some((4 * 1024).to_string())),
        ConfigEntry::new(BALLISTA_SHUFFLE_WORK_DIR.to_string(),
                         "Root directory for shuffle files written by the local disk storage".to_string(),
                         ConfigType::Utf8, None),
    ];
    entries
        .into_iter()
        .map(|e| (e.name.clone(), e))
        .collect::<HashMap<_, _>>()
});

/// Value type of a configuration option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigType {
    Boolean,
    UInt64,
    Utf8,
}

impl Display for ConfigType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigType::Boolean => write!(f, "Boolean"),
            ConfigType::UInt64 => write!(f, "UInt64"),
            ConfigType::Utf8 => write!(f, "Utf8"),
        }
    }
}

/// Configuration option meta-data
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    name: String,
    description: String,
    config_type: ConfigType,
    default_value: Option<String>,
}

impl ConfigEntry {
    fn new(
        name: String,
        description: String,
        config_type: ConfigType,
        default_value: Option<String>,
    ) -> Self {
        Self {
            name,
            description,
            config_type,
            default_value,
        }
    }

}

/// Shuffle manager configuration.
///
/// Settings are validated when the configuration is built, so every getter
/// can rely on the stored value parsing as its declared type.
/// Hosts that ship a configuration to other processes send
/// [`settings`](Self::settings) and rebuild it with
/// [`with_settings`](Self::with_settings).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShuffleConfig {
    settings: HashMap<String, String>,
}

impl ShuffleConfig {
    /// Create a new configuration based on key-value pairs
    pub fn with_settings(settings: HashMap<String, String>) -> Result<Self> {
        for name in settings.keys() {
            if !Self::valid_entries().contains_key(name) {
                return Err(ShuffleError::Configuration(format!(
                    "configuration key `{name}` does not exist"
                )));
            }
        }

        for (name, entry) in Self::valid_entries() {
            if let Some(v) = settings.get(name) {
                // validate that we can parse the user-supplied value
                Self::validate(entry, v).map_err(|e| ShuffleError::Configuration(format!("Failed to parse user-supplied value '{v}' for configuration setting '{name}' ({}): {e}", entry.description)))?;
            } else if let Some(v) = entry.default_value.as_deref() {
                Self::validate(entry, v).map_err(|e| ShuffleError::Configuration(format!("Failed to parse default value '{v}' for configuration setting '{name}': {e}")))?;
            }
        }

        Ok(Self { settings })
    }

    /// Returns a copy of this configuration with `key` set to `value`.
    pub fn with_setting(&self, key: &str, value: impl Into<String>) -> Result<Self> {
        let mut settings = self.settings.clone();
        settings.insert(key.to_string(), value.into());
        Self::with_settings(settings)
    }

    pub fn parse_value(val: &str, config_type: ConfigType) -> ParseResult<()> {
        match config_type {
            ConfigType::UInt64 => {
                val.parse::<u64>().map_err(|e| format!("{e:?}"))?;
            }
            ConfigType::Boolean => {
                val.parse::<bool>().map_err(|e| format!("{e:?}"))?;
            }
            ConfigType::Utf8 => {}
        }

        Ok(())
    }

    fn validate(entry: &ConfigEntry, val: &str) -> ParseResult<()> {
        Self::parse_value(val, entry.config_type)?;

        if entry.name == BALLISTA_SHUFFLE_MAX_SERIALIZED_PARTITIONS {
            // partition ids are packed into 24 bits by the serialized writer
            let max = val.parse::<u64>().map_err(|e| format!("{e:?}"))?;
            if max > MAX_SERIALIZED_MODE_PARTITIONS as u64 {
                return Err(format!(
                    "must not exceed {MAX_SERIALIZED_MODE_PARTITIONS}, got {max}"
                ));
            }
        }
        Ok(())
    }

    // All available configuration options
    pub fn valid_entries() -> &'static HashMap<String, ConfigEntry> {
        &CONFIG_ENTRIES
    }

    pub fn settings(&self) -> &HashMap<String, String> {
        &self.settings
    }

    pub fn force_general(&self) -> bool {
        self.get_bool_setting(BALLISTA_SHUFFLE_FORCE_GENERAL)
    }

    pub fn max_serialized_partitions(&self) -> usize {
        self.get_usize_setting(BALLISTA_SHUFFLE_MAX_SERIALIZED_PARTITIONS)
    }

    pub fn purge_output(&self) -> bool {
        self.get_bool_setting(BALLISTA_SHUFFLE_PURGE_OUTPUT)
    }

    pub fn initial_buffer_size(&self) -> usize {
        self.get_usize_setting(BALLISTA_SHUFFLE_INITIAL_BUFFER_SIZE)
    }

    pub fn work_dir(&self) -> Option<String> {
        self.get_string_setting(BALLISTA_SHUFFLE_WORK_DIR)
    }

    fn raw_value(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str).or_else(|| {
            Self::valid_entries()
                .get(key)
                .and_then(|entry| entry.default_value.as_deref())
        })
    }

    fn get_usize_setting(&self, key: &str) -> usize {
        // values are validated in the constructor
        self.raw_value(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    fn get_bool_setting(&self, key: &str) -> bool {
        self.raw_value(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    fn get_string_setting(&self, key: &str) -> Option<String> {
        self.raw_value(key).map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() -> Result<()> {
        let config = ShuffleConfig::default();
        assert!(!config.force_general());
        assert_eq!(16777216, config.max_serialized_partitions());
        assert!(config.purge_output());
        assert_eq!(4096, config.initial_buffer_size());
        assert_eq!(None, config.work_dir());
        Ok(())
    }

    #[test]
    fn user_settings_override_defaults() -> Result<()> {
        let config = ShuffleConfig::default()
            .with_setting(BALLISTA_SHUFFLE_FORCE_GENERAL, "true")?
            .with_setting(BALLISTA_SHUFFLE_MAX_SERIALIZED_PARTITIONS, "5")?
            .with_setting(BALLISTA_SHUFFLE_WORK_DIR, "/tmp/shuffle")?;

        assert!(config.force_general());
        assert_eq!(5, config.max_serialized_partitions());
        assert_eq!(Some("/tmp/shuffle".to_string()), config.work_dir());
        Ok(())
    }

    #[test]
    fn rejects_unparsable_values() {
        let err = ShuffleConfig::default()
            .with_setting(BALLISTA_SHUFFLE_PURGE_OUTPUT, "sometimes")
            .unwrap_err();
        assert!(matches!(err, ShuffleError::Configuration(_)));
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = ShuffleConfig::default()
            .with_setting("ballista.shuffle.nope", "1")
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn shipped_settings_are_validated_again() -> Result<()> {
        let config = ShuffleConfig::default()
            .with_setting(BALLISTA_SHUFFLE_MAX_SERIALIZED_PARTITIONS, "5")?;
        let rebuilt = ShuffleConfig::with_settings(config.settings().clone())?;
        assert_eq!(config, rebuilt);

        let mut settings = config.settings().clone();
        settings.insert(
            BALLISTA_SHUFFLE_MAX_SERIALIZED_PARTITIONS.to_string(),
            "99999999".to_string(),
        );
        let err = ShuffleConfig::with_settings(settings).unwrap_err();
        assert!(err.to_string().contains("must not exceed"));
        Ok(())
    }

    #[test]
    fn rejects_partition_limit_above_pointer_capacity() {
        let too_many = (MAX_SERIALIZED_MODE_PARTITIONS + 1).to_string();
        assert!(ShuffleConfig::default()
            .with_setting(BALLISTA_SHUFFLE_MAX_SERIALIZED_PARTITIONS, too_many)
            .is_err());
    }
}
