//! Weave package manifest parsing (weave.toml)

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::merger::{MergeOptions, NewFieldStorage};
use crate::violation::ViolationKind;

/// File name of the manifest inside a package directory
pub const MANIFEST_FILE: &str = "weave.toml";

/// Errors that can occur while reading a manifest
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read manifest file
    #[error("Failed to read manifest file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse manifest: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid manifest: {0}")]
    ValidationError(String),
}

/// Where the package keeps fields it adds to instances
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldStorageKind {
    #[default]
    Injected,
    SideTable,
}

/// Package manifest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeavePackageConfig {
    /// Package name, unique among loaded packages
    pub name: String,

    /// Alternative name accepted when enabling or disabling the package
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(default = "default_version")]
    pub version: String,

    /// Lower priorities are applied first
    #[serde(default)]
    pub priority: i32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Violation kinds ignored for this package
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violation_filter: Vec<ViolationKind>,

    /// Classes whose presence disables the package
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_if_present: Vec<String>,

    #[serde(default)]
    pub new_field_storage: FieldStorageKind,

    /// Store class for `side_table` storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_table_owner: Option<String>,

    /// Class receiving exceptions thrown by weave code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handler: Option<String>,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_enabled() -> bool {
    true
}

impl WeavePackageConfig {
    /// Manifest with defaults for everything but the name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            version: default_version(),
            priority: 0,
            enabled: true,
            violation_filter: Vec::new(),
            skip_if_present: Vec::new(),
            new_field_storage: FieldStorageKind::Injected,
            side_table_owner: None,
            error_handler: None,
        }
    }

    /// Parse a manifest from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a manifest from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: WeavePackageConfig = toml::from_str(content)?;
        config.validate()?;
        config.skip_if_present = config.skip_if_present.iter().map(|name| name.replace('.', "/")).collect();
        for class in [&mut config.side_table_owner, &mut config.error_handler].into_iter().flatten() {
            *class = class.replace('.', "/");
        }
        Ok(config)
    }

    /// Validate the manifest
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::ValidationError("Package name cannot be empty".to_string()));
        }
        if !is_valid_package_name(&self.name) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid package name: {}. Must contain only alphanumeric characters, '-', '_' and '.'",
                self.name
            )));
        }
        if self.new_field_storage == FieldStorageKind::SideTable && self.side_table_owner.is_none() {
            return Err(ConfigError::ValidationError(
                "new_field_storage = \"side_table\" requires side_table_owner".to_string(),
            ));
        }
        if self.error_handler.as_deref() == Some("") {
            return Err(ConfigError::ValidationError("error_handler cannot be empty".to_string()));
        }
        if let Some(name) = self.skip_if_present.iter().find(|name| name.is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid skip_if_present entry: {:?}",
                name
            )));
        }
        Ok(())
    }

    /// Whether `name` refers to this package
    pub fn is_named(&self, name: &str) -> bool {
        self.name == name || self.alias.as_deref() == Some(name)
    }

    /// Merger settings for this package
    pub fn merge_options(&self) -> MergeOptions {
        let new_field_storage = match (self.new_field_storage, &self.side_table_owner) {
            (FieldStorageKind::SideTable, Some(owner)) => NewFieldStorage::SideTable { owner: owner.clone() },
            _ => NewFieldStorage::Injected,
        };
        MergeOptions {
            new_field_storage,
            error_handler: self.error_handler.clone(),
        }
    }

    /// Serialized form, as hashed into the package fingerprint
    pub fn to_toml(&self) -> String {
        toml::to_string(self).unwrap_or_default()
    }
}

fn is_valid_package_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}
