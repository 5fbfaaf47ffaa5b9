//! Plugin metadata and on-disk layout.
//!
//! Each plugin lives in its own subdirectory of the plugin directory:
//!
//! ```text
//! plugins/
//!   anti_grief/
//!     plugin.json       <- metadata, PascalCase keys
//!     plugin.so         <- the module binary (platform suffix varies)
//!     plugin.disabled   <- present only while the plugin is disabled
//! ```

use quarry_event_system::PluginError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Metadata file name inside a plugin directory.
pub const METADATA_FILE: &str = "plugin.json";

/// Marker file whose presence persists the disabled state across restarts.
pub const DISABLED_MARKER: &str = "plugin.disabled";

/// Platform-specific file name of the plugin binary.
pub fn binary_file_name() -> String {
    format!("plugin{}", std::env::consts::DLL_SUFFIX)
}

/// Parsed contents of a `plugin.json` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    pub version: String,
    /// Unique identifier; also the handler owner token for this plugin.
    pub identifier: String,
    /// Identifiers of plugins that must be loaded and enabled first.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl PluginMetadata {
    /// Reads and parses the metadata file from a plugin directory.
    pub fn read_from(dir: &Path) -> Result<Self, PluginError> {
        let path = dir.join(METADATA_FILE);
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            PluginError::FileError(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            PluginError::FileError(format!("malformed metadata in {}: {}", path.display(), e))
        })
    }
}

/// A plugin known to the manager, whether or not its module is active.
#[derive(Debug, Clone)]
pub struct PluginRecord {
    pub metadata: PluginMetadata,
    /// The plugin's directory on disk.
    pub directory: PathBuf,
    /// False while the disabled marker is present.
    pub enabled: bool,
}

impl PluginRecord {
    pub fn identifier(&self) -> &str {
        &self.metadata.identifier
    }

    pub fn binary_path(&self) -> PathBuf {
        self.directory.join(binary_file_name())
    }

    pub fn marker_path(&self) -> PathBuf {
        self.directory.join(DISABLED_MARKER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_parses_pascal_case_keys() {
        let raw = r#"{
            "Name": "Message of the Day",
            "Description": "Greets players on login",
            "Author": "quarry team",
            "Version": "1.2.0",
            "Identifier": "motd",
            "Dependencies": ["chat"]
        }"#;
        let meta: PluginMetadata = serde_json::from_str(raw).unwrap();
        assert_eq!(meta.name, "Message of the Day");
        assert_eq!(meta.identifier, "motd");
        assert_eq!(meta.dependencies, vec!["chat".to_string()]);
    }

    #[test]
    fn optional_fields_default_when_absent() {
        let raw = r#"{"Name": "Bare", "Version": "0.1.0", "Identifier": "bare"}"#;
        let meta: PluginMetadata = serde_json::from_str(raw).unwrap();
        assert!(meta.description.is_empty());
        assert!(meta.dependencies.is_empty());
    }

    #[test]
    fn missing_metadata_file_is_a_descriptive_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PluginMetadata::read_from(dir.path()).unwrap_err();
        assert!(matches!(err, PluginError::FileError(_)));
        assert!(err.to_string().contains(METADATA_FILE));
    }
}
