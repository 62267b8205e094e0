#![forbid(unsafe_code)]

//! Processor options and the TOML configuration file read by the CLI.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{BridgeError, NodeId, Result};

/// Options applied to every call of a [`crate::query::QueryProcessor`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Render explain statements one clause per line.
    pub explain_formatted: bool,
    /// Explain instead of execute when the caller does not say.
    pub explain_by_default: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            explain_formatted: true,
            explain_by_default: false,
        }
    }
}

/// Contents of `config.toml`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// `[database]` section.
    #[serde(default)]
    pub database: DatabaseSection,
    /// `[processor]` section.
    #[serde(default)]
    pub processor: ProcessorSection,
}

/// `[database]` section.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSection {
    /// Repository used when the CLI is not given one.
    #[serde(rename = "default")]
    pub default_path: Option<PathBuf>,
}

/// `[processor]` section.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessorSection {
    /// Node id queries execute as.
    pub node_id: Option<String>,
    /// Overrides [`ProcessorConfig::explain_formatted`].
    pub explain_formatted: Option<bool>,
}

impl BridgeConfig {
    /// Loads the file at `explicit`, or the default location.
    ///
    /// A missing file yields the defaults.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self> {
        match explicit.or_else(default_config_path) {
            Some(path) if path.exists() => Self::read(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Parses the file at `path`.
    pub fn read(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|err| {
            BridgeError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        toml::from_str(&contents).map_err(|err| {
            BridgeError::Config(format!("failed to parse {}: {err}", path.display()))
        })
    }

    /// Processor options with file overrides applied.
    pub fn processor_config(&self) -> ProcessorConfig {
        let mut config = ProcessorConfig::default();
        if let Some(formatted) = self.processor.explain_formatted {
            config.explain_formatted = formatted;
        }
        config
    }

    /// Node id from the file, or the default node.
    pub fn node_id(&self) -> NodeId {
        self.processor
            .node_id
            .as_deref()
            .map(NodeId::from)
            .unwrap_or_default()
    }
}

/// `<config dir>/aqlbridge/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("aqlbridge").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_sections_and_applies_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[database]\ndefault = \"/var/lib/ehr.db\"\n\n[processor]\nnode_id = \"node-9\"\nexplain_formatted = false\n",
        )
        .unwrap();
        let config = BridgeConfig::load(Some(path)).unwrap();
        assert_eq!(
            config.database.default_path.as_deref(),
            Some(Path::new("/var/lib/ehr.db"))
        );
        assert_eq!(config.node_id(), NodeId::from("node-9"));
        assert!(!config.processor_config().explain_formatted);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig::load(Some(dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.node_id(), NodeId::default());
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[database\n").unwrap();
        let err = BridgeConfig::load(Some(path)).unwrap_err();
        assert_eq!(err.code(), "ConfigError");
        assert!(err.to_string().contains("bad.toml"));
    }
}
