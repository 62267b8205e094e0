#![forbid(unsafe_code)]

//! Identifiers and the error type shared by every layer of the bridge.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of the server node executing a query.
///
/// The node id is folded into the composition uids rendered by the select
/// binder (`<composition>::<node>::<version>`).
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    /// Wraps a node name.
    pub fn new(name: impl Into<String>) -> Self {
        NodeId(name.into())
    }

    /// Returns the node name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        NodeId("local.ehrserver".to_owned())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        NodeId(value.to_owned())
    }
}

/// Errors surfaced by query translation and execution.
#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    /// The containment set could not be resolved.
    #[error("containment resolution failed: {0}")]
    Resolution(String),
    /// A binder could not build a fragment for a template.
    #[error("cannot bind template '{template_id}': {reason}")]
    Binding {
        /// Template the fragment was requested for.
        template_id: String,
        /// Binder-supplied reason.
        reason: String,
    },
    /// The relational backend rejected the statement.
    #[error("statement rejected: {0}")]
    Execution(String),
    /// Malformed query or statement.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Malformed query or statement with a formatted message.
    #[error("invalid argument: {0}")]
    InvalidOwned(String),
    /// Configuration could not be loaded.
    #[error("config: {0}")]
    Config(String),
    /// I/O failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// JSON (de)serialization failure.
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// Builds a [`BridgeError::Binding`] for the given template.
    pub fn binding(template_id: impl Into<String>, reason: impl Into<String>) -> Self {
        BridgeError::Binding {
            template_id: template_id.into(),
            reason: reason.into(),
        }
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::Resolution(_) => "ResolutionError",
            BridgeError::Binding { .. } => "BindingError",
            BridgeError::Execution(_) => "ExecutionError",
            BridgeError::Invalid(_) | BridgeError::InvalidOwned(_) => "InvalidArgument",
            BridgeError::Config(_) => "ConfigError",
            BridgeError::Io(_) => "IoError",
            BridgeError::Json(_) => "JsonError",
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BridgeError>;
