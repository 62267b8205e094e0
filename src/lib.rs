//! Translation of parsed clinical-repository queries into SQL.
//!
//! A [`query::QueryProcessor`] turns a [`query::ast::ParsedQuery`] into one
//! SQL statement. Queries that navigate archetype paths through a CONTAINS
//! clause are bound once per template found in the containment set and the
//! per-template fragments are unioned. Statements are either executed against
//! SQLite or rendered into an explain trace.

#![warn(missing_docs)]

pub mod config;
pub mod query;
pub mod store;
pub mod types;

pub use config::{BridgeConfig, ProcessorConfig};
pub use store::SqliteStore;
pub use types::{BridgeError, NodeId, Result};
