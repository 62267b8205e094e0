#![forbid(unsafe_code)]

//! Query translation and execution.
//!
//! Parsed queries arrive as [`ast::ParsedQuery`] values. The
//! [`processor::QueryProcessor`] decides whether they resolve statically or
//! through the containment set, binds them into [`sql::SelectQuery`]
//! statements and runs or explains them against a
//! [`backend::RelationalBackend`].

/// Parsed query model.
///
/// Defines the SELECT, CONTAINS, WHERE, ORDER BY and TOP clauses as produced
/// by the query compiler.
pub mod ast;

/// Relational execution seam and the SQLite backend.
pub mod backend;

/// Binder seams mapping query clauses onto the repository schema.
pub mod binder;

/// Containment-set resolution.
pub mod containment;

/// Explain traces.
pub mod explain;

/// Strategy selection, fragment caching and merge.
pub mod processor;

/// Performance profiling for processor stages.
///
/// Collects timing and count statistics when `AQLBRIDGE_PROFILE` is set.
pub mod profile;

/// Immutable SQL statement values and their SQLite rendering.
pub mod sql;

/// Scalar values and result rows.
pub mod value;

pub use explain::{ExplainEntry, ExplainTrace};
pub use processor::{QueryOutput, QueryProcessor};
pub use value::{Row, Value};
