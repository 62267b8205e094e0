//! Containment-set resolution: which compositions contain the archetype
//! chain named by a CONTAINS clause, and where inside their entry document
//! the innermost archetype starts.

use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::query::ast::ContainsClause;
use crate::store::SqliteStore;
use crate::types::{BridgeError, Result};

/// One matching structural instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainmentUnit {
    /// Composition holding the match.
    pub composition_id: String,
    /// Template the composition was committed with.
    pub template_id: String,
    /// Containment label that matched.
    pub label: String,
    /// Path inside the entry document where the matched archetype starts.
    pub root_path: String,
}

/// Resolves CONTAINS clauses to containment units.
///
/// Implementations must return the same sequence for the same clause within
/// one execution.
pub trait ContainmentResolver {
    /// Returns every unit matching `clause`; an empty result is not an error.
    fn resolve(&self, clause: &ContainsClause) -> Result<Vec<ContainmentUnit>>;
}

/// Resolver reading the `containment` index of a [`SqliteStore`].
#[derive(Clone)]
pub struct SqliteContainmentResolver {
    store: SqliteStore,
}

impl SqliteContainmentResolver {
    /// Creates a resolver over the given store.
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }
}

impl ContainmentResolver for SqliteContainmentResolver {
    fn resolve(&self, clause: &ContainsClause) -> Result<Vec<ContainmentUnit>> {
        let pattern = clause.label_pattern();
        let units = self
            .store
            .with_conn(|conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT DISTINCT c.comp_id, e.template_id, c.label, c.path
                     FROM containment c
                     JOIN entry e ON e.composition_id = c.comp_id
                     WHERE c.label GLOB ?1
                     ORDER BY c.comp_id, c.label, c.path",
                )?;
                let rows = stmt.query_map(params![pattern], |row| {
                    Ok(ContainmentUnit {
                        composition_id: row.get(0)?,
                        template_id: row.get(1)?,
                        label: row.get(2)?,
                        root_path: row.get(3)?,
                    })
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .map_err(|err| BridgeError::Resolution(err.to_string()))?;
        let candidates = units.len();
        let units: Vec<ContainmentUnit> = units
            .into_iter()
            .filter(|unit| clause.matches_label(&unit.label))
            .collect();
        trace!(candidates, "filtered containment candidates");
        debug!(pattern = %pattern, units = units.len(), "resolved containment set");
        Ok(units)
    }
}

/// Fixed containment set, used for tests or when the caller already holds
/// the resolved units.
#[derive(Clone, Debug, Default)]
pub struct StaticContainment {
    units: Vec<ContainmentUnit>,
}

impl StaticContainment {
    /// Creates a resolver that always answers with `units`.
    pub fn new(units: Vec<ContainmentUnit>) -> Self {
        Self { units }
    }
}

impl ContainmentResolver for StaticContainment {
    fn resolve(&self, _clause: &ContainsClause) -> Result<Vec<ContainmentUnit>> {
        Ok(self.units.clone())
    }
}
