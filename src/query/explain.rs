//! Explain traces: statements rendered instead of executed.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One statement that would have been executed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainEntry {
    /// Rendered statement text.
    pub sql: String,
    /// Bound parameters in placeholder order, in display form.
    pub params: Vec<String>,
}

/// Ordered explain entries, one per logically distinct statement.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExplainTrace {
    entries: Vec<ExplainEntry>,
}

impl ExplainTrace {
    /// Empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, entry: ExplainEntry) {
        self.entries.push(entry);
    }

    /// Entries in emission order.
    pub fn entries(&self) -> &[ExplainEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing would have been executed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for ExplainTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, entry) in self.entries.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}", entry.sql)?;
            for (pos, param) in entry.params.iter().enumerate() {
                writeln!(f, "  ${} = {param}", pos + 1)?;
            }
        }
        Ok(())
    }
}
