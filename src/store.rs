#![forbid(unsafe_code)]

//! SQLite-backed clinical repository used by the default collaborators.
//!
//! The schema mirrors the relational layout the binders target: one `ehr`
//! row per record, `composition` headers, one `entry` document (JSON) per
//! composition and the `containment` rows that index which archetypes a
//! composition contains and where.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::query::ast::label_segment;
use crate::types::{BridgeError, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ehr (
    id TEXT PRIMARY KEY,
    subject_id TEXT NOT NULL,
    date_created TEXT
);
CREATE TABLE IF NOT EXISTS composition (
    id TEXT PRIMARY KEY,
    ehr_id TEXT NOT NULL REFERENCES ehr (id),
    language TEXT,
    territory TEXT,
    committed_at TEXT,
    sys_version INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS entry (
    id TEXT PRIMARY KEY,
    composition_id TEXT NOT NULL REFERENCES composition (id),
    template_id TEXT NOT NULL,
    archetype_id TEXT NOT NULL,
    entry TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS containment (
    comp_id TEXT NOT NULL REFERENCES composition (id),
    label TEXT NOT NULL,
    path TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entry_composition ON entry (composition_id);
CREATE INDEX IF NOT EXISTS idx_entry_template ON entry (template_id);
CREATE INDEX IF NOT EXISTS idx_containment_comp ON containment (comp_id);
";

/// Shared handle over one SQLite connection.
///
/// Cloning is cheap; the containment resolver and the relational backend
/// usually share one store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) a repository file and ensures the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|err| {
            BridgeError::Execution(format!("cannot open {}: {err}", path.display()))
        })?;
        debug!(path = %path.display(), "opened repository");
        Self::from_connection(conn)
    }

    /// Opens a throwaway in-memory repository.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(execution_error)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(execution_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with exclusive access to the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> rusqlite::Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Inserts an EHR header.
    pub fn insert_ehr(&self, ehr: &EhrRecord) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO ehr (id, subject_id, date_created) VALUES (?1, ?2, ?3)",
                params![ehr.id, ehr.subject_id, ehr.date_created],
            )
        })
        .map(|_| ())
        .map_err(execution_error)
    }

    /// Inserts a composition header.
    pub fn insert_composition(&self, composition: &CompositionRecord) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO composition (id, ehr_id, language, territory, committed_at, sys_version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    composition.id,
                    composition.ehr_id,
                    composition.language,
                    composition.territory,
                    composition.committed_at,
                    composition.sys_version
                ],
            )
        })
        .map(|_| ())
        .map_err(execution_error)
    }

    /// Inserts an entry document together with its containment index rows.
    pub fn insert_entry(&self, entry: &EntryRecord) -> Result<()> {
        let document = serde_json::to_string(&entry.document)?;
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO entry (id, composition_id, template_id, archetype_id, entry)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.id,
                    entry.composition_id,
                    entry.template_id,
                    entry.archetype_id,
                    document
                ],
            )?;
            for containment in &entry.containments {
                tx.execute(
                    "INSERT INTO containment (comp_id, label, path) VALUES (?1, ?2, ?3)",
                    params![entry.composition_id, containment.label(), containment.path],
                )?;
            }
            tx.commit()
        })
        .map_err(execution_error)
    }

    /// Populates two EHRs with blood-pressure observations committed under
    /// two templates that nest the observation at different paths.
    ///
    /// Returns the number of compositions inserted.
    pub fn seed_demo(&self) -> Result<usize> {
        const ENCOUNTER: &str = "openEHR-EHR-COMPOSITION.encounter.v1";
        const BLOOD_PRESSURE: &str = "openEHR-EHR-OBSERVATION.blood_pressure.v1";
        // (composition, ehr, template, systolic, diastolic)
        const READINGS: [(&str, &str, &str, i64, i64); 4] = [
            ("comp-1", "ehr-1", "vital_signs.v1", 150, 95),
            ("comp-2", "ehr-2", "vital_signs.v1", 118, 76),
            ("comp-3", "ehr-1", "gp_encounter.v2", 165, 102),
            ("comp-4", "ehr-2", "gp_encounter.v2", 132, 84),
        ];

        for (ehr, subject) in [("ehr-1", "patient-ada"), ("ehr-2", "patient-alan")] {
            self.insert_ehr(&EhrRecord {
                id: ehr.into(),
                subject_id: subject.into(),
                date_created: Some("2024-01-01T00:00:00Z".into()),
            })?;
        }
        for (composition, ehr, template, systolic, diastolic) in READINGS {
            self.insert_composition(&CompositionRecord {
                id: composition.into(),
                ehr_id: ehr.into(),
                language: Some("en".into()),
                territory: Some("GB".into()),
                committed_at: Some("2024-02-01T09:30:00Z".into()),
                sys_version: 1,
            })?;
            let reading = serde_json::json!({
                "data": { "systolic": systolic, "diastolic": diastolic }
            });
            let (document, path) = if template == "vital_signs.v1" {
                (
                    serde_json::json!({ "content[bp]": reading }),
                    "/content[bp]",
                )
            } else {
                (
                    serde_json::json!({ "content": { "items[bp]": reading } }),
                    "/content/items[bp]",
                )
            };
            self.insert_entry(&EntryRecord {
                id: format!("{composition}-entry"),
                composition_id: composition.into(),
                template_id: template.into(),
                archetype_id: ENCOUNTER.into(),
                document,
                containments: vec![ContainmentRecord {
                    archetypes: vec![ENCOUNTER.into(), BLOOD_PRESSURE.into()],
                    path: path.into(),
                }],
            })?;
        }
        debug!(compositions = READINGS.len(), "seeded demo repository");
        Ok(READINGS.len())
    }
}

pub(crate) fn execution_error(err: rusqlite::Error) -> BridgeError {
    BridgeError::Execution(err.to_string())
}

/// EHR header row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EhrRecord {
    /// EHR id.
    pub id: String,
    /// Subject (patient) id.
    pub subject_id: String,
    /// Creation timestamp.
    pub date_created: Option<String>,
}

/// Composition header row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompositionRecord {
    /// Composition id.
    pub id: String,
    /// Owning EHR.
    pub ehr_id: String,
    /// Language code.
    pub language: Option<String>,
    /// Territory code.
    pub territory: Option<String>,
    /// Commit timestamp.
    pub committed_at: Option<String>,
    /// Version number of the committed composition.
    #[serde(default = "first_version")]
    pub sys_version: i64,
}

fn first_version() -> i64 {
    1
}

/// Position of an archetype inside an entry document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContainmentRecord {
    /// Archetype chain, outermost first.
    pub archetypes: Vec<String>,
    /// Path of the innermost archetype inside the entry document.
    pub path: String,
}

impl ContainmentRecord {
    /// Dot-joined label stored in `containment.label`.
    pub fn label(&self) -> String {
        self.archetypes
            .iter()
            .map(|id| label_segment(id))
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Entry document row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntryRecord {
    /// Entry id.
    pub id: String,
    /// Owning composition.
    pub composition_id: String,
    /// Operational template the composition was committed with.
    pub template_id: String,
    /// Root archetype of the composition.
    pub archetype_id: String,
    /// Archetyped content keyed by path segment.
    pub document: serde_json::Value,
    /// Containment index rows for the document.
    pub containments: Vec<ContainmentRecord>,
}
