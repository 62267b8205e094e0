#![allow(missing_docs)]

use std::path::PathBuf;

use aqlbridge::{
    query::{
        ast::{
            CompareOp, ContainmentNode, ContainsClause, FieldRef, OrderAttribute, ParsedQuery,
            SelectField, SortDirection, Table, TopAttributes, WhereExpr,
        },
        QueryOutput, QueryProcessor, Value,
    },
    NodeId, ProcessorConfig, SqliteStore,
};
use tempfile::TempDir;

const ENCOUNTER: &str = "openEHR-EHR-COMPOSITION.encounter.v1";
const BLOOD_PRESSURE: &str = "openEHR-EHR-OBSERVATION.blood_pressure.v1";

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

fn seeded_repo(name: &str) -> (TempDir, PathBuf, SqliteStore) {
    init_tracing();
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join(format!("{name}.db"));
    let store = SqliteStore::open(&path).expect("open repository");
    store.seed_demo().expect("seed demo data");
    (dir, path, store)
}

fn hypertension_query() -> ParsedQuery {
    let systolic = FieldRef::path("o", "/data/systolic");
    ParsedQuery {
        select: vec![
            SelectField {
                alias: "uid".into(),
                field: FieldRef::CompositionUid,
            },
            SelectField {
                alias: "subject".into(),
                field: FieldRef::column(Table::Ehr, "subject_id"),
            },
            SelectField {
                alias: "systolic".into(),
                field: systolic.clone(),
            },
        ],
        contains: Some(ContainsClause {
            chain: vec![
                ContainmentNode {
                    archetype_id: ENCOUNTER.into(),
                    variable: Some("c".into()),
                },
                ContainmentNode {
                    archetype_id: BLOOD_PRESSURE.into(),
                    variable: Some("o".into()),
                },
            ],
        }),
        predicate: Some(WhereExpr::Compare {
            field: systolic,
            op: CompareOp::Gt,
            value: Value::Int(140),
        }),
        order_by: vec![OrderAttribute {
            alias: "systolic".into(),
            direction: SortDirection::Desc,
        }],
        top: Some(TopAttributes { window: Some(10) }),
    }
}

#[test]
fn containment_query_reads_each_template_layout() {
    let (_dir, _path, store) = seeded_repo("hypertension");
    let processor = QueryProcessor::sqlite(store);
    let output = processor
        .execute(&hypertension_query(), &NodeId::default())
        .expect("execute");
    let rows = output.rows().expect("rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["systolic"], Value::Int(165));
    assert_eq!(rows[0]["uid"], Value::from("comp-3::local.ehrserver::1"));
    assert_eq!(rows[0]["subject"], Value::from("patient-ada"));
    assert_eq!(rows[1]["systolic"], Value::Int(150));
    assert_eq!(rows[1]["uid"], Value::from("comp-1::local.ehrserver::1"));
}

#[test]
fn window_applies_to_the_union_not_each_branch() {
    let (_dir, _path, store) = seeded_repo("window");
    let mut query = hypertension_query();
    query.predicate = None;
    query.top = Some(TopAttributes { window: Some(3) });
    let output = QueryProcessor::sqlite(store)
        .execute(&query, &NodeId::new("node-b"))
        .expect("execute");
    let systolic: Vec<_> = output
        .rows()
        .expect("rows")
        .iter()
        .map(|row| row["systolic"].clone())
        .collect();
    assert_eq!(
        systolic,
        vec![Value::Int(165), Value::Int(150), Value::Int(132)]
    );
    assert!(output.rows().expect("rows")[0]["uid"]
        .as_str()
        .is_some_and(|uid| uid.contains("::node-b::")));
}

#[test]
fn explain_renders_one_unioned_statement() {
    let (_dir, _path, store) = seeded_repo("explain");
    let processor = QueryProcessor::sqlite(store).with_config(ProcessorConfig {
        explain_formatted: false,
        explain_by_default: true,
    });
    let output = processor
        .execute(&hypertension_query(), &NodeId::default())
        .expect("explain");
    let trace = output.explain().expect("trace");
    assert_eq!(trace.len(), 1);
    let entry = &trace.entries()[0];
    assert_eq!(entry.sql.matches(" union ").count(), 1);
    assert_eq!(entry.sql.matches("order by").count(), 1);
    assert!(entry.sql.ends_with("order by \"systolic\" desc limit ?"));
    assert_eq!(entry.params.iter().filter(|p| p.as_str() == "140").count(), 2);
    assert!(entry.params.iter().any(|p| p == "vital_signs.v1"));
    assert!(entry.params.iter().any(|p| p == "gp_encounter.v2"));
    assert!(entry
        .params
        .iter()
        .any(|p| p == "$.\"content\".\"items[bp]\".\"data\".\"systolic\""));
    assert_eq!(entry.params.last().map(String::as_str), Some("10"));
}

#[test]
fn unmatched_containment_returns_nothing() {
    let (_dir, _path, store) = seeded_repo("unmatched");
    let mut query = hypertension_query();
    query.contains = Some(ContainsClause {
        chain: vec![ContainmentNode {
            archetype_id: "openEHR-EHR-OBSERVATION.pulse.v1".into(),
            variable: Some("o".into()),
        }],
    });
    let processor = QueryProcessor::sqlite(store);
    let output = processor
        .execute(&query, &NodeId::default())
        .expect("execute");
    assert_eq!(output, QueryOutput::Rows(Vec::new()));
    let explained = processor
        .execute_with(&query, &NodeId::default(), true)
        .expect("explain");
    assert!(explained.is_empty());
}

#[test]
fn static_query_reads_headers_directly() {
    let (_dir, _path, store) = seeded_repo("static");
    let query = ParsedQuery {
        select: vec![SelectField {
            alias: "subject".into(),
            field: FieldRef::column(Table::Ehr, "subject_id"),
        }],
        order_by: vec![OrderAttribute {
            alias: "subject".into(),
            direction: SortDirection::Desc,
        }],
        top: Some(TopAttributes { window: Some(1) }),
        ..ParsedQuery::default()
    };
    let output = QueryProcessor::sqlite(store)
        .execute(&query, &NodeId::default())
        .expect("execute");
    let rows = output.rows().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["subject"], Value::from("patient-alan"));
}

#[test]
fn repository_survives_reopen() {
    let (_dir, path, store) = seeded_repo("reopen");
    drop(store);
    let store = SqliteStore::open(&path).expect("reopen");
    let output = QueryProcessor::sqlite(store)
        .execute(&hypertension_query(), &NodeId::default())
        .expect("execute");
    assert_eq!(output.rows().map(<[_]>::len), Some(2));
}

#[test]
fn unknown_column_is_an_execution_error() {
    let (_dir, _path, store) = seeded_repo("bad_column");
    let mut query = hypertension_query();
    query.select[1].field = FieldRef::column(Table::Ehr, "no_such_column");
    let err = QueryProcessor::sqlite(store)
        .execute(&query, &NodeId::default())
        .expect_err("rejected");
    assert_eq!(err.code(), "ExecutionError");
}
