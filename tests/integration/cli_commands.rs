#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::{json, Value};
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
    db: PathBuf,
    config: PathBuf,
}

impl Workspace {
    fn seeded(name: &str) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let db = dir.path().join(format!("{name}.db"));
        let config = dir.path().join("config.toml");
        cargo_bin_cmd!("aqlbridge")
            .arg("--config")
            .arg(&config)
            .arg("seed-demo")
            .arg(&db)
            .assert()
            .success();
        Self { dir, db, config }
    }

    fn query_file(&self, query: &Value) -> PathBuf {
        let path = self.dir.path().join("query.json");
        fs::write(&path, serde_json::to_vec_pretty(query).expect("json")).expect("write query");
        path
    }
}

fn hypertension_query() -> Value {
    json!({
        "select": [
            {"alias": "uid", "field": {"kind": "composition_uid"}},
            {"alias": "systolic", "field": {"kind": "path", "variable": "o", "path": "/data/systolic"}}
        ],
        "contains": {"chain": [
            {"archetype_id": "openEHR-EHR-COMPOSITION.encounter.v1"},
            {"archetype_id": "openEHR-EHR-OBSERVATION.blood_pressure.v1", "variable": "o"}
        ]},
        "where": {"compare": {
            "field": {"kind": "path", "variable": "o", "path": "/data/systolic"},
            "op": "gt",
            "value": 140
        }},
        "order_by": [{"alias": "systolic", "direction": "desc"}],
        "top": {"window": 10}
    })
}

#[test]
fn init_creates_repository_file() {
    let dir = TempDir::new().expect("tempdir");
    let db = dir.path().join("fresh.db");
    cargo_bin_cmd!("aqlbridge")
        .arg("--config")
        .arg(dir.path().join("missing.toml"))
        .arg("init")
        .arg(&db)
        .assert()
        .success();
    assert!(db.exists());
}

#[test]
fn run_prints_rows_as_json() {
    let ws = Workspace::seeded("run");
    let query = ws.query_file(&hypertension_query());
    let output = cargo_bin_cmd!("aqlbridge")
        .arg("--config")
        .arg(&ws.config)
        .args(["--format", "json", "run"])
        .arg(&ws.db)
        .arg("--query")
        .arg(&query)
        .args(["--node", "node-7"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    let rows = json["rows"].as_array().expect("rows array");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["systolic"], 165);
    assert_eq!(rows[0]["uid"], "comp-3::node-7::1");
    assert_eq!(rows[1]["systolic"], 150);
}

#[test]
fn explain_prints_single_statement_text() {
    let ws = Workspace::seeded("explain");
    let query = ws.query_file(&hypertension_query());
    let output = cargo_bin_cmd!("aqlbridge")
        .arg("--config")
        .arg(&ws.config)
        .arg("explain")
        .arg(&ws.db)
        .arg("--query")
        .arg(&query)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert_eq!(text.matches("\nunion\n").count(), 1);
    assert_eq!(text.matches("order by").count(), 1);
    assert!(text.contains("  $1 = ::local.ehrserver::"));
}

#[test]
fn config_supplies_database_and_node() {
    let ws = Workspace::seeded("configured");
    fs::write(
        &ws.config,
        format!(
            "[database]\ndefault = {:?}\n\n[processor]\nnode_id = \"cfg-node\"\nexplain_formatted = false\n",
            ws.db.display().to_string()
        ),
    )
    .expect("write config");
    let query = ws.query_file(&hypertension_query());
    let output = cargo_bin_cmd!("aqlbridge")
        .arg("--config")
        .arg(&ws.config)
        .args(["--format", "json", "explain", "--query"])
        .arg(&query)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    let entries = json["explain"].as_array().expect("trace array");
    assert_eq!(entries.len(), 1);
    let sql = entries[0]["sql"].as_str().expect("sql");
    assert!(!sql.contains('\n'));
    assert_eq!(entries[0]["params"][0], "::cfg-node::");
}

#[test]
fn missing_database_is_reported() {
    let dir = TempDir::new().expect("tempdir");
    let query = dir.path().join("query.json");
    fs::write(&query, hypertension_query().to_string()).expect("write query");
    let output = cargo_bin_cmd!("aqlbridge")
        .arg("--config")
        .arg(dir.path().join("missing.toml"))
        .arg("run")
        .arg("--query")
        .arg(&query)
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8");
    assert!(stderr.contains("no database given"));
}
