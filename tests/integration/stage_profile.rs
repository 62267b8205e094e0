#![allow(missing_docs)]

//! Runs alone in its own binary: the stage counters are process-wide.

use aqlbridge::{
    query::{
        ast::{
            ContainmentNode, ContainsClause, FieldRef, OrderAttribute, ParsedQuery, SelectField,
            SortDirection, TopAttributes,
        },
        profile::profile_snapshot,
        QueryProcessor,
    },
    NodeId, SqliteStore,
};

fn systolic_query() -> ParsedQuery {
    ParsedQuery {
        select: vec![SelectField {
            alias: "systolic".into(),
            field: FieldRef::path("o", "/data/systolic"),
        }],
        contains: Some(ContainsClause {
            chain: vec![ContainmentNode {
                archetype_id: "openEHR-EHR-OBSERVATION.blood_pressure.v1".into(),
                variable: Some("o".into()),
            }],
        }),
        order_by: vec![OrderAttribute {
            alias: "systolic".into(),
            direction: SortDirection::Desc,
        }],
        top: Some(TopAttributes { window: Some(3) }),
        ..ParsedQuery::default()
    }
}

#[test]
fn counters_track_one_fragment_per_template_and_one_merge() {
    std::env::set_var("AQLBRIDGE_PROFILE", "1");
    let store = SqliteStore::open_in_memory().expect("open repository");
    store.seed_demo().expect("seed demo data");
    let processor = QueryProcessor::sqlite(store);
    profile_snapshot(true).expect("profiling enabled");

    let output = processor
        .execute(&systolic_query(), &NodeId::default())
        .expect("execute");
    assert_eq!(output.rows().map(<[_]>::len), Some(3));
    let snapshot = profile_snapshot(true).expect("profiling enabled");
    assert_eq!(snapshot.resolve_count, 1);
    // four compositions, two templates
    assert_eq!(snapshot.fragment_count, 2);
    assert_eq!(snapshot.merge_count, 1);
    assert_eq!(snapshot.fetch_count, 1);
    assert_eq!(snapshot.render_count, 0);

    processor
        .execute_with(&systolic_query(), &NodeId::default(), true)
        .expect("explain");
    let snapshot = profile_snapshot(true).expect("profiling enabled");
    assert_eq!(snapshot.fragment_count, 2);
    assert_eq!(snapshot.merge_count, 1);
    assert_eq!(snapshot.fetch_count, 0);
    assert_eq!(snapshot.render_count, 1);
}
