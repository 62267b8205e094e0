#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use aqlbridge::{
    query::{
        ast::{ContainsClause, FieldRef, ParsedQuery, SelectField},
        backend::RelationalBackend,
        binder::{Binders, ColumnSelectBinder, FragmentParts, JoinDescriptor, SelectBinder},
        containment::{ContainmentUnit, StaticContainment},
        sql::{OrderField, SelectQuery},
        QueryProcessor, Row,
    },
    NodeId, Result,
};
use proptest::prelude::*;

#[derive(Default)]
struct CountingBinder {
    fragments: AtomicUsize,
}

impl SelectBinder for CountingBinder {
    fn bind_fragment(
        &self,
        query: &ParsedQuery,
        node: &NodeId,
        unit: &ContainmentUnit,
    ) -> Result<FragmentParts> {
        self.fragments.fetch_add(1, Ordering::SeqCst);
        ColumnSelectBinder.bind_fragment(query, node, unit)
    }

    fn bind_static(
        &self,
        query: &ParsedQuery,
        node: &NodeId,
        window: Option<u64>,
        order: &[OrderField],
    ) -> Result<(SelectQuery, JoinDescriptor)> {
        ColumnSelectBinder.bind_static(query, node, window, order)
    }
}

#[derive(Default)]
struct CountingBackend {
    fetches: AtomicUsize,
    renders: AtomicUsize,
}

impl RelationalBackend for CountingBackend {
    fn fetch(&self, _query: &SelectQuery) -> Result<Vec<Row>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    fn render(&self, query: &SelectQuery, formatted: bool) -> String {
        self.renders.fetch_add(1, Ordering::SeqCst);
        query.render(formatted)
    }
}

fn query() -> ParsedQuery {
    ParsedQuery {
        select: vec![SelectField {
            alias: "systolic".into(),
            field: FieldRef::path("o", "/data/systolic"),
        }],
        contains: Some(ContainsClause::of([
            "openEHR-EHR-OBSERVATION.blood_pressure.v1",
        ])),
        ..ParsedQuery::default()
    }
}

fn units(templates: &[usize]) -> Vec<ContainmentUnit> {
    templates
        .iter()
        .enumerate()
        .map(|(idx, template)| ContainmentUnit {
            composition_id: format!("comp-{idx}"),
            template_id: format!("template-{template}.v1"),
            label: "openEHR_EHR_OBSERVATION_blood_pressure_v1".into(),
            root_path: format!("/content[{template}]"),
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_one_fragment_and_one_statement_per_call(
        templates in prop::collection::vec(0usize..6, 1..40),
        explain in any::<bool>(),
    ) {
        let distinct: BTreeSet<_> = templates.iter().collect();
        let binder = Arc::new(CountingBinder::default());
        let backend = Arc::new(CountingBackend::default());
        let processor = QueryProcessor::new(
            Arc::new(StaticContainment::new(units(&templates))),
            Binders {
                select: binder.clone(),
                ..Binders::default()
            },
            backend.clone(),
        );

        let output = processor
            .execute_with(&query(), &NodeId::default(), explain)
            .expect("execute");

        prop_assert_eq!(binder.fragments.load(Ordering::SeqCst), distinct.len());
        if explain {
            let trace = output.explain().expect("trace");
            prop_assert_eq!(trace.len(), 1);
            prop_assert_eq!(trace.entries()[0].sql.matches("\nunion\n").count(), distinct.len() - 1);
            prop_assert_eq!(backend.fetches.load(Ordering::SeqCst), 0);
            prop_assert_eq!(backend.renders.load(Ordering::SeqCst), 1);
        } else {
            prop_assert!(output.rows().is_some());
            prop_assert_eq!(backend.fetches.load(Ordering::SeqCst), 1);
            prop_assert_eq!(backend.renders.load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn prop_repeated_calls_do_not_share_fragments(
        templates in prop::collection::vec(0usize..4, 1..20),
    ) {
        let distinct: BTreeSet<_> = templates.iter().collect();
        let binder = Arc::new(CountingBinder::default());
        let processor = QueryProcessor::new(
            Arc::new(StaticContainment::new(units(&templates))),
            Binders {
                select: binder.clone(),
                ..Binders::default()
            },
            Arc::new(CountingBackend::default()),
        );
        for _ in 0..2 {
            processor
                .execute(&query(), &NodeId::default())
                .expect("execute");
        }
        prop_assert_eq!(binder.fragments.load(Ordering::SeqCst), 2 * distinct.len());
    }
}
