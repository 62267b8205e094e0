//! Execution strategy for parsed queries.
//!
//! A query without a CONTAINS clause maps onto one static statement. A query
//! with one is resolved against the containment set first: the location of
//! archetype paths depends on the template a composition was committed
//! with, so one fragment is bound per distinct template, the fragments are
//! unioned, and ordering and limit are applied once to the union.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, trace};

use crate::config::ProcessorConfig;
use crate::query::ast::{ContainsClause, ParsedQuery, Table};
use crate::query::backend::{RelationalBackend, SqliteBackend};
use crate::query::binder::{Binders, JoinDescriptor};
use crate::query::containment::{ContainmentResolver, ContainmentUnit, SqliteContainmentResolver};
use crate::query::explain::{ExplainEntry, ExplainTrace};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::sql::{Condition, Expr, Operator, OrderField, SelectQuery};
use crate::query::Row;
use crate::store::SqliteStore;
use crate::types::{NodeId, Result};

/// Result of one `execute` call.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutput {
    /// Rows produced by execution.
    Rows(Vec<Row>),
    /// Statements that would have been executed.
    Explain(ExplainTrace),
}

impl QueryOutput {
    /// Rows, when the query was executed.
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            QueryOutput::Rows(rows) => Some(rows),
            QueryOutput::Explain(_) => None,
        }
    }

    /// Trace, when the query was explained.
    pub fn explain(&self) -> Option<&ExplainTrace> {
        match self {
            QueryOutput::Explain(trace) => Some(trace),
            QueryOutput::Rows(_) => None,
        }
    }

    /// Whether no rows (or no statements) were produced.
    pub fn is_empty(&self) -> bool {
        match self {
            QueryOutput::Rows(rows) => rows.is_empty(),
            QueryOutput::Explain(trace) => trace.is_empty(),
        }
    }
}

/// How a query is resolved, chosen once per call.
enum Strategy<'q> {
    Static,
    Containment(&'q ContainsClause),
}

impl<'q> Strategy<'q> {
    fn for_query(query: &'q ParsedQuery) -> Self {
        match query.contains_clause() {
            Some(clause) => Strategy::Containment(clause),
            None => Strategy::Static,
        }
    }
}

/// Where finished statements go.
enum OutputSink {
    Execute(Vec<Row>),
    Render { trace: ExplainTrace, formatted: bool },
}

impl OutputSink {
    fn new(explain: bool, formatted: bool) -> Self {
        if explain {
            OutputSink::Render {
                trace: ExplainTrace::new(),
                formatted,
            }
        } else {
            OutputSink::Execute(Vec::new())
        }
    }

    fn emit(&mut self, backend: &dyn RelationalBackend, statement: &SelectQuery) -> Result<()> {
        match self {
            OutputSink::Execute(rows) => {
                let timer = profile_timer();
                let fetched = backend.fetch(statement)?;
                record_profile_timer(QueryProfileKind::Fetch, timer);
                debug!(rows = fetched.len(), "statement executed");
                rows.extend(fetched);
            }
            OutputSink::Render { trace, formatted } => {
                let timer = profile_timer();
                let sql = backend.render(statement, *formatted);
                record_profile_timer(QueryProfileKind::Render, timer);
                trace!(sql = %sql, "statement rendered");
                trace.push(ExplainEntry {
                    sql,
                    params: statement.params().iter().map(ToString::to_string).collect(),
                });
            }
        }
        Ok(())
    }

    fn finish(self) -> QueryOutput {
        match self {
            OutputSink::Execute(rows) => QueryOutput::Rows(rows),
            OutputSink::Render { trace, .. } => QueryOutput::Explain(trace),
        }
    }
}

/// Fragment bound for one template.
#[derive(Clone, Debug)]
struct QueryFragment {
    select: SelectQuery,
    residual: Option<Condition>,
    template_id: String,
    join: JoinDescriptor,
    root_path: String,
}

impl QueryFragment {
    /// Restricts the fragment to its template's rows and attaches its
    /// source and join graph.
    fn into_branch(self, binders: &Binders) -> SelectQuery {
        let template = Expr::column(Table::Entry.name(), "template_id").eq(self.template_id);
        let mut select = self.select.add_condition(Operator::And, template);
        if let Some(residual) = self.residual {
            select = select.add_condition(Operator::And, residual);
        }
        let select = select.add_from(Table::Entry.name());
        binders.join.add_join_clause(select, &self.join)
    }
}

/// Call-scoped fragments keyed by template id, iterated in first-seen order.
#[derive(Default)]
struct FragmentCache {
    order: Vec<String>,
    entries: FxHashMap<String, QueryFragment>,
}

impl FragmentCache {
    fn get(&self, template_id: &str) -> Option<&QueryFragment> {
        self.entries.get(template_id)
    }

    fn insert(&mut self, fragment: QueryFragment) {
        if !self.entries.contains_key(&fragment.template_id) {
            self.order.push(fragment.template_id.clone());
        }
        self.entries.insert(fragment.template_id.clone(), fragment);
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn into_fragments(self) -> impl Iterator<Item = QueryFragment> {
        let FragmentCache { order, mut entries } = self;
        order.into_iter().filter_map(move |id| entries.remove(&id))
    }
}

/// Decides how a parsed query is resolved and runs (or explains) it.
///
/// The processor holds no per-query state: fragment caches live for one call.
pub struct QueryProcessor {
    containment: Arc<dyn ContainmentResolver>,
    binders: Binders,
    backend: Arc<dyn RelationalBackend>,
    config: ProcessorConfig,
}

impl QueryProcessor {
    /// Creates a processor over the given collaborators.
    pub fn new(
        containment: Arc<dyn ContainmentResolver>,
        binders: Binders,
        backend: Arc<dyn RelationalBackend>,
    ) -> Self {
        Self {
            containment,
            binders,
            backend,
            config: ProcessorConfig::default(),
        }
    }

    /// Processor over a SQLite repository with the default binders.
    pub fn sqlite(store: SqliteStore) -> Self {
        Self::new(
            Arc::new(SqliteContainmentResolver::new(store.clone())),
            Binders::default(),
            Arc::new(SqliteBackend::new(store)),
        )
    }

    /// Replaces the processor options.
    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the mode used by [`QueryProcessor::execute`].
    pub fn with_explain(mut self, explain: bool) -> Self {
        self.config.explain_by_default = explain;
        self
    }

    /// Runs `query` in the processor's default mode.
    pub fn execute(&self, query: &ParsedQuery, node: &NodeId) -> Result<QueryOutput> {
        self.execute_with(query, node, self.config.explain_by_default)
    }

    /// Runs `query`, or renders it when `explain` is set.
    pub fn execute_with(
        &self,
        query: &ParsedQuery,
        node: &NodeId,
        explain: bool,
    ) -> Result<QueryOutput> {
        let mut sink = OutputSink::new(explain, self.config.explain_formatted);
        match Strategy::for_query(query) {
            Strategy::Static => {
                debug!(explain, "static strategy");
                self.run_static(query, node, &mut sink)?;
            }
            Strategy::Containment(clause) => {
                debug!(explain, archetypes = clause.chain.len(), "containment strategy");
                self.run_containment(query, clause, node, &mut sink)?;
            }
        }
        Ok(sink.finish())
    }

    /// Executes an already built statement.
    pub fn perform(&self, statement: &SelectQuery) -> Result<Vec<Row>> {
        self.backend.fetch(statement)
    }

    fn order_fields(&self, query: &ParsedQuery) -> Result<Vec<OrderField>> {
        if self.binders.order_by.has_order_by(query) {
            self.binders.order_by.order_by_fields(query)
        } else {
            Ok(Vec::new())
        }
    }

    fn run_static(&self, query: &ParsedQuery, node: &NodeId, sink: &mut OutputSink) -> Result<()> {
        let order = self.order_fields(query)?;
        let (select, join) =
            self.binders
                .select
                .bind_static(query, node, query.window(), &order)?;
        let select = self.binders.from.add_from_clause(select, &join, query);
        let select = self.binders.join.add_join_clause(select, &join);
        sink.emit(self.backend.as_ref(), &select)
    }

    fn run_containment(
        &self,
        query: &ParsedQuery,
        clause: &ContainsClause,
        node: &NodeId,
        sink: &mut OutputSink,
    ) -> Result<()> {
        let timer = profile_timer();
        let units = self.containment.resolve(clause)?;
        record_profile_timer(QueryProfileKind::Resolve, timer);
        if units.is_empty() {
            debug!("empty containment set");
            return Ok(());
        }

        let cache = self.build_fragments(query, node, &units)?;
        let Some(merged) = self.merge(cache)? else {
            return Ok(());
        };

        let mut statement = merged;
        let order = self.order_fields(query)?;
        if !order.is_empty() {
            statement = statement.add_order_by(order);
        }
        if let Some(window) = query.window() {
            statement = statement.add_limit(window);
        }
        sink.emit(self.backend.as_ref(), &statement)
    }

    fn build_fragments(
        &self,
        query: &ParsedQuery,
        node: &NodeId,
        units: &[ContainmentUnit],
    ) -> Result<FragmentCache> {
        let mut cache = FragmentCache::default();
        for unit in units {
            // Units sharing a template share its fragment; the first unit's
            // root path wins.
            if let Some(cached) = cache.get(&unit.template_id) {
                debug!(
                    template = %unit.template_id,
                    composition = %unit.composition_id,
                    divergent_root = cached.root_path != unit.root_path,
                    "template already bound"
                );
                continue;
            }
            let timer = profile_timer();
            let parts = self.binders.select.bind_fragment(query, node, unit)?;
            record_profile_timer(QueryProfileKind::Fragment, timer);
            debug!(template = %unit.template_id, root = %unit.root_path, "fragment bound");
            cache.insert(QueryFragment {
                select: parts.select,
                residual: parts.residual,
                template_id: unit.template_id.clone(),
                join: parts.join,
                root_path: unit.root_path.clone(),
            });
        }
        Ok(cache)
    }

    fn merge(&self, cache: FragmentCache) -> Result<Option<SelectQuery>> {
        let timer = profile_timer();
        let fragments = cache.len();
        let mut merged: Option<SelectQuery> = None;
        for fragment in cache.into_fragments() {
            let branch = fragment.into_branch(&self.binders);
            merged = Some(match merged {
                None => branch,
                Some(acc) => acc.union(branch)?,
            });
        }
        record_profile_timer(QueryProfileKind::Merge, timer);
        debug!(fragments, "fragments merged");
        Ok(merged)
    }
}
