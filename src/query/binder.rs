//! Binders translating individual query clauses into relational pieces.
//!
//! The processor only orchestrates; the four binder seams decide what the
//! SELECT list, the source table, the join graph and the ORDER BY look like.
//! The default implementations target the schema created by
//! [`crate::store::SqliteStore`].

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::query::ast::{FieldRef, ParsedQuery, Table, WhereExpr};
use crate::query::containment::ContainmentUnit;
use crate::query::sql::{Condition, Expr, Join, JoinKind, Operator, OrderField, SelectQuery};
use crate::types::{BridgeError, NodeId, Result};

/// Tables a fragment needs beyond its projected expressions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JoinDescriptor {
    tables: BTreeSet<Table>,
}

impl JoinDescriptor {
    /// Collects the tables referenced by the query's SELECT and WHERE clauses.
    pub fn for_query(query: &ParsedQuery) -> Self {
        Self {
            tables: query.fields().into_iter().map(FieldRef::table).collect(),
        }
    }

    /// Descriptor over an explicit table set.
    pub fn with_tables<I: IntoIterator<Item = Table>>(tables: I) -> Self {
        Self {
            tables: tables.into_iter().collect(),
        }
    }

    /// Whether `table` has to be reachable.
    pub fn needs(&self, table: Table) -> bool {
        self.tables.contains(&table)
    }

    /// Table a static query should select from: the entry table whenever
    /// document content is involved, otherwise the narrowest header table.
    pub fn root(&self) -> Table {
        if self.needs(Table::Entry) || self.tables.is_empty() {
            Table::Entry
        } else if self.needs(Table::Composition) {
            Table::Composition
        } else {
            Table::Ehr
        }
    }
}

/// Pieces produced for one template.
#[derive(Clone, Debug)]
pub struct FragmentParts {
    /// SELECT list bound to the template's document layout.
    pub select: SelectQuery,
    /// WHERE clause still to be applied when the fragment is merged.
    pub residual: Option<Condition>,
    /// Join graph required by the fragment.
    pub join: JoinDescriptor,
}

/// Builds SELECT lists and predicates.
pub trait SelectBinder {
    /// Builds the fragment for the template of `unit`. Pure construction.
    fn bind_fragment(
        &self,
        query: &ParsedQuery,
        node: &NodeId,
        unit: &ContainmentUnit,
    ) -> Result<FragmentParts>;

    /// Builds the single statement used when no containment set is involved,
    /// including its predicate, ordering and limit.
    fn bind_static(
        &self,
        query: &ParsedQuery,
        node: &NodeId,
        window: Option<u64>,
        order: &[OrderField],
    ) -> Result<(SelectQuery, JoinDescriptor)>;
}

/// Adds the relational source of a static statement.
pub trait FromBinder {
    /// Returns `select` with its FROM clause set.
    fn add_from_clause(
        &self,
        select: SelectQuery,
        join: &JoinDescriptor,
        query: &ParsedQuery,
    ) -> SelectQuery;
}

/// Adds the join graph.
pub trait JoinBinder {
    /// Returns `select` joined to every table `join` needs.
    fn add_join_clause(&self, select: SelectQuery, join: &JoinDescriptor) -> SelectQuery;
}

/// Translates ORDER BY attributes.
pub trait OrderByBinder {
    /// Whether the query orders its result.
    fn has_order_by(&self, query: &ParsedQuery) -> bool;
    /// ORDER BY items for the final statement.
    fn order_by_fields(&self, query: &ParsedQuery) -> Result<Vec<OrderField>>;
}

/// The four binder seams used by one processor.
#[derive(Clone)]
pub struct Binders {
    /// SELECT/WHERE binder.
    pub select: Arc<dyn SelectBinder>,
    /// FROM binder.
    pub from: Arc<dyn FromBinder>,
    /// Join binder.
    pub join: Arc<dyn JoinBinder>,
    /// ORDER BY binder.
    pub order_by: Arc<dyn OrderByBinder>,
}

impl Default for Binders {
    fn default() -> Self {
        Self {
            select: Arc::new(ColumnSelectBinder),
            from: Arc::new(EntryFromBinder),
            join: Arc::new(CompositionJoinBinder),
            order_by: Arc::new(AliasOrderByBinder),
        }
    }
}

const ENTRY_DOCUMENT: &str = "entry";

/// Builds a SQLite JSON path from a unit root path and a field path.
///
/// Both are slash-separated; every non-empty segment becomes a quoted key.
pub fn json_path(root: &str, path: &str) -> std::result::Result<String, String> {
    let mut out = String::from("$");
    for segment in root.split('/').chain(path.split('/')) {
        if segment.is_empty() {
            continue;
        }
        if segment.contains('"') {
            return Err(format!("path segment {segment:?} contains a quote"));
        }
        out.push_str(".\"");
        out.push_str(segment);
        out.push('"');
    }
    Ok(out)
}

/// Default select binder over the repository schema.
///
/// Archetype paths are read from the entry document with `json_extract`,
/// rooted at the containment unit's path; composition uids are rendered as
/// `<id>::<node>::<version>`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ColumnSelectBinder;

impl ColumnSelectBinder {
    fn field_expr(field: &FieldRef, node: &NodeId, root: &str) -> std::result::Result<Expr, String> {
        match field {
            FieldRef::Column { table, column } => {
                if column.is_empty() {
                    return Err(format!("empty column name on {}", table.name()));
                }
                Ok(Expr::column(table.name(), column.clone()))
            }
            FieldRef::CompositionUid => Ok(Expr::Concat(vec![
                Expr::column(Table::Composition.name(), "id"),
                Expr::param(format!("::{node}::")),
                Expr::column(Table::Composition.name(), "sys_version"),
            ])),
            FieldRef::Path { path, .. } => Ok(Expr::JsonExtract {
                table: Table::Entry.name().to_owned(),
                column: ENTRY_DOCUMENT.to_owned(),
                path: json_path(root, path)?,
            }),
        }
    }

    fn condition(
        expr: &WhereExpr,
        node: &NodeId,
        root: &str,
    ) -> std::result::Result<Condition, String> {
        Ok(match expr {
            WhereExpr::Compare { field, op, value } => Condition::Compare {
                lhs: Self::field_expr(field, node, root)?,
                op: *op,
                rhs: Expr::Param(value.clone()),
            },
            WhereExpr::IsNull { field } => Condition::IsNull(Self::field_expr(field, node, root)?),
            WhereExpr::And(terms) => Condition::And(
                terms
                    .iter()
                    .map(|t| Self::condition(t, node, root))
                    .collect::<std::result::Result<_, _>>()?,
            ),
            WhereExpr::Or(terms) => Condition::Or(
                terms
                    .iter()
                    .map(|t| Self::condition(t, node, root))
                    .collect::<std::result::Result<_, _>>()?,
            ),
            WhereExpr::Not(inner) => Condition::Not(Box::new(Self::condition(inner, node, root)?)),
        })
    }

    fn projection(
        query: &ParsedQuery,
        node: &NodeId,
        root: &str,
    ) -> std::result::Result<SelectQuery, String> {
        let mut select = SelectQuery::new();
        for field in &query.select {
            select = select.select(Self::field_expr(&field.field, node, root)?, field.alias.clone());
        }
        Ok(select)
    }

    fn check_variables(query: &ParsedQuery) -> std::result::Result<(), String> {
        let Some(clause) = query.contains_clause() else {
            return Ok(());
        };
        let declared: Vec<&str> = clause
            .chain
            .iter()
            .filter_map(|node| node.variable.as_deref())
            .collect();
        if declared.is_empty() {
            return Ok(());
        }
        for field in query.fields() {
            if let FieldRef::Path { variable, .. } = field {
                if !declared.contains(&variable.as_str()) {
                    return Err(format!("variable '{variable}' is not bound by CONTAINS"));
                }
            }
        }
        Ok(())
    }
}

impl SelectBinder for ColumnSelectBinder {
    fn bind_fragment(
        &self,
        query: &ParsedQuery,
        node: &NodeId,
        unit: &ContainmentUnit,
    ) -> Result<FragmentParts> {
        let bind = || -> std::result::Result<FragmentParts, String> {
            Self::check_variables(query)?;
            let select = Self::projection(query, node, &unit.root_path)?;
            let residual = query
                .predicate
                .as_ref()
                .map(|pred| Self::condition(pred, node, &unit.root_path))
                .transpose()?;
            Ok(FragmentParts {
                select,
                residual,
                join: JoinDescriptor::for_query(query),
            })
        };
        bind().map_err(|reason| BridgeError::binding(&unit.template_id, reason))
    }

    fn bind_static(
        &self,
        query: &ParsedQuery,
        node: &NodeId,
        window: Option<u64>,
        order: &[OrderField],
    ) -> Result<(SelectQuery, JoinDescriptor)> {
        let mut select = Self::projection(query, node, "").map_err(BridgeError::InvalidOwned)?;
        if let Some(pred) = &query.predicate {
            let condition = Self::condition(pred, node, "").map_err(BridgeError::InvalidOwned)?;
            select = select.add_condition(Operator::And, condition);
        }
        select = select.add_order_by(order.iter().cloned());
        if let Some(window) = window {
            select = select.add_limit(window);
        }
        Ok((select, JoinDescriptor::for_query(query)))
    }
}

/// Selects from the descriptor's root table.
#[derive(Clone, Copy, Debug, Default)]
pub struct EntryFromBinder;

impl FromBinder for EntryFromBinder {
    fn add_from_clause(
        &self,
        select: SelectQuery,
        join: &JoinDescriptor,
        _query: &ParsedQuery,
    ) -> SelectQuery {
        select.add_from(join.root().name())
    }
}

/// Joins entry, composition and ehr along their foreign keys, starting from
/// whichever of them the statement already selects from.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompositionJoinBinder;

impl CompositionJoinBinder {
    fn inner(table: Table, on: Condition) -> Join {
        Join {
            kind: JoinKind::Inner,
            table: table.name().to_owned(),
            on,
        }
    }

    fn composition_to_entry() -> Condition {
        Expr::column("composition", "id").eq_expr(Expr::column("entry", "composition_id"))
    }

    fn ehr_to_composition() -> Condition {
        Expr::column("ehr", "id").eq_expr(Expr::column("composition", "ehr_id"))
    }
}

impl JoinBinder for CompositionJoinBinder {
    fn add_join_clause(&self, select: SelectQuery, join: &JoinDescriptor) -> SelectQuery {
        let root = select
            .from_tables()
            .first()
            .cloned()
            .unwrap_or_else(|| Table::Entry.name().to_owned());
        let needs_ehr = join.needs(Table::Ehr);
        let needs_composition = join.needs(Table::Composition);
        let needs_entry = join.needs(Table::Entry);
        match root.as_str() {
            "entry" => {
                let mut select = select;
                if needs_composition || needs_ehr {
                    select = select
                        .add_join(Self::inner(Table::Composition, Self::composition_to_entry()));
                }
                if needs_ehr {
                    select = select.add_join(Self::inner(Table::Ehr, Self::ehr_to_composition()));
                }
                select
            }
            "composition" => {
                let mut select = select;
                if needs_ehr {
                    select = select.add_join(Self::inner(Table::Ehr, Self::ehr_to_composition()));
                }
                if needs_entry {
                    select = select.add_join(Self::inner(Table::Entry, Self::composition_to_entry()));
                }
                select
            }
            "ehr" => {
                let mut select = select;
                if needs_composition || needs_entry {
                    select = select
                        .add_join(Self::inner(Table::Composition, Self::ehr_to_composition()));
                }
                if needs_entry {
                    select = select.add_join(Self::inner(Table::Entry, Self::composition_to_entry()));
                }
                select
            }
            _ => select,
        }
    }
}

/// Orders by selected aliases.
#[derive(Clone, Copy, Debug, Default)]
pub struct AliasOrderByBinder;

impl OrderByBinder for AliasOrderByBinder {
    fn has_order_by(&self, query: &ParsedQuery) -> bool {
        !query.order_by.is_empty()
    }

    fn order_by_fields(&self, query: &ParsedQuery) -> Result<Vec<OrderField>> {
        query
            .order_by
            .iter()
            .map(|attr| {
                if !query.select.iter().any(|f| f.alias == attr.alias) {
                    return Err(BridgeError::InvalidOwned(format!(
                        "ORDER BY '{}' does not name a selected column",
                        attr.alias
                    )));
                }
                Ok(OrderField {
                    expr: Expr::Alias(attr.alias.clone()),
                    direction: attr.direction,
                })
            })
            .collect()
    }
}
