//! Immutable relational query values and their SQLite rendering.
//!
//! A [`SelectQuery`] is never mutated in place: every combinator consumes the
//! query and returns the extended one, so a fragment handed to the merge step
//! cannot be observed half-built. Rendering and parameter enumeration share a
//! single walk, which keeps the `?` placeholders and [`SelectQuery::params`]
//! in the same positional order.

use crate::query::ast::{CompareOp, SortDirection};
use crate::query::Value;
use crate::types::{BridgeError, Result};

/// Scalar expression usable in projections, predicates and ORDER BY.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Qualified column reference.
    Column {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// Reference to an output column by alias.
    Alias(String),
    /// `json_extract(table.column, ?)` with the path bound as a parameter.
    JsonExtract {
        /// Table holding the document.
        table: String,
        /// Document column.
        column: String,
        /// SQLite JSON path (`$."a"."b"`).
        path: String,
    },
    /// Bound parameter.
    Param(Value),
    /// String concatenation of the parts.
    Concat(Vec<Expr>),
}

impl Expr {
    /// Shorthand for [`Expr::Column`].
    pub fn column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Column {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Shorthand for [`Expr::Param`].
    pub fn param(value: impl Into<Value>) -> Self {
        Expr::Param(value.into())
    }

    /// `self = value`.
    pub fn eq(self, value: impl Into<Value>) -> Condition {
        Condition::Compare {
            lhs: self,
            op: CompareOp::Eq,
            rhs: Expr::Param(value.into()),
        }
    }

    /// `self = other`.
    pub fn eq_expr(self, other: Expr) -> Condition {
        Condition::Compare {
            lhs: self,
            op: CompareOp::Eq,
            rhs: other,
        }
    }
}

/// Connective used when a condition is attached to an existing one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operator {
    /// Conjunction.
    And,
    /// Disjunction.
    Or,
}

/// Boolean condition tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// Binary comparison.
    Compare {
        /// Left operand.
        lhs: Expr,
        /// Operator.
        op: CompareOp,
        /// Right operand.
        rhs: Expr,
    },
    /// `expr IS NULL`.
    IsNull(Expr),
    /// All terms hold.
    And(Vec<Condition>),
    /// Any term holds.
    Or(Vec<Condition>),
    /// Negation.
    Not(Box<Condition>),
}

impl Condition {
    /// Combines two conditions with the given connective, flattening
    /// same-connective chains.
    pub fn combine(self, op: Operator, other: Condition) -> Condition {
        match (op, self) {
            (Operator::And, Condition::And(mut terms)) => {
                terms.push(other);
                Condition::And(terms)
            }
            (Operator::Or, Condition::Or(mut terms)) => {
                terms.push(other);
                Condition::Or(terms)
            }
            (Operator::And, lhs) => Condition::And(vec![lhs, other]),
            (Operator::Or, lhs) => Condition::Or(vec![lhs, other]),
        }
    }
}

/// Join flavour.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JoinKind {
    /// `JOIN`.
    Inner,
    /// `LEFT JOIN`.
    Left,
}

/// Joined table with its ON condition.
#[derive(Clone, Debug, PartialEq)]
pub struct Join {
    /// Join flavour.
    pub kind: JoinKind,
    /// Joined table.
    pub table: String,
    /// ON condition.
    pub on: Condition,
}

/// ORDER BY item.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderField {
    /// Sort key.
    pub expr: Expr,
    /// Direction.
    pub direction: SortDirection,
}

#[derive(Clone, Debug, Default, PartialEq)]
struct SelectCore {
    columns: Vec<(Expr, String)>,
    from: Vec<String>,
    joins: Vec<Join>,
    condition: Option<Condition>,
}

/// SELECT statement, possibly a UNION of several branches.
///
/// ORDER BY and LIMIT belong to the statement as a whole: a branch that
/// already carries either cannot take part in a union.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectQuery {
    head: SelectCore,
    unions: Vec<SelectCore>,
    order_by: Vec<OrderField>,
    limit: Option<u64>,
}

impl SelectQuery {
    /// Empty statement.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a projected column.
    #[must_use]
    pub fn select(mut self, expr: Expr, alias: impl Into<String>) -> Self {
        self.head.columns.push((expr, alias.into()));
        self
    }

    /// Attaches a condition to the WHERE clause of the first branch.
    #[must_use]
    pub fn add_condition(mut self, op: Operator, condition: Condition) -> Self {
        self.head.condition = Some(match self.head.condition.take() {
            Some(existing) => existing.combine(op, condition),
            None => condition,
        });
        self
    }

    /// Adds a source table; adding a table twice is a no-op.
    #[must_use]
    pub fn add_from(mut self, table: impl Into<String>) -> Self {
        let table = table.into();
        if !self.head.from.contains(&table) {
            self.head.from.push(table);
        }
        self
    }

    /// Adds a join; joining a table already present is a no-op.
    #[must_use]
    pub fn add_join(mut self, join: Join) -> Self {
        if !self.has_table(&join.table) {
            self.head.joins.push(join);
        }
        self
    }

    /// Appends `other` as a UNION branch.
    pub fn union(mut self, other: SelectQuery) -> Result<Self> {
        if !self.order_by.is_empty() || self.limit.is_some() {
            return Err(BridgeError::Invalid(
                "union requires an unordered, unlimited left branch",
            ));
        }
        if !other.order_by.is_empty() || other.limit.is_some() {
            return Err(BridgeError::Invalid(
                "union requires an unordered, unlimited right branch",
            ));
        }
        if other.head.columns.len() != self.head.columns.len() {
            return Err(BridgeError::InvalidOwned(format!(
                "union branches project {} and {} columns",
                self.head.columns.len(),
                other.head.columns.len()
            )));
        }
        self.unions.push(other.head);
        self.unions.extend(other.unions);
        Ok(self)
    }

    /// Appends ORDER BY items.
    #[must_use]
    pub fn add_order_by<I>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = OrderField>,
    {
        self.order_by.extend(fields);
        self
    }

    /// Sets the row limit.
    #[must_use]
    pub fn add_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `table` appears in FROM or in a join of the first branch.
    pub fn has_table(&self, table: &str) -> bool {
        self.head.from.iter().any(|t| t == table) || self.head.joins.iter().any(|j| j.table == table)
    }

    /// Source tables of the first branch.
    pub fn from_tables(&self) -> &[String] {
        &self.head.from
    }

    /// Number of SELECT branches (1 + number of unions).
    pub fn branch_count(&self) -> usize {
        1 + self.unions.len()
    }

    /// Statement-level ORDER BY items.
    pub fn order_by(&self) -> &[OrderField] {
        &self.order_by
    }

    /// Statement-level limit.
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Renders the statement, optionally one clause per line.
    pub fn render(&self, formatted: bool) -> String {
        self.to_sql(formatted).0
    }

    /// Bound parameters in placeholder order.
    pub fn params(&self) -> Vec<Value> {
        self.to_sql(false).1
    }

    /// Renders the statement together with its parameters.
    pub fn to_sql(&self, formatted: bool) -> (String, Vec<Value>) {
        let mut w = SqlWriter::new(formatted);
        w.core(&self.head);
        for branch in &self.unions {
            w.clause("union");
            w.core(branch);
        }
        if !self.order_by.is_empty() {
            w.clause("order by");
            w.sql.push(' ');
            for (idx, field) in self.order_by.iter().enumerate() {
                if idx > 0 {
                    w.sql.push_str(", ");
                }
                w.expr(&field.expr);
                w.sql.push_str(match field.direction {
                    SortDirection::Asc => " asc",
                    SortDirection::Desc => " desc",
                });
            }
        }
        if let Some(limit) = self.limit {
            w.clause("limit");
            w.sql.push(' ');
            w.bind(Value::Int(i64::try_from(limit).unwrap_or(i64::MAX)));
        }
        (w.sql, w.params)
    }
}

/// Quotes an identifier for SQLite.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

struct SqlWriter {
    sql: String,
    params: Vec<Value>,
    formatted: bool,
}

impl SqlWriter {
    fn new(formatted: bool) -> Self {
        Self {
            sql: String::new(),
            params: Vec::new(),
            formatted,
        }
    }

    fn clause(&mut self, keyword: &str) {
        if !self.sql.is_empty() {
            self.sql.push(if self.formatted { '\n' } else { ' ' });
        }
        self.sql.push_str(keyword);
    }

    fn list_sep(&mut self, first: bool) {
        match (first, self.formatted) {
            (true, true) => self.sql.push_str("\n  "),
            (true, false) => self.sql.push(' '),
            (false, true) => self.sql.push_str(",\n  "),
            (false, false) => self.sql.push_str(", "),
        }
    }

    fn bind(&mut self, value: Value) {
        self.sql.push('?');
        self.params.push(value);
    }

    fn core(&mut self, core: &SelectCore) {
        self.clause("select");
        if core.columns.is_empty() {
            self.list_sep(true);
            self.sql.push('*');
        }
        for (idx, (expr, alias)) in core.columns.iter().enumerate() {
            self.list_sep(idx == 0);
            self.expr(expr);
            self.sql.push_str(" as ");
            self.sql.push_str(&quote_ident(alias));
        }
        if !core.from.is_empty() {
            self.clause("from");
            for (idx, table) in core.from.iter().enumerate() {
                self.list_sep(idx == 0);
                self.sql.push_str(&quote_ident(table));
            }
        }
        for join in &core.joins {
            self.clause(match join.kind {
                JoinKind::Inner => "join",
                JoinKind::Left => "left outer join",
            });
            self.sql.push_str(&format!(" {} on ", quote_ident(&join.table)));
            self.condition(&join.on);
        }
        if let Some(condition) = &core.condition {
            self.clause("where");
            self.sql.push(' ');
            self.condition(condition);
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Column { table, column } => {
                self.sql.push_str(&format!("{}.{}", quote_ident(table), quote_ident(column)));
            }
            Expr::Alias(alias) => self.sql.push_str(&quote_ident(alias)),
            Expr::JsonExtract {
                table,
                column,
                path,
            } => {
                self.sql.push_str(&format!(
                    "json_extract({}.{}, ",
                    quote_ident(table),
                    quote_ident(column)
                ));
                self.bind(Value::String(path.clone()));
                self.sql.push(')');
            }
            Expr::Param(value) => self.bind(value.clone()),
            Expr::Concat(parts) => {
                self.sql.push('(');
                for (idx, part) in parts.iter().enumerate() {
                    if idx > 0 {
                        self.sql.push_str(" || ");
                    }
                    self.expr(part);
                }
                self.sql.push(')');
            }
        }
    }

    fn condition(&mut self, condition: &Condition) {
        match condition {
            Condition::Compare { lhs, op, rhs } => {
                self.expr(lhs);
                self.sql.push_str(match op {
                    CompareOp::Eq => " = ",
                    CompareOp::Ne => " <> ",
                    CompareOp::Lt => " < ",
                    CompareOp::Le => " <= ",
                    CompareOp::Gt => " > ",
                    CompareOp::Ge => " >= ",
                    CompareOp::Like => " like ",
                });
                self.expr(rhs);
            }
            Condition::IsNull(expr) => {
                self.expr(expr);
                self.sql.push_str(" is null");
            }
            Condition::And(terms) => self.junction(terms, " and ", "1 = 1"),
            Condition::Or(terms) => self.junction(terms, " or ", "1 = 0"),
            Condition::Not(inner) => {
                self.sql.push_str("not (");
                self.condition(inner);
                self.sql.push(')');
            }
        }
    }

    fn junction(&mut self, terms: &[Condition], sep: &str, empty: &str) {
        match terms {
            [] => self.sql.push_str(empty),
            [single] => self.condition(single),
            _ => {
                self.sql.push('(');
                for (idx, term) in terms.iter().enumerate() {
                    if idx > 0 {
                        self.sql.push_str(sep);
                    }
                    self.condition(term);
                }
                self.sql.push(')');
            }
        }
    }
}
