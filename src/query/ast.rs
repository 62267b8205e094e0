//! Parsed archetype query handed to the processor by the upstream compiler.
//!
//! Everything here is read-only once built. The structures deserialize from
//! the JSON emitted by the query compiler so that the CLI can replay
//! compiled queries without linking the parser.

use serde::{Deserialize, Serialize};

use crate::query::Value;

/// Relational tables a static field can be read from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// Electronic health record header.
    Ehr,
    /// Committed composition header.
    Composition,
    /// Entry document holding the archetyped content.
    Entry,
}

impl Table {
    /// Name of the table in the repository schema.
    pub fn name(self) -> &'static str {
        match self {
            Table::Ehr => "ehr",
            Table::Composition => "composition",
            Table::Entry => "entry",
        }
    }
}

/// Reference to a value addressed by the query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldRef {
    /// Plain column on one of the repository tables.
    Column {
        /// Table holding the column.
        table: Table,
        /// Column name.
        column: String,
    },
    /// Versioned composition uid, qualified with the executing node.
    CompositionUid,
    /// Archetype path inside an entry document. Its location depends on
    /// the containment unit the row belongs to.
    Path {
        /// Containment variable the path is rooted at.
        variable: String,
        /// Slash-separated archetype path, relative to the variable.
        path: String,
    },
}

impl FieldRef {
    /// Shorthand for [`FieldRef::Column`].
    pub fn column(table: Table, column: impl Into<String>) -> Self {
        FieldRef::Column {
            table,
            column: column.into(),
        }
    }

    /// Shorthand for [`FieldRef::Path`].
    pub fn path(variable: impl Into<String>, path: impl Into<String>) -> Self {
        FieldRef::Path {
            variable: variable.into(),
            path: path.into(),
        }
    }

    /// Whether the field can only be located once a containment unit is known.
    pub fn is_path(&self) -> bool {
        matches!(self, FieldRef::Path { .. })
    }

    /// Table the field lives on.
    pub fn table(&self) -> Table {
        match self {
            FieldRef::Column { table, .. } => *table,
            FieldRef::CompositionUid => Table::Composition,
            FieldRef::Path { .. } => Table::Entry,
        }
    }
}

/// Projected column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectField {
    /// Output column name.
    pub alias: String,
    /// Value to project.
    pub field: FieldRef,
}

/// Comparison operators available to predicates.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// SQL `LIKE`.
    Like,
}

/// Predicate tree from the WHERE clause.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhereExpr {
    /// `field <op> value`.
    Compare {
        /// Left-hand side.
        field: FieldRef,
        /// Operator.
        op: CompareOp,
        /// Literal right-hand side.
        value: Value,
    },
    /// `field IS NULL`.
    IsNull {
        /// Tested field.
        field: FieldRef,
    },
    /// Conjunction.
    And(Vec<WhereExpr>),
    /// Disjunction.
    Or(Vec<WhereExpr>),
    /// Negation.
    Not(Box<WhereExpr>),
}

impl WhereExpr {
    /// Visits every field referenced by the predicate.
    pub fn for_each_field<'a>(&'a self, f: &mut impl FnMut(&'a FieldRef)) {
        match self {
            WhereExpr::Compare { field, .. } | WhereExpr::IsNull { field } => f(field),
            WhereExpr::And(terms) | WhereExpr::Or(terms) => {
                for term in terms {
                    term.for_each_field(f);
                }
            }
            WhereExpr::Not(inner) => inner.for_each_field(f),
        }
    }
}

/// One archetype in a CONTAINS chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContainmentNode {
    /// Archetype id, e.g. `openEHR-EHR-OBSERVATION.blood_pressure.v1`.
    pub archetype_id: String,
    /// Variable bound to the archetype, if any.
    #[serde(default)]
    pub variable: Option<String>,
}

/// CONTAINS clause, outermost archetype first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainsClause {
    /// Chain of nested archetypes.
    pub chain: Vec<ContainmentNode>,
}

impl ContainsClause {
    /// Builds a clause from archetype ids, outermost first.
    pub fn of<I, S>(archetypes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chain: archetypes
                .into_iter()
                .map(|id| ContainmentNode {
                    archetype_id: id.into(),
                    variable: None,
                })
                .collect(),
        }
    }

    /// GLOB pattern preselecting candidate containment labels.
    ///
    /// Labels are dot-joined archetype ids with every non-alphanumeric
    /// character folded to `_`. The pattern is coarse: it does not anchor
    /// segments on `.`, so candidates still go through
    /// [`ContainsClause::matches_label`].
    pub fn label_pattern(&self) -> String {
        let mut pattern = String::new();
        for node in &self.chain {
            pattern.push('*');
            pattern.push_str(&label_segment(&node.archetype_id));
        }
        pattern
    }

    /// Whether `label` satisfies the chain: the innermost archetype is the
    /// last label segment and every outer archetype is a whole segment
    /// before it, in chain order.
    pub fn matches_label(&self, label: &str) -> bool {
        let Some((innermost, outer)) = self.chain.split_last() else {
            return false;
        };
        let mut segments: Vec<&str> = label.split('.').collect();
        if segments.pop() != Some(label_segment(&innermost.archetype_id).as_str()) {
            return false;
        }
        let mut remaining = segments.into_iter();
        outer.iter().all(|node| {
            let wanted = label_segment(&node.archetype_id);
            remaining.any(|segment| segment == wanted)
        })
    }
}

/// Folds an archetype id into the form stored in containment labels.
pub fn label_segment(archetype_id: &str) -> String {
    archetype_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// TOP clause.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopAttributes {
    /// Maximum number of rows to return.
    pub window: Option<u64>,
}

/// Sort direction for ORDER BY.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

/// ORDER BY item, addressing a selected column by alias.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAttribute {
    /// Alias of a selected field.
    pub alias: String,
    /// Sort direction.
    #[serde(default)]
    pub direction: SortDirection,
}

/// Compiled query.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedQuery {
    /// Projected fields in output order.
    pub select: Vec<SelectField>,
    /// CONTAINS clause, when present.
    #[serde(default)]
    pub contains: Option<ContainsClause>,
    /// WHERE clause, when present.
    #[serde(default, rename = "where")]
    pub predicate: Option<WhereExpr>,
    /// ORDER BY items.
    #[serde(default)]
    pub order_by: Vec<OrderAttribute>,
    /// TOP clause.
    #[serde(default)]
    pub top: Option<TopAttributes>,
}

impl ParsedQuery {
    /// Whether resolution has to go through the containment set.
    pub fn has_contains_expression(&self) -> bool {
        self.contains
            .as_ref()
            .is_some_and(|clause| !clause.chain.is_empty())
    }

    /// The CONTAINS clause, if any.
    pub fn contains_clause(&self) -> Option<&ContainsClause> {
        self.contains.as_ref().filter(|clause| !clause.chain.is_empty())
    }

    /// Whether any selected or filtered field is an archetype path.
    pub fn has_path_expressions(&self) -> bool {
        let mut found = self.select.iter().any(|f| f.field.is_path());
        if let Some(pred) = &self.predicate {
            pred.for_each_field(&mut |field| found |= field.is_path());
        }
        found
    }

    /// Row limit requested through TOP.
    pub fn window(&self) -> Option<u64> {
        self.top.and_then(|top| top.window)
    }

    /// Every field referenced by the SELECT and WHERE clauses.
    pub fn fields(&self) -> Vec<&FieldRef> {
        let mut fields: Vec<&FieldRef> = self.select.iter().map(|s| &s.field).collect();
        if let Some(pred) = &self.predicate {
            pred.for_each_field(&mut |field| fields.push(field));
        }
        fields
    }
}
