//! Clause model: SQL fragments with bindings, column references and predicates.
//!
//! Fragments keep SQL text and bound values as separate parts. `$n`
//! placeholders are produced only when a fragment is compiled, so fragments
//! can be nested (sub-queries, CTE bodies, join conditions) without any
//! renumbering by string replacement.

use crate::error::{OrmError, OrmResult};
use crate::ident::Ident;
use crate::value::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Raw(String),
    Bind(Value),
}

/// SQL text interleaved with bound values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    parts: Vec<Part>,
}

impl Fragment {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fragment of raw SQL without bindings.
    pub fn raw(sql: impl Into<String>) -> Self {
        let mut frag = Self::new();
        frag.push(&sql.into());
        frag
    }

    /// Parse a `?` template, binding one value per `?`.
    ///
    /// The number of `?` marks must equal the number of values.
    pub fn template(sql: &str, bindings: Vec<Value>) -> OrmResult<Self> {
        let expected = sql.matches('?').count();
        if expected != bindings.len() {
            return Err(OrmError::builder(format!(
                "raw fragment `{sql}` has {expected} placeholder(s) but {} binding(s)",
                bindings.len()
            )));
        }

        let mut frag = Self::new();
        let mut values = bindings.into_iter();
        for (i, piece) in sql.split('?').enumerate() {
            if i > 0 {
                if let Some(value) = values.next() {
                    frag.push_bind(value);
                }
            }
            frag.push(piece);
        }
        Ok(frag)
    }

    /// Append raw SQL.
    pub fn push(&mut self, sql: &str) -> &mut Self {
        if sql.is_empty() {
            return self;
        }
        match self.parts.last_mut() {
            Some(Part::Raw(last)) => last.push_str(sql),
            _ => self.parts.push(Part::Raw(sql.to_string())),
        }
        self
    }

    /// Append a placeholder bound to `value`.
    pub fn push_bind(&mut self, value: impl Into<Value>) -> &mut Self {
        self.parts.push(Part::Bind(value.into()));
        self
    }

    /// Append a validated identifier.
    pub fn push_ident(&mut self, ident: &Ident) -> &mut Self {
        match self.parts.last_mut() {
            Some(Part::Raw(last)) => ident.write_sql(last),
            _ => {
                let mut s = String::new();
                ident.write_sql(&mut s);
                self.parts.push(Part::Raw(s));
            }
        }
        self
    }

    /// Append another fragment, keeping its bindings in order.
    pub fn push_fragment(&mut self, other: &Fragment) -> &mut Self {
        for part in &other.parts {
            match part {
                Part::Raw(s) => {
                    self.push(s);
                }
                Part::Bind(v) => {
                    self.parts.push(Part::Bind(v.clone()));
                }
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Bound values in placeholder order.
    pub fn bindings(&self) -> impl Iterator<Item = &Value> {
        self.parts.iter().filter_map(|p| match p {
            Part::Bind(v) => Some(v),
            Part::Raw(_) => None,
        })
    }

    /// Render with `$1, $2, ...` placeholders.
    pub fn compile(&self) -> CompiledQuery {
        let mut sql = String::new();
        let mut bindings = Vec::new();
        for part in &self.parts {
            match part {
                Part::Raw(s) => sql.push_str(s),
                Part::Bind(v) => {
                    bindings.push(v.clone());
                    sql.push('$');
                    sql.push_str(&bindings.len().to_string());
                }
            }
        }
        CompiledQuery { sql, bindings }
    }
}

/// Final SQL text with its ordered bindings.
///
/// `bindings.len()` always equals the number of `$n` placeholders in `sql`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub bindings: Vec<Value>,
}

impl fmt::Display for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// A compiled-but-unnumbered query usable inside another query.
///
/// Carries the error of the builder it was extracted from, so embedding a
/// failed sub-query fails the outer query too.
#[derive(Debug, Clone, Default)]
pub struct SubQuery {
    pub(crate) fragment: Fragment,
    pub(crate) error: Option<String>,
}

impl SubQuery {
    /// A sub-query from raw SQL with `?` placeholders.
    pub fn raw(sql: &str, bindings: Vec<Value>) -> Self {
        match Fragment::template(sql, bindings) {
            Ok(fragment) => Self {
                fragment,
                error: None,
            },
            Err(OrmError::Builder(message)) => Self {
                fragment: Fragment::new(),
                error: Some(message),
            },
            Err(e) => Self {
                fragment: Fragment::new(),
                error: Some(e.to_string()),
            },
        }
    }

    pub fn fragment(&self) -> &Fragment {
        &self.fragment
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Render with its own numbering, for inspection.
    pub fn compile(&self) -> CompiledQuery {
        self.fragment.compile()
    }
}

// ==================== Columns ====================

/// An entry of a select list.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// A validated column name, bare or qualified.
    Name(Ident),
    /// `*` or `table.*`.
    Star(Option<Ident>),
    /// A raw expression with bindings.
    Raw(Fragment),
    /// `(sub-query) AS alias`.
    Sub { query: Fragment, alias: Ident },
}

impl Column {
    /// Parse a column reference: `name`, `table.name`, `*` or `table.*`.
    pub fn parse(s: &str) -> OrmResult<Self> {
        let s = s.trim();
        if s == "*" {
            return Ok(Column::Star(None));
        }
        if let Some(table) = s.strip_suffix(".*") {
            return Ok(Column::Star(Some(Ident::parse(table)?)));
        }
        Ok(Column::Name(Ident::parse(s)?))
    }

    /// Qualify bare names and `*` with `table`. Other forms are unchanged.
    pub fn qualify(&self, table: &Ident) -> Self {
        match self {
            Column::Name(ident) if !ident.is_qualified() => {
                Column::Name(Ident::qualified(table, ident))
            }
            Column::Star(None) => Column::Star(Some(table.clone())),
            other => other.clone(),
        }
    }

    pub(crate) fn write(&self, out: &mut Fragment) {
        match self {
            Column::Name(ident) => {
                out.push_ident(ident);
            }
            Column::Star(None) => {
                out.push("*");
            }
            Column::Star(Some(table)) => {
                out.push_ident(table).push(".*");
            }
            Column::Raw(frag) => {
                out.push_fragment(frag);
            }
            Column::Sub { query, alias } => {
                out.push("(")
                    .push_fragment(query)
                    .push(") AS ")
                    .push_ident(alias);
            }
        }
    }
}

// ==================== Predicates ====================

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
    ILike,
    NotILike,
}

impl Op {
    pub fn as_sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "<>",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Like => "LIKE",
            Op::NotLike => "NOT LIKE",
            Op::ILike => "ILIKE",
            Op::NotILike => "NOT ILIKE",
        }
    }

    /// Parse an operator written as text, case-insensitively.
    pub fn parse(s: &str) -> OrmResult<Self> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        let op = match normalized.to_ascii_lowercase().as_str() {
            "=" | "==" => Op::Eq,
            "<>" | "!=" => Op::Ne,
            "<" => Op::Lt,
            "<=" => Op::Le,
            ">" => Op::Gt,
            ">=" => Op::Ge,
            "like" => Op::Like,
            "not like" => Op::NotLike,
            "ilike" => Op::ILike,
            "not ilike" => Op::NotILike,
            _ => return Err(OrmError::builder(format!("unsupported operator `{s}`"))),
        };
        Ok(op)
    }
}

impl FromStr for Op {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Op::parse(s)
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Value),
    Column(Ident),
}

/// Conjunction joining a predicate to the ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conj {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: Ident,
        op: Op,
        operand: Operand,
    },
    Null {
        column: Ident,
        negated: bool,
    },
    In {
        column: Ident,
        values: Vec<Value>,
        negated: bool,
    },
    InSub {
        column: Ident,
        query: Fragment,
        negated: bool,
    },
    Group(Conditions),
    Raw(Fragment),
}

impl Predicate {
    fn write(&self, out: &mut Fragment) {
        match self {
            Predicate::Compare {
                column,
                op,
                operand,
            } => {
                out.push_ident(column).push(" ").push(op.as_sql()).push(" ");
                match operand {
                    Operand::Value(v) => out.push_bind(v.clone()),
                    Operand::Column(c) => out.push_ident(c),
                };
            }
            Predicate::Null { column, negated } => {
                out.push_ident(column);
                out.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Predicate::In {
                values, negated, ..
            } if values.is_empty() => {
                out.push(if *negated { "1=1" } else { "1=0" });
            }
            Predicate::In {
                column,
                values,
                negated,
            } => {
                out.push_ident(column);
                out.push(if *negated { " NOT IN (" } else { " IN (" });
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        out.push(", ");
                    }
                    out.push_bind(v.clone());
                }
                out.push(")");
            }
            Predicate::InSub {
                column,
                query,
                negated,
            } => {
                out.push_ident(column);
                out.push(if *negated { " NOT IN (" } else { " IN (" });
                out.push_fragment(query).push(")");
            }
            Predicate::Group(group) => {
                out.push("(");
                group.write(out);
                out.push(")");
            }
            Predicate::Raw(frag) => {
                out.push_fragment(frag);
            }
        }
    }
}

/// An ordered list of predicates joined by AND/OR.
///
/// Used for WHERE clauses, join ON clauses and nested groups. Like the query
/// builder, the first invalid argument is recorded and later calls are ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions {
    items: Vec<(Conj, Predicate)>,
    error: Option<String>,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub(crate) fn take_error(&mut self) -> Option<String> {
        self.error.take()
    }

    fn add(mut self, conj: Conj, predicate: OrmResult<Predicate>) -> Self {
        if self.error.is_some() {
            return self;
        }
        match predicate {
            Ok(p) => self.items.push((conj, p)),
            Err(e) => self.error = Some(e.to_string()),
        }
        self
    }

    fn compare(column: &str, op: OrmResult<Op>, operand: OrmResult<Operand>) -> OrmResult<Predicate> {
        Ok(Predicate::Compare {
            column: Ident::parse(column)?,
            op: op?,
            operand: operand?,
        })
    }

    /// `column = value`
    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        let p = Self::compare(column, Ok(Op::Eq), Ok(Operand::Value(value.into())));
        self.add(Conj::And, p)
    }

    /// `OR column = value`
    pub fn or_eq(self, column: &str, value: impl Into<Value>) -> Self {
        let p = Self::compare(column, Ok(Op::Eq), Ok(Operand::Value(value.into())));
        self.add(Conj::Or, p)
    }

    /// `column <op> value`, with the operator given as text.
    pub fn op(self, column: &str, op: &str, value: impl Into<Value>) -> Self {
        let p = Self::compare(column, Op::parse(op), Ok(Operand::Value(value.into())));
        self.add(Conj::And, p)
    }

    pub fn or_op(self, column: &str, op: &str, value: impl Into<Value>) -> Self {
        let p = Self::compare(column, Op::parse(op), Ok(Operand::Value(value.into())));
        self.add(Conj::Or, p)
    }

    pub fn cmp(self, column: &str, op: Op, value: impl Into<Value>) -> Self {
        let p = Self::compare(column, Ok(op), Ok(Operand::Value(value.into())));
        self.add(Conj::And, p)
    }

    /// `left <op> right` where both sides are columns.
    pub fn column(self, left: &str, op: &str, right: &str) -> Self {
        let p = Self::compare(left, Op::parse(op), Ident::parse(right).map(Operand::Column));
        self.add(Conj::And, p)
    }

    pub fn or_column(self, left: &str, op: &str, right: &str) -> Self {
        let p = Self::compare(left, Op::parse(op), Ident::parse(right).map(Operand::Column));
        self.add(Conj::Or, p)
    }

    pub fn null(self, column: &str) -> Self {
        let p = Ident::parse(column).map(|column| Predicate::Null {
            column,
            negated: false,
        });
        self.add(Conj::And, p)
    }

    pub fn or_null(self, column: &str) -> Self {
        let p = Ident::parse(column).map(|column| Predicate::Null {
            column,
            negated: false,
        });
        self.add(Conj::Or, p)
    }

    pub fn not_null(self, column: &str) -> Self {
        let p = Ident::parse(column).map(|column| Predicate::Null {
            column,
            negated: true,
        });
        self.add(Conj::And, p)
    }

    /// `column IN (...)`. An empty list matches nothing.
    pub fn is_in<V: Into<Value>>(self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        let p = Ident::parse(column).map(|column| Predicate::In {
            column,
            values,
            negated: false,
        });
        self.add(Conj::And, p)
    }

    /// `column NOT IN (...)`. An empty list matches everything.
    pub fn not_in<V: Into<Value>>(self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        let p = Ident::parse(column).map(|column| Predicate::In {
            column,
            values,
            negated: true,
        });
        self.add(Conj::And, p)
    }

    /// `column IN (sub-query)`.
    pub fn in_sub(self, column: &str, sub: &SubQuery) -> Self {
        let p = match &sub.error {
            Some(e) => Err(OrmError::builder(format!("sub-query: {e}"))),
            None => Ident::parse(column).map(|column| Predicate::InSub {
                column,
                query: sub.fragment.clone(),
                negated: false,
            }),
        };
        self.add(Conj::And, p)
    }

    /// Raw predicate with `?` placeholders.
    pub fn raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        let p = Fragment::template(sql, bindings).map(Predicate::Raw);
        self.add(Conj::And, p)
    }

    pub fn or_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        let p = Fragment::template(sql, bindings).map(Predicate::Raw);
        self.add(Conj::Or, p)
    }

    /// Parenthesised AND group.
    pub fn group(self, build: impl FnOnce(Conditions) -> Conditions) -> Self {
        let p = Self::nested(build);
        self.add(Conj::And, p)
    }

    /// Parenthesised group joined with OR.
    pub fn or_group(self, build: impl FnOnce(Conditions) -> Conditions) -> Self {
        let p = Self::nested(build);
        self.add(Conj::Or, p)
    }

    fn nested(build: impl FnOnce(Conditions) -> Conditions) -> OrmResult<Predicate> {
        let mut inner = build(Conditions::new());
        if let Some(e) = inner.take_error() {
            return Err(OrmError::Builder(e));
        }
        if inner.is_empty() {
            return Err(OrmError::builder("empty condition group"));
        }
        Ok(Predicate::Group(inner))
    }

    pub(crate) fn write(&self, out: &mut Fragment) {
        for (i, (conj, predicate)) in self.items.iter().enumerate() {
            if i > 0 {
                out.push(match conj {
                    Conj::And => " AND ",
                    Conj::Or => " OR ",
                });
            }
            predicate.write(out);
        }
    }
}

// ==================== Joins, ordering, CTEs ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

impl JoinKind {
    fn as_sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: Ident,
    pub on: Conditions,
}

impl Join {
    pub(crate) fn write(&self, out: &mut Fragment) {
        out.push(" ")
            .push(self.kind.as_sql())
            .push(" ")
            .push_ident(&self.table)
            .push(" ON ");
        self.on.write(out);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderBy {
    Asc(Ident),
    Desc(Ident),
    Raw(String),
}

impl OrderBy {
    pub(crate) fn write(&self, out: &mut Fragment) {
        match self {
            OrderBy::Asc(c) => {
                out.push_ident(c).push(" ASC");
            }
            OrderBy::Desc(c) => {
                out.push_ident(c).push(" DESC");
            }
            OrderBy::Raw(s) => {
                out.push(s);
            }
        }
    }
}

/// A named temporary relation attached as `WITH name(cols) AS (body)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CteDef {
    pub name: Ident,
    pub recursive: bool,
    pub columns: Vec<Ident>,
    pub body: Fragment,
}

impl CteDef {
    pub(crate) fn write(&self, out: &mut Fragment) {
        out.push_ident(&self.name);
        if !self.columns.is_empty() {
            out.push("(");
            for (i, c) in self.columns.iter().enumerate() {
                if i > 0 {
                    out.push(", ");
                }
                out.push_ident(c);
            }
            out.push(")");
        }
        out.push(" AS (").push_fragment(&self.body).push(")");
    }
}
