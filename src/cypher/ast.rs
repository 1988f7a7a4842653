//! Cypher AST (output side)
//!
//! The compiler assembles statements from these types and renders them with
//! `Display`. Patterns are structured so node and relationship fragments can
//! be deduplicated and inspected in tests; expressions are pre-rendered text.

use std::fmt;

use super::ident;

/// A complete statement: clauses rendered one per line.
#[derive(Debug, Clone, Default)]
pub struct CypherQuery {
    pub clauses: Vec<Clause>,
}

#[derive(Debug, Clone)]
pub enum Clause {
    Match(MatchClause),
    With(WithClause),
    Return(ReturnClause),
    Set(Vec<SetItem>),
    Remove(Vec<RemoveItem>),
    Delete { variables: Vec<String>, detach: bool },
}

/// MATCH / OPTIONAL MATCH with comma-separated patterns and optional WHERE.
#[derive(Debug, Clone)]
pub struct MatchClause {
    pub optional: bool,
    pub patterns: Vec<Pattern>,
    pub where_clause: Option<String>,
}

/// A pattern: (a:phone)-[:contained_by]->(b:word), optionally bound to a path variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pub path_alias: Option<String>,
    pub elements: Vec<PatternElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternElement {
    Node(NodePattern),
    Relationship(RelPattern),
}

/// Node pattern: (alias:Label1:Label2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePattern {
    pub alias: Option<String>,
    pub labels: Vec<String>,
}

/// Relationship pattern: -[:TYPE*min..max]->
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelPattern {
    pub rel_type: String,
    pub direction: PatternDirection,
    pub var_length: Option<VarLength>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternDirection {
    /// ->
    Right,
    /// <-
    Left,
}

/// Variable-length path specification. `Exact(1)` renders as a plain hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarLength {
    Exact(usize),
    Range { min: usize, max: Option<usize> },
}

#[derive(Debug, Clone)]
pub struct ReturnItem {
    pub expr: String,
    pub alias: Option<String>,
}

/// WITH clause (pipeline boundary), with optional ORDER BY and WHERE.
#[derive(Debug, Clone, Default)]
pub struct WithClause {
    pub items: Vec<ReturnItem>,
    pub order_by: Vec<OrderExpr>,
    pub where_clause: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReturnClause {
    pub distinct: bool,
    pub items: Vec<ReturnItem>,
    pub order_by: Vec<OrderExpr>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct OrderExpr {
    pub expr: String,
    pub ascending: bool,
}

#[derive(Debug, Clone)]
pub enum SetItem {
    /// SET n.prop = expr
    Property { variable: String, key: String, value: String },
    /// SET n:Label
    Label { variable: String, label: String },
}

#[derive(Debug, Clone)]
pub enum RemoveItem {
    Property { variable: String, key: String },
    Label { variable: String, label: String },
}

// ============================================================================
// Builders
// ============================================================================

impl NodePattern {
    pub fn new(alias: Option<&str>, labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            alias: alias.map(str::to_string),
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// A bare reference to an already bound variable.
    pub fn var(alias: &str) -> Self {
        Self { alias: Some(alias.to_string()), labels: Vec::new() }
    }
}

impl RelPattern {
    pub fn new(rel_type: &str, direction: PatternDirection, hops: VarLength) -> Self {
        Self { rel_type: rel_type.to_string(), direction, var_length: Some(hops) }
    }
}

impl Pattern {
    pub fn start(node: NodePattern) -> Self {
        Self { path_alias: None, elements: vec![PatternElement::Node(node)] }
    }

    pub fn named(mut self, path_alias: &str) -> Self {
        self.path_alias = Some(path_alias.to_string());
        self
    }

    /// Append `-[:rel]->(node)`.
    pub fn out(self, rel_type: &str, hops: VarLength, node: NodePattern) -> Self {
        self.hop(RelPattern::new(rel_type, PatternDirection::Right, hops), node)
    }

    /// Append `<-[:rel]-(node)`.
    pub fn inc(self, rel_type: &str, hops: VarLength, node: NodePattern) -> Self {
        self.hop(RelPattern::new(rel_type, PatternDirection::Left, hops), node)
    }

    fn hop(mut self, rel: RelPattern, node: NodePattern) -> Self {
        self.elements.push(PatternElement::Relationship(rel));
        self.elements.push(PatternElement::Node(node));
        self
    }
}

impl ReturnItem {
    pub fn new(expr: impl Into<String>, alias: Option<&str>) -> Self {
        Self { expr: expr.into(), alias: alias.map(str::to_string) }
    }

    /// `expr AS alias`
    pub fn aliased(expr: impl Into<String>, alias: &str) -> Self {
        Self::new(expr, Some(alias))
    }

    /// Carry a variable through a WITH unchanged.
    pub fn var(alias: &str) -> Self {
        Self::new(alias, None)
    }
}

impl OrderExpr {
    pub fn asc(expr: impl Into<String>) -> Self {
        Self { expr: expr.into(), ascending: true }
    }
}

// ============================================================================
// Rendering
// ============================================================================

impl fmt::Display for CypherQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 { writeln!(f)?; }
            write!(f, "{clause}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Match(m) => write!(f, "{m}"),
            Clause::With(w) => write!(f, "{w}"),
            Clause::Return(r) => write!(f, "{r}"),
            Clause::Set(items) => {
                write!(f, "SET ")?;
                write_joined(f, items, ", ")
            }
            Clause::Remove(items) => {
                write!(f, "REMOVE ")?;
                write_joined(f, items, ", ")
            }
            Clause::Delete { variables, detach } => {
                if *detach { write!(f, "DETACH ")?; }
                write!(f, "DELETE {}", variables.join(", "))
            }
        }
    }
}

impl fmt::Display for MatchClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.optional { write!(f, "OPTIONAL ")?; }
        write!(f, "MATCH ")?;
        write_joined(f, &self.patterns, ",\n      ")?;
        if let Some(w) = &self.where_clause {
            write!(f, "\nWHERE {w}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path_alias {
            write!(f, "{p} = ")?;
        }
        for el in &self.elements {
            match el {
                PatternElement::Node(n) => write!(f, "{n}")?,
                PatternElement::Relationship(r) => write!(f, "{r}")?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for NodePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        if let Some(a) = &self.alias {
            write!(f, "{a}")?;
        }
        for l in &self.labels {
            write!(f, ":{}", ident(l))?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for RelPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (open, close) = match self.direction {
            PatternDirection::Right => ("-", "->"),
            PatternDirection::Left => ("<-", "-"),
        };
        write!(f, "{open}[:{}", ident(&self.rel_type))?;
        match self.var_length {
            None | Some(VarLength::Exact(1)) => {}
            Some(VarLength::Exact(n)) => write!(f, "*{n}")?,
            Some(VarLength::Range { min, max: Some(max) }) => write!(f, "*{min}..{max}")?,
            Some(VarLength::Range { min, max: None }) => write!(f, "*{min}..")?,
        }
        write!(f, "]{close}")
    }
}

impl fmt::Display for ReturnItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(a) if *a != self.expr => write!(f, "{} AS {}", self.expr, ident(a)),
            _ => write!(f, "{}", self.expr),
        }
    }
}

impl fmt::Display for OrderExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if !self.ascending { write!(f, " DESC")?; }
        Ok(())
    }
}

impl fmt::Display for WithClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WITH ")?;
        write_joined(f, &self.items, ", ")?;
        if !self.order_by.is_empty() {
            write!(f, "\nORDER BY ")?;
            write_joined(f, &self.order_by, ", ")?;
        }
        if let Some(w) = &self.where_clause {
            write!(f, "\nWHERE {w}")?;
        }
        Ok(())
    }
}

impl fmt::Display for ReturnClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RETURN ")?;
        if self.distinct { write!(f, "DISTINCT ")?; }
        write_joined(f, &self.items, ", ")?;
        if !self.order_by.is_empty() {
            write!(f, "\nORDER BY ")?;
            write_joined(f, &self.order_by, ", ")?;
        }
        if let Some(skip) = self.skip {
            write!(f, "\nSKIP {skip}")?;
        }
        if let Some(limit) = self.limit {
            write!(f, "\nLIMIT {limit}")?;
        }
        Ok(())
    }
}

impl fmt::Display for SetItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetItem::Property { variable, key, value } => write!(f, "{variable}.{} = {value}", ident(key)),
            SetItem::Label { variable, label } => write!(f, "{variable}:{}", ident(label)),
        }
    }
}

impl fmt::Display for RemoveItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoveItem::Property { variable, key } => write!(f, "{variable}.{}", ident(key)),
            RemoveItem::Label { variable, label } => write!(f, "{variable}:{}", ident(label)),
        }
    }
}

fn write_joined<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T], sep: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 { write!(f, "{sep}")?; }
        write!(f, "{item}")?;
    }
    Ok(())
}
