//! Filter clauses built from attribute comparisons.

use serde::{Deserialize, Serialize};

use super::attribute::{Attribute, AttributeKind, Level};
use super::node::{subset_level, NodeKind, PauseDirection, QueryNode};
use crate::model::Value;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Neq => "<>",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Value),
    Attribute(Attribute),
}

macro_rules! operand_from_value {
    ($($t:ty),*) => {
        $(impl From<$t> for Operand {
            fn from(v: $t) -> Self { Operand::Value(Value::from(v)) }
        })*
    };
}

operand_from_value!(bool, i32, i64, f64, String, &str, &String);

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Operand::Value(v)
    }
}

impl From<Attribute> for Operand {
    fn from(a: Attribute) -> Self {
        Operand::Attribute(a)
    }
}

impl From<&Attribute> for Operand {
    fn from(a: &Attribute) -> Self {
        Operand::Attribute(a.clone())
    }
}

/// Which boundary two annotations share when aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Shared begin.
    Left,
    /// Shared end.
    Right,
}

/// A boolean predicate over query nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum ClauseElement {
    Compare { left: Attribute, op: CompareOp, right: Operand },
    In { attr: Attribute, values: Vec<Value>, negated: bool },
    Regex { attr: Attribute, pattern: String },
    Null { attr: Attribute, negated: bool },
    Subset { node: QueryNode, label: String, level: Level, negated: bool },
    /// `lower` starts (Left) or ends (Right) together with its container `higher`.
    Aligned { lower: QueryNode, higher: QueryNode, side: Side, aligned: bool },
    /// A pause directly before (Previous) or after (Following) the token.
    Pause { node: QueryNode, direction: PauseDirection, present: bool },
    And(Vec<ClauseElement>),
    Or(Vec<ClauseElement>),
}

pub fn and_(clauses: Vec<ClauseElement>) -> ClauseElement {
    ClauseElement::And(clauses)
}

pub fn or_(clauses: Vec<ClauseElement>) -> ClauseElement {
    ClauseElement::Or(clauses)
}

// ============================================================================
// Builders
// ============================================================================

impl Attribute {
    pub fn equals(&self, rhs: impl Into<Operand>) -> Result<ClauseElement> {
        self.compare(CompareOp::Eq, rhs.into())
    }

    pub fn not_equals(&self, rhs: impl Into<Operand>) -> Result<ClauseElement> {
        self.compare(CompareOp::Neq, rhs.into())
    }

    pub fn less_than(&self, rhs: impl Into<Operand>) -> Result<ClauseElement> {
        self.compare(CompareOp::Lt, rhs.into())
    }

    pub fn less_or_equal(&self, rhs: impl Into<Operand>) -> Result<ClauseElement> {
        self.compare(CompareOp::Lte, rhs.into())
    }

    pub fn greater_than(&self, rhs: impl Into<Operand>) -> Result<ClauseElement> {
        self.compare(CompareOp::Gt, rhs.into())
    }

    pub fn greater_or_equal(&self, rhs: impl Into<Operand>) -> Result<ClauseElement> {
        self.compare(CompareOp::Gte, rhs.into())
    }

    pub fn in_list<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>) -> Result<ClauseElement> {
        self.membership(values, false)
    }

    pub fn not_in_list<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>) -> Result<ClauseElement> {
        self.membership(values, true)
    }

    pub fn regex(&self, pattern: &str) -> Result<ClauseElement> {
        self.check_filterable("a regular expression")?;
        Ok(ClauseElement::Regex { attr: self.clone(), pattern: pattern.to_string() })
    }

    pub fn is_null(&self) -> Result<ClauseElement> {
        self.check_filterable("a null check")?;
        Ok(ClauseElement::Null { attr: self.clone(), negated: false })
    }

    pub fn is_not_null(&self) -> Result<ClauseElement> {
        self.check_filterable("a null check")?;
        Ok(ClauseElement::Null { attr: self.clone(), negated: true })
    }

    fn membership<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>, negated: bool) -> Result<ClauseElement> {
        self.check_filterable("a list membership test")?;
        Ok(ClauseElement::In {
            attr: self.clone(),
            values: values.into_iter().map(Into::into).collect(),
            negated,
        })
    }

    /// Attributes that only support equality or are computed outside the graph.
    fn check_filterable(&self, what: &str) -> Result<()> {
        if self.is_acoustic() {
            return Err(Error::QueryCompositionError(format!(
                "{self} is an acoustic measure and cannot be used in {what}"
            )));
        }
        if matches!(self.kind(), AttributeKind::Subset | AttributeKind::PauseFlag { .. }) {
            return Err(Error::QueryCompositionError(format!("{self} only supports == and != comparisons")));
        }
        Ok(())
    }

    fn compare(&self, op: CompareOp, rhs: Operand) -> Result<ClauseElement> {
        if let Operand::Attribute(r) = &rhs {
            r.check_filterable("a comparison")?;
        }
        match self.kind() {
            AttributeKind::Subset => return self.subset_clause(op, rhs),
            AttributeKind::PauseFlag { direction } => return self.pause_clause(*direction, op, rhs),
            AttributeKind::Property { name, .. } if (name == "begin" || name == "end") => {
                if let Some(clause) = self.alignment(name, op, &rhs) {
                    return Ok(clause);
                }
            }
            _ => {}
        }
        self.check_filterable("a comparison")?;
        Ok(ClauseElement::Compare { left: self.clone(), op, right: rhs })
    }

    fn equality_sense(&self, op: CompareOp) -> Result<bool> {
        match op {
            CompareOp::Eq => Ok(true),
            CompareOp::Neq => Ok(false),
            _ => Err(Error::QueryCompositionError(format!("{self} only supports == and != comparisons"))),
        }
    }

    fn subset_clause(&self, op: CompareOp, rhs: Operand) -> Result<ClauseElement> {
        let positive = self.equality_sense(op)?;
        let label = match rhs {
            Operand::Value(Value::String(s)) => s,
            other => {
                return Err(Error::QueryCompositionError(format!(
                    "{self} must be compared with a subset label, got {other:?}"
                )));
            }
        };
        let node = self.node().clone();
        let h = node.hierarchy().clone();
        let level = match node.kind() {
            NodeKind::Lexicon { type_name } => subset_level(&h, type_name, &label, true)?,
            NodeKind::Annotation { .. }
            | NodeKind::Precedence { .. }
            | NodeKind::Hierarchical { .. }
            | NodeKind::SubPath { .. }
            | NodeKind::PausePath { .. } => subset_level(&h, node.type_name().unwrap_or_default(), &label, false)?,
            _ => {
                return Err(Error::QueryCompositionError(format!("{} has no subsets", node.display_path())));
            }
        };
        Ok(ClauseElement::Subset { node, label, level, negated: !positive })
    }

    fn pause_clause(&self, direction: PauseDirection, op: CompareOp, rhs: Operand) -> Result<ClauseElement> {
        let positive = self.equality_sense(op)?;
        let present = match rhs {
            Operand::Value(Value::Bool(b)) => b,
            other => {
                return Err(Error::QueryCompositionError(format!(
                    "{self} must be compared with a boolean, got {other:?}"
                )));
            }
        };
        Ok(ClauseElement::Pause {
            node: self.node().clone(),
            direction,
            present: present == positive,
        })
    }

    /// `phone.begin == phone.word.begin` and the like become alignment tests
    /// when the two types nest; anything else stays a value comparison.
    fn alignment(&self, name: &str, op: CompareOp, rhs: &Operand) -> Option<ClauseElement> {
        let aligned = match op {
            CompareOp::Eq => true,
            CompareOp::Neq => false,
            _ => return None,
        };
        let Operand::Attribute(other) = rhs else { return None };
        match other.kind() {
            AttributeKind::Property { name: other_name, .. } if other_name == name => {}
            _ => return None,
        }
        let (a, b) = (self.node(), other.node());
        if !a.is_token() || !b.is_token() {
            return None;
        }
        let (ta, tb) = (a.type_name()?, b.type_name()?);
        let h = a.hierarchy();
        let (lower, higher) = if h.contains(tb, ta) {
            (a.clone(), b.clone())
        } else if h.contains(ta, tb) {
            (b.clone(), a.clone())
        } else {
            return None;
        };
        let side = if name == "begin" { Side::Left } else { Side::Right };
        Some(ClauseElement::Aligned { lower, higher, side, aligned })
    }
}

// ============================================================================
// Inspection
// ============================================================================

impl ClauseElement {
    /// Attributes referenced anywhere in the clause.
    pub fn attributes(&self) -> Vec<&Attribute> {
        let mut out = Vec::new();
        self.collect_attributes(&mut out);
        out
    }

    fn collect_attributes<'a>(&'a self, out: &mut Vec<&'a Attribute>) {
        match self {
            ClauseElement::Compare { left, right, .. } => {
                out.push(left);
                if let Operand::Attribute(r) = right {
                    out.push(r);
                }
            }
            ClauseElement::In { attr, .. } | ClauseElement::Regex { attr, .. } | ClauseElement::Null { attr, .. } => {
                out.push(attr)
            }
            ClauseElement::Subset { .. } | ClauseElement::Aligned { .. } | ClauseElement::Pause { .. } => {}
            ClauseElement::And(items) | ClauseElement::Or(items) => {
                for item in items {
                    item.collect_attributes(out);
                }
            }
        }
    }

    /// Nodes the clause reads from.
    pub fn nodes(&self) -> Vec<QueryNode> {
        let mut out = Vec::new();
        self.collect_nodes(&mut out);
        out
    }

    fn collect_nodes(&self, out: &mut Vec<QueryNode>) {
        match self {
            ClauseElement::Subset { node, .. } | ClauseElement::Pause { node, .. } => out.push(node.clone()),
            ClauseElement::Aligned { lower, higher, .. } => {
                out.push(lower.clone());
                out.push(higher.clone());
            }
            ClauseElement::And(items) | ClauseElement::Or(items) => {
                for item in items {
                    item.collect_nodes(out);
                }
            }
            _ => out.extend(self.attributes().into_iter().map(|a| a.node().clone())),
        }
    }

    /// True if evaluating the clause needs a type (lexicon) node joined.
    pub fn is_type_level(&self) -> bool {
        match self {
            ClauseElement::Subset { level, .. } => *level == Level::Type,
            ClauseElement::And(items) | ClauseElement::Or(items) => items.iter().any(|c| c.is_type_level()),
            _ => self.attributes().iter().any(|a| a.is_type_level()),
        }
    }

    /// Type-level subset tests and attributes grouped per node.
    pub(crate) fn type_level_nodes(&self) -> Vec<QueryNode> {
        let mut out = Vec::new();
        self.collect_type_level(&mut out);
        out
    }

    fn collect_type_level(&self, out: &mut Vec<QueryNode>) {
        match self {
            ClauseElement::Subset { node, level: Level::Type, .. } => out.push(node.clone()),
            ClauseElement::And(items) | ClauseElement::Or(items) => {
                for item in items {
                    item.collect_type_level(out);
                }
            }
            _ => out.extend(
                self.attributes()
                    .into_iter()
                    .filter(|a| a.is_type_level())
                    .map(|a| a.node().clone()),
            ),
        }
    }
}
