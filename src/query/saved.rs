//! Saved queries.
//!
//! A query is stored as access paths (root plus steps) rather than as
//! compiled Cypher, so it survives schema changes that keep its names
//! valid. Restoring replays every path against the current hierarchy and
//! fails with the same schema or subset errors a fresh build would.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::aggregate::{Aggregate, AggregateFunction};
use super::attribute::Attribute;
use super::builder::Query;
use super::clause::{ClauseElement, CompareOp, Operand};
use super::node::{PauseDirection, QueryNode, Root, Step};
use crate::hierarchy::Hierarchy;
use crate::model::Value;
use crate::{Error, Result};

pub const FORMAT_VERSION: u32 = 1;

/// A node as its access path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub root: Root,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// An attribute as its node's path plus the resolved name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub node: NodeSpec,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperandSpec {
    Value { value: Value },
    Attribute { attribute: AttributeSpec },
}

/// Filters in builder form: restoring calls the same builders, so alignment,
/// subset and pause clauses come back exactly as they were derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClauseSpec {
    Compare { left: AttributeSpec, op: CompareOp, right: OperandSpec },
    In { attribute: AttributeSpec, values: Vec<Value>, negated: bool },
    Regex { attribute: AttributeSpec, pattern: String },
    Null { attribute: AttributeSpec, negated: bool },
    And { clauses: Vec<ClauseSpec> },
    Or { clauses: Vec<ClauseSpec> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub function: AggregateFunction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<AttributeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub attribute: AttributeSpec,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedQuery {
    pub format_version: u32,
    pub corpus: String,
    pub hierarchy_version: u64,
    pub saved_at: DateTime<Utc>,
    pub to_find: NodeSpec,
    #[serde(default)]
    pub filters: Vec<ClauseSpec>,
    #[serde(default)]
    pub columns: Vec<AttributeSpec>,
    #[serde(default)]
    pub order_by: Vec<OrderSpec>,
    #[serde(default)]
    pub group_by: Vec<AttributeSpec>,
    #[serde(default)]
    pub aggregates: Vec<AggregateSpec>,
    #[serde(default)]
    pub preload: Vec<NodeSpec>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

// ============================================================================
// Capture
// ============================================================================

fn node_spec(node: &QueryNode) -> NodeSpec {
    NodeSpec { root: node.root().clone(), steps: node.steps().to_vec() }
}

fn attr_spec(attr: &Attribute) -> AttributeSpec {
    AttributeSpec {
        node: node_spec(attr.node()),
        name: attr.name().to_string(),
        alias: attr.alias().map(str::to_string),
    }
}

fn named(node: &QueryNode, name: &str) -> AttributeSpec {
    AttributeSpec { node: node_spec(node), name: name.to_string(), alias: None }
}

fn clause_spec(clause: &ClauseElement) -> ClauseSpec {
    let value = |v: Value| OperandSpec::Value { value: v };
    match clause {
        ClauseElement::Compare { left, op, right } => ClauseSpec::Compare {
            left: attr_spec(left),
            op: *op,
            right: match right {
                Operand::Value(v) => value(v.clone()),
                Operand::Attribute(a) => OperandSpec::Attribute { attribute: attr_spec(a) },
            },
        },
        ClauseElement::In { attr, values, negated } => ClauseSpec::In {
            attribute: attr_spec(attr),
            values: values.clone(),
            negated: *negated,
        },
        ClauseElement::Regex { attr, pattern } => {
            ClauseSpec::Regex { attribute: attr_spec(attr), pattern: pattern.clone() }
        }
        ClauseElement::Null { attr, negated } => ClauseSpec::Null { attribute: attr_spec(attr), negated: *negated },
        ClauseElement::Subset { node, label, negated, .. } => ClauseSpec::Compare {
            left: named(node, "subset"),
            op: if *negated { CompareOp::Neq } else { CompareOp::Eq },
            right: value(Value::from(label.as_str())),
        },
        ClauseElement::Aligned { lower, higher, side, aligned } => {
            let name = match side {
                super::clause::Side::Left => "begin",
                super::clause::Side::Right => "end",
            };
            ClauseSpec::Compare {
                left: named(lower, name),
                op: if *aligned { CompareOp::Eq } else { CompareOp::Neq },
                right: OperandSpec::Attribute { attribute: named(higher, name) },
            }
        }
        ClauseElement::Pause { node, direction, present } => {
            let name = match direction {
                PauseDirection::Previous => "follows_pause",
                PauseDirection::Following => "precedes_pause",
            };
            ClauseSpec::Compare { left: named(node, name), op: CompareOp::Eq, right: value(Value::Bool(*present)) }
        }
        ClauseElement::And(cs) => ClauseSpec::And { clauses: cs.iter().map(clause_spec).collect() },
        ClauseElement::Or(cs) => ClauseSpec::Or { clauses: cs.iter().map(clause_spec).collect() },
    }
}

// ============================================================================
// Restore
// ============================================================================

struct Resolver {
    hierarchy: Arc<Hierarchy>,
}

impl Resolver {
    fn node(&self, spec: &NodeSpec) -> Result<QueryNode> {
        QueryNode::from_path(self.hierarchy.clone(), &spec.root, &spec.steps)
    }

    fn attr(&self, spec: &AttributeSpec) -> Result<Attribute> {
        let node = self.node(&spec.node)?;
        let attr = node.resolve(&spec.name)?.into_attribute().ok_or_else(|| {
            Error::QueryCompositionError(format!(
                "'{}' on {} names a node, not an attribute",
                spec.name,
                node.display_path()
            ))
        })?;
        Ok(match &spec.alias {
            Some(a) => attr.column_name(a),
            None => attr,
        })
    }

    fn clause(&self, spec: &ClauseSpec) -> Result<ClauseElement> {
        match spec {
            ClauseSpec::Compare { left, op, right } => {
                let left = self.attr(left)?;
                let right: Operand = match right {
                    OperandSpec::Value { value } => Operand::Value(value.clone()),
                    OperandSpec::Attribute { attribute } => Operand::Attribute(self.attr(attribute)?),
                };
                match op {
                    CompareOp::Eq => left.equals(right),
                    CompareOp::Neq => left.not_equals(right),
                    CompareOp::Lt => left.less_than(right),
                    CompareOp::Lte => left.less_or_equal(right),
                    CompareOp::Gt => left.greater_than(right),
                    CompareOp::Gte => left.greater_or_equal(right),
                }
            }
            ClauseSpec::In { attribute, values, negated } => {
                let attr = self.attr(attribute)?;
                if *negated {
                    attr.not_in_list(values.iter().cloned())
                } else {
                    attr.in_list(values.iter().cloned())
                }
            }
            ClauseSpec::Regex { attribute, pattern } => self.attr(attribute)?.regex(pattern),
            ClauseSpec::Null { attribute, negated } => {
                let attr = self.attr(attribute)?;
                if *negated { attr.is_not_null() } else { attr.is_null() }
            }
            ClauseSpec::And { clauses } => Ok(ClauseElement::And(
                clauses.iter().map(|c| self.clause(c)).collect::<Result<_>>()?,
            )),
            ClauseSpec::Or { clauses } => Ok(ClauseElement::Or(
                clauses.iter().map(|c| self.clause(c)).collect::<Result<_>>()?,
            )),
        }
    }
}

impl SavedQuery {
    pub fn capture(query: &Query, aggregates: &[Aggregate]) -> Self {
        let h = query.to_find.hierarchy();
        Self {
            format_version: FORMAT_VERSION,
            corpus: h.corpus_name.clone(),
            hierarchy_version: h.version,
            saved_at: Utc::now(),
            to_find: node_spec(&query.to_find),
            filters: query.filters.iter().map(clause_spec).collect(),
            columns: query.columns.iter().map(attr_spec).collect(),
            order_by: query
                .order_by
                .iter()
                .map(|(a, d)| OrderSpec { attribute: attr_spec(a), descending: *d })
                .collect(),
            group_by: query.group_by.iter().map(attr_spec).collect(),
            aggregates: aggregates
                .iter()
                .map(|a| AggregateSpec {
                    function: a.function,
                    attribute: a.attribute.as_ref().map(attr_spec),
                    alias: a.alias.clone(),
                })
                .collect(),
            preload: query.preload.iter().map(node_spec).collect(),
            limit: query.limit,
            offset: query.offset,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let saved: SavedQuery = serde_json::from_str(json)?;
        if saved.format_version != FORMAT_VERSION {
            return Err(Error::ParseError {
                source_name: "saved query".to_string(),
                message: format!(
                    "unsupported format version {} (expected {FORMAT_VERSION})",
                    saved.format_version
                ),
            });
        }
        Ok(saved)
    }

    /// Rebuild the query and its aggregates against `hierarchy`.
    pub fn restore(&self, hierarchy: Arc<Hierarchy>) -> Result<(Query, Vec<Aggregate>)> {
        if hierarchy.corpus_name != self.corpus {
            return Err(Error::QueryCompositionError(format!(
                "query was saved for corpus '{}', not '{}'",
                self.corpus, hierarchy.corpus_name
            )));
        }
        if hierarchy.version != self.hierarchy_version {
            tracing::debug!(
                saved = self.hierarchy_version,
                current = hierarchy.version,
                "restoring saved query against a newer hierarchy"
            );
        }
        let r = Resolver { hierarchy };
        let mut query = Query::new(r.node(&self.to_find)?);
        for f in &self.filters {
            query = query.filter(r.clause(f)?);
        }
        for c in &self.columns {
            query = query.column(r.attr(c)?);
        }
        for o in &self.order_by {
            query = query.order_by(r.attr(&o.attribute)?, o.descending);
        }
        for g in &self.group_by {
            query = query.group_by(r.attr(g)?);
        }
        for p in &self.preload {
            query = query.preload(r.node(p)?);
        }
        query.limit = self.limit;
        query.offset = self.offset;

        let aggregates = self
            .aggregates
            .iter()
            .map(|a| {
                Ok(Aggregate {
                    function: a.function,
                    attribute: a.attribute.as_ref().map(|s| r.attr(s)).transpose()?,
                    alias: a.alias.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((query, aggregates))
    }
}
