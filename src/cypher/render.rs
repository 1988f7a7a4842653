//! Expression rendering for attributes and clauses.

use crate::query::attribute::{Attribute, AttributeKind, Level};
use crate::query::clause::{ClauseElement, Operand, Side};
use crate::query::node::{NodeKey, NodeKind, PauseDirection, QueryNode};
use crate::{Error, Result};

use super::params::ParamSink;
use super::{ident, prop};

/// Rendering context: inside a collection stage, member-level attributes of
/// that collection refer to the per-member variable.
#[derive(Clone, Copy)]
pub(crate) struct Ctx<'a> {
    pub member_of: Option<&'a NodeKey>,
}

impl<'a> Ctx<'a> {
    pub fn top() -> Self {
        Self { member_of: None }
    }

    pub fn stage(collection: &'a QueryNode) -> Self {
        Self { member_of: Some(collection.key()) }
    }

    fn is_member(&self, collection: &QueryNode) -> bool {
        self.member_of == Some(collection.key())
    }
}

/// `hops` for a relationship: `*d` unless a single hop.
pub(crate) fn hops(depth: usize) -> String {
    if depth == 1 { String::new() } else { format!("*{depth}") }
}

/// Cypher expression reading `attr`.
pub(crate) fn attribute(attr: &Attribute, ctx: Ctx<'_>) -> Result<String> {
    let node = attr.node();
    match node.kind() {
        NodeKind::Annotation { .. } | NodeKind::Precedence { .. } | NodeKind::Hierarchical { .. } => {
            token_attribute(attr, node)
        }
        NodeKind::Lexicon { .. } | NodeKind::Speaker { .. } | NodeKind::Discourse { .. } => match attr.kind() {
            AttributeKind::Property { name, .. } => Ok(prop(node.alias(), name)),
            _ => Err(not_renderable(attr)),
        },
        NodeKind::SubPath { .. } | NodeKind::SubAnnotation { .. } | NodeKind::PausePath { .. } => {
            collection_attribute(attr, node, ctx)
        }
        NodeKind::Positional { collection, index } => {
            let coll = collection.alias();
            match attr.kind() {
                AttributeKind::Property { name, level: Level::Token } => Ok(prop(&format!("{coll}[{index}]"), name)),
                AttributeKind::Property { name, level: Level::Type } => {
                    Ok(prop(&format!("{}[{index}]", collection.types_alias()), name))
                }
                AttributeKind::Duration => Ok(format!("({coll}[{index}].end - {coll}[{index}].begin)")),
                _ => Err(not_renderable(attr)),
            }
        }
        NodeKind::Acoustic { .. } => Err(Error::QueryCompositionError(format!(
            "{attr} is computed from acoustic tracks after the query runs"
        ))),
    }
}

fn token_attribute(attr: &Attribute, node: &QueryNode) -> Result<String> {
    let a = node.alias();
    match attr.kind() {
        AttributeKind::Property { name, level: Level::Token } => Ok(prop(a, name)),
        AttributeKind::Property { name, level: Level::Type } => Ok(prop(&node.type_alias(), name)),
        AttributeKind::Duration => Ok(format!("({a}.end - {a}.begin)")),
        AttributeKind::PauseFlag { direction: PauseDirection::Following } => {
            Ok(format!("size([({a})-[:precedes_pause]->() | 1]) > 0"))
        }
        AttributeKind::PauseFlag { direction: PauseDirection::Previous } => {
            Ok(format!("size([({a})<-[:precedes_pause]-() | 1]) > 0"))
        }
        _ => Err(not_renderable(attr)),
    }
}

fn collection_attribute(attr: &Attribute, node: &QueryNode, ctx: Ctx<'_>) -> Result<String> {
    let c = node.alias();
    match attr.kind() {
        AttributeKind::Count => Ok(format!("size({c})")),
        AttributeKind::Rate => {
            let anchor = node.anchor().map(QueryNode::alias).unwrap_or_default();
            Ok(format!(
                "CASE WHEN {anchor}.end - {anchor}.begin > 0 \
                 THEN toFloat(size({c})) / ({anchor}.end - {anchor}.begin) ELSE null END"
            ))
        }
        AttributeKind::Duration => Ok(format!("CASE WHEN size({c}) = 0 THEN null ELSE {c}[-1].end - {c}[0].begin END")),
        AttributeKind::Property { name, .. } if name == "begin" => Ok(format!("{c}[0].begin")),
        AttributeKind::Property { name, .. } if name == "end" => Ok(format!("{c}[-1].end")),
        AttributeKind::MemberList { name, level } => {
            if ctx.is_member(node) {
                return member_property(node, name, *level);
            }
            match level {
                Level::Token => Ok(format!("[x IN {c} | {}]", prop("x", name))),
                Level::Type => Ok(format!("[x IN {} | {}]", node.types_alias(), prop("x", name))),
            }
        }
        _ => Err(not_renderable(attr)),
    }
}

/// A member property while the collection is being gathered.
fn member_property(collection: &QueryNode, name: &str, level: Level) -> Result<String> {
    let m = collection.member_alias();
    match (level, collection.kind()) {
        (Level::Token, _) => Ok(prop(&m, name)),
        (Level::Type, NodeKind::PausePath { .. }) => Ok(format!("head([({m})-[:is_a]->(mt) | {}])", prop("mt", name))),
        (Level::Type, _) => Ok(prop(&collection.member_type_alias(), name)),
    }
}

fn not_renderable(attr: &Attribute) -> Error {
    Error::QueryCompositionError(format!("{attr} cannot be used as a value"))
}

// ============================================================================
// Clauses
// ============================================================================

pub(crate) fn clause(c: &ClauseElement, ctx: Ctx<'_>, params: &mut ParamSink) -> Result<String> {
    match c {
        ClauseElement::Compare { left, op, right } => {
            let l = attribute(left, ctx)?;
            let r = match right {
                Operand::Value(v) => params.bind(left.name(), v.clone()),
                Operand::Attribute(a) => attribute(a, ctx)?,
            };
            Ok(format!("{l} {} {r}", op.symbol()))
        }
        ClauseElement::In { attr, values, negated } => {
            let l = attribute(attr, ctx)?;
            let p = params.bind(attr.name(), values.clone().into());
            Ok(if *negated { format!("NOT {l} IN {p}") } else { format!("{l} IN {p}") })
        }
        ClauseElement::Regex { attr, pattern } => {
            let l = attribute(attr, ctx)?;
            let p = params.bind(attr.name(), pattern.as_str().into());
            Ok(format!("{l} =~ {p}"))
        }
        ClauseElement::Null { attr, negated } => {
            let l = attribute(attr, ctx)?;
            Ok(if *negated { format!("{l} IS NOT NULL") } else { format!("{l} IS NULL") })
        }
        ClauseElement::Subset { node, label, level, negated } => {
            let test = subset_test(node, label, *level, ctx)?;
            Ok(if *negated { format!("NOT {test}") } else { test })
        }
        ClauseElement::Aligned { lower, higher, side, aligned } => alignment(lower, higher, *side, *aligned),
        ClauseElement::Pause { node, direction, present } => {
            let a = node.alias();
            let pattern = match direction {
                PauseDirection::Following => format!("({a})-[:precedes_pause]->()"),
                PauseDirection::Previous => format!("({a})<-[:precedes_pause]-()"),
            };
            Ok(if *present { pattern } else { format!("NOT {pattern}") })
        }
        ClauseElement::And(items) => junction(items, " AND ", "true", ctx, params),
        ClauseElement::Or(items) => junction(items, " OR ", "false", ctx, params),
    }
}

fn junction(
    items: &[ClauseElement],
    sep: &str,
    empty: &str,
    ctx: Ctx<'_>,
    params: &mut ParamSink,
) -> Result<String> {
    if items.is_empty() {
        return Ok(empty.to_string());
    }
    let parts = items
        .iter()
        .map(|c| clause(c, ctx, params))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("({})", parts.join(sep)))
}

fn subset_test(node: &QueryNode, label: &str, level: Level, ctx: Ctx<'_>) -> Result<String> {
    let l = ident(label);
    if node.is_collection() {
        if !ctx.is_member(node) {
            return Err(Error::QueryCompositionError(format!(
                "subset test on {} outside its collection stage",
                node.display_path()
            )));
        }
        let m = node.member_alias();
        return Ok(match (level, node.kind()) {
            (Level::Token, _) => format!("{m}:{l}"),
            (Level::Type, NodeKind::PausePath { .. }) => format!("size([({m})-[:is_a]->(mt:{l}) | 1]) > 0"),
            (Level::Type, _) => format!("{}:{l}", node.member_type_alias()),
        });
    }
    Ok(match level {
        Level::Token => format!("{}:{l}", node.alias()),
        Level::Type => format!("{}:{l}", node.type_alias()),
    })
}

/// Alignment of `lower` with the `side` boundary of its container `higher`:
/// no token of the lower type inside `higher` sits just before (Left) or just
/// after (Right) `lower`.
fn alignment(lower: &QueryNode, higher: &QueryNode, side: Side, aligned: bool) -> Result<String> {
    let h = lower.hierarchy();
    let (lt, ht) = match (lower.type_name(), higher.type_name()) {
        (Some(l), Some(hh)) => (l, hh),
        _ => return Err(Error::QueryCompositionError("alignment needs two annotation nodes".to_string())),
    };
    let depth = h.depth(lt, ht).ok_or_else(|| {
        Error::QueryCompositionError(format!("{ht} does not contain {lt}; cannot test alignment"))
    })?;
    let (l, hv) = (lower.alias(), higher.alias());
    let neighbour = format!("(:{}:{})", ident(lt), ident(lower.corpus_name()));
    let hop = hops(depth);
    let adjacent = match side {
        Side::Left => format!("({l})<-[:precedes]-{neighbour}-[:contained_by{hop}]->({hv})"),
        Side::Right => format!("({l})-[:precedes]->{neighbour}-[:contained_by{hop}]->({hv})"),
    };

    // Reached from the same token by climbing containers: containment holds
    // by construction and only adjacency needs testing.
    if lower.hierarchical_base() == higher.hierarchical_base() {
        return Ok(if aligned { format!("NOT {adjacent}") } else { adjacent });
    }
    let contained = format!("({l})-[:contained_by{hop}]->({hv})");
    Ok(if aligned {
        format!("({contained} AND NOT {adjacent})")
    } else {
        format!("NOT ({contained} AND NOT {adjacent})")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::Hierarchy;
    use crate::query::clause::or_;
    use std::sync::Arc;

    fn hierarchy() -> Arc<Hierarchy> {
        let mut h = Hierarchy::new("test");
        h.add_annotation_type("word", None).unwrap();
        h.add_annotation_type("syllable", Some("word")).unwrap();
        h.add_annotation_type("phone", Some("syllable")).unwrap();
        h.add_token_subsets("phone", ["stop"]).unwrap();
        Arc::new(h)
    }

    fn render(c: &ClauseElement) -> String {
        let mut params = ParamSink::new();
        clause(c, Ctx::top(), &mut params).unwrap()
    }

    #[test]
    fn test_alignment_structural() {
        let phone = QueryNode::annotation(hierarchy(), "phone").unwrap();
        let c = phone.attr("begin").unwrap().equals(phone.attr("word.begin").unwrap()).unwrap();
        assert_eq!(
            render(&c),
            "NOT (node_phone)<-[:precedes]-(:phone:test)-[:contained_by*2]->(node_phone_word)"
        );
        let c = phone.attr("end").unwrap().not_equals(phone.attr("syllable.end").unwrap()).unwrap();
        assert_eq!(
            render(&c),
            "(node_phone)-[:precedes]->(:phone:test)-[:contained_by]->(node_phone_syllable)"
        );
    }

    #[test]
    fn test_alignment_non_structural() {
        let phone = QueryNode::annotation(hierarchy(), "phone").unwrap();
        let c = phone
            .attr("following.begin")
            .unwrap()
            .equals(phone.attr("word.begin").unwrap())
            .unwrap();
        let text = render(&c);
        assert!(text.starts_with("((foll_1_node_phone)-[:contained_by*2]->(node_phone_word) AND NOT"));
    }

    #[test]
    fn test_compare_binds_params() {
        let phone = QueryNode::annotation(hierarchy(), "phone").unwrap();
        let c = or_(vec![
            phone.attr("label").unwrap().equals("aa").unwrap(),
            phone.attr("subset").unwrap().equals("stop").unwrap(),
        ]);
        assert_eq!(render(&c), "(node_phone.label = $label_0 OR node_phone:stop)");
    }

    #[test]
    fn test_collection_attributes() {
        let word = QueryNode::annotation(hierarchy(), "word").unwrap();
        let ctx = Ctx::top();
        assert_eq!(attribute(&word.attr("phone.count").unwrap(), ctx).unwrap(), "size(node_word_phone_coll)");
        assert_eq!(
            attribute(&word.attr("phone.label").unwrap(), ctx).unwrap(),
            "[x IN node_word_phone_coll | x.label]"
        );
        assert_eq!(
            attribute(&word.attr("phone[-1].label").unwrap(), ctx).unwrap(),
            "node_word_phone_coll[-1].label"
        );
        let coll = word.node("phone").unwrap();
        let stage = Ctx::stage(&coll);
        assert_eq!(
            attribute(&word.attr("phone.label").unwrap(), stage).unwrap(),
            "node_word_phone_coll_m.label"
        );
    }
}
