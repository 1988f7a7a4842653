//! Query planner: decides which nodes a query binds and how.
//!
//! The planner is text-agnostic. It walks every node a query references,
//! classifies it as required (plain MATCH), optional (OPTIONAL MATCH block)
//! or collection (gathered into a list by a WITH stage), decides where each
//! filter is evaluated, and works out how precedence neighbours chain onto
//! each other. The Cypher compiler turns the resulting [`QueryPlan`] into
//! clauses.

use hashbrown::{HashMap, HashSet};

use crate::query::attribute::{Attribute, AttributeKind, Level};
use crate::query::clause::{ClauseElement, Operand};
use crate::query::node::{NodeKey, NodeKind, QueryNode, Root};
use crate::{Error, Result};

/// Everything of a query the planner looks at, already narrowed to what the
/// terminal operation needs (a count ignores columns, for example).
#[derive(Debug, Clone)]
pub struct PlanInput<'a> {
    pub to_find: &'a QueryNode,
    pub filters: &'a [ClauseElement],
    /// Attributes whose nodes must match (ordering keys).
    pub required: Vec<&'a Attribute>,
    /// Attributes that are only read (columns, group keys, aggregates, cache).
    pub outputs: Vec<&'a Attribute>,
    pub preload: &'a [QueryNode],
    /// Return whole annotations instead of columns.
    pub hydrate: bool,
}

/// How a precedence node is reached: `steps` hops along `precedes` from `base`
/// (negative steps walk backwards).
#[derive(Debug, Clone)]
pub struct PrecedenceLink {
    pub base: QueryNode,
    pub steps: i64,
}

/// Where a filter is evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterScope {
    /// The WHERE of the required MATCH.
    Top,
    /// Inside the stage gathering one collection (member-level filters).
    Stage(NodeKey),
    /// After all collections are gathered (aggregates, positional members).
    Post,
}

#[derive(Debug, Clone, Default)]
pub struct QueryPlan {
    /// Nodes bound by the required MATCH, anchors first.
    pub required: Vec<QueryNode>,
    /// OPTIONAL MATCH blocks in dependency order; each block's nodes anchors first.
    pub optional_blocks: Vec<Vec<QueryNode>>,
    /// Collections in dependency order.
    pub collections: Vec<QueryNode>,
    /// Positional views onto collections.
    pub positional: Vec<QueryNode>,
    /// Nodes (or collections) whose type nodes must be joined through `is_a`.
    pub typed: HashSet<NodeKey>,
    pub precedence: HashMap<NodeKey, PrecedenceLink>,
    pub top_filters: Vec<ClauseElement>,
    pub stage_filters: HashMap<NodeKey, Vec<ClauseElement>>,
    pub post_filters: Vec<ClauseElement>,
}

impl QueryPlan {
    pub fn is_typed(&self, node: &QueryNode) -> bool {
        self.typed.contains(node.key())
    }

    pub fn link(&self, node: &QueryNode) -> Option<&PrecedenceLink> {
        self.precedence.get(node.key())
    }

    pub fn optional_nodes(&self) -> impl Iterator<Item = &QueryNode> {
        self.optional_blocks.iter().flatten()
    }

    pub fn stage_filters(&self, collection: &QueryNode) -> &[ClauseElement] {
        self.stage_filters
            .get(collection.key())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

// ============================================================================
// Planning
// ============================================================================

/// Ordered set of nodes keyed by `NodeKey`.
#[derive(Debug, Default)]
struct NodeSet {
    order: Vec<QueryNode>,
    keys: HashSet<NodeKey>,
}

impl NodeSet {
    fn insert(&mut self, node: &QueryNode) {
        if self.keys.insert(node.key().clone()) {
            self.order.push(node.clone());
        }
    }

    fn contains(&self, key: &NodeKey) -> bool {
        self.keys.contains(key)
    }
}

struct Planner<'a> {
    to_find: &'a QueryNode,
    required: NodeSet,
    optional: NodeSet,
    collections: NodeSet,
    positional: NodeSet,
}

impl<'a> Planner<'a> {
    fn new(to_find: &'a QueryNode) -> Self {
        Self {
            to_find,
            required: NodeSet::default(),
            optional: NodeSet::default(),
            collections: NodeSet::default(),
            positional: NodeSet::default(),
        }
    }

    /// Register a referenced node and every anchor it depends on.
    fn add(&mut self, node: &QueryNode, required: bool) -> Result<()> {
        let chain = node.chain();
        if chain.first().map(QueryNode::key) != Some(self.to_find.key()) {
            return Err(Error::QueryCompositionError(format!(
                "{} is not reachable from the queried node {}",
                node.display_path(),
                self.to_find.display_path()
            )));
        }

        let mut behind_optional = false;
        for n in &chain {
            match n.kind() {
                NodeKind::Positional { .. } => {
                    self.positional.insert(n);
                    continue;
                }
                NodeKind::Acoustic { .. } => continue,
                _ => {}
            }
            if n.is_optional_kind() {
                behind_optional = true;
            }
            if n.is_collection() {
                self.collections.insert(n);
            } else if required || !behind_optional {
                self.required.insert(n);
            } else {
                self.optional.insert(n);
            }
        }

        // Acoustic windows need the speaker and discourse of their anchor.
        if let NodeKind::Acoustic { anchor, .. } = node.kind() {
            self.add(&anchor.speaker()?, required)?;
            self.add(&anchor.discourse()?, required)?;
        }
        Ok(())
    }
}

/// Build the plan for one compiled statement.
pub fn plan(input: &PlanInput<'_>) -> Result<QueryPlan> {
    let mut p = Planner::new(input.to_find);
    let annotation_root = matches!(input.to_find.root(), Root::Annotation(_));

    p.add(input.to_find, true)?;
    for f in input.filters {
        for n in f.nodes() {
            p.add(&n, true)?;
        }
    }
    for a in &input.required {
        p.add(a.node(), true)?;
    }
    for a in &input.outputs {
        p.add(a.node(), false)?;
    }
    if input.hydrate {
        for n in input.preload {
            p.add(n, false)?;
        }
        if annotation_root {
            p.add(&input.to_find.speaker()?, true)?;
            p.add(&input.to_find.discourse()?, true)?;
        }
    }

    let Planner { required, optional, collections, positional, .. } = p;
    let optional: Vec<QueryNode> = optional
        .order
        .into_iter()
        .filter(|n| !required.contains(n.key()))
        .collect();
    let optional_keys: HashSet<NodeKey> = optional.iter().map(|n| n.key().clone()).collect();

    let precedence = link_precedence(&required, &optional);
    let optional_blocks = optional_blocks(&optional, &optional_keys, &precedence);

    let mut plan = QueryPlan {
        required: required.order,
        optional_blocks,
        collections: collections.order,
        positional: positional.order,
        precedence,
        ..Default::default()
    };

    plan.typed = typed_nodes(input, &plan, annotation_root);

    for f in input.filters {
        match filter_scope(f)? {
            FilterScope::Top => plan.top_filters.push(f.clone()),
            FilterScope::Stage(key) => plan.stage_filters.entry(key).or_default().push(f.clone()),
            FilterScope::Post => plan.post_filters.push(f.clone()),
        }
    }
    Ok(plan)
}

/// Chain precedence nodes sharing an anchor and direction: each one walks
/// only the gap from the closest matched neighbour with a smaller offset.
/// Required nodes never hang off optional ones; subset-restricted nodes are
/// never used as a base.
fn link_precedence(required: &NodeSet, optional: &[QueryNode]) -> HashMap<NodeKey, PrecedenceLink> {
    let mut groups: HashMap<(NodeKey, bool), Vec<(QueryNode, QueryNode, i64)>> = HashMap::new();
    for n in required.order.iter().chain(optional.iter()) {
        if let NodeKind::Precedence { anchor, offset } = n.kind() {
            groups
                .entry((anchor.key().clone(), *offset > 0))
                .or_default()
                .push((n.clone(), anchor.clone(), *offset));
        }
    }

    let mut links = HashMap::new();
    for ((_, forward), mut members) in groups {
        members.sort_by_key(|(_, _, offset)| offset.abs());
        let sign = if forward { 1 } else { -1 };
        let mut bases: Vec<(QueryNode, i64, bool)> = Vec::new();
        for (node, anchor, offset) in members {
            let distance = offset.abs();
            let is_required = required.contains(node.key());
            let base = bases
                .iter()
                .rev()
                .find(|(_, d, req)| *d < distance && (*req || !is_required));
            let (base_node, base_distance) = match base {
                Some((b, d, _)) => (b.clone(), *d),
                None => (anchor, 0),
            };
            links.insert(
                node.key().clone(),
                PrecedenceLink { base: base_node, steps: sign * (distance - base_distance) },
            );
            if node.subsets().is_empty() {
                bases.push((node, distance, is_required));
            }
        }
    }
    links
}

/// Group optional nodes into OPTIONAL MATCH blocks. A precedence node, or a
/// node anchored on a required node, opens a block; everything else joins
/// the block of its anchor.
fn optional_blocks(
    optional: &[QueryNode],
    optional_keys: &HashSet<NodeKey>,
    precedence: &HashMap<NodeKey, PrecedenceLink>,
) -> Vec<Vec<QueryNode>> {
    let mut sorted: Vec<&QueryNode> = optional.iter().collect();
    sorted.sort_by_key(|n| n.chain().len());

    let mut blocks: Vec<Vec<QueryNode>> = Vec::new();
    let mut block_of: HashMap<NodeKey, usize> = HashMap::new();
    for n in sorted {
        let joined = match n.anchor() {
            Some(a) if !n.is_optional_kind() && optional_keys.contains(a.key()) => block_of.get(a.key()).copied(),
            _ => None,
        };
        let idx = match joined {
            Some(idx) => {
                blocks[idx].push(n.clone());
                idx
            }
            None => {
                blocks.push(vec![n.clone()]);
                blocks.len() - 1
            }
        };
        block_of.insert(n.key().clone(), idx);
    }

    // Order blocks so every anchor and precedence base is bound first.
    let deps: Vec<HashSet<usize>> = blocks
        .iter()
        .enumerate()
        .map(|(i, block)| {
            let mut d = HashSet::new();
            for n in block {
                let anchor = n.anchor().map(|a| a.key().clone());
                let base = precedence.get(n.key()).map(|l| l.base.key().clone());
                for key in anchor.into_iter().chain(base) {
                    if let Some(&j) = block_of.get(&key) {
                        if j != i {
                            d.insert(j);
                        }
                    }
                }
            }
            d
        })
        .collect();

    let mut emitted: HashSet<usize> = HashSet::new();
    let mut order = Vec::with_capacity(blocks.len());
    while order.len() < blocks.len() {
        let next = (0..blocks.len())
            .find(|i| !emitted.contains(i) && deps[*i].iter().all(|d| emitted.contains(d)));
        match next {
            Some(i) => {
                emitted.insert(i);
                order.push(i);
            }
            // Dependencies only point at shorter chains, so this cannot stall;
            // fall back to declaration order rather than loop.
            None => {
                order.extend((0..blocks.len()).filter(|i| !emitted.contains(i)));
                break;
            }
        }
    }

    let mut slots: Vec<Option<Vec<QueryNode>>> = blocks.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}

/// Nodes whose type-level data is read somewhere.
fn typed_nodes(input: &PlanInput<'_>, plan: &QueryPlan, annotation_root: bool) -> HashSet<NodeKey> {
    let mut typed = HashSet::new();
    let mut mark = |n: &QueryNode| {
        let n = match n.kind() {
            NodeKind::Positional { collection, .. } => collection,
            _ => n,
        };
        if !matches!(
            n.kind(),
            NodeKind::Lexicon { .. } | NodeKind::Speaker { .. } | NodeKind::Discourse { .. } | NodeKind::SubAnnotation { .. }
        ) {
            typed.insert(n.key().clone());
        }
    };

    for f in input.filters {
        for n in f.type_level_nodes() {
            mark(&n);
        }
    }
    for a in input.required.iter().chain(input.outputs.iter()) {
        if a.is_type_level() {
            mark(a.node());
        }
    }
    let bound = plan
        .required
        .iter()
        .chain(plan.optional_nodes())
        .chain(plan.collections.iter());
    for n in bound {
        if n.subsets().iter().any(|s| s.level == Level::Type) {
            mark(n);
        }
    }
    if input.hydrate && annotation_root {
        mark(input.to_find);
        for n in input.preload {
            if n.is_token() || matches!(n.kind(), NodeKind::SubPath { .. }) {
                mark(n);
            }
        }
    }
    typed
}

enum CollectionRef {
    Member(NodeKey),
    Aggregate,
}

fn attribute_ref(attr: &Attribute) -> Option<CollectionRef> {
    let n = attr.node();
    if n.is_collection() {
        return Some(match attr.kind() {
            AttributeKind::MemberList { .. } => CollectionRef::Member(n.key().clone()),
            _ => CollectionRef::Aggregate,
        });
    }
    match n.kind() {
        NodeKind::Positional { .. } => Some(CollectionRef::Aggregate),
        _ => None,
    }
}

fn collect_refs(clause: &ClauseElement, out: &mut Vec<CollectionRef>) {
    match clause {
        ClauseElement::Compare { left, right, .. } => {
            out.extend(attribute_ref(left));
            if let Operand::Attribute(r) = right {
                out.extend(attribute_ref(r));
            }
        }
        ClauseElement::In { attr, .. } | ClauseElement::Regex { attr, .. } | ClauseElement::Null { attr, .. } => {
            out.extend(attribute_ref(attr))
        }
        ClauseElement::Subset { node, .. } if node.is_collection() => out.push(CollectionRef::Member(node.key().clone())),
        ClauseElement::Subset { .. } | ClauseElement::Aligned { .. } | ClauseElement::Pause { .. } => {}
        ClauseElement::And(items) | ClauseElement::Or(items) => {
            for item in items {
                collect_refs(item, out);
            }
        }
    }
}

/// Decide where a filter is evaluated.
pub fn filter_scope(clause: &ClauseElement) -> Result<FilterScope> {
    let mut refs = Vec::new();
    collect_refs(clause, &mut refs);

    let mut members: Vec<NodeKey> = Vec::new();
    let mut aggregate = false;
    for r in refs {
        match r {
            CollectionRef::Member(k) => {
                if !members.contains(&k) {
                    members.push(k);
                }
            }
            CollectionRef::Aggregate => aggregate = true,
        }
    }

    match (members.len(), aggregate) {
        (0, false) => Ok(FilterScope::Top),
        (0, true) => Ok(FilterScope::Post),
        (1, false) => Ok(FilterScope::Stage(members.remove(0))),
        (1, true) => Err(Error::QueryCompositionError(
            "a filter cannot mix collection members with collection aggregates".to_string(),
        )),
        _ => Err(Error::QueryCompositionError(
            "a filter on collection members can only reference one collection".to_string(),
        )),
    }
}
