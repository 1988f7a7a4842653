//! Query-time nodes.
//!
//! A [`QueryNode`] is an immutable, cheaply cloneable handle describing one
//! position in a query: the root annotation type, a neighbour reached by
//! precedence, a container, a collection of contained tokens, a speaker...
//! Every name is resolved against the hierarchy snapshot the node was built
//! from, so typos fail here with the list of valid names instead of
//! producing an empty result set.
//!
//! Two nodes reached by the same path share a [`NodeKey`] and compile to the
//! same Cypher variable.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::attribute::{Attribute, AttributeKind, Level, TrackStat};
use crate::cypher::sanitize;
use crate::hierarchy::Hierarchy;
use crate::{Error, Result};

// ============================================================================
// Paths
// ============================================================================

/// Where a node's access path starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "type", rename_all = "snake_case")]
pub enum Root {
    Annotation(String),
    Lexicon(String),
    Speakers,
    Discourses,
}

/// One step of an access path, replayable against a hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Name(String),
    Index(i64),
    Subset(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseDirection {
    Following,
    Previous,
}

/// A subset label the node's matches must carry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubsetConstraint {
    pub label: String,
    pub level: Level,
}

// ============================================================================
// Identity
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeTag {
    Annotation,
    Lexicon,
    Speaker,
    Discourse,
    Precedence,
    Hierarchical,
    SubPath,
    SubAnnotation,
    FollowingPause,
    PreviousPause,
    Positional,
    Acoustic,
}

/// Structural identity of a node: equal keys compile to the same variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub tag: NodeTag,
    pub anchor: Option<Box<NodeKey>>,
    pub type_name: String,
    pub offset: i64,
    pub subsets: SmallVec<[String; 2]>,
}

// ============================================================================
// Node kinds
// ============================================================================

#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Tokens of an annotation type (query root).
    Annotation { type_name: String },
    /// Type nodes of an annotation type (lexicon query root).
    Lexicon { type_name: String },
    /// The speaker of the anchor token, or every speaker when unanchored.
    Speaker { anchor: Option<QueryNode> },
    /// The discourse of the anchor token, or every discourse when unanchored.
    Discourse { anchor: Option<QueryNode> },
    /// The token `offset` steps away along `precedes`; never 0.
    Precedence { anchor: QueryNode, offset: i64 },
    /// The container of `type_name`, `depth` contained_by hops up.
    Hierarchical { anchor: QueryNode, type_name: String, depth: usize },
    /// Ordered tokens of a lower type inside the anchor.
    SubPath { anchor: QueryNode, type_name: String, depth: usize },
    /// Subannotations attached to the anchor.
    SubAnnotation { anchor: QueryNode, type_name: String },
    /// Pause tokens between the anchor and the adjacent speech token.
    PausePath { anchor: QueryNode, direction: PauseDirection },
    /// One element of a collection.
    Positional { collection: QueryNode, index: i64 },
    /// An acoustic track over the anchor's time span.
    Acoustic { anchor: QueryNode, measure: String },
}

struct NodeInner {
    kind: NodeKind,
    root: Root,
    steps: Vec<Step>,
    subsets: SmallVec<[SubsetConstraint; 2]>,
    hierarchy: Arc<Hierarchy>,
    key: NodeKey,
    alias: String,
}

#[derive(Clone)]
pub struct QueryNode {
    inner: Arc<NodeInner>,
}

/// What a name resolves to on a node.
#[derive(Debug, Clone)]
pub enum Resolution {
    Attribute(Attribute),
    Hierarchical(QueryNode),
    Collection(QueryNode),
    Speaker(QueryNode),
    Discourse(QueryNode),
    SubAnnotation(QueryNode),
    Precedence(QueryNode),
    PausePath(QueryNode),
    Acoustic(QueryNode),
}

impl Resolution {
    pub fn into_node(self) -> Option<QueryNode> {
        match self {
            Resolution::Attribute(_) => None,
            Resolution::Hierarchical(n)
            | Resolution::Collection(n)
            | Resolution::Speaker(n)
            | Resolution::Discourse(n)
            | Resolution::SubAnnotation(n)
            | Resolution::Precedence(n)
            | Resolution::PausePath(n)
            | Resolution::Acoustic(n) => Some(n),
        }
    }

    pub fn into_attribute(self) -> Option<Attribute> {
        match self {
            Resolution::Attribute(a) => Some(a),
            _ => None,
        }
    }
}

// ============================================================================
// Construction
// ============================================================================

impl QueryNode {
    /// Root node over the tokens of `type_name`.
    pub fn annotation(hierarchy: Arc<Hierarchy>, type_name: &str) -> Result<Self> {
        hierarchy.require_type(type_name)?;
        Ok(Self::build(
            NodeKind::Annotation { type_name: type_name.to_string() },
            Root::Annotation(type_name.to_string()),
            Vec::new(),
            SmallVec::new(),
            hierarchy,
        ))
    }

    /// Root node over the type (lexicon) nodes of `type_name`.
    pub fn lexicon(hierarchy: Arc<Hierarchy>, type_name: &str) -> Result<Self> {
        hierarchy.require_type(type_name)?;
        Ok(Self::build(
            NodeKind::Lexicon { type_name: type_name.to_string() },
            Root::Lexicon(type_name.to_string()),
            Vec::new(),
            SmallVec::new(),
            hierarchy,
        ))
    }

    pub fn speakers(hierarchy: Arc<Hierarchy>) -> Self {
        Self::build(NodeKind::Speaker { anchor: None }, Root::Speakers, Vec::new(), SmallVec::new(), hierarchy)
    }

    pub fn discourses(hierarchy: Arc<Hierarchy>) -> Self {
        Self::build(NodeKind::Discourse { anchor: None }, Root::Discourses, Vec::new(), SmallVec::new(), hierarchy)
    }

    /// Start a node from a root descriptor.
    pub fn from_root(hierarchy: Arc<Hierarchy>, root: &Root) -> Result<Self> {
        match root {
            Root::Annotation(t) => Self::annotation(hierarchy, t),
            Root::Lexicon(t) => Self::lexicon(hierarchy, t),
            Root::Speakers => Ok(Self::speakers(hierarchy)),
            Root::Discourses => Ok(Self::discourses(hierarchy)),
        }
    }

    /// Replay a recorded path against (possibly another version of) a hierarchy.
    pub fn from_path(hierarchy: Arc<Hierarchy>, root: &Root, steps: &[Step]) -> Result<Self> {
        let mut node = Self::from_root(hierarchy, root)?;
        for step in steps {
            node = match step {
                Step::Name(name) => node.node(name)?,
                Step::Index(i) => node.at(*i)?,
                Step::Subset(label) => node.with_subset(label)?,
            };
        }
        Ok(node)
    }

    fn build(
        kind: NodeKind,
        root: Root,
        steps: Vec<Step>,
        subsets: SmallVec<[SubsetConstraint; 2]>,
        hierarchy: Arc<Hierarchy>,
    ) -> Self {
        let (tag, anchor, type_name, offset): (NodeTag, Option<&QueryNode>, String, i64) = match &kind {
            NodeKind::Annotation { type_name } => (NodeTag::Annotation, None, type_name.clone(), 0),
            NodeKind::Lexicon { type_name } => (NodeTag::Lexicon, None, type_name.clone(), 0),
            NodeKind::Speaker { anchor } => (NodeTag::Speaker, anchor.as_ref(), String::new(), 0),
            NodeKind::Discourse { anchor } => (NodeTag::Discourse, anchor.as_ref(), String::new(), 0),
            NodeKind::Precedence { anchor, offset } => (NodeTag::Precedence, Some(anchor), String::new(), *offset),
            NodeKind::Hierarchical { anchor, type_name, .. } => {
                (NodeTag::Hierarchical, Some(anchor), type_name.clone(), 0)
            }
            NodeKind::SubPath { anchor, type_name, .. } => (NodeTag::SubPath, Some(anchor), type_name.clone(), 0),
            NodeKind::SubAnnotation { anchor, type_name } => {
                (NodeTag::SubAnnotation, Some(anchor), type_name.clone(), 0)
            }
            NodeKind::PausePath { anchor, direction: PauseDirection::Following } => {
                (NodeTag::FollowingPause, Some(anchor), String::new(), 0)
            }
            NodeKind::PausePath { anchor, direction: PauseDirection::Previous } => {
                (NodeTag::PreviousPause, Some(anchor), String::new(), 0)
            }
            NodeKind::Positional { collection, index } => {
                (NodeTag::Positional, Some(collection), String::new(), *index)
            }
            NodeKind::Acoustic { anchor, measure } => (NodeTag::Acoustic, Some(anchor), measure.clone(), 0),
        };

        let mut labels: SmallVec<[String; 2]> = subsets.iter().map(|s| s.label.clone()).collect();
        labels.sort();
        let key = NodeKey {
            tag,
            anchor: anchor.map(|a| Box::new(a.key().clone())),
            type_name,
            offset,
            subsets: labels,
        };

        let mut alias = base_alias(&kind);
        for s in &subsets {
            alias.push('_');
            alias.push_str(&sanitize(&s.label));
        }

        Self {
            inner: Arc::new(NodeInner { kind, root, steps, subsets, hierarchy, key, alias }),
        }
    }

    /// A node one step further along this node's path.
    fn child(&self, kind: NodeKind, step: Step) -> QueryNode {
        let mut steps = self.inner.steps.clone();
        steps.push(step);
        Self::build(kind, self.inner.root.clone(), steps, SmallVec::new(), self.inner.hierarchy.clone())
    }
}

fn base_alias(kind: &NodeKind) -> String {
    match kind {
        NodeKind::Annotation { type_name } => format!("node_{}", sanitize(type_name)),
        NodeKind::Lexicon { type_name } => format!("lex_{}", sanitize(type_name)),
        NodeKind::Speaker { anchor: None } => "node_Speaker".to_string(),
        NodeKind::Speaker { anchor: Some(a) } => format!("{}_Speaker", a.alias()),
        NodeKind::Discourse { anchor: None } => "node_Discourse".to_string(),
        NodeKind::Discourse { anchor: Some(a) } => format!("{}_Discourse", a.alias()),
        NodeKind::Precedence { anchor, offset } if *offset < 0 => {
            format!("prev_{}_{}", offset.unsigned_abs(), anchor.alias())
        }
        NodeKind::Precedence { anchor, offset } => format!("foll_{offset}_{}", anchor.alias()),
        NodeKind::Hierarchical { anchor, type_name, .. } => format!("{}_{}", anchor.alias(), sanitize(type_name)),
        NodeKind::SubPath { anchor, type_name, .. } => format!("{}_{}_coll", anchor.alias(), sanitize(type_name)),
        NodeKind::SubAnnotation { anchor, type_name } => format!("{}_{}_sub", anchor.alias(), sanitize(type_name)),
        NodeKind::PausePath { anchor, direction: PauseDirection::Following } => format!("{}_fpause", anchor.alias()),
        NodeKind::PausePath { anchor, direction: PauseDirection::Previous } => format!("{}_ppause", anchor.alias()),
        NodeKind::Positional { collection, .. } => collection.alias().to_string(),
        NodeKind::Acoustic { anchor, measure } => format!("{}_{}", anchor.alias(), sanitize(measure)),
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl QueryNode {
    pub fn kind(&self) -> &NodeKind {
        &self.inner.kind
    }

    pub fn key(&self) -> &NodeKey {
        &self.inner.key
    }

    /// Cypher variable bound to this node.
    pub fn alias(&self) -> &str {
        &self.inner.alias
    }

    /// Variable bound to the type node joined through `is_a`.
    pub fn type_alias(&self) -> String {
        match self.inner.kind {
            NodeKind::Lexicon { .. } => self.inner.alias.clone(),
            _ => format!("{}_type", self.inner.alias),
        }
    }

    /// Per-member variable while a collection is being gathered.
    pub fn member_alias(&self) -> String {
        format!("{}_m", self.inner.alias)
    }

    /// Per-member type variable while a collection is being gathered.
    pub fn member_type_alias(&self) -> String {
        format!("{}_mt", self.inner.alias)
    }

    /// Variable holding the ordered type nodes of a collection's members.
    pub fn types_alias(&self) -> String {
        format!("{}_types", self.inner.alias)
    }

    pub fn hierarchy(&self) -> &Arc<Hierarchy> {
        &self.inner.hierarchy
    }

    pub fn corpus_name(&self) -> &str {
        &self.inner.hierarchy.corpus_name
    }

    pub fn root(&self) -> &Root {
        &self.inner.root
    }

    pub fn steps(&self) -> &[Step] {
        &self.inner.steps
    }

    pub fn subsets(&self) -> &[SubsetConstraint] {
        &self.inner.subsets
    }

    pub fn anchor(&self) -> Option<&QueryNode> {
        match &self.inner.kind {
            NodeKind::Annotation { .. } | NodeKind::Lexicon { .. } => None,
            NodeKind::Speaker { anchor } | NodeKind::Discourse { anchor } => anchor.as_ref(),
            NodeKind::Precedence { anchor, .. }
            | NodeKind::Hierarchical { anchor, .. }
            | NodeKind::SubPath { anchor, .. }
            | NodeKind::SubAnnotation { anchor, .. }
            | NodeKind::PausePath { anchor, .. }
            | NodeKind::Acoustic { anchor, .. } => Some(anchor),
            NodeKind::Positional { collection, .. } => Some(collection),
        }
    }

    /// Annotation type of the tokens this node matches (members, for collections).
    pub fn type_name(&self) -> Option<&str> {
        match &self.inner.kind {
            NodeKind::Annotation { type_name }
            | NodeKind::Lexicon { type_name }
            | NodeKind::Hierarchical { type_name, .. }
            | NodeKind::SubPath { type_name, .. }
            | NodeKind::SubAnnotation { type_name, .. } => Some(type_name),
            NodeKind::Precedence { anchor, .. } | NodeKind::PausePath { anchor, .. } => anchor.type_name(),
            NodeKind::Positional { collection, .. } => collection.type_name(),
            NodeKind::Speaker { .. } | NodeKind::Discourse { .. } | NodeKind::Acoustic { .. } => None,
        }
    }

    /// Scalar nodes bound to one annotation token per row.
    pub fn is_token(&self) -> bool {
        matches!(
            self.inner.kind,
            NodeKind::Annotation { .. } | NodeKind::Precedence { .. } | NodeKind::Hierarchical { .. }
        )
    }

    /// Nodes bound to an ordered list of tokens per row.
    pub fn is_collection(&self) -> bool {
        matches!(
            self.inner.kind,
            NodeKind::SubPath { .. } | NodeKind::SubAnnotation { .. } | NodeKind::PausePath { .. }
        )
    }

    pub fn is_root(&self) -> bool {
        self.anchor().is_none()
    }

    /// Nodes whose match may legitimately be absent (corpus edges).
    pub fn is_optional_kind(&self) -> bool {
        matches!(self.inner.kind, NodeKind::Precedence { .. })
    }

    /// Anchors from the root down to (and including) this node.
    pub fn chain(&self) -> Vec<QueryNode> {
        let mut out = vec![self.clone()];
        let mut current = self.anchor();
        while let Some(a) = current {
            out.push(a.clone());
            current = a.anchor();
        }
        out.reverse();
        out
    }

    /// Walk down through containers to the token they were reached from.
    pub fn hierarchical_base(&self) -> &QueryNode {
        match &self.inner.kind {
            NodeKind::Hierarchical { anchor, .. } => anchor.hierarchical_base(),
            _ => self,
        }
    }

    /// Path as written by the caller, e.g. `phone.word.following`.
    pub fn display_path(&self) -> String {
        let mut out = match &self.inner.root {
            Root::Annotation(t) => t.clone(),
            Root::Lexicon(t) => format!("lexicon({t})"),
            Root::Speakers => "speakers".to_string(),
            Root::Discourses => "discourses".to_string(),
        };
        for step in &self.inner.steps {
            match step {
                Step::Name(n) => {
                    out.push('.');
                    out.push_str(n);
                }
                Step::Index(i) => out.push_str(&format!("[{i}]")),
                Step::Subset(l) => {
                    out.push(':');
                    out.push_str(l);
                }
            }
        }
        out
    }

    /// Steps after the root joined with `_`, used for default column names.
    pub fn path_slug(&self) -> String {
        self.inner
            .steps
            .iter()
            .map(|s| match s {
                Step::Name(n) => n.clone(),
                Step::Index(i) => i.to_string(),
                Step::Subset(l) => l.clone(),
            })
            .collect::<Vec<_>>()
            .join("_")
    }
}

// ============================================================================
// Name resolution
// ============================================================================

/// Names valid on every token node.
const TOKEN_NAMES: [&str; 6] = ["previous", "following", "speaker", "discourse", "duration", "subset"];
/// Names valid on token nodes of types with encoded pauses.
const PAUSE_NAMES: [&str; 6] = [
    "following_pause",
    "previous_pause",
    "following_pause_duration",
    "previous_pause_duration",
    "follows_pause",
    "precedes_pause",
];

impl QueryNode {
    /// Resolve one name on this node.
    pub fn resolve(&self, name: &str) -> Result<Resolution> {
        match &self.inner.kind {
            NodeKind::Annotation { .. } | NodeKind::Precedence { .. } | NodeKind::Hierarchical { .. } => {
                self.resolve_token(name)
            }
            NodeKind::Lexicon { type_name } => self.resolve_lexicon(type_name, name),
            NodeKind::Speaker { .. } => self.resolve_entity(name, true),
            NodeKind::Discourse { .. } => self.resolve_entity(name, false),
            NodeKind::SubPath { .. } | NodeKind::SubAnnotation { .. } | NodeKind::PausePath { .. } => {
                self.resolve_collection(name)
            }
            NodeKind::Positional { collection, .. } => self.resolve_positional(collection, name),
            NodeKind::Acoustic { .. } => self.resolve_acoustic(name),
        }
    }

    /// Resolve a dotted path (`word.following.label`, `word.phone[0].label`)
    /// that must end at a node.
    pub fn node(&self, path: &str) -> Result<QueryNode> {
        let mut node = self.clone();
        for (name, indexes) in parse_path(path)? {
            let resolved = node.resolve(&name)?;
            node = match resolved.into_node() {
                Some(n) => n,
                None => {
                    return Err(Error::QueryCompositionError(format!(
                        "'{name}' on {} is an attribute, not a node",
                        node.display_path()
                    )));
                }
            };
            for i in indexes {
                node = node.at(i)?;
            }
        }
        Ok(node)
    }

    /// Resolve a dotted path that must end at an attribute.
    pub fn attr(&self, path: &str) -> Result<Attribute> {
        let segments = parse_path(path)?;
        let Some(((last, last_indexes), prefix)) = segments.split_last() else {
            return Err(Error::QueryCompositionError("empty attribute path".to_string()));
        };
        if !last_indexes.is_empty() {
            return Err(Error::QueryCompositionError(format!("cannot index attribute '{last}'")));
        }
        let mut node = self.clone();
        for (name, indexes) in prefix {
            node = node.node(name)?;
            for i in indexes {
                node = node.at(*i)?;
            }
        }
        match node.resolve(last)? {
            Resolution::Attribute(a) => Ok(a),
            _ => Err(Error::QueryCompositionError(format!(
                "'{last}' on {} is a node, not an attribute",
                node.display_path()
            ))),
        }
    }

    pub fn previous(&self) -> Result<QueryNode> {
        self.node("previous")
    }

    pub fn following(&self) -> Result<QueryNode> {
        self.node("following")
    }

    pub fn speaker(&self) -> Result<QueryNode> {
        self.node("speaker")
    }

    pub fn discourse(&self) -> Result<QueryNode> {
        self.node("discourse")
    }

    /// One element of a collection; negative indexes count from the end.
    pub fn at(&self, index: i64) -> Result<QueryNode> {
        if !self.is_collection() {
            return Err(Error::QueryCompositionError(format!(
                "{} is not a collection and cannot be indexed",
                self.display_path()
            )));
        }
        Ok(self.child(NodeKind::Positional { collection: self.clone(), index }, Step::Index(index)))
    }

    /// Restrict the node (or a collection's members) to a declared subset.
    pub fn with_subset(&self, label: &str) -> Result<QueryNode> {
        if self.inner.subsets.iter().any(|s| s.label == label) {
            return Ok(self.clone());
        }
        let h = self.hierarchy();
        let level = match &self.inner.kind {
            NodeKind::Annotation { .. }
            | NodeKind::Precedence { .. }
            | NodeKind::Hierarchical { .. }
            | NodeKind::SubPath { .. }
            | NodeKind::PausePath { .. } => {
                let t = self.type_name().unwrap_or_default();
                subset_level(h, t, label, false)?
            }
            NodeKind::Lexicon { type_name } => subset_level(h, type_name, label, true)?,
            _ => {
                return Err(Error::QueryCompositionError(format!(
                    "{} cannot be restricted to a subset",
                    self.display_path()
                )));
            }
        };
        let mut steps = self.inner.steps.clone();
        steps.push(Step::Subset(label.to_string()));
        let mut subsets = self.inner.subsets.clone();
        subsets.push(SubsetConstraint { label: label.to_string(), level });
        Ok(Self::build(
            self.inner.kind.clone(),
            self.inner.root.clone(),
            steps,
            subsets,
            self.inner.hierarchy.clone(),
        ))
    }

    fn attribute(&self, kind: AttributeKind, name: &str) -> Resolution {
        Resolution::Attribute(Attribute::new(self.clone(), kind, name))
    }

    fn schema_error(&self, name: &str, alternatives: Vec<String>) -> Error {
        Error::SchemaError {
            node: self.display_path(),
            name: name.to_string(),
            alternatives,
        }
    }

    /// Move along `precedes`, folding into an existing offset when possible.
    fn shifted(&self, delta: i64, name: &str) -> QueryNode {
        let step = Step::Name(name.to_string());
        if let NodeKind::Precedence { anchor, offset } = &self.inner.kind {
            if self.inner.subsets.is_empty() {
                let offset = offset + delta;
                if offset == 0 {
                    return anchor.clone();
                }
                return self.child(NodeKind::Precedence { anchor: anchor.clone(), offset }, step);
            }
        }
        self.child(NodeKind::Precedence { anchor: self.clone(), offset: delta }, step)
    }

    fn resolve_token(&self, name: &str) -> Result<Resolution> {
        let h = self.hierarchy().clone();
        let t = self.type_name().unwrap_or_default().to_string();
        let step = || Step::Name(name.to_string());

        match name {
            "previous" => return Ok(Resolution::Precedence(self.shifted(-1, name))),
            "following" => return Ok(Resolution::Precedence(self.shifted(1, name))),
            "speaker" => {
                return Ok(Resolution::Speaker(self.child(NodeKind::Speaker { anchor: Some(self.clone()) }, step())));
            }
            "discourse" => {
                return Ok(Resolution::Discourse(
                    self.child(NodeKind::Discourse { anchor: Some(self.clone()) }, step()),
                ));
            }
            "duration" => return Ok(self.attribute(AttributeKind::Duration, name)),
            "subset" => return Ok(self.attribute(AttributeKind::Subset, name)),
            _ => {}
        }

        if h.has_pauses(&t) {
            let pause = |direction| self.child(NodeKind::PausePath { anchor: self.clone(), direction }, step());
            match name {
                "following_pause" => return Ok(Resolution::PausePath(pause(PauseDirection::Following))),
                "previous_pause" => return Ok(Resolution::PausePath(pause(PauseDirection::Previous))),
                "following_pause_duration" | "previous_pause_duration" => {
                    let direction = if name.starts_with("following") {
                        PauseDirection::Following
                    } else {
                        PauseDirection::Previous
                    };
                    let path = self.child(
                        NodeKind::PausePath { anchor: self.clone(), direction },
                        Step::Name(name.trim_end_matches("_duration").to_string()),
                    );
                    return Ok(Resolution::Attribute(Attribute::new(path, AttributeKind::Duration, "duration")));
                }
                "follows_pause" => {
                    return Ok(self.attribute(AttributeKind::PauseFlag { direction: PauseDirection::Previous }, name));
                }
                "precedes_pause" => {
                    return Ok(self.attribute(AttributeKind::PauseFlag { direction: PauseDirection::Following }, name));
                }
                _ => {}
            }
        }

        if h.has_token_property(&t, name) {
            return Ok(self.attribute(AttributeKind::Property { name: name.to_string(), level: Level::Token }, name));
        }
        if h.has_type_property(&t, name) {
            return Ok(self.attribute(AttributeKind::Property { name: name.to_string(), level: Level::Type }, name));
        }
        if let Some(depth) = h.depth(&t, name) {
            return Ok(Resolution::Hierarchical(self.child(
                NodeKind::Hierarchical { anchor: self.clone(), type_name: name.to_string(), depth },
                step(),
            )));
        }
        if let Some(depth) = h.depth(name, &t) {
            return Ok(Resolution::Collection(self.child(
                NodeKind::SubPath { anchor: self.clone(), type_name: name.to_string(), depth },
                step(),
            )));
        }
        if h.subannotation_properties(&t, name).is_some() {
            return Ok(Resolution::SubAnnotation(self.child(
                NodeKind::SubAnnotation { anchor: self.clone(), type_name: name.to_string() },
                step(),
            )));
        }
        if h.has_acoustic(&t, name) {
            return Ok(Resolution::Acoustic(self.child(
                NodeKind::Acoustic { anchor: self.clone(), measure: name.to_string() },
                step(),
            )));
        }

        Err(self.schema_error(name, self.token_alternatives(&h, &t)))
    }

    fn token_alternatives(&self, h: &Hierarchy, t: &str) -> Vec<String> {
        let mut out: Vec<String> = TOKEN_NAMES.iter().map(|s| s.to_string()).collect();
        if h.has_pauses(t) {
            out.extend(PAUSE_NAMES.iter().map(|s| s.to_string()));
        }
        if let Some(at) = h.annotation_type(t) {
            out.extend(at.token_properties.keys().cloned());
            out.extend(at.type_properties.keys().filter(|k| !at.has_token_property(k)).cloned());
            out.extend(at.subannotations.keys().cloned());
            out.extend(at.acoustics.iter().cloned());
        }
        out.extend(h.ancestors(t).into_iter().map(str::to_string));
        out.extend(
            h.type_names()
                .filter(|other| h.contains(t, other))
                .map(str::to_string),
        );
        out
    }

    fn resolve_lexicon(&self, type_name: &str, name: &str) -> Result<Resolution> {
        let h = self.hierarchy();
        if name == "subset" {
            return Ok(self.attribute(AttributeKind::Subset, name));
        }
        if h.has_type_property(type_name, name) {
            return Ok(self.attribute(AttributeKind::Property { name: name.to_string(), level: Level::Type }, name));
        }
        let mut alternatives = vec!["subset".to_string()];
        if let Some(at) = h.annotation_type(type_name) {
            alternatives.extend(at.type_properties.keys().cloned());
        }
        Err(self.schema_error(name, alternatives))
    }

    fn resolve_entity(&self, name: &str, speaker: bool) -> Result<Resolution> {
        let h = self.hierarchy();
        let props = if speaker { h.speaker_properties() } else { h.discourse_properties() };
        if props.contains_key(name) {
            return Ok(self.attribute(AttributeKind::Property { name: name.to_string(), level: Level::Token }, name));
        }
        Err(self.schema_error(name, props.keys().cloned().collect()))
    }

    /// Schema of collection members: (token properties, type properties).
    fn member_schema(&self) -> (Vec<String>, Vec<String>) {
        let h = self.hierarchy();
        match &self.inner.kind {
            NodeKind::SubAnnotation { anchor, type_name } => {
                let parent = anchor.type_name().unwrap_or_default();
                let props = h
                    .subannotation_properties(parent, type_name)
                    .map(|m| m.keys().cloned().collect())
                    .unwrap_or_default();
                (props, Vec::new())
            }
            _ => match self.type_name().and_then(|t| h.annotation_type(t)) {
                Some(at) => (
                    at.token_properties.keys().cloned().collect(),
                    at.type_properties.keys().cloned().collect(),
                ),
                None => (Vec::new(), Vec::new()),
            },
        }
    }

    fn resolve_collection(&self, name: &str) -> Result<Resolution> {
        let is_subpath = matches!(self.inner.kind, NodeKind::SubPath { .. });
        let is_sub = matches!(self.inner.kind, NodeKind::SubAnnotation { .. });
        match name {
            "count" => return Ok(self.attribute(AttributeKind::Count, name)),
            "rate" if is_subpath => return Ok(self.attribute(AttributeKind::Rate, name)),
            "duration" => return Ok(self.attribute(AttributeKind::Duration, name)),
            "begin" | "end" => {
                return Ok(self.attribute(AttributeKind::Property { name: name.to_string(), level: Level::Token }, name));
            }
            "subset" if !is_sub => return Ok(self.attribute(AttributeKind::Subset, name)),
            _ => {}
        }
        let (token, types) = self.member_schema();
        if token.iter().any(|p| p == name) {
            return Ok(self.attribute(AttributeKind::MemberList { name: name.to_string(), level: Level::Token }, name));
        }
        if types.iter().any(|p| p == name) {
            return Ok(self.attribute(AttributeKind::MemberList { name: name.to_string(), level: Level::Type }, name));
        }
        let mut alternatives: Vec<String> = vec!["count".into(), "duration".into(), "begin".into(), "end".into()];
        if is_subpath {
            alternatives.push("rate".into());
        }
        if !is_sub {
            alternatives.push("subset".into());
        }
        alternatives.extend(token.into_iter().filter(|p| p != "begin" && p != "end"));
        alternatives.extend(types);
        alternatives.dedup();
        Err(self.schema_error(name, alternatives))
    }

    fn resolve_positional(&self, collection: &QueryNode, name: &str) -> Result<Resolution> {
        if name == "duration" {
            return Ok(self.attribute(AttributeKind::Duration, name));
        }
        let (token, types) = collection.member_schema();
        if token.iter().any(|p| p == name) {
            return Ok(self.attribute(AttributeKind::Property { name: name.to_string(), level: Level::Token }, name));
        }
        if types.iter().any(|p| p == name) {
            return Ok(self.attribute(AttributeKind::Property { name: name.to_string(), level: Level::Type }, name));
        }
        let mut alternatives = vec!["duration".to_string()];
        alternatives.extend(token);
        alternatives.extend(types);
        Err(self.schema_error(name, alternatives))
    }

    fn resolve_acoustic(&self, name: &str) -> Result<Resolution> {
        if name == "track" {
            return Ok(self.attribute(AttributeKind::Track, name));
        }
        if let Some(stat) = TrackStat::from_name(name) {
            return Ok(self.attribute(AttributeKind::TrackStat(stat), name));
        }
        let mut alternatives = vec!["track".to_string()];
        alternatives.extend(TrackStat::ALL.iter().map(|s| s.name().to_string()));
        Err(self.schema_error(name, alternatives))
    }
}

pub(crate) fn subset_level(h: &Hierarchy, type_name: &str, label: &str, type_only: bool) -> Result<Level> {
    if !type_only && h.has_token_subset(type_name, label) {
        return Ok(Level::Token);
    }
    if h.has_type_subset(type_name, label) {
        return Ok(Level::Type);
    }
    let declared = h
        .annotation_type(type_name)
        .map(|at| {
            if type_only {
                at.type_subsets.iter().cloned().collect()
            } else {
                at.subsets()
            }
        })
        .unwrap_or_default();
    Err(Error::SubsetError {
        type_name: type_name.to_string(),
        label: label.to_string(),
        declared,
    })
}

/// Split `word.phone[0].label` into `[("word", []), ("phone", [0]), ("label", [])]`.
fn parse_path(path: &str) -> Result<Vec<(String, Vec<i64>)>> {
    let malformed = || Error::QueryCompositionError(format!("malformed path '{path}'"));
    let mut out = Vec::new();
    for segment in path.split('.') {
        let (name, mut rest) = match segment.find('[') {
            Some(pos) => (&segment[..pos], &segment[pos..]),
            None => (segment, ""),
        };
        if name.is_empty() {
            return Err(malformed());
        }
        let mut indexes = Vec::new();
        while !rest.is_empty() {
            let close = rest.find(']').ok_or_else(malformed)?;
            if !rest.starts_with('[') {
                return Err(malformed());
            }
            let index: i64 = rest[1..close].trim().parse().map_err(|_| malformed())?;
            indexes.push(index);
            rest = &rest[close + 1..];
        }
        out.push((name.to_string(), indexes));
    }
    Ok(out)
}

// ============================================================================
// Identity impls
// ============================================================================

impl PartialEq for QueryNode {
    fn eq(&self, other: &Self) -> bool {
        self.inner.key == other.inner.key
    }
}

impl Eq for QueryNode {}

impl Hash for QueryNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.key.hash(state);
    }
}

impl fmt::Debug for QueryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryNode({} as {})", self.display_path(), self.alias())
    }
}

impl fmt::Display for QueryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_path())
    }
}
