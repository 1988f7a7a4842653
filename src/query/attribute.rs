//! Attributes: named values read off a query node.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::node::{NodeKind, PauseDirection, QueryNode};
use crate::hierarchy::PropertyType;

/// Whether a value lives on the token or on its type (lexicon) node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Token,
    Type,
}

/// Summary statistics over an acoustic track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStat {
    Mean,
    Min,
    Max,
}

impl TrackStat {
    pub const ALL: [TrackStat; 3] = [TrackStat::Mean, TrackStat::Min, TrackStat::Max];

    pub fn name(&self) -> &'static str {
        match self {
            TrackStat::Mean => "mean",
            TrackStat::Min => "min",
            TrackStat::Max => "max",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Reduce a track's values; `None` for an empty track.
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        Some(match self {
            TrackStat::Mean => values.iter().sum::<f64>() / values.len() as f64,
            TrackStat::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            TrackStat::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    /// A stored property. On a collection only `begin`/`end` appear here and
    /// read the first/last member.
    Property { name: String, level: Level },
    /// `end - begin` of a token, a positional member, or a whole collection.
    Duration,
    /// Subset membership; only usable inside clauses.
    Subset,
    /// Whether a pause sits directly before or after the token.
    PauseFlag { direction: PauseDirection },
    /// Number of collection members.
    Count,
    /// Members per second of the anchor's duration.
    Rate,
    /// One value per collection member.
    MemberList { name: String, level: Level },
    /// Raw acoustic samples.
    Track,
    /// A statistic over acoustic samples.
    TrackStat(TrackStat),
}

/// A value readable from a node, optionally renamed for output.
#[derive(Clone)]
pub struct Attribute {
    node: QueryNode,
    kind: AttributeKind,
    name: String,
    alias: Option<String>,
}

impl Attribute {
    pub(crate) fn new(node: QueryNode, kind: AttributeKind, name: &str) -> Self {
        Self { node, kind, name: name.to_string(), alias: None }
    }

    pub fn node(&self) -> &QueryNode {
        &self.node
    }

    pub fn kind(&self) -> &AttributeKind {
        &self.kind
    }

    /// The name this attribute was resolved from.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Rename the output column.
    pub fn column_name(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    /// Column name in results: the alias, or the path after the root joined by `_`.
    pub fn output_name(&self) -> String {
        if let Some(a) = &self.alias {
            return a.clone();
        }
        let slug = self.node.path_slug();
        if slug.is_empty() {
            self.name.clone()
        } else {
            format!("{slug}_{}", self.name)
        }
    }

    pub fn display_path(&self) -> String {
        format!("{}.{}", self.node.display_path(), self.name)
    }

    pub fn is_list_valued(&self) -> bool {
        matches!(self.kind, AttributeKind::MemberList { .. } | AttributeKind::Track)
    }

    pub fn is_type_level(&self) -> bool {
        matches!(
            self.kind,
            AttributeKind::Property { level: Level::Type, .. } | AttributeKind::MemberList { level: Level::Type, .. }
        )
    }

    /// Values computed from an acoustic source rather than the graph.
    pub fn is_acoustic(&self) -> bool {
        matches!(self.kind, AttributeKind::Track | AttributeKind::TrackStat(_))
    }

    /// Semantic type used when the value is cached back onto the graph.
    pub fn value_type(&self) -> PropertyType {
        match &self.kind {
            AttributeKind::Property { name, level } => self.declared_type(name, *level).unwrap_or(PropertyType::String),
            AttributeKind::Duration | AttributeKind::Rate | AttributeKind::TrackStat(_) => PropertyType::Float,
            AttributeKind::Count => PropertyType::Int,
            AttributeKind::Subset | AttributeKind::PauseFlag { .. } => PropertyType::Bool,
            AttributeKind::MemberList { .. } | AttributeKind::Track => PropertyType::List,
        }
    }

    fn declared_type(&self, name: &str, level: Level) -> Option<PropertyType> {
        let h = self.node.hierarchy();
        let schema_node = match self.node.kind() {
            NodeKind::Positional { collection, .. } => collection,
            _ => &self.node,
        };
        match schema_node.kind() {
            NodeKind::Speaker { .. } => h.speaker_properties().get(name).copied(),
            NodeKind::Discourse { .. } => h.discourse_properties().get(name).copied(),
            NodeKind::SubAnnotation { anchor, type_name } => h
                .subannotation_properties(anchor.type_name()?, type_name)
                .and_then(|m| m.get(name).copied()),
            _ => {
                let at = h.annotation_type(schema_node.type_name()?)?;
                match level {
                    Level::Token => at.token_properties.get(name).copied(),
                    Level::Type => at.type_properties.get(name).copied(),
                }
            }
        }
    }
}

impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node && self.kind == other.kind && self.alias == other.alias
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Attribute({}", self.display_path())?;
        if let Some(a) = &self.alias {
            write!(f, " as {a}")?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_path())
    }
}
