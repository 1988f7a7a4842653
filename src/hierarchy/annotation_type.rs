//! Annotation types and declared property schemas.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::Value;

/// Semantic type of a declared property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Int,
    Float,
    Bool,
    List,
}

impl PropertyType {
    /// Infer the property type of a concrete value. `Null` and maps have none.
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::String(_) => Some(PropertyType::String),
            Value::Int(_) => Some(PropertyType::Int),
            Value::Float(_) => Some(PropertyType::Float),
            Value::Bool(_) => Some(PropertyType::Bool),
            Value::List(_) => Some(PropertyType::List),
            Value::Null | Value::Map(_) => None,
        }
    }
}

/// Token properties every annotation type carries.
pub const TOKEN_BUILTINS: [(&str, PropertyType); 4] = [
    ("id", PropertyType::String),
    ("label", PropertyType::String),
    ("begin", PropertyType::Float),
    ("end", PropertyType::Float),
];

/// Type (lexicon) properties every annotation type carries.
pub const TYPE_BUILTINS: [(&str, PropertyType); 1] = [("label", PropertyType::String)];

/// One category of linguistic unit: phone, syllable, word, utterance...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationType {
    pub name: String,
    /// The type whose tokens contain tokens of this type.
    pub supertype: Option<String>,
    pub token_properties: BTreeMap<String, PropertyType>,
    pub type_properties: BTreeMap<String, PropertyType>,
    pub token_subsets: BTreeSet<String>,
    pub type_subsets: BTreeSet<String>,
    /// Subannotation type name → its property schema.
    pub subannotations: BTreeMap<String, BTreeMap<String, PropertyType>>,
    /// Acoustic measures (pitch, formants...) that can be tracked over tokens.
    pub acoustics: BTreeSet<String>,
}

impl AnnotationType {
    pub fn new(name: impl Into<String>, supertype: Option<String>) -> Self {
        Self {
            name: name.into(),
            supertype,
            token_properties: TOKEN_BUILTINS
                .iter()
                .map(|(n, t)| (n.to_string(), *t))
                .collect(),
            type_properties: TYPE_BUILTINS
                .iter()
                .map(|(n, t)| (n.to_string(), *t))
                .collect(),
            token_subsets: BTreeSet::new(),
            type_subsets: BTreeSet::new(),
            subannotations: BTreeMap::new(),
            acoustics: BTreeSet::new(),
        }
    }

    /// Label carried by the type (lexicon) nodes of this annotation type.
    pub fn type_label(&self) -> String {
        format!("{}_type", self.name)
    }

    pub fn has_token_property(&self, name: &str) -> bool {
        self.token_properties.contains_key(name)
    }

    pub fn has_type_property(&self, name: &str) -> bool {
        self.type_properties.contains_key(name)
    }

    pub fn has_subset(&self, label: &str) -> bool {
        self.token_subsets.contains(label) || self.type_subsets.contains(label)
    }

    /// All subset labels, token-level first.
    pub fn subsets(&self) -> Vec<String> {
        self.token_subsets
            .iter()
            .chain(self.type_subsets.iter())
            .cloned()
            .collect()
    }

    pub(crate) fn is_builtin_token_property(name: &str) -> bool {
        TOKEN_BUILTINS.iter().any(|(n, _)| *n == name)
    }

    pub(crate) fn is_builtin_type_property(name: &str) -> bool {
        TYPE_BUILTINS.iter().any(|(n, _)| *n == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_present() {
        let phone = AnnotationType::new("phone", Some("word".into()));
        assert!(phone.has_token_property("begin"));
        assert!(phone.has_token_property("label"));
        assert!(phone.has_type_property("label"));
        assert!(!phone.has_type_property("begin"));
        assert_eq!(phone.type_label(), "phone_type");
    }

    #[test]
    fn test_property_type_of() {
        assert_eq!(PropertyType::of(&Value::from(1.5)), Some(PropertyType::Float));
        assert_eq!(PropertyType::of(&Value::from("x")), Some(PropertyType::String));
        assert_eq!(PropertyType::of(&Value::Null), None);
    }
}
