//! # Hierarchy
//!
//! The schema of one corpus: which annotation types exist, how they nest,
//! and which properties and subsets are declared on tokens, types, speakers
//! and discourses. Every query-time Node resolves names against a snapshot
//! of this structure, so a name the hierarchy does not know fails at
//! construction time rather than in the database.
//!
//! Containment must stay acyclic (a chain or a tree); every mutation goes
//! through a method that checks it and bumps [`Hierarchy::version`].

pub mod annotation_type;
pub mod store;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use annotation_type::{AnnotationType, PropertyType, TOKEN_BUILTINS, TYPE_BUILTINS};
pub use store::{HierarchyStore, JsonFileStore, MemoryStore};

/// Labels applied to tokens depending on whether they are speech or pauses.
pub const SPEECH_LABEL: &str = "speech";
pub const PAUSE_LABEL: &str = "pause";

/// Properties every speaker and discourse node carries.
const ENTITY_BUILTINS: [(&str, PropertyType); 1] = [("name", PropertyType::String)];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hierarchy {
    pub corpus_name: String,
    /// Incremented on every schema mutation.
    pub version: u64,
    types: BTreeMap<String, AnnotationType>,
    speaker_properties: BTreeMap<String, PropertyType>,
    discourse_properties: BTreeMap<String, PropertyType>,
}

impl Hierarchy {
    pub fn new(corpus_name: impl Into<String>) -> Self {
        let builtins: BTreeMap<String, PropertyType> = ENTITY_BUILTINS
            .iter()
            .map(|(n, t)| (n.to_string(), *t))
            .collect();
        Self {
            corpus_name: corpus_name.into(),
            version: 0,
            types: BTreeMap::new(),
            speaker_properties: builtins.clone(),
            discourse_properties: builtins,
        }
    }

    fn touch(&mut self) {
        self.version += 1;
    }

    // ========================================================================
    // Annotation types
    // ========================================================================

    pub fn annotation_type(&self, name: &str) -> Option<&AnnotationType> {
        self.types.get(name)
    }

    /// Look up a type, failing with the list of declared types.
    pub fn require_type(&self, name: &str) -> Result<&AnnotationType> {
        self.types.get(name).ok_or_else(|| Error::SchemaError {
            node: format!("corpus '{}'", self.corpus_name),
            name: name.to_string(),
            alternatives: self.type_names().map(str::to_string).collect(),
        })
    }

    fn require_type_mut(&mut self, name: &str) -> Result<&mut AnnotationType> {
        self.types
            .get_mut(name)
            .ok_or_else(|| Error::HierarchyError(format!("unknown annotation type '{name}'")))
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn types(&self) -> impl Iterator<Item = &AnnotationType> {
        self.types.values()
    }

    /// Declare an annotation type contained by `supertype`.
    ///
    /// Re-declaring an existing type with the same supertype is a no-op.
    pub fn add_annotation_type(&mut self, name: &str, supertype: Option<&str>) -> Result<()> {
        if let Some(existing) = self.types.get(name) {
            if existing.supertype.as_deref() == supertype {
                return Ok(());
            }
            return Err(Error::HierarchyError(format!(
                "'{name}' is already contained by {:?}, cannot re-declare it under {:?}",
                existing.supertype, supertype
            )));
        }
        if let Some(sup) = supertype {
            if !self.types.contains_key(sup) {
                return Err(Error::HierarchyError(format!(
                    "supertype '{sup}' of '{name}' is not declared"
                )));
            }
            if sup == name {
                return Err(Error::HierarchyError(format!("'{name}' cannot contain itself")));
            }
        }
        self.types.insert(
            name.to_string(),
            AnnotationType::new(name, supertype.map(str::to_string)),
        );
        self.touch();
        Ok(())
    }

    /// Insert a new type directly above `lower`, taking over its container.
    ///
    /// `phone ⊂ word` + `insert_above("syllable", "phone")` gives
    /// `phone ⊂ syllable ⊂ word`.
    pub fn insert_above(&mut self, name: &str, lower: &str) -> Result<()> {
        if self.types.contains_key(name) {
            return Err(Error::HierarchyError(format!("'{name}' is already declared")));
        }
        let former = self.require_type_mut(lower)?.supertype.replace(name.to_string());
        self.types.insert(name.to_string(), AnnotationType::new(name, former));
        self.touch();
        Ok(())
    }

    /// Remove a type; the types it contained move up to its container.
    pub fn remove_annotation_type(&mut self, name: &str) -> Result<AnnotationType> {
        let removed = self
            .types
            .remove(name)
            .ok_or_else(|| Error::HierarchyError(format!("unknown annotation type '{name}'")))?;
        for t in self.types.values_mut() {
            if t.supertype.as_deref() == Some(name) {
                t.supertype = removed.supertype.clone();
            }
        }
        self.touch();
        Ok(removed)
    }

    pub fn supertype(&self, name: &str) -> Option<&str> {
        self.types.get(name).and_then(|t| t.supertype.as_deref())
    }

    /// Types directly contained by `name`.
    pub fn subtypes(&self, name: &str) -> Vec<&str> {
        self.types
            .values()
            .filter(|t| t.supertype.as_deref() == Some(name))
            .map(|t| t.name.as_str())
            .collect()
    }

    /// Containers of `name`, innermost first.
    pub fn ancestors(&self, name: &str) -> Vec<&str> {
        let mut out = Vec::new();
        let mut current = self.supertype(name);
        while let Some(sup) = current {
            if out.contains(&sup) || sup == name {
                break;
            }
            out.push(sup);
            current = self.supertype(sup);
        }
        out
    }

    /// Number of `contained_by` hops from a `lower` token to its `higher` container.
    pub fn depth(&self, lower: &str, higher: &str) -> Option<usize> {
        self.ancestors(lower)
            .iter()
            .position(|t| *t == higher)
            .map(|p| p + 1)
    }

    /// True if tokens of `higher` contain tokens of `lower` (at any depth).
    pub fn contains(&self, higher: &str, lower: &str) -> bool {
        self.depth(lower, higher).is_some()
    }

    /// Types with no container, sorted by name.
    pub fn highest_types(&self) -> Vec<&str> {
        self.types
            .values()
            .filter(|t| t.supertype.is_none())
            .map(|t| t.name.as_str())
            .collect()
    }

    /// Types that contain nothing, sorted by name.
    pub fn lowest_types(&self) -> Vec<&str> {
        self.types
            .keys()
            .filter(|n| self.subtypes(n).is_empty())
            .map(String::as_str)
            .collect()
    }

    /// Check the structural invariants: every supertype is declared and
    /// containment has no cycle.
    pub fn validate(&self) -> Result<()> {
        for t in self.types.values() {
            let mut seen = BTreeSet::new();
            seen.insert(t.name.as_str());
            let mut current = t.supertype.as_deref();
            while let Some(sup) = current {
                if !self.types.contains_key(sup) {
                    return Err(Error::HierarchyError(format!(
                        "'{}' is contained by undeclared type '{sup}'",
                        t.name
                    )));
                }
                if !seen.insert(sup) {
                    return Err(Error::HierarchyError(format!(
                        "containment cycle through '{}'",
                        t.name
                    )));
                }
                current = self.supertype(sup);
            }
        }
        Ok(())
    }

    // ========================================================================
    // Token / type properties
    // ========================================================================

    pub fn has_token_property(&self, type_name: &str, property: &str) -> bool {
        self.types.get(type_name).is_some_and(|t| t.has_token_property(property))
    }

    pub fn has_type_property(&self, type_name: &str, property: &str) -> bool {
        self.types.get(type_name).is_some_and(|t| t.has_type_property(property))
    }

    pub fn add_token_properties<'a>(
        &mut self,
        type_name: &str,
        properties: impl IntoIterator<Item = (&'a str, PropertyType)>,
    ) -> Result<()> {
        let t = self.require_type_mut(type_name)?;
        for (name, ptype) in properties {
            t.token_properties.insert(name.to_string(), ptype);
        }
        self.touch();
        Ok(())
    }

    /// Remove enriched token properties. Builtins (`id`, `label`, `begin`, `end`) stay.
    pub fn remove_token_properties<'a>(
        &mut self,
        type_name: &str,
        properties: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        let t = self.require_type_mut(type_name)?;
        for name in properties {
            if !AnnotationType::is_builtin_token_property(name) {
                t.token_properties.remove(name);
            }
        }
        self.touch();
        Ok(())
    }

    pub fn add_type_properties<'a>(
        &mut self,
        type_name: &str,
        properties: impl IntoIterator<Item = (&'a str, PropertyType)>,
    ) -> Result<()> {
        let t = self.require_type_mut(type_name)?;
        for (name, ptype) in properties {
            t.type_properties.insert(name.to_string(), ptype);
        }
        self.touch();
        Ok(())
    }

    pub fn remove_type_properties<'a>(
        &mut self,
        type_name: &str,
        properties: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        let t = self.require_type_mut(type_name)?;
        for name in properties {
            if !AnnotationType::is_builtin_type_property(name) {
                t.type_properties.remove(name);
            }
        }
        self.touch();
        Ok(())
    }

    // ========================================================================
    // Subsets
    // ========================================================================

    pub fn has_token_subset(&self, type_name: &str, label: &str) -> bool {
        self.types.get(type_name).is_some_and(|t| t.token_subsets.contains(label))
    }

    pub fn has_type_subset(&self, type_name: &str, label: &str) -> bool {
        self.types.get(type_name).is_some_and(|t| t.type_subsets.contains(label))
    }

    pub fn add_token_subsets<'a>(
        &mut self,
        type_name: &str,
        labels: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        let t = self.require_type_mut(type_name)?;
        t.token_subsets.extend(labels.into_iter().map(str::to_string));
        self.touch();
        Ok(())
    }

    pub fn remove_token_subsets<'a>(
        &mut self,
        type_name: &str,
        labels: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        let t = self.require_type_mut(type_name)?;
        for label in labels {
            t.token_subsets.remove(label);
        }
        self.touch();
        Ok(())
    }

    pub fn add_type_subsets<'a>(
        &mut self,
        type_name: &str,
        labels: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        let t = self.require_type_mut(type_name)?;
        t.type_subsets.extend(labels.into_iter().map(str::to_string));
        self.touch();
        Ok(())
    }

    pub fn remove_type_subsets<'a>(
        &mut self,
        type_name: &str,
        labels: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        let t = self.require_type_mut(type_name)?;
        for label in labels {
            t.type_subsets.remove(label);
        }
        self.touch();
        Ok(())
    }

    /// Whether pause encoding has run for this type.
    pub fn has_pauses(&self, type_name: &str) -> bool {
        self.has_token_subset(type_name, PAUSE_LABEL)
    }

    // ========================================================================
    // Subannotations and acoustics
    // ========================================================================

    pub fn add_subannotation_type<'a>(
        &mut self,
        parent: &str,
        name: &str,
        properties: impl IntoIterator<Item = (&'a str, PropertyType)>,
    ) -> Result<()> {
        if self.types.contains_key(name) {
            return Err(Error::HierarchyError(format!(
                "'{name}' is an annotation type and cannot also be a subannotation"
            )));
        }
        let t = self.require_type_mut(parent)?;
        let schema = t.subannotations.entry(name.to_string()).or_insert_with(|| {
            TOKEN_BUILTINS.iter().map(|(n, ty)| (n.to_string(), *ty)).collect()
        });
        for (prop, ptype) in properties {
            schema.insert(prop.to_string(), ptype);
        }
        self.touch();
        Ok(())
    }

    pub fn subannotation_properties(
        &self,
        parent: &str,
        name: &str,
    ) -> Option<&BTreeMap<String, PropertyType>> {
        self.types.get(parent).and_then(|t| t.subannotations.get(name))
    }

    pub fn add_acoustics<'a>(
        &mut self,
        type_name: &str,
        measures: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        let t = self.require_type_mut(type_name)?;
        t.acoustics.extend(measures.into_iter().map(str::to_string));
        self.touch();
        Ok(())
    }

    pub fn has_acoustic(&self, type_name: &str, measure: &str) -> bool {
        self.types.get(type_name).is_some_and(|t| t.acoustics.contains(measure))
    }

    // ========================================================================
    // Speakers / discourses
    // ========================================================================

    pub fn speaker_properties(&self) -> &BTreeMap<String, PropertyType> {
        &self.speaker_properties
    }

    pub fn discourse_properties(&self) -> &BTreeMap<String, PropertyType> {
        &self.discourse_properties
    }

    pub fn add_speaker_properties<'a>(
        &mut self,
        properties: impl IntoIterator<Item = (&'a str, PropertyType)>,
    ) {
        for (name, ptype) in properties {
            self.speaker_properties.insert(name.to_string(), ptype);
        }
        self.touch();
    }

    pub fn remove_speaker_properties<'a>(&mut self, properties: impl IntoIterator<Item = &'a str>) {
        for name in properties {
            if name != "name" {
                self.speaker_properties.remove(name);
            }
        }
        self.touch();
    }

    pub fn add_discourse_properties<'a>(
        &mut self,
        properties: impl IntoIterator<Item = (&'a str, PropertyType)>,
    ) {
        for (name, ptype) in properties {
            self.discourse_properties.insert(name.to_string(), ptype);
        }
        self.touch();
    }

    pub fn remove_discourse_properties<'a>(&mut self, properties: impl IntoIterator<Item = &'a str>) {
        for name in properties {
            if name != "name" {
                self.discourse_properties.remove(name);
            }
        }
        self.touch();
    }
}
