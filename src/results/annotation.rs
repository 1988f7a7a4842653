//! Hydrated annotations.
//!
//! Queries without explicit columns return whole tokens. Relations of a
//! token (neighbours, containers, contained tokens, subannotations) come from
//! preloaded columns when the query asked for them and are otherwise fetched
//! through the [`AnnotationRepository`] the result set was built with.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::model::{PropertyMap, Value};
use crate::{Error, Result};

/// How one annotation relates to another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Relation {
    Previous,
    Following,
    /// The container of the named higher type.
    Container(String),
    /// Tokens of the named lower type, in time order.
    Contained(String),
    SubAnnotations(String),
}

impl Relation {
    /// Result column carrying the preloaded relation.
    pub fn column(&self) -> String {
        match self {
            Relation::Previous => "previous".to_string(),
            Relation::Following => "following".to_string(),
            Relation::Container(t) => format!("container__{t}"),
            Relation::Contained(t) => format!("contained__{t}"),
            Relation::SubAnnotations(t) => format!("subannotations__{t}"),
        }
    }

    /// Whether the relation yields at most one annotation.
    pub fn is_single(&self) -> bool {
        matches!(self, Relation::Previous | Relation::Following | Relation::Container(_))
    }

    /// Type name of the annotations on the other end, given the source type.
    pub fn target_type<'a>(&'a self, source: &'a str) -> &'a str {
        match self {
            Relation::Previous | Relation::Following => source,
            Relation::Container(t) | Relation::Contained(t) | Relation::SubAnnotations(t) => t,
        }
    }
}

/// Fetches related annotations that were not preloaded.
#[async_trait]
pub trait AnnotationRepository: Send + Sync {
    async fn related(&self, annotation: &Annotation, relation: &Relation) -> Result<Vec<Annotation>>;
}

/// One token with its properties, type properties and entity names.
#[derive(Clone)]
pub struct Annotation {
    type_name: String,
    properties: PropertyMap,
    type_properties: PropertyMap,
    labels: Vec<String>,
    speaker: Option<String>,
    discourse: Option<String>,
    preloaded: HashMap<Relation, Vec<Annotation>>,
    repository: Option<Arc<dyn AnnotationRepository>>,
}

impl Annotation {
    pub fn new(type_name: impl Into<String>, properties: PropertyMap) -> Self {
        Self {
            type_name: type_name.into(),
            properties,
            type_properties: PropertyMap::new(),
            labels: Vec::new(),
            speaker: None,
            discourse: None,
            preloaded: HashMap::new(),
            repository: None,
        }
    }

    pub fn with_type_properties(mut self, props: PropertyMap) -> Self {
        self.type_properties = props;
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_entities(mut self, speaker: Option<String>, discourse: Option<String>) -> Self {
        self.speaker = speaker;
        self.discourse = discourse;
        self
    }

    pub fn with_repository(mut self, repository: Arc<dyn AnnotationRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub(crate) fn preload(&mut self, relation: Relation, annotations: Vec<Annotation>) {
        self.preloaded.insert(relation, annotations);
    }

    pub(crate) fn take_preloaded(&mut self, relation: &Relation) -> Option<Vec<Annotation>> {
        self.preloaded.remove(relation)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn id(&self) -> Option<&str> {
        self.properties.get("id").and_then(Value::as_str)
    }

    pub fn label(&self) -> Option<&str> {
        self.properties.get("label").and_then(Value::as_str)
    }

    pub fn begin(&self) -> Option<f64> {
        self.properties.get("begin").and_then(Value::as_float)
    }

    pub fn end(&self) -> Option<f64> {
        self.properties.get("end").and_then(Value::as_float)
    }

    pub fn duration(&self) -> Option<f64> {
        Some(self.end()? - self.begin()?)
    }

    /// A token property, falling back to the type's properties.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name).or_else(|| self.type_properties.get(name))
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    pub fn type_properties(&self) -> &PropertyMap {
        &self.type_properties
    }

    /// Node labels as stored, including subset labels.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn in_subset(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn speaker(&self) -> Option<&str> {
        self.speaker.as_deref()
    }

    pub fn discourse(&self) -> Option<&str> {
        self.discourse.as_deref()
    }

    pub fn is_preloaded(&self, relation: &Relation) -> bool {
        self.preloaded.contains_key(relation)
    }

    async fn fetch(&self, relation: Relation) -> Result<Vec<Annotation>> {
        if let Some(found) = self.preloaded.get(&relation) {
            return Ok(found.clone());
        }
        let repo = self.repository.as_ref().ok_or_else(|| {
            Error::NotFound(format!(
                "'{}' of {} was not preloaded and no repository is attached",
                relation.column(),
                self.type_name
            ))
        })?;
        repo.related(self, &relation).await
    }

    pub async fn previous(&self) -> Result<Option<Annotation>> {
        Ok(self.fetch(Relation::Previous).await?.into_iter().next())
    }

    pub async fn following(&self) -> Result<Option<Annotation>> {
        Ok(self.fetch(Relation::Following).await?.into_iter().next())
    }

    pub async fn container(&self, type_name: &str) -> Result<Option<Annotation>> {
        Ok(self
            .fetch(Relation::Container(type_name.to_string()))
            .await?
            .into_iter()
            .next())
    }

    pub async fn contained(&self, type_name: &str) -> Result<Vec<Annotation>> {
        self.fetch(Relation::Contained(type_name.to_string())).await
    }

    pub async fn subannotations(&self, type_name: &str) -> Result<Vec<Annotation>> {
        self.fetch(Relation::SubAnnotations(type_name.to_string())).await
    }
}

impl PartialEq for Annotation {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name
            && self.properties == other.properties
            && self.type_properties == other.type_properties
    }
}

impl fmt::Debug for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Annotation")
            .field("type_name", &self.type_name)
            .field("properties", &self.properties)
            .field("speaker", &self.speaker)
            .field("discourse", &self.discourse)
            .field("preloaded", &self.preloaded.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name)?;
        if let Some(label) = self.label() {
            write!(f, " '{label}'")?;
        }
        if let (Some(b), Some(e)) = (self.begin(), self.end()) {
            write!(f, " [{b}, {e}]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::properties;
    use parking_lot::Mutex;

    struct Canned {
        calls: Mutex<Vec<Relation>>,
    }

    #[async_trait]
    impl AnnotationRepository for Canned {
        async fn related(&self, a: &Annotation, relation: &Relation) -> Result<Vec<Annotation>> {
            self.calls.lock().push(relation.clone());
            let t = relation.target_type(a.type_name()).to_string();
            Ok(vec![Annotation::new(t, properties([("label", "k")]))])
        }
    }

    fn cats() -> Annotation {
        Annotation::new(
            "word",
            properties([("label", Value::from("cats")), ("begin", Value::from(0.0)), ("end", Value::from(0.5))]),
        )
    }

    #[tokio::test]
    async fn test_preloaded_relation_skips_repository() {
        let repo = Arc::new(Canned { calls: Mutex::new(Vec::new()) });
        let mut a = cats().with_repository(repo.clone());
        a.preload(Relation::Following, vec![Annotation::new("word", properties([("label", "are")]))]);

        let next = a.following().await.unwrap().unwrap();
        assert_eq!(next.label(), Some("are"));
        assert!(repo.calls.lock().is_empty());

        let phones = a.contained("phone").await.unwrap();
        assert_eq!(phones[0].type_name(), "phone");
        assert_eq!(*repo.calls.lock(), vec![Relation::Contained("phone".to_string())]);
    }

    #[tokio::test]
    async fn test_missing_repository() {
        let err = cats().previous().await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_accessors() {
        let a = cats().with_type_properties(properties([("frequency", 12)]));
        assert_eq!(a.duration(), Some(0.5));
        assert_eq!(a.get("frequency"), Some(&Value::Int(12)));
        assert_eq!(a.to_string(), "word 'cats' [0, 0.5]");
        assert_eq!(Relation::Container("word".into()).column(), "container__word");
    }
}
