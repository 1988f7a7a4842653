//! # Corpus Sessions
//!
//! A [`CorpusContext`] ties one corpus name to a graph executor, a hierarchy
//! store and (optionally) an acoustic source. It hands out root nodes and
//! queries bound to itself, runs every statement the query layer produces,
//! and owns the hierarchy snapshot those queries resolve against.
//!
//! Schema changes are copy-on-write: [`CorpusContext::update_hierarchy`]
//! edits a clone, persists it, then swaps it in. Nodes built before the swap
//! keep the snapshot they were built from.
//!
//! Bulk operations live in submodules:
//!
//! | Module | Operations |
//! |--------|------------|
//! | `import` | `add_discourse` |
//! | `pauses` | `encode_pauses`, `encode_syllabic_segments` and their resets |
//! | `syllables` | `encode_syllables`, `reset_syllables` |
//! | `utterances` | `encode_utterances`, `reset_utterances` |

pub mod import;
pub mod pauses;
pub mod syllables;
pub mod utterances;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::acoustics::AcousticSource;
use crate::config::{BackendConfig, CorpusConfig};
use crate::cypher::{ident, CompileOptions};
use crate::hierarchy::{Hierarchy, HierarchyStore, JsonFileStore, MemoryStore};
use crate::model::Value;
use crate::query::{Query, QueryNode, SplitBy, SplitQuery};
use crate::results::{Annotation, AnnotationRepository, Relation, ResultRow, Row};
use crate::storage::{GraphExecutor, Record, RecordingExecutor, Statement};
use crate::{Error, Result};

pub use import::{DiscourseData, LevelData, TokenData};

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`CorpusContext`]. Anything not supplied is derived from the
/// configuration: the executor from `backend`, the store from
/// `hierarchy_dir`.
pub struct CorpusBuilder {
    config: CorpusConfig,
    executor: Option<Arc<dyn GraphExecutor>>,
    store: Option<Arc<dyn HierarchyStore>>,
    acoustics: Option<Arc<dyn AcousticSource>>,
}

impl CorpusBuilder {
    pub fn executor(mut self, executor: Arc<dyn GraphExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn store(mut self, store: Arc<dyn HierarchyStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn acoustics(mut self, acoustics: Arc<dyn AcousticSource>) -> Self {
        self.acoustics = Some(acoustics);
        self
    }

    pub fn build(self) -> Result<CorpusContext> {
        self.config.validate()?;
        let executor = match self.executor {
            Some(e) => e,
            None => executor_for(&self.config.backend)?,
        };
        let store: Arc<dyn HierarchyStore> = match (self.store, &self.config.hierarchy_dir) {
            (Some(s), _) => s,
            (None, Some(dir)) => Arc::new(JsonFileStore::new(dir.clone())),
            (None, None) => Arc::new(MemoryStore::new()),
        };
        let hierarchy = match store.load(&self.config.corpus_name)? {
            Some(h) => {
                h.validate()?;
                h
            }
            None => Hierarchy::new(self.config.corpus_name.clone()),
        };
        tracing::debug!(
            corpus = %self.config.corpus_name,
            executor = executor.name(),
            version = hierarchy.version,
            "corpus session opened"
        );
        Ok(CorpusContext {
            inner: Arc::new(CorpusInner {
                config: self.config,
                executor,
                store,
                hierarchy: RwLock::new(Arc::new(hierarchy)),
                acoustics: self.acoustics,
            }),
        })
    }
}

fn executor_for(backend: &BackendConfig) -> Result<Arc<dyn GraphExecutor>> {
    match backend {
        BackendConfig::Recording => Ok(Arc::new(RecordingExecutor::new())),
        #[cfg(feature = "http")]
        BackendConfig::Http { uri, user, password, database } => {
            let config = crate::storage::HttpConfig {
                uri: uri.clone(),
                user: user.clone(),
                password: password.clone(),
                database: database.clone(),
                ..Default::default()
            };
            Ok(Arc::new(crate::storage::HttpExecutor::new(config)?))
        }
    }
}

// ============================================================================
// CorpusContext
// ============================================================================

struct CorpusInner {
    config: CorpusConfig,
    executor: Arc<dyn GraphExecutor>,
    store: Arc<dyn HierarchyStore>,
    hierarchy: RwLock<Arc<Hierarchy>>,
    acoustics: Option<Arc<dyn AcousticSource>>,
}

/// One open corpus. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct CorpusContext {
    inner: Arc<CorpusInner>,
}

impl CorpusContext {
    pub fn builder(config: CorpusConfig) -> CorpusBuilder {
        CorpusBuilder { config, executor: None, store: None, acoustics: None }
    }

    /// Open a session with everything derived from `config`.
    pub fn open(config: CorpusConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &CorpusConfig {
        &self.inner.config
    }

    pub fn corpus_name(&self) -> &str {
        &self.inner.config.corpus_name
    }

    /// The current hierarchy snapshot.
    pub fn hierarchy(&self) -> Arc<Hierarchy> {
        self.inner.hierarchy.read().clone()
    }

    pub fn executor(&self) -> &Arc<dyn GraphExecutor> {
        &self.inner.executor
    }

    pub(crate) fn compile_options(&self) -> CompileOptions {
        CompileOptions { max_pause_span: self.inner.config.max_pause_span }
    }

    pub(crate) fn repository(&self) -> Arc<dyn AnnotationRepository> {
        Arc::new(self.clone())
    }

    pub(crate) fn acoustics(&self) -> Option<Arc<dyn AcousticSource>> {
        self.inner.acoustics.clone()
    }

    /// Corpus name as a Cypher label.
    pub(crate) fn label(&self) -> String {
        ident(self.corpus_name())
    }

    // ========================================================================
    // Nodes and queries
    // ========================================================================

    /// Root node over the tokens of `type_name`.
    pub fn annotation(&self, type_name: &str) -> Result<QueryNode> {
        QueryNode::annotation(self.hierarchy(), type_name)
    }

    /// Root node over the type (lexicon) nodes of `type_name`.
    pub fn lexicon(&self, type_name: &str) -> Result<QueryNode> {
        QueryNode::lexicon(self.hierarchy(), type_name)
    }

    pub fn speakers(&self) -> QueryNode {
        QueryNode::speakers(self.hierarchy())
    }

    pub fn discourses(&self) -> QueryNode {
        QueryNode::discourses(self.hierarchy())
    }

    pub fn query_graph(&self, node: &QueryNode) -> Query {
        Query::new(node.clone()).bind(self.clone())
    }

    pub fn query_lexicon(&self, node: &QueryNode) -> Query {
        Query::new(node.clone()).bind(self.clone())
    }

    pub fn query_speakers(&self) -> Query {
        Query::new(self.speakers()).bind(self.clone())
    }

    pub fn query_discourses(&self) -> Query {
        Query::new(self.discourses()).bind(self.clone())
    }

    /// Run `query` once per speaker or discourse.
    pub fn split_query(&self, query: Query, by: SplitBy) -> SplitQuery {
        SplitQuery::new(query.bind(self.clone()), by)
    }

    /// Names of every speaker, sorted.
    pub async fn speaker_names(&self) -> Result<Vec<String>> {
        let speakers = self.speakers();
        self.entity_names(self.query_speakers(), &speakers).await
    }

    /// Names of every discourse, sorted.
    pub async fn discourse_names(&self) -> Result<Vec<String>> {
        let discourses = self.discourses();
        self.entity_names(self.query_discourses(), &discourses).await
    }

    async fn entity_names(&self, query: Query, node: &QueryNode) -> Result<Vec<String>> {
        let name = node.attr("name")?;
        let rows = fetch_rows(query.column(name.clone()).order_by(name, false)).await?;
        rows.iter().map(|r| r.get::<String>("name")).collect()
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Run one statement. Executor failures come back as
    /// [`Error::DatabaseExecutionError`] carrying the statement text.
    pub async fn execute(&self, statement: &Statement) -> Result<Vec<Record>> {
        if self.inner.config.debug {
            tracing::debug!(target: "annograph::statement", statement = %statement.to_debug_string(), "executing");
        } else {
            tracing::debug!(
                target: "annograph::statement",
                statement = %statement.text,
                params = ?statement.params,
                "executing"
            );
        }
        self.inner
            .executor
            .execute(statement)
            .await
            .map_err(|e| Error::DatabaseExecutionError {
                message: e.to_string(),
                statement: statement.text.clone(),
            })
    }

    /// Run `text` once per batch of `rows`, bound as `$rows`.
    pub(crate) async fn execute_batched(&self, text: &str, rows: Vec<Value>) -> Result<()> {
        let size = self.inner.config.batch_size.max(1);
        for chunk in rows.chunks(size) {
            let statement = Statement::raw(text).with_param("rows", Value::List(chunk.to_vec()));
            self.execute(&statement).await?;
        }
        Ok(())
    }

    /// Create `precedes` edges along each sequence of token ids.
    pub(crate) async fn link_precedence(&self, type_name: &str, sequences: &[Vec<String>]) -> Result<()> {
        let rows: Vec<Value> = sequences
            .iter()
            .flat_map(|ids| ids.windows(2))
            .map(|pair| {
                Value::Map(
                    [("from".to_string(), Value::from(&pair[0])), ("to".to_string(), Value::from(&pair[1]))]
                        .into_iter()
                        .collect(),
                )
            })
            .collect();
        if rows.is_empty() {
            return Ok(());
        }
        let (t, c) = (ident(type_name), self.label());
        let text = format!(
            "UNWIND $rows AS row\n\
             MATCH (a:{t}:{c} {{id: row.from}}), (b:{t}:{c} {{id: row.to}})\n\
             CREATE (a)-[:precedes]->(b)"
        );
        self.execute_batched(&text, rows).await
    }

    // ========================================================================
    // Hierarchy
    // ========================================================================

    /// Apply `f` to a copy of the hierarchy, persist it, then make it current.
    /// Nothing changes if `f` or the store fails.
    pub fn update_hierarchy<T>(&self, f: impl FnOnce(&mut Hierarchy) -> Result<T>) -> Result<T> {
        let mut guard = self.inner.hierarchy.write();
        let mut next = (**guard).clone();
        let out = f(&mut next)?;
        if next != **guard {
            next.validate()?;
            self.inner.store.save(&next)?;
            tracing::debug!(corpus = %next.corpus_name, version = next.version, "hierarchy updated");
            *guard = Arc::new(next);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for CorpusContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorpusContext")
            .field("corpus", &self.inner.config.corpus_name)
            .field("executor", &self.inner.executor.name())
            .field("version", &self.inner.hierarchy.read().version)
            .finish()
    }
}

/// Column rows of a query, in order.
pub(crate) async fn fetch_rows(query: Query) -> Result<Vec<Row>> {
    Ok(query
        .all()
        .await?
        .into_rows()
        .await?
        .into_iter()
        .filter_map(ResultRow::into_row)
        .collect())
}

// ============================================================================
// Repository
// ============================================================================

#[async_trait]
impl AnnotationRepository for CorpusContext {
    /// Re-query the annotation by id with the relation preloaded.
    async fn related(&self, annotation: &Annotation, relation: &Relation) -> Result<Vec<Annotation>> {
        let id = annotation
            .id()
            .ok_or_else(|| Error::NotFound(format!("{} annotation without an id", annotation.type_name())))?;
        let root = self.annotation(annotation.type_name())?;
        let target = match relation {
            Relation::Previous => root.previous()?,
            Relation::Following => root.following()?,
            Relation::Container(t) | Relation::Contained(t) | Relation::SubAnnotations(t) => root.node(t)?,
        };
        let query = self
            .query_graph(&root)
            .filter(root.attr("id")?.equals(id)?)
            .preload(target)
            .limit(1);
        let found = query.all().await?.annotations().await?;
        Ok(found
            .into_iter()
            .next()
            .and_then(|mut a| a.take_preloaded(relation))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::PropertyType;

    fn corpus() -> (CorpusContext, RecordingExecutor) {
        let exec = RecordingExecutor::new();
        let ctx = CorpusContext::builder(CorpusConfig::new("test"))
            .executor(Arc::new(exec.clone()))
            .build()
            .unwrap();
        ctx.update_hierarchy(|h| {
            h.add_annotation_type("word", None)?;
            h.add_annotation_type("phone", Some("word"))
        })
        .unwrap();
        (ctx, exec)
    }

    #[test]
    fn test_update_hierarchy_is_copy_on_write() {
        let (ctx, _) = corpus();
        let before = ctx.hierarchy();
        let phone = ctx.annotation("phone").unwrap();
        ctx.update_hierarchy(|h| h.add_token_properties("phone", [("stress", PropertyType::Int)]))
            .unwrap();
        assert!(!before.has_token_property("phone", "stress"));
        assert!(ctx.hierarchy().has_token_property("phone", "stress"));
        assert!(phone.attr("stress").is_err());
        assert!(ctx.annotation("phone").unwrap().attr("stress").is_ok());
    }

    #[test]
    fn test_failed_update_keeps_snapshot() {
        let (ctx, _) = corpus();
        let version = ctx.hierarchy().version;
        let err = ctx.update_hierarchy(|h| h.add_annotation_type("syllable", Some("nope")));
        assert!(err.is_err());
        assert_eq!(ctx.hierarchy().version, version);
    }

    #[test]
    fn test_hierarchy_reloaded_from_store() {
        let store: Arc<dyn HierarchyStore> = Arc::new(MemoryStore::new());
        let first = CorpusContext::builder(CorpusConfig::new("test")).store(store.clone()).build().unwrap();
        first.update_hierarchy(|h| h.add_annotation_type("word", None)).unwrap();

        let second = CorpusContext::builder(CorpusConfig::new("test")).store(store).build().unwrap();
        assert!(second.hierarchy().has_type("word"));
    }

    #[tokio::test]
    async fn test_execution_errors_carry_statement() {
        let (ctx, exec) = corpus();
        exec.fail_on("MATCH", "connection reset");
        let err = ctx.execute(&Statement::raw("MATCH (n) RETURN n")).await.unwrap_err();
        match err {
            Error::DatabaseExecutionError { message, statement } => {
                assert!(message.contains("connection reset"));
                assert_eq!(statement, "MATCH (n) RETURN n");
            }
            other => panic!("expected DatabaseExecutionError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_speaker_names() {
        let (ctx, exec) = corpus();
        exec.respond_to(
            "Speaker",
            vec![Record::from_pairs([("name", "s1")]), Record::from_pairs([("name", "s2")])],
        );
        assert_eq!(ctx.speaker_names().await.unwrap(), vec!["s1", "s2"]);
        let text = exec.last_statement().unwrap().text;
        assert!(text.contains("ORDER BY"), "{text}");
    }

    #[tokio::test]
    async fn test_batched_execution() {
        let exec = RecordingExecutor::new();
        let mut config = CorpusConfig::new("test");
        config.batch_size = 2;
        let ctx = CorpusContext::builder(config).executor(Arc::new(exec.clone())).build().unwrap();
        ctx.execute_batched("UNWIND $rows AS row RETURN row", (0..5).map(Value::from).collect())
            .await
            .unwrap();
        let sizes: Vec<usize> = exec
            .statements()
            .iter()
            .map(|s| s.params["rows"].as_list().map_or(0, <[Value]>::len))
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_repository_fetches_container() {
        let (ctx, exec) = corpus();
        let word = Value::Map([("id".to_string(), Value::from("w1")), ("label".to_string(), Value::from("cats"))].into_iter().collect());
        let phone = Value::Map([("id".to_string(), Value::from("p1"))].into_iter().collect());
        exec.respond_to(
            "container__word",
            vec![Record::from_pairs([("annotation", phone.clone()), ("container__word", word)])],
        );
        let a = Annotation::new("phone", phone.as_map().cloned().unwrap_or_default());
        let found = ctx.related(&a, &Relation::Container("word".into())).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].label(), Some("cats"));
        let text = exec.last_statement().unwrap().text;
        assert!(text.contains("LIMIT"), "{text}");
    }
}
