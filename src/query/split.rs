//! Queries run once per speaker or per discourse.
//!
//! Large corpora are often easier on the database in slices. A
//! [`SplitQuery`] adds a `speaker.name` (or `discourse.name`) filter to the
//! logical query and runs the partitions strictly one after another,
//! checking the cancellation predicate before each and reporting progress
//! after each.

use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

use super::aggregate::Aggregate;
use super::attribute::Attribute;
use super::builder::{register_mutation, Aggregated, Query};
use super::node::{NodeKind, QueryNode};
use crate::corpus::CorpusContext;
use crate::cypher::Mutation;
use crate::model::Value;
use crate::results::ResultSet;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitBy {
    Speaker,
    Discourse,
}

pub type CancelFn = Arc<dyn Fn() -> bool + Send + Sync>;
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

#[derive(Clone)]
pub struct SplitQuery {
    query: Query,
    by: SplitBy,
    cancel: Option<CancelFn>,
    progress: Option<ProgressFn>,
}

impl SplitQuery {
    pub fn new(query: Query, by: SplitBy) -> Self {
        Self { query, by, cancel: None, progress: None }
    }

    /// Stop before the next partition once `cancel` returns true.
    pub fn with_cancel(mut self, cancel: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.cancel = Some(Arc::new(cancel));
        self
    }

    /// Called with `(completed, total)` after every partition.
    pub fn with_progress(mut self, progress: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Apply a builder to the underlying query.
    pub fn map(mut self, f: impl FnOnce(Query) -> Query) -> Self {
        self.query = f(self.query);
        self
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    fn corpus(&self) -> Result<&CorpusContext> {
        self.query.corpus.as_ref().ok_or_else(|| {
            Error::QueryCompositionError("split query is not bound to a corpus".to_string())
        })
    }

    /// The `name` attribute of the partitioning entity, seen from the root.
    fn partition_attr(&self) -> Result<Attribute> {
        let root = &self.query.to_find;
        let entity: QueryNode = match (self.by, root.kind()) {
            (SplitBy::Speaker, NodeKind::Speaker { anchor: None }) => root.clone(),
            (SplitBy::Discourse, NodeKind::Discourse { anchor: None }) => root.clone(),
            (_, NodeKind::Annotation { .. }) => match self.by {
                SplitBy::Speaker => root.speaker()?,
                SplitBy::Discourse => root.discourse()?,
            },
            _ => {
                return Err(Error::QueryCompositionError(format!(
                    "cannot split a query on {} by {:?}",
                    root.display_path(),
                    self.by
                )));
            }
        };
        entity.attr("name")
    }

    pub async fn partitions(&self) -> Result<Vec<String>> {
        let corpus = self.corpus()?;
        match self.by {
            SplitBy::Speaker => corpus.speaker_names().await,
            SplitBy::Discourse => corpus.discourse_names().await,
        }
    }

    /// Run `step` on each partition's query. When a partition fails or the
    /// run is cancelled, the results of finished partitions and the
    /// partition total are handed to `on_abort` before the error returns.
    async fn run<T, F, Fut>(
        &self,
        mut step: F,
        on_abort: impl FnOnce(&[T], usize) -> Result<()>,
    ) -> Result<Vec<T>>
    where
        F: FnMut(Query) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attr = self.partition_attr()?;
        let names = self.partitions().await?;
        let total = names.len();
        let mut out = Vec::with_capacity(total);

        for (i, name) in names.iter().enumerate() {
            if self.cancel.as_ref().is_some_and(|c| c()) {
                warn!(completed = i, total, by = ?self.by, "split query cancelled");
                on_abort(&out, total)?;
                return Err(Error::Cancelled { completed: i, total });
            }
            let q = self.query.clone().filter(attr.equals(Value::from(name.as_str()))?);
            match step(q).await {
                Ok(value) => out.push(value),
                Err(err) => {
                    warn!(partition = %name, completed = i, total, error = %err, "split query partition failed");
                    on_abort(&out, total)?;
                    return Err(err);
                }
            }
            info!(partition = %name, completed = i + 1, total, "split query partition done");
            if let Some(progress) = &self.progress {
                progress(i + 1, total);
            }
        }
        Ok(out)
    }

    /// Every partition's rows, in partition order.
    pub async fn all(&self) -> Result<ResultSet> {
        let sets = self.run(|q| async move { q.all().await }, |_, _| Ok(())).await?;
        let mut iter = sets.into_iter();
        let Some(mut merged) = iter.next() else {
            let corpus = self.corpus()?;
            let compiled = self.query.compile()?;
            return Ok(ResultSet::new(&compiled, Vec::new(), Some(corpus.repository()), corpus.acoustics()));
        };
        for set in iter {
            merged.chain(set);
        }
        Ok(merged)
    }

    pub async fn count(&self) -> Result<u64> {
        let counts = self.run(|q| async move { q.count().await }, |_, _| Ok(())).await?;
        Ok(counts.into_iter().sum())
    }

    /// Per-partition aggregates; grouped results are concatenated.
    pub async fn aggregate(&self, functions: Vec<Aggregate>) -> Result<Vec<Aggregated>> {
        self.run(
            |q| {
                let functions = functions.clone();
                async move { q.aggregate(functions).await }
            },
            |_, _| Ok(()),
        )
        .await
    }

    async fn mutate(&self, mutation: Mutation) -> Result<u64> {
        let corpus = self.corpus()?;
        let root = self.query.to_find.root().clone();
        let filtered = !self.query.filters.is_empty();
        let register = |completed: usize, total: usize| {
            if completed == 0 {
                return Ok(());
            }
            let unfiltered = !filtered && completed == total;
            corpus
                .update_hierarchy(|h| register_mutation(h, &root, &mutation, unfiltered))
                .map(|_| ())
        };

        let counts = self
            .run(
                |q| {
                    let mutation = mutation.clone();
                    async move { q.execute_mutation(&mutation).await }
                },
                |done, total| register(done.len(), total),
            )
            .await?;
        register(counts.len(), counts.len())?;
        Ok(counts.into_iter().sum())
    }

    pub async fn set_properties<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> Result<u64>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let kv = pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self.mutate(Mutation::SetProperties(kv)).await
    }

    pub async fn create_subset(&self, label: &str) -> Result<u64> {
        self.mutate(Mutation::AddSubset(label.to_string())).await
    }

    pub async fn delete(&self) -> Result<u64> {
        self.mutate(Mutation::Delete).await
    }

    pub async fn cache(&self, attrs: Vec<Attribute>) -> Result<u64> {
        self.mutate(Mutation::Cache(attrs)).await
    }
}

impl std::fmt::Debug for SplitQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplitQuery")
            .field("query", &self.query)
            .field("by", &self.by)
            .finish()
    }
}
