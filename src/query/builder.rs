//! The query object.
//!
//! A [`Query`] is a plain value: the node to find plus filters, columns,
//! ordering, grouping and preloads. Builders consume and return it. Terminal
//! operations compile it and run it through the corpus it is bound to.

use crate::corpus::CorpusContext;
use crate::cypher::{self, CompileOptions, CompiledQuery, Mutation, Projection};
use crate::hierarchy::{Hierarchy, PropertyType};
use crate::model::Value;
use crate::planner::{self, PlanInput, QueryPlan};
use crate::results::{ResultSet, Row};
use crate::{Error, Result};

use super::aggregate::Aggregate;
use super::attribute::Attribute;
use super::clause::ClauseElement;
use super::node::{QueryNode, Root};

/// Result of [`Query::aggregate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregated {
    /// No group_by: one row of aggregates.
    Single(Row),
    /// One row per group, group keys first.
    Groups(Vec<Row>),
}

impl Aggregated {
    pub fn rows(&self) -> &[Row] {
        match self {
            Aggregated::Single(r) => std::slice::from_ref(r),
            Aggregated::Groups(rows) => rows,
        }
    }
}

#[derive(Clone)]
pub struct Query {
    pub(crate) to_find: QueryNode,
    pub(crate) filters: Vec<ClauseElement>,
    pub(crate) columns: Vec<Attribute>,
    /// `(attribute, descending)`
    pub(crate) order_by: Vec<(Attribute, bool)>,
    pub(crate) group_by: Vec<Attribute>,
    pub(crate) preload: Vec<QueryNode>,
    pub(crate) limit: Option<usize>,
    pub(crate) offset: Option<usize>,
    pub(crate) corpus: Option<CorpusContext>,
}

impl Query {
    /// An unbound query; terminal operations need [`Query::bind`].
    pub fn new(to_find: QueryNode) -> Self {
        Self {
            to_find,
            filters: Vec::new(),
            columns: Vec::new(),
            order_by: Vec::new(),
            group_by: Vec::new(),
            preload: Vec::new(),
            limit: None,
            offset: None,
            corpus: None,
        }
    }

    pub fn bind(mut self, corpus: CorpusContext) -> Self {
        self.corpus = Some(corpus);
        self
    }

    // ========================================================================
    // Builders
    // ========================================================================

    pub fn filter(mut self, clause: ClauseElement) -> Self {
        self.filters.push(clause);
        self
    }

    pub fn filters(mut self, clauses: impl IntoIterator<Item = ClauseElement>) -> Self {
        self.filters.extend(clauses);
        self
    }

    pub fn column(mut self, attr: Attribute) -> Self {
        self.columns.push(attr);
        self
    }

    pub fn columns(mut self, attrs: impl IntoIterator<Item = Attribute>) -> Self {
        self.columns.extend(attrs);
        self
    }

    pub fn order_by(mut self, attr: Attribute, descending: bool) -> Self {
        self.order_by.push((attr, descending));
        self
    }

    pub fn group_by(mut self, attr: Attribute) -> Self {
        self.group_by.push(attr);
        self
    }

    /// Fetch a related node alongside each hydrated annotation.
    pub fn preload(mut self, node: QueryNode) -> Self {
        if !self.preload.contains(&node) {
            self.preload.push(node);
        }
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: usize) -> Self {
        self.offset = Some(n);
        self
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn to_find(&self) -> &QueryNode {
        &self.to_find
    }

    pub fn filter_clauses(&self) -> &[ClauseElement] {
        &self.filters
    }

    pub fn column_attributes(&self) -> &[Attribute] {
        &self.columns
    }

    fn plan(&self) -> Result<QueryPlan> {
        let input = PlanInput {
            to_find: &self.to_find,
            filters: &self.filters,
            required: self.order_by.iter().map(|(a, _)| a).collect(),
            outputs: self.columns.iter().collect(),
            preload: &self.preload,
            hydrate: self.columns.is_empty() && matches!(self.to_find.root(), Root::Annotation(_)),
        };
        planner::plan(&input)
    }

    /// Nodes bound by the top-level MATCH.
    pub fn required_nodes(&self) -> Result<Vec<QueryNode>> {
        Ok(self.plan()?.required)
    }

    /// Scalar nodes bound by OPTIONAL MATCH.
    pub fn optional_nodes(&self) -> Result<Vec<QueryNode>> {
        Ok(self.plan()?.optional_nodes().cloned().collect())
    }

    /// Collections and their positional views.
    pub fn collection_nodes(&self) -> Result<Vec<QueryNode>> {
        let plan = self.plan()?;
        Ok(plan.collections.into_iter().chain(plan.positional).collect())
    }

    // ========================================================================
    // Compilation
    // ========================================================================

    fn options(&self) -> CompileOptions {
        self.corpus
            .as_ref()
            .map(CorpusContext::compile_options)
            .unwrap_or_default()
    }

    /// The row-returning statement, without executing it.
    pub fn compile(&self) -> Result<CompiledQuery> {
        self.compile_as(&Projection::Rows)
    }

    pub fn compile_as(&self, projection: &Projection) -> Result<CompiledQuery> {
        cypher::compile(self, projection, &self.options())
    }

    fn corpus(&self) -> Result<&CorpusContext> {
        self.corpus.as_ref().ok_or_else(|| {
            Error::QueryCompositionError(format!(
                "query on {} is not bound to a corpus",
                self.to_find.display_path()
            ))
        })
    }

    // ========================================================================
    // Terminal operations
    // ========================================================================

    pub async fn all(&self) -> Result<ResultSet> {
        let corpus = self.corpus()?;
        let compiled = self.compile()?;
        let records = corpus.execute(&compiled.statement).await?;
        Ok(ResultSet::new(
            &compiled,
            records,
            Some(corpus.repository()),
            corpus.acoustics(),
        ))
    }

    /// Number of matches; columns, ordering and paging are ignored.
    pub async fn count(&self) -> Result<u64> {
        let corpus = self.corpus()?;
        let compiled = self.compile_as(&Projection::Count)?;
        let records = corpus.execute(&compiled.statement).await?;
        read_count(&records, cypher::compiler::COUNT_COLUMN)
    }

    pub async fn aggregate(&self, functions: Vec<Aggregate>) -> Result<Aggregated> {
        let corpus = self.corpus()?;
        let compiled = self.compile_as(&Projection::Aggregate(functions))?;
        let records = corpus.execute(&compiled.statement).await?;
        let columns: std::sync::Arc<[String]> = compiled.columns.clone().into();
        let mut rows: Vec<Row> = records
            .into_iter()
            .map(|r| Row::new(columns.clone(), columns.iter().map(|c| r.value(c)).collect()))
            .collect();
        if !self.group_by.is_empty() {
            return Ok(Aggregated::Groups(rows));
        }
        if rows.is_empty() {
            // Aggregating over no rows still yields one row.
            let values = vec![Value::Null; columns.len()];
            rows.push(Row::new(columns, values));
        }
        Ok(Aggregated::Single(rows.swap_remove(0)))
    }

    pub async fn set_properties<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> Result<u64>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let kv = pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self.mutate(Mutation::SetProperties(kv)).await
    }

    pub async fn remove_properties<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<u64> {
        let names = names.into_iter().map(str::to_string).collect();
        self.mutate(Mutation::RemoveProperties(names)).await
    }

    pub async fn create_subset(&self, label: &str) -> Result<u64> {
        self.mutate(Mutation::AddSubset(label.to_string())).await
    }

    pub async fn remove_subset(&self, label: &str) -> Result<u64> {
        self.mutate(Mutation::RemoveSubset(label.to_string())).await
    }

    /// Detach and delete every match.
    pub async fn delete(&self) -> Result<u64> {
        self.mutate(Mutation::Delete).await
    }

    /// Store computed attributes on the matches, named by their output alias.
    pub async fn cache(&self, attrs: Vec<Attribute>) -> Result<u64> {
        self.mutate(Mutation::Cache(attrs)).await
    }

    async fn mutate(&self, mutation: Mutation) -> Result<u64> {
        let affected = self.execute_mutation(&mutation).await?;
        let unfiltered = self.filters.is_empty();
        self.corpus()?
            .update_hierarchy(|h| register_mutation(h, self.to_find.root(), &mutation, unfiltered))?;
        Ok(affected)
    }

    /// Run a mutation without touching the schema.
    pub(crate) async fn execute_mutation(&self, mutation: &Mutation) -> Result<u64> {
        let corpus = self.corpus()?;
        let compiled = self.compile_as(&Projection::Mutation(mutation.clone()))?;
        let records = corpus.execute(&compiled.statement).await?;
        read_count(&records, cypher::compiler::AFFECTED_COLUMN)
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("to_find", &self.to_find)
            .field("filters", &self.filters)
            .field("columns", &self.columns)
            .field("order_by", &self.order_by)
            .field("group_by", &self.group_by)
            .field("preload", &self.preload)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .finish()
    }
}

fn read_count(records: &[crate::storage::Record], column: &str) -> Result<u64> {
    match records.first().and_then(|r| r.get(column)) {
        None | Some(Value::Null) => Ok(0),
        Some(v) => v
            .as_int()
            .and_then(|i| u64::try_from(i).ok())
            .ok_or_else(|| Error::TypeError { expected: "non-negative Integer".into(), got: v.type_name().into() }),
    }
}

/// Record what a successful mutation did to the schema.
///
/// Removals only unregister when the query matched every node of the root,
/// since filtered removals leave the property or subset on other nodes.
pub(crate) fn register_mutation(h: &mut Hierarchy, root: &Root, mutation: &Mutation, unfiltered: bool) -> Result<()> {
    match mutation {
        Mutation::SetProperties(kv) => {
            let props: Vec<(String, PropertyType)> = kv
                .iter()
                .filter_map(|(k, v)| PropertyType::of(v).map(|t| (k.clone(), t)))
                .collect();
            add_properties(h, root, &props)
        }
        Mutation::Cache(attrs) => {
            let props: Vec<(String, PropertyType)> =
                attrs.iter().map(|a| (a.output_name(), a.value_type())).collect();
            add_properties(h, root, &props)
        }
        Mutation::RemoveProperties(names) if unfiltered => {
            let names = names.iter().map(String::as_str);
            match root {
                Root::Annotation(t) => h.remove_token_properties(t, names),
                Root::Lexicon(t) => h.remove_type_properties(t, names),
                Root::Speakers => {
                    h.remove_speaker_properties(names);
                    Ok(())
                }
                Root::Discourses => {
                    h.remove_discourse_properties(names);
                    Ok(())
                }
            }
        }
        Mutation::AddSubset(label) => match root {
            Root::Annotation(t) => h.add_token_subsets(t, [label.as_str()]),
            Root::Lexicon(t) => h.add_type_subsets(t, [label.as_str()]),
            _ => Ok(()),
        },
        Mutation::RemoveSubset(label) if unfiltered => match root {
            Root::Annotation(t) => h.remove_token_subsets(t, [label.as_str()]),
            Root::Lexicon(t) => h.remove_type_subsets(t, [label.as_str()]),
            _ => Ok(()),
        },
        Mutation::RemoveProperties(_) | Mutation::RemoveSubset(_) | Mutation::Delete => Ok(()),
    }
}

fn add_properties(h: &mut Hierarchy, root: &Root, props: &[(String, PropertyType)]) -> Result<()> {
    if props.is_empty() {
        return Ok(());
    }
    let iter = props.iter().map(|(k, t)| (k.as_str(), *t));
    match root {
        Root::Annotation(t) => h.add_token_properties(t, iter),
        Root::Lexicon(t) => h.add_type_properties(t, iter),
        Root::Speakers => {
            h.add_speaker_properties(iter);
            Ok(())
        }
        Root::Discourses => {
            h.add_discourse_properties(iter);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn hierarchy() -> Arc<Hierarchy> {
        let mut h = Hierarchy::new("test");
        h.add_annotation_type("word", None).unwrap();
        h.add_annotation_type("phone", Some("word")).unwrap();
        Arc::new(h)
    }

    #[test]
    fn test_node_classification() {
        let phone = QueryNode::annotation(hierarchy(), "phone").unwrap();
        let q = Query::new(phone.clone())
            .filter(phone.attr("word.label").unwrap().equals("cats").unwrap())
            .column(phone.attr("following.label").unwrap())
            .column(phone.attr("word.phone.count").unwrap());

        let required = q.required_nodes().unwrap();
        assert!(required.contains(&phone));
        assert!(required.contains(&phone.node("word").unwrap()));
        assert_eq!(q.optional_nodes().unwrap(), vec![phone.following().unwrap()]);
        assert_eq!(q.collection_nodes().unwrap(), vec![phone.node("word.phone").unwrap()]);
    }

    #[tokio::test]
    async fn test_unbound_query() {
        let phone = QueryNode::annotation(hierarchy(), "phone").unwrap();
        let err = Query::new(phone).count().await.unwrap_err();
        assert!(matches!(err, Error::QueryCompositionError(_)));
    }

    #[test]
    fn test_register_set_and_filtered_remove() {
        let mut h = (*hierarchy()).clone();
        let root = Root::Annotation("word".into());
        let set = Mutation::SetProperties(vec![("stress".into(), Value::from(1)), ("gone".into(), Value::Null)]);
        register_mutation(&mut h, &root, &set, false).unwrap();
        assert!(h.has_token_property("word", "stress"));
        assert!(!h.has_token_property("word", "gone"));

        let remove = Mutation::RemoveProperties(vec!["stress".into()]);
        register_mutation(&mut h, &root, &remove, false).unwrap();
        assert!(h.has_token_property("word", "stress"));
        register_mutation(&mut h, &root, &remove, true).unwrap();
        assert!(!h.has_token_property("word", "stress"));
    }

    #[test]
    fn test_register_lexicon_subset() {
        let mut h = (*hierarchy()).clone();
        register_mutation(&mut h, &Root::Lexicon("phone".into()), &Mutation::AddSubset("stop".into()), true).unwrap();
        assert!(h.has_type_subset("phone", "stop"));
        assert!(!h.has_token_subset("phone", "stop"));
    }
}
