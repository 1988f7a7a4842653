//! # Graph Executor Trait
//!
//! The contract between annograph and whatever runs Cypher. The query layer
//! only ever produces [`Statement`]s and consumes [`Record`]s; it never sees
//! connections, sessions or drivers.
//!
//! ## Implementations
//!
//! | Executor | Module | Description |
//! |----------|--------|-------------|
//! | `RecordingExecutor` | `memory` | Logs statements, replays scripted records |
//! | `HttpExecutor` | `http` | Neo4j transactional HTTP endpoint (`http` feature) |

pub mod memory;
#[cfg(feature = "http")]
pub mod http;

use std::fmt;

use async_trait::async_trait;

use crate::cypher::literal;
use crate::model::{PropertyMap, Value};
use crate::{Error, Result};

pub use memory::RecordingExecutor;
#[cfg(feature = "http")]
pub use http::{HttpConfig, HttpExecutor};

// ============================================================================
// Statements
// ============================================================================

/// A parameterized Cypher statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    pub text: String,
    pub params: PropertyMap,
}

impl Statement {
    pub fn new(text: impl Into<String>, params: PropertyMap) -> Self {
        Self { text: text.into(), params }
    }

    /// A statement without parameters.
    pub fn raw(text: impl Into<String>) -> Self {
        Self::new(text, PropertyMap::new())
    }

    pub fn with_param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    /// The text with every parameter inlined as a literal. Only meant for
    /// logs and error messages; never send this to a database.
    pub fn to_debug_string(&self) -> String {
        let mut names: Vec<&String> = self.params.keys().collect();
        // Longest first so `$p_1` never clobbers the prefix of `$p_10`.
        names.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        let mut text = self.text.clone();
        for name in names {
            text = text.replace(&format!("${name}"), &literal(&self.params[name]));
        }
        text
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

// ============================================================================
// Records
// ============================================================================

/// One returned record, column values in statement order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

impl Record {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Build a record from `(column, value)` pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let (columns, values) = pairs.into_iter().map(|(k, v)| (k.into(), v.into())).unzip();
        Self { columns, values }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.iter().position(|c| c == column).map(|i| &self.values[i])
    }

    /// The column's value, or `Null` when absent.
    pub fn value(&self, column: &str) -> Value {
        self.get(column).cloned().unwrap_or(Value::Null)
    }

    pub fn require(&self, column: &str) -> Result<&Value> {
        self.get(column)
            .ok_or_else(|| Error::NotFound(format!("Column '{column}'")))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ============================================================================
// Executor trait
// ============================================================================

/// Runs Cypher statements.
///
/// Implementations must be safe to share between the tasks of a split
/// query; the query layer holds them behind `Arc<dyn GraphExecutor>`.
#[async_trait]
pub trait GraphExecutor: Send + Sync + 'static {
    /// Run one statement and collect every record.
    async fn execute(&self, statement: &Statement) -> Result<Vec<Record>>;

    /// Run statements in order inside one transaction where the backend
    /// supports it. The default runs them one by one.
    async fn execute_batch(&self, statements: &[Statement]) -> Result<Vec<Vec<Record>>> {
        let mut out = Vec::with_capacity(statements.len());
        for s in statements {
            out.push(self.execute(s).await?);
        }
        Ok(out)
    }

    /// A short name used in log lines.
    fn name(&self) -> &str {
        "executor"
    }
}
