//! # annograph: annotation graph queries for speech corpora
//!
//! Phones, syllables, words and utterances of a speech corpus live in a
//! property graph, linked by time (`precedes`), containment
//! (`contained_by`) and speaker/discourse edges. annograph lets you describe
//! what you are looking for with typed nodes and attributes, checks every
//! name against the corpus hierarchy, and compiles the result to Cypher.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `GraphExecutor` is the contract between the query layer and the database
//! 2. **Names fail early**: nodes resolve against a hierarchy snapshot, never in the database
//! 3. **Compilation is pure**: query → plan → Cypher AST → text + parameters, no I/O
//! 4. **Schema follows data**: the hierarchy only changes after a statement succeeded
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use annograph::{CorpusConfig, CorpusContext};
//!
//! # async fn example() -> annograph::Result<()> {
//! let corpus = CorpusContext::open(CorpusConfig::new("buckeye"))?;
//!
//! let phone = corpus.annotation("phone")?;
//! let mut results = corpus
//!     .query_graph(&phone)
//!     .filter(phone.attr("label")?.equals("aa")?)
//!     .filter(phone.attr("word.label")?.equals("cats")?)
//!     .column(phone.attr("following.label")?.column_name("next"))
//!     .all()
//!     .await?;
//!
//! for row in results.rows().await? {
//!     println!("{:?}", row.as_row().map(|r| r.get::<String>("next")));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Executors
//!
//! | Executor | Feature | Description |
//! |----------|---------|-------------|
//! | `RecordingExecutor` | (default) | Statement log and scripted records for tests and dry runs |
//! | `HttpExecutor` | `http` | Neo4j transactional HTTP endpoint |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod hierarchy;
pub mod query;
pub mod cypher;
pub mod planner;
pub mod storage;
pub mod results;
pub mod acoustics;
pub mod corpus;
pub mod config;

// ============================================================================
// Re-exports: Model
// ============================================================================

pub use model::{PropertyMap, Value};

// ============================================================================
// Re-exports: Hierarchy
// ============================================================================

pub use hierarchy::{AnnotationType, Hierarchy, HierarchyStore, JsonFileStore, MemoryStore, PropertyType};

// ============================================================================
// Re-exports: Queries
// ============================================================================

pub use query::{
    and_, or_, Aggregate, AggregateFunction, Aggregated, Attribute, ClauseElement, Query, QueryNode,
    SavedQuery, SplitBy, SplitQuery,
};
pub use cypher::{CompiledQuery, Projection};

// ============================================================================
// Re-exports: Storage and results
// ============================================================================

pub use storage::{GraphExecutor, Record, RecordingExecutor, Statement};
#[cfg(feature = "http")]
pub use storage::{HttpConfig, HttpExecutor};
pub use results::{Annotation, AnnotationRepository, ResultRow, ResultSet, Row, Track};
pub use acoustics::{AcousticSource, MemoryAcoustics, TrackRequest};

// ============================================================================
// Re-exports: Corpus sessions
// ============================================================================

pub use corpus::{CorpusBuilder, CorpusContext, DiscourseData};
pub use config::{BackendConfig, CorpusConfig};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Schema error: '{name}' is not valid on {node}; expected one of: {}", alternatives.join(", "))]
    SchemaError { node: String, name: String, alternatives: Vec<String> },

    #[error("Subset error: '{label}' is not a subset of {type_name}; declared: {}", declared.join(", "))]
    SubsetError { type_name: String, label: String, declared: Vec<String> },

    #[error("Query composition error: {0}")]
    QueryCompositionError(String),

    #[error("Database execution error: {message}\n  statement: {statement}")]
    DatabaseExecutionError { message: String, statement: String },

    #[error("Parse error in {source_name}: {message}")]
    ParseError { source_name: String, message: String },

    #[error("Hierarchy error: {0}")]
    HierarchyError(String),

    #[error("Cancelled after {completed} of {total} partitions")]
    Cancelled { completed: usize, total: usize },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
