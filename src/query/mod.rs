//! # Query Model
//!
//! Nodes, attributes and clauses describe a query over the annotation
//! graph; [`Query`] collects them and runs the compiled statement.
//!
//! ```text
//! let phone = corpus.annotation("phone")?;
//! corpus.query_graph(&phone)
//!     .filter(phone.attr("label")?.equals("aa")?)
//!     .filter(phone.attr("word.label")?.equals("cats")?)
//!     .column(phone.attr("following.label")?.column_name("next"))
//!     .all()
//!     .await?;
//! ```

pub mod aggregate;
pub mod attribute;
pub mod builder;
pub mod clause;
pub mod node;
pub mod saved;
pub mod split;

pub use aggregate::{Aggregate, AggregateFunction};
pub use attribute::{Attribute, AttributeKind, Level, TrackStat};
pub use builder::{Aggregated, Query};
pub use clause::{and_, or_, ClauseElement, CompareOp, Operand, Side};
pub use node::{NodeKey, NodeKind, PauseDirection, QueryNode, Resolution, Root, Step};
pub use saved::SavedQuery;
pub use split::{SplitBy, SplitQuery};
