//! # Value Model
//!
//! Plain data shared by every layer: statement parameters, returned records,
//! hydrated annotations. No I/O, no state, no async.

pub mod value;
pub mod property_map;

pub use value::Value;
pub use property_map::{PropertyMap, properties};
