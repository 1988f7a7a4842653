//! Column rows and typed value access.

use std::sync::Arc;

use super::track::Track;
use crate::model::{PropertyMap, Value};
use crate::{Error, Result};

/// One result row: values in column order, plus the merged acoustic track
/// when the query returned track columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
    track: Option<Track>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values, track: None }
    }

    pub(crate) fn with_track(mut self, track: Option<Track>) -> Self {
        self.track = track;
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, column: &str) -> Option<&Value> {
        self.columns.iter().position(|c| c == column).map(|i| &self.values[i])
    }

    /// Get a typed value from the row.
    pub fn get<T: FromValue>(&self, column: &str) -> Result<T> {
        let val = self
            .value(column)
            .ok_or_else(|| Error::NotFound(format!("Column '{column}'")))?;
        T::from_value(val)
    }

    pub fn track(&self) -> Option<&Track> {
        self.track.as_ref()
    }
}

/// Convert from Value to concrete types.
pub trait FromValue: Sized {
    fn from_value(val: &Value) -> Result<Self>;
}

fn type_error(expected: &str, val: &Value) -> Error {
    Error::TypeError { expected: expected.into(), got: val.type_name().into() }
}

impl FromValue for Value {
    fn from_value(val: &Value) -> Result<Self> {
        Ok(val.clone())
    }
}

impl FromValue for String {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::String(s) => Ok(s.clone()),
            _ => Err(type_error("String", val)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_int().ok_or_else(|| type_error("Integer", val))
    }
}

impl FromValue for u64 {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_int()
            .and_then(|i| u64::try_from(i).ok())
            .ok_or_else(|| type_error("non-negative Integer", val))
    }
}

impl FromValue for f64 {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_float().ok_or_else(|| type_error("Float", val))
    }
}

impl FromValue for bool {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_bool().ok_or_else(|| type_error("Boolean", val))
    }
}

impl FromValue for PropertyMap {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_map().cloned().ok_or_else(|| type_error("Map", val))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::Null => Ok(None),
            v => T::from_value(v).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_list()
            .ok_or_else(|| type_error("List", val))?
            .iter()
            .map(T::from_value)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Row {
        let columns: Arc<[String]> = vec!["label".to_string(), "count".to_string(), "phones".to_string()].into();
        Row::new(
            columns,
            vec![Value::from("cats"), Value::from(4), Value::from(vec!["k", "ae"])],
        )
    }

    #[test]
    fn test_typed_access() {
        let r = row();
        assert_eq!(r.get::<String>("label").unwrap(), "cats");
        assert_eq!(r.get::<i64>("count").unwrap(), 4);
        assert_eq!(r.get::<f64>("count").unwrap(), 4.0);
        assert_eq!(r.get::<Vec<String>>("phones").unwrap(), vec!["k", "ae"]);
        assert_eq!(r.get::<Option<String>>("label").unwrap().as_deref(), Some("cats"));
    }

    #[test]
    fn test_type_mismatch() {
        let err = row().get::<bool>("label").unwrap_err();
        assert!(matches!(err, Error::TypeError { .. }));
        assert!(matches!(row().get::<String>("nope"), Err(Error::NotFound(_))));
    }
}
