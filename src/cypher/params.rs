//! Statement parameter collection.

use crate::model::{PropertyMap, Value};

use super::sanitize;

/// Collects literal values while a statement is rendered and hands out
/// unique placeholder names (`$label_0`, `$begin_1`, ...).
#[derive(Debug, Default)]
pub struct ParamSink {
    params: PropertyMap,
    counter: usize,
}

impl ParamSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` and return the placeholder to splice into the text.
    pub fn bind(&mut self, hint: &str, value: Value) -> String {
        let hint = sanitize(hint);
        let hint = if hint.is_empty() { "p".to_string() } else { hint };
        let name = format!("{hint}_{}", self.counter);
        self.counter += 1;
        self.params.insert(name.clone(), value);
        format!("${name}")
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn into_params(self) -> PropertyMap {
        self.params
    }
}
