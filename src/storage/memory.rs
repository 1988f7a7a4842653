//! Recording executor.
//!
//! Keeps every statement it receives and answers from a script instead of a
//! database. This is the executor the test suite runs against, and it is
//! handy for dry runs: build a query, execute it, inspect the Cypher.
//!
//! Responses are resolved in order:
//!
//! 1. a registered failure whose pattern occurs in the statement text (and,
//!    when it names a parameter value, whose parameters carry that value);
//! 2. the first rule whose pattern occurs in the statement text;
//! 3. the next queued response;
//! 4. no records.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{GraphExecutor, Record, Statement};
use crate::model::Value;
use crate::{Error, Result};

struct Failure {
    pattern: String,
    param: Option<Value>,
    message: String,
}

impl Failure {
    fn matches(&self, statement: &Statement) -> bool {
        statement.text.contains(self.pattern.as_str())
            && self
                .param
                .as_ref()
                .is_none_or(|v| statement.params.values().any(|p| p == v))
    }
}

#[derive(Default)]
struct Script {
    queue: VecDeque<Vec<Record>>,
    rules: Vec<(String, Vec<Record>)>,
    failures: Vec<Failure>,
}

/// In-memory executor that logs statements and replays scripted records.
#[derive(Clone, Default)]
pub struct RecordingExecutor {
    log: Arc<Mutex<Vec<Statement>>>,
    script: Arc<Mutex<Script>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue records for the next statement no rule answers.
    pub fn push_response(&self, records: Vec<Record>) {
        self.script.lock().queue.push_back(records);
    }

    /// Answer every statement containing `pattern` with `records`.
    pub fn respond_to(&self, pattern: &str, records: Vec<Record>) {
        self.script.lock().rules.push((pattern.to_string(), records));
    }

    /// Fail every statement containing `pattern`.
    pub fn fail_on(&self, pattern: &str, message: &str) {
        self.script.lock().failures.push(Failure {
            pattern: pattern.to_string(),
            param: None,
            message: message.to_string(),
        });
    }

    /// Fail statements containing `pattern` that bind `value` to any parameter.
    pub fn fail_on_param(&self, pattern: &str, value: impl Into<Value>, message: &str) {
        self.script.lock().failures.push(Failure {
            pattern: pattern.to_string(),
            param: Some(value.into()),
            message: message.to_string(),
        });
    }

    /// Statements received so far, oldest first.
    pub fn statements(&self) -> Vec<Statement> {
        self.log.lock().clone()
    }

    pub fn last_statement(&self) -> Option<Statement> {
        self.log.lock().last().cloned()
    }

    pub fn statement_count(&self) -> usize {
        self.log.lock().len()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }
}

#[async_trait]
impl GraphExecutor for RecordingExecutor {
    async fn execute(&self, statement: &Statement) -> Result<Vec<Record>> {
        self.log.lock().push(statement.clone());

        let mut script = self.script.lock();
        if let Some(failure) = script.failures.iter().find(|f| f.matches(statement)) {
            return Err(Error::StorageError(failure.message.clone()));
        }
        if let Some((_, records)) = script
            .rules
            .iter()
            .find(|(p, _)| statement.text.contains(p.as_str()))
        {
            return Ok(records.clone());
        }
        Ok(script.queue.pop_front().unwrap_or_default())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_order() {
        let exec = RecordingExecutor::new();
        exec.push_response(vec![Record::from_pairs([("count", Value::from(1))])]);
        exec.respond_to("RETURN 2", vec![Record::from_pairs([("count", Value::from(2))])]);
        exec.fail_on("DELETE", "constraint violated");

        let ruled = exec.execute(&Statement::raw("RETURN 2")).await.unwrap();
        assert_eq!(ruled[0].get("count"), Some(&Value::Int(2)));

        let queued = exec.execute(&Statement::raw("RETURN 1")).await.unwrap();
        assert_eq!(queued[0].get("count"), Some(&Value::Int(1)));

        let empty = exec.execute(&Statement::raw("RETURN 1")).await.unwrap();
        assert!(empty.is_empty());

        let err = exec.execute(&Statement::raw("MATCH (n) DETACH DELETE n")).await;
        assert!(matches!(err, Err(Error::StorageError(m)) if m == "constraint violated"));
        assert_eq!(exec.statement_count(), 4);
    }

    #[tokio::test]
    async fn test_failure_keyed_on_parameter() {
        let exec = RecordingExecutor::new();
        exec.fail_on_param("SET", "s2", "deadlock");

        let first = Statement::raw("MATCH (n) SET n.x = 1").with_param("name", "s1");
        assert!(exec.execute(&first).await.is_ok());
        let second = Statement::raw("MATCH (n) SET n.x = 1").with_param("name", "s2");
        assert!(matches!(exec.execute(&second).await, Err(Error::StorageError(m)) if m == "deadlock"));
    }

    #[tokio::test]
    async fn test_clones_share_log() {
        let exec = RecordingExecutor::new();
        let other = exec.clone();
        other.execute(&Statement::raw("RETURN 1")).await.unwrap();
        assert_eq!(exec.last_statement().map(|s| s.text), Some("RETURN 1".to_string()));
    }
}
