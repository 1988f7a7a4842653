//! Neo4j transactional HTTP executor.
//!
//! Posts statements to `/db/{database}/tx/commit`, one request per batch,
//! so a batch commits or fails as a whole.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GraphExecutor, Record, Statement};
use crate::model::Value;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Base URL, e.g. `http://localhost:7474`.
    pub uri: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            uri: "http://localhost:7474".to_string(),
            database: "neo4j".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
            timeout_secs: 60,
        }
    }
}

#[derive(Serialize)]
struct TxRequest<'a> {
    statements: Vec<TxStatement<'a>>,
}

#[derive(Serialize)]
struct TxStatement<'a> {
    statement: &'a str,
    parameters: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Deserialize)]
struct TxResult {
    columns: Vec<String>,
    data: Vec<TxRow>,
}

#[derive(Deserialize)]
struct TxRow {
    row: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct TxError {
    code: String,
    message: String,
}

pub struct HttpExecutor {
    client: reqwest::Client,
    config: HttpConfig,
}

impl HttpExecutor {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::StorageError(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/db/{}/tx/commit",
            self.config.uri.trim_end_matches('/'),
            self.config.database
        )
    }

    async fn post(&self, statements: &[Statement]) -> Result<Vec<Vec<Record>>> {
        let body = TxRequest {
            statements: statements
                .iter()
                .map(|s| TxStatement {
                    statement: &s.text,
                    parameters: s
                        .params
                        .iter()
                        .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                        .collect(),
                })
                .collect(),
        };

        tracing::debug!(url = %self.endpoint(), statements = statements.len(), "posting to neo4j");
        let response = self
            .client
            .post(self.endpoint())
            .basic_auth(&self.config.user, Some(&self.config.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::StorageError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::StorageError(format!("HTTP {status}: {text}")));
        }
        let parsed: TxResponse = response
            .json()
            .await
            .map_err(|e| Error::StorageError(e.to_string()))?;

        if let Some(err) = parsed.errors.first() {
            return Err(Error::StorageError(format!("{}: {}", err.code, err.message)));
        }
        Ok(parsed
            .results
            .into_iter()
            .map(|r| {
                r.data
                    .into_iter()
                    .map(|row| Record::new(r.columns.clone(), row.row.into_iter().map(Value::from).collect()))
                    .collect()
            })
            .collect())
    }
}

#[async_trait]
impl GraphExecutor for HttpExecutor {
    async fn execute(&self, statement: &Statement) -> Result<Vec<Record>> {
        let mut results = self.post(std::slice::from_ref(statement)).await?;
        Ok(results.pop().unwrap_or_default())
    }

    async fn execute_batch(&self, statements: &[Statement]) -> Result<Vec<Vec<Record>>> {
        if statements.is_empty() {
            return Ok(Vec::new());
        }
        self.post(statements).await
    }

    fn name(&self) -> &str {
        "neo4j-http"
    }
}
