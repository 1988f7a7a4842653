//! Pause and syllabic-segment encoding.
//!
//! Pauses are word tokens whose label is one of a caller-supplied set
//! (`<SIL>`, `sp`, `{LG}`...). Encoding swaps their `speech` label for
//! `pause` and links every speech token to the next speech token across a
//! run of pauses with a `precedes_pause` edge, which is what
//! `follows_pause`, `precedes_pause` and the pause-path collections query.

use tracing::info;

use super::CorpusContext;
use crate::cypher::ident;
use crate::hierarchy::{PAUSE_LABEL, SPEECH_LABEL};
use crate::model::Value;
use crate::storage::Statement;
use crate::{Error, Result};

/// Type subset marking syllabic phones.
pub const SYLLABIC_LABEL: &str = "syllabic";

impl CorpusContext {
    /// Mark word tokens labelled with any of `labels` as pauses. Re-encoding
    /// resets the previous encoding first.
    pub async fn encode_pauses(&self, labels: &[&str]) -> Result<()> {
        let word_type = self.config().word_type.clone();
        self.hierarchy().require_type(&word_type)?;
        if self.hierarchy().has_pauses(&word_type) {
            self.reset_pauses().await?;
        }
        let (w, c) = (ident(&word_type), self.label());
        let labels: Vec<Value> = labels.iter().map(|l| Value::from(*l)).collect();

        let relabel = Statement::raw(format!(
            "MATCH (n:{w}:{c})\n\
             WHERE n.label IN $labels\n\
             REMOVE n:{SPEECH_LABEL}\n\
             SET n:{PAUSE_LABEL}"
        ))
        .with_param("labels", Value::List(labels));
        self.execute(&relabel).await?;

        let span = self.config().max_pause_span.max(2);
        let link = Statement::raw(format!(
            "MATCH p = (a:{w}:{c}:{SPEECH_LABEL})-[:precedes*2..{span}]->(b:{w}:{c}:{SPEECH_LABEL})\n\
             WHERE ALL(n IN nodes(p)[1..-1] WHERE n:{PAUSE_LABEL})\n\
             CREATE (a)-[:precedes_pause]->(b)"
        ));
        self.execute(&link).await?;

        self.update_hierarchy(|h| h.add_token_subsets(&word_type, [PAUSE_LABEL]))?;
        info!(corpus = %self.corpus_name(), type_name = %word_type, "pauses encoded");
        Ok(())
    }

    pub async fn reset_pauses(&self) -> Result<()> {
        let word_type = self.config().word_type.clone();
        let (w, c) = (ident(&word_type), self.label());
        self.execute(&Statement::raw(format!(
            "MATCH (:{w}:{c})-[r:precedes_pause]->()\nDELETE r"
        )))
        .await?;
        self.execute(&Statement::raw(format!(
            "MATCH (n:{w}:{c}:{PAUSE_LABEL})\nREMOVE n:{PAUSE_LABEL}\nSET n:{SPEECH_LABEL}"
        )))
        .await?;
        self.update_hierarchy(|h| {
            if h.has_pauses(&word_type) {
                h.remove_token_subsets(&word_type, [PAUSE_LABEL])?;
            }
            Ok(())
        })
    }

    /// Mark the phone types labelled with any of `labels` as syllabic.
    pub async fn encode_syllabic_segments(&self, labels: &[&str]) -> Result<()> {
        let phone_type = self.config().phone_type.clone();
        self.hierarchy().require_type(&phone_type)?;
        if labels.is_empty() {
            return Err(Error::QueryCompositionError("no syllabic segment labels given".to_string()));
        }
        self.reset_syllabic_segments().await?;
        let (tt, c) = (ident(&format!("{phone_type}_type")), self.label());
        let statement = Statement::raw(format!(
            "MATCH (t:{tt}:{c})\nWHERE t.label IN $labels\nSET t:{SYLLABIC_LABEL}"
        ))
        .with_param("labels", Value::from(labels.to_vec()));
        self.execute(&statement).await?;
        self.update_hierarchy(|h| h.add_type_subsets(&phone_type, [SYLLABIC_LABEL]))
    }

    pub async fn reset_syllabic_segments(&self) -> Result<()> {
        let phone_type = self.config().phone_type.clone();
        let (tt, c) = (ident(&format!("{phone_type}_type")), self.label());
        self.execute(&Statement::raw(format!(
            "MATCH (t:{tt}:{c}:{SYLLABIC_LABEL})\nREMOVE t:{SYLLABIC_LABEL}"
        )))
        .await?;
        self.update_hierarchy(|h| {
            if h.has_type_subset(&phone_type, SYLLABIC_LABEL) {
                h.remove_type_subsets(&phone_type, [SYLLABIC_LABEL])?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::CorpusConfig;
    use crate::storage::RecordingExecutor;

    fn corpus() -> (CorpusContext, RecordingExecutor) {
        let exec = RecordingExecutor::new();
        let ctx = CorpusContext::builder(CorpusConfig::new("test"))
            .executor(Arc::new(exec.clone()))
            .build()
            .unwrap();
        ctx.update_hierarchy(|h| {
            h.add_annotation_type("word", None)?;
            h.add_annotation_type("phone", Some("word"))
        })
        .unwrap();
        (ctx, exec)
    }

    #[tokio::test]
    async fn test_encode_pauses() {
        let (ctx, exec) = corpus();
        ctx.encode_pauses(&["<SIL>", "sp"]).await.unwrap();
        let statements = exec.statements();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].params["labels"], Value::from(vec!["<SIL>", "sp"]));
        assert!(statements[1].text.contains("[:precedes*2..15]"));
        assert!(statements[1].text.contains("CREATE (a)-[:precedes_pause]->(b)"));
        assert!(ctx.hierarchy().has_pauses("word"));

        // A second encoding starts from a reset.
        exec.clear();
        ctx.encode_pauses(&["<SIL>"]).await.unwrap();
        assert_eq!(exec.statement_count(), 4);
        assert!(exec.statements()[0].text.contains("DELETE r"));
    }

    #[tokio::test]
    async fn test_reset_pauses() {
        let (ctx, _) = corpus();
        ctx.encode_pauses(&["sp"]).await.unwrap();
        ctx.reset_pauses().await.unwrap();
        assert!(!ctx.hierarchy().has_pauses("word"));
        assert!(ctx.annotation("word").unwrap().node("following_pause").is_err());
    }

    #[tokio::test]
    async fn test_syllabic_segments() {
        let (ctx, exec) = corpus();
        ctx.encode_syllabic_segments(&["aa", "ae"]).await.unwrap();
        assert!(ctx.hierarchy().has_type_subset("phone", SYLLABIC_LABEL));
        let last = exec.last_statement().unwrap();
        assert!(last.text.starts_with("MATCH (t:phone_type:test)"));
        assert!(last.text.ends_with("SET t:syllabic"));

        ctx.reset_syllabic_segments().await.unwrap();
        assert!(!ctx.hierarchy().has_type_subset("phone", SYLLABIC_LABEL));
    }
}
