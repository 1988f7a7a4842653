//! Utterance encoding.
//!
//! Each speaker's words in a discourse are cut into utterances wherever the
//! silence between two speech words lasts at least `min_pause` seconds.
//! Utterances shorter than `min_utterance` are merged into the next one (the
//! last into the previous one). Pause words inside an utterance belong to
//! it; pauses at a boundary belong to none.

use std::collections::{BTreeMap, HashSet};
use std::ops::RangeInclusive;

use tracing::info;

use super::{fetch_rows, CorpusContext};
use crate::cypher::ident;
use crate::hierarchy::{PAUSE_LABEL, SPEECH_LABEL};
use crate::model::{PropertyMap, Value};
use crate::storage::Statement;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
struct WordSpan {
    id: String,
    label: String,
    begin: f64,
    end: f64,
    pause: bool,
}

/// Inclusive word index ranges of each utterance, in time order.
fn utterance_spans(words: &[WordSpan], min_pause: f64, min_utterance: f64) -> Vec<RangeInclusive<usize>> {
    let mut spans: Vec<RangeInclusive<usize>> = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    for (i, w) in words.iter().enumerate() {
        if w.pause {
            continue;
        }
        current = match current {
            Some((first, last)) if w.begin - words[last].end < min_pause => Some((first, i)),
            Some((first, last)) => {
                spans.push(first..=last);
                Some((i, i))
            }
            None => Some((i, i)),
        };
    }
    if let Some((first, last)) = current {
        spans.push(first..=last);
    }

    let duration = |r: &RangeInclusive<usize>| words[*r.end()].end - words[*r.start()].begin;
    let mut i = 0;
    while spans.len() > 1 && i < spans.len() {
        if duration(&spans[i]) >= min_utterance {
            i += 1;
            continue;
        }
        let short = spans.remove(i);
        if i < spans.len() {
            spans[i] = *short.start()..=*spans[i].end();
        } else {
            let prev = i - 1;
            spans[prev] = *spans[prev].start()..=*short.end();
        }
    }
    spans
}

fn map(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
    Value::Map(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect::<PropertyMap>())
}

impl CorpusContext {
    /// Ids of pause words, empty when pauses are not encoded.
    async fn pause_ids(&self, word_type: &str) -> Result<HashSet<String>> {
        if !self.hierarchy().has_pauses(word_type) {
            return Ok(HashSet::new());
        }
        let pauses = self.annotation(word_type)?.with_subset(PAUSE_LABEL)?;
        let rows = fetch_rows(self.query_graph(&pauses).column(pauses.attr("id")?)).await?;
        rows.iter().map(|r| r.get::<String>("id")).collect()
    }

    /// Words per (discourse, speaker), in time order.
    async fn word_spans(&self, word_type: &str) -> Result<BTreeMap<(String, String), Vec<WordSpan>>> {
        let pauses = self.pause_ids(word_type).await?;
        let word = self.annotation(word_type)?;
        let query = self
            .query_graph(&word)
            .column(word.attr("id")?.column_name("word_id"))
            .column(word.attr("label")?.column_name("word_label"))
            .column(word.attr("begin")?.column_name("word_begin"))
            .column(word.attr("end")?.column_name("word_end"))
            .column(word.attr("speaker.name")?.column_name("speaker"))
            .column(word.attr("discourse.name")?.column_name("discourse"))
            .order_by(word.attr("begin")?, false);

        let mut groups: BTreeMap<(String, String), Vec<WordSpan>> = BTreeMap::new();
        for r in fetch_rows(query).await? {
            let id: String = r.get("word_id")?;
            let key = (
                r.get::<Option<String>>("discourse")?.unwrap_or_default(),
                r.get::<Option<String>>("speaker")?.unwrap_or_default(),
            );
            groups.entry(key).or_default().push(WordSpan {
                pause: pauses.contains(&id),
                label: r.get::<Option<String>>("word_label")?.unwrap_or_default(),
                begin: r.get("word_begin")?,
                end: r.get("word_end")?,
                id,
            });
        }
        Ok(groups)
    }

    /// Insert an utterance level above words.
    pub async fn encode_utterances(&self, min_pause: f64, min_utterance: f64) -> Result<()> {
        if !(min_pause >= 0.0 && min_utterance >= 0.0) {
            return Err(Error::QueryCompositionError(format!(
                "utterance thresholds must be non-negative, got min_pause={min_pause} min_utterance={min_utterance}"
            )));
        }
        let cfg = self.config().clone();
        let (word_type, utterance_type) = (&cfg.word_type, &cfg.utterance_type);
        if self.hierarchy().has_type(utterance_type) {
            self.reset_utterances().await?;
        }
        self.hierarchy().require_type(word_type)?;
        if let Some(sup) = self.hierarchy().supertype(word_type) {
            return Err(Error::HierarchyError(format!(
                "utterances go above '{word_type}', which is already contained by '{sup}'"
            )));
        }

        let groups = self.word_spans(word_type).await?;
        let mut rows = Vec::new();
        let mut sequences = Vec::new();
        for ((discourse, speaker), words) in &groups {
            let mut sequence = Vec::new();
            for (k, span) in utterance_spans(words, min_pause, min_utterance).into_iter().enumerate() {
                let members = &words[span.clone()];
                let id = format!("{discourse}_{speaker}_{utterance_type}_{k}");
                let label = members
                    .iter()
                    .filter(|w| !w.pause)
                    .map(|w| w.label.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                rows.push(map([
                    ("id", Value::from(&id)),
                    ("label", Value::from(label)),
                    ("begin", Value::from(words[*span.start()].begin)),
                    ("end", Value::from(words[*span.end()].end)),
                    ("speaker", Value::from(speaker)),
                    ("discourse", Value::from(discourse)),
                    ("words", Value::from(members.iter().map(|w| w.id.clone()).collect::<Vec<_>>())),
                ]));
                sequence.push(id);
            }
            sequences.push(sequence);
        }

        let (w, u, c) = (ident(word_type), ident(utterance_type), self.label());
        let ut = ident(&format!("{utterance_type}_type"));
        let text = format!(
            "UNWIND $rows AS row\n\
             MATCH (s:Speaker:{c} {{name: row.speaker}}), (d:Discourse:{c} {{name: row.discourse}})\n\
             MERGE (t:{ut}:{c} {{label: row.label}})\n\
             CREATE (u:{u}:{c}:{SPEECH_LABEL} {{id: row.id, label: row.label, begin: row.begin, end: row.end}})\n\
             CREATE (u)-[:is_a]->(t), (u)-[:spoken_by]->(s), (u)-[:spoken_in]->(d)\n\
             WITH u, row\n\
             UNWIND row.words AS wid\n\
             MATCH (w:{w}:{c} {{id: wid}})\n\
             CREATE (w)-[:contained_by]->(u)"
        );
        let count = rows.len();
        self.execute_batched(&text, rows).await?;
        self.link_precedence(utterance_type, &sequences).await?;

        self.update_hierarchy(|h| h.insert_above(utterance_type, word_type))?;
        info!(corpus = %self.corpus_name(), utterances = count, min_pause, min_utterance, "utterances encoded");
        Ok(())
    }

    pub async fn reset_utterances(&self) -> Result<()> {
        let utterance_type = self.config().utterance_type.clone();
        if !self.hierarchy().has_type(&utterance_type) {
            return Ok(());
        }
        let (u, c) = (ident(&utterance_type), self.label());
        let ut = ident(&format!("{utterance_type}_type"));
        self.execute(&Statement::raw(format!("MATCH (u:{u}:{c})\nDETACH DELETE u"))).await?;
        self.execute(&Statement::raw(format!("MATCH (t:{ut}:{c})\nDETACH DELETE t"))).await?;
        self.update_hierarchy(|h| h.remove_annotation_type(&utterance_type).map(|_| ()))
    }
}
