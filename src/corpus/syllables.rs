//! Syllable encoding.
//!
//! Syllables are built per word by maximal onset: every syllabic phone is a
//! nucleus, and the consonants between two nuclei go to the following
//! syllable as long as they form an onset attested word-initially somewhere
//! in the corpus. What is left over is the coda of the previous syllable.
//!
//! A word without a syllabic phone becomes one syllable whose phones are all
//! nuclei.

use std::collections::{BTreeMap, HashSet};
use std::ops::Range;

use tracing::info;

use super::pauses::SYLLABIC_LABEL;
use super::{fetch_rows, CorpusContext};
use crate::cypher::ident;
use crate::hierarchy::{PropertyType, SPEECH_LABEL};
use crate::model::{PropertyMap, Value};
use crate::{Error, Result};

/// Phone property holding the position inside its syllable.
pub const POSITION_PROPERTY: &str = "syllable_position";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyllablePosition {
    Onset,
    Nucleus,
    Coda,
}

impl SyllablePosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyllablePosition::Onset => "onset",
            SyllablePosition::Nucleus => "nucleus",
            SyllablePosition::Coda => "coda",
        }
    }
}

/// One syllable: a range of phone indexes and each phone's position.
#[derive(Debug, Clone, PartialEq)]
pub struct Syllable {
    pub phones: Range<usize>,
    pub positions: Vec<SyllablePosition>,
}

/// Consonants before the first syllabic phone of every word that has one.
pub fn attested_onsets<'a>(
    words: impl IntoIterator<Item = &'a [String]>,
    syllabic: &HashSet<String>,
) -> HashSet<Vec<String>> {
    words
        .into_iter()
        .filter_map(|phones| {
            let first = phones.iter().position(|p| syllabic.contains(p))?;
            Some(phones[..first].to_vec())
        })
        .collect()
}

/// Split one word's phones into syllables.
pub fn syllabify(phones: &[String], syllabic: &HashSet<String>, onsets: &HashSet<Vec<String>>) -> Vec<Syllable> {
    if phones.is_empty() {
        return Vec::new();
    }
    let nuclei: Vec<usize> = (0..phones.len()).filter(|&i| syllabic.contains(&phones[i])).collect();
    if nuclei.is_empty() {
        return vec![Syllable {
            phones: 0..phones.len(),
            positions: vec![SyllablePosition::Nucleus; phones.len()],
        }];
    }

    let mut starts = vec![0];
    for pair in nuclei.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        // The earliest split leaves the longest onset; an empty onset always fits.
        let split = (prev + 1..next)
            .find(|&s| onsets.contains(&phones[s..next].to_vec()))
            .unwrap_or(next);
        starts.push(split);
    }

    starts
        .iter()
        .enumerate()
        .map(|(k, &start)| {
            let end = starts.get(k + 1).copied().unwrap_or(phones.len());
            let nucleus = nuclei[k];
            let positions = (start..end)
                .map(|i| match i.cmp(&nucleus) {
                    std::cmp::Ordering::Less => SyllablePosition::Onset,
                    std::cmp::Ordering::Equal => SyllablePosition::Nucleus,
                    std::cmp::Ordering::Greater => SyllablePosition::Coda,
                })
                .collect();
            Syllable { phones: start..end, positions }
        })
        .collect()
}

/// A word as fetched for syllabification.
struct WordPhones {
    id: String,
    speaker: String,
    discourse: String,
    ids: Vec<String>,
    labels: Vec<String>,
    begins: Vec<f64>,
    ends: Vec<f64>,
}

fn map(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
    Value::Map(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect::<PropertyMap>())
}

impl CorpusContext {
    async fn syllabic_labels(&self) -> Result<HashSet<String>> {
        let lex = self.lexicon(&self.config().phone_type)?.with_subset(SYLLABIC_LABEL)?;
        let rows = fetch_rows(self.query_lexicon(&lex).column(lex.attr("label")?)).await?;
        rows.iter().map(|r| r.get::<String>("label")).collect()
    }

    async fn word_phones(&self) -> Result<Vec<WordPhones>> {
        let cfg = self.config();
        let word = self.annotation(&cfg.word_type)?;
        let p = &cfg.phone_type;
        let query = self
            .query_graph(&word)
            .column(word.attr("id")?.column_name("id"))
            .column(word.attr("speaker.name")?.column_name("speaker"))
            .column(word.attr("discourse.name")?.column_name("discourse"))
            .column(word.attr(&format!("{p}.id"))?.column_name("phone_ids"))
            .column(word.attr(&format!("{p}.label"))?.column_name("phone_labels"))
            .column(word.attr(&format!("{p}.begin"))?.column_name("phone_begins"))
            .column(word.attr(&format!("{p}.end"))?.column_name("phone_ends"))
            .order_by(word.attr("begin")?, false);
        fetch_rows(query)
            .await?
            .iter()
            .map(|r| {
                Ok(WordPhones {
                    id: r.get("id")?,
                    speaker: r.get::<Option<String>>("speaker")?.unwrap_or_default(),
                    discourse: r.get::<Option<String>>("discourse")?.unwrap_or_default(),
                    ids: r.get("phone_ids")?,
                    labels: r.get("phone_labels")?,
                    begins: r.get("phone_begins")?,
                    ends: r.get("phone_ends")?,
                })
            })
            .collect()
    }

    /// Insert a syllable level between phones and words.
    ///
    /// Needs [`encode_syllabic_segments`](CorpusContext::encode_syllabic_segments)
    /// first. Encoding again resets the previous syllables.
    pub async fn encode_syllables(&self) -> Result<()> {
        let cfg = self.config().clone();
        let (word_type, phone_type, syllable_type) = (&cfg.word_type, &cfg.phone_type, &cfg.syllable_type);
        if self.hierarchy().has_type(syllable_type) {
            self.reset_syllables().await?;
        }
        let h = self.hierarchy();
        if !h.has_type_subset(phone_type, SYLLABIC_LABEL) {
            return Err(Error::HierarchyError(format!(
                "'{phone_type}' has no syllabic segments; encode them before syllables"
            )));
        }
        if h.supertype(phone_type) != Some(word_type.as_str()) {
            return Err(Error::HierarchyError(format!(
                "syllables need '{phone_type}' directly inside '{word_type}'"
            )));
        }

        let syllabic = self.syllabic_labels().await?;
        let words = self.word_phones().await?;
        let onsets = attested_onsets(words.iter().map(|w| w.labels.as_slice()), &syllabic);

        let mut rows = Vec::new();
        let mut sequences: BTreeMap<(&str, &str), Vec<(f64, String)>> = BTreeMap::new();
        for w in &words {
            let n = w.ids.len().min(w.labels.len()).min(w.begins.len()).min(w.ends.len());
            for (k, syl) in syllabify(&w.labels[..n], &syllabic, &onsets).into_iter().enumerate() {
                let id = format!("{}_{syllable_type}_{k}", w.id);
                let label = w.labels[syl.phones.clone()].join(".");
                let begin = w.begins[syl.phones.start];
                let phones: Vec<Value> = syl
                    .phones
                    .clone()
                    .zip(&syl.positions)
                    .map(|(i, pos)| map([("id", Value::from(&w.ids[i])), ("position", Value::from(pos.as_str()))]))
                    .collect();
                rows.push(map([
                    ("word", Value::from(&w.id)),
                    ("id", Value::from(&id)),
                    ("label", Value::from(label)),
                    ("begin", Value::from(begin)),
                    ("end", Value::from(w.ends[syl.phones.end - 1])),
                    ("phones", Value::List(phones)),
                ]));
                sequences.entry((w.discourse.as_str(), w.speaker.as_str())).or_default().push((begin, id));
            }
        }

        let (w, p, s, c) = (ident(word_type), ident(phone_type), ident(syllable_type), self.label());
        let st = ident(&format!("{syllable_type}_type"));
        let text = format!(
            "UNWIND $rows AS row\n\
             MATCH (w:{w}:{c} {{id: row.word}})-[:spoken_by]->(sp), (w)-[:spoken_in]->(d)\n\
             MERGE (t:{st}:{c} {{label: row.label}})\n\
             CREATE (s:{s}:{c}:{SPEECH_LABEL} {{id: row.id, label: row.label, begin: row.begin, end: row.end}})\n\
             CREATE (s)-[:is_a]->(t), (s)-[:contained_by]->(w), (s)-[:spoken_by]->(sp), (s)-[:spoken_in]->(d)\n\
             WITH s, w, row\n\
             UNWIND row.phones AS ph\n\
             MATCH (p:{p}:{c} {{id: ph.id}})-[r:contained_by]->(w)\n\
             DELETE r\n\
             CREATE (p)-[:contained_by]->(s)\n\
             SET p.{POSITION_PROPERTY} = ph.position"
        );
        let count = rows.len();
        self.execute_batched(&text, rows).await?;

        let sequences: Vec<Vec<String>> = sequences
            .into_values()
            .map(|mut v| {
                v.sort_by(|a, b| a.0.total_cmp(&b.0));
                v.into_iter().map(|(_, id)| id).collect()
            })
            .collect();
        self.link_precedence(syllable_type, &sequences).await?;

        self.update_hierarchy(|h| {
            h.insert_above(syllable_type, phone_type)?;
            h.add_token_properties(phone_type, [(POSITION_PROPERTY, PropertyType::String)])
        })?;
        info!(corpus = %self.corpus_name(), syllables = count, words = words.len(), "syllables encoded");
        Ok(())
    }

    /// Remove the syllable level; phones go back into their words.
    pub async fn reset_syllables(&self) -> Result<()> {
        let cfg = self.config().clone();
        let (phone_type, syllable_type) = (&cfg.phone_type, &cfg.syllable_type);
        if !self.hierarchy().has_type(syllable_type) {
            return Ok(());
        }
        let (p, s, c) = (ident(phone_type), ident(syllable_type), self.label());
        let st = ident(&format!("{syllable_type}_type"));
        let statements = [
            format!(
                "MATCH (p:{p}:{c})-[r:contained_by]->(s:{s}:{c})-[:contained_by]->(w)\n\
                 DELETE r\n\
                 CREATE (p)-[:contained_by]->(w)\n\
                 REMOVE p.{POSITION_PROPERTY}"
            ),
            format!("MATCH (s:{s}:{c})\nDETACH DELETE s"),
            format!("MATCH (t:{st}:{c})\nDETACH DELETE t"),
        ];
        for text in statements {
            self.execute(&crate::storage::Statement::raw(text)).await?;
        }
        self.update_hierarchy(|h| {
            h.remove_annotation_type(syllable_type)?;
            h.remove_token_properties(phone_type, [POSITION_PROPERTY])
        })
    }
}
