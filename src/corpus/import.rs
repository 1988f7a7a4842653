//! Discourse import.
//!
//! A [`DiscourseData`] describes one recording: its speakers, and the tokens
//! of every annotation level from the highest type down. Each level names
//! the type containing it, and each token names its container by id.
//!
//! ```json
//! {
//!   "name": "cats",
//!   "speakers": {"s1": {"gender": "f"}},
//!   "levels": [
//!     {"type_name": "word", "tokens": [
//!       {"id": "w1", "label": "cats", "begin": 0.0, "end": 0.4, "speaker": "s1"}
//!     ]},
//!     {"type_name": "phone", "supertype": "word", "tokens": [
//!       {"label": "k", "begin": 0.0, "end": 0.1, "speaker": "s1", "container": "w1"}
//!     ]}
//!   ]
//! }
//! ```
//!
//! Tokens without an id get `<discourse>_<type>_<n>`. Nothing is written
//! unless the whole description is consistent with itself and with the
//! corpus hierarchy.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::CorpusContext;
use crate::cypher::ident;
use crate::hierarchy::{Hierarchy, PropertyType, SPEECH_LABEL};
use crate::model::{PropertyMap, Value};
use crate::storage::Statement;
use crate::{Error, Result};

type JsonMap = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscourseData {
    pub name: String,
    #[serde(default)]
    pub properties: JsonMap,
    /// Speaker name → speaker properties.
    #[serde(default)]
    pub speakers: BTreeMap<String, JsonMap>,
    /// Highest type first.
    pub levels: Vec<LevelData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelData {
    pub type_name: String,
    #[serde(default)]
    pub supertype: Option<String>,
    pub tokens: Vec<TokenData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenData {
    #[serde(default)]
    pub id: Option<String>,
    pub label: String,
    pub begin: f64,
    pub end: f64,
    pub speaker: String,
    /// Id of the containing token on the supertype level.
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub properties: JsonMap,
    #[serde(default)]
    pub type_properties: JsonMap,
}

fn json_map(map: &JsonMap) -> Value {
    Value::Map(map.iter().map(|(k, v)| (k.clone(), Value::from(v.clone()))).collect())
}

/// Declared types of every non-null property across `maps`.
fn schema<'a>(maps: impl Iterator<Item = &'a JsonMap>) -> BTreeMap<String, PropertyType> {
    let mut out = BTreeMap::new();
    for map in maps {
        for (k, v) in map {
            if let Some(t) = PropertyType::of(&Value::from(v.clone())) {
                out.entry(k.clone()).or_insert(t);
            }
        }
    }
    out
}

impl DiscourseData {
    pub fn from_json_str(source_name: &str, text: &str) -> Result<Self> {
        let data: Self = serde_json::from_str(text).map_err(|e| Error::ParseError {
            source_name: source_name.to_string(),
            message: e.to_string(),
        })?;
        data.check(source_name)?;
        Ok(data)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&path.display().to_string(), &text)
    }

    fn token_id(&self, level: &LevelData, index: usize) -> String {
        match &level.tokens[index].id {
            Some(id) => id.clone(),
            None => format!("{}_{}_{index}", self.name, level.type_name),
        }
    }

    /// Internal consistency: spans, speakers, containers, duplicate ids.
    fn check(&self, source_name: &str) -> Result<()> {
        let fail = |message: String| Error::ParseError { source_name: source_name.to_string(), message };
        if self.name.is_empty() {
            return Err(fail("discourse name is empty".to_string()));
        }
        let mut ids: HashMap<&str, HashSet<String>> = HashMap::new();
        for level in &self.levels {
            // A supertype missing from the file must already exist in the corpus.
            if let Some(sup) = &level.supertype {
                let in_file = self.levels.iter().any(|l| &l.type_name == sup);
                if in_file && !ids.contains_key(sup.as_str()) {
                    return Err(fail(format!(
                        "level '{}' is listed before its supertype '{sup}'",
                        level.type_name
                    )));
                }
            }
            let mut seen = HashSet::new();
            for (i, t) in level.tokens.iter().enumerate() {
                let id = self.token_id(level, i);
                if t.begin > t.end {
                    return Err(fail(format!("{} token '{id}' ends before it begins", level.type_name)));
                }
                if !self.speakers.is_empty() && !self.speakers.contains_key(&t.speaker) {
                    return Err(fail(format!("{} token '{id}' has undeclared speaker '{}'", level.type_name, t.speaker)));
                }
                if let (Some(sup), Some(c)) = (&level.supertype, &t.container) {
                    if ids.get(sup.as_str()).is_some_and(|known| !known.contains(c)) {
                        return Err(fail(format!("{} token '{id}' names unknown container '{c}'", level.type_name)));
                    }
                }
                if !seen.insert(id.clone()) {
                    return Err(fail(format!("duplicate {} id '{id}'", level.type_name)));
                }
            }
            ids.insert(level.type_name.as_str(), seen);
        }
        Ok(())
    }

    fn speaker_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .levels
            .iter()
            .flat_map(|l| l.tokens.iter().map(|t| t.speaker.clone()))
            .chain(self.speakers.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Declare the types and properties this discourse introduces.
    pub(crate) fn register(&self, h: &mut Hierarchy) -> Result<()> {
        for level in &self.levels {
            h.add_annotation_type(&level.type_name, level.supertype.as_deref())?;
            let tokens = schema(level.tokens.iter().map(|t| &t.properties));
            if !tokens.is_empty() {
                h.add_token_properties(&level.type_name, tokens.iter().map(|(k, t)| (k.as_str(), *t)))?;
            }
            let types = schema(level.tokens.iter().map(|t| &t.type_properties));
            if !types.is_empty() {
                h.add_type_properties(&level.type_name, types.iter().map(|(k, t)| (k.as_str(), *t)))?;
            }
        }
        let speakers = schema(self.speakers.values());
        if !speakers.is_empty() {
            h.add_speaker_properties(speakers.iter().map(|(k, t)| (k.as_str(), *t)));
        }
        let discourse = schema(std::iter::once(&self.properties));
        if !discourse.is_empty() {
            h.add_discourse_properties(discourse.iter().map(|(k, t)| (k.as_str(), *t)));
        }
        Ok(())
    }

    fn token_rows(&self, level: &LevelData) -> Vec<Value> {
        level
            .tokens
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let row: PropertyMap = [
                    ("id", Value::from(self.token_id(level, i))),
                    ("label", Value::from(t.label.as_str())),
                    ("begin", Value::from(t.begin)),
                    ("end", Value::from(t.end)),
                    ("speaker", Value::from(t.speaker.as_str())),
                    ("container", Value::from(t.container.clone())),
                    ("properties", json_map(&t.properties)),
                    ("type_properties", json_map(&t.type_properties)),
                ]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();
                Value::Map(row)
            })
            .collect()
    }

    /// Token ids per speaker, in time order.
    fn sequences(&self, level: &LevelData) -> Vec<Vec<String>> {
        let mut by_speaker: BTreeMap<&str, Vec<(f64, String)>> = BTreeMap::new();
        for (i, t) in level.tokens.iter().enumerate() {
            by_speaker.entry(t.speaker.as_str()).or_default().push((t.begin, self.token_id(level, i)));
        }
        by_speaker
            .into_values()
            .map(|mut tokens| {
                tokens.sort_by(|a, b| a.0.total_cmp(&b.0));
                tokens.into_iter().map(|(_, id)| id).collect()
            })
            .collect()
    }
}

fn create_tokens(type_name: &str, supertype: Option<&str>, corpus: &str) -> String {
    let t = ident(type_name);
    let tt = ident(&format!("{type_name}_type"));
    let mut text = format!(
        "UNWIND $rows AS row\n\
         MATCH (s:Speaker:{corpus} {{name: row.speaker}}), (d:Discourse:{corpus} {{name: $discourse}})\n\
         MERGE (t:{tt}:{corpus} {{label: row.label}})\n\
         SET t += row.type_properties\n\
         CREATE (n:{t}:{corpus}:{SPEECH_LABEL} {{id: row.id, label: row.label, begin: row.begin, end: row.end}})\n\
         SET n += row.properties\n\
         CREATE (n)-[:is_a]->(t), (n)-[:spoken_by]->(s), (n)-[:spoken_in]->(d)"
    );
    if let Some(sup) = supertype {
        text.push_str(&format!(
            "\nWITH n, row WHERE row.container IS NOT NULL\n\
             MATCH (c:{}:{corpus} {{id: row.container}})\n\
             CREATE (n)-[:contained_by]->(c)",
            ident(sup)
        ));
    }
    text
}

impl CorpusContext {
    /// Write one discourse and declare what it adds to the hierarchy.
    pub async fn add_discourse(&self, data: &DiscourseData) -> Result<()> {
        data.check(&data.name)?;
        // Dry run so schema conflicts fail before anything is written.
        let mut preview = (*self.hierarchy()).clone();
        data.register(&mut preview)?;
        preview.validate()?;

        let corpus = self.label();
        info!(discourse = %data.name, levels = data.levels.len(), "importing discourse");

        let discourse = Statement::raw(format!(
            "MERGE (d:Discourse:{corpus} {{name: $discourse}})\nSET d += $properties"
        ))
        .with_param("discourse", data.name.as_str())
        .with_param("properties", json_map(&data.properties));
        self.execute(&discourse).await?;

        let speakers: Vec<Value> = data
            .speaker_names()
            .into_iter()
            .map(|name| {
                let props = data.speakers.get(&name).map(json_map).unwrap_or_else(|| Value::Map(PropertyMap::new()));
                Value::Map([("name".to_string(), Value::from(name)), ("properties".to_string(), props)].into_iter().collect())
            })
            .collect();
        let speaker_text = format!(
            "UNWIND $rows AS row\nMERGE (s:Speaker:{corpus} {{name: row.name}})\nSET s += row.properties"
        );
        self.execute_batched(&speaker_text, speakers).await?;

        for level in &data.levels {
            let text = create_tokens(&level.type_name, level.supertype.as_deref(), &corpus);
            let size = self.config().batch_size.max(1);
            for chunk in data.token_rows(level).chunks(size) {
                let statement = Statement::raw(text.as_str())
                    .with_param("rows", Value::List(chunk.to_vec()))
                    .with_param("discourse", data.name.as_str());
                self.execute(&statement).await?;
            }
            self.link_precedence(&level.type_name, &data.sequences(level)).await?;
            info!(discourse = %data.name, type_name = %level.type_name, tokens = level.tokens.len(), "level imported");
        }

        self.update_hierarchy(|h| data.register(h))
    }
}
