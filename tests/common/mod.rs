//! Shared fixtures for the end-to-end tests.
//!
//! Every corpus here talks to a `RecordingExecutor`: statements are logged
//! and answered from scripted records, so the tests check the Cypher we
//! send and what we make of the rows that come back.

#![allow(dead_code)]

use std::sync::Arc;

use annograph::{
    CorpusConfig, CorpusContext, DiscourseData, PropertyMap, PropertyType, Record, RecordingExecutor, Value,
};

/// "cats are cute", one speaker, phones timed in 0.1 s steps.
pub const CATS: &str = r#"{
    "name": "cats",
    "speakers": {"s1": {"gender": "f"}},
    "levels": [
        {"type_name": "word", "tokens": [
            {"id": "w1", "label": "cats", "begin": 0.0, "end": 0.4, "speaker": "s1", "type_properties": {"frequency": 12}},
            {"id": "w2", "label": "are", "begin": 0.4, "end": 0.6, "speaker": "s1", "type_properties": {"frequency": 40}},
            {"id": "w3", "label": "cute", "begin": 0.6, "end": 1.0, "speaker": "s1", "type_properties": {"frequency": 7}}
        ]},
        {"type_name": "phone", "supertype": "word", "tokens": [
            {"label": "k", "begin": 0.0, "end": 0.1, "speaker": "s1", "container": "w1"},
            {"label": "ae", "begin": 0.1, "end": 0.2, "speaker": "s1", "container": "w1"},
            {"label": "t", "begin": 0.2, "end": 0.3, "speaker": "s1", "container": "w1"},
            {"label": "s", "begin": 0.3, "end": 0.4, "speaker": "s1", "container": "w1"},
            {"label": "aa", "begin": 0.4, "end": 0.5, "speaker": "s1", "container": "w2"},
            {"label": "r", "begin": 0.5, "end": 0.6, "speaker": "s1", "container": "w2"},
            {"label": "k", "begin": 0.6, "end": 0.7, "speaker": "s1", "container": "w3"},
            {"label": "y", "begin": 0.7, "end": 0.8, "speaker": "s1", "container": "w3"},
            {"label": "uw", "begin": 0.8, "end": 0.9, "speaker": "s1", "container": "w3"},
            {"label": "t", "begin": 0.9, "end": 1.0, "speaker": "s1", "container": "w3"}
        ]}
    ]
}"#;

pub fn cats() -> DiscourseData {
    DiscourseData::from_json_str("cats.json", CATS).unwrap()
}

/// A second discourse for the same speaker. With [`CATS`] it holds three
/// `aa` and seven `ae` phones. The `r` of "rock" has no duration, so its
/// `aa` begins at the word's begin time without being word-initial.
pub const DOGS: &str = r#"{
    "name": "dogs",
    "speakers": {"s1": {"gender": "f"}},
    "levels": [
        {"type_name": "word", "tokens": [
            {"id": "dogs_w1", "label": "dogs", "begin": 0.0, "end": 0.4, "speaker": "s1"},
            {"id": "dogs_w2", "label": "had", "begin": 0.4, "end": 0.7, "speaker": "s1"},
            {"id": "dogs_w3", "label": "cats", "begin": 0.7, "end": 1.1, "speaker": "s1"},
            {"id": "dogs_w4", "label": "and", "begin": 1.1, "end": 1.4, "speaker": "s1"},
            {"id": "dogs_w5", "label": "bats", "begin": 1.4, "end": 1.8, "speaker": "s1"},
            {"id": "dogs_w6", "label": "pat", "begin": 1.8, "end": 2.1, "speaker": "s1"},
            {"id": "dogs_w7", "label": "cab", "begin": 2.1, "end": 2.4, "speaker": "s1"},
            {"id": "dogs_w8", "label": "rock", "begin": 2.4, "end": 2.6, "speaker": "s1"}
        ]},
        {"type_name": "phone", "supertype": "word", "tokens": [
            {"label": "d", "begin": 0.0, "end": 0.1, "speaker": "s1", "container": "dogs_w1"},
            {"label": "aa", "begin": 0.1, "end": 0.2, "speaker": "s1", "container": "dogs_w1"},
            {"label": "g", "begin": 0.2, "end": 0.3, "speaker": "s1", "container": "dogs_w1"},
            {"label": "z", "begin": 0.3, "end": 0.4, "speaker": "s1", "container": "dogs_w1"},
            {"label": "hh", "begin": 0.4, "end": 0.5, "speaker": "s1", "container": "dogs_w2"},
            {"label": "ae", "begin": 0.5, "end": 0.6, "speaker": "s1", "container": "dogs_w2"},
            {"label": "d", "begin": 0.6, "end": 0.7, "speaker": "s1", "container": "dogs_w2"},
            {"label": "k", "begin": 0.7, "end": 0.8, "speaker": "s1", "container": "dogs_w3"},
            {"label": "ae", "begin": 0.8, "end": 0.9, "speaker": "s1", "container": "dogs_w3"},
            {"label": "t", "begin": 0.9, "end": 1.0, "speaker": "s1", "container": "dogs_w3"},
            {"label": "s", "begin": 1.0, "end": 1.1, "speaker": "s1", "container": "dogs_w3"},
            {"label": "ae", "begin": 1.1, "end": 1.2, "speaker": "s1", "container": "dogs_w4"},
            {"label": "n", "begin": 1.2, "end": 1.3, "speaker": "s1", "container": "dogs_w4"},
            {"label": "d", "begin": 1.3, "end": 1.4, "speaker": "s1", "container": "dogs_w4"},
            {"label": "b", "begin": 1.4, "end": 1.5, "speaker": "s1", "container": "dogs_w5"},
            {"label": "ae", "begin": 1.5, "end": 1.6, "speaker": "s1", "container": "dogs_w5"},
            {"label": "t", "begin": 1.6, "end": 1.7, "speaker": "s1", "container": "dogs_w5"},
            {"label": "s", "begin": 1.7, "end": 1.8, "speaker": "s1", "container": "dogs_w5"},
            {"label": "p", "begin": 1.8, "end": 1.9, "speaker": "s1", "container": "dogs_w6"},
            {"label": "ae", "begin": 1.9, "end": 2.0, "speaker": "s1", "container": "dogs_w6"},
            {"label": "t", "begin": 2.0, "end": 2.1, "speaker": "s1", "container": "dogs_w6"},
            {"label": "k", "begin": 2.1, "end": 2.2, "speaker": "s1", "container": "dogs_w7"},
            {"label": "ae", "begin": 2.2, "end": 2.3, "speaker": "s1", "container": "dogs_w7"},
            {"label": "b", "begin": 2.3, "end": 2.4, "speaker": "s1", "container": "dogs_w7"},
            {"label": "r", "begin": 2.4, "end": 2.4, "speaker": "s1", "container": "dogs_w8"},
            {"label": "aa", "begin": 2.4, "end": 2.5, "speaker": "s1", "container": "dogs_w8"},
            {"label": "k", "begin": 2.5, "end": 2.6, "speaker": "s1", "container": "dogs_w8"}
        ]}
    ]
}"#;

pub fn dogs() -> DiscourseData {
    DiscourseData::from_json_str("dogs.json", DOGS).unwrap()
}

/// An empty corpus named "test".
pub fn empty_corpus() -> (CorpusContext, RecordingExecutor) {
    let exec = RecordingExecutor::new();
    let corpus = CorpusContext::builder(CorpusConfig::new("test"))
        .executor(Arc::new(exec.clone()))
        .build()
        .unwrap();
    (corpus, exec)
}

/// word > phone, with a word frequency and a speaker gender.
pub fn corpus() -> (CorpusContext, RecordingExecutor) {
    let (corpus, exec) = empty_corpus();
    corpus
        .update_hierarchy(|h| {
            h.add_annotation_type("word", None)?;
            h.add_annotation_type("phone", Some("word"))?;
            h.add_type_properties("word", [("frequency", PropertyType::Int)])?;
            h.add_speaker_properties([("gender", PropertyType::String)]);
            Ok(())
        })
        .unwrap();
    (corpus, exec)
}

/// As [`corpus`], with pauses encoded on words.
pub fn corpus_with_pauses() -> (CorpusContext, RecordingExecutor) {
    let (corpus, exec) = corpus();
    corpus.update_hierarchy(|h| h.add_token_subsets("word", ["pause"])).unwrap();
    (corpus, exec)
}

pub fn map<V: Into<Value>>(pairs: impl IntoIterator<Item = (&'static str, V)>) -> Value {
    Value::Map(pairs.into_iter().map(|(k, v)| (k.to_string(), v.into())).collect::<PropertyMap>())
}

/// A hydration record for one phone token spoken by s1 in "cats".
pub fn phone_record(id: &str, label: &str, begin: f64, end: f64) -> Record {
    Record::from_pairs([
        ("annotation", map([("id", Value::from(id)), ("label", Value::from(label)), ("begin", Value::from(begin)), ("end", Value::from(end))])),
        ("annotation__labels", Value::from(vec!["phone", "test", "speech"])),
        ("annotation__type", map([("label", label)])),
        ("annotation__speaker", Value::from("s1")),
        ("annotation__discourse", Value::from("cats")),
    ])
}

/// `record` with one more column.
pub fn with_column(mut record: Record, column: &str, value: Value) -> Record {
    record.columns.push(column.to_string());
    record.values.push(value);
    record
}
