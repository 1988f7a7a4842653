//! Importing discourses and enriching the corpus: pauses, syllabic
//! segments, syllables and utterances.

mod common;

use annograph::corpus::syllables::POSITION_PROPERTY;
use annograph::{
    CorpusConfig, CorpusContext, Error, Hierarchy, Record, RecordingExecutor, Statement, Value,
};
use common::map;
use pretty_assertions::assert_eq;

fn statements_with<'a>(statements: &'a [Statement], pattern: &str) -> Vec<&'a Statement> {
    statements.iter().filter(|s| s.text.contains(pattern)).collect()
}

fn rows(statement: &Statement) -> &[Value] {
    statement.params.get("rows").and_then(Value::as_list).unwrap()
}

fn field<'a>(row: &'a Value, key: &str) -> &'a Value {
    row.as_map().and_then(|m| m.get(key)).unwrap()
}

// ============================================================================
// 1. Import
// ============================================================================

#[tokio::test]
async fn test_import_writes_tokens_and_schema() {
    let (corpus, exec) = common::empty_corpus();
    corpus.add_discourse(&common::cats()).await.unwrap();

    let h = corpus.hierarchy();
    assert_eq!(h.supertype("phone"), Some("word"));
    assert!(h.has_type_property("word", "frequency"));
    assert!(h.speaker_properties().contains_key("gender"));

    let statements = exec.statements();
    assert!(statements[0].text.starts_with("MERGE (d:Discourse:test {name: $discourse})"));
    assert_eq!(statements[0].params.get("discourse"), Some(&Value::from("cats")));

    let phones = statements_with(&statements, "CREATE (n:phone:test:speech");
    assert_eq!(phones.len(), 1);
    let phone_rows = rows(phones[0]);
    assert_eq!(phone_rows.len(), 10);
    assert_eq!(field(&phone_rows[0], "id"), &Value::from("cats_phone_0"));
    assert_eq!(field(&phone_rows[4], "container"), &Value::from("w2"));
    assert!(phones[0].text.contains("CREATE (n)-[:contained_by]->(c)"));

    let links = statements_with(&statements, "CREATE (a)-[:precedes]->(b)");
    assert_eq!(links.len(), 2);
    assert_eq!(rows(links[0]).len(), 2);
    assert_eq!(rows(links[1]).len(), 9);
}

#[tokio::test]
async fn test_second_discourse_shares_the_schema() {
    let (corpus, exec) = common::empty_corpus();
    corpus.add_discourse(&common::cats()).await.unwrap();
    exec.clear();
    corpus.add_discourse(&common::dogs()).await.unwrap();

    let statements = exec.statements();
    let phones = statements_with(&statements, "CREATE (n:phone:test:speech");
    let labels: Vec<&str> = rows(phones[0]).iter().filter_map(|r| field(r, "label").as_str()).collect();
    assert_eq!(labels.len(), 27);
    assert_eq!(labels.iter().filter(|l| **l == "aa").count(), 2);
    assert_eq!(labels.iter().filter(|l| **l == "ae").count(), 6);
    let rock_r = &rows(phones[0])[24];
    assert_eq!(field(rock_r, "begin"), field(rock_r, "end"));
    assert_eq!(corpus.hierarchy().supertype("phone"), Some("word"));
}

#[tokio::test]
async fn test_import_failure_leaves_schema_untouched() {
    let (corpus, exec) = common::empty_corpus();
    exec.fail_on("CREATE (n:phone", "Neo.ClientError.Schema.ConstraintValidationFailed");
    let err = corpus.add_discourse(&common::cats()).await.unwrap_err();
    assert!(matches!(err, Error::DatabaseExecutionError { .. }));
    assert!(!corpus.hierarchy().has_type("word"));
}

#[tokio::test]
async fn test_hierarchy_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = CorpusConfig::new("test");
    config.hierarchy_dir = Some(dir.path().to_path_buf());

    let first = CorpusContext::open(config.clone()).unwrap();
    first.add_discourse(&common::cats()).await.unwrap();

    let second = CorpusContext::open(config).unwrap();
    assert_eq!(second.hierarchy().supertype("phone"), Some("word"));
    assert!(second.annotation("word").unwrap().attr("frequency").is_ok());
}

// ============================================================================
// 2. Pauses
// ============================================================================

#[tokio::test]
async fn test_pause_encoding_enables_pause_attributes() {
    let (corpus, exec) = common::corpus();
    assert!(corpus.annotation("word").unwrap().node("following_pause").is_err());

    corpus.encode_pauses(&["<SIL>", "{LG}"]).await.unwrap();
    let link = exec.last_statement().unwrap();
    assert!(link.text.contains("WHERE ALL(n IN nodes(p)[1..-1] WHERE n:pause)"));

    let word = corpus.annotation("word").unwrap();
    assert!(word.attr("following_pause_duration").is_ok());
    assert!(word.attr("follows_pause").unwrap().equals(true).is_ok());

    corpus.reset_pauses().await.unwrap();
    assert!(corpus.annotation("word").unwrap().attr("follows_pause").is_err());
}

// ============================================================================
// 3. Syllables
// ============================================================================

fn word_record(id: &str, phones: &[(&str, f64, f64)]) -> Record {
    let ids: Vec<String> = (0..phones.len()).map(|i| format!("{id}_p{i}")).collect();
    Record::from_pairs([
        ("id", Value::from(id)),
        ("speaker", Value::from("s1")),
        ("discourse", Value::from("cats")),
        ("phone_ids", Value::from(ids)),
        ("phone_labels", Value::from(phones.iter().map(|p| p.0).collect::<Vec<_>>())),
        ("phone_begins", Value::from(phones.iter().map(|p| p.1).collect::<Vec<_>>())),
        ("phone_ends", Value::from(phones.iter().map(|p| p.2).collect::<Vec<_>>())),
    ])
}

fn script_syllables(exec: &RecordingExecutor) {
    exec.respond_to(
        "phone_ids",
        vec![
            word_record("w1", &[("k", 0.0, 0.1), ("ae", 0.1, 0.2), ("t", 0.2, 0.3), ("s", 0.3, 0.4)]),
            word_record("w2", &[("aa", 0.4, 0.5), ("r", 0.5, 0.6)]),
            word_record("w3", &[("k", 0.6, 0.7), ("y", 0.7, 0.8), ("uw", 0.8, 0.9), ("t", 0.9, 1.0)]),
            word_record(
                "w4",
                &[("k", 1.0, 1.1), ("ae", 1.1, 1.2), ("t", 1.2, 1.3), ("k", 1.3, 1.4), ("y", 1.4, 1.5), ("uw", 1.5, 1.6)],
            ),
        ],
    );
    exec.respond_to(
        "AS label",
        ["aa", "ae", "uw"].iter().map(|l| Record::from_pairs([("label", *l)])).collect(),
    );
}

async fn syllabified() -> (CorpusContext, RecordingExecutor) {
    let (corpus, exec) = common::corpus();
    script_syllables(&exec);
    corpus.encode_syllabic_segments(&["aa", "ae", "uw"]).await.unwrap();
    (corpus, exec)
}

#[tokio::test]
async fn test_syllables_by_maximal_onset() {
    let (corpus, exec) = syllabified().await;
    corpus.encode_syllables().await.unwrap();

    let statements = exec.statements();
    let create = statements_with(&statements, &format!("SET p.{POSITION_PROPERTY} = ph.position"));
    assert_eq!(create.len(), 1);
    let labels: Vec<&str> = rows(create[0]).iter().filter_map(|r| field(r, "label").as_str()).collect();
    assert_eq!(labels, vec!["k.ae.t.s", "aa.r", "k.y.uw.t", "k.ae.t", "k.y.uw"]);
    assert_eq!(field(&rows(create[0])[4], "id"), &Value::from("w4_syllable_1"));

    let h = corpus.hierarchy();
    assert_eq!(h.supertype("phone"), Some("syllable"));
    assert_eq!(h.supertype("syllable"), Some("word"));
    assert!(h.has_token_property("phone", POSITION_PROPERTY));
    let syllable = corpus.annotation("phone").unwrap().attr("syllable.label");
    assert!(syllable.is_ok());
}

#[tokio::test]
async fn test_syllables_need_syllabic_segments() {
    let (corpus, _) = common::corpus();
    let err = corpus.encode_syllables().await.unwrap_err();
    assert!(matches!(err, Error::HierarchyError(_)));
}

fn comparable(h: &Hierarchy) -> Hierarchy {
    let mut h = h.clone();
    h.version = 0;
    h
}

#[tokio::test]
async fn test_reset_then_encode_matches_single_encode() {
    let (twice, twice_exec) = syllabified().await;
    twice.encode_syllables().await.unwrap();
    twice.reset_syllables().await.unwrap();
    assert!(!twice.hierarchy().has_type("syllable"));
    assert_eq!(twice.hierarchy().supertype("phone"), Some("word"));
    assert!(!twice.hierarchy().has_token_property("phone", POSITION_PROPERTY));
    twice_exec.clear();
    twice.encode_syllables().await.unwrap();

    let (once, once_exec) = syllabified().await;
    once_exec.clear();
    once.encode_syllables().await.unwrap();

    assert_eq!(comparable(&twice.hierarchy()), comparable(&once.hierarchy()));
    assert_eq!(twice_exec.statements(), once_exec.statements());
}

#[tokio::test]
async fn test_encoding_twice_resets_first() {
    let (corpus, exec) = syllabified().await;
    corpus.encode_syllables().await.unwrap();
    exec.clear();
    corpus.encode_syllables().await.unwrap();
    let statements = exec.statements();
    assert!(statements[0].text.contains("DELETE r\nCREATE (p)-[:contained_by]->(w)"), "{}", statements[0].text);
    assert_eq!(corpus.hierarchy().supertype("phone"), Some("syllable"));
}

// ============================================================================
// 4. Utterances
// ============================================================================

fn script_words(exec: &RecordingExecutor, words: &[(&str, &str, f64, f64)]) {
    exec.respond_to(
        "AS word_id",
        words
            .iter()
            .map(|(id, label, begin, end)| {
                Record::from_pairs([
                    ("word_id", Value::from(*id)),
                    ("word_label", Value::from(*label)),
                    ("word_begin", Value::from(*begin)),
                    ("word_end", Value::from(*end)),
                    ("speaker", Value::from("s1")),
                    ("discourse", Value::from("cats")),
                ])
            })
            .collect(),
    );
}

#[tokio::test]
async fn test_utterances_split_at_long_gaps() {
    let (corpus, exec) = common::corpus();
    script_words(&exec, &[("w1", "cats", 0.0, 0.4), ("w2", "are", 0.4, 0.6), ("w3", "cute", 1.5, 2.0)]);

    corpus.encode_utterances(0.5, 0.0).await.unwrap();

    let statements = exec.statements();
    let create = statements_with(&statements, "CREATE (w)-[:contained_by]->(u)");
    assert_eq!(create.len(), 1);
    let created = rows(create[0]);
    assert_eq!(created.len(), 2);
    assert_eq!(field(&created[0], "id"), &Value::from("cats_s1_utterance_0"));
    assert_eq!(field(&created[0], "label"), &Value::from("cats are"));
    assert_eq!(field(&created[0], "words"), &Value::from(vec!["w1", "w2"]));
    assert_eq!(field(&created[1], "begin"), &Value::from(1.5));

    let links = statements_with(&statements, "MATCH (a:utterance:test {id: row.from})");
    assert_eq!(rows(links[0]), &[map([("from", "cats_s1_utterance_0"), ("to", "cats_s1_utterance_1")])]);
    assert_eq!(corpus.hierarchy().supertype("word"), Some("utterance"));
}

#[tokio::test]
async fn test_utterance_thresholds_validated() {
    let (corpus, exec) = common::corpus();
    let err = corpus.encode_utterances(-1.0, 0.0).await.unwrap_err();
    assert!(matches!(err, Error::QueryCompositionError(_)));
    let err = corpus.encode_utterances(0.5, f64::NAN).await.unwrap_err();
    assert!(matches!(err, Error::QueryCompositionError(_)));
    assert_eq!(exec.statement_count(), 0);
}

#[tokio::test]
async fn test_reset_utterances() {
    let (corpus, exec) = common::corpus();
    script_words(&exec, &[("w1", "cats", 0.0, 0.4)]);
    corpus.encode_utterances(0.5, 0.0).await.unwrap();
    corpus.reset_utterances().await.unwrap();
    assert!(!corpus.hierarchy().has_type("utterance"));
    assert_eq!(corpus.hierarchy().supertype("word"), None);
    assert!(exec.last_statement().unwrap().text.contains("DETACH DELETE t"));
}
