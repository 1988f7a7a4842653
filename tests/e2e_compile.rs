//! Query compilation through a corpus session: name checks, joins, optional
//! blocks, alignment, pause paths and aggregate ordering.
//!
//! Nothing here needs database answers; the statements are compiled and
//! inspected directly.

mod common;

use annograph::query::or_;
use annograph::{Aggregate, Error, Projection, SavedQuery, Value};
use pretty_assertions::assert_eq;

// ============================================================================
// 1. Names are checked when the query is built
// ============================================================================

#[test]
fn test_unknown_attribute_lists_alternatives() {
    let (corpus, _) = common::corpus();
    let phone = corpus.annotation("phone").unwrap();
    match phone.attr("lable").unwrap_err() {
        Error::SchemaError { name, alternatives, .. } => {
            assert_eq!(name, "lable");
            assert!(alternatives.iter().any(|a| a == "label"), "{alternatives:?}");
        }
        other => panic!("expected SchemaError, got {other:?}"),
    }
}

#[test]
fn test_unknown_annotation_type() {
    let (corpus, _) = common::corpus();
    assert!(matches!(corpus.annotation("morpheme"), Err(Error::SchemaError { .. })));
    assert!(matches!(corpus.lexicon("morpheme"), Err(Error::SchemaError { .. })));
}

#[test]
fn test_speaker_properties_resolve_from_tokens() {
    let (corpus, _) = common::corpus();
    let phone = corpus.annotation("phone").unwrap();
    let q = corpus
        .query_graph(&phone)
        .filter(phone.attr("speaker.gender").unwrap().equals("f").unwrap());
    let c = q.compile().unwrap();
    assert!(c.text().contains("(node_phone)-[:spoken_by]->(node_phone_Speaker:Speaker:test)"), "{}", c.text());
    assert!(c.text().contains("node_phone_Speaker.gender = $gender_0"));
}

// ============================================================================
// 2. Shared nodes are joined once
// ============================================================================

#[test]
fn test_container_referenced_twice_is_joined_once() {
    let (corpus, _) = common::corpus();
    let phone = corpus.annotation("phone").unwrap();
    let q = corpus
        .query_graph(&phone)
        .filter(phone.attr("word.label").unwrap().equals("cats").unwrap())
        .filter(phone.attr("word.begin").unwrap().greater_than(0.0).unwrap())
        .column(phone.attr("word.end").unwrap());
    let text = q.compile().unwrap().text().to_string();
    let join = "(node_phone)-[:contained_by]->(node_phone_word:word:test)";
    assert_eq!(text.matches(join).count(), 1, "{text}");
    assert_eq!(q.required_nodes().unwrap().len(), 2);
}

#[test]
fn test_whole_corpus_scan() {
    let (corpus, _) = common::corpus();
    let word = corpus.annotation("word").unwrap();
    let q = corpus.query_graph(&word).column(word.attr("label").unwrap());
    assert_eq!(q.compile().unwrap().text(), "MATCH (node_word:word:test)\nRETURN node_word.label AS label");
}

// ============================================================================
// 3. Optional nodes never drop rows
// ============================================================================

#[test]
fn test_following_column_is_optional() {
    let (corpus, _) = common::corpus();
    let phone = corpus.annotation("phone").unwrap();
    let q = corpus
        .query_graph(&phone)
        .filter(phone.attr("label").unwrap().equals("aa").unwrap())
        .column(phone.attr("following.label").unwrap().column_name("next"));

    assert_eq!(q.required_nodes().unwrap(), vec![phone.clone()]);
    assert_eq!(q.optional_nodes().unwrap(), vec![phone.following().unwrap()]);
    let text = q.compile().unwrap().text().to_string();
    let optional = text.find("OPTIONAL MATCH").expect("optional block");
    let filter = text.find("WHERE node_phone.label").expect("top-level filter");
    assert!(filter < optional, "filters narrow before the optional block:\n{text}");
    assert!(text.contains("foll_1_node_phone.label AS next"));
}

#[test]
fn test_filtered_following_is_required() {
    let (corpus, _) = common::corpus();
    let phone = corpus.annotation("phone").unwrap();
    let q = corpus
        .query_graph(&phone)
        .filter(phone.attr("following.label").unwrap().equals("r").unwrap());
    assert!(q.required_nodes().unwrap().contains(&phone.following().unwrap()));
    assert!(q.optional_nodes().unwrap().is_empty());
}

// ============================================================================
// 4. Alignment is structural, never a time comparison
// ============================================================================

#[test]
fn test_alignment_uses_precedence_not_times() {
    let (corpus, _) = common::corpus();
    let phone = corpus.annotation("phone").unwrap();
    let q = corpus
        .query_graph(&phone)
        .filter(phone.attr("begin").unwrap().equals(phone.attr("word.begin").unwrap()).unwrap());
    let text = q.compile().unwrap().text().to_string();
    assert!(
        text.contains("NOT (node_phone)<-[:precedes]-(:phone:test)-[:contained_by]->(node_phone_word)"),
        "{text}"
    );
    assert!(!text.contains("node_phone.begin = node_phone_word.begin"));
}

#[test]
fn test_word_final_phones() {
    let (corpus, _) = common::corpus();
    let phone = corpus.annotation("phone").unwrap();
    let q = corpus
        .query_graph(&phone)
        .filter(phone.attr("end").unwrap().not_equals(phone.attr("word.end").unwrap()).unwrap());
    let text = q.compile().unwrap().text().to_string();
    assert!(text.contains("(node_phone)-[:precedes]->(:phone:test)-[:contained_by]->(node_phone_word)"), "{text}");
}

// ============================================================================
// 5. Parameters
// ============================================================================

#[test]
fn test_nested_clauses_get_distinct_parameters() {
    let (corpus, _) = common::corpus();
    let phone = corpus.annotation("phone").unwrap();
    let label = phone.attr("label").unwrap();
    let q = corpus
        .query_graph(&phone)
        .filter(or_(vec![label.equals("aa").unwrap(), label.equals("ae").unwrap()]));
    let c = q.compile().unwrap();
    assert!(c.text().contains("(node_phone.label = $label_0 OR node_phone.label = $label_1)"), "{}", c.text());
    assert_eq!(c.statement.params.get("label_0"), Some(&Value::from("aa")));
    assert_eq!(c.statement.params.get("label_1"), Some(&Value::from("ae")));
}

#[test]
fn test_literals_never_inlined() {
    let (corpus, _) = common::corpus();
    let word = corpus.annotation("word").unwrap();
    let q = corpus
        .query_graph(&word)
        .filter(word.attr("label").unwrap().equals("it's").unwrap());
    assert!(!q.compile().unwrap().text().contains("it's"));
}

// ============================================================================
// 6. Pause paths
// ============================================================================

#[test]
fn test_pause_attributes_need_encoded_pauses() {
    let (corpus, _) = common::corpus();
    let word = corpus.annotation("word").unwrap();
    assert!(matches!(word.attr("following_pause_duration"), Err(Error::SchemaError { .. })));
    assert!(matches!(word.attr("follows_pause"), Err(Error::SchemaError { .. })));
}

#[test]
fn test_following_pause_path_stops_at_speech() {
    let (corpus, _) = common::corpus_with_pauses();
    let word = corpus.annotation("word").unwrap();
    let q = corpus
        .query_graph(&word)
        .column(word.attr("label").unwrap())
        .column(word.attr("following_pause_duration").unwrap());
    let text = q.compile().unwrap().text().to_string();
    assert!(text.contains("[:precedes*1..15]"), "{text}");
    assert!(text.contains("ALL(n IN nodes(node_word_fpause_p)[1..-1] WHERE NOT n:speech)"));
    assert!(text.contains("(node_word)-[:precedes_pause]->(node_word_fpause_end)"));
}

#[test]
fn test_pause_span_follows_config() {
    let mut config = annograph::CorpusConfig::new("test");
    config.max_pause_span = 4;
    let corpus = annograph::CorpusContext::open(config).unwrap();
    corpus
        .update_hierarchy(|h| {
            h.add_annotation_type("word", None)?;
            h.add_token_subsets("word", ["pause"])
        })
        .unwrap();
    let word = corpus.annotation("word").unwrap();
    let q = corpus.query_graph(&word).column(word.attr("following_pause_duration").unwrap());
    let text = q.compile().unwrap().text().to_string();
    assert!(text.contains("[:precedes*1..4]"), "{text}");
}

// ============================================================================
// 7. Aggregates
// ============================================================================

#[test]
fn test_group_by_orders_by_group_keys() {
    let (corpus, _) = common::corpus();
    let phone = corpus.annotation("phone").unwrap();
    let q = corpus
        .query_graph(&phone)
        .filter(phone.attr("label").unwrap().in_list(["aa", "ae"]).unwrap())
        .group_by(phone.attr("label").unwrap());
    let c = q.compile_as(&Projection::Aggregate(vec![Aggregate::count()])).unwrap();
    assert!(c.text().ends_with("RETURN node_phone.label AS label, count(*) AS count\nORDER BY label"), "{}", c.text());
    assert_eq!(c.columns, vec!["label", "count"]);
}

#[test]
fn test_explicit_order_wins() {
    let (corpus, _) = common::corpus();
    let phone = corpus.annotation("phone").unwrap();
    let q = corpus
        .query_graph(&phone)
        .group_by(phone.attr("label").unwrap())
        .order_by(phone.attr("label").unwrap(), true);
    let c = q.compile_as(&Projection::Aggregate(vec![Aggregate::count()])).unwrap();
    assert!(c.text().contains("ORDER BY"));
    assert!(c.text().ends_with("DESC"), "{}", c.text());
}

// ============================================================================
// 8. Saved queries
// ============================================================================

#[test]
fn test_saved_query_recompiles_identically() {
    let (corpus, _) = common::corpus();
    let phone = corpus.annotation("phone").unwrap();
    let q = corpus
        .query_graph(&phone)
        .filter(phone.attr("word.label").unwrap().equals("cats").unwrap())
        .column(phone.attr("following.label").unwrap())
        .order_by(phone.attr("begin").unwrap(), false)
        .limit(10);
    let json = SavedQuery::capture(&q, &[]).to_json().unwrap();
    let (restored, aggregates) = SavedQuery::from_json(&json).unwrap().restore(corpus.hierarchy()).unwrap();
    assert!(aggregates.is_empty());
    assert_eq!(restored.compile().unwrap().statement, q.compile().unwrap().statement);
}
