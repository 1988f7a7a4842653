//! Round trip against a live Neo4j over the transactional HTTP endpoint.
//!
//! Ignored by default. Run with a server reachable through
//! `ANNOGRAPH_HTTP_URI` (plus `_USER`, `_PASSWORD`, `_DATABASE`):
//!
//! ```text
//! cargo test --features http --test e2e_neo4j -- --ignored
//! ```

#![cfg(feature = "http")]

mod common;

use annograph::query::Aggregated;
use annograph::{Aggregate, BackendConfig, CorpusConfig, CorpusContext, Statement};

fn live_corpus() -> Option<CorpusContext> {
    let config = CorpusConfig::new("annograph_e2e").with_env_overrides().ok()?;
    if !matches!(config.backend, BackendConfig::Http { .. }) {
        eprintln!("ANNOGRAPH_HTTP_URI not set; skipping");
        return None;
    }
    CorpusContext::open(config).ok()
}

fn cleanup() -> Statement {
    Statement::raw("MATCH (n:annograph_e2e) DETACH DELETE n")
}

// ============================================================================
// 1. "cats are cute"
// ============================================================================

#[tokio::test]
#[ignore]
async fn test_import_and_query_live() {
    let Some(corpus) = live_corpus() else { return };
    corpus.execute(&cleanup()).await.unwrap();

    corpus.add_discourse(&common::cats()).await.unwrap();
    let phone = corpus.annotation("phone").unwrap();
    let found = corpus
        .query_graph(&phone)
        .filter(phone.attr("label").unwrap().equals("aa").unwrap())
        .all()
        .await
        .unwrap()
        .annotations()
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].begin(), Some(0.4));

    let word = found[0].container("word").await.unwrap().unwrap();
    assert_eq!(word.label(), Some("are"));
    assert_eq!(corpus.query_graph(&phone).count().await.unwrap(), 10);

    corpus.execute(&cleanup()).await.unwrap();
}

// ============================================================================
// 2. "cats" and "dogs" together
// ============================================================================

#[tokio::test]
#[ignore]
async fn test_word_filter_alignment_and_counts_live() {
    let Some(corpus) = live_corpus() else { return };
    corpus.execute(&cleanup()).await.unwrap();
    corpus.add_discourse(&common::cats()).await.unwrap();
    corpus.add_discourse(&common::dogs()).await.unwrap();

    let phone = corpus.annotation("phone").unwrap();
    let label = |l: &str| phone.attr("label").unwrap().equals(l).unwrap();
    let in_word = |w: &str| phone.attr("word.label").unwrap().equals(w).unwrap();
    let word_initial = || phone.attr("begin").unwrap().equals(phone.attr("word.begin").unwrap()).unwrap();

    // aa inside "dogs"
    let dogs = corpus
        .query_graph(&phone)
        .filter(label("aa"))
        .filter(in_word("dogs"))
        .all()
        .await
        .unwrap()
        .annotations()
        .await
        .unwrap();
    assert_eq!(dogs.len(), 1);
    assert_eq!(dogs[0].begin(), Some(0.1));

    // Structurally aligned: "d" opens "dogs".
    let aligned = corpus
        .query_graph(&phone)
        .filter(label("d"))
        .filter(in_word("dogs"))
        .filter(word_initial())
        .count()
        .await
        .unwrap();
    assert_eq!(aligned, 1);

    // Same begin time as "rock", but the zero-length "r" comes first.
    let rock = corpus
        .query_graph(&phone)
        .filter(label("aa"))
        .filter(in_word("rock"))
        .all()
        .await
        .unwrap()
        .annotations()
        .await
        .unwrap();
    assert_eq!(rock.len(), 1);
    let rock_word = rock[0].container("word").await.unwrap().unwrap();
    assert_eq!(rock[0].begin(), rock_word.begin());
    let misaligned = corpus
        .query_graph(&phone)
        .filter(label("aa"))
        .filter(in_word("rock"))
        .filter(word_initial())
        .count()
        .await
        .unwrap();
    assert_eq!(misaligned, 0);

    // Across both discourses only the aa of "are" is word-initial.
    let initial_aa = corpus
        .query_graph(&phone)
        .filter(label("aa"))
        .filter(word_initial())
        .all()
        .await
        .unwrap()
        .annotations()
        .await
        .unwrap();
    assert_eq!(initial_aa.len(), 1);
    let word = initial_aa[0].container("word").await.unwrap().unwrap();
    assert_eq!(word.label(), Some("are"));

    let grouped = corpus
        .query_graph(&phone)
        .filter(phone.attr("label").unwrap().in_list(["aa", "ae"]).unwrap())
        .group_by(phone.attr("label").unwrap())
        .aggregate(vec![Aggregate::count()])
        .await
        .unwrap();
    let Aggregated::Groups(rows) = grouped else { panic!("expected grouped rows") };
    let counts: Vec<(String, i64)> = rows
        .iter()
        .map(|r| (r.get::<String>("label").unwrap(), r.get::<i64>("count").unwrap()))
        .collect();
    assert_eq!(counts, vec![("aa".to_string(), 3), ("ae".to_string(), 7)]);

    corpus.execute(&cleanup()).await.unwrap();
}
