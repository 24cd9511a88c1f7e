use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use tempfile::TempDir;

use super::*;
use crate::backend::{LocalHashEmbedder, RetryPolicy, Retrying};
use crate::error::{IndexError, SearchTimeout, is_batch_fatal};
use crate::semantic::SemanticModelConfig;

fn chunk(document_id: &str, fragment: &str, content_type: ContentType, content: &str) -> Chunk {
    Chunk {
        document_id: document_id.to_string(),
        fragment: fragment.to_string(),
        content_type,
        content: content.to_string(),
    }
}

fn grant_chunks(document_id: &str) -> Vec<Chunk> {
    vec![
        chunk(
            document_id,
            "1-1",
            ContentType::Text,
            "El plazo de presentación de solicitudes finaliza el 12 de julio de 2022.",
        ),
        chunk(
            document_id,
            "1-2",
            ContentType::Text,
            "Podrán ser beneficiarias las pequeñas y medianas empresas.",
        ),
        chunk(
            document_id,
            "2",
            ContentType::Table,
            "Pequeña empresa | 70%\nMediana empresa | 60%",
        ),
    ]
}

#[test]
fn index_appends_and_reports_counts() {
    let temp = TempDir::new().expect("tempdir");
    let embedder = LocalHashEmbedder::new(64);
    let mut index = VectorIndex::open(temp.path(), &embedder).expect("index opens");

    assert_eq!(index.index(&grant_chunks("G1_ficha")).expect("index"), 3);
    assert_eq!(index.index(&grant_chunks("G1_orden")).expect("index"), 3);

    let counts = index.counts().expect("counts");
    assert_eq!(
        counts,
        IndexCounts {
            chunks: 6,
            text_chunks: 4,
            table_chunks: 2,
            documents: 2,
        }
    );
}

#[test]
fn reopening_keeps_prior_rows() {
    let temp = TempDir::new().expect("tempdir");
    let embedder = LocalHashEmbedder::new(64);
    {
        let mut index = VectorIndex::open(temp.path(), &embedder).expect("index opens");
        index.index(&grant_chunks("G1_ficha")).expect("index");
    }

    let mut index = VectorIndex::open(temp.path(), &embedder).expect("index reopens");
    index.index(&grant_chunks("G1_orden")).expect("index");
    assert_eq!(index.counts().expect("counts").chunks, 6);
}

#[test]
fn search_ranks_by_similarity_and_honours_filters() {
    let temp = TempDir::new().expect("tempdir");
    let embedder = LocalHashEmbedder::new(256);
    let mut index = VectorIndex::open(temp.path(), &embedder).expect("index opens");
    index.index(&grant_chunks("G1_ficha")).expect("index");
    index.index(&grant_chunks("G1_orden")).expect("index");

    let hits = index
        .search("plazo de presentación de solicitudes", 2, None, None)
        .expect("search");
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].chunk.fragment, "1-1");
    assert!(hits[0].score >= hits[1].score);

    let tables = index
        .search("empresa", 10, Some(ContentType::Table), None)
        .expect("search");
    assert_eq!(tables.len(), 2);
    assert!(tables.iter().all(|hit| hit.chunk.content_type == ContentType::Table));

    let scoped = index
        .search("empresa", 10, None, Some("G1_orden"))
        .expect("search");
    assert_eq!(scoped.len(), 3);
    assert!(scoped.iter().all(|hit| hit.chunk.document_id == "G1_orden"));
}

#[test]
fn equal_scores_keep_insertion_order() {
    let temp = TempDir::new().expect("tempdir");
    let embedder = LocalHashEmbedder::new(64);
    let mut index = VectorIndex::open(temp.path(), &embedder).expect("index opens");
    let text = "Costes elegibles: personal y equipamiento.";
    index
        .index(&[
            chunk("A", "1-1", ContentType::Text, text),
            chunk("B", "1-1", ContentType::Text, text),
            chunk("C", "1-1", ContentType::Text, text),
        ])
        .expect("index");

    for _ in 0..3 {
        let order = index
            .search("costes elegibles", 3, None, None)
            .expect("search")
            .into_iter()
            .map(|hit| hit.chunk.document_id)
            .collect::<Vec<String>>();
        assert_eq!(order, vec!["A", "B", "C"]);
    }
}

#[test]
fn empty_query_or_zero_k_returns_nothing() {
    let temp = TempDir::new().expect("tempdir");
    let embedder = LocalHashEmbedder::new(64);
    let mut index = VectorIndex::open(temp.path(), &embedder).expect("index opens");
    index.index(&grant_chunks("G1_ficha")).expect("index");

    assert!(index.search("   ", 4, None, None).expect("search").is_empty());
    assert!(index.search("plazo", 0, None, None).expect("search").is_empty());
    assert!(index.search_mixed("plazo", 0).expect("search").is_empty());
}

#[test]
fn mixed_search_reserves_a_table_slot() {
    let temp = TempDir::new().expect("tempdir");
    let embedder = LocalHashEmbedder::new(64);
    let mut index = VectorIndex::open(temp.path(), &embedder).expect("index opens");
    let mut chunks = (1..=6)
        .map(|sub| {
            chunk(
                "G1_ficha",
                &format!("1-{sub}"),
                ContentType::Text,
                &format!("Párrafo {sub} sobre la financiación de proyectos."),
            )
        })
        .collect::<Vec<Chunk>>();
    chunks.push(chunk("G1_ficha", "2", ContentType::Table, "Tipo | Porcentaje\nSubvención | 40%"));
    chunks.push(chunk("G1_ficha", "3", ContentType::Table, "Tipo | Porcentaje\nPréstamo | 60%"));
    index.index(&chunks).expect("index");

    let hits = index.search_mixed("financiación", 4).expect("search");
    let tables = hits
        .iter()
        .filter(|hit| hit.chunk.content_type == ContentType::Table)
        .count();
    assert_eq!(hits.len(), 4);
    assert_eq!(tables, 1);

    let hits = index.search_mixed("financiación", 10).expect("search");
    assert_eq!(hits.len(), 8);
}

#[test]
fn mixed_search_backfills_from_the_other_type() {
    let temp = TempDir::new().expect("tempdir");
    let embedder = LocalHashEmbedder::new(64);
    let mut index = VectorIndex::open(temp.path(), &embedder).expect("index opens");
    index
        .index(&[
            chunk("G1_ficha", "1-1", ContentType::Text, "Texto sobre la región."),
            chunk("G1_ficha", "2", ContentType::Table, "Región | Cataluña"),
            chunk("G1_ficha", "3", ContentType::Table, "Región | Madrid"),
            chunk("G1_ficha", "4", ContentType::Table, "Región | Andalucía"),
            chunk("G1_ficha", "5", ContentType::Table, "Región | Galicia"),
        ])
        .expect("index");

    let hits = index.search_mixed("región", 4).expect("search");
    assert_eq!(hits.len(), 4);
    assert_eq!(
        hits.iter()
            .filter(|hit| hit.chunk.content_type == ContentType::Text)
            .count(),
        1
    );

    let temp = TempDir::new().expect("tempdir");
    let mut prose_only = VectorIndex::open(temp.path(), &embedder).expect("index opens");
    prose_only
        .index(&grant_chunks("G1_ficha")[..2])
        .expect("index");
    assert_eq!(prose_only.search_mixed("empresas", 4).expect("search").len(), 2);
}

#[test]
fn mixed_slot_split_matches_eighty_twenty() {
    assert_eq!(mixed_slots(1), (0, 1));
    assert_eq!(mixed_slots(4), (3, 1));
    assert_eq!(mixed_slots(6), (5, 1));
    assert_eq!(mixed_slots(10), (8, 2));
}

#[test]
fn reopening_with_a_different_model_is_rejected() {
    let temp = TempDir::new().expect("tempdir");
    let small = LocalHashEmbedder::new(64);
    VectorIndex::open(temp.path(), &small).expect("index opens");

    let large = LocalHashEmbedder::new(128);
    let error = VectorIndex::open(temp.path(), &large)
        .err()
        .expect("mismatched model should be rejected");
    assert!(matches!(
        error.downcast_ref::<IndexError>(),
        Some(IndexError::ModelMismatch {
            indexed_dim: 64,
            requested_dim: 128,
            ..
        })
    ));
    assert!(is_batch_fatal(&error));
}

struct RateLimitedEmbedder {
    model: SemanticModelConfig,
}

impl Embedder for RateLimitedEmbedder {
    fn model(&self) -> &SemanticModelConfig {
        &self.model
    }

    fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        Err(BackendError::Transient("429 Too Many Requests".to_string()))
    }
}

#[test]
fn exhausted_embedding_aborts_population_without_marking() {
    let temp = TempDir::new().expect("tempdir");
    let embedder = Retrying::new(
        RateLimitedEmbedder {
            model: SemanticModelConfig::local(64),
        },
        RetryPolicy::new(2, Duration::ZERO),
    );
    let mut index = VectorIndex::open(temp.path(), &embedder).expect("index opens");

    let error = index_documents_once(
        &mut index,
        &[PathBuf::from("G1_ficha.pdf")],
        |_| Ok(grant_chunks("G1_ficha")),
    )
    .expect_err("embedding never succeeds");

    assert!(is_batch_fatal(&error));
    assert!(!ProcessedMarkers::new(temp.path()).is_processed("G1_ficha"));
    assert_eq!(index.counts().expect("counts").chunks, 0);
}

#[test]
fn populating_twice_adds_no_duplicates() {
    let temp = TempDir::new().expect("tempdir");
    let embedder = LocalHashEmbedder::new(64);
    let mut index = VectorIndex::open(temp.path(), &embedder).expect("index opens");
    let pdfs = vec![PathBuf::from("G1_ficha.pdf"), PathBuf::from("G1_orden.pdf")];
    let extract = |path: &Path| -> Result<Vec<Chunk>> { Ok(grant_chunks(&file_stem_for_test(path))) };

    let first = index_documents_once(&mut index, &pdfs, extract).expect("first pass");
    assert_eq!(first.documents_indexed, 2);
    assert_eq!(first.chunks_indexed, 6);
    assert_eq!(first.table_chunks_indexed, 2);

    let second = index_documents_once(&mut index, &pdfs, extract).expect("second pass");
    assert_eq!(second.documents_indexed, 0);
    assert_eq!(second.documents_skipped, 2);
    assert_eq!(index.counts().expect("counts").chunks, 6);
    assert_eq!(ProcessedMarkers::new(temp.path()).count().expect("count"), 2);
}

#[test]
fn unreadable_document_is_excluded_and_retried_later() {
    let temp = TempDir::new().expect("tempdir");
    let embedder = LocalHashEmbedder::new(64);
    let mut index = VectorIndex::open(temp.path(), &embedder).expect("index opens");
    let pdfs = vec![PathBuf::from("G1_ficha.pdf"), PathBuf::from("G1_roto.pdf")];

    let summary = index_documents_once(&mut index, &pdfs, |path| {
        let stem = file_stem_for_test(path);
        if stem == "G1_roto" {
            Err(anyhow!("pdftotext returned non-zero exit status"))
        } else {
            Ok(grant_chunks(&stem))
        }
    })
    .expect("population continues past bad documents");

    assert_eq!(summary.documents_indexed, 1);
    assert_eq!(summary.documents_failed, 1);
    assert_eq!(summary.warnings.len(), 1);
    let markers = ProcessedMarkers::new(temp.path());
    assert!(markers.is_processed("G1_ficha"));
    assert!(!markers.is_processed("G1_roto"));
}

fn file_stem_for_test(path: &Path) -> String {
    crate::util::file_stem(path).expect("stem")
}

#[test]
fn search_budget_trips_once_elapsed() {
    assert!(budget::SearchTimeoutBudget::new(0).is_none());
    assert!(budget::enforce_timeout(None, "vector scan").is_ok());

    let budget = budget::SearchTimeoutBudget::new(1);
    std::thread::sleep(Duration::from_millis(20));
    let error = budget::enforce_timeout(budget, "vector scan").expect_err("budget exceeded");
    assert!(error.to_string().contains("search timeout exceeded during vector scan"));
    assert!(error.downcast_ref::<SearchTimeout>().is_some());
    assert!(!is_batch_fatal(&error));
}

/// Fails with an exhausted budget on one chosen call, succeeds otherwise.
struct FailsOnCall {
    inner: LocalHashEmbedder,
    fail_on: usize,
    calls: AtomicUsize,
}

impl Embedder for FailsOnCall {
    fn model(&self) -> &SemanticModelConfig {
        self.inner.model()
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(BackendError::Exhausted {
                operation: "embedding".to_string(),
                attempts: 3,
                last: "429 Too Many Requests".to_string(),
            });
        }
        self.inner.embed_batch(texts)
    }
}

#[test]
fn failure_on_a_later_batch_leaves_no_partial_document() {
    let temp = TempDir::new().expect("tempdir");
    let pdfs = vec![PathBuf::from("G1_ficha.pdf")];
    let extract = |path: &Path| -> Result<Vec<Chunk>> { Ok(grant_chunks(&file_stem_for_test(path))) };

    let flaky = FailsOnCall {
        inner: LocalHashEmbedder::new(64),
        fail_on: 2,
        calls: AtomicUsize::new(0),
    };
    {
        let mut index = VectorIndex::open(temp.path(), &flaky)
            .expect("index opens")
            .with_batch_size(1);
        let error = index_documents_once(&mut index, &pdfs, extract)
            .expect_err("second batch fails");
        assert!(is_batch_fatal(&error));
        assert_eq!(index.counts().expect("counts").chunks, 0);
    }
    assert!(!ProcessedMarkers::new(temp.path()).is_processed("G1_ficha"));

    let embedder = LocalHashEmbedder::new(64);
    let mut index = VectorIndex::open(temp.path(), &embedder)
        .expect("index reopens")
        .with_batch_size(1);
    let summary = index_documents_once(&mut index, &pdfs, extract).expect("rerun succeeds");
    assert_eq!(summary.chunks_indexed, 3);

    let counts = index.counts().expect("counts");
    assert_eq!(counts.chunks, 3);
    let first = index
        .search("plazo de presentación de solicitudes", 10, None, Some("G1_ficha"))
        .expect("search")
        .into_iter()
        .filter(|hit| hit.chunk.fragment == "1-1")
        .count();
    assert_eq!(first, 1);
}

struct SlowEmbedder {
    inner: LocalHashEmbedder,
    delay: Duration,
}

impl Embedder for SlowEmbedder {
    fn model(&self) -> &SemanticModelConfig {
        self.inner.model()
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        std::thread::sleep(self.delay);
        self.inner.embed_batch(texts)
    }
}

#[test]
fn slow_query_embedding_does_not_spend_the_search_budget() {
    let temp = TempDir::new().expect("tempdir");
    let embedder = SlowEmbedder {
        inner: LocalHashEmbedder::new(64),
        delay: Duration::from_millis(30),
    };
    let mut index = VectorIndex::open(temp.path(), &embedder).expect("index opens");
    index.index(&grant_chunks("G1_ficha")).expect("indexed");
    let index = index.with_timeout_ms(10);

    let hits = index
        .search_mixed("plazo de presentación de solicitudes", 4)
        .expect("scan of three rows fits the budget");
    assert_eq!(hits.len(), 3);
}

#[test]
fn empty_index_answers_with_nothing() {
    let embedder = LocalHashEmbedder::new(64);
    let index = VectorIndex::empty(&embedder).expect("in-memory index");

    assert_eq!(index.counts().expect("counts").chunks, 0);
    assert!(index.search_mixed("plazo", 4).expect("search").is_empty());
}
