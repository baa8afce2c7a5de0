use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use chunk_locator::config::Config;
use chunk_locator::extract::{JsonFileExtractor, ReferenceFile};
use chunk_locator::pipeline::{locate_document, Assists, LocateInput, StageLimits};
use chunk_locator::sqlite_store::SqliteStore;
use chunk_locator::{db, migrate};
use chunk_locator_core::cache::ExtractionCache;
use chunk_locator_core::ledger::{self, CorrectionRequest, LedgerError, LedgerPolicy, NeighborSide};
use chunk_locator_core::models::{
    content_hash, CandidateChunk, ConfidenceTier, Extraction, ExtractionMode, StructuralChunk,
};
use chunk_locator_core::store::Store;
use chunk_locator_core::MatcherConfig;

const FOX: &str = "The quick brown fox jumps over the lazy dog.";

async fn open(tmp: &TempDir) -> (Config, SqliteStore) {
    let config = Config::with_db(tmp.path().join("data/test.sqlite"));
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    (config, SqliteStore::new(pool))
}

fn reference(text: &str) -> ReferenceFile {
    ReferenceFile {
        text: text.to_string(),
        title: None,
        mode: ExtractionMode::Pdf,
        structural_chunks: vec![StructuralChunk {
            content: text.to_string(),
            page_start: Some(1),
            page_end: Some(1),
            heading_path: Some(vec!["Intro".into()]),
            heading_level: Some(1),
            ..Default::default()
        }],
    }
}

async fn locate_fox(store: &SqliteStore) -> Vec<String> {
    let reference = reference(FOX);
    let extractor = JsonFileExtractor::new("json-1", &reference);
    let input = LocateInput {
        document_id: "fox".into(),
        title: Some("Fox".into()),
        reference_text: FOX.into(),
        candidates: ["The quick brown fox", "jumps over the lazy dog."]
            .iter()
            .enumerate()
            .map(|(index, c)| CandidateChunk {
                index,
                content: c.to_string(),
            })
            .collect(),
    };
    let outcome = locate_document(
        store,
        &extractor,
        input,
        &MatcherConfig::default(),
        &Assists::default(),
        StageLimits::default(),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    outcome.chunks.into_iter().map(|c| c.id).collect()
}

#[tokio::test]
async fn test_locate_persists_all_fields() {
    let tmp = TempDir::new().unwrap();
    let (_config, store) = open(&tmp).await;
    locate_fox(&store).await;

    let chunks = store.list_chunks("fox").await.unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].result.offsets(), [0, 19]);
    assert_eq!(chunks[1].result.offsets(), [20, 44]);
    for c in &chunks {
        assert_eq!(c.result.confidence_tier, ConfidenceTier::Exact);
        assert_eq!(c.result.confidence_score, 1.0);
        assert_eq!(c.result.heading_path, Some(vec!["Intro".to_string()]));
        assert_eq!(c.result.page_start, Some(1));
        assert!(!c.result.overlap_corrected);
        assert!(c.result.correction_history.is_empty());
    }
    assert_eq!(chunks[1].result.context_before.as_deref(), Some("The quick brown fox"));
}

#[tokio::test]
async fn test_cache_hash_sensitivity() {
    let tmp = TempDir::new().unwrap();
    let (_config, store) = open(&tmp).await;
    locate_fox(&store).await;

    let cache = ExtractionCache::new(&store);
    let hash = content_hash(FOX);
    let hit = cache.load("fox", &hash).await.unwrap();
    assert_eq!(hit.structure_summary.chunk_count, 1);
    assert_eq!(hit.extractor_version, "json-1");
    assert!(cache.load("fox", &content_hash("something else")).await.is_none());
    assert!(cache.load("nobody", &hash).await.is_none());
}

#[tokio::test]
async fn test_cache_upsert_replaces_row() {
    let tmp = TempDir::new().unwrap();
    let (_config, store) = open(&tmp).await;
    locate_fox(&store).await;

    let cache = ExtractionCache::new(&store);
    let extraction = Extraction {
        mode: ExtractionMode::Epub,
        extractor_version: "json-2".into(),
        structural_chunks: Vec::new(),
    };
    cache.save("fox", "new-hash", &extraction).await;
    let row = cache.load("fox", "new-hash").await.unwrap();
    assert_eq!(row.mode, ExtractionMode::Epub);
    assert_eq!(row.extractor_version, "json-2");
    assert!(cache.load("fox", &content_hash(FOX)).await.is_none());
}

#[tokio::test]
async fn test_cache_save_for_unknown_document_is_swallowed() {
    let tmp = TempDir::new().unwrap();
    let (_config, store) = open(&tmp).await;
    let cache = ExtractionCache::new(&store);
    let extraction = Extraction {
        mode: ExtractionMode::Pdf,
        extractor_version: "json-1".into(),
        structural_chunks: Vec::new(),
    };
    cache.save("ghost", "h", &extraction).await;
    assert!(cache.load("ghost", "h").await.is_none());
}

#[tokio::test]
async fn test_correction_overlap_leaves_row_unchanged() {
    let tmp = TempDir::new().unwrap();
    let (config, store) = open(&tmp).await;
    let ids = locate_fox(&store).await;
    let before = store.get_chunk(&ids[0]).await.unwrap().unwrap();

    let err = ledger::correct(
        &store,
        &ids[0],
        &CorrectionRequest {
            start: 0,
            end: 25,
            reason: "too far".into(),
        },
        &config.ledger_policy(),
    )
    .await
    .unwrap_err();
    match err {
        LedgerError::Overlap {
            neighbor_id,
            neighbor_index,
            neighbor_start,
            neighbor_end,
            side,
        } => {
            assert_eq!(neighbor_id, ids[1]);
            assert_eq!(neighbor_index, 1);
            assert_eq!((neighbor_start, neighbor_end), (20, 44));
            assert_eq!(side, NeighborSide::Next);
        }
        other => panic!("expected overlap, got {:?}", other),
    }

    let after = store.get_chunk(&ids[0]).await.unwrap().unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_correction_bounds_and_ranges() {
    let tmp = TempDir::new().unwrap();
    let (config, store) = open(&tmp).await;
    let ids = locate_fox(&store).await;
    let policy = config.ledger_policy();

    let inverted = ledger::correct(
        &store,
        &ids[1],
        &CorrectionRequest {
            start: 30,
            end: 30,
            reason: "empty".into(),
        },
        &policy,
    )
    .await;
    assert!(matches!(inverted, Err(LedgerError::InvalidRange { .. })));

    let beyond = ledger::correct(
        &store,
        &ids[1],
        &CorrectionRequest {
            start: 20,
            end: 99,
            reason: "past end".into(),
        },
        &policy,
    )
    .await;
    assert!(matches!(beyond, Err(LedgerError::OutOfBounds { len: 44, .. })));

    let missing = ledger::validate(&store, "nope").await;
    assert!(matches!(missing, Err(LedgerError::NotFound(_))));
}

#[tokio::test]
async fn test_history_bound_after_sixty_corrections() {
    let tmp = TempDir::new().unwrap();
    let (_config, store) = open(&tmp).await;
    let ids = locate_fox(&store).await;
    let policy = LedgerPolicy::default();

    for i in 0..60 {
        let end = if i % 2 == 0 { 43 } else { 44 };
        ledger::correct(
            &store,
            &ids[1],
            &CorrectionRequest {
                start: 20,
                end,
                reason: format!("pass {}", i),
            },
            &policy,
        )
        .await
        .unwrap();
    }

    let chunk = store.get_chunk(&ids[1]).await.unwrap().unwrap();
    let history = &chunk.result.correction_history;
    assert_eq!(history.len(), 50);
    assert_eq!(history.first().unwrap().reason, "pass 10");
    assert_eq!(history.last().unwrap().reason, "pass 59");
    assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(chunk.result.position_corrected);
    assert!(chunk.result.position_validated);
    assert_eq!(chunk.result.offsets(), [20, 44]);
}

#[tokio::test]
async fn test_delete_cascades() {
    let tmp = TempDir::new().unwrap();
    let (_config, store) = open(&tmp).await;
    let ids = locate_fox(&store).await;

    assert!(store.delete_document("fox").await.unwrap());
    assert!(store.get_document("fox").await.unwrap().is_none());
    assert!(store.load_extraction("fox").await.unwrap().is_none());
    assert!(store.get_chunk(&ids[0]).await.unwrap().is_none());
    assert!(store.list_chunks("fox").await.unwrap().is_empty());
    assert!(!store.delete_document("fox").await.unwrap());
}

#[tokio::test]
async fn test_relocate_keeps_created_at() {
    let tmp = TempDir::new().unwrap();
    let (_config, store) = open(&tmp).await;
    locate_fox(&store).await;
    let first = store.get_document("fox").await.unwrap().unwrap();
    let latest_ids = locate_fox(&store).await;
    let second = store.get_document("fox").await.unwrap().unwrap();

    assert_eq!(first.created_at, second.created_at);
    assert_eq!(store.list_chunks("fox").await.unwrap().len(), 2);
    assert_eq!(
        store.list_chunks("fox").await.unwrap()[0].id,
        latest_ids[0],
        "listed chunks are the latest run's"
    );
}
