//! Run coordination scenarios: single-flight, change markers, shutdown.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;

use e2e_tests::{named, test_details, TestHarness};
use fts_indexing::{AcquireMode, CustomBridge, DocumentBridge, IndexingError};
use fts_scheduler::RunOutcome;
use fts_types::{Action, AnnotationBody, Document, Entity, EntityKind, EntityRef};

/// Holds each document build long enough for runs to overlap.
struct Stall(Duration);

impl CustomBridge for Stall {
    fn name(&self) -> &str {
        "stall"
    }

    fn contribute(&self, _entity: &Entity, _document: &mut Document) -> Result<(), IndexingError> {
        thread::sleep(self.0);
        Ok(())
    }
}

fn stalling(ms: u64) -> DocumentBridge {
    DocumentBridge::new().with_custom(Arc::new(Stall(Duration::from_millis(ms))))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_two_concurrent_try_runs_execute_once() {
    let harness = TestHarness::new();
    for id in 1..=3 {
        harness
            .storage
            .put_entity(&named(EntityKind::Image, id, "plate"), Action::Insert)
            .unwrap();
    }
    let coordinator = harness.coordinator(stalling(150));

    let (first, second) = tokio::join!(
        coordinator.run(AcquireMode::Try),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            coordinator.run(AcquireMode::Try).await
        }
    );

    let report = first.unwrap().completed().expect("first run executes");
    assert_eq!(report.indexed(), 3);
    assert!(second.unwrap().is_skipped());

    let stats = coordinator.stats();
    assert_eq!((stats.completed, stats.skipped), (1, 1));
    assert_eq!(coordinator.status().await.unwrap().watermark, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wait_run_follows_running_one() {
    let harness = TestHarness::new();
    harness
        .storage
        .put_entity(&named(EntityKind::Image, 1, "first"), Action::Insert)
        .unwrap();
    let coordinator = harness.coordinator(stalling(200));

    let (first, second) = tokio::join!(
        coordinator.run(AcquireMode::Try),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            coordinator
                .run(AcquireMode::Wait(Duration::from_secs(5)))
                .await
        }
    );

    assert_eq!(first.unwrap().completed().unwrap().indexed(), 1);
    // Nothing left for the waiter
    assert_eq!(second.unwrap().completed().unwrap().indexed(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_annotation_link_reindexes_parent() {
    let harness = TestHarness::new();
    let parent = EntityRef::new(EntityKind::Dataset, 9);
    harness
        .storage
        .put_entity(&named(EntityKind::Dataset, 9, "screen"), Action::Insert)
        .unwrap();
    let comment = Entity::new(EntityKind::CommentAnnotation, 70, test_details())
        .with_body(AnnotationBody::Comment {
            text: "apoptosis observed".to_string(),
        });
    harness.storage.put_entity(&comment, Action::Insert).unwrap();

    let coordinator = harness.coordinator(DocumentBridge::new());
    coordinator.run(AcquireMode::Try).await.unwrap();
    assert!(harness.searcher().get("Dataset:9").unwrap().unwrap().first("comment").is_none());

    harness.storage.link_annotation(parent, 70, Some("qc")).unwrap();
    coordinator.run(AcquireMode::Try).await.unwrap();

    let doc = harness.searcher().get("Dataset:9").unwrap().unwrap();
    assert_eq!(doc.first("comment"), Some("apoptosis observed"));
    assert_eq!(doc.first("annotation_ns"), Some("qc"));

    // Editing the annotation reaches the parent through the parent lookup
    let edited = Entity::new(EntityKind::CommentAnnotation, 70, test_details())
        .with_body(AnnotationBody::Comment {
            text: "necrosis observed".to_string(),
        });
    harness.storage.put_entity(&edited, Action::Update).unwrap();
    coordinator.run(AcquireMode::Try).await.unwrap();

    let searcher = harness.searcher();
    let doc = searcher.get("Dataset:9").unwrap().unwrap();
    assert_eq!(doc.first("comment"), Some("necrosis observed"));
    assert_eq!(searcher.count("apoptosis").unwrap(), 0);

    harness.storage.unlink_annotation(parent, 70).unwrap();
    coordinator.run(AcquireMode::Try).await.unwrap();
    let doc = harness.searcher().get("Dataset:9").unwrap().unwrap();
    assert!(doc.first("comment").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_during_run_finishes_batch() {
    let harness = TestHarness::new();
    for id in 1..=2 {
        harness
            .storage
            .put_entity(&named(EntityKind::Image, id, "tile"), Action::Insert)
            .unwrap();
    }
    let coordinator = harness.coordinator(stalling(200));

    let running = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.run(AcquireMode::Try).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(coordinator.shutdown().await);
    let report = running.await.unwrap().unwrap().completed().unwrap();
    assert_eq!(report.indexed(), 2);
    assert!(matches!(
        coordinator.run(AcquireMode::Try).await.unwrap(),
        RunOutcome::Inactive
    ));
}
