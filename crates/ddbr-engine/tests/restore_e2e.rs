//! End-to-end restore tests over in-process fakes
//!
//! The full coordinator pipeline runs against a `MemoryObjectStore` seeded
//! with a complete export set and a `MockTableClient` standing in for the
//! target table.
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use common::{
    full_line, seed_export, table_item, DataFile, MockTableClient, BUCKET, EXPORT_PREFIX,
};
use ddbr_common::RestoreError;
use ddbr_engine::{
    BatchWriter, CheckpointState, CheckpointStore, Coordinator, JsonRecordDecoder, MemoryObjectStore,
    MemoryStore, ObjectLineStreamer, RestoreConfig, S3ManifestLoader, TableWriter,
};

const TABLE: &str = "restore-target";

struct Harness {
    store: Arc<MemoryObjectStore>,
    table: Arc<MockTableClient>,
    checkpoints: Arc<MemoryStore>,
    cancel: CancellationToken,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryObjectStore::new()),
            table: Arc::new(MockTableClient::new()),
            checkpoints: Arc::new(MemoryStore::new()),
            cancel: CancellationToken::new(),
        }
    }

    fn coordinator(&self, cfg: RestoreConfig) -> Coordinator {
        let writer = Arc::new(TableWriter::new(
            self.table.clone(),
            TABLE,
            cfg.batch_size,
            self.cancel.clone(),
        )) as Arc<dyn BatchWriter>;

        Coordinator::new(
            cfg,
            Arc::new(S3ManifestLoader::new(self.store.clone())),
            Arc::new(ObjectLineStreamer::new(self.store.clone(), 2)),
            Arc::new(JsonRecordDecoder::new()),
            writer,
            self.checkpoints.clone(),
            None,
        )
    }

    fn config(&self, export_uri: &str) -> RestoreConfig {
        RestoreConfig {
            table_name: TABLE.to_string(),
            export_uri: export_uri.to_string(),
            max_workers: 2,
            ..RestoreConfig::default()
        }
    }
}

#[tokio::test]
async fn full_export_single_file_restores_all_items() {
    let h = Harness::new();
    let uri = seed_export(
        &h.store,
        "FULL_EXPORT",
        vec![DataFile::gz(
            "part-0001.json.gz",
            vec![full_line("1", "1"), full_line("1", "2"), full_line("1", "3")],
        )],
    );

    let coordinator = h.coordinator(h.config(&uri));
    coordinator.run(h.cancel.clone()).await.unwrap();

    assert_eq!(h.table.item_count(TABLE), 3);
    for sk in ["1", "2", "3"] {
        assert!(h.table.item_exists(TABLE, "1", sk));
    }

    let metrics = coordinator.metrics();
    assert_eq!(metrics.records_processed(), 3);
    assert_eq!(metrics.batches_written(), 1);
    assert_eq!(metrics.corrupt_count(), 0);

    // The only file ends with a completion checkpoint
    let state = h.checkpoints.load().await.unwrap();
    assert!(state.is_completed());
}

#[tokio::test]
async fn incremental_export_applies_mixed_operations() {
    let h = Harness::new();

    // Starting table: pk 1..3 x sk 1..3, each with a `number` attribute
    for pk in ["1", "2", "3"] {
        for sk in ["1", "2", "3"] {
            h.table.seed_item(TABLE, table_item(pk, sk));
        }
    }

    let keys = |pk: &str, sk: &str| format!(r#"{{"pk":{{"S":"{pk}"}},"sk":{{"S":"{sk}"}}}}"#);
    let lines = vec![
        // PUT pk=4,sk=2
        format!(
            r#"{{"Keys":{},"NewImage":{{"pk":{{"S":"4"}},"sk":{{"S":"2"}},"number":{{"N":"7"}}}}}}"#,
            keys("4", "2"),
        ),
        // DELETE pk=1,sk=1 and pk=2,sk=3
        format!(
            r#"{{"Keys":{},"OldImage":{{"pk":{{"S":"1"}},"sk":{{"S":"1"}},"number":{{"N":"7"}}}}}}"#,
            keys("1", "1"),
        ),
        format!(
            r#"{{"Keys":{},"OldImage":{{"pk":{{"S":"2"}},"sk":{{"S":"3"}},"number":{{"N":"7"}}}}}}"#,
            keys("2", "3"),
        ),
        // UPDATE pk=1,sk=3: add bin_update
        format!(
            r#"{{"Keys":{},"NewImage":{{"pk":{{"S":"1"}},"sk":{{"S":"3"}},"number":{{"N":"7"}},"bin_update":{{"B":"aGk="}}}},"OldImage":{{"pk":{{"S":"1"}},"sk":{{"S":"3"}},"number":{{"N":"7"}}}}}}"#,
            keys("1", "3"),
        ),
        // UPDATE pk=3,sk=2: remove number
        format!(
            r#"{{"Keys":{},"NewImage":{{"pk":{{"S":"3"}},"sk":{{"S":"2"}}}},"OldImage":{{"pk":{{"S":"3"}},"sk":{{"S":"2"}},"number":{{"N":"7"}}}}}}"#,
            keys("3", "2"),
        ),
    ];

    let uri = seed_export(
        &h.store,
        "INCREMENTAL_EXPORT",
        vec![DataFile::gz("part-0001.json.gz", lines)],
    );

    let mut cfg = h.config(&uri);
    cfg.export_type = "INCREMENTAL".parse().unwrap();
    cfg.view_type = "NEW_AND_OLD".parse().unwrap();
    let coordinator = h.coordinator(cfg);
    coordinator.run(h.cancel.clone()).await.unwrap();

    // 9 - 2 deletes + 1 put = 8 items
    assert_eq!(h.table.item_count(TABLE), 8);
    assert!(!h.table.item_exists(TABLE, "1", "1"));
    assert!(!h.table.item_exists(TABLE, "2", "3"));
    assert!(h.table.item_exists(TABLE, "4", "2"));

    let updated = h.table.get_item(TABLE, "1", "3").unwrap();
    assert!(updated.contains_key("bin_update"));

    let trimmed = h.table.get_item(TABLE, "3", "2").unwrap();
    assert!(!trimmed.contains_key("number"));

    assert_eq!(coordinator.metrics().records_processed(), 5);
}

#[tokio::test]
async fn corrupt_lines_are_counted_and_skipped() {
    let h = Harness::new();

    let mut lines: Vec<String> = (0..10).map(|i| full_line("1", &i.to_string())).collect();
    lines[2] = r#"{"bogus":true}"#.to_string();
    lines[6] = r#"{"bogus":true}"#.to_string();

    let uri = seed_export(
        &h.store,
        "FULL_EXPORT",
        vec![DataFile::gz("part-0001.json.gz", lines)],
    );

    let coordinator = h.coordinator(h.config(&uri));
    coordinator.run(h.cancel.clone()).await.unwrap();

    let metrics = coordinator.metrics();
    assert_eq!(metrics.records_processed(), 8);
    assert_eq!(metrics.corrupt_count(), 2);
    assert_eq!(h.table.item_count(TABLE), 8);
}

#[tokio::test]
async fn resume_mid_file_processes_remaining_lines() {
    let h = Harness::new();

    // Plain (uncompressed) data file so byte offsets are range-seekable
    let lines: Vec<String> = (0..100).map(|i| full_line("1", &i.to_string())).collect();

    // Byte offset of line index 40: lines 0..=39 plus their newlines
    let offset_at_40: i64 = lines[..40].iter().map(|l| l.len() as i64 + 1).sum();

    let uri = seed_export(
        &h.store,
        "FULL_EXPORT",
        vec![DataFile::plain("part-0001.json", lines)],
    );

    let file_key = format!("{EXPORT_PREFIX}/data/part-0001.json");
    h.checkpoints
        .save(&CheckpointState::at(&file_key, offset_at_40))
        .await
        .unwrap();

    let coordinator = h.coordinator(h.config(&uri));
    coordinator.run(h.cancel.clone()).await.unwrap();

    // Lines 40..99 processed; nothing before the checkpoint is re-read
    assert_eq!(coordinator.metrics().records_processed(), 60);
    assert_eq!(h.table.item_count(TABLE), 60);
    assert!(h.checkpoints.load().await.unwrap().is_completed());
}

#[tokio::test]
async fn completed_sentinel_skips_file() {
    let h = Harness::new();
    let uri = seed_export(
        &h.store,
        "FULL_EXPORT",
        vec![DataFile::gz(
            "part-0001.json.gz",
            vec![full_line("1", "1"), full_line("1", "2")],
        )],
    );

    let file_key = format!("{EXPORT_PREFIX}/data/part-0001.json.gz");
    h.checkpoints
        .save(&CheckpointState::completed(&file_key))
        .await
        .unwrap();

    let coordinator = h.coordinator(h.config(&uri));
    coordinator.run(h.cancel.clone()).await.unwrap();

    assert_eq!(coordinator.metrics().records_processed(), 0);
    assert_eq!(h.table.item_count(TABLE), 0);
}

#[tokio::test]
async fn files_behind_checkpoint_are_not_enqueued() {
    let h = Harness::new();
    let uri = seed_export(
        &h.store,
        "FULL_EXPORT",
        vec![
            DataFile::gz("part-0001.json.gz", vec![full_line("1", "1")]),
            DataFile::gz("part-0002.json.gz", vec![full_line("2", "1"), full_line("2", "2")]),
            DataFile::gz("part-0003.json.gz", vec![full_line("3", "1")]),
        ],
    );

    // A previous run finished part-0001 and was inside part-0002
    let second = format!("{EXPORT_PREFIX}/data/part-0002.json.gz");
    h.checkpoints
        .save(&CheckpointState::at(&second, 0))
        .await
        .unwrap();

    let coordinator = h.coordinator(h.config(&uri));
    coordinator.run(h.cancel.clone()).await.unwrap();

    // part-0001 skipped entirely; parts 2 and 3 restored
    assert_eq!(coordinator.metrics().records_processed(), 3);
    assert!(!h.table.item_exists(TABLE, "1", "1"));
    assert!(h.table.item_exists(TABLE, "2", "1"));
    assert!(h.table.item_exists(TABLE, "3", "1"));
}

#[tokio::test]
async fn throttling_storm_does_not_lose_records() {
    let h = Harness::new();
    for _ in 0..5 {
        h.table
            .script_error(RestoreError::throttled("capacity exceeded"));
    }

    let uri = seed_export(
        &h.store,
        "FULL_EXPORT",
        vec![DataFile::gz(
            "part-0001.json.gz",
            vec![full_line("1", "1"), full_line("1", "2"), full_line("1", "3")],
        )],
    );

    let coordinator = h.coordinator(h.config(&uri));
    coordinator.run(h.cancel.clone()).await.unwrap();

    // 5 throttled attempts plus the effective write
    assert_eq!(h.table.batch_sizes().len(), 6);
    assert_eq!(h.table.item_count(TABLE), 3);
}

#[tokio::test]
async fn invalid_export_uri_fails_before_any_fetch() {
    let h = Harness::new();
    let mut cfg = h.config("not-an-s3-uri");
    cfg.export_uri = "not-an-s3-uri".to_string();

    let coordinator = h.coordinator(cfg);
    let err = coordinator.run(h.cancel.clone()).await.unwrap_err();
    assert!(matches!(err, RestoreError::InvalidUri { .. }));
    assert_eq!(h.table.item_count(TABLE), 0);
}

#[tokio::test]
async fn missing_manifest_surfaces_not_found() {
    let h = Harness::new();
    let cfg = h.config(&format!("s3://{BUCKET}/{EXPORT_PREFIX}/manifest-summary.json"));

    let coordinator = h.coordinator(cfg);
    let err = coordinator.run(h.cancel.clone()).await.unwrap_err();
    assert!(matches!(err, RestoreError::ManifestNotFound { .. }));
}

#[tokio::test]
async fn pre_cancelled_run_returns_cancelled() {
    let h = Harness::new();
    let uri = seed_export(
        &h.store,
        "FULL_EXPORT",
        vec![DataFile::gz("part-0001.json.gz", vec![full_line("1", "1")])],
    );

    h.cancel.cancel();
    let coordinator = h.coordinator(h.config(&uri));
    let err = coordinator.run(h.cancel.clone()).await.unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn multiple_files_fan_out_across_workers() {
    let h = Harness::new();
    let files: Vec<DataFile> = (1..=6)
        .map(|i| {
            DataFile::gz(
                &format!("part-000{i}.json.gz"),
                vec![full_line(&i.to_string(), "1"), full_line(&i.to_string(), "2")],
            )
        })
        .collect();
    let uri = seed_export(&h.store, "FULL_EXPORT", files);

    let mut cfg = h.config(&uri);
    cfg.max_workers = 4;
    let coordinator = h.coordinator(cfg);
    coordinator.run(h.cancel.clone()).await.unwrap();

    assert_eq!(coordinator.metrics().records_processed(), 12);
    assert_eq!(h.table.item_count(TABLE), 12);
    // No batch ever exceeds the service cap
    assert!(h.table.batch_sizes().iter().all(|n| *n <= 25));
}
