//! GC dry-run vs live and resume-after-interruption scenarios (spec §8
//! scenarios 4 and 5).

mod support;

use datom_vault::gc::{run_gc, GcOptions, StoreBackend};
use datom_vault::metadata::gc_checkpoint::GcCheckpoint;
use datom_vault::metadata::to_pretty_text;
use datom_vault::source::ContentAddressedStore;
use datom_vault::task::LogTaskContext;
use datom_vault::Vault;

use support::fake_source::FakeChunkStore;

fn garbage_options(dry_run: bool) -> GcOptions {
    GcOptions {
        dry_run,
        retention_days: 1,
        batch_size: None,
        parallel_batches: None,
        checkpoint_interval: 1000,
        force_new: false,
        backend: StoreBackend::Default,
    }
}

#[test]
fn dry_run_reports_candidates_then_live_run_deletes_them() {
    let reachable = vec!["chunk-0".to_string(), "chunk-1".to_string()];
    let store = FakeChunkStore::with_garbage(reachable, 10);
    let ctx = LogTaskContext;

    let vault = Vault::new(std::sync::Arc::new(support::mem_blob_store::MemBlobStore::new()), "backups");

    let dry_result = vault.gc(&store, &garbage_options(true), &ctx);
    assert!(dry_result.success);
    assert_eq!(dry_result.would_delete_count, Some(10));
    assert_eq!(dry_result.deleted_count, None);
    // reachable counts the branch-head commit key itself plus the two
    // blobs its index root marks.
    assert_eq!(dry_result.reachable_count, 3);
    assert_eq!(store.key_count(), 12, "dry run must not delete anything");

    let live_result = vault.gc(&store, &garbage_options(false), &ctx);
    assert!(live_result.success);
    assert_eq!(live_result.deleted_count, Some(10));
    assert_eq!(live_result.reachable_count, dry_result.reachable_count);
    assert_eq!(store.key_count(), 2, "only the reachable chunks should remain");
}

#[test]
fn resumed_gc_after_interruption_reaches_the_same_reachable_set() {
    let reachable = vec!["chunk-0".to_string(), "chunk-1".to_string(), "chunk-2".to_string()];
    let ctx = LogTaskContext;

    let baseline_store = FakeChunkStore::with_garbage(reachable.clone(), 5);
    let baseline = run_gc(&baseline_store, &garbage_options(true), &ctx);
    assert!(baseline.success);
    assert!(!baseline.resumed);

    // Simulate a process restart right after the mark phase persisted its
    // final checkpoint for the one branch, but before the old process got
    // to the sweep phase.
    let interrupted_store = FakeChunkStore::with_garbage(reachable, 5);
    let partial = GcCheckpoint {
        gc_id: "interrupted-gc".to_string(),
        started_at: "2024-01-01T00:00:00Z".to_string(),
        last_checkpoint: "2024-01-01T00:00:00Z".to_string(),
        visited: ["head".to_string()].into_iter().collect(),
        reachable: ["head".to_string(), "chunk-0".to_string(), "chunk-1".to_string(), "chunk-2".to_string()]
            .into_iter()
            .collect(),
        pending_branches: std::collections::BTreeSet::new(),
        completed_branches: ["main".to_string()].into_iter().collect(),
        current_branch: None,
        stats: Default::default(),
        extra: Default::default(),
    };
    interrupted_store
        .write_gc_checkpoint(to_pretty_text(&partial).unwrap().as_bytes())
        .unwrap();

    let resumed = run_gc(&interrupted_store, &garbage_options(true), &ctx);
    assert!(resumed.success);
    assert!(resumed.resumed);
    assert_eq!(resumed.reachable_count, baseline.reachable_count);
}
