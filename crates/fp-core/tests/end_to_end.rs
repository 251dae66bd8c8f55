#![forbid(unsafe_code)]

use fp_core::{
    CancelToken, EventLog, MismatchPolicy, NoopObserver, RunConfig, StopReason, Verdict,
    VerifyStop, run_probe, verify_existing,
};
use fp_error::FpError;
use fp_types::{BLOCK_DIR_NAME, BlockIndex, BlockSize, Phase};
use std::fs;

const BLOCK: u64 = 16 * 1024;

fn config(target: &std::path::Path) -> RunConfig {
    RunConfig::new(target)
        .with_block_size(BlockSize::new(BLOCK).unwrap())
        .with_max_total_bytes(Some(6 * BLOCK))
}

#[test]
fn limited_probe_on_real_directory_is_genuine_and_cleans_up() {
    let target = tempfile::tempdir().unwrap();
    let log = EventLog::new();
    let result = run_probe(config(target.path()), CancelToken::new(), &log).unwrap();

    assert_eq!(result.write_stop, Some(StopReason::LimitReached));
    assert_eq!(result.last_written_index, Some(BlockIndex(5)));
    assert_eq!(result.bytes_written, 6 * BLOCK);
    assert_eq!(result.bytes_verified, 6 * BLOCK);
    assert_eq!(result.verdict(), Verdict::Genuine);
    assert_eq!(log.indices(Phase::Verify).len(), 6);

    let cleanup = result.cleanup.unwrap();
    assert_eq!(cleanup.deleted, 6);
    assert!(cleanup.released);
    assert!(!target.path().join(BLOCK_DIR_NAME).exists());
}

#[test]
fn retained_blocks_can_be_verified_later() {
    let target = tempfile::tempdir().unwrap();
    let first = run_probe(
        config(target.path()).with_cleanup(false),
        CancelToken::new(),
        &NoopObserver,
    )
    .unwrap();
    assert!(first.cleanup.is_none());

    // Damage block 3 on disk.
    let path = target
        .path()
        .join(BLOCK_DIR_NAME)
        .join("block-0000000003.bin");
    let mut bytes = fs::read(&path).unwrap();
    bytes[100] ^= 0xFF;
    fs::write(&path, bytes).unwrap();

    let second = verify_existing(
        config(target.path())
            .with_cleanup(false)
            .with_mismatch_policy(MismatchPolicy::ScanAll),
        CancelToken::new(),
        &NoopObserver,
    )
    .unwrap();

    assert_eq!(second.write_stop, None);
    assert_eq!(second.blocks_verified, 3);
    assert_eq!(second.blocks_matched, 5);
    assert_eq!(second.verify_stop, VerifyStop::Completed);
    assert_eq!(second.first_corrupted_index, Some(BlockIndex(3)));
    assert_eq!(second.verdict(), Verdict::Corrupted);
}

#[test]
fn missing_target_fails_before_any_write() {
    let target = tempfile::tempdir().unwrap();
    let missing = target.path().join("nope");
    let err = run_probe(config(&missing), CancelToken::new(), &NoopObserver).unwrap_err();
    assert!(matches!(err, FpError::NotFound(_)));
}

#[test]
fn verify_without_previous_run_reports_not_found() {
    let target = tempfile::tempdir().unwrap();
    let err = verify_existing(config(target.path()), CancelToken::new(), &NoopObserver)
        .unwrap_err();
    assert!(matches!(err, FpError::NotFound(_)));
}

#[test]
fn probe_refuses_blocks_left_by_an_earlier_run() {
    let target = tempfile::tempdir().unwrap();
    run_probe(
        config(target.path()).with_cleanup(false),
        CancelToken::new(),
        &NoopObserver,
    )
    .unwrap();

    let err = run_probe(
        config(target.path()).with_max_total_bytes(Some(3 * BLOCK)),
        CancelToken::new(),
        &NoopObserver,
    )
    .unwrap_err();
    assert!(matches!(err, FpError::InvalidConfig(_)));

    // The refused run touched nothing, so the kept blocks still verify.
    let files = fs::read_dir(target.path().join(BLOCK_DIR_NAME))
        .unwrap()
        .count();
    assert_eq!(files, 6);
    let verified = verify_existing(config(target.path()), CancelToken::new(), &NoopObserver)
        .unwrap();
    assert_eq!(verified.bytes_verified, 6 * BLOCK);
    assert!(!target.path().join(BLOCK_DIR_NAME).exists());

    // Once cleaned, a shorter run leaves exactly its own blocks behind.
    let second = run_probe(
        config(target.path())
            .with_max_total_bytes(Some(3 * BLOCK))
            .with_cleanup(false),
        CancelToken::new(),
        &NoopObserver,
    )
    .unwrap();
    assert_eq!(second.last_written_index, Some(BlockIndex(2)));
    let files = fs::read_dir(target.path().join(BLOCK_DIR_NAME))
        .unwrap()
        .count();
    assert_eq!(files, 3);
}
