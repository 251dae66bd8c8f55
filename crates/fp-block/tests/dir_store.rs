#![forbid(unsafe_code)]

use fp_block::{
    BlockFile, BlockPattern, BlockStore, BlockWriter, DirBlockStore, WriteOutcome, block_file_name,
    discover_contiguous, generate,
};
use fp_error::FpError;
use fp_types::{BLOCK_DIR_NAME, BlockIndex};
use std::fs;

const BLOCK: u64 = 64 * 1024;

#[test]
fn blocks_land_in_dedicated_directory() {
    let target = tempfile::tempdir().unwrap();
    let store = DirBlockStore::create(target.path()).unwrap();
    assert_eq!(store.dir(), target.path().join(BLOCK_DIR_NAME));

    let writer = BlockWriter::new(&store);
    for i in 0..3 {
        let pattern = BlockPattern::new(BlockIndex(i), BLOCK);
        assert!(matches!(
            writer.write(BlockIndex(i), &pattern),
            WriteOutcome::Success
        ));
    }

    let on_disk = fs::read(store.dir().join(block_file_name(BlockIndex(1)))).unwrap();
    assert_eq!(on_disk, generate(BlockIndex(1), BLOCK));
    assert_eq!(
        store.list().unwrap(),
        vec![BlockIndex(0), BlockIndex(1), BlockIndex(2)]
    );
    assert_eq!(discover_contiguous(&store).unwrap(), Some(BlockIndex(2)));
}

#[test]
fn unrelated_files_are_not_listed() {
    let target = tempfile::tempdir().unwrap();
    let store = DirBlockStore::create(target.path()).unwrap();
    fs::write(store.dir().join("notes.txt"), b"hello").unwrap();
    fs::write(store.dir().join(block_file_name(BlockIndex(0))), b"x").unwrap();
    assert_eq!(store.list().unwrap(), vec![BlockIndex(0)]);
}

#[test]
fn reopening_finds_blocks_from_an_earlier_handle() {
    let target = tempfile::tempdir().unwrap();
    {
        let store = DirBlockStore::create(target.path()).unwrap();
        let writer = BlockWriter::new(&store);
        let pattern = BlockPattern::new(BlockIndex(0), BLOCK);
        assert!(writer.write(BlockIndex(0), &pattern).is_success());
    }

    let reopened = DirBlockStore::open_existing(target.path()).unwrap();
    let file = reopened.open(BlockIndex(0)).unwrap();
    assert_eq!(file.len_bytes().unwrap(), BLOCK);
}

#[test]
fn open_existing_requires_block_directory() {
    let target = tempfile::tempdir().unwrap();
    assert!(matches!(
        DirBlockStore::open_existing(target.path()),
        Err(FpError::NotFound(_))
    ));
}

#[test]
fn create_rejects_missing_or_non_directory_target() {
    let target = tempfile::tempdir().unwrap();
    let missing = target.path().join("nope");
    assert!(DirBlockStore::create(&missing).is_err());

    let file = target.path().join("plain");
    fs::write(&file, b"").unwrap();
    assert!(matches!(
        DirBlockStore::create(&file),
        Err(FpError::NotFound(_))
    ));
}

#[test]
fn remove_is_idempotent_and_release_needs_empty_directory() {
    let target = tempfile::tempdir().unwrap();
    let store = DirBlockStore::create(target.path()).unwrap();
    let writer = BlockWriter::new(&store);
    let pattern = BlockPattern::new(BlockIndex(0), 4096);
    assert!(writer.write(BlockIndex(0), &pattern).is_success());

    assert!(!store.release().unwrap());
    assert!(store.remove(BlockIndex(0)).unwrap());
    assert!(!store.remove(BlockIndex(0)).unwrap());
    assert!(store.release().unwrap());
    assert!(!store.dir().exists());
    assert!(!store.release().unwrap());
}
