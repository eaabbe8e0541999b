//! Restore scenarios: preconditions, determinism, and reopening a
//! restored database.

use ryu_backup::{
    list_backups, restore_from_backup, BackupState, Database, DatabaseConfig, Error,
};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const PAGE_SIZE: usize = 4096;

fn populated_backup(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let db_path = dir.join("ryu.db");
    let backup_path = dir.join("backup");

    let db = Database::create(&db_path, DatabaseConfig::default()).unwrap();
    for i in 0..32u64 {
        let mut page = vec![0u8; PAGE_SIZE];
        page.iter_mut()
            .enumerate()
            .for_each(|(j, b)| *b = (i as u8).wrapping_add(j as u8));
        db.store().write_page(i, &page).unwrap();
        db.wal().append(format!("record:{}", i).as_bytes()).unwrap();
    }
    db.sync().unwrap();

    let manager = db.start_backup(&backup_path).unwrap();
    assert_eq!(manager.wait_for_completion(), BackupState::Completed);
    (db_path, backup_path)
}

#[test]
fn restore_preconditions_are_enforced() {
    let dir = tempdir().unwrap();
    let (_db_path, backup_path) = populated_backup(dir.path());

    let err =
        restore_from_backup(dir.path().join("nope"), dir.path().join("new")).unwrap_err();
    assert!(matches!(err, Error::BackupMissing(_)));

    let occupied = dir.path().join("existing");
    fs::create_dir_all(&occupied).unwrap();
    fs::write(occupied.join("file"), b"contents").unwrap();
    let err = restore_from_backup(&backup_path, &occupied).unwrap_err();
    assert!(matches!(err, Error::TargetExists(_)));
}

#[test]
fn restore_runs_are_deterministic() {
    let dir = tempdir().unwrap();
    let (_db_path, backup_path) = populated_backup(dir.path());

    let first = dir.path().join("restore_a");
    let second = dir.path().join("restore_b");
    restore_from_backup(&backup_path, &first).unwrap();
    restore_from_backup(&backup_path, &second).unwrap();

    assert_eq!(
        fs::read(first.join("ryu.db")).unwrap(),
        fs::read(second.join("ryu.db")).unwrap()
    );
    assert_eq!(
        fs::read(first.join("ryu.db.wal")).unwrap(),
        fs::read(second.join("ryu.db.wal")).unwrap()
    );
}

#[test]
fn restored_database_opens_with_original_pages() {
    let dir = tempdir().unwrap();
    let (db_path, backup_path) = populated_backup(dir.path());

    let target = dir.path().join("restored");
    restore_from_backup(&backup_path, &target).unwrap();

    let restored = Database::open(target.join("ryu.db"), DatabaseConfig::default()).unwrap();
    assert_eq!(restored.store().page_count(), 32);

    let original = fs::read(&db_path).unwrap();
    let mut buf = vec![0u8; PAGE_SIZE];
    for i in 0..32u64 {
        restored.store().read_page(i, &mut buf).unwrap();
        assert_eq!(
            &buf[..],
            &original[i as usize * PAGE_SIZE..(i as usize + 1) * PAGE_SIZE]
        );
    }
}

#[test]
fn backups_are_listable_from_a_common_root() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("ryu.db");
    let root = dir.path().join("backups");

    let db = Database::create(&db_path, DatabaseConfig::default()).unwrap();
    db.store().allocate_page().unwrap();
    db.sync().unwrap();

    for name in ["monday", "tuesday"] {
        let manager = db.start_backup(root.join(name)).unwrap();
        assert_eq!(manager.wait_for_completion(), BackupState::Completed);
    }

    let backups = list_backups(&root).unwrap();
    assert_eq!(backups.len(), 2);
    for metadata in &backups {
        assert_eq!(metadata.num_pages, 1);
        assert_eq!(metadata.database_id, db.database_id());
    }
}
