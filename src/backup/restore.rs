use crate::backup::{BackupMetadata, BACKUP_METADATA_FILE};
use crate::error::{Error, Result};
use crate::vfs::Vfs;
use std::ffi::OsString;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Materialise a backup into a fresh database directory.
///
/// No live database instance is required. `backup_path` must exist and
/// `target_path` must not; the caller removes the partially-populated
/// target if restore aborts.
pub fn restore_from_backup<P: AsRef<Path>, Q: AsRef<Path>>(
    backup_path: P,
    target_path: Q,
) -> Result<()> {
    let backup_path = backup_path.as_ref();
    let target_path = target_path.as_ref();

    if !Vfs::exists(backup_path) {
        return Err(Error::BackupMissing(backup_path.display().to_string()));
    }
    if Vfs::exists(target_path) {
        return Err(Error::TargetExists(target_path.display().to_string()));
    }

    let metadata_path = backup_path.join(BACKUP_METADATA_FILE);
    if !Vfs::exists(&metadata_path) {
        return Err(Error::BackupMissing(metadata_path.display().to_string()));
    }
    let metadata = BackupMetadata::read_from_file(&metadata_path)?;

    // The metadata names the original database file; everything restored
    // keeps its canonical basename under the target directory.
    let data_name = Path::new(&metadata.database_path)
        .file_name()
        .map(|n| n.to_os_string())
        .ok_or_else(|| {
            Error::CorruptMetadata(format!(
                "database path {:?} has no file name",
                metadata.database_path
            ))
        })?;

    Vfs::create_dir_all(target_path)?;

    let data_src = backup_path.join(&data_name);
    if !Vfs::exists(&data_src) {
        return Err(Error::VerificationFailed(format!(
            "backup data file {} not found",
            data_src.display()
        )));
    }
    Vfs::copy_file(&data_src, target_path.join(&data_name))?;

    // Shadow residue and the metadata record itself stay behind; only the
    // data file and the WAL belong in the restored directory.
    let mut wal_name = OsString::from(data_name);
    wal_name.push(".wal");
    let wal_src = backup_path.join(&wal_name);
    if Vfs::exists(&wal_src) {
        Vfs::copy_file(&wal_src, target_path.join(&wal_name))?;
    }

    verify_restore_integrity(target_path, &metadata)?;
    info!(
        backup = %backup_path.display(),
        target = %target_path.display(),
        num_pages = metadata.num_pages,
        "restore completed"
    );
    Ok(())
}

fn verify_restore_integrity(target_path: &Path, metadata: &BackupMetadata) -> Result<()> {
    let data_name = Path::new(&metadata.database_path)
        .file_name()
        .ok_or_else(|| {
            Error::CorruptMetadata(format!(
                "database path {:?} has no file name",
                metadata.database_path
            ))
        })?;
    let restored = target_path.join(data_name);
    if !Vfs::exists(&restored) {
        return Err(Error::VerificationFailed(format!(
            "restored data file {} not found",
            restored.display()
        )));
    }
    let size = Vfs::file_size(&restored)?;
    if size != metadata.backup_size_bytes {
        return Err(Error::VerificationFailed(format!(
            "restored data file size mismatch: expected {} but got {}",
            metadata.backup_size_bytes, size
        )));
    }
    Ok(())
}

/// Scan a directory of backup directories, returning the metadata of each
/// readable backup, newest first. Unreadable entries are skipped.
pub fn list_backups<P: AsRef<Path>>(root: P) -> Result<Vec<BackupMetadata>> {
    let root = root.as_ref();
    let mut backups = Vec::new();
    if !Vfs::exists(root) {
        return Ok(backups);
    }

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let metadata_path = path.join(BACKUP_METADATA_FILE);
        if !Vfs::exists(&metadata_path) {
            continue;
        }
        match BackupMetadata::read_from_file(&metadata_path) {
            Ok(metadata) => backups.push(metadata),
            Err(e) => {
                warn!(path = %metadata_path.display(), error = %e, "skipping unreadable backup");
            }
        }
    }

    backups.sort_by(|a, b| b.backup_timestamp.cmp(&a.backup_timestamp));
    Ok(backups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_backup(dir: &Path, num_pages: u64, page_size: u64, stamp: u64) {
        Vfs::create_dir_all(dir).unwrap();
        let metadata = BackupMetadata {
            snapshot_ts: stamp,
            database_id: "db".to_string(),
            database_path: "/data/ryu.db".to_string(),
            backup_timestamp: stamp,
            num_pages,
            backup_size_bytes: num_pages * page_size,
            ryu_version: "0.1.0".to_string(),
        };
        metadata
            .write_to_file(dir.join(BACKUP_METADATA_FILE))
            .unwrap();
        fs::write(dir.join("ryu.db"), vec![0u8; (num_pages * page_size) as usize]).unwrap();
    }

    #[test]
    fn missing_backup_is_rejected() {
        let dir = tempdir().unwrap();
        let err = restore_from_backup(dir.path().join("nope"), dir.path().join("new")).unwrap_err();
        assert!(matches!(err, Error::BackupMissing(_)));
    }

    #[test]
    fn existing_target_is_rejected() {
        let dir = tempdir().unwrap();
        let backup = dir.path().join("backup");
        write_backup(&backup, 2, 64, 1);
        let target = dir.path().join("existing");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("file"), b"occupied").unwrap();

        let err = restore_from_backup(&backup, &target).unwrap_err();
        assert!(matches!(err, Error::TargetExists(_)));
    }

    #[test]
    fn restore_copies_data_and_skips_metadata_and_shadow() {
        let dir = tempdir().unwrap();
        let backup = dir.path().join("backup");
        write_backup(&backup, 2, 64, 1);
        fs::write(backup.join("leftover.shadow"), b"residue").unwrap();
        fs::write(backup.join("ryu.db.wal"), b"wal bytes").unwrap();

        let target = dir.path().join("restored");
        restore_from_backup(&backup, &target).unwrap();

        assert!(target.join("ryu.db").exists());
        assert!(target.join("ryu.db.wal").exists());
        assert!(!target.join(BACKUP_METADATA_FILE).exists());
        assert!(!target.join("leftover.shadow").exists());
    }

    #[test]
    fn size_mismatch_fails_verification() {
        let dir = tempdir().unwrap();
        let backup = dir.path().join("backup");
        write_backup(&backup, 2, 64, 1);
        // Truncate the data file behind the metadata's back.
        fs::write(backup.join("ryu.db"), vec![0u8; 64]).unwrap();

        let err = restore_from_backup(&backup, dir.path().join("restored")).unwrap_err();
        assert!(matches!(err, Error::VerificationFailed(_)));
    }

    #[test]
    fn list_backups_sorts_newest_first() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("backups");
        write_backup(&root.join("old"), 1, 64, 100);
        write_backup(&root.join("new"), 1, 64, 300);
        write_backup(&root.join("mid"), 1, 64, 200);
        // Not a backup; skipped.
        Vfs::create_dir_all(root.join("junk")).unwrap();

        let backups = list_backups(&root).unwrap();
        let stamps: Vec<u64> = backups.iter().map(|b| b.backup_timestamp).collect();
        assert_eq!(stamps, vec![300, 200, 100]);
    }

    #[test]
    fn list_backups_on_missing_root_is_empty() {
        let dir = tempdir().unwrap();
        assert!(list_backups(dir.path().join("nothing")).unwrap().is_empty());
    }
}
