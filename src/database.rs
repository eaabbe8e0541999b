//! Minimal host façade wiring the storage pieces a backup needs.
//!
//! The kernel proper (query engine, catalog, transaction manager) lives
//! elsewhere; this type owns the paged data file, its WAL segment, the
//! transaction clock, and the backup-manager lifecycle.

use crate::backup::{BackupManager, BackupState};
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::storage::{DataFile, PageStore};
use crate::txn::TxnClock;
use crate::vfs::Vfs;
use crate::wal::WalWriter;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct Database {
    path: PathBuf,
    database_id: String,
    config: DatabaseConfig,
    store: Arc<PageStore>,
    wal: Arc<WalWriter>,
    clock: Arc<TxnClock>,
    backup: Mutex<Option<Arc<BackupManager>>>,
}

impl Database {
    /// Create a fresh database file (plus its WAL segment) at `path`.
    pub fn create<P: AsRef<Path>>(path: P, config: DatabaseConfig) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::InvalidArgument("database path is empty".into()));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                Vfs::create_dir_all(parent)?;
            }
        }
        let data = Arc::new(DataFile::create(path, config.page_size)?);
        let wal = Arc::new(WalWriter::create(path)?);
        let database_id = Uuid::new_v4().to_string();
        info!(path = %path.display(), database_id = %database_id, "created database");
        Ok(Self {
            path: path.to_path_buf(),
            database_id,
            config,
            store: Arc::new(PageStore::new(data)),
            wal,
            clock: Arc::new(TxnClock::new()),
            backup: Mutex::new(None),
        })
    }

    /// Open an existing database file, e.g. one materialised by restore.
    pub fn open<P: AsRef<Path>>(path: P, config: DatabaseConfig) -> Result<Self> {
        let path = path.as_ref();
        let data = Arc::new(DataFile::open(path, config.page_size)?);
        let wal = Arc::new(WalWriter::open(path)?);
        let database_id = Uuid::new_v4().to_string();
        info!(path = %path.display(), database_id = %database_id, "opened database");
        Ok(Self {
            path: path.to_path_buf(),
            database_id,
            config,
            store: Arc::new(PageStore::new(data)),
            wal,
            clock: Arc::new(TxnClock::new()),
            backup: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    pub fn store(&self) -> &Arc<PageStore> {
        &self.store
    }

    pub fn wal(&self) -> &Arc<WalWriter> {
        &self.wal
    }

    pub fn clock(&self) -> &Arc<TxnClock> {
        &self.clock
    }

    /// Start an online backup into `backup_path`, returning the manager
    /// driving it.
    ///
    /// A manager instance is terminal after one job, so a finished one is
    /// replaced with a fresh manager here; a running one makes this fail
    /// with `AlreadyRunning`.
    pub fn start_backup<P: AsRef<Path>>(&self, backup_path: P) -> Result<Arc<BackupManager>> {
        let mut slot = self.backup.lock();
        if let Some(current) = slot.as_ref() {
            match current.get_backup_state() {
                BackupState::InProgress | BackupState::Finalizing => {
                    return Err(Error::AlreadyRunning);
                }
                BackupState::Idle => {
                    let manager = current.clone();
                    manager.start_backup(backup_path)?;
                    return Ok(manager);
                }
                BackupState::Completed | BackupState::Failed => {}
            }
        }
        let manager = Arc::new(BackupManager::new(
            self.store.clone(),
            self.clock.clone(),
            self.path.clone(),
            self.database_id.clone(),
            self.config.backup.clone(),
        ));
        *slot = Some(manager.clone());
        manager.start_backup(backup_path)?;
        Ok(manager)
    }

    /// The manager of the most recent backup job, if any.
    pub fn backup_manager(&self) -> Option<Arc<BackupManager>> {
        self.backup.lock().clone()
    }

    pub fn sync(&self) -> Result<()> {
        self.store.sync()?;
        self.wal.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_lays_down_data_and_wal_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ryu.db");
        let db = Database::create(&path, DatabaseConfig::default()).unwrap();
        assert!(path.exists());
        assert!(dir.path().join("ryu.db.wal").exists());
        assert!(!db.database_id().is_empty());
        assert!(db.backup_manager().is_none());
    }

    #[test]
    fn open_after_create_sees_same_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ryu.db");
        let page_size = DatabaseConfig::default().page_size;
        {
            let db = Database::create(&path, DatabaseConfig::default()).unwrap();
            let idx = db.store().allocate_page().unwrap();
            db.store().write_page(idx, &vec![42u8; page_size]).unwrap();
            db.sync().unwrap();
        }
        let db = Database::open(&path, DatabaseConfig::default()).unwrap();
        assert_eq!(db.store().page_count(), 1);
        let mut buf = vec![0u8; page_size];
        db.store().read_page(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 42));
    }

    #[test]
    fn finished_backup_manager_is_replaced_on_next_start() {
        let dir = tempdir().unwrap();
        let db = Database::create(dir.path().join("ryu.db"), DatabaseConfig::default()).unwrap();
        db.store().allocate_page().unwrap();

        let first = db.start_backup(dir.path().join("b1")).unwrap();
        assert_eq!(first.wait_for_completion(), BackupState::Completed);

        let second = db.start_backup(dir.path().join("b2")).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.wait_for_completion(), BackupState::Completed);
    }
}
