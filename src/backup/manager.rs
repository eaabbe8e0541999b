use crate::backup::shadow::BackupShadowFile;
use crate::backup::{BackupMetadata, BackupState, BACKUP_METADATA_FILE};
use crate::config::BackupConfig;
use crate::error::{Error, Result};
use crate::storage::{PageId, PageModificationObserver, PageStore};
use crate::txn::TimestampOracle;
use crate::version::RYU_VERSION;
use crate::vfs::Vfs;
use crate::wal::wal_path;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// The main-file copy phase owns this share of the progress range; the
/// WAL phase advances to `WAL_PHASE_PROGRESS` and 1.0 is stored only on
/// COMPLETED.
const MAIN_COPY_PROGRESS_SPAN: f64 = 0.7;
const WAL_PHASE_PROGRESS: f64 = 0.9;
const PROGRESS_UPDATE_INTERVAL: u64 = 100;
const YIELD_INTERVAL: u64 = 1000;

/// Orchestrates one asynchronous snapshot backup of a live database.
///
/// `start_backup` captures a snapshot timestamp, installs the manager as
/// the page store's modification observer, and spawns a single worker
/// thread; the call returns immediately. State and progress getters never
/// block on I/O. Terminal states stay terminal: a manager runs at most
/// one job, and the host constructs a fresh manager for the next one.
pub struct BackupManager {
    inner: Arc<BackupInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct BackupInner {
    store: Arc<PageStore>,
    oracle: Arc<dyn TimestampOracle>,
    database_path: PathBuf,
    database_id: String,
    config: BackupConfig,

    state: AtomicU8,
    /// f64 progress stored as bits; updated monotonically.
    progress: AtomicU64,
    cancel_requested: AtomicBool,

    /// Job lock. The worker's decide-shadow-vs-main / read / mark-copied
    /// critical section and the observer's check / preserve critical
    /// section are mutually exclusive on it.
    job: Mutex<Option<BackupJob>>,
    done: Condvar,
}

struct BackupJob {
    backup_path: PathBuf,
    copied: HashSet<PageId>,
    shadow: BackupShadowFile,
    metadata: BackupMetadata,
    error_message: Option<String>,
}

impl BackupManager {
    pub fn new(
        store: Arc<PageStore>,
        oracle: Arc<dyn TimestampOracle>,
        database_path: PathBuf,
        database_id: String,
        config: BackupConfig,
    ) -> Self {
        Self {
            inner: Arc::new(BackupInner {
                store,
                oracle,
                database_path,
                database_id,
                config,
                state: AtomicU8::new(BackupState::Idle as u8),
                progress: AtomicU64::new(0f64.to_bits()),
                cancel_requested: AtomicBool::new(false),
                job: Mutex::new(None),
                done: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Begin an asynchronous backup into `backup_path`, creating the
    /// directory if absent. Returns once the worker thread is running.
    pub fn start_backup<P: AsRef<Path>>(&self, backup_path: P) -> Result<()> {
        let backup_path = backup_path.as_ref();
        if backup_path.as_os_str().is_empty() {
            return Err(Error::InvalidArgument("backup path is empty".into()));
        }

        let mut job = self.inner.job.lock();
        if self.inner.backup_state() != BackupState::Idle {
            return Err(Error::AlreadyRunning);
        }

        if !Vfs::exists(backup_path) {
            Vfs::create_dir_all(backup_path)?;
        }

        self.inner.cancel_requested.store(false, Ordering::Release);

        // The transaction clock defines the snapshot point; it must match
        // the clock the WAL records are stamped with.
        let snapshot_ts = self.inner.oracle.current_timestamp();
        let backup_timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let metadata = BackupMetadata {
            snapshot_ts,
            database_id: self.inner.database_id.clone(),
            database_path: self.inner.database_path.display().to_string(),
            backup_timestamp,
            num_pages: 0,
            backup_size_bytes: 0,
            ryu_version: RYU_VERSION.to_string(),
        };
        let shadow = BackupShadowFile::new(
            backup_path,
            self.inner.store.page_size(),
            self.inner.config.max_shadow_in_memory_bytes,
        );

        *job = Some(BackupJob {
            backup_path: backup_path.to_path_buf(),
            copied: HashSet::new(),
            shadow,
            metadata,
            error_message: None,
        });

        self.inner.store.register_observer(self.inner.clone());
        // Stored directly: set_state takes the job lock, which this
        // thread already holds.
        self.inner
            .state
            .store(BackupState::InProgress as u8, Ordering::Release);
        drop(job);

        info!(
            path = %backup_path.display(),
            snapshot_ts,
            "starting online backup"
        );

        let inner = self.inner.clone();
        let handle = thread::Builder::new()
            .name("ryu-backup".to_string())
            .spawn(move || inner.run_backup())
            .map_err(|e| {
                self.inner.handle_backup_error(&format!("failed to spawn backup worker: {}", e));
                self.inner.store.unregister_observer();
                Error::Io(e)
            })?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Block until the worker has exited, returning the terminal state.
    pub fn wait_for_completion(&self) -> BackupState {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        } else {
            // Another thread owns the join; wait on the state condvar.
            let mut job = self.inner.job.lock();
            while matches!(
                self.inner.backup_state(),
                BackupState::InProgress | BackupState::Finalizing
            ) {
                self.inner.done.wait(&mut job);
            }
        }
        self.inner.backup_state()
    }

    /// Non-blocking state snapshot.
    pub fn get_backup_state(&self) -> BackupState {
        self.inner.backup_state()
    }

    /// Non-blocking progress snapshot in `[0.0, 1.0]`, non-decreasing
    /// within a job.
    pub fn get_backup_progress(&self) -> f64 {
        f64::from_bits(self.inner.progress.load(Ordering::Acquire))
    }

    /// Request cooperative cancellation. Does not join the worker; pair
    /// with `wait_for_completion` for synchronous termination.
    pub fn cancel_backup(&self) {
        self.inner.cancel_requested.store(true, Ordering::Release);
        self.inner.done.notify_all();
    }

    /// Message retained from a failed job, if any.
    pub fn error_message(&self) -> Option<String> {
        let job = self.inner.job.lock();
        job.as_ref().and_then(|j| j.error_message.clone())
    }

    /// Observer entry point; see `PageModificationObserver`.
    pub fn notify_page_modification(&self, page_idx: PageId) {
        self.inner.notify_page_modification(page_idx);
    }
}

impl Drop for BackupManager {
    fn drop(&mut self) {
        if matches!(
            self.get_backup_state(),
            BackupState::InProgress | BackupState::Finalizing
        ) {
            self.cancel_backup();
        }
        // The worker holds references into the store; it must be joined
        // before the manager's resources go away.
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl BackupInner {
    fn backup_state(&self) -> BackupState {
        BackupState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Single atomic state store plus a wake-up for `wait_for_completion`
    /// waiters. The job lock is taken around the notify so a waiter cannot
    /// miss the signal between its state check and its wait. Callers must
    /// not hold the job lock.
    fn set_state(&self, new_state: BackupState) {
        debug!(state = ?new_state, "backup state transition");
        self.state.store(new_state as u8, Ordering::Release);
        let _guard = self.job.lock();
        self.done.notify_all();
    }

    fn store_progress(&self, value: f64) {
        let _ = self
            .progress
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if f64::from_bits(current) < value {
                    Some(value.to_bits())
                } else {
                    None
                }
            });
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel_requested.load(Ordering::Acquire) {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn run_backup(&self) {
        match self.execute_backup() {
            Ok(()) => {
                self.store_progress(1.0);
                self.set_state(BackupState::Completed);
                info!(path = %self.database_path.display(), "backup completed");
            }
            Err(e) => self.handle_backup_error(&e.to_string()),
        }

        // Shadow contents die with the job, whatever the outcome. The
        // copied set is released too; the metadata and error message stay
        // readable after termination.
        {
            let mut job = self.job.lock();
            if let Some(job) = job.as_mut() {
                if let Err(e) = job.shadow.cleanup() {
                    warn!(error = %e, "failed to clean up shadow store");
                }
                job.copied = HashSet::new();
            }
        }
        self.store.unregister_observer();
    }

    fn execute_backup(&self) -> Result<()> {
        let checksum = self.copy_main_data_file()?;
        self.check_cancelled()?;
        self.copy_wal_file()?;
        self.check_cancelled()?;
        self.set_state(BackupState::Finalizing);
        self.write_backup_metadata()?;
        if self.config.verify_after_backup {
            self.verify_backup_integrity(checksum)?;
        }
        Ok(())
    }

    fn job_backup_path(&self) -> Result<PathBuf> {
        let job = self.job.lock();
        job.as_ref()
            .map(|j| j.backup_path.clone())
            .ok_or_else(|| Error::Storage("backup job state missing".into()))
    }

    fn database_file_name(&self) -> Result<&OsStr> {
        self.database_path.file_name().ok_or_else(|| {
            Error::InvalidArgument(format!(
                "database path {} has no file name",
                self.database_path.display()
            ))
        })
    }

    /// Copy every page of the main data file as of the snapshot, returning
    /// the running checksum over the emitted pages.
    fn copy_main_data_file(&self) -> Result<u32> {
        let data = self.store.data_file();
        let page_size = data.page_size();
        let num_pages = data.page_count();
        let backup_path = self.job_backup_path()?;

        {
            let mut job = self.job.lock();
            if let Some(job) = job.as_mut() {
                job.metadata.num_pages = num_pages;
            }
        }

        let backup_data_path = backup_path.join(self.database_file_name()?);
        let mut backup_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&backup_data_path)?;

        let mut page_buf = vec![0u8; page_size];
        let mut hasher = crc32fast::Hasher::new();

        for page_idx in 0..num_pages {
            self.check_cancelled()?;

            {
                let mut guard = self.job.lock();
                let job = guard
                    .as_mut()
                    .ok_or_else(|| Error::Storage("backup job state missing".into()))?;
                if job.shadow.has_preserved_page(page_idx) {
                    // The page was overwritten after the snapshot; the
                    // shadow holds its pre-image.
                    job.shadow.read_preserved_page(page_idx, &mut page_buf)?;
                } else {
                    data.read_page(page_idx, &mut page_buf)?;
                }
                job.copied.insert(page_idx);
                // Mutators now see the page as copied and skip
                // preservation, so writing outside the lock is safe.
            }

            backup_file.write_all(&page_buf)?;
            hasher.update(&page_buf);

            if page_idx % PROGRESS_UPDATE_INTERVAL == 0 {
                self.store_progress(page_idx as f64 / num_pages as f64 * MAIN_COPY_PROGRESS_SPAN);
            }
            if page_idx > 0 && page_idx % YIELD_INTERVAL == 0 {
                thread::yield_now();
            }
        }

        // Exact truncation makes the size-based verification meaningful.
        backup_file.set_len(num_pages * page_size as u64)?;
        backup_file.sync_all()?;
        self.store_progress(MAIN_COPY_PROGRESS_SPAN);

        {
            let mut job = self.job.lock();
            if let Some(job) = job.as_mut() {
                job.metadata.backup_size_bytes = num_pages * page_size as u64;
            }
        }

        let preserved = {
            let job = self.job.lock();
            job.as_ref().map(|j| j.shadow.num_preserved_pages()).unwrap_or(0)
        };
        debug!(
            num_pages,
            preserved_pages = preserved,
            "main data file copied"
        );
        Ok(hasher.finalize())
    }

    /// Copy the WAL segment, whole. Restore replays at most up to the
    /// snapshot timestamp, so trailing records past the snapshot are
    /// harmless.
    fn copy_wal_file(&self) -> Result<()> {
        let wal = wal_path(&self.database_path);
        if !Vfs::exists(&wal) {
            self.store_progress(WAL_PHASE_PROGRESS);
            return Ok(());
        }
        let wal_size = Vfs::file_size(&wal)?;
        if wal_size == 0 {
            self.store_progress(WAL_PHASE_PROGRESS);
            return Ok(());
        }

        let backup_path = self.job_backup_path()?;
        let file_name = wal.file_name().ok_or_else(|| {
            Error::InvalidArgument(format!("WAL path {} has no file name", wal.display()))
        })?;
        let copied = Vfs::copy_file(&wal, backup_path.join(file_name))?;
        debug!(bytes = copied, "WAL segment copied");
        self.store_progress(WAL_PHASE_PROGRESS);
        Ok(())
    }

    fn write_backup_metadata(&self) -> Result<()> {
        let (backup_path, metadata) = {
            let job = self.job.lock();
            let job = job
                .as_ref()
                .ok_or_else(|| Error::Storage("backup job state missing".into()))?;
            (job.backup_path.clone(), job.metadata.clone())
        };
        metadata.write_to_file(backup_path.join(BACKUP_METADATA_FILE))
    }

    /// Re-open the backup directory and check what was written.
    fn verify_backup_integrity(&self, expected_checksum: u32) -> Result<()> {
        let backup_path = self.job_backup_path()?;
        let (num_pages, size_bytes) = {
            let job = self.job.lock();
            let job = job
                .as_ref()
                .ok_or_else(|| Error::Storage("backup job state missing".into()))?;
            (job.metadata.num_pages, job.metadata.backup_size_bytes)
        };

        let metadata_path = backup_path.join(BACKUP_METADATA_FILE);
        if !Vfs::exists(&metadata_path) {
            return Err(Error::VerificationFailed(
                "backup metadata file not found".into(),
            ));
        }
        let written = BackupMetadata::read_from_file(&metadata_path)?;
        if written.num_pages != num_pages {
            return Err(Error::VerificationFailed(format!(
                "metadata page count mismatch: expected {} but found {}",
                num_pages, written.num_pages
            )));
        }

        let backup_data_path = backup_path.join(self.database_file_name()?);
        if !Vfs::exists(&backup_data_path) {
            return Err(Error::VerificationFailed(
                "backup data file not found".into(),
            ));
        }
        let actual_size = Vfs::file_size(&backup_data_path)?;
        if actual_size != size_bytes {
            return Err(Error::VerificationFailed(format!(
                "backup file size mismatch: expected {} but got {}",
                size_bytes, actual_size
            )));
        }

        if self.config.verify_checksums {
            let actual = checksum_file(&backup_data_path, self.store.page_size())?;
            if actual != expected_checksum {
                return Err(Error::VerificationFailed(format!(
                    "backup checksum mismatch: expected {:08x} but got {:08x}",
                    expected_checksum, actual
                )));
            }
        }
        Ok(())
    }

    fn handle_backup_error(&self, message: &str) {
        error!(error = message, "backup failed");
        {
            let mut job = self.job.lock();
            if let Some(job) = job.as_mut() {
                if job.error_message.is_none() {
                    job.error_message = Some(message.to_string());
                }
            }
        }
        self.set_state(BackupState::Failed);
    }
}

impl PageModificationObserver for BackupInner {
    fn notify_page_modification(&self, page_idx: PageId) {
        // Fast path: one atomic load when no backup is running.
        if self.backup_state() != BackupState::InProgress {
            return;
        }

        let mut guard = self.job.lock();
        // Re-checked under the lock: the worker may have entered a
        // terminal state and torn the job down since the atomic load.
        if self.backup_state() != BackupState::InProgress {
            return;
        }
        let job = match guard.as_mut() {
            Some(job) => job,
            None => return,
        };
        if job.copied.contains(&page_idx) || job.shadow.has_preserved_page(page_idx) {
            return;
        }

        let data = self.store.data_file();
        if page_idx >= data.page_count() {
            // Freshly allocated page; it has no snapshot-time image.
            return;
        }

        let mut page_buf = vec![0u8; data.page_size()];
        let preserved = data
            .read_page(page_idx, &mut page_buf)
            .and_then(|()| job.shadow.preserve_original_page(page_idx, &page_buf));
        if let Err(e) = preserved {
            // A lost pre-image would silently corrupt the snapshot, so
            // the job fails instead.
            if job.error_message.is_none() {
                job.error_message = Some(format!(
                    "failed to preserve pre-image of page {}: {}",
                    page_idx, e
                ));
            }
            drop(guard);
            warn!(page_idx, error = %e, "pre-image preservation failed, cancelling backup");
            self.cancel_requested.store(true, Ordering::Release);
        }
    }
}

fn checksum_file(path: &Path, chunk_size: usize) -> Result<u32> {
    let mut file = File::open(path)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finalize())
}
