//! # Ryu Backup
//!
//! Zero-downtime online backup subsystem for the Ryu embedded graph
//! database, whose persistent state is a paged main data file plus a
//! write-ahead log. A backup is a point-in-time consistent snapshot taken
//! while the database keeps serving writes.
//!
//! ## How it works
//!
//! - **Copy-on-write pre-images**: before any page is overwritten during
//!   a backup, its snapshot-time contents are preserved in a shadow store.
//!   The worker prefers pre-images over the live page, so the backup sees
//!   the database exactly as it was at the snapshot timestamp.
//! - **One background worker** copies pages in order, then the WAL
//!   segment, then writes and verifies a metadata record. Progress and
//!   state are readable at any time without blocking.
//! - **Cooperative cancellation**: a cancelled job lands in FAILED within
//!   roughly one page-copy latency.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use ryu_backup::{Database, DatabaseConfig, BackupState};
//!
//! # fn main() -> ryu_backup::Result<()> {
//! let db = Database::create("./mydb/ryu.db", DatabaseConfig::default())?;
//!
//! let manager = db.start_backup("./backups/nightly")?;
//! while !manager.get_backup_state().is_terminal() {
//!     println!("progress: {:.0}%", manager.get_backup_progress() * 100.0);
//!     std::thread::sleep(std::time::Duration::from_millis(50));
//! }
//! assert_eq!(manager.wait_for_completion(), BackupState::Completed);
//!
//! // Later, on any machine:
//! ryu_backup::restore_from_backup("./backups/nightly", "./restored")?;
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod config;
pub mod database;
pub mod error;
pub mod storage;
pub mod txn;
pub mod version;
pub mod vfs;
pub mod wal;

pub use backup::{
    list_backups, restore_from_backup, BackupManager, BackupMetadata, BackupShadowFile,
    BackupState, BACKUP_METADATA_FILE,
};
pub use config::{BackupConfig, DatabaseConfig};
pub use database::Database;
pub use error::{Error, Result};
pub use storage::{DataFile, PageId, PageModificationObserver, PageStore, DEFAULT_PAGE_SIZE};
pub use txn::{MonotonicClock, TimestampOracle, TxnClock};
pub use version::RYU_VERSION;
pub use wal::{wal_path, WalRecord, WalWriter};
