//! Append-only WAL segment.
//!
//! One segment lives next to the main data file at `<database_path>.wal`.
//! Records are framed little-endian as `lsn u64 | timestamp u64 |
//! payload_len u32 | payload | crc32 u32`, with the checksum covering
//! everything before it. The backup worker copies the segment byte for
//! byte; restore replays at most up to the snapshot timestamp, so trailing
//! records past the snapshot are ignored.

use crate::error::Result;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Canonical WAL path for a database file: the database path with `.wal`
/// appended (`ryu.db` -> `ryu.db.wal`).
pub fn wal_path<P: AsRef<Path>>(database_path: P) -> PathBuf {
    let mut os = database_path.as_ref().as_os_str().to_os_string();
    os.push(".wal");
    PathBuf::from(os)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub lsn: u64,
    pub timestamp: u64,
    pub payload: Vec<u8>,
}

pub struct WalWriter {
    path: PathBuf,
    file: Mutex<File>,
    next_lsn: AtomicU64,
}

impl WalWriter {
    /// Create or truncate the WAL segment for `database_path`.
    pub fn create<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let path = wal_path(database_path);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            next_lsn: AtomicU64::new(1),
        })
    }

    /// Open an existing WAL segment, continuing after its last record.
    pub fn open<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let path = wal_path(database_path);
        let next_lsn = if path.exists() {
            match read_all(&path) {
                Ok(records) => records.last().map(|r| r.lsn + 1).unwrap_or(1),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable WAL segment, starting fresh LSNs");
                    1
                }
            }
        } else {
            1
        };
        let file = OpenOptions::new().append(true).create(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            next_lsn: AtomicU64::new(next_lsn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, returning its LSN.
    pub fn append(&self, payload: &[u8]) -> Result<u64> {
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&lsn.to_le_bytes());
        hasher.update(&timestamp.to_le_bytes());
        hasher.update(&(payload.len() as u32).to_le_bytes());
        hasher.update(payload);
        let checksum = hasher.finalize();

        let mut frame = Vec::with_capacity(24 + payload.len());
        frame.extend_from_slice(&lsn.to_le_bytes());
        frame.extend_from_slice(&timestamp.to_le_bytes());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(payload);
        frame.extend_from_slice(&checksum.to_le_bytes());

        let mut file = self.file.lock();
        file.write_all(&frame)?;
        Ok(lsn)
    }

    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}

/// Read every intact record of a segment. Stops at the first torn or
/// corrupt frame, returning what was read before it.
pub fn read_all<P: AsRef<Path>>(path: P) -> Result<Vec<WalRecord>> {
    let mut bytes = Vec::new();
    File::open(path.as_ref())?.read_to_end(&mut bytes)?;

    let mut records = Vec::new();
    let mut pos = 0usize;
    while bytes.len() - pos >= 24 {
        let lsn = u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap_or_default());
        let timestamp = u64::from_le_bytes(bytes[pos + 8..pos + 16].try_into().unwrap_or_default());
        let len = u32::from_le_bytes(bytes[pos + 16..pos + 20].try_into().unwrap_or_default()) as usize;
        if bytes.len() - pos < 24 + len {
            break;
        }
        let payload = &bytes[pos + 20..pos + 20 + len];
        let stored =
            u32::from_le_bytes(bytes[pos + 20 + len..pos + 24 + len].try_into().unwrap_or_default());

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&lsn.to_le_bytes());
        hasher.update(&timestamp.to_le_bytes());
        hasher.update(&(len as u32).to_le_bytes());
        hasher.update(payload);
        if hasher.finalize() != stored {
            warn!(lsn, "stopping WAL scan at corrupt record");
            break;
        }

        records.push(WalRecord {
            lsn,
            timestamp,
            payload: payload.to_vec(),
        });
        pos += 24 + len;
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("ryu.db");
        let wal = WalWriter::create(&db_path).unwrap();

        assert_eq!(wal.append(b"first").unwrap(), 1);
        assert_eq!(wal.append(b"second").unwrap(), 2);
        wal.sync().unwrap();

        let records = read_all(wal.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].payload, b"first");
        assert_eq!(records[1].lsn, 2);
    }

    #[test]
    fn scan_stops_at_torn_tail() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("ryu.db");
        let wal = WalWriter::create(&db_path).unwrap();
        wal.append(b"intact").unwrap();
        wal.sync().unwrap();

        // Simulate a crash mid-append.
        let mut file = OpenOptions::new().append(true).open(wal.path()).unwrap();
        file.write_all(&[0xFF; 10]).unwrap();

        let records = read_all(wal.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, b"intact");
    }

    #[test]
    fn reopen_continues_lsn_sequence() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("ryu.db");
        {
            let wal = WalWriter::create(&db_path).unwrap();
            wal.append(b"one").unwrap();
            wal.sync().unwrap();
        }
        let wal = WalWriter::open(&db_path).unwrap();
        assert_eq!(wal.append(b"two").unwrap(), 2);
    }

    #[test]
    fn wal_path_appends_suffix() {
        assert_eq!(
            wal_path("/data/ryu.db"),
            PathBuf::from("/data/ryu.db.wal")
        );
    }
}
