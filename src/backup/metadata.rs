use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// File name of the serialised metadata record inside a backup directory.
pub const BACKUP_METADATA_FILE: &str = "backup_metadata.bin";

/// Record identifying a backup, persisted alongside the copied files.
///
/// Serialised little-endian in fixed field order; strings are u32
/// length-prefixed UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupMetadata {
    /// Snapshot timestamp from the transaction clock; defines "before"
    /// and "after" for consistency.
    pub snapshot_ts: u64,
    /// Database identity, typically a UUID.
    pub database_id: String,
    /// Path of the database the backup was taken from.
    pub database_path: String,
    /// Unix-epoch wall-clock stamp of the backup.
    pub backup_timestamp: u64,
    /// Pages copied into the backup data file.
    pub num_pages: u64,
    /// Size of the backup data file: `num_pages * page_size`.
    pub backup_size_bytes: u64,
    /// Engine version that produced the backup.
    pub ryu_version: String,
}

impl BackupMetadata {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            48 + self.database_id.len() + self.database_path.len() + self.ryu_version.len(),
        );
        put_u64(&mut buf, self.snapshot_ts);
        put_string(&mut buf, &self.database_id);
        put_string(&mut buf, &self.database_path);
        put_u64(&mut buf, self.backup_timestamp);
        put_u64(&mut buf, self.num_pages);
        put_u64(&mut buf, self.backup_size_bytes);
        put_string(&mut buf, &self.ryu_version);
        buf
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader { bytes, pos: 0 };
        let metadata = Self {
            snapshot_ts: reader.read_u64()?,
            database_id: reader.read_string()?,
            database_path: reader.read_string()?,
            backup_timestamp: reader.read_u64()?,
            num_pages: reader.read_u64()?,
            backup_size_bytes: reader.read_u64()?,
            ryu_version: reader.read_string()?,
        };
        if reader.pos != bytes.len() {
            return Err(Error::CorruptMetadata(format!(
                "{} trailing bytes after metadata record",
                bytes.len() - reader.pos
            )));
        }
        Ok(metadata)
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.serialize())?;
        Ok(())
    }

    pub fn read_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::deserialize(&bytes)
    }
}

fn put_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_string(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value.as_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take(&mut self, len: usize) -> Result<&[u8]> {
        if self.bytes.len() - self.pos < len {
            return Err(Error::CorruptMetadata(format!(
                "record truncated at offset {}",
                self.pos
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(raw))
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::CorruptMetadata(format!("invalid UTF-8 in string field: {}", e)))
    }
}
