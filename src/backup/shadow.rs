use crate::error::{Error, Result};
use crate::storage::PageId;
use crate::vfs::Vfs;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Pre-image store for pages overwritten while a backup is running.
///
/// Pre-images stay in memory until their total size crosses the configured
/// cap; further pages spill to `<backup_path>.shadow`, addressed by a
/// monotonically increasing shadow slot. Both tiers behave identically
/// through the public operations. Insertion is idempotent per page index
/// and the map only grows for the duration of a job.
pub struct BackupShadowFile {
    shadow_path: PathBuf,
    page_size: usize,
    max_in_memory_bytes: u64,
    inner: Mutex<ShadowInner>,
}

#[derive(Default)]
struct ShadowInner {
    resident: HashMap<PageId, Box<[u8]>>,
    resident_bytes: u64,
    spilled: HashMap<PageId, u64>,
    spill_file: Option<File>,
    next_shadow_idx: u64,
}

impl BackupShadowFile {
    pub fn new<P: AsRef<Path>>(backup_path: P, page_size: usize, max_in_memory_bytes: u64) -> Self {
        let mut os = backup_path.as_ref().as_os_str().to_os_string();
        os.push(".shadow");
        Self {
            shadow_path: PathBuf::from(os),
            page_size,
            max_in_memory_bytes,
            inner: Mutex::new(ShadowInner::default()),
        }
    }

    /// Capture the pre-image of `page_idx`. A second call for the same
    /// index is a silent no-op; the first preserved bytes win.
    pub fn preserve_original_page(&self, page_idx: PageId, page: &[u8]) -> Result<()> {
        if page.len() != self.page_size {
            return Err(Error::InvalidArgument(format!(
                "pre-image is {} bytes, expected {}",
                page.len(),
                self.page_size
            )));
        }
        let mut inner = self.inner.lock();
        if inner.resident.contains_key(&page_idx) || inner.spilled.contains_key(&page_idx) {
            return Ok(());
        }

        if inner.resident_bytes + self.page_size as u64 <= self.max_in_memory_bytes {
            inner.resident.insert(page_idx, page.to_vec().into_boxed_slice());
            inner.resident_bytes += self.page_size as u64;
            return Ok(());
        }

        if inner.spill_file.is_none() {
            debug!(path = %self.shadow_path.display(), "shadow store spilling to disk");
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.shadow_path)?;
            inner.spill_file = Some(file);
        }
        let offset = inner.next_shadow_idx * self.page_size as u64;
        {
            let file = inner
                .spill_file
                .as_mut()
                .ok_or_else(|| Error::Storage("shadow spill file missing".into()))?;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(page)?;
        }
        let shadow_idx = inner.next_shadow_idx;
        inner.next_shadow_idx += 1;
        inner.spilled.insert(page_idx, shadow_idx);
        Ok(())
    }

    /// Copy the preserved bytes of `page_idx` into `buf`.
    pub fn read_preserved_page(&self, page_idx: PageId, buf: &mut [u8]) -> Result<()> {
        if buf.len() != self.page_size {
            return Err(Error::InvalidArgument(format!(
                "page buffer is {} bytes, expected {}",
                buf.len(),
                self.page_size
            )));
        }
        let mut inner = self.inner.lock();
        if let Some(bytes) = inner.resident.get(&page_idx) {
            buf.copy_from_slice(bytes);
            return Ok(());
        }
        let shadow_idx = match inner.spilled.get(&page_idx) {
            Some(&idx) => idx,
            None => return Err(Error::NotPreserved(page_idx)),
        };
        let offset = shadow_idx * self.page_size as u64;
        let file = inner
            .spill_file
            .as_mut()
            .ok_or(Error::NotPreserved(page_idx))?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    pub fn has_preserved_page(&self, page_idx: PageId) -> bool {
        let inner = self.inner.lock();
        inner.resident.contains_key(&page_idx) || inner.spilled.contains_key(&page_idx)
    }

    pub fn num_preserved_pages(&self) -> u64 {
        let inner = self.inner.lock();
        (inner.resident.len() + inner.spilled.len()) as u64
    }

    /// Drop every pre-image and remove the spill file if one was created.
    pub fn cleanup(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.resident.clear();
        inner.resident_bytes = 0;
        inner.spilled.clear();
        inner.next_shadow_idx = 0;
        if inner.spill_file.take().is_some() {
            Vfs::remove_if_exists(&self.shadow_path)?;
        }
        Ok(())
    }
}

impl Drop for BackupShadowFile {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            warn!(path = %self.shadow_path.display(), error = %e, "failed to clean up shadow file");
        }
    }
}
