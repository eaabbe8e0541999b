use crate::error::{Error, Result};
use crate::storage::PageId;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Handle to the paged main data file.
///
/// The file is exactly `page_count() * page_size()` bytes; there is no
/// header page. Page reads and writes are positioned through a single
/// mutex-guarded descriptor.
pub struct DataFile {
    path: PathBuf,
    file: Mutex<File>,
    page_size: usize,
    num_pages: AtomicU64,
}

impl DataFile {
    pub fn create<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(Error::InvalidArgument("page size must be non-zero".into()));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(file),
            page_size,
            num_pages: AtomicU64::new(0),
        })
    }

    pub fn open<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(Error::InvalidArgument("page size must be non-zero".into()));
        }
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        let len = file.metadata()?.len();
        if len % page_size as u64 != 0 {
            return Err(Error::Storage(format!(
                "data file {} has length {} not aligned to page size {}",
                path.as_ref().display(),
                len,
                page_size
            )));
        }
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(file),
            page_size,
            num_pages: AtomicU64::new(len / page_size as u64),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> u64 {
        self.num_pages.load(Ordering::Acquire)
    }

    pub fn read_page(&self, page_idx: PageId, buf: &mut [u8]) -> Result<()> {
        if buf.len() != self.page_size {
            return Err(Error::InvalidArgument(format!(
                "page buffer is {} bytes, expected {}",
                buf.len(),
                self.page_size
            )));
        }
        if page_idx >= self.page_count() {
            return Err(Error::InvalidPageId(page_idx));
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_idx * self.page_size as u64))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Write a full page at `page_idx`, extending the file if the index is
    /// past the current end. Intervening pages read back as zeroes.
    pub fn write_page(&self, page_idx: PageId, buf: &[u8]) -> Result<()> {
        if buf.len() != self.page_size {
            return Err(Error::InvalidArgument(format!(
                "page buffer is {} bytes, expected {}",
                buf.len(),
                self.page_size
            )));
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_idx * self.page_size as u64))?;
        file.write_all(buf)?;
        self.num_pages.fetch_max(page_idx + 1, Ordering::AcqRel);
        Ok(())
    }

    /// Append a zeroed page and return its index.
    pub fn allocate_page(&self) -> Result<PageId> {
        let zeroes = vec![0u8; self.page_size];
        let mut file = self.file.lock();
        let page_idx = self.num_pages.load(Ordering::Acquire);
        file.seek(SeekFrom::Start(page_idx * self.page_size as u64))?;
        file.write_all(&zeroes)?;
        self.num_pages.store(page_idx + 1, Ordering::Release);
        Ok(page_idx)
    }

    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}
