use crate::error::Result;
use crate::storage::{DataFile, PageId};
use parking_lot::RwLock;
use std::sync::Arc;

/// Callback invoked immediately before a page is overwritten in place.
///
/// The backup manager registers itself here for the duration of a job so
/// it can stash pre-images of pages the worker has not reached yet.
pub trait PageModificationObserver: Send + Sync {
    fn notify_page_modification(&self, page_idx: PageId);
}

/// Page-level write front for the main data file.
///
/// Mutators go through `write_page`, which fires the registered observer
/// before the overwrite hits the data file. At most one observer is
/// installed at a time.
pub struct PageStore {
    data: Arc<DataFile>,
    observer: RwLock<Option<Arc<dyn PageModificationObserver>>>,
}

impl PageStore {
    pub fn new(data: Arc<DataFile>) -> Self {
        Self {
            data,
            observer: RwLock::new(None),
        }
    }

    pub fn data_file(&self) -> &Arc<DataFile> {
        &self.data
    }

    pub fn page_size(&self) -> usize {
        self.data.page_size()
    }

    pub fn page_count(&self) -> u64 {
        self.data.page_count()
    }

    pub fn register_observer(&self, observer: Arc<dyn PageModificationObserver>) {
        *self.observer.write() = Some(observer);
    }

    pub fn unregister_observer(&self) {
        *self.observer.write() = None;
    }

    pub fn read_page(&self, page_idx: PageId, buf: &mut [u8]) -> Result<()> {
        self.data.read_page(page_idx, buf)
    }

    pub fn write_page(&self, page_idx: PageId, buf: &[u8]) -> Result<()> {
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer.notify_page_modification(page_idx);
        }
        self.data.write_page(page_idx, buf)
    }

    /// Append a fresh zeroed page. No observer callback fires: a page that
    /// did not exist at snapshot time has no pre-image to preserve.
    pub fn allocate_page(&self) -> Result<PageId> {
        self.data.allocate_page()
    }

    pub fn sync(&self) -> Result<()> {
        self.data.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tempfile::tempdir;

    struct Recorder {
        seen: Mutex<Vec<PageId>>,
    }

    impl PageModificationObserver for Recorder {
        fn notify_page_modification(&self, page_idx: PageId) {
            self.seen.lock().push(page_idx);
        }
    }

    #[test]
    fn observer_fires_before_each_write() {
        let dir = tempdir().unwrap();
        let data = Arc::new(DataFile::create(dir.path().join("ryu.db"), 64).unwrap());
        let store = PageStore::new(data);

        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        store.register_observer(recorder.clone());

        let page = vec![1u8; 64];
        store.write_page(0, &page).unwrap();
        store.write_page(2, &page).unwrap();
        assert_eq!(*recorder.seen.lock(), vec![0, 2]);
    }

    #[test]
    fn unregister_stops_notifications() {
        let dir = tempdir().unwrap();
        let data = Arc::new(DataFile::create(dir.path().join("ryu.db"), 64).unwrap());
        let store = PageStore::new(data);

        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        store.register_observer(recorder.clone());
        store.unregister_observer();

        store.write_page(0, &vec![1u8; 64]).unwrap();
        assert!(recorder.seen.lock().is_empty());
    }

    #[test]
    fn allocate_does_not_notify() {
        let dir = tempdir().unwrap();
        let data = Arc::new(DataFile::create(dir.path().join("ryu.db"), 64).unwrap());
        let store = PageStore::new(data);

        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        store.register_observer(recorder.clone());

        store.allocate_page().unwrap();
        assert!(recorder.seen.lock().is_empty());
    }
}
