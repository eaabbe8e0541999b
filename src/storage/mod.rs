pub mod data_file;
pub mod page_store;

pub use data_file::{DataFile, DEFAULT_PAGE_SIZE};
pub use page_store::{PageModificationObserver, PageStore};

pub type PageId = u64;
