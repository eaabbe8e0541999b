//! Thin filesystem helpers shared by the backup and restore paths.

use crate::error::Result;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub struct Vfs;

impl Vfs {
    pub fn exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists()
    }

    pub fn create_dir_all<P: AsRef<Path>>(path: P) -> Result<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    /// Remove a file, treating "already gone" as success.
    pub fn remove_if_exists<P: AsRef<Path>>(path: P) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Copy `src` to `dst`, returning the number of bytes copied.
    pub fn copy_file<P: AsRef<Path>, Q: AsRef<Path>>(src: P, dst: Q) -> Result<u64> {
        Ok(fs::copy(src, dst)?)
    }

    pub fn file_size<P: AsRef<Path>>(path: P) -> Result<u64> {
        Ok(fs::metadata(path)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn remove_if_exists_is_silent_on_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("never_created");
        Vfs::remove_if_exists(&path).unwrap();

        fs::write(&path, b"x").unwrap();
        Vfs::remove_if_exists(&path).unwrap();
        assert!(!Vfs::exists(&path));
    }

    #[test]
    fn copy_file_reports_byte_count() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::write(&src, b"hello").unwrap();

        let copied = Vfs::copy_file(&src, &dst).unwrap();
        assert_eq!(copied, 5);
        assert_eq!(Vfs::file_size(&dst).unwrap(), 5);
    }
}
