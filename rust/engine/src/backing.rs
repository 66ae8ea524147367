//! Scratch backing file used by the file- and mapping-based strategies

use heapxfer_core::{Result, TransferError};
use memmap2::{Mmap, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Backing file sized to exactly the heap
pub struct BackingFile {
    path: PathBuf,
    native_path: PathBuf,
    file: Option<File>,
    size: usize,
}

impl BackingFile {
    /// Create (or reuse) the file at `path` and extend it to `size` bytes
    ///
    /// The size is set by seeking to `size` and truncating there, so no
    /// data is written.
    pub fn create(path: &Path, size: usize, custom_flags: i32) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o600)
            .custom_flags(custom_flags)
            .open(path)
            .map_err(|e| TransferError::os("open", e))?;

        let end = file
            .seek(SeekFrom::Start(size as u64))
            .map_err(|e| TransferError::os("lseek", e))?;
        file.set_len(end).map_err(|e| TransferError::os("ftruncate", e))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| TransferError::os("lseek", e))?;

        let native_path =
            std::fs::canonicalize(path).map_err(|e| TransferError::os("realpath", e))?;
        debug!("backing file {} sized to {} bytes", native_path.display(), size);

        Ok(Self {
            path: path.to_path_buf(),
            native_path,
            file: Some(file),
            size,
        })
    }

    /// Fully resolved path for callers that open their own handle
    pub fn native_path(&self) -> &Path {
        &self.native_path
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn file(&self) -> Result<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| TransferError::os("fd", std::io::Error::from_raw_os_error(libc::EBADF)))
    }

    /// Open an independent read/write handle on the same file
    pub fn reopen(&self) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.native_path)
            .map_err(|e| TransferError::os("open", e))
    }

    /// Close the handle and remove the file
    pub fn teardown(&mut self) -> Result<()> {
        if self.file.take().is_none() {
            return Ok(());
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TransferError::os("unlink", e)),
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.file.is_none()
    }
}

impl Drop for BackingFile {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!("backing file {} left behind: {}", self.path.display(), e);
        }
    }
}

/// Map the backing file read-only and private, as the child does
pub fn map_heap_file(path: &Path, size: usize) -> Result<Mmap> {
    let file = File::open(path).map_err(|e| TransferError::os("open", e))?;
    unsafe { MmapOptions::new().len(size).map_copy_read_only(&file) }
        .map_err(|e| TransferError::os("mmap", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_sizes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heapfile");

        let backing = BackingFile::create(&path, 1 << 20, 0).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 1 << 20);
        assert!(backing.native_path().is_absolute());
        assert_eq!(backing.size(), 1 << 20);
    }

    #[test]
    fn test_create_truncates_larger_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heapfile");
        std::fs::write(&path, vec![7u8; 8192]).unwrap();

        let _backing = BackingFile::create(&path, 4096, 0).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heapfile");

        let mut backing = BackingFile::create(&path, 4096, 0).unwrap();
        backing.teardown().unwrap();
        assert!(!path.exists());
        assert!(backing.is_torn_down());
        backing.teardown().unwrap();
        assert!(backing.file().is_err());
    }

    #[test]
    fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heapfile");
        {
            let _backing = BackingFile::create(&path, 4096, 0).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_map_heap_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heapfile");
        let backing = BackingFile::create(&path, 4096, 0).unwrap();
        std::os::unix::fs::FileExt::write_all_at(backing.file().unwrap(), b"+@@+", 0).unwrap();

        let map = map_heap_file(&path, 4096).unwrap();
        assert_eq!(&map[..4], b"+@@+");
        assert_eq!(map.len(), 4096);
    }
}
