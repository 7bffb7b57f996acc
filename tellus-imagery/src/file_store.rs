use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Persistent tile cache keyed by cache-relative paths (see
/// `Level::tile_cache_path`). Implementations must be safe to call from
/// retrieval workers concurrently.
pub trait FileStore: Send + Sync {
    /// Absolute path of an existing cached file, if present.
    fn find_local_file(&self, cache_path: &str) -> Option<PathBuf>;

    /// Writes a newly retrieved file, creating parent directories as needed.
    fn store_file(&self, cache_path: &str, bytes: &[u8]) -> io::Result<PathBuf>;

    /// Deletes a cached file. Missing files are not an error.
    fn remove_file(&self, cache_path: &str) -> io::Result<()>;

    /// Last-modified time of an existing cached file, epoch milliseconds.
    fn modified_epoch_ms(&self, cache_path: &str) -> Option<u64>;
}

/// File store rooted at a directory on the local filesystem.
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute(&self, cache_path: &str) -> PathBuf {
        self.root.join(cache_path)
    }
}

impl FileStore for LocalFileStore {
    fn find_local_file(&self, cache_path: &str) -> Option<PathBuf> {
        let path = self.absolute(cache_path);
        path.is_file().then_some(path)
    }

    fn store_file(&self, cache_path: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.absolute(cache_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        Ok(path)
    }

    fn remove_file(&self, cache_path: &str) -> io::Result<()> {
        match fs::remove_file(self.absolute(cache_path)) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn modified_epoch_ms(&self, cache_path: &str) -> Option<u64> {
        let modified = fs::metadata(self.absolute(cache_path))
            .ok()?
            .modified()
            .ok()?;
        let since_epoch = modified.duration_since(UNIX_EPOCH).ok()?;
        Some(since_epoch.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_store(tag: &str) -> LocalFileStore {
        let root = std::env::temp_dir().join(format!(
            "tellus-file-store-{tag}-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = fs::remove_dir_all(&root);
        LocalFileStore::new(root)
    }

    #[test]
    fn test_store_then_find() {
        let store = scratch_store("find");
        let cache_path = "earth/bmng/0/1/1_2.png";
        assert!(store.find_local_file(cache_path).is_none());
        let written = store.store_file(cache_path, b"pixels").unwrap();
        let found = store.find_local_file(cache_path).unwrap();
        assert_eq!(written, found);
        assert_eq!(fs::read(found).unwrap(), b"pixels");
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let store = scratch_store("remove");
        assert!(store.remove_file("earth/bmng/0/0/0_0.png").is_ok());
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn test_modified_time_present_after_store() {
        let store = scratch_store("mtime");
        let cache_path = "earth/bmng/3/4/4_5.png";
        assert!(store.modified_epoch_ms(cache_path).is_none());
        store.store_file(cache_path, b"x").unwrap();
        assert!(store.modified_epoch_ms(cache_path).unwrap() > 0);
        let _ = fs::remove_dir_all(store.root());
    }
}
