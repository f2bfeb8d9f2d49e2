// src/fs/mock.rs

use super::FileSystem;
use anyhow::{Result, anyhow, bail};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// In-memory filesystem with failure injection.
///
/// Directories are implicit: a path "exists" as a directory when it was
/// created with `create_dir_all` or when any file lives below it.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
    dirs: Arc<Mutex<Vec<PathBuf>>>,
    fail_next_replace: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        self.files()
            .insert(path.as_ref().to_path_buf(), content.into());
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.files().get(path.as_ref()).cloned()
    }

    /// Paths of all files currently stored, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.files().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Make the next `replace` call fail before touching the target, as if
    /// the process died between writing the temp file and swapping it in.
    pub fn fail_next_replace(&self) {
        self.fail_next_replace.store(true, Ordering::SeqCst);
    }

    /// Make every write-like operation fail until reset, e.g. to simulate a
    /// full disk.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self, path: &Path) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("injected write failure for {:?}", path);
        }
        Ok(())
    }

    fn files(&self) -> MutexGuard<'_, HashMap<PathBuf, Vec<u8>>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        match self.files().get(path) {
            Some(content) => {
                String::from_utf8(content.clone()).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
            }
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.check_writable(path)?;
        self.add_file(path, contents);
        Ok(())
    }

    fn create_new(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.check_writable(path)?;
        let mut files = self.files();
        if files.contains_key(path) {
            bail!("File exists: {:?}", path);
        }
        files.insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn append(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.check_writable(path)?;
        self.files()
            .entry(path.to_path_buf())
            .or_default()
            .extend_from_slice(contents);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        if self.files().keys().any(|p| p == path || p.starts_with(path)) {
            return true;
        }
        self.dirs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|d| d.starts_with(path))
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.dirs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(path.to_path_buf());
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.files()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| anyhow!("File not found: {:?}", path))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        self.files().retain(|p, _| !p.starts_with(path));
        self.dirs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|d| !d.starts_with(path));
        Ok(())
    }

    fn replace(&self, src: &Path, dst: &Path, backup: Option<&Path>) -> Result<()> {
        if self.fail_next_replace.swap(false, Ordering::SeqCst) {
            bail!("injected failure replacing {:?}", dst);
        }
        let mut files = self.files();
        let new = files
            .remove(src)
            .ok_or_else(|| anyhow!("File not found: {:?}", src))?;
        if let (Some(backup), Some(old)) = (backup, files.get(dst).cloned()) {
            files.insert(backup.to_path_buf(), old);
        }
        files.insert(dst.to_path_buf(), new);
        Ok(())
    }
}
