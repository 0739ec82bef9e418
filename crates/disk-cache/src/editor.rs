use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::sync::Arc;

use lru_index::EditId;

use crate::cache::Shared;
use crate::errors::{CacheError, Result};
use crate::paths;

/// Exclusive, transactional write handle for one entry.
///
/// Obtained from [`DiskCache::edit`](crate::DiskCache::edit). The editor
/// stages values into temp files; [`commit`](Editor::commit) atomically
/// publishes them, [`abort`](Editor::abort) discards them. Both consume the
/// editor, so an edit ends exactly once.
///
/// An editor that is dropped without committing or aborting leaves its entry
/// locked against further edits until the cache is closed.
pub struct Editor {
    shared: Arc<Shared>,
    key: String,
    id: EditId,
}

impl Editor {
    pub(crate) fn new(shared: Arc<Shared>, key: String, id: EditId) -> Self {
        Self { shared, key, id }
    }

    /// Key of the entry being edited.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Opens the currently-published value for `index`, or `None` if the
    /// entry has never been committed. This reads the clean file and is
    /// unrelated to the editor's own staged writes.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below the cache's value count.
    pub fn reader(&self, index: usize) -> Result<Option<File>> {
        assert!(
            index < self.shared.value_count,
            "value index {index} out of range"
        );
        let state = self.shared.state.lock();
        let entry = state
            .entries
            .peek(&self.key)
            .filter(|entry| entry.current_edit() == Some(self.id))
            .ok_or(CacheError::StaleEditor)?;
        if !entry.is_readable() {
            return Ok(None);
        }
        let file = File::open(paths::clean_file(&self.shared.directory, &self.key, index))?;
        Ok(Some(file))
    }

    /// Drains the currently-published value for `index` as UTF-8, or `None`
    /// if the entry has never been committed.
    pub fn string(&self, index: usize) -> Result<Option<String>> {
        match self.reader(index)? {
            Some(mut file) => {
                let mut out = String::new();
                file.read_to_string(&mut out)?;
                Ok(Some(out))
            }
            None => Ok(None),
        }
    }

    /// Opens the staging file for `index` for truncating write. Ownership of
    /// the handle transfers to the caller; the bytes become visible to
    /// readers only after [`commit`](Editor::commit).
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below the cache's value count.
    pub fn writer(&self, index: usize) -> Result<File> {
        assert!(
            index < self.shared.value_count,
            "value index {index} out of range"
        );
        let state = self.shared.state.lock();
        let owns = state
            .entries
            .peek(&self.key)
            .map(|entry| entry.current_edit() == Some(self.id))
            .unwrap_or(false);
        if !owns {
            return Err(CacheError::StaleEditor);
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(paths::dirty_file(&self.shared.directory, &self.key, index))?;
        Ok(file)
    }

    /// Stages `value` as UTF-8 for `index`.
    pub fn set(&self, index: usize, value: &str) -> Result<()> {
        let mut out = self.writer(index)?;
        out.write_all(value.as_bytes())?;
        Ok(())
    }

    /// Atomically publishes the staged values. A first-time commit must have
    /// staged every index or it fails with
    /// [`MissingValue`](CacheError::MissingValue) and the entry is dropped.
    pub fn commit(self) -> Result<()> {
        self.shared.complete_edit(&self.key, self.id, true)
    }

    /// Discards the staged values. A never-published entry is removed; a
    /// previously published entry keeps its old values.
    pub fn abort(self) -> Result<()> {
        self.shared.complete_edit(&self.key, self.id, false)
    }
}
