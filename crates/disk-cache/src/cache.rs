use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use journal::{JournalError, JournalReader, JournalRecord, JournalWriter};
use lru_index::{EditId, LruIndex};

use crate::editor::Editor;
use crate::errors::{CacheError, Result};
use crate::paths;
use crate::snapshot::Snapshot;

/// Journal records appended since the last rewrite before a compaction is
/// considered. Below this floor the journal is too small to matter.
const COMPACT_OP_FLOOR: usize = 1000;

/// A durable, size-bounded LRU cache backed by a directory.
///
/// Cheap to clone; clones share one underlying cache. All public operations
/// serialize on a single internal mutex, which is released before the caller
/// reads snapshot streams or writes editor streams.
#[derive(Clone)]
pub struct DiskCache {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    pub(crate) directory: PathBuf,
    pub(crate) value_count: usize,
    max_size: u64,
    pub(crate) state: Mutex<State>,
}

pub(crate) struct State {
    /// `None` once the cache is closed.
    journal: Option<JournalWriter>,
    pub(crate) entries: LruIndex,
    /// Sum of committed value lengths across readable entries.
    size: u64,
    /// Records appended since the journal was last rewritten.
    op_count: usize,
}

impl DiskCache {
    /// Opens the cache in `directory`, creating it if necessary.
    ///
    /// Each entry holds `value_count` values; the committed bytes across all
    /// entries are kept at or below `max_size` by evicting least recently
    /// used entries. If a journal from a previous run exists it is replayed;
    /// a journal that cannot be replayed is logged, the directory contents
    /// are deleted, and the cache starts empty.
    pub fn open<P: AsRef<Path>>(directory: P, value_count: usize, max_size: u64) -> Result<Self> {
        if value_count == 0 {
            return Err(CacheError::Config("value count must be positive"));
        }
        if max_size == 0 {
            return Err(CacheError::Config("max size must be positive"));
        }

        let shared = Arc::new(Shared {
            directory: directory.as_ref().to_path_buf(),
            value_count,
            max_size,
            state: Mutex::new(State {
                journal: None,
                entries: LruIndex::new(),
                size: 0,
                op_count: 0,
            }),
        });

        {
            let mut guard = shared.state.lock();
            let state = &mut *guard;
            let mut recovered = false;
            if paths::journal_file(&shared.directory).exists() {
                match shared.recover(state) {
                    Ok(()) => {
                        debug!(
                            directory = %shared.directory.display(),
                            entries = state.entries.len(),
                            size = state.size,
                            "journal recovered"
                        );
                        shared.trim_to_size(state)?;
                        recovered = true;
                    }
                    Err(err) => {
                        warn!(
                            directory = %shared.directory.display(),
                            error = %err,
                            "cache journal is unusable, removing directory contents"
                        );
                        state.journal = None;
                        state.entries = LruIndex::new();
                        state.size = 0;
                        delete_contents(&shared.directory)?;
                    }
                }
            }
            if !recovered {
                fs::create_dir_all(&shared.directory)?;
                shared.rebuild_journal_locked(state)?;
            }
        }

        Ok(DiskCache { shared })
    }

    /// Returns a snapshot of the entry named `key`, or `None` if it does not
    /// exist or has never been committed. A hit makes the entry the most
    /// recently used.
    pub fn read(&self, key: &str) -> Result<Option<Snapshot>> {
        validate_key(key)?;
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        let journal = state.journal.as_mut().ok_or(CacheError::Closed)?;

        let readable = match state.entries.get(key) {
            Some(entry) => entry.is_readable(),
            None => return Ok(None),
        };
        if !readable {
            return Ok(None);
        }

        journal.append(&JournalRecord::Read {
            key: key.to_string(),
        })?;
        state.op_count += 1;

        // Open every stream while still holding the lock so they all come
        // from the same published version.
        let mut streams = Vec::with_capacity(self.shared.value_count);
        for index in 0..self.shared.value_count {
            streams.push(File::open(paths::clean_file(
                &self.shared.directory,
                key,
                index,
            ))?);
        }

        self.shared.maybe_compact(state)?;
        Ok(Some(Snapshot::new(streams)))
    }

    /// Returns an editor for the entry named `key`, or `None` if another
    /// editor currently owns it.
    pub fn edit(&self, key: &str) -> Result<Option<Editor>> {
        validate_key(key)?;
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        let journal = state.journal.as_mut().ok_or(CacheError::Closed)?;

        let id = state.entries.next_edit_id();
        let entry = state.entries.ensure(key, self.shared.value_count);
        if entry.current_edit().is_some() {
            return Ok(None);
        }
        entry.begin_edit(id);

        // The DIRTY record must be on disk before the editor can create any
        // staged file, so recovery knows what a crash may have left behind.
        journal.append(&JournalRecord::Dirty {
            key: key.to_string(),
        })?;
        journal.flush()?;
        state.op_count += 1;

        self.shared.maybe_compact(state)?;
        Ok(Some(Editor::new(
            Arc::clone(&self.shared),
            key.to_string(),
            id,
        )))
    }

    /// Removes the entry named `key` and deletes its files. Returns `false`
    /// if the entry does not exist or is currently being edited.
    pub fn remove(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if state.journal.is_none() {
            return Err(CacheError::Closed);
        }

        match state.entries.peek(key) {
            Some(entry) if !entry.is_editing() => {}
            _ => return Ok(false),
        }

        self.shared.remove_entry_locked(state, key)?;
        self.shared.maybe_compact(state)?;
        Ok(true)
    }

    /// Rewrites the journal to the minimal form that reproduces the current
    /// index: one record per live entry, in least-to-most recently used
    /// order. Also runs automatically once enough redundant records
    /// accumulate.
    pub fn rebuild_journal(&self) -> Result<()> {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if state.journal.is_none() {
            return Err(CacheError::Closed);
        }
        self.shared.rebuild_journal_locked(state)
    }

    /// Closes the cache. In-flight editors are aborted so their staged files
    /// are released. Idempotent; operations after close fail with
    /// [`CacheError::Closed`].
    pub fn close(&self) -> Result<()> {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if state.journal.is_none() {
            return Ok(());
        }

        let editing: Vec<(String, EditId)> = state
            .entries
            .iter()
            .filter_map(|entry| entry.current_edit().map(|id| (entry.key().to_string(), id)))
            .collect();
        for (key, id) in editing {
            self.shared
                .complete_edit_locked(state, &key, id, false)?;
        }

        if let Some(mut journal) = state.journal.take() {
            journal.flush()?;
        }
        Ok(())
    }

    /// Closes the cache and deletes everything in its directory.
    pub fn delete(&self) -> Result<()> {
        self.close()?;
        delete_contents(&self.shared.directory)?;
        Ok(())
    }

    /// Directory the cache stores its data in.
    pub fn directory(&self) -> &Path {
        &self.shared.directory
    }

    /// Number of values per entry.
    pub fn value_count(&self) -> usize {
        self.shared.value_count
    }

    /// Committed bytes currently accounted to readable entries.
    pub fn size(&self) -> u64 {
        self.shared.state.lock().size
    }
}

impl Shared {
    /// Rebuilds the index from the journal, deletes the leftovers of any
    /// unfinished edit, and adopts the journal for appending. Any failure
    /// (corrupt header, unparseable record, I/O) tells the caller to reset
    /// the directory.
    fn recover(&self, state: &mut State) -> std::result::Result<(), JournalError> {
        let mut reader = JournalReader::open(paths::journal_file(&self.directory), self.value_count)?;

        let value_count = self.value_count;
        let entries = &mut state.entries;
        reader.replay(|record| match record {
            JournalRecord::Remove { key } => {
                entries.remove(&key);
            }
            JournalRecord::Clean { key, lengths } => {
                let entry = entries.ensure(&key, value_count);
                entry.clear_edit();
                entry.mark_readable();
                entry.set_lengths(&lengths);
            }
            JournalRecord::Dirty { key } => {
                let id = entries.next_edit_id();
                entries.ensure(&key, value_count).begin_edit(id);
            }
            JournalRecord::Read { key } => {
                // the lookup itself refreshes recency order
                entries.get(&key);
            }
        })?;

        self.collect_garbage(state)?;

        state.size = state
            .entries
            .iter()
            .filter(|entry| entry.is_readable())
            .map(|entry| entry.total_size())
            .sum();
        state.journal = Some(JournalWriter::open_append(paths::journal_file(
            &self.directory,
        ))?);
        state.op_count = 0;
        Ok(())
    }

    /// Deletes the compaction temp file and every file belonging to an entry
    /// whose last journal record was `DIRTY`: those edits never published and
    /// their on-disk state is not trustworthy.
    fn collect_garbage(&self, state: &mut State) -> io::Result<()> {
        delete_if_exists(&paths::journal_tmp_file(&self.directory))?;

        let dangling: Vec<String> = state
            .entries
            .iter()
            .filter(|entry| entry.is_editing())
            .map(|entry| entry.key().to_string())
            .collect();
        for key in dangling {
            for index in 0..self.value_count {
                delete_if_exists(&paths::clean_file(&self.directory, &key, index))?;
                delete_if_exists(&paths::dirty_file(&self.directory, &key, index))?;
            }
            state.entries.remove(&key);
        }
        Ok(())
    }

    /// Ends the edit session `id` on `key`. On success the staged files are
    /// renamed into place; otherwise they are deleted. Exactly one CLEAN or
    /// REMOVE record is appended.
    pub(crate) fn complete_edit(&self, key: &str, id: EditId, success: bool) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        self.complete_edit_locked(state, key, id, success)
    }

    fn complete_edit_locked(
        &self,
        state: &mut State,
        key: &str,
        id: EditId,
        success: bool,
    ) -> Result<()> {
        let was_readable = match state.entries.peek(key) {
            Some(entry) if entry.current_edit() == Some(id) => entry.is_readable(),
            _ => return Err(CacheError::StaleEditor),
        };

        // Only a successful commit counts as a use; an abort leaves the
        // entry's recency untouched.
        if success {
            state.entries.get(key);
        }

        // A first edit must stage every value before it may publish.
        if success && !was_readable {
            for index in 0..self.value_count {
                if !paths::dirty_file(&self.directory, key, index).exists() {
                    self.complete_edit_locked(state, key, id, false)?;
                    return Err(CacheError::MissingValue { index });
                }
            }
        }

        // Publish or discard the staged files. On success, an index with no
        // staged file keeps its previously published value.
        let mut renamed: Vec<(usize, u64)> = Vec::new();
        for index in 0..self.value_count {
            let dirty = paths::dirty_file(&self.directory, key, index);
            if success {
                if dirty.exists() {
                    let clean = paths::clean_file(&self.directory, key, index);
                    fs::rename(&dirty, &clean)?;
                    renamed.push((index, fs::metadata(&clean)?.len()));
                }
            } else {
                delete_if_exists(&dirty)?;
            }
        }

        let keep = was_readable || success;
        let mut old_total = 0u64;
        let mut new_total = 0u64;
        let record = {
            let entry = state.entries.peek_mut(key).ok_or(CacheError::StaleEditor)?;
            for &(index, len) in &renamed {
                old_total += entry.lengths()[index];
                new_total += len;
                entry.set_length(index, len);
            }
            entry.clear_edit();
            if keep {
                entry.mark_readable();
                JournalRecord::Clean {
                    key: key.to_string(),
                    lengths: entry.lengths().to_vec(),
                }
            } else {
                JournalRecord::Remove {
                    key: key.to_string(),
                }
            }
        };
        state.size = state.size + new_total - old_total;
        if !keep {
            state.entries.remove(key);
        }

        let journal = state.journal.as_mut().ok_or(CacheError::Closed)?;
        journal.append(&record)?;
        state.op_count += 1;

        if success {
            self.trim_to_size(state)?;
        }
        self.maybe_compact(state)?;
        Ok(())
    }

    /// Deletes the entry's clean files, logs a REMOVE, and drops it from the
    /// index. The caller has already checked the entry exists and is not
    /// being edited.
    fn remove_entry_locked(&self, state: &mut State, key: &str) -> Result<()> {
        for index in 0..self.value_count {
            delete_if_exists(&paths::clean_file(&self.directory, key, index))?;
        }

        let journal = state.journal.as_mut().ok_or(CacheError::Closed)?;
        journal.append(&JournalRecord::Remove {
            key: key.to_string(),
        })?;
        state.op_count += 1;

        if let Some(entry) = state.entries.remove(key) {
            state.size -= entry.total_size();
        }
        Ok(())
    }

    /// Evicts least recently used entries until the committed bytes fit in
    /// `max_size`. Entries with an active editor are skipped.
    fn trim_to_size(&self, state: &mut State) -> Result<()> {
        while state.size > self.max_size {
            let victim = state
                .entries
                .iter()
                .find(|entry| !entry.is_editing())
                .map(|entry| entry.key().to_string());
            match victim {
                Some(key) => {
                    debug!(key = %key, size = state.size, "evicting least recently used entry");
                    self.remove_entry_locked(state, &key)?;
                }
                None => break,
            }
        }
        Ok(())
    }

    fn maybe_compact(&self, state: &mut State) -> Result<()> {
        if state.op_count >= COMPACT_OP_FLOOR && state.op_count > 2 * state.entries.len() {
            self.rebuild_journal_locked(state)?;
        }
        Ok(())
    }

    /// Writes a minimal journal to `journal.tmp`, atomically renames it over
    /// `journal`, and reopens it for appending. READ and REMOVE history is
    /// discarded; recency order survives as the record order.
    fn rebuild_journal_locked(&self, state: &mut State) -> Result<()> {
        if let Some(mut journal) = state.journal.take() {
            journal.flush()?;
        }

        let tmp = paths::journal_tmp_file(&self.directory);
        let mut writer = JournalWriter::create(&tmp, self.value_count)?;
        for entry in state.entries.iter() {
            let record = if entry.is_editing() {
                JournalRecord::Dirty {
                    key: entry.key().to_string(),
                }
            } else {
                JournalRecord::Clean {
                    key: entry.key().to_string(),
                    lengths: entry.lengths().to_vec(),
                }
            };
            writer.append(&record)?;
        }
        writer.flush()?;
        drop(writer);

        fs::rename(&tmp, paths::journal_file(&self.directory))?;
        state.journal = Some(JournalWriter::open_append(paths::journal_file(
            &self.directory,
        ))?);
        state.op_count = 0;
        debug!(entries = state.entries.len(), "journal rewritten");
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<()> {
    let forbidden = [' ', '\n', '\r', '/', '\\'];
    if key.is_empty() || key.chars().any(|c| forbidden.contains(&c)) {
        return Err(CacheError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

/// Removal that treats an already-absent file as success, so replaying a
/// cleanup is idempotent.
fn delete_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn delete_contents(directory: &Path) -> io::Result<()> {
    for dir_entry in fs::read_dir(directory)? {
        let path = dir_entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
