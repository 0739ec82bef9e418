//! # LRU index
//!
//! The in-memory, access-ordered index for the disk cache.
//!
//! The index maps string keys to [`Entry`] records and preserves *access
//! order*: the front of the map is the least recently used entry (the next
//! eviction candidate), the back is the most recently used. Every promoting
//! lookup splices the entry to the back.
//!
//! ## Key properties
//! - **Access order**: [`get`](LruIndex::get), [`get_mut`](LruIndex::get_mut)
//!   and [`ensure`](LruIndex::ensure) promote; [`peek`](LruIndex::peek) and
//!   [`peek_mut`](LruIndex::peek_mut) do not.
//! - **Unique ownership**: each entry is owned by the index; removing a key
//!   returns the entry by value.
//! - **Edit tokens**: at most one edit may be active per entry, identified by
//!   an opaque [`EditId`] minted by the index. Handles compare tokens rather
//!   than holding references into the index.
//!
//! ## Example
//! ```rust
//! use lru_index::LruIndex;
//!
//! let mut idx = LruIndex::new();
//! idx.ensure("a", 2);
//! idx.ensure("b", 2);
//! idx.get("a"); // promotes "a" past "b"
//!
//! let order: Vec<&str> = idx.iter().map(|e| e.key()).collect();
//! assert_eq!(order, vec!["b", "a"]);
//! ```

use hashlink::LinkedHashMap;

/// Opaque token identifying one edit session on one entry.
///
/// Tokens are minted by [`LruIndex::next_edit_id`] and never reused, so a
/// handle that outlives its edit (aborted by a cache close, or superseded)
/// fails the identity comparison instead of touching another session's
/// files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EditId(u64);

/// One cache entry: a key, the committed byte length of each value, and the
/// edit/readable state.
///
/// `lengths` always holds exactly the cache's value count; values start at
/// zero and are only set once a commit publishes real files. `readable`
/// becomes true on the first successful commit and never reverts for a live
/// entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    key: String,
    lengths: Vec<u64>,
    readable: bool,
    current_edit: Option<EditId>,
}

impl Entry {
    /// Creates a blank, unreadable entry with `value_count` zeroed lengths.
    pub fn new(key: impl Into<String>, value_count: usize) -> Self {
        Self {
            key: key.into(),
            lengths: vec![0; value_count],
            readable: false,
            current_edit: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Committed byte lengths, one per value index.
    pub fn lengths(&self) -> &[u64] {
        &self.lengths
    }

    /// Records the committed byte length of value `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range for the entry's value count.
    pub fn set_length(&mut self, index: usize, len: u64) {
        self.lengths[index] = len;
    }

    /// Replaces the whole length vector, e.g. when replaying a `CLEAN`
    /// record.
    ///
    /// # Panics
    ///
    /// Panics if `lengths` does not match the entry's value count.
    pub fn set_lengths(&mut self, lengths: &[u64]) {
        assert_eq!(lengths.len(), self.lengths.len(), "value count mismatch");
        self.lengths.copy_from_slice(lengths);
    }

    /// Sum of all committed value lengths.
    pub fn total_size(&self) -> u64 {
        self.lengths.iter().sum()
    }

    /// True once the entry has ever been successfully committed with a full
    /// value set.
    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn mark_readable(&mut self) {
        self.readable = true;
    }

    /// Token of the active edit, if any.
    pub fn current_edit(&self) -> Option<EditId> {
        self.current_edit
    }

    pub fn is_editing(&self) -> bool {
        self.current_edit.is_some()
    }

    /// Marks the entry as owned by the edit session `id`.
    pub fn begin_edit(&mut self, id: EditId) {
        self.current_edit = Some(id);
    }

    pub fn clear_edit(&mut self) {
        self.current_edit = None;
    }
}

/// Access-ordered mapping from key to [`Entry`].
///
/// Built on an insertion-ordered hash map; promotion splices the entry to
/// the tail by re-inserting it, which is O(1) amortized. Iteration yields
/// entries front-to-back, i.e. least to most recently used.
#[derive(Debug, Default)]
pub struct LruIndex {
    map: LinkedHashMap<String, Entry>,
    next_edit: u64,
}

impl LruIndex {
    pub fn new() -> Self {
        Self {
            map: LinkedHashMap::new(),
            next_edit: 0,
        }
    }

    /// Number of entries, regardless of readability.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Mints a fresh, never-reused edit token.
    pub fn next_edit_id(&mut self) -> EditId {
        self.next_edit += 1;
        EditId(self.next_edit)
    }

    /// Promoting lookup: on a hit the entry becomes the most recently used.
    pub fn get(&mut self, key: &str) -> Option<&Entry> {
        self.promote(key);
        self.map.get(key)
    }

    /// Promoting mutable lookup.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Entry> {
        self.promote(key);
        self.map.get_mut(key)
    }

    /// Non-promoting lookup. Identity checks and eviction scans must not
    /// disturb recency order.
    pub fn peek(&self, key: &str) -> Option<&Entry> {
        self.map.get(key)
    }

    /// Non-promoting mutable lookup.
    pub fn peek_mut(&mut self, key: &str) -> Option<&mut Entry> {
        self.map.get_mut(key)
    }

    /// Promoting get-or-insert: returns the entry for `key`, creating a
    /// blank one with `value_count` values if absent. Either way the entry
    /// ends up most recently used.
    pub fn ensure(&mut self, key: &str, value_count: usize) -> &mut Entry {
        if !self.promote(key) {
            self.map
                .insert(key.to_string(), Entry::new(key, value_count));
        }
        self.map.get_mut(key).expect("entry just inserted")
    }

    /// Removes and returns the entry for `key`.
    pub fn remove(&mut self, key: &str) -> Option<Entry> {
        self.map.remove(key)
    }

    /// The least recently used entry, if any.
    pub fn front(&self) -> Option<&Entry> {
        self.map.iter().next().map(|(_, entry)| entry)
    }

    /// Entries from least to most recently used.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.map.iter().map(|(_, entry)| entry)
    }

    // Splices the entry to the tail. Returns false if the key is absent.
    fn promote(&mut self, key: &str) -> bool {
        match self.map.remove(key) {
            Some(entry) => {
                self.map.insert(key.to_string(), entry);
                true
            }
            None => false,
        }
    }
}
