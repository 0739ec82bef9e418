//! # disk-cache
//!
//! A durable, size-bounded LRU cache that stores its data in a directory on
//! the local filesystem. Each entry has a string key and a fixed, cache-wide
//! number of byte-stream values.
//!
//! The directory must be exclusive to one cache in one process; the cache
//! deletes and overwrites files there freely. State survives restarts: an
//! append-only journal (see the `journal` crate for the wire format) records
//! entry lifecycle events, and on open the in-memory index is rebuilt by
//! replaying it.
//!
//! ## Usage
//!
//! Call [`DiskCache::edit`] to create or update an entry. An entry has at
//! most one editor at a time; a contended `edit` returns `None`. Each editor
//! must end in exactly one of [`Editor::commit`] or [`Editor::abort`];
//! both consume it. A first-time commit must supply every value (use an
//! empty value as a placeholder); an update may skip indices to keep their
//! previous values. Commits are atomic: a reader observes the values as they
//! were entirely before or entirely after the commit.
//!
//! Call [`DiskCache::read`] for a [`Snapshot`] of an entry: all value
//! streams are captured together, so later edits and removals do not affect
//! an open snapshot.
//!
//! ## Crash safety
//!
//! Staged values are written to `<key>.<i>.tmp` files and atomically renamed
//! over `<key>.<i>` on commit; the rename is the durability unit. A `DIRTY`
//! journal record is flushed before an editor is handed out, so recovery
//! always knows which staged files a crash may have left behind and deletes
//! them. Individual writes are not fsynced.

mod cache;
mod editor;
mod errors;
mod paths;
mod snapshot;

pub use cache::DiskCache;
pub use editor::Editor;
pub use errors::{CacheError, Result};
pub use snapshot::Snapshot;
