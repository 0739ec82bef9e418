use std::fs::File;
use std::io::Read;

use crate::errors::Result;

/// A consistent read handle over all values of one entry.
///
/// The file handles are captured together under the cache lock, so every
/// stream derives from the same published version. Later edits and removals
/// do not affect an open snapshot: the handles keep the original files alive
/// even after a commit renames over them. Dropping the snapshot closes all
/// streams.
#[derive(Debug)]
pub struct Snapshot {
    streams: Vec<File>,
}

impl Snapshot {
    pub(crate) fn new(streams: Vec<File>) -> Self {
        Self { streams }
    }

    /// Number of values carried.
    pub fn value_count(&self) -> usize {
        self.streams.len()
    }

    /// The unbuffered stream for value `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn stream(&mut self, index: usize) -> &mut File {
        &mut self.streams[index]
    }

    /// Drains value `index` as UTF-8.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn read_string(&mut self, index: usize) -> Result<String> {
        let mut out = String::new();
        self.streams[index].read_to_string(&mut out)?;
        Ok(out)
    }
}
