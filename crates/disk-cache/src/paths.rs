//! File layout inside the cache directory.
//!
//! Value `i` of key `K` lives at `<dir>/K.i`; its staging file is
//! `<dir>/K.i.tmp`. The journal is `<dir>/journal`, rewritten via
//! `<dir>/journal.tmp`. The cache creates no other filenames.

use std::path::{Path, PathBuf};

pub(crate) const JOURNAL_FILE: &str = "journal";
pub(crate) const JOURNAL_FILE_TMP: &str = "journal.tmp";

/// Published (committed) file for one value of one entry.
pub(crate) fn clean_file(dir: &Path, key: &str, index: usize) -> PathBuf {
    dir.join(format!("{key}.{index}"))
}

/// Staging file an editor writes before commit renames it into place.
pub(crate) fn dirty_file(dir: &Path, key: &str, index: usize) -> PathBuf {
    dir.join(format!("{key}.{index}.tmp"))
}

pub(crate) fn journal_file(dir: &Path) -> PathBuf {
    dir.join(JOURNAL_FILE)
}

pub(crate) fn journal_tmp_file(dir: &Path) -> PathBuf {
    dir.join(JOURNAL_FILE_TMP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let dir = Path::new("/cache");
        assert_eq!(clean_file(dir, "k", 0), Path::new("/cache/k.0"));
        assert_eq!(clean_file(dir, "k", 1), Path::new("/cache/k.1"));
        assert_eq!(dirty_file(dir, "k", 0), Path::new("/cache/k.0.tmp"));
        assert_eq!(journal_file(dir), Path::new("/cache/journal"));
        assert_eq!(journal_tmp_file(dir), Path::new("/cache/journal.tmp"));
    }
}
