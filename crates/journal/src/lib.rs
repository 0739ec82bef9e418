//! Line-oriented journal codec for the disk cache.
//!
//! The journal is an ASCII file that logs entry lifecycle events. It opens
//! with a four-line header (magic, version, value count, blank line) followed
//! by one record per line:
//!
//! ```text
//! libcore.io.DiskLruCache
//! 1
//! 2
//!
//! DIRTY 335c4c6028171cfddfbaae1a9c313c52
//! CLEAN 335c4c6028171cfddfbaae1a9c313c52 3934 2342
//! READ 335c4c6028171cfddfbaae1a9c313c52
//! REMOVE 335c4c6028171cfddfbaae1a9c313c52
//! ```
//!
//! Fields are separated by a single space and lines end with a single `\n`.
//! A `CLEAN` record carries exactly one decimal byte length per value.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use thiserror::Error;

/// First header line of every journal.
pub const MAGIC: &str = "libcore.io.DiskLruCache";

/// Second header line; the only version this codec understands.
pub const VERSION: &str = "1";

/// One body line of the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    /// An entry was committed and may be read; carries the byte length of
    /// each of its values.
    Clean { key: String, lengths: Vec<u64> },
    /// An editor was opened for the entry. Until a matching `Clean` or
    /// `Remove` appears, staged temp files may exist for this key.
    Dirty { key: String },
    /// The entry was removed.
    Remove { key: String },
    /// The entry was read. Only influences recency order during replay.
    Read { key: String },
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt journal: {0}")]
    Corrupt(String),
}

impl JournalRecord {
    /// Key of the entry this record refers to.
    pub fn key(&self) -> &str {
        match self {
            JournalRecord::Clean { key, .. }
            | JournalRecord::Dirty { key }
            | JournalRecord::Remove { key }
            | JournalRecord::Read { key } => key,
        }
    }

    /// Parses one body line (without its terminator).
    ///
    /// `value_count` fixes the arity of `CLEAN` records: they must carry
    /// exactly that many decimal lengths. An unknown tag, a missing or empty
    /// key, a wrong field count, or a non-decimal length is corrupt.
    pub fn parse(line: &str, value_count: usize) -> Result<Self, JournalError> {
        let corrupt = || JournalError::Corrupt(format!("unexpected journal line: {line:?}"));

        let parts: Vec<&str> = line.split(' ').collect();
        if parts.len() < 2 || parts[1].is_empty() {
            return Err(corrupt());
        }
        let key = parts[1].to_string();

        match parts[0] {
            "REMOVE" if parts.len() == 2 => Ok(JournalRecord::Remove { key }),
            "DIRTY" if parts.len() == 2 => Ok(JournalRecord::Dirty { key }),
            "READ" if parts.len() == 2 => Ok(JournalRecord::Read { key }),
            "CLEAN" if parts.len() == 2 + value_count => {
                let lengths = parts[2..]
                    .iter()
                    .map(|field| field.parse::<u64>())
                    .collect::<Result<Vec<u64>, _>>()
                    .map_err(|_| corrupt())?;
                Ok(JournalRecord::Clean { key, lengths })
            }
            _ => Err(corrupt()),
        }
    }
}

impl fmt::Display for JournalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalRecord::Clean { key, lengths } => {
                write!(f, "CLEAN {key}")?;
                for len in lengths {
                    write!(f, " {len}")?;
                }
                Ok(())
            }
            JournalRecord::Dirty { key } => write!(f, "DIRTY {key}"),
            JournalRecord::Remove { key } => write!(f, "REMOVE {key}"),
            JournalRecord::Read { key } => write!(f, "READ {key}"),
        }
    }
}

/// Buffered append-side handle on a journal file.
///
/// Appends are buffered; callers flush at the protocol points that need the
/// bytes on disk (after a `DIRTY`, before a rename, on close).
pub struct JournalWriter {
    out: BufWriter<File>,
}

impl JournalWriter {
    /// Creates (or truncates) the file at `path` and writes the four header
    /// lines for a journal with the given value count.
    pub fn create<P: AsRef<Path>>(path: P, value_count: usize) -> Result<Self, JournalError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut out = BufWriter::new(file);
        writeln!(out, "{MAGIC}")?;
        writeln!(out, "{VERSION}")?;
        writeln!(out, "{value_count}")?;
        writeln!(out)?;
        Ok(Self { out })
    }

    /// Opens an existing journal for appending. The header is assumed to be
    /// present already.
    pub fn open_append<P: AsRef<Path>>(path: P) -> Result<Self, JournalError> {
        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    /// Appends one record line to the buffer.
    pub fn append(&mut self, record: &JournalRecord) -> Result<(), JournalError> {
        writeln!(self.out, "{record}")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), JournalError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Read-side handle that validates the header on open and replays the body.
pub struct JournalReader {
    rdr: BufReader<File>,
    value_count: usize,
}

impl JournalReader {
    /// Opens the journal at `path` and validates its header against
    /// `value_count`. Any header deviation is corrupt.
    pub fn open<P: AsRef<Path>>(path: P, value_count: usize) -> Result<Self, JournalError> {
        let file = File::open(path)?;
        let mut rdr = BufReader::new(file);

        let magic = read_header_line(&mut rdr)?;
        let version = read_header_line(&mut rdr)?;
        let count = read_header_line(&mut rdr)?;
        let blank = read_header_line(&mut rdr)?;
        if magic != MAGIC || version != VERSION || !blank.is_empty() {
            return Err(JournalError::Corrupt(format!(
                "unexpected journal header: [{magic:?}, {version:?}, {count:?}, {blank:?}]"
            )));
        }
        match count.parse::<usize>() {
            Ok(n) if n == value_count => {}
            _ => {
                return Err(JournalError::Corrupt(format!(
                    "expected value count {value_count} but was {count:?}"
                )))
            }
        }

        Ok(Self { rdr, value_count })
    }

    /// Applies every body record in file order. Stops silently at a clean
    /// end-of-file, and also at a final line with no terminator: that line
    /// was torn by a crash mid-append and its record is discarded. A complete
    /// line that fails to parse is an error.
    pub fn replay<F>(&mut self, mut apply: F) -> Result<(), JournalError>
    where
        F: FnMut(JournalRecord),
    {
        let mut line = String::new();
        loop {
            line.clear();
            if self.rdr.read_line(&mut line)? == 0 {
                return Ok(());
            }
            let body = match line.strip_suffix('\n') {
                Some(body) => body,
                None => return Ok(()),
            };
            apply(JournalRecord::parse(body, self.value_count)?);
        }
    }
}

fn read_header_line(rdr: &mut BufReader<File>) -> Result<String, JournalError> {
    let mut line = String::new();
    rdr.read_line(&mut line)?;
    match line.strip_suffix('\n') {
        Some(body) => Ok(body.to_string()),
        None => Err(JournalError::Corrupt(
            "truncated journal header".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn sample_records() -> Vec<JournalRecord> {
        vec![
            JournalRecord::Dirty {
                key: "k1".to_string(),
            },
            JournalRecord::Clean {
                key: "k1".to_string(),
                lengths: vec![832, 21054],
            },
            JournalRecord::Read {
                key: "k1".to_string(),
            },
            JournalRecord::Remove {
                key: "k1".to_string(),
            },
        ]
    }

    // -------------------- Round trip --------------------

    #[test]
    fn write_and_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal");

        {
            let mut w = JournalWriter::create(&path, 2).unwrap();
            for record in sample_records() {
                w.append(&record).unwrap();
            }
            w.flush().unwrap();
        }

        let mut reader = JournalReader::open(&path, 2).unwrap();
        let mut recs = Vec::new();
        reader.replay(|r| recs.push(r)).unwrap();

        assert_eq!(recs, sample_records());
    }

    #[test]
    fn header_only_journal_replays_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal");
        JournalWriter::create(&path, 3).unwrap().flush().unwrap();

        let mut reader = JournalReader::open(&path, 3).unwrap();
        let mut count = 0;
        reader.replay(|_| count += 1).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn open_append_extends_existing_journal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal");

        {
            let mut w = JournalWriter::create(&path, 1).unwrap();
            w.append(&JournalRecord::Dirty {
                key: "a".to_string(),
            })
            .unwrap();
            w.flush().unwrap();
        }
        {
            let mut w = JournalWriter::open_append(&path).unwrap();
            w.append(&JournalRecord::Clean {
                key: "a".to_string(),
                lengths: vec![5],
            })
            .unwrap();
            w.flush().unwrap();
        }

        let mut reader = JournalReader::open(&path, 1).unwrap();
        let mut recs = Vec::new();
        reader.replay(|r| recs.push(r)).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(
            recs[1],
            JournalRecord::Clean {
                key: "a".to_string(),
                lengths: vec![5],
            }
        );
    }

    // -------------------- Rendering --------------------

    #[test]
    fn display_matches_wire_format() {
        assert_eq!(
            JournalRecord::Clean {
                key: "k".to_string(),
                lengths: vec![2, 5],
            }
            .to_string(),
            "CLEAN k 2 5"
        );
        assert_eq!(
            JournalRecord::Dirty {
                key: "k".to_string(),
            }
            .to_string(),
            "DIRTY k"
        );
        assert_eq!(
            JournalRecord::Remove {
                key: "k".to_string(),
            }
            .to_string(),
            "REMOVE k"
        );
        assert_eq!(
            JournalRecord::Read {
                key: "k".to_string(),
            }
            .to_string(),
            "READ k"
        );
    }

    #[test]
    fn on_disk_layout_is_exact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal");

        let mut w = JournalWriter::create(&path, 2).unwrap();
        w.append(&JournalRecord::Dirty {
            key: "a".to_string(),
        })
        .unwrap();
        w.append(&JournalRecord::Clean {
            key: "a".to_string(),
            lengths: vec![5, 5],
        })
        .unwrap();
        w.flush().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "libcore.io.DiskLruCache\n1\n2\n\nDIRTY a\nCLEAN a 5 5\n"
        );
    }

    // -------------------- Parse validation --------------------

    #[test]
    fn parse_rejects_unknown_tag() {
        assert!(matches!(
            JournalRecord::parse("BOGUS k", 2),
            Err(JournalError::Corrupt(_))
        ));
    }

    #[test]
    fn parse_rejects_missing_key() {
        assert!(matches!(
            JournalRecord::parse("REMOVE", 2),
            Err(JournalError::Corrupt(_))
        ));
        assert!(matches!(
            JournalRecord::parse("REMOVE ", 2),
            Err(JournalError::Corrupt(_))
        ));
    }

    #[test]
    fn parse_rejects_wrong_arity() {
        // DIRTY carries no trailing fields
        assert!(matches!(
            JournalRecord::parse("DIRTY k 3", 2),
            Err(JournalError::Corrupt(_))
        ));
        // CLEAN must carry exactly value_count lengths
        assert!(matches!(
            JournalRecord::parse("CLEAN k 1", 2),
            Err(JournalError::Corrupt(_))
        ));
        assert!(matches!(
            JournalRecord::parse("CLEAN k 1 2 3", 2),
            Err(JournalError::Corrupt(_))
        ));
    }

    #[test]
    fn parse_rejects_non_decimal_length() {
        assert!(matches!(
            JournalRecord::parse("CLEAN k 12 x", 2),
            Err(JournalError::Corrupt(_))
        ));
        assert!(matches!(
            JournalRecord::parse("CLEAN k -1 2", 2),
            Err(JournalError::Corrupt(_))
        ));
    }

    #[test]
    fn parse_accepts_exact_arity() {
        let record = JournalRecord::parse("CLEAN k 0 18446744073709551615", 2).unwrap();
        assert_eq!(
            record,
            JournalRecord::Clean {
                key: "k".to_string(),
                lengths: vec![0, u64::MAX],
            }
        );
    }

    // -------------------- Header validation --------------------

    #[test]
    fn open_rejects_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal");
        fs::write(&path, "not.the.magic\n1\n2\n\n").unwrap();

        assert!(matches!(
            JournalReader::open(&path, 2),
            Err(JournalError::Corrupt(_))
        ));
    }

    #[test]
    fn open_rejects_bad_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal");
        fs::write(&path, format!("{MAGIC}\n2\n2\n\n")).unwrap();

        assert!(matches!(
            JournalReader::open(&path, 2),
            Err(JournalError::Corrupt(_))
        ));
    }

    #[test]
    fn open_rejects_value_count_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal");
        fs::write(&path, format!("{MAGIC}\n1\n3\n\n")).unwrap();

        assert!(matches!(
            JournalReader::open(&path, 2),
            Err(JournalError::Corrupt(_))
        ));
    }

    #[test]
    fn open_rejects_missing_blank_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal");
        fs::write(&path, format!("{MAGIC}\n1\n2\nDIRTY k\n")).unwrap();

        assert!(matches!(
            JournalReader::open(&path, 2),
            Err(JournalError::Corrupt(_))
        ));
    }

    #[test]
    fn open_rejects_truncated_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal");
        fs::write(&path, format!("{MAGIC}\n1\n")).unwrap();

        assert!(matches!(
            JournalReader::open(&path, 2),
            Err(JournalError::Corrupt(_))
        ));
    }

    // -------------------- Torn writes --------------------

    #[test]
    fn torn_final_line_is_discarded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal");
        fs::write(
            &path,
            format!("{MAGIC}\n1\n1\n\nDIRTY a\nCLEAN a 5\nDIRTY partial-ke"),
        )
        .unwrap();

        let mut reader = JournalReader::open(&path, 1).unwrap();
        let mut recs = Vec::new();
        reader.replay(|r| recs.push(r)).unwrap();

        assert_eq!(recs.len(), 2);
        assert_eq!(recs[1].key(), "a");
    }

    #[test]
    fn complete_garbage_line_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal");
        fs::write(&path, format!("{MAGIC}\n1\n1\n\nDIRTY a\nBOGUS a\n")).unwrap();

        let mut reader = JournalReader::open(&path, 1).unwrap();
        assert!(matches!(
            reader.replay(|_| {}),
            Err(JournalError::Corrupt(_))
        ));
    }
}
