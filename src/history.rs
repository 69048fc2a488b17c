//! Append-only JSON-lines history used to deduplicate records across runs.
//!
//! Each line holds one record serialized with its keys in sorted order. That
//! canonical form doubles as the dedupe key, so two records with equal field
//! values compare equal no matter how their fields were ordered on disk.
//!
//! Reads are tolerant: blank, truncated or otherwise malformed lines are logged
//! and skipped. Writes only ever append whole lines.

use crate::error::Result;
use crate::record::Record;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Serialize a value with every object's keys in sorted order.
pub fn canonicalize<T: Serialize>(value: &T) -> Result<String> {
    let value = sort_keys(serde_json::to_value(value)?);
    Ok(serde_json::to_string(&value)?)
}

/// Rebuild objects with keys inserted in sorted order, recursively.
///
/// Doesn't rely on `serde_json::Map` being a `BTreeMap`, which stops being true
/// as soon as anything in the build enables `preserve_order`.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k, sort_keys(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Keep the candidates whose canonical form is not in `existing`.
///
/// Input order is preserved. A record repeated inside `candidates` is kept only
/// once, at its first position.
pub fn filter_new(candidates: Vec<Record>, existing: &HashSet<String>) -> Vec<Record> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|record| match canonicalize(record) {
            Ok(key) => !existing.contains(&key) && seen.insert(key),
            Err(e) => {
                warn!(title = %record.title, error = %e, "Skipping record that cannot be serialized");
                false
            }
        })
        .collect()
}

/// History file for one backend.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the canonical form of every valid entry.
    ///
    /// A missing or empty file yields an empty set. Malformed lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns `CrawlError::Io` if the file exists but cannot be read.
    pub fn load(&self) -> Result<HashSet<String>> {
        let mut keys = HashSet::new();
        for entry in self.entries()? {
            keys.insert(canonicalize(&entry)?);
        }
        debug!(path = ?self.path, entries = keys.len(), "Loaded history");
        Ok(keys)
    }

    /// Read back every valid entry as a typed record, in file order.
    pub fn read_records(&self) -> Result<Vec<Record>> {
        let records = self
            .entries()?
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<Record>(entry) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(path = ?self.path, error = %e, "History entry is not a record, skipping");
                    None
                }
            })
            .collect();
        Ok(records)
    }

    /// Number of valid entries. This is the offset a fresh run resumes from.
    pub fn count(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }

    /// Append records, one canonical line each, in input order.
    ///
    /// An empty batch is a no-op and never creates the file.
    ///
    /// # Errors
    ///
    /// Returns `CrawlError::Io` if the directory or file cannot be written. Lines
    /// already on disk are left untouched.
    pub fn append(&self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            debug!(path = ?self.path, "Nothing to append");
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)?;

        // A previous crash can leave a partial last line; start on a fresh one
        // so the new entry doesn't get glued onto it.
        if ends_mid_line(&mut file)? {
            warn!(path = ?self.path, "History ends with a partial line, terminating it");
            file.write_all(b"\n")?;
        }

        for record in records {
            let mut line = canonicalize(record)?;
            line.push('\n');
            file.write_all(line.as_bytes())?;
        }
        file.flush()?;

        info!(path = ?self.path, appended = records.len(), "Appended records to history");
        Ok(())
    }

    /// Parse every non-blank line into a JSON object, skipping the rest.
    fn entries(&self) -> Result<Vec<Value>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "History file not found");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut buf = Vec::new();
        let mut line_no = 0usize;

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_no += 1;

            let line = buf.trim_ascii();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_slice::<Value>(line) {
                Ok(value @ Value::Object(_)) => entries.push(value),
                Ok(_) => {
                    warn!(path = ?self.path, line = line_no, "History line is not an object, skipping");
                }
                Err(e) => {
                    warn!(path = ?self.path, line = line_no, error = %e, "Malformed history line, skipping");
                }
            }
        }

        Ok(entries)
    }
}

fn ends_mid_line(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}
