//! Ledger file persistence.
//!
//! The ledger is a CSV file with a fixed header followed by one row per
//! completed story. Rows are only ever appended; every append is flushed and
//! synced before it returns.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use csv::{ByteRecord, ReaderBuilder, WriterBuilder};

use crate::keywords::{encode_keyword_list, parse_keyword_list};
use crate::types::ProcessedMarker;

/// Column names of the ledger header row.
pub const LEDGER_HEADER: [&str; 3] = ["story_id", "llm_keywords", "dev_keywords"];

/// Error type for ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unexpected ledger header in {path}: found '{found}'")]
    HeaderMismatch { path: PathBuf, found: String },

    #[error("Invalid marker: {0}")]
    InvalidMarker(String),
}

/// Append-only record of completed stories.
pub struct Ledger {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl Ledger {
    /// Open a ledger, creating it with a header row if it does not exist.
    ///
    /// An existing ledger must start with [`LEDGER_HEADER`]. A final row cut
    /// short by a crash never completed, so it is truncated away before new
    /// rows are appended.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        let len = file.metadata()?.len();

        if len == 0 {
            let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
            writer.write_record(LEDGER_HEADER)?;
            writer.flush()?;
            writer.get_ref().sync_data()?;
            tracing::debug!(path = %path.display(), "Created ledger");
            return Ok(Self { path, writer });
        }

        let content = fs::read(&path)?;
        check_header(&path, &content)?;

        if content.last() != Some(&b'\n') {
            match content.iter().rposition(|b| *b == b'\n') {
                Some(end) => {
                    tracing::warn!(
                        path = %path.display(),
                        dropped_bytes = content.len() - end - 1,
                        "Ledger ends mid-row, dropping the torn row"
                    );
                    file.set_len((end + 1) as u64)?;
                }
                None => file.write_all(b"\n")?,
            }
            file.sync_data()?;
        }

        let writer = WriterBuilder::new().has_headers(false).from_writer(file);
        Ok(Self { path, writer })
    }

    /// Path of the ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a completion marker and make it durable.
    ///
    /// The story id is written trimmed, the same form rows are read back in.
    pub fn append(&mut self, marker: &ProcessedMarker) -> Result<(), LedgerError> {
        let story_id = marker.story_id.trim();
        if story_id.is_empty() {
            return Err(LedgerError::InvalidMarker("story id is empty".to_string()));
        }

        let llm = encode_keyword_list(&marker.llm_keywords)?;
        let dev = encode_keyword_list(&marker.dev_keywords)?;
        self.writer
            .write_record([story_id, llm.as_str(), dev.as_str()])?;
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Read every complete marker from the start of the file.
    ///
    /// Rows that cannot be parsed are skipped with a warning.
    /// If a story appears more than once, the first row is kept.
    pub fn read_markers(&self) -> Result<Vec<ProcessedMarker>, LedgerError> {
        read_markers_at(&self.path)
    }

    /// Ids of every story recorded as completed.
    pub fn completed_ids(&self) -> Result<HashSet<String>, LedgerError> {
        Ok(self
            .read_markers()?
            .into_iter()
            .map(|marker| marker.story_id)
            .collect())
    }
}

/// Read the markers of a ledger without opening it for writing.
///
/// Nothing on disk is changed. A torn final row is ignored rather than
/// truncated, and an empty file reads as an empty ledger.
pub fn read_markers_at(path: impl AsRef<Path>) -> Result<Vec<ProcessedMarker>, LedgerError> {
    let path = path.as_ref();
    let content = fs::read(path)?;
    if content.is_empty() {
        return Ok(Vec::new());
    }
    check_header(path, &content)?;

    let complete = match content.iter().rposition(|b| *b == b'\n') {
        Some(end) if end + 1 < content.len() => &content[..=end],
        _ => &content[..],
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(complete);

    let mut seen = HashSet::new();
    let mut markers = Vec::new();
    for record in reader.byte_records() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Skipping unreadable ledger row"
                );
                continue;
            }
        };
        match parse_row(&record) {
            Some(marker) => {
                if seen.insert(marker.story_id.clone()) {
                    markers.push(marker);
                }
            }
            None => {
                tracing::warn!(
                    path = %path.display(),
                    line = record.position().map(|p| p.line()),
                    "Skipping unreadable ledger row"
                );
            }
        }
    }
    Ok(markers)
}

fn check_header(path: &Path, content: &[u8]) -> Result<(), LedgerError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content);
    let mut first = ByteRecord::new();
    reader.read_byte_record(&mut first)?;

    let matches = first.len() == LEDGER_HEADER.len()
        && first
            .iter()
            .zip(LEDGER_HEADER)
            .all(|(found, expected)| std::str::from_utf8(found).map(str::trim) == Ok(expected));
    if matches {
        Ok(())
    } else {
        Err(LedgerError::HeaderMismatch {
            path: path.to_path_buf(),
            found: first
                .iter()
                .map(String::from_utf8_lossy)
                .collect::<Vec<_>>()
                .join(","),
        })
    }
}

fn parse_row(record: &ByteRecord) -> Option<ProcessedMarker> {
    if record.len() != LEDGER_HEADER.len() {
        return None;
    }

    let field = |idx| record.get(idx).and_then(|raw| std::str::from_utf8(raw).ok());
    let story_id = field(0)?.trim();
    if story_id.is_empty() {
        return None;
    }

    let llm_keywords = parse_keyword_list(field(1)?).ok()?;
    let dev_keywords = parse_keyword_list(field(2)?).ok()?;
    Some(ProcessedMarker::new(story_id, llm_keywords, dev_keywords))
}
