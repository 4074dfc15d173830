//! Source discovery and the raw record stream.
//!
//! The source is a delimited text file with a header row. A directory may be
//! given instead, in which case the first file (by name) matching the
//! configured include globs is used.
//!
//! Opening a source reads the first line only: it is stripped of a UTF-8
//! byte-order mark, used to pick the delimiter (comma when it holds more
//! commas than tabs, tab otherwise), and then chained back in front of the
//! rest of the file for the CSV reader. Nothing is loaded wholesale.
//!
//! Record-level problems (bad UTF-8, unparsable quoting) come back as
//! [`RowError`]s inside `Ok`. I/O failures come back as `Err` and are fatal.

use std::fs::File;
use std::io::{BufRead, BufReader, Chain, Cursor, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use csv::{ByteRecord, StringRecord};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::error::RowError;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

type Input = Chain<Cursor<Vec<u8>>, BufReader<File>>;

/// Resolve a file or directory argument to the data file to import.
pub fn resolve_source(path: &Path, include_globs: &[String]) -> Result<PathBuf> {
    if !path.exists() {
        bail!("Source does not exist: {}", path.display());
    }
    if path.is_file() {
        return Ok(path.to_path_buf());
    }

    let include_set = build_globset(include_globs)?;
    let mut candidates = Vec::new();
    for entry in WalkDir::new(path).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if include_set.is_match(&name) {
            candidates.push(entry.into_path());
        }
    }
    candidates.sort();

    match candidates.into_iter().next() {
        Some(file) => {
            tracing::info!(source = %file.display(), "using first matching data file");
            Ok(file)
        }
        None => bail!(
            "No data file matching {:?} in {}",
            include_globs,
            path.display()
        ),
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Comma if the sample holds more commas than tabs, otherwise tab.
pub fn detect_delimiter(sample: &[u8]) -> u8 {
    let commas = sample.iter().filter(|b| **b == b',').count();
    let tabs = sample.iter().filter(|b| **b == b'\t').count();
    if commas > tabs {
        b','
    } else {
        b'\t'
    }
}

/// Streaming reader over one source file.
pub struct SourceReader {
    path: PathBuf,
    delimiter: u8,
    headers: Vec<String>,
    reader: csv::Reader<Input>,
    record: ByteRecord,
    position: u64,
}

impl SourceReader {
    /// Open `path` and read its header. Fails if the file is missing, empty,
    /// or its header is not valid UTF-8.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open source: {}", path.display()))?;
        let mut rest = BufReader::new(file);

        let mut first_line = Vec::new();
        rest.read_until(b'\n', &mut first_line)
            .with_context(|| format!("Failed to read header of {}", path.display()))?;
        if let Some(stripped) = first_line.strip_prefix(UTF8_BOM) {
            first_line = stripped.to_vec();
        }
        if first_line.iter().all(|b| b.is_ascii_whitespace()) {
            bail!("Source has no header row: {}", path.display());
        }

        let delimiter = detect_delimiter(&first_line);
        let input = Cursor::new(first_line).chain(rest);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(input);

        let headers = reader
            .headers()
            .with_context(|| format!("Failed to decode header of {}", path.display()))?
            .iter()
            .map(str::to_string)
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            delimiter,
            headers,
            reader,
            record: ByteRecord::new(),
            position: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name, used as the checkpoint key.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Number of records consumed so far, skipped and rejected ones included.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Discard up to `n` records without decoding them. Returns how many were
    /// actually discarded, which is less than `n` only at end of stream.
    pub fn skip(&mut self, n: u64) -> Result<u64> {
        let mut skipped = 0;
        while skipped < n {
            match self.reader.read_byte_record(&mut self.record) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) if is_io(&e) => {
                    return Err(e).with_context(|| {
                        format!("I/O error at record {}", self.position + 1)
                    })
                }
                Err(_) => {}
            }
            skipped += 1;
            self.position += 1;
        }
        Ok(skipped)
    }

    /// The next record, `None` at end of stream.
    pub fn next_record(&mut self) -> Result<Option<std::result::Result<StringRecord, RowError>>> {
        match self.reader.read_byte_record(&mut self.record) {
            Ok(true) => {
                self.position += 1;
                let record = StringRecord::from_byte_record(self.record.clone())
                    .map_err(|e| RowError::Encoding(e.utf8_error().to_string()));
                Ok(Some(record))
            }
            Ok(false) => Ok(None),
            Err(e) if is_io(&e) => Err(e).with_context(|| {
                format!(
                    "I/O error reading {} at record {}",
                    self.path.display(),
                    self.position + 1
                )
            }),
            Err(e) => {
                self.position += 1;
                let err = match e.kind() {
                    csv::ErrorKind::Utf8 { err, .. } => RowError::Encoding(err.to_string()),
                    _ => RowError::Malformed(e.to_string()),
                };
                Ok(Some(Err(err)))
            }
        }
    }
}

fn is_io(err: &csv::Error) -> bool {
    matches!(err.kind(), csv::ErrorKind::Io(_))
}
