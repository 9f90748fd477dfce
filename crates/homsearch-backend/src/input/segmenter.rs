//! Batch splitting into per-query working directories

use crate::config::JobConfig;
use crate::error::{JobError, Result};
use crate::input::classifier::classify;
use crate::query::QueryTable;
use homsearch_common::QueryFormat;
use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Line separating records in a batch file
pub const RECORD_SEPARATOR: &str = "//";

/// Query table built from a batch, plus what was noticed on the way
#[derive(Debug)]
pub struct Segmentation {
    pub table: QueryTable,
    pub warnings: Vec<String>,
    /// More records were present than the query limit allows
    pub truncated: bool,
}

/// Splits a batch file into query units
#[derive(Debug, Clone)]
pub struct InputSegmenter {
    job_name: String,
    job_root: PathBuf,
    max_queries: usize,
}

impl InputSegmenter {
    pub fn new(config: &JobConfig, job_name: impl Into<String>, job_root: impl Into<PathBuf>) -> Self {
        Self {
            job_name: job_name.into(),
            job_root: job_root.into(),
            max_queries: config.max_queries,
        }
    }

    pub fn with_max_queries(mut self, max_queries: usize) -> Self {
        self.max_queries = max_queries;
        self
    }

    /// Segment the batch file at `input`
    pub fn segment_file(&self, input: &Path) -> Result<Segmentation> {
        let file = File::open(input).map_err(|source| JobError::Input {
            path: input.to_path_buf(),
            source,
        })?;
        self.segment(BufReader::new(file), input)
    }

    /// Segment a batch read from `reader`; `source` names it in errors
    ///
    /// The batch is split on raw bytes and each record is decoded on its own,
    /// so invalid UTF-8 in one record only costs that record a warning.
    pub fn segment<R: BufRead>(&self, mut reader: R, source: &Path) -> Result<Segmentation> {
        fs::create_dir_all(&self.job_root).map_err(|e| JobError::setup(&self.job_root, e))?;

        let mut table = QueryTable::new(self.job_name.clone(), self.job_root.clone());
        let mut warnings = Vec::new();
        let mut truncated = false;
        let mut record: Vec<u8> = Vec::new();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .map_err(|e| JobError::Input {
                    path: source.to_path_buf(),
                    source: e,
                })?;
            let line = (read > 0).then(|| strip_line_end(&buf));

            let at_boundary = match line {
                Some(bytes) => bytes.trim_ascii() == RECORD_SEPARATOR.as_bytes(),
                None => true,
            };

            if !at_boundary {
                if let Some(bytes) = line {
                    record.extend_from_slice(bytes);
                    record.push(b'\n');
                }
                continue;
            }

            let text = String::from_utf8_lossy(&record);
            if !text.trim().is_empty() {
                if table.len() >= self.max_queries {
                    truncated = true;
                    break;
                }
                if let Cow::Owned(_) = text {
                    let index = table.len();
                    warn!(unit = index, "Query contains invalid UTF-8");
                    warnings.push(format!(
                        "Query {} contains bytes that are not valid UTF-8; they were replaced",
                        index
                    ));
                }
                self.write_unit(&mut table, &text)?;
            }
            record.clear();

            if line.is_none() {
                break;
            }
        }

        if truncated {
            let message = format!(
                "Input contains more than {} queries; only the first {} were accepted",
                self.max_queries, self.max_queries
            );
            warn!(max_queries = self.max_queries, "Query batch truncated");
            warnings.push(message);
        }

        if table.is_empty() {
            return Err(JobError::NoQueries(source.display().to_string()));
        }

        info!(
            queries = table.len(),
            truncated,
            job_root = %self.job_root.display(),
            "Segmented query batch"
        );

        Ok(Segmentation {
            table,
            warnings,
            truncated,
        })
    }

    fn write_unit(&self, table: &mut QueryTable, record: &str) -> Result<()> {
        let classification = classify(record);
        let index = table.len();

        let mut contents = String::with_capacity(record.len() + 32);
        if classification.needs_header {
            contents.push_str(&format!(">Query_{}\n", index));
        }
        contents.push_str(strip_leading_blank_lines(record));
        if classification.format == QueryFormat::StockholmMsa {
            contents.push_str(RECORD_SEPARATOR);
            contents.push('\n');
        }

        let unit = table.push_unit(
            classification.format,
            record.len() as u64,
            classification.query_length,
        );

        fs::create_dir_all(&unit.workdir).map_err(|e| JobError::setup(&unit.workdir, e))?;
        fs::write(&unit.input_path, contents).map_err(|e| JobError::setup(&unit.input_path, e))?;

        debug!(
            index = unit.index,
            format = %unit.format,
            size_bytes = unit.size_bytes,
            query_length = unit.query_length,
            "Wrote query"
        );
        Ok(())
    }
}

/// Line content without its `\n` or `\r\n` terminator
fn strip_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// `record` starting at its first non-blank line
fn strip_leading_blank_lines(record: &str) -> &str {
    let mut offset = 0;
    for line in record.split_inclusive('\n') {
        if !line.trim().is_empty() {
            break;
        }
        offset += line.len();
    }
    &record[offset..]
}
