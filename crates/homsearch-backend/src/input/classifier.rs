//! Format sniffing for raw query records
//!
//! Classification never fails. Anything that is not recognisably Stockholm,
//! a profile, or an A3M alignment falls through to the FASTA heuristics.

use homsearch_common::{Method, QueryFormat};

/// Header names of annotation rows that only appear in A3M alignments
pub const PSEUDO_HEADERS: &[&str] = &["ss_pred", "ss_conf", "ss_dssp", "sa_dssp", "Consensus"];

const STOCKHOLM_MARKER: &str = "# STOCKHOLM";

/// Result of classifying one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub format: QueryFormat,
    /// The record has no FASTA header and needs a placeholder
    pub needs_header: bool,
    /// Residues of the query sequence, gaps excluded
    pub query_length: usize,
}

/// Name of a FASTA header line, `None` for non-header lines
pub fn header_name(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix('>')?;
    Some(rest.split_whitespace().next().unwrap_or(""))
}

pub fn is_pseudo_header(line: &str) -> bool {
    header_name(line).is_some_and(|name| PSEUDO_HEADERS.contains(&name))
}

fn is_residue(c: char) -> bool {
    c.is_ascii_alphabetic()
}

/// Classify a record by inspecting its lines
pub fn classify(record: &str) -> Classification {
    let lines: Vec<&str> = record
        .lines()
        .map(str::trim_end)
        .skip_while(|line| line.trim().is_empty())
        .collect();
    let first = lines.first().map(|l| l.trim_start()).unwrap_or("");

    if first.starts_with(STOCKHOLM_MARKER) {
        return Classification {
            format: QueryFormat::StockholmMsa,
            needs_header: false,
            query_length: stockholm_query_length(&lines),
        };
    }

    let profile = if first.starts_with(Method::Comer.profile_marker()) {
        Some(QueryFormat::ComerProfile)
    } else if first.starts_with(Method::Cother.profile_marker()) {
        Some(QueryFormat::CotherProfile)
    } else {
        None
    };
    if let Some(format) = profile {
        return Classification {
            format,
            needs_header: false,
            query_length: profile_length(&lines),
        };
    }

    let rows = fasta_rows(&lines);
    let query_length = rows
        .first()
        .map(|row| row.sequence.chars().filter(|c| is_residue(*c)).count())
        .unwrap_or(0);

    if lines.iter().any(|line| is_pseudo_header(line)) {
        return Classification {
            format: QueryFormat::A3m,
            needs_header: false,
            query_length,
        };
    }

    let headers = rows.iter().filter(|row| row.has_header).count();
    let format = match headers {
        0 | 1 => QueryFormat::PlainFasta,
        _ => {
            let first_len = rows[0].sequence.len();
            if rows.iter().any(|row| row.sequence.len() != first_len) {
                QueryFormat::A3m
            } else {
                QueryFormat::AlignedFasta
            }
        },
    };

    Classification {
        format,
        needs_header: headers == 0,
        query_length,
    }
}

struct FastaRow {
    has_header: bool,
    /// Sequence with whitespace removed, gap characters kept
    sequence: String,
}

fn fasta_rows(lines: &[&str]) -> Vec<FastaRow> {
    let mut rows: Vec<FastaRow> = Vec::new();
    let mut in_pseudo_row = false;
    for line in lines {
        if header_name(line).is_some() {
            in_pseudo_row = is_pseudo_header(line);
            if in_pseudo_row {
                continue;
            }
            rows.push(FastaRow {
                has_header: true,
                sequence: String::new(),
            });
            continue;
        }
        if in_pseudo_row {
            continue;
        }
        if rows.is_empty() {
            rows.push(FastaRow {
                has_header: false,
                sequence: String::new(),
            });
        }
        if let Some(row) = rows.last_mut() {
            row.sequence
                .extend(line.chars().filter(|c| !c.is_whitespace()));
        }
    }
    rows
}

fn stockholm_query_length(lines: &[&str]) -> usize {
    let mut query: Option<&str> = None;
    let mut length = 0;
    for line in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line == "//" {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(name), Some(segment)) = (fields.next(), fields.next()) else {
            continue;
        };
        match query {
            None => query = Some(name),
            Some(q) if q != name => continue,
            Some(_) => {},
        }
        length += segment.chars().filter(|c| is_residue(*c)).count();
    }
    length
}

fn profile_length(lines: &[&str]) -> usize {
    lines
        .iter()
        .find_map(|line| line.trim_start().strip_prefix("LEN:"))
        .and_then(|value| value.split_whitespace().next())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}
