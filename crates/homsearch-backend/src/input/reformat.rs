//! A3M to aligned FASTA conversion
//!
//! In A3M, upper-case residues and `-` are match columns while lower-case
//! residues are insertions relative to the query. Conversion pads every
//! insertion slot to the widest insertion seen in that slot so that all rows
//! share one length.

use crate::error::StageError;
use crate::input::classifier::{header_name, is_pseudo_header};

/// Aligned FASTA produced from an A3M record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reformatted {
    pub fasta: String,
    pub rows: usize,
    /// Names of rows dropped for disagreeing with the query's match columns
    pub dropped: Vec<String>,
}

struct Row {
    header: String,
    sequence: String,
}

impl Row {
    fn name(&self) -> &str {
        header_name(&self.header).unwrap_or("")
    }
}

/// Split a row into its insertion slots and match columns
///
/// Slot `k` holds the insertion preceding match column `k`; the last slot holds
/// the trailing insertion.
fn split_columns(sequence: &str) -> (Vec<String>, Vec<char>) {
    let mut inserts = vec![String::new()];
    let mut matches = Vec::new();
    for c in sequence.chars() {
        if c.is_ascii_uppercase() || c == '-' {
            matches.push(c);
            inserts.push(String::new());
        } else if c.is_ascii_lowercase() {
            if let Some(slot) = inserts.last_mut() {
                slot.push(c);
            }
        }
    }
    (inserts, matches)
}

fn parse_rows(text: &str) -> Vec<Row> {
    let mut rows: Vec<Row> = Vec::new();
    let mut skipping = false;
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if header_name(line).is_some() {
            skipping = is_pseudo_header(line);
            if !skipping {
                rows.push(Row {
                    header: line.to_string(),
                    sequence: String::new(),
                });
            }
            continue;
        }
        if skipping {
            continue;
        }
        if let Some(row) = rows.last_mut() {
            row.sequence.push_str(line);
        }
    }
    rows
}

/// Convert an A3M alignment into aligned FASTA
pub fn a3m_to_aligned_fasta(text: &str) -> Result<Reformatted, StageError> {
    let rows = parse_rows(text);
    let Some(query) = rows.first() else {
        return Err(StageError::InvalidInput(
            "alignment contains no sequences".to_string(),
        ));
    };

    let (_, query_matches) = split_columns(&query.sequence);
    let match_count = query_matches.len();

    let mut kept = Vec::with_capacity(rows.len());
    let mut dropped = Vec::new();
    for row in &rows {
        let (inserts, matches) = split_columns(&row.sequence);
        if matches.len() == match_count {
            kept.push((row, inserts, matches));
        } else {
            dropped.push(row.name().to_string());
        }
    }

    let mut widths = vec![0usize; match_count + 1];
    for (_, inserts, _) in &kept {
        for (width, slot) in widths.iter_mut().zip(inserts) {
            *width = (*width).max(slot.len());
        }
    }

    let mut fasta = String::new();
    for (row, inserts, matches) in &kept {
        fasta.push_str(&row.header);
        fasta.push('\n');
        for (k, width) in widths.iter().enumerate() {
            let slot = &inserts[k];
            fasta.push_str(slot);
            fasta.push_str(&"-".repeat(width - slot.len()));
            if let Some(c) = matches.get(k) {
                fasta.push(*c);
            }
        }
        fasta.push('\n');
    }

    Ok(Reformatted {
        fasta,
        rows: kept.len(),
        dropped,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_pads_insertions() {
        let a3m = ">q\nMKVL\n>h1\nMKabVL\n>h2\nM-Vc-\n";
        let out = a3m_to_aligned_fasta(a3m).unwrap();

        assert_eq!(out.rows, 3);
        assert!(out.dropped.is_empty());
        assert_eq!(out.fasta, ">q\nMK--V-L\n>h1\nMKabV-L\n>h2\nM---Vc-\n");
    }

    #[test]
    fn test_all_rows_share_length() {
        let a3m = ">q\nMKVL\n>h1\nMKabVL\n>h2\nMKVcL\n>h3\nxMKVL\n";
        let out = a3m_to_aligned_fasta(a3m).unwrap();
        let lengths: Vec<usize> = out
            .fasta
            .lines()
            .filter(|l| !l.starts_with('>'))
            .map(str::len)
            .collect();
        assert_eq!(lengths.len(), 4);
        assert!(lengths.iter().all(|&l| l == lengths[0]));
        assert_eq!(lengths[0], 4 + 2 + 1 + 1);
    }

    #[test]
    fn test_strips_pseudo_rows() {
        let a3m = ">ss_pred\nCCHH\n>q\nMKVL\n>ss_conf\n9999\n>h1\nMKVL\n";
        let out = a3m_to_aligned_fasta(a3m).unwrap();
        assert_eq!(out.fasta, ">q\nMKVL\n>h1\nMKVL\n");
    }

    #[test]
    fn test_drops_rows_with_wrong_match_count() {
        let a3m = ">q\nMKVL\n>bad desc\nMKV\n>h1\nMKVL\n";
        let out = a3m_to_aligned_fasta(a3m).unwrap();
        assert_eq!(out.rows, 2);
        assert_eq!(out.dropped, vec!["bad".to_string()]);
        assert!(!out.fasta.contains(">bad"));
    }

    #[test]
    fn test_empty_alignment_is_invalid() {
        assert!(matches!(
            a3m_to_aligned_fasta("\n\n"),
            Err(StageError::InvalidInput(_))
        ));
    }
}
