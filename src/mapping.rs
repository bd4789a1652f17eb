//! Candidate mapping records and the mapping-file parser.
//!
//! Mappings arrive as whitespace-separated text lines produced by an
//! approximate mapper. Field layout (0-indexed): 0 = query name, 2/3 =
//! query start/end, 4 = strand, 5 = target name, 7/8 = target start/end.
//! Field 12, when present, carries a colon-separated tag whose last piece
//! is a percentage identity estimate.

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Orientation of a mapping. `Rev` means the query aligns to the reverse
/// complement of the target interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Fwd,
    Rev,
}

/// One parsed candidate mapping.
#[derive(Debug, Clone)]
pub struct MappingRecord {
    pub query_id: String,
    /// Half-open interval on the query.
    pub query_start: u64,
    pub query_end: u64,
    pub strand: Strand,
    pub target_id: String,
    /// Half-open interval on the target.
    pub target_start: u64,
    pub target_end: u64,
    /// Identity estimate from the upstream mapper, in (0,1].
    pub estimated_identity: f64,
    /// Zero-based index of this mapping within its query group, assigned
    /// by the reader. Disambiguates split alignments in SAM output.
    pub rank_mapping: u64,
}

impl MappingRecord {
    /// Aligned query span in bp; this is the unit the progress meter counts.
    pub fn query_span(&self) -> u64 {
        self.query_end - self.query_start
    }
}

/// Parse one mapping line. Lines with fewer than 9 fields are an error;
/// a missing or non-numeric identity tag falls back to `default_identity`.
pub fn parse_mapping_line(line: &str, default_identity: f64) -> Result<MappingRecord> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 9 {
        bail!(
            "mapping line has {} fields, expected at least 9",
            tokens.len()
        );
    }

    let estimated_identity = tokens
        .get(12)
        .and_then(|tag| tag.split(':').next_back())
        .and_then(|tail| tail.parse::<f64>().ok())
        .map(|pct| pct / 100.0)
        .unwrap_or(default_identity);

    let record = MappingRecord {
        query_id: tokens[0].to_string(),
        query_start: tokens[2]
            .parse()
            .with_context(|| format!("invalid query start '{}'", tokens[2]))?,
        query_end: tokens[3]
            .parse()
            .with_context(|| format!("invalid query end '{}'", tokens[3]))?,
        strand: if tokens[4] == "+" {
            Strand::Fwd
        } else {
            Strand::Rev
        },
        target_id: tokens[5].to_string(),
        target_start: tokens[7]
            .parse()
            .with_context(|| format!("invalid target start '{}'", tokens[7]))?,
        target_end: tokens[8]
            .parse()
            .with_context(|| format!("invalid target end '{}'", tokens[8]))?,
        estimated_identity,
        rank_mapping: 0,
    };

    if record.query_start >= record.query_end {
        bail!(
            "empty query interval [{}, {})",
            record.query_start,
            record.query_end
        );
    }
    if record.target_start >= record.target_end {
        bail!(
            "empty target interval [{}, {})",
            record.target_start,
            record.target_end
        );
    }

    Ok(record)
}

/// One-pass pre-scan of the mapping file: the sum of query spans over all
/// records. This becomes the progress meter's total.
pub fn total_query_span<P: AsRef<Path>>(path: P, default_identity: f64) -> Result<u64> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("failed to open mapping file {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut total = 0u64;
    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_mapping_line(&line, default_identity)
            .with_context(|| format!("{}:{}", path.display(), line_number + 1))?;
        total += record.query_span();
    }
    Ok(total)
}

/// Cursor over the mapping file with a one-record lookahead, so the reader
/// stage can group consecutive records by query id without losing the
/// first record of the next group.
pub struct MappingReader {
    path: String,
    reader: BufReader<File>,
    line_number: u64,
    default_identity: f64,
    lookahead: Option<(MappingRecord, String)>,
}

impl MappingReader {
    pub fn open<P: AsRef<Path>>(path: P, default_identity: f64) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open mapping file {}", path.display()))?;
        let mut cursor = MappingReader {
            path: path.display().to_string(),
            reader: BufReader::new(file),
            line_number: 0,
            default_identity,
            lookahead: None,
        };
        cursor.lookahead = cursor.read_record()?;
        Ok(cursor)
    }

    /// The next record, if any, without consuming it.
    pub fn peek(&self) -> Option<&(MappingRecord, String)> {
        self.lookahead.as_ref()
    }

    /// Consume the lookahead record and refill it from the file.
    pub fn advance(&mut self) -> Result<Option<(MappingRecord, String)>> {
        let current = self.lookahead.take();
        if current.is_some() {
            self.lookahead = self.read_record()?;
        }
        Ok(current)
    }

    fn read_record(&mut self) -> Result<Option<(MappingRecord, String)>> {
        let mut line = String::new();
        loop {
            line.clear();
            let bytes = self.reader.read_line(&mut line)?;
            if bytes == 0 {
                return Ok(None);
            }
            self.line_number += 1;
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.trim().is_empty() {
                continue;
            }
            let record = parse_mapping_line(trimmed, self.default_identity)
                .with_context(|| format!("{}:{}", self.path, self.line_number))?;
            return Ok(Some((record, trimmed.to_string())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const DEFAULT_ID: f64 = 0.85;

    #[test]
    fn parses_all_fields() {
        let line = "q1\t100\t10\t90\t+\tchr1\t5000\t200\t280\t70\t80\t255\tid:f:98.5";
        let rec = parse_mapping_line(line, DEFAULT_ID).unwrap();
        assert_eq!(rec.query_id, "q1");
        assert_eq!(rec.query_start, 10);
        assert_eq!(rec.query_end, 90);
        assert_eq!(rec.strand, Strand::Fwd);
        assert_eq!(rec.target_id, "chr1");
        assert_eq!(rec.target_start, 200);
        assert_eq!(rec.target_end, 280);
        assert!((rec.estimated_identity - 0.985).abs() < 1e-9);
        assert_eq!(rec.rank_mapping, 0);
    }

    #[test]
    fn reverse_strand_is_anything_but_plus() {
        let line = "q1 100 10 90 - chr1 5000 200 280";
        let rec = parse_mapping_line(line, DEFAULT_ID).unwrap();
        assert_eq!(rec.strand, Strand::Rev);
    }

    #[test]
    fn missing_identity_tag_uses_default() {
        let line = "q1 100 10 90 + chr1 5000 200 280";
        let rec = parse_mapping_line(line, DEFAULT_ID).unwrap();
        assert!((rec.estimated_identity - DEFAULT_ID).abs() < 1e-9);
    }

    #[test]
    fn non_numeric_identity_tail_uses_default() {
        let line = "q1 100 10 90 + chr1 5000 200 280 70 80 255 id:f:n/a";
        let rec = parse_mapping_line(line, DEFAULT_ID).unwrap();
        assert!((rec.estimated_identity - DEFAULT_ID).abs() < 1e-9);
    }

    #[test]
    fn too_few_fields_is_an_error() {
        assert!(parse_mapping_line("q1 100 10 90 + chr1 5000 200", DEFAULT_ID).is_err());
    }

    #[test]
    fn unparseable_coordinate_is_an_error() {
        assert!(parse_mapping_line("q1 100 ten 90 + chr1 5000 200 280", DEFAULT_ID).is_err());
    }

    #[test]
    fn prescan_sums_query_spans_and_skips_blank_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "q1 100 0 80 + chr1 5000 0 80").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "q2 50 10 30 - chr1 5000 100 120").unwrap();
        let total = total_query_span(file.path(), DEFAULT_ID).unwrap();
        assert_eq!(total, 80 + 20);
    }

    #[test]
    fn prescan_reports_file_and_line_on_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "q1 100 0 80 + chr1 5000 0 80").unwrap();
        writeln!(file, "broken line").unwrap();
        let err = total_query_span(file.path(), DEFAULT_ID).unwrap_err();
        assert!(format!("{err:#}").contains(":2"));
    }

    #[test]
    fn cursor_peek_and_advance_keep_file_order() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "q1 100 0 10 + chr1 5000 0 10").unwrap();
        writeln!(file, "q1 100 20 40 + chr1 5000 50 70").unwrap();
        writeln!(file, "q2 50 0 50 - chr1 5000 100 150").unwrap();

        let mut cursor = MappingReader::open(file.path(), DEFAULT_ID).unwrap();
        assert_eq!(cursor.peek().unwrap().0.query_id, "q1");
        let (first, raw) = cursor.advance().unwrap().unwrap();
        assert_eq!(first.query_end, 10);
        assert!(raw.starts_with("q1"));
        assert_eq!(cursor.peek().unwrap().0.query_start, 20);
        cursor.advance().unwrap();
        assert_eq!(cursor.peek().unwrap().0.query_id, "q2");
        cursor.advance().unwrap();
        assert!(cursor.peek().is_none());
        assert!(cursor.advance().unwrap().is_none());
    }
}
