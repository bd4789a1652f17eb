//! Streaming FASTA ingestion for query sequences.
//!
//! The reader stage consumes one sequence at a time; whole files are never
//! loaded up front. Compressed inputs (`.gz`/`.bgz`) are wrapped in a bgzf
//! reader, plain files in a `BufReader`.

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Open a FASTA file, auto-detecting bgzip compression by extension.
fn open_fasta_input<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("failed to open FASTA {}", path.display()))?;

    let is_compressed = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext == "gz" || ext == "bgz")
        .unwrap_or(false);

    if is_compressed {
        Ok(Box::new(BufReader::new(
            noodles::bgzf::Reader::new(file),
        )))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Pull-based iteration over `(name, sequence)` records of one FASTA file,
/// in file order.
pub struct FastaReader {
    path: String,
    reader: Box<dyn BufRead>,
    line_number: u64,
    /// Header of the next record, read past while collecting the previous
    /// record's sequence lines.
    pending_name: Option<String>,
}

impl FastaReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = open_fasta_input(&path)?;
        Ok(FastaReader {
            path: path.as_ref().display().to_string(),
            reader,
            line_number: 0,
            pending_name: None,
        })
    }

    /// The next record, or `None` at end of file. The sequence is returned
    /// raw; callers canonicalize it.
    pub fn next_record(&mut self) -> Result<Option<(String, Vec<u8>)>> {
        let name = match self.pending_name.take() {
            Some(name) => name,
            None => match self.read_header()? {
                Some(name) => name,
                None => return Ok(None),
            },
        };

        let mut seq = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                break;
            }
            self.line_number += 1;
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(header) = trimmed.strip_prefix('>') {
                self.pending_name = Some(Self::record_name(header));
                break;
            }
            seq.extend_from_slice(trimmed.as_bytes());
        }

        Ok(Some((name, seq)))
    }

    fn read_header(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            self.line_number += 1;
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                continue;
            }
            match trimmed.strip_prefix('>') {
                Some(header) => return Ok(Some(Self::record_name(header))),
                None => bail!(
                    "{}:{}: sequence data before first FASTA header",
                    self.path,
                    self.line_number
                ),
            }
        }
    }

    /// Record name is everything after `>` up to the first whitespace.
    fn record_name(header: &str) -> String {
        header
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn fasta_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{content}").unwrap();
        file
    }

    #[test]
    fn iterates_records_in_file_order() {
        let file = fasta_file(">q1 description\nACGT\nACGT\n\n>q2\nTTTT\n");
        let mut reader = FastaReader::open(file.path()).unwrap();
        let (name, seq) = reader.next_record().unwrap().unwrap();
        assert_eq!(name, "q1");
        assert_eq!(seq, b"ACGTACGT");
        let (name, seq) = reader.next_record().unwrap().unwrap();
        assert_eq!(name, "q2");
        assert_eq!(seq, b"TTTT");
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn empty_file_yields_nothing() {
        let file = fasta_file("");
        let mut reader = FastaReader::open(file.path()).unwrap();
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn leading_sequence_data_is_an_error() {
        let file = fasta_file("ACGT\n>q1\nACGT\n");
        let mut reader = FastaReader::open(file.path()).unwrap();
        assert!(reader.next_record().is_err());
    }
}
