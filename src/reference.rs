//! Random access into the indexed target FASTA.
//!
//! Each alignment worker owns a private `ReferenceReader`: the backing
//! reader seeks and buffers, so a single instance must not be shared
//! across threads.

use anyhow::{anyhow, bail, Context, Result};
use noodles::core::{Position, Region};
use noodles::fasta;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

pub struct ReferenceReader {
    reader: fasta::io::IndexedReader<BufReader<File>>,
    lengths: HashMap<String, u64>,
}

impl ReferenceReader {
    /// Open the FASTA at `path`, requiring its `.fai` sidecar.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let fai_path = format!("{}.fai", path.display());

        let index = fasta::fai::read(&fai_path)
            .with_context(|| format!("failed to read FASTA index {fai_path}"))?;
        let lengths = read_sequence_lengths(&fai_path)?;

        let inner = File::open(path)
            .map(BufReader::new)
            .with_context(|| format!("failed to open reference FASTA {}", path.display()))?;

        Ok(ReferenceReader {
            reader: fasta::io::IndexedReader::new(inner, index),
            lengths,
        })
    }

    /// Length of a reference sequence, or `None` if the name is unknown.
    pub fn sequence_length(&self, name: &str) -> Option<u64> {
        self.lengths.get(name).copied()
    }

    /// Fetch `[start, end)` (0-based, half-open) of the named sequence.
    pub fn fetch(&mut self, name: &str, start: u64, end: u64) -> Result<Vec<u8>> {
        if start >= end {
            bail!("empty reference interval {name}:{start}-{end}");
        }
        let first = Position::try_from((start + 1) as usize)
            .map_err(|_| anyhow!("invalid reference coordinate {start}"))?;
        let last = Position::try_from(end as usize)
            .map_err(|_| anyhow!("invalid reference coordinate {end}"))?;

        let region = Region::new(name, first..=last);
        let record = self
            .reader
            .query(&region)
            .with_context(|| format!("failed to fetch {name}:{start}-{end}"))?;

        Ok(record.sequence().as_ref().to_vec())
    }
}

/// The `.fai` is five-plus tab-separated columns; the first two are the
/// sequence name and its length.
fn read_sequence_lengths(fai_path: &str) -> Result<HashMap<String, u64>> {
    let file = File::open(fai_path)
        .with_context(|| format!("failed to open FASTA index {fai_path}"))?;
    let reader = BufReader::new(file);

    let mut lengths = HashMap::new();
    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let name = fields
            .next()
            .ok_or_else(|| anyhow!("{}:{}: missing sequence name", fai_path, line_number + 1))?;
        let length: u64 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| anyhow!("{}:{}: invalid sequence length", fai_path, line_number + 1))?;
        lengths.insert(name.to_string(), length);
    }
    Ok(lengths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    /// Write a FASTA with one sequence per line plus a matching `.fai`.
    fn write_indexed_fasta(dir: &TempDir, records: &[(&str, &str)]) -> std::path::PathBuf {
        let fasta_path = dir.path().join("ref.fa");
        let mut fasta = File::create(&fasta_path).unwrap();
        let mut fai = File::create(dir.path().join("ref.fa.fai")).unwrap();

        let mut offset = 0u64;
        for (name, seq) in records {
            let header = format!(">{name}\n");
            offset += header.len() as u64;
            writeln!(
                fai,
                "{}\t{}\t{}\t{}\t{}",
                name,
                seq.len(),
                offset,
                seq.len(),
                seq.len() + 1
            )
            .unwrap();
            write!(fasta, "{header}{seq}\n").unwrap();
            offset += seq.len() as u64 + 1;
        }
        fasta_path
    }

    #[test]
    fn lengths_and_fetch() {
        let dir = TempDir::new().unwrap();
        let path = write_indexed_fasta(&dir, &[("chr1", "ACGTACGTACGT"), ("chr2", "TTTTAAAA")]);

        let mut reader = ReferenceReader::open(&path).unwrap();
        assert_eq!(reader.sequence_length("chr1"), Some(12));
        assert_eq!(reader.sequence_length("chr2"), Some(8));
        assert_eq!(reader.sequence_length("chrX"), None);

        assert_eq!(reader.fetch("chr1", 0, 12).unwrap(), b"ACGTACGTACGT");
        assert_eq!(reader.fetch("chr1", 4, 8).unwrap(), b"ACGT");
        assert_eq!(reader.fetch("chr2", 0, 4).unwrap(), b"TTTT");
    }

    #[test]
    fn unknown_sequence_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write_indexed_fasta(&dir, &[("chr1", "ACGT")]);
        let mut reader = ReferenceReader::open(&path).unwrap();
        assert!(reader.fetch("chrX", 0, 4).is_err());
    }

    #[test]
    fn missing_index_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("naked.fa");
        std::fs::write(&path, ">chr1\nACGT\n").unwrap();
        assert!(ReferenceReader::open(&path).is_err());
    }
}
