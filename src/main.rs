use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use wfalign::config::AlignConfig;
use wfalign::pipeline::Aligner;

/// Parse a number that may have metric suffix (k/K=1000, m/M=1e6, g/G=1e9)
fn parse_metric_number(s: &str) -> Result<u64, String> {
    if s.is_empty() {
        return Err("Empty string".to_string());
    }

    let (num_part, suffix) = if s.ends_with(|c: char| c.is_ascii_alphabetic()) {
        let last_char = s.chars().last().unwrap();
        (&s[..s.len() - last_char.len_utf8()], Some(last_char))
    } else {
        (s, None)
    };

    let base: f64 = num_part
        .parse()
        .map_err(|e| format!("Invalid number: {e}"))?;

    let multiplier = match suffix {
        Some('k') | Some('K') => 1000.0,
        Some('m') | Some('M') => 1_000_000.0,
        Some('g') | Some('G') => 1_000_000_000.0,
        Some(c) => {
            return Err(format!(
                "Unknown suffix '{c}'. Use k/K (1000), m/M (1e6), or g/G (1e9)"
            ))
        }
        None => 1.0,
    };

    let result = base * multiplier;

    if result > u64::MAX as f64 {
        return Err(format!("Value {result} too large for u64"));
    }

    Ok(result as u64)
}

/// Parse "mismatch,gap_open,gap_ext" into a penalty triple.
fn parse_penalty_triple(s: &str) -> Result<(i32, i32, i32), String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 3 {
        return Err(format!(
            "expected mismatch,gap_open,gap_ext but got '{s}'"
        ));
    }
    let values: Vec<i32> = parts
        .iter()
        .map(|p| p.trim().parse::<i32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid penalty in '{s}': {e}"))?;
    Ok((values[0], values[1], values[2]))
}

/// wfalign - base-level alignment of approximate genome mappings
///
/// Takes a mapping file produced by an approximate mapper plus the query
/// and target FASTAs, and emits one base-level alignment (PAF or SAM
/// record) per mapping using a wavefront aligner with affine gaps.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Indexed target FASTA (requires a .fai sidecar)
    #[clap(value_name = "TARGET")]
    target: PathBuf,

    /// Query FASTA file(s), scanned in the given order
    #[clap(value_name = "QUERY", num_args = 1.., required = true)]
    queries: Vec<PathBuf>,

    /// Mapping file driving the alignment
    #[clap(short = 'i', long = "input-mappings", required = true)]
    mappings: PathBuf,

    /// Output file (appended; stdout if not specified)
    #[clap(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Number of alignment worker threads
    #[clap(short = 't', long = "threads", default_value = "1")]
    threads: usize,

    /// Mapping segment length; reference padding caps derive from it
    #[clap(short = 's', long = "segment-length", default_value = "1k", value_parser = parse_metric_number)]
    segment_length: u64,

    /// WFlambda segment length
    #[clap(long = "wflambda-segment", default_value = "256")]
    wflambda_segment: u64,

    /// WFA penalties as mismatch,gap_open,gap_ext
    #[clap(long = "wfa-params", default_value = "2,3,1", value_parser = parse_penalty_triple)]
    wfa_params: (i32, i32, i32),

    /// Maximum mash distance for patching (negative = auto)
    #[clap(long = "max-mash-dist", default_value = "-1", allow_hyphen_values = true)]
    max_mash_dist: f64,

    /// Minimum wavefront length before pruning applies
    #[clap(long = "min-wavefront-length", default_value = "1024")]
    min_wavefront_length: i32,

    /// Maximum wavefront distance threshold (negative = unbounded)
    #[clap(long = "max-distance-threshold", default_value = "-1", allow_hyphen_values = true)]
    max_distance_threshold: i64,

    /// Erosion length for alignment patching (negative = auto);
    /// forwarded to the aligner, no effect with the built-in kernel
    #[clap(long = "erode-k", default_value = "-1", allow_hyphen_values = true)]
    erode_k: i32,

    /// Maximum distance to chain mappings during patching;
    /// forwarded to the aligner, no effect with the built-in kernel
    #[clap(short = 'c', long = "chain-gap", default_value = "2k", value_parser = parse_metric_number)]
    chain_gap: u64,

    /// Maximum score for alignment patching (0 = auto);
    /// forwarded to the aligner, no effect with the built-in kernel
    #[clap(long = "max-patching-score", default_value = "0")]
    max_patching_score: i32,

    /// Minimum gap-compressed identity to emit an alignment (0 disables)
    #[clap(short = 'n', long = "min-identity", default_value = "0")]
    min_identity: f64,

    /// Identity assumed when a mapping has no usable identity estimate
    #[clap(long = "default-identity", default_value = "0.85")]
    default_identity: f64,

    /// Disable splitting of query mappings
    #[clap(short = 'N', long = "no-split")]
    no_split: bool,

    /// Emit SAM records instead of PAF
    #[clap(short = 'a', long = "sam-format")]
    sam_format: bool,

    /// Write '*' instead of the query sequence in SAM records
    #[clap(long = "no-seq-in-sam")]
    no_seq_in_sam: bool,

    /// Emit the MD tag in SAM records
    #[clap(long = "md-tag")]
    md_tag: bool,

    /// Write per-task debug output to <PREFIX><N>.tsv
    #[clap(long = "tsv", value_name = "PREFIX")]
    tsv: Option<String>,

    /// Quiet mode (no progress output)
    #[clap(long = "quiet")]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let (wfa_mismatch, wfa_gap_open, wfa_gap_ext) = args.wfa_params;

    let config = AlignConfig {
        target_fasta: args.target,
        query_fastas: args.queries,
        mappings: args.mappings,
        output: args.output,
        threads: args.threads,
        segment_length: args.segment_length,
        wflambda_segment_length: args.wflambda_segment,
        wfa_mismatch_score: wfa_mismatch,
        wfa_gap_opening_score: wfa_gap_open,
        wfa_gap_extension_score: wfa_gap_ext,
        wflign_max_mash_dist: args.max_mash_dist,
        wflign_min_wavefront_length: args.min_wavefront_length,
        wflign_max_distance_threshold: args.max_distance_threshold,
        wflign_erode_k: args.erode_k,
        chain_gap: args.chain_gap,
        wflign_max_patching_score: args.max_patching_score,
        min_identity: args.min_identity,
        mashmap_default_identity: args.default_identity,
        split: !args.no_split,
        sam_format: args.sam_format,
        no_seq_in_sam: args.no_seq_in_sam,
        emit_md_tag: args.md_tag,
        tsv_output_prefix: args.tsv,
        quiet: args.quiet,
    };

    let aligner = Aligner::new(config)?;
    aligner.compute()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_suffixes() {
        assert_eq!(parse_metric_number("1k").unwrap(), 1000);
        assert_eq!(parse_metric_number("2M").unwrap(), 2_000_000);
        assert_eq!(parse_metric_number("128").unwrap(), 128);
        assert!(parse_metric_number("1x").is_err());
        assert!(parse_metric_number("").is_err());
    }

    #[test]
    fn penalty_triples() {
        assert_eq!(parse_penalty_triple("2,3,1").unwrap(), (2, 3, 1));
        assert_eq!(parse_penalty_triple("4, 6, 2").unwrap(), (4, 6, 2));
        assert!(parse_penalty_triple("2,3").is_err());
        assert!(parse_penalty_triple("a,b,c").is_err());
    }
}
