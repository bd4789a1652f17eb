//! Wavefront aligner invocation and record serialization.
//!
//! `Wflign` owns the scoring parameters and output-format options; the
//! pipeline hands it one mapping's worth of strand-corrected query and
//! padded reference, and it appends finished PAF or SAM record text to the
//! caller's accumulators. Empty output means the aligner had nothing to
//! emit for this mapping (the task still counts toward progress).

use crate::config::AlignConfig;
use crate::wavefront::{self, Cigar, Penalties};
use std::fmt::Write as _;

/// Scoring and threshold knobs forwarded from the configuration surface.
/// The patching knobs (`erode_k`, `chain_gap`, `max_patching_score`) are
/// carried for the aligner interface; the built-in kernel ignores them.
#[derive(Debug, Clone)]
pub struct WflignParams {
    pub segment_length: u64,
    pub min_identity: f64,
    pub mismatch_score: u32,
    pub gap_opening_score: u32,
    pub gap_extension_score: u32,
    pub max_mash_dist: f64,
    pub min_wavefront_length: i32,
    pub max_distance_threshold: i64,
    /// Longest query or target span the aligner will attempt.
    pub max_len_major: u64,
    pub erode_k: i32,
    pub chain_gap: u64,
    pub max_patching_score: i32,
}

impl WflignParams {
    /// Penalty ceiling for one alignment. An explicit distance threshold
    /// wins; otherwise a positive mash-distance bound caps the search on
    /// pairs long enough for wavefront pruning to pay off. Short pairs
    /// and the default configuration run to the kernel's natural bound.
    fn score_cap(&self, query_len: usize, target_len: usize) -> Option<u32> {
        let per_edit = self
            .mismatch_score
            .max(self.gap_opening_score + self.gap_extension_score);
        if self.max_distance_threshold > 0 {
            return Some((self.max_distance_threshold as u32).saturating_mul(per_edit));
        }
        if self.max_mash_dist > 0.0
            && query_len.max(target_len) as i64 >= self.min_wavefront_length as i64
        {
            let edits = (self.max_mash_dist * (query_len + target_len) as f64).ceil() as u32;
            return Some(edits.saturating_mul(per_edit).max(per_edit));
        }
        None
    }
}

/// Output-format options, fixed at construction.
#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub sam_format: bool,
    pub no_seq_in_sam: bool,
    pub emit_md_tag: bool,
}

/// One mapping's alignment arguments: the strand-corrected query slice
/// plus the padded reference buffer and the coordinates locating both in
/// their full sequences.
pub struct AlignmentRegion<'a> {
    pub query_name: &'a str,
    /// Strand-corrected query slice (reverse-complemented when
    /// `is_reverse`).
    pub query: &'a [u8],
    /// Full query in the reported orientation, backing the SAM SEQ field
    /// and its soft clips. `None` when no record will carry a sequence.
    pub query_full: Option<&'a [u8]>,
    pub query_total_length: u64,
    /// Forward-strand start of the slice on the full query.
    pub query_offset: u64,
    pub query_length: u64,
    pub is_reverse: bool,
    pub target_name: &'a str,
    /// Padded reference buffer; the mapped span starts at `head_padding`.
    pub target: &'a [u8],
    pub head_padding: usize,
    pub target_total_length: u64,
    pub target_offset: u64,
    /// Unpadded length of the mapped target span.
    pub target_length: u64,
    pub estimated_identity: f64,
}

impl<'a> AlignmentRegion<'a> {
    /// The unpadded target span the alignment is computed over.
    fn target_span(&self) -> &'a [u8] {
        let start = self.head_padding;
        let end = start + self.target_length as usize;
        &self.target[start..end]
    }
}

#[derive(Debug, Default)]
struct CigarStats {
    matches: u64,
    mismatches: u64,
    insertion_events: u64,
    inserted_bases: u64,
    deletion_events: u64,
    deleted_bases: u64,
}

impl CigarStats {
    fn from_cigar(cigar: &Cigar) -> Self {
        let mut stats = CigarStats::default();
        for &(count, op) in cigar {
            let count = count as u64;
            match op {
                b'=' => stats.matches += count,
                b'X' => stats.mismatches += count,
                b'I' => {
                    stats.insertion_events += 1;
                    stats.inserted_bases += count;
                }
                b'D' => {
                    stats.deletion_events += 1;
                    stats.deleted_bases += count;
                }
                _ => {}
            }
        }
        stats
    }

    /// Matches over aligned columns, counting each gap run once.
    fn gap_compressed_identity(&self) -> f64 {
        let denominator =
            self.matches + self.mismatches + self.insertion_events + self.deletion_events;
        if denominator == 0 {
            0.0
        } else {
            self.matches as f64 / denominator as f64
        }
    }

    /// Matches over the full block, counting every gap base.
    fn block_identity(&self) -> f64 {
        let denominator =
            self.matches + self.mismatches + self.inserted_bases + self.deleted_bases;
        if denominator == 0 {
            0.0
        } else {
            self.matches as f64 / denominator as f64
        }
    }

    fn block_length(&self) -> u64 {
        self.matches + self.mismatches + self.inserted_bases + self.deleted_bases
    }

    fn edit_distance(&self) -> u64 {
        self.mismatches + self.inserted_bases + self.deleted_bases
    }
}

/// Error probability to a phred-scaled quality, capped at 255.
fn float2phred(prob: f64) -> f64 {
    if prob <= 0.0 {
        return 255.0;
    }
    let phred = -10.0 * prob.log10();
    if !(0.0..=255.0).contains(&phred) {
        255.0
    } else {
        phred
    }
}

pub struct Wflign {
    params: WflignParams,
    options: OutputOptions,
}

impl Wflign {
    pub fn new(config: &AlignConfig) -> Self {
        Wflign {
            params: WflignParams {
                segment_length: config.wflambda_segment_length,
                min_identity: config.min_identity,
                mismatch_score: config.wfa_mismatch_score.max(1) as u32,
                gap_opening_score: config.wfa_gap_opening_score.max(0) as u32,
                gap_extension_score: config.wfa_gap_extension_score.max(1) as u32,
                max_mash_dist: config.wflign_max_mash_dist,
                min_wavefront_length: config.wflign_min_wavefront_length,
                max_distance_threshold: config.wflign_max_distance_threshold,
                max_len_major: config.wflign_max_len_major(),
                erode_k: config.wflign_erode_k,
                chain_gap: config.chain_gap,
                max_patching_score: config.wflign_max_patching_score,
            },
            options: OutputOptions {
                sam_format: config.sam_format,
                no_seq_in_sam: config.no_seq_in_sam,
                emit_md_tag: config.emit_md_tag,
            },
        }
    }

    /// Align one region and append serialized record text to `output`,
    /// plus a summary row to `debug` when debug output is enabled.
    pub fn align(
        &self,
        region: &AlignmentRegion,
        output: &mut String,
        mut debug: Option<&mut String>,
    ) {
        let target_span = region.target_span();
        if region.query.is_empty() || target_span.is_empty() {
            return;
        }

        // Spans past the major length cap are the patching cascade's
        // territory; the kernel declines them.
        if region.query.len() as u64 > self.params.max_len_major
            || target_span.len() as u64 > self.params.max_len_major
        {
            if let Some(debug) = debug {
                self.write_debug_row(region, None, debug);
            }
            return;
        }

        let penalties = Penalties {
            mismatch: self.params.mismatch_score,
            gap_opening: self.params.gap_opening_score,
            gap_extension: self.params.gap_extension_score,
        };

        let alignment = wavefront::align_affine(
            region.query,
            target_span,
            &penalties,
            self.params.score_cap(region.query.len(), target_span.len()),
        );

        let Some(alignment) = alignment else {
            if let Some(debug) = debug {
                self.write_debug_row(region, None, debug);
            }
            return;
        };

        let stats = CigarStats::from_cigar(&alignment.cigar);
        if let Some(debug) = debug.take() {
            self.write_debug_row(region, Some((alignment.score, &stats)), debug);
        }

        if self.params.min_identity > 0.0
            && stats.gap_compressed_identity() < self.params.min_identity
        {
            return;
        }

        if self.options.sam_format {
            self.write_sam_record(region, &alignment.cigar, &stats, output);
        } else {
            self.write_paf_record(region, &alignment.cigar, &stats, output);
        }
    }

    fn write_paf_record(
        &self,
        region: &AlignmentRegion,
        cigar: &Cigar,
        stats: &CigarStats,
        output: &mut String,
    ) {
        let strand = if region.is_reverse { '-' } else { '+' };
        let mapq = float2phred(1.0 - stats.gap_compressed_identity()).round() as u32;

        let _ = write!(
            output,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            region.query_name,
            region.query_total_length,
            region.query_offset,
            region.query_offset + region.query_length,
            strand,
            region.target_name,
            region.target_total_length,
            region.target_offset,
            region.target_offset + region.target_length,
            stats.matches,
            stats.block_length(),
            mapq,
        );
        let _ = write!(
            output,
            "\tgi:f:{:.6}\tbi:f:{:.6}\tmd:f:{:.6}\tcg:Z:",
            stats.gap_compressed_identity(),
            stats.block_identity(),
            region.estimated_identity,
        );
        for &(count, op) in cigar {
            let _ = write!(output, "{}{}", count, op as char);
        }
        output.push('\n');
    }

    fn write_sam_record(
        &self,
        region: &AlignmentRegion,
        cigar: &Cigar,
        stats: &CigarStats,
        output: &mut String,
    ) {
        let flag = if region.is_reverse { 16 } else { 0 };
        let mapq = float2phred(1.0 - stats.gap_compressed_identity()).round() as u32;

        // Clip lengths follow the reported strand: SEQ is the full
        // strand-corrected query, so on the reverse strand the leading
        // clip covers the forward-strand tail.
        let (leading_clip, trailing_clip) = if region.is_reverse {
            (
                region.query_total_length - (region.query_offset + region.query_length),
                region.query_offset,
            )
        } else {
            (
                region.query_offset,
                region.query_total_length - (region.query_offset + region.query_length),
            )
        };

        let _ = write!(
            output,
            "{}\t{}\t{}\t{}\t{}\t",
            region.query_name,
            flag,
            region.target_name,
            region.target_offset + 1,
            mapq,
        );

        if leading_clip > 0 {
            let _ = write!(output, "{leading_clip}S");
        }
        for &(count, op) in cigar {
            let _ = write!(output, "{}{}", count, op as char);
        }
        if trailing_clip > 0 {
            let _ = write!(output, "{trailing_clip}S");
        }

        let _ = write!(output, "\t*\t0\t0\t");
        match (self.options.no_seq_in_sam, region.query_full) {
            (false, Some(full)) => output.push_str(&String::from_utf8_lossy(full)),
            _ => output.push('*'),
        }
        let _ = write!(output, "\t*\tNM:i:{}", stats.edit_distance());
        if self.options.emit_md_tag {
            output.push_str("\tMD:Z:");
            write_md_tag(cigar, region.target_span(), output);
        }
        let _ = write!(
            output,
            "\tgi:f:{:.6}\tbi:f:{:.6}",
            stats.gap_compressed_identity(),
            stats.block_identity(),
        );
        output.push('\n');
    }

    fn write_debug_row(
        &self,
        region: &AlignmentRegion,
        result: Option<(u32, &CigarStats)>,
        debug: &mut String,
    ) {
        let strand = if region.is_reverse { '-' } else { '+' };
        let (score, identity) = match result {
            Some((score, stats)) => (score as i64, stats.gap_compressed_identity()),
            None => (-1, 0.0),
        };
        let _ = writeln!(
            debug,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:.6}",
            region.query_name,
            region.query_offset,
            region.query_offset + region.query_length,
            strand,
            region.target_name,
            region.target_offset,
            region.target_offset + region.target_length,
            score,
            identity,
        );
    }
}

/// Standard MD tag: match run lengths interleaved with mismatched and
/// deleted reference bases.
fn write_md_tag(cigar: &Cigar, target_span: &[u8], output: &mut String) {
    let mut match_run = 0u64;
    let mut ti = 0usize;
    for &(count, op) in cigar {
        match op {
            b'=' => {
                match_run += count as u64;
                ti += count as usize;
            }
            b'X' => {
                for _ in 0..count {
                    let _ = write!(output, "{match_run}");
                    match_run = 0;
                    output.push(target_span[ti] as char);
                    ti += 1;
                }
            }
            b'D' => {
                let _ = write!(output, "{match_run}");
                match_run = 0;
                output.push('^');
                for _ in 0..count {
                    output.push(target_span[ti] as char);
                    ti += 1;
                }
            }
            _ => {}
        }
    }
    let _ = write!(output, "{match_run}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AlignConfig {
        AlignConfig::default()
    }

    fn forward_region<'a>(query: &'a [u8], target: &'a [u8]) -> AlignmentRegion<'a> {
        AlignmentRegion {
            query_name: "q1",
            query,
            query_full: None,
            query_total_length: query.len() as u64,
            query_offset: 0,
            query_length: query.len() as u64,
            is_reverse: false,
            target_name: "chr1",
            target,
            head_padding: 0,
            target_total_length: target.len() as u64,
            target_offset: 0,
            target_length: target.len() as u64,
            estimated_identity: 1.0,
        }
    }

    #[test]
    fn paf_record_shape_for_identical_sequences() {
        let wflign = Wflign::new(&test_config());
        let mut output = String::new();
        wflign.align(&forward_region(b"ACGTACGT", b"ACGTACGT"), &mut output, None);

        let fields: Vec<&str> = output.trim_end().split('\t').collect();
        assert_eq!(fields[0], "q1");
        assert_eq!(fields[1], "8");
        assert_eq!(fields[2], "0");
        assert_eq!(fields[3], "8");
        assert_eq!(fields[4], "+");
        assert_eq!(fields[5], "chr1");
        assert_eq!(fields[9], "8");
        assert_eq!(fields[10], "8");
        assert!(fields.iter().any(|f| f.starts_with("gi:f:1.000000")));
        assert!(fields.iter().any(|f| *f == "cg:Z:8="));
    }

    #[test]
    fn padded_target_aligns_only_the_inner_span() {
        let wflign = Wflign::new(&test_config());
        // Padded buffer: 4 bp head pad + 8 bp span.
        let mut region = forward_region(b"ACGTACGT", b"TTTTACGTACGT");
        region.head_padding = 4;
        region.target_offset = 4;
        region.target_length = 8;
        region.target_total_length = 12;

        let mut output = String::new();
        wflign.align(&region, &mut output, None);
        let fields: Vec<&str> = output.trim_end().split('\t').collect();
        assert_eq!(fields[7], "4");
        assert_eq!(fields[8], "12");
        assert!(fields.iter().any(|f| *f == "cg:Z:8="));
    }

    #[test]
    fn mash_distance_bound_caps_divergent_pairs() {
        let mut config = test_config();
        config.wflign_max_mash_dist = 0.05;
        config.wflign_min_wavefront_length = 4;
        let wflign = Wflign::new(&config);
        let mut output = String::new();
        // An all-mismatch pair blows through a 5% divergence allowance.
        wflign.align(&forward_region(b"AAAAAAAA", b"TTTTTTTT"), &mut output, None);
        assert!(output.is_empty());
    }

    #[test]
    fn below_min_identity_emits_nothing() {
        let mut config = test_config();
        config.min_identity = 0.99;
        let wflign = Wflign::new(&config);
        let mut output = String::new();
        wflign.align(&forward_region(b"ACGTACGT", b"ACGAAAGT"), &mut output, None);
        assert!(output.is_empty());
    }

    #[test]
    fn debug_row_is_written_even_when_primary_is_suppressed() {
        let mut config = test_config();
        config.min_identity = 0.99;
        let wflign = Wflign::new(&config);
        let mut output = String::new();
        let mut debug = String::new();
        wflign.align(
            &forward_region(b"ACGTACGT", b"ACGAAAGT"),
            &mut output,
            Some(&mut debug),
        );
        assert!(output.is_empty());
        assert!(debug.starts_with("q1\t0\t8\t+\tchr1\t0\t8\t"));
    }

    #[test]
    fn sam_record_with_clips_and_md() {
        let mut config = test_config();
        config.sam_format = true;
        config.emit_md_tag = true;
        let wflign = Wflign::new(&config);

        let target = b"ACGTACGT";
        let mut region = forward_region(b"CGTA", target);
        region.query_name = "q1_0";
        // The aligned slice is full_query[2..6].
        region.query_full = Some(b"AACGTAGGGG");
        region.query_total_length = 10;
        region.query_offset = 2;
        region.query_length = 4;
        region.target_offset = 1;
        region.target_length = 4;
        region.head_padding = 1;
        region.target_total_length = 8;

        let mut output = String::new();
        wflign.align(&region, &mut output, None);
        let fields: Vec<&str> = output.trim_end().split('\t').collect();
        assert_eq!(fields[0], "q1_0");
        assert_eq!(fields[1], "0");
        assert_eq!(fields[2], "chr1");
        assert_eq!(fields[3], "2");
        assert_eq!(fields[5], "2S4=4S");
        // Soft clips keep the clipped bases in SEQ.
        assert_eq!(fields[9], "AACGTAGGGG");
        assert!(fields.contains(&"NM:i:0"));
        assert!(fields.contains(&"MD:Z:4"));
    }

    #[test]
    fn reverse_strand_sam_swaps_clips() {
        let mut config = test_config();
        config.sam_format = true;
        let wflign = Wflign::new(&config);

        let mut region = forward_region(b"ACGT", b"ACGT");
        region.is_reverse = true;
        // Reverse-complemented full query; the slice sits at [5..9).
        region.query_full = Some(b"NNNNNACGTN");
        region.query_total_length = 10;
        region.query_offset = 1;
        region.query_length = 4;

        let mut output = String::new();
        wflign.align(&region, &mut output, None);
        let fields: Vec<&str> = output.trim_end().split('\t').collect();
        assert_eq!(fields[1], "16");
        assert_eq!(fields[5], "5S4=1S");
        assert_eq!(fields[9], "NNNNNACGTN");
    }

    #[test]
    fn sam_without_sequence_writes_a_star() {
        let mut config = test_config();
        config.sam_format = true;
        config.no_seq_in_sam = true;
        let wflign = Wflign::new(&config);

        let mut region = forward_region(b"ACGT", b"ACGT");
        region.query_full = Some(b"ACGT");

        let mut output = String::new();
        wflign.align(&region, &mut output, None);
        let fields: Vec<&str> = output.trim_end().split('\t').collect();
        assert_eq!(fields[9], "*");
    }

    #[test]
    fn spans_beyond_the_major_length_cap_emit_nothing() {
        let mut config = test_config();
        config.segment_length = 4; // caps attempted spans at 2 kb
        let wflign = Wflign::new(&config);

        let query = vec![b'A'; 3000];
        let target = vec![b'A'; 3000];
        let mut output = String::new();
        let mut debug = String::new();
        wflign.align(
            &forward_region(&query, &target),
            &mut output,
            Some(&mut debug),
        );
        assert!(output.is_empty());
        assert!(debug.contains("\t-1\t"));
    }

    #[test]
    fn md_tag_reports_mismatches_and_deletions() {
        let mut out = String::new();
        // 2=1X1=  against target ACGT with mismatch at reference G.
        write_md_tag(&vec![(2, b'='), (1, b'X'), (1, b'=')], b"ACGT", &mut out);
        assert_eq!(out, "2G1");

        let mut out = String::new();
        // 2=2D2= against ACGGTA: deletion of GT.
        write_md_tag(&vec![(2, b'='), (2, b'D'), (2, b'=')], b"ACGGTA", &mut out);
        assert_eq!(out, "2^GG2");
    }
}
