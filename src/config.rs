//! Runtime configuration for the alignment pipeline.

use std::path::PathBuf;

/// Everything the pipeline and the wavefront aligner need to know.
/// Defaults mirror the upstream mapper's conventions: padding caps are
/// derived from the mapping segment length, scores are the standard
/// low-divergence affine set.
#[derive(Debug, Clone)]
pub struct AlignConfig {
    /// Indexed target FASTA; a `.fai` sidecar must exist.
    pub target_fasta: PathBuf,
    /// Query FASTA files, scanned in the given order.
    pub query_fastas: Vec<PathBuf>,
    /// Mapping file driving the alignment.
    pub mappings: PathBuf,
    /// Primary output path; `None` writes to stdout.
    pub output: Option<PathBuf>,

    /// Worker pool size; also the number of per-worker reference readers.
    pub threads: usize,

    /// Mapping segment length; padding caps derive from it.
    pub segment_length: u64,
    pub wflambda_segment_length: u64,

    pub wfa_mismatch_score: i32,
    pub wfa_gap_opening_score: i32,
    pub wfa_gap_extension_score: i32,

    pub wflign_max_mash_dist: f64,
    pub wflign_min_wavefront_length: i32,
    pub wflign_max_distance_threshold: i64,
    pub wflign_erode_k: i32,
    pub chain_gap: u64,
    pub wflign_max_patching_score: i32,

    /// Minimum gap-compressed identity for emitting an alignment; 0 disables.
    pub min_identity: f64,
    /// Used when a mapping carries no usable identity estimate.
    pub mashmap_default_identity: f64,

    /// Split + SAM together enable the `_<rank>` query name suffix.
    pub split: bool,
    pub sam_format: bool,
    pub no_seq_in_sam: bool,
    pub emit_md_tag: bool,

    /// When set, each task's debug output goes to `<prefix><N>.tsv`.
    pub tsv_output_prefix: Option<String>,

    /// Suppress the progress meter and status lines.
    pub quiet: bool,
}

impl AlignConfig {
    /// Maximum head/tail reference padding fetched around a mapping.
    pub fn wflign_max_len_minor(&self) -> u64 {
        self.segment_length * 128
    }

    /// Upper bound on the length of a patched alignment region.
    pub fn wflign_max_len_major(&self) -> u64 {
        self.segment_length * 512
    }
}

impl Default for AlignConfig {
    fn default() -> Self {
        AlignConfig {
            target_fasta: PathBuf::new(),
            query_fastas: Vec::new(),
            mappings: PathBuf::new(),
            output: None,
            threads: 1,
            segment_length: 1000,
            wflambda_segment_length: 256,
            wfa_mismatch_score: 2,
            wfa_gap_opening_score: 3,
            wfa_gap_extension_score: 1,
            wflign_max_mash_dist: -1.0,
            wflign_min_wavefront_length: 1024,
            wflign_max_distance_threshold: -1,
            wflign_erode_k: -1,
            chain_gap: 2000,
            wflign_max_patching_score: 0,
            min_identity: 0.0,
            mashmap_default_identity: 0.85,
            split: true,
            sam_format: false,
            no_seq_in_sam: false,
            emit_md_tag: false,
            tsv_output_prefix: None,
            quiet: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_caps_scale_with_segment_length() {
        let mut config = AlignConfig::default();
        assert_eq!(config.wflign_max_len_minor(), 128_000);
        assert_eq!(config.wflign_max_len_major(), 512_000);
        config.segment_length = 50;
        assert_eq!(config.wflign_max_len_minor(), 6_400);
    }
}
