//! The concurrent alignment pipeline.
//!
//! One reader thread interleaves query FASTA ingestion with the mapping
//! stream and fans tasks out to a pool of alignment workers over a bounded
//! queue; a single writer serializes primary output, and an optional debug
//! writer lands per-task TSV files. Workers each own a private reference
//! reader because the backing index reader seeks and buffers.
//!
//! Shutdown is flag-driven: the reader raises `reader_done` on exit, each
//! worker lowers its `worker_active` slot once the task queue is drained,
//! and the writers exit when every worker has gone idle and their queues
//! are empty.

use crate::config::AlignConfig;
use crate::mapping::{self, MappingReader, MappingRecord, Strand};
use crate::fasta::FastaReader;
use crate::progress::ProgressMeter;
use crate::queue::{BoundedQueue, QUEUE_CAPACITY};
use crate::reference::ReferenceReader;
use crate::sequence;
use crate::wflign::{AlignmentRegion, Wflign};
use anyhow::{anyhow, bail, Context, Result};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Cooperative back-off while a stage waits for its queue.
const IDLE_WAIT: Duration = Duration::from_micros(100);

/// One queued unit of work: a mapping plus a shared handle on its query
/// sequence. Every task of the same query shares one buffer; the last
/// worker to drop its task frees it.
pub struct Task {
    pub mapping: MappingRecord,
    /// Original mapping line, kept for diagnostics.
    pub raw_mapping_line: String,
    pub query: Arc<Vec<u8>>,
}

/// Totals reported after the pipeline has drained.
#[derive(Debug, Clone, Copy)]
pub struct AlignmentSummary {
    /// Query sequences seen by the reader.
    pub query_sequences: u64,
    /// Sum of mapping query spans from the pre-scan.
    pub total_aligned_bp: u64,
    /// Base-pairs actually accounted by the workers.
    pub processed_bp: u64,
}

pub struct Aligner {
    config: AlignConfig,
}

impl Aligner {
    pub fn new(config: AlignConfig) -> Result<Self> {
        if config.threads == 0 {
            bail!("thread count must be at least 1");
        }
        if config.query_fastas.is_empty() {
            bail!("at least one query FASTA is required");
        }
        // Fail fast on an unusable reference before any thread starts.
        ReferenceReader::open(&config.target_fasta)?;
        Ok(Aligner { config })
    }

    /// Run the pipeline to completion of the mapping stream.
    pub fn compute(&self) -> Result<AlignmentSummary> {
        let config = &self.config;

        // Pre-scan the mapping file so the progress meter has an exact
        // total; malformed records are fatal here, before work starts.
        let total_aligned_bp =
            mapping::total_query_span(&config.mappings, config.mashmap_default_identity)?;

        let mut references = Vec::with_capacity(config.threads);
        for _ in 0..config.threads {
            references.push(ReferenceReader::open(&config.target_fasta)?);
        }

        let progress = ProgressMeter::new(total_aligned_bp, "[wfalign::align] aligned", config.quiet);
        let wflign = Wflign::new(config);

        let task_queue: BoundedQueue<Task> = BoundedQueue::with_capacity(QUEUE_CAPACITY);
        let output_queue: BoundedQueue<String> = BoundedQueue::with_capacity(QUEUE_CAPACITY);
        let debug_queue: Option<BoundedQueue<String>> = config
            .tsv_output_prefix
            .as_ref()
            .map(|_| BoundedQueue::with_capacity(QUEUE_CAPACITY));

        let reader_done = AtomicBool::new(false);
        let worker_active: Vec<AtomicBool> =
            (0..config.threads).map(|_| AtomicBool::new(true)).collect();

        let sink: Box<dyn Write + Send> = match &config.output {
            Some(path) => Box::new(BufWriter::new(
                OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(path)
                    .with_context(|| format!("failed to open output {}", path.display()))?,
            )),
            None => Box::new(BufWriter::new(std::io::stdout())),
        };

        let summary = thread::scope(|scope| -> Result<AlignmentSummary> {
            let reader_handle = scope.spawn(|| {
                let result = read_tasks(config, &task_queue);
                reader_done.store(true, Ordering::Release);
                result
            });

            let mut worker_handles = Vec::with_capacity(config.threads);
            for (index, mut reference) in references.into_iter().enumerate() {
                let active = &worker_active[index];
                let progress = progress.clone();
                let task_queue = &task_queue;
                let output_queue = &output_queue;
                let debug_queue = debug_queue.as_ref();
                let reader_done = &reader_done;
                let wflign = &wflign;
                worker_handles.push(scope.spawn(move || {
                    worker_loop(
                        config,
                        &mut reference,
                        task_queue,
                        output_queue,
                        debug_queue,
                        reader_done,
                        &progress,
                        wflign,
                    );
                    active.store(false, Ordering::Release);
                }));
            }

            let writer_handle = {
                let output_queue = &output_queue;
                let worker_active = &worker_active;
                scope.spawn(move || write_primary(sink, output_queue, worker_active))
            };

            let debug_handle = match (&config.tsv_output_prefix, debug_queue.as_ref()) {
                (Some(prefix), Some(queue)) => {
                    let worker_active = &worker_active;
                    Some(scope.spawn(move || write_debug_files(prefix, queue, worker_active)))
                }
                _ => None,
            };

            let query_sequences = reader_handle.join().expect("reader thread panicked")?;
            for handle in worker_handles {
                handle.join().expect("worker thread panicked");
            }
            writer_handle.join().expect("writer thread panicked")?;
            if let Some(handle) = debug_handle {
                handle.join().expect("debug writer thread panicked")?;
            }

            Ok(AlignmentSummary {
                query_sequences,
                total_aligned_bp,
                processed_bp: progress.position(),
            })
        })?;

        progress.finish();
        if !config.quiet {
            eprintln!(
                "[wfalign::align] count of mapped sequences = {}, total aligned bp = {}",
                summary.query_sequences, summary.total_aligned_bp
            );
        }
        debug_assert!(task_queue.is_empty());
        debug_assert!(output_queue.is_empty());

        Ok(summary)
    }
}

/// Reader stage: stream query sequences, group the mapping cursor by
/// query id, and enqueue one task per mapping sharing the query buffer.
fn read_tasks(config: &AlignConfig, task_queue: &BoundedQueue<Task>) -> Result<u64> {
    let mut mappings = MappingReader::open(&config.mappings, config.mashmap_default_identity)?;
    let mut query_sequences = 0u64;

    for path in &config.query_fastas {
        let mut fasta = FastaReader::open(path)?;
        while let Some((name, mut seq)) = fasta.next_record()? {
            query_sequences += 1;
            sequence::make_canonical(&mut seq);
            let shared = Arc::new(seq);

            let mut rank_mapping = 0u64;
            while mappings
                .peek()
                .is_some_and(|(record, _)| record.query_id == name)
            {
                let Some((mut record, raw_mapping_line)) = mappings.advance()? else {
                    break;
                };
                record.rank_mapping = rank_mapping;
                rank_mapping += 1;
                task_queue.push(Task {
                    mapping: record,
                    raw_mapping_line,
                    query: Arc::clone(&shared),
                });
            }
        }
    }

    Ok(query_sequences)
}

/// Worker stage: pull tasks until the reader is done and the queue is dry.
/// Per-task failures are logged and skipped; progress advances either way.
#[allow(clippy::too_many_arguments)]
fn worker_loop(
    config: &AlignConfig,
    reference: &mut ReferenceReader,
    task_queue: &BoundedQueue<Task>,
    output_queue: &BoundedQueue<String>,
    debug_queue: Option<&BoundedQueue<String>>,
    reader_done: &AtomicBool,
    progress: &ProgressMeter,
    wflign: &Wflign,
) {
    let mut process = |task: Task| {
        if let Err(err) = align_task(config, reference, &task, output_queue, debug_queue, wflign) {
            eprintln!(
                "[wfalign::align] skipping mapping '{}': {err:#}",
                task.raw_mapping_line
            );
        }
        progress.inc(task.mapping.query_span());
        // Dropping the task here releases its query buffer share.
    };

    loop {
        if let Some(task) = task_queue.try_pop() {
            process(task);
        } else if reader_done.load(Ordering::Acquire) {
            // The reader is done, so no more pushes can race in after
            // this final drain.
            while let Some(task) = task_queue.try_pop() {
                process(task);
            }
            break;
        } else {
            thread::sleep(IDLE_WAIT);
        }
    }
}

/// Clamped reference padding on each side of the mapped target interval.
fn head_tail_padding(mapping: &MappingRecord, target_total: u64, max_pad: u64) -> (u64, u64) {
    let head = mapping.target_start.min(max_pad);
    let tail = (target_total - mapping.target_end).min(max_pad);
    (head, tail)
}

fn align_task(
    config: &AlignConfig,
    reference: &mut ReferenceReader,
    task: &Task,
    output_queue: &BoundedQueue<String>,
    debug_queue: Option<&BoundedQueue<String>>,
    wflign: &Wflign,
) -> Result<()> {
    let mapping = &task.mapping;

    let target_total = reference
        .sequence_length(&mapping.target_id)
        .ok_or_else(|| anyhow!("unknown target sequence '{}'", mapping.target_id))?;
    if mapping.target_end > target_total {
        bail!(
            "target interval [{}, {}) exceeds sequence length {}",
            mapping.target_start,
            mapping.target_end,
            target_total
        );
    }

    let (head_padding, tail_padding) =
        head_tail_padding(mapping, target_total, config.wflign_max_len_minor());
    let mut target = reference.fetch(
        &mapping.target_id,
        mapping.target_start - head_padding,
        mapping.target_end + tail_padding,
    )?;
    if target.is_empty() {
        bail!("empty reference fetch for '{}'", mapping.target_id);
    }
    sequence::make_canonical(&mut target);

    let query_total = task.query.len() as u64;
    if mapping.query_end > query_total {
        bail!(
            "query interval [{}, {}) exceeds sequence length {}",
            mapping.query_start,
            mapping.query_end,
            query_total
        );
    }
    let slice = &task.query[mapping.query_start as usize..mapping.query_end as usize];
    let strand_query = match mapping.strand {
        Strand::Fwd => slice.to_vec(),
        Strand::Rev => sequence::reverse_complement(slice),
    };

    // SAM SEQ carries the whole query in reported orientation so the
    // soft-clipped flanks stay present; PAF never needs it.
    let needs_full_query = config.sam_format && !config.no_seq_in_sam;
    let reverse_full_query = match (needs_full_query, mapping.strand) {
        (true, Strand::Rev) => Some(sequence::reverse_complement(&task.query)),
        _ => None,
    };
    let query_full: Option<&[u8]> = if needs_full_query {
        match mapping.strand {
            Strand::Fwd => Some(task.query.as_slice()),
            Strand::Rev => reverse_full_query.as_deref(),
        }
    } else {
        None
    };

    // Split alignments are disambiguated by rank in SAM output only.
    let query_name = if config.split && config.sam_format {
        format!("{}_{}", mapping.query_id, mapping.rank_mapping)
    } else {
        mapping.query_id.clone()
    };

    let region = AlignmentRegion {
        query_name: &query_name,
        query: &strand_query,
        query_full,
        query_total_length: query_total,
        query_offset: mapping.query_start,
        query_length: mapping.query_span(),
        is_reverse: mapping.strand == Strand::Rev,
        target_name: &mapping.target_id,
        target: &target,
        head_padding: head_padding as usize,
        target_total_length: target_total,
        target_offset: mapping.target_start,
        target_length: mapping.target_end - mapping.target_start,
        estimated_identity: mapping.estimated_identity,
    };

    let mut primary = String::new();
    let mut debug = debug_queue.is_some().then(String::new);
    wflign.align(&region, &mut primary, debug.as_mut());

    if !primary.is_empty() {
        output_queue.push(primary);
    }
    if let (Some(queue), Some(debug)) = (debug_queue, debug) {
        if !debug.is_empty() {
            queue.push(debug);
        }
    }

    Ok(())
}

fn still_working(worker_active: &[AtomicBool]) -> bool {
    worker_active.iter().any(|active| active.load(Ordering::Acquire))
}

/// Primary writer: append records in pop order until every worker is idle
/// and the queue is empty. On a sink error the queue is still drained so
/// the workers never stall on a full queue.
fn write_primary(
    mut sink: Box<dyn Write + Send>,
    output_queue: &BoundedQueue<String>,
    worker_active: &[AtomicBool],
) -> Result<()> {
    let mut io_error: Option<anyhow::Error> = None;
    let mut emit = |record: String, io_error: &mut Option<anyhow::Error>| {
        if io_error.is_none() {
            if let Err(err) = sink.write_all(record.as_bytes()) {
                *io_error = Some(anyhow::Error::from(err).context("failed to write output"));
            }
        }
    };

    loop {
        if let Some(record) = output_queue.try_pop() {
            emit(record, &mut io_error);
        } else if !still_working(worker_active) {
            // Every worker is idle; drain anything that raced past the
            // empty check, then exit.
            while let Some(record) = output_queue.try_pop() {
                emit(record, &mut io_error);
            }
            break;
        } else {
            thread::sleep(IDLE_WAIT);
        }
    }

    if let Some(err) = io_error {
        return Err(err);
    }
    sink.flush().context("failed to flush output")?;
    Ok(())
}

/// Debug writer: each popped record lands in its own `<prefix><N>.tsv`.
fn write_debug_files(
    prefix: &str,
    debug_queue: &BoundedQueue<String>,
    worker_active: &[AtomicBool],
) -> Result<()> {
    let mut written = 0u64;
    let mut io_error: Option<anyhow::Error> = None;
    let mut emit = |record: String, written: &mut u64, io_error: &mut Option<anyhow::Error>| {
        if io_error.is_none() {
            let path = format!("{prefix}{written}.tsv");
            if let Err(err) = std::fs::write(&path, record.as_bytes()) {
                *io_error = Some(
                    anyhow::Error::from(err).context(format!("failed to write debug file {path}")),
                );
            }
        }
        *written += 1;
    };

    loop {
        if let Some(record) = debug_queue.try_pop() {
            emit(record, &mut written, &mut io_error);
        } else if !still_working(worker_active) {
            while let Some(record) = debug_queue.try_pop() {
                emit(record, &mut written, &mut io_error);
            }
            break;
        } else {
            thread::sleep(IDLE_WAIT);
        }
    }
    io_error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping_with_target(target_start: u64, target_end: u64) -> MappingRecord {
        MappingRecord {
            query_id: "q1".to_string(),
            query_start: 0,
            query_end: target_end - target_start,
            strand: Strand::Fwd,
            target_id: "chr1".to_string(),
            target_start,
            target_end,
            estimated_identity: 0.95,
            rank_mapping: 0,
        }
    }

    #[test]
    fn padding_is_clamped_to_sequence_bounds() {
        let mapping = mapping_with_target(0, 8);
        assert_eq!(head_tail_padding(&mapping, 12, 1000), (0, 4));

        let mapping = mapping_with_target(4, 12);
        assert_eq!(head_tail_padding(&mapping, 12, 1000), (4, 0));
    }

    #[test]
    fn padding_is_clamped_to_the_configured_cap() {
        let mapping = mapping_with_target(500, 600);
        assert_eq!(head_tail_padding(&mapping, 2000, 128), (128, 128));
        assert_eq!(head_tail_padding(&mapping, 2000, 1000), (500, 1000));
    }
}
