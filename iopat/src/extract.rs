// Copyright (c) Facebook, Inc. and its affiliates.

//! Resumable parallel extraction of the feature table.
//!
//! The input file list is cut into fixed size chunks which are parsed on the
//! worker pool. Workers finish in any order but the coordinator commits
//! strictly in chunk order through a reorder buffer, and only the
//! coordinator ever touches the checkpoint. At most `2 * workers` chunks are
//! in flight.
use anyhow::{bail, Result};
use crossbeam::channel::{unbounded, RecvTimeoutError};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::checkpoint::{CheckpointStore, InputFingerprint};
use super::parser::parse_totals;
use super::table;
use super::workqueue::{catch_panic, WorkerPool};
use iopat_intf::{ExtractReport, RunRecord, SkipEvent};
use iopat_util::*;

pub const CHUNKS_PER_WORKER: usize = 4;
pub const DUP_RUN_ID: &str = "duplicate run id";

#[derive(Clone, Debug)]
pub struct ExtractConfig {
    pub files: Vec<PathBuf>,
    pub feature_table: PathBuf,
    pub ckpt_dir: PathBuf,
    pub workers: usize,
    pub chunk_size: Option<usize>,
    pub restart: bool,
    pub max_chunks: Option<usize>,
    pub progress: bool,
}

impl ExtractConfig {
    pub fn new<P: AsRef<Path>>(files: Vec<PathBuf>, feature_table: P, workers: usize) -> Self {
        let feature_table = feature_table.as_ref().to_path_buf();
        Self {
            files,
            ckpt_dir: CheckpointStore::dir_for(&feature_table),
            feature_table,
            workers: workers.max(1),
            chunk_size: None,
            restart: false,
            max_chunks: None,
            progress: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FileOutcome {
    Parsed { file: String, rec: RunRecord },
    Skipped(SkipEvent),
}

type ChunkResult = std::result::Result<Vec<FileOutcome>, String>;

pub struct ExtractOutput {
    pub records: Vec<RunRecord>,
    pub report: ExtractReport,
}

/// `ceil(nr_files / (workers * CHUNKS_PER_WORKER))`, at least 1.
pub fn derive_chunk_size(nr_files: usize, workers: usize) -> usize {
    let div = workers.max(1) * CHUNKS_PER_WORKER;
    ((nr_files + div - 1) / div).max(1)
}

pub fn chunk_ranges(nr_files: usize, chunk_size: usize) -> Vec<Range<usize>> {
    let chunk_size = chunk_size.max(1);
    (0..nr_files)
        .step_by(chunk_size)
        .map(|start| start..(start + chunk_size).min(nr_files))
        .collect()
}

/// Regular files directly under `dir`, sorted by name.
pub fn list_input_files<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        bail!("input {:?} is not a directory", dir);
    }
    // The directory part is literal, brackets and stars in it must not glob.
    let pattern = format!("{}/*", glob::Pattern::escape(&dir.to_string_lossy()));
    let mut files = vec![];
    for entry in glob::glob(&pattern)? {
        let path = entry?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn file_label(path: &Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().to_string(),
        None => path.to_string_lossy().to_string(),
    }
}

/// Parse one log. Unreadable and malformed logs turn into skip events.
pub fn parse_file(path: &Path) -> FileOutcome {
    let label = file_label(path);
    let text = match fs::read(path) {
        Ok(v) => String::from_utf8_lossy(&v).to_string(),
        Err(e) => {
            return FileOutcome::Skipped(SkipEvent::new(&label, &format!("unreadable ({})", &e)))
        }
    };
    match parse_totals(&text) {
        Ok(rec) => FileOutcome::Parsed { file: label, rec },
        Err(e) => FileOutcome::Skipped(SkipEvent::new(&label, &e.to_string())),
    }
}

/// Split parsed outcomes into new records and skip events. A run id which
/// is already in `seen` becomes a skip event.
fn filter_outcomes(
    outcomes: Vec<FileOutcome>,
    seen: &mut HashSet<String>,
) -> (Vec<RunRecord>, Vec<SkipEvent>) {
    let mut recs = vec![];
    let mut skips = vec![];
    for outcome in outcomes.into_iter() {
        match outcome {
            FileOutcome::Parsed { file, rec } => {
                if seen.insert(rec.run_id.clone()) {
                    recs.push(rec);
                } else {
                    warn!("extract: Duplicate run id {:?} in {}, skipping", &rec.run_id, &file);
                    skips.push(SkipEvent::new(&file, DUP_RUN_ID));
                }
            }
            FileOutcome::Skipped(ev) => {
                warn!("extract: Skipping {} ({})", &ev.file, &ev.reason);
                skips.push(ev);
            }
        }
    }
    (recs, skips)
}

pub fn parse_chunk(files: &[PathBuf]) -> Vec<FileOutcome> {
    parse_chunk_with(files, parse_file)
}

/// A panic while parsing one log only loses that log, the rest of the chunk
/// still commits.
fn parse_chunk_with<F>(files: &[PathBuf], parse: F) -> Vec<FileOutcome>
where
    F: Fn(&Path) -> FileOutcome,
{
    files
        .iter()
        .map(|f| match catch_panic(|| parse(f.as_path())) {
            Ok(outcome) => outcome,
            Err(msg) => FileOutcome::Skipped(SkipEvent::new(
                &file_label(f),
                &format!("parser panicked ({})", &msg),
            )),
        })
        .collect()
}

/// Holds results which completed ahead of the next chunk to commit and
/// releases them strictly in chunk order.
struct ReorderBuffer<T> {
    next: usize,
    pending: BTreeMap<usize, T>,
}

impl<T> ReorderBuffer<T> {
    fn new(next: usize) -> Self {
        Self {
            next,
            pending: BTreeMap::new(),
        }
    }

    fn next(&self) -> usize {
        self.next
    }

    fn insert(&mut self, idx: usize, v: T) {
        if idx < self.next || self.pending.insert(idx, v).is_some() {
            warn!("extract: Ignoring duplicate result for chunk {}", idx);
        }
    }

    fn pop(&mut self) -> Option<(usize, T)> {
        let v = self.pending.remove(&self.next)?;
        let idx = self.next;
        self.next += 1;
        Some((idx, v))
    }
}

struct ChunkProgressBar {
    bar: ProgressBar,
}

impl ChunkProgressBar {
    fn new(nr_chunks: usize, done: usize, hidden: bool) -> Self {
        let bar = match hidden {
            false => ProgressBar::new(nr_chunks as u64),
            true => ProgressBar::hidden(),
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} chunks ({eta})")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_position(done as u64);
        Self { bar }
    }

    fn progress(&self, done: usize) {
        self.bar.set_position(done as u64);
    }
}

impl Drop for ChunkProgressBar {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

/// Run or resume extraction. Returns `report.complete == false` if the
/// session stopped early because of `max_chunks` or a termination signal.
/// The feature table is written only once every chunk is committed.
pub fn extract(cfg: &ExtractConfig) -> Result<ExtractOutput> {
    if cfg.restart {
        CheckpointStore::clear(&cfg.ckpt_dir)?;
    }

    let nr_files = cfg.files.len();
    let chunk_size = match (cfg.chunk_size, CheckpointStore::peek(&cfg.ckpt_dir)?) {
        (Some(v), _) => v.max(1),
        (None, Some(ckpt)) => ckpt.fingerprint.chunk_size,
        (None, None) => derive_chunk_size(nr_files, cfg.workers),
    };
    let chunks = chunk_ranges(nr_files, chunk_size);
    let nr_chunks = chunks.len();

    let mut store = CheckpointStore::open(
        &cfg.ckpt_dir,
        InputFingerprint::new(&cfg.files, chunk_size),
    )?;
    let mut records = store.load_committed()?;
    let mut seen: HashSet<String> = CheckpointStore::committed_ids(&records);

    let mut report = ExtractReport {
        nr_files,
        nr_chunks,
        chunk_size,
        nr_workers: cfg.workers,
        ..Default::default()
    };

    let first = store.checkpoint().next_chunk();
    info!(
        "extract: {} files in {} chunks of {}, {} committed, {} workers",
        nr_files, nr_chunks, chunk_size, first, cfg.workers
    );

    let budget_end = match cfg.max_chunks {
        Some(max) => (first + max).min(nr_chunks),
        None => nr_chunks,
    };
    let bar = ChunkProgressBar::new(nr_chunks, first, !cfg.progress);

    {
        let pool = WorkerPool::new("extract", cfg.workers)?;
        let (done_tx, done_rx) = unbounded::<(usize, ChunkResult)>();
        let max_in_flight = 2 * pool.nr_workers();

        let mut next_dispatch = first;
        let mut reorder = ReorderBuffer::<ChunkResult>::new(first);

        while reorder.next() < budget_end {
            let stopping = prog_exiting();

            if !stopping {
                while next_dispatch < budget_end && next_dispatch - reorder.next() < max_in_flight {
                    let idx = next_dispatch;
                    let files = cfg.files[chunks[idx].clone()].to_vec();
                    let tx = done_tx.clone();
                    pool.queue(move || {
                        if !prog_exiting() {
                            let _ = tx.send((idx, catch_panic(|| parse_chunk(&files))));
                        }
                    })?;
                    debug!("extract: Dispatched chunk {}", idx);
                    next_dispatch += 1;
                }

                // Time out so that a termination signal is noticed even
                // when queued chunks bail out without reporting.
                match done_rx.recv_timeout(Duration::from_secs(1)) {
                    Ok((idx, result)) => reorder.insert(idx, result),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        bail!("extract: Worker channel closed unexpectedly")
                    }
                }
            } else {
                // Don't wait for chunks which are still running.
                for (idx, result) in done_rx.try_iter() {
                    reorder.insert(idx, result);
                }
            }

            // Commit whatever is contiguous with the last commit.
            while let Some((idx, result)) = reorder.pop() {
                let outcomes = match result {
                    Ok(v) => v,
                    Err(msg) => bail!("extract: Chunk {} panicked ({})", idx, msg),
                };
                let nr = outcomes.len();
                let (mut chunk_recs, skips) = filter_outcomes(outcomes, &mut seen);

                store.commit_chunk(idx, &chunk_recs, nr, skips)?;
                records.append(&mut chunk_recs);
                report.session_chunks += 1;
                report.session_files += nr;
                bar.progress(reorder.next());
            }

            if stopping {
                info!(
                    "extract: Interrupted, dropping {} uncommitted chunks",
                    next_dispatch - reorder.next()
                );
                break;
            }
        }
    }

    let ckpt = store.checkpoint();
    report.chunks_committed = ckpt.nr_committed();
    report.files_processed = ckpt.files_processed;
    report.files_skipped = ckpt.files_skipped;
    report.skipped = ckpt.skipped.clone();
    report.nr_runs = records.len();
    report.complete = report.chunks_committed == nr_chunks;
    report.interrupted = !report.complete;

    if report.complete {
        table::write_runs(&cfg.feature_table, &records)?;
        info!(
            "extract: Wrote {} runs to {:?}",
            records.len(),
            &cfg.feature_table
        );
    } else {
        info!(
            "extract: Stopped after {}/{} chunks, rerun to resume",
            report.chunks_committed, nr_chunks
        );
    }

    Ok(ExtractOutput { records, report })
}

pub fn format_report(rep: &ExtractReport, verbose: bool) -> String {
    let mut buf = String::new();
    writeln!(
        buf,
        "Files: {} total, {} processed, {} skipped ({} this session)",
        rep.nr_files, rep.files_processed, rep.files_skipped, rep.session_files
    )
    .unwrap();
    writeln!(
        buf,
        "Chunks: {}/{} committed, size {}, {} workers",
        rep.chunks_committed, rep.nr_chunks, rep.chunk_size, rep.nr_workers
    )
    .unwrap();
    writeln!(
        buf,
        "Runs: {}{}",
        rep.nr_runs,
        if rep.complete {
            ""
        } else {
            " (interrupted, rerun to resume)"
        }
    )
    .unwrap();

    if verbose && rep.skipped.len() > 0 {
        writeln!(buf, "\nSkipped:").unwrap();
        for ev in rep.skipped.iter() {
            writeln!(buf, "  {}: {}", &ev.file, &ev.reason).unwrap();
        }
    }
    buf
}
