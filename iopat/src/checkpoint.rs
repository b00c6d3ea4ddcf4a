// Copyright (c) Facebook, Inc. and its affiliates.

//! Extraction checkpoint.
//!
//! The checkpoint directory sits next to the feature table as
//! `FEATURE_TABLE.ckpt/` and holds `checkpoint.json` plus one parquet
//! segment per committed chunk. A chunk is committed by renaming its segment
//! into place and then renaming the advanced `checkpoint.json` over the old
//! one. `checkpoint.json` is authoritative: segments past `last_committed`
//! are leftovers of an interrupted commit and get deleted on open.
use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::error::CheckpointCorruption;
use super::table;
use iopat_intf::{RunRecord, SkipEvent};
use iopat_util::*;

pub const CKPT_VERSION: u32 = 1;
const CKPT_FILE: &str = "checkpoint.json";
const SEGMENT_PREFIX: &str = "segment-";
const SEGMENT_SUFFIX: &str = ".parquet";

const CKPT_DOC: &str = "\
//
// iopat extraction checkpoint, do not edit
//
// last_committed: Index of the last chunk whose segment is durable
// fingerprint: Inputs and chunk size the chunk indices refer to
//
";

/// What the chunk indices in a checkpoint mean. Resuming against different
/// inputs or a different chunk size would silently mix up chunks. Only file
/// names are recorded so that the input directory can be spelled or located
/// differently between sessions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFingerprint {
    pub nr_files: usize,
    pub first: Option<String>,
    pub last: Option<String>,
    pub chunk_size: usize,
}

impl InputFingerprint {
    pub fn new(files: &[PathBuf], chunk_size: usize) -> Self {
        let name = |p: &PathBuf| match p.file_name() {
            Some(v) => v.to_string_lossy().to_string(),
            None => p.to_string_lossy().to_string(),
        };
        Self {
            nr_files: files.len(),
            first: files.first().map(name),
            last: files.last().map(name),
            chunk_size,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExtractionCheckpoint {
    pub version: u32,
    pub fingerprint: InputFingerprint,
    pub last_committed: Option<usize>,
    pub files_processed: usize,
    pub files_skipped: usize,
    pub skipped: Vec<SkipEvent>,
}

impl ExtractionCheckpoint {
    pub fn next_chunk(&self) -> usize {
        self.last_committed.map(|idx| idx + 1).unwrap_or(0)
    }

    pub fn nr_committed(&self) -> usize {
        self.next_chunk()
    }
}

impl JsonLoad for ExtractionCheckpoint {}

impl JsonSave for ExtractionCheckpoint {
    fn preamble() -> Option<String> {
        Some(CKPT_DOC.to_string())
    }
}

pub struct CheckpointStore {
    dir: PathBuf,
    file: JsonReportFile<ExtractionCheckpoint>,
}

impl CheckpointStore {
    pub fn dir_for<P: AsRef<Path>>(feature_table: P) -> PathBuf {
        let mut dir = feature_table.as_ref().to_path_buf().into_os_string();
        dir.push(".ckpt");
        PathBuf::from(dir)
    }

    fn corrupt(path: &Path, reason: &str) -> anyhow::Error {
        CheckpointCorruption::new(path, reason).into()
    }

    /// Discard the checkpoint and all its segments.
    pub fn clear<P: AsRef<Path>>(dir: P) -> Result<()> {
        let dir = dir.as_ref();
        if dir.exists() {
            info!("checkpoint: Removing {:?}", dir);
            fs::remove_dir_all(dir).with_context(|| format!("Removing {:?}", dir))?;
        }
        Ok(())
    }

    /// Load the checkpoint in `dir` without validating it against inputs.
    pub fn peek<P: AsRef<Path>>(dir: P) -> Result<Option<ExtractionCheckpoint>> {
        let path = dir.as_ref().join(CKPT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        match ExtractionCheckpoint::load(&path) {
            Ok(ckpt) => Ok(Some(ckpt)),
            Err(e) => Err(Self::corrupt(&path, &format!("{:#}", &e))),
        }
    }

    /// Open or create the checkpoint in `dir`. An existing checkpoint must
    /// match `fingerprint` and have all its committed segments present.
    pub fn open<P: AsRef<Path>>(dir: P, fingerprint: InputFingerprint) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let path = dir.join(CKPT_FILE);

        let ckpt = match Self::peek(&dir)? {
            Some(ckpt) => {
                if ckpt.version != CKPT_VERSION {
                    return Err(Self::corrupt(
                        &path,
                        &format!("unknown version {}", ckpt.version),
                    ));
                }
                if ckpt.fingerprint != fingerprint {
                    return Err(Self::corrupt(
                        &path,
                        &format!(
                            "created for {:?} but inputs are {:?}",
                            &ckpt.fingerprint, &fingerprint
                        ),
                    ));
                }
                info!(
                    "checkpoint: Resuming at chunk {} ({} files processed, {} skipped)",
                    ckpt.next_chunk(),
                    ckpt.files_processed,
                    ckpt.files_skipped
                );
                ckpt
            }
            None => {
                fs::create_dir_all(&dir).with_context(|| format!("Creating {:?}", &dir))?;
                ExtractionCheckpoint {
                    version: CKPT_VERSION,
                    fingerprint,
                    ..Default::default()
                }
            }
        };

        let store = Self {
            file: JsonReportFile::with_data(Some(&path), ckpt),
            dir,
        };
        store.verify_segments()?;
        store.remove_stale()?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn checkpoint(&self) -> &ExtractionCheckpoint {
        &self.file.data
    }

    pub fn segment_path(&self, idx: usize) -> PathBuf {
        self.dir
            .join(format!("{}{:06}{}", SEGMENT_PREFIX, idx, SEGMENT_SUFFIX))
    }

    fn segment_idx(name: &str) -> Option<usize> {
        name.strip_prefix(SEGMENT_PREFIX)?
            .strip_suffix(SEGMENT_SUFFIX)?
            .parse::<usize>()
            .ok()
    }

    fn verify_segments(&self) -> Result<()> {
        for idx in 0..self.checkpoint().nr_committed() {
            let seg = self.segment_path(idx);
            if !seg.exists() {
                return Err(Self::corrupt(
                    &seg,
                    &format!("segment of committed chunk {} is missing", idx),
                ));
            }
        }
        Ok(())
    }

    /// Delete segments and staging files an interrupted commit left behind.
    fn remove_stale(&self) -> Result<()> {
        let next = self.checkpoint().next_chunk();
        for entry in fs::read_dir(&self.dir).with_context(|| format!("Reading {:?}", &self.dir))? {
            let path = entry?.path();
            let name = match path.file_name() {
                Some(v) => v.to_string_lossy().to_string(),
                None => continue,
            };
            let stale = if name.ends_with(".staging") {
                true
            } else {
                matches!(Self::segment_idx(&name), Some(idx) if idx >= next)
            };
            if stale {
                warn!("checkpoint: Removing stale {:?}", &path);
                fs::remove_file(&path).with_context(|| format!("Removing {:?}", &path))?;
            }
        }
        Ok(())
    }

    /// Read back every committed segment in chunk order.
    pub fn load_committed(&self) -> Result<Vec<RunRecord>> {
        let mut records = vec![];
        for idx in 0..self.checkpoint().nr_committed() {
            let seg = self.segment_path(idx);
            match table::read_runs(&seg) {
                Ok(mut recs) => records.append(&mut recs),
                Err(e) => {
                    return Err(Self::corrupt(
                        &seg,
                        &format!("unreadable segment ({:#})", &e),
                    ))
                }
            }
        }
        Ok(records)
    }

    /// Run ids already in the committed segments.
    pub fn committed_ids(records: &[RunRecord]) -> HashSet<String> {
        records.iter().map(|r| r.run_id.clone()).collect()
    }

    /// Durably commit chunk `idx`. Must be the next chunk in order.
    pub fn commit_chunk(
        &mut self,
        idx: usize,
        records: &[RunRecord],
        nr_files: usize,
        mut skipped: Vec<SkipEvent>,
    ) -> Result<()> {
        let next = self.checkpoint().next_chunk();
        if idx != next {
            bail!("committing chunk {} out of order, expected {}", idx, next);
        }

        table::write_runs(self.segment_path(idx), records)?;

        let ckpt = &mut self.file.data;
        ckpt.last_committed = Some(idx);
        ckpt.files_processed += nr_files;
        ckpt.files_skipped += skipped.len();
        ckpt.skipped.append(&mut skipped);
        self.file.commit()?;

        debug!(
            "checkpoint: Committed chunk {} ({} runs from {} files)",
            idx,
            records.len(),
            nr_files
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::run_record;

    fn files(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("log-{:02}", i))).collect()
    }

    #[test]
    fn test_commit_and_reopen() {
        let _ = env_logger::try_init();
        let dir = tempfile::tempdir().unwrap();
        let ckdir = CheckpointStore::dir_for(dir.path().join("run_info.parquet"));
        let fp = InputFingerprint::new(&files(4), 2);

        let mut store = CheckpointStore::open(&ckdir, fp.clone()).unwrap();
        assert_eq!(store.checkpoint().next_chunk(), 0);
        store
            .commit_chunk(
                0,
                &[run_record(1, "simA", 10, 1, 0)],
                2,
                vec![SkipEvent::new("log-01", "malformed log: uid: missing")],
            )
            .unwrap();
        assert!(store.commit_chunk(2, &[], 2, vec![]).is_err());

        let store = CheckpointStore::open(&ckdir, fp).unwrap();
        let ckpt = store.checkpoint();
        assert_eq!(ckpt.last_committed, Some(0));
        assert_eq!(ckpt.files_processed, 2);
        assert_eq!(ckpt.files_skipped, 1);
        assert_eq!(ckpt.skipped.len(), 1);

        let recs = store.load_committed().unwrap();
        assert_eq!(recs.len(), 1);
        assert!(CheckpointStore::committed_ids(&recs).contains("1-simA-10"));
    }

    #[test]
    fn test_fingerprint_uses_file_names() {
        let plain = vec![PathBuf::from("logs/log-00"), PathBuf::from("logs/log-09")];
        let dotted = vec![
            PathBuf::from("/data/./logs/log-00"),
            PathBuf::from("/data/./logs/log-09"),
        ];
        let fp = InputFingerprint::new(&plain, 3);
        assert_eq!(fp, InputFingerprint::new(&dotted, 3));
        assert_eq!(fp.first.as_deref(), Some("log-00"));
        assert_eq!(fp.last.as_deref(), Some("log-09"));
        assert_ne!(fp, InputFingerprint::new(&plain, 4));
    }

    #[test]
    fn test_stale_segment_removed() {
        let dir = tempfile::tempdir().unwrap();
        let ckdir = dir.path().join("t.ckpt");
        let fp = InputFingerprint::new(&files(4), 2);

        let store = CheckpointStore::open(&ckdir, fp.clone()).unwrap();
        let stale = store.segment_path(0);
        table::write_runs(&stale, &[run_record(1, "simA", 10, 1, 0)]).unwrap();
        fs::write(staging_path(store.segment_path(1)), b"junk").unwrap();

        let store = CheckpointStore::open(&ckdir, fp).unwrap();
        assert!(!stale.exists());
        assert!(!staging_path(store.segment_path(1)).exists());
        assert_eq!(store.load_committed().unwrap().len(), 0);
    }

    #[test]
    fn test_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let ckdir = dir.path().join("t.ckpt");
        let fp = InputFingerprint::new(&files(4), 2);

        let mut store = CheckpointStore::open(&ckdir, fp.clone()).unwrap();
        store.commit_chunk(0, &[], 2, vec![]).unwrap();

        let err = CheckpointStore::open(&ckdir, InputFingerprint::new(&files(5), 2))
            .err()
            .unwrap();
        assert!(err.downcast_ref::<CheckpointCorruption>().is_some());

        fs::remove_file(store.segment_path(0)).unwrap();
        let err = CheckpointStore::open(&ckdir, fp.clone()).err().unwrap();
        assert!(err.downcast_ref::<CheckpointCorruption>().is_some());

        fs::write(ckdir.join(CKPT_FILE), b"{ \"last_committed\": ").unwrap();
        let err = CheckpointStore::open(&ckdir, fp.clone()).err().unwrap();
        assert!(err.downcast_ref::<CheckpointCorruption>().is_some());

        CheckpointStore::clear(&ckdir).unwrap();
        assert!(!ckdir.exists());
        CheckpointStore::open(&ckdir, fp).unwrap();
    }
}
