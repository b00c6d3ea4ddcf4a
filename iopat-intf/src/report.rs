// Copyright (c) Facebook, Inc. and its affiliates.
use serde::{Deserialize, Serialize};

use super::GroupKey;

/// A log which didn't make it into the feature table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipEvent {
    pub file: String,
    pub reason: String,
}

impl SkipEvent {
    pub fn new(file: &str, reason: &str) -> Self {
        Self {
            file: file.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// End-of-stage summary of an extraction session.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExtractReport {
    pub nr_files: usize,
    pub nr_chunks: usize,
    pub chunk_size: usize,
    pub nr_workers: usize,
    /// Chunks committed in total, across all sessions.
    pub chunks_committed: usize,
    /// Chunks committed by this session.
    pub session_chunks: usize,
    /// Files parsed by this session, including ones that were skipped.
    pub session_files: usize,
    pub files_processed: usize,
    pub files_skipped: usize,
    pub nr_runs: usize,
    pub skipped: Vec<SkipEvent>,
    pub complete: bool,
    pub interrupted: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExcludedGroup {
    pub key: GroupKey,
    pub size: usize,
}

/// End-of-stage summary of a clustering pass.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClusterReport {
    pub strategy: String,
    pub seed: Option<u64>,
    pub threshold: usize,
    pub nr_workers: usize,
    pub nr_runs: usize,
    pub groups_included: usize,
    pub groups_excluded: usize,
    pub runs_included: usize,
    pub runs_excluded: usize,
    pub excluded: Vec<ExcludedGroup>,
    pub nr_clusters: usize,
    pub noise_runs: usize,
    pub failed_groups: Vec<String>,
}
