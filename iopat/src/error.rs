// Copyright (c) Facebook, Inc. and its affiliates.
use std::path::PathBuf;
use thiserror::Error;

/// A log which can't be turned into a `RunRecord`. Recovered by skipping
/// the file.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("malformed log: {field}: {reason}")]
pub struct MalformedLog {
    pub field: String,
    pub reason: String,
}

impl MalformedLog {
    pub fn new(field: &str, reason: &str) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// The extraction checkpoint can't be trusted. Fatal until the operator
/// restarts extraction from scratch.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("checkpoint {path:?} is corrupt ({reason}), rerun with --restart to discard it")]
pub struct CheckpointCorruption {
    pub path: PathBuf,
    pub reason: String,
}

impl CheckpointCorruption {
    pub fn new<P: Into<PathBuf>>(path: P, reason: &str) -> Self {
        Self {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Why a group couldn't be clustered. The group is emitted as all-noise.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ClusteringFailed {
    #[error("did not converge ({0})")]
    NonConvergence(String),
    #[error("invalid input ({0})")]
    InvalidInput(String),
    #[error("non-finite value in feature column {0}")]
    NonFinite(String),
    #[error("strategy returned {got} labels for {want} runs")]
    LabelCount { got: usize, want: usize },
    #[error("panicked ({0})")]
    Panicked(String),
}
