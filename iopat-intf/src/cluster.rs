// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cluster id given to runs which don't fit any dense cluster in their group.
pub const NOISE_CLUSTER: i64 = -1;

/// Dominant I/O direction of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IoMode {
    Read,
    Write,
}

impl IoMode {
    /// Equal byte totals count as read-dominant.
    pub fn of(bytes_read: u64, bytes_written: u64) -> Self {
        if bytes_read >= bytes_written {
            IoMode::Read
        } else {
            IoMode::Write
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            IoMode::Read => "Read",
            IoMode::Write => "Write",
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        match input {
            "Read" => Ok(IoMode::Read),
            "Write" => Ok(IoMode::Write),
            v => bail!("invalid I/O mode {:?}", v),
        }
    }
}

impl fmt::Display for IoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Identity of an application group. Cluster ids are only unique within
/// one key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub exe: String,
    pub mode: IoMode,
}

impl GroupKey {
    pub fn new(exe: &str, mode: IoMode) -> Self {
        Self {
            exe: exe.to_string(),
            mode,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", &self.exe, self.mode)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub run_id: String,
    pub exe: String,
    pub mode: IoMode,
    pub cluster: i64,
    pub distance: f64,
    pub group_size: usize,
    pub cluster_size: usize,
    pub start_time: u64,
    pub end_time: u64,
}

impl ClusterAssignment {
    pub fn key(&self) -> GroupKey {
        GroupKey::new(&self.exe, self.mode)
    }

    pub fn is_noise(&self) -> bool {
        self.cluster == NOISE_CLUSTER
    }
}
