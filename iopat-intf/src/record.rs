// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::IoMode;

/// An optional counter from a totals log. `Missing` reads as zero through
/// `value()` but stays distinguishable from a reported zero.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Counter<T> {
    Reported(T),
    Missing,
}

impl<T> Default for Counter<T> {
    fn default() -> Self {
        Counter::Missing
    }
}

impl<T: Copy + Default> Counter<T> {
    pub fn value(&self) -> T {
        match self {
            Counter::Reported(v) => *v,
            Counter::Missing => T::default(),
        }
    }

    pub fn is_reported(&self) -> bool {
        matches!(self, Counter::Reported(_))
    }

    pub fn as_option(&self) -> Option<T> {
        match self {
            Counter::Reported(v) => Some(*v),
            Counter::Missing => None,
        }
    }
}

impl<T> From<Option<T>> for Counter<T> {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => Counter::Reported(v),
            None => Counter::Missing,
        }
    }
}

/// One profiled job run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub uid: u64,
    pub exe: String,
    pub jobid: Option<u64>,
    pub start_time: u64,
    pub end_time: u64,
    pub bytes_read: Counter<u64>,
    pub bytes_written: Counter<u64>,
    pub io_time: Counter<f64>,
    pub opens: Counter<u64>,
    pub reads: Counter<u64>,
    pub writes: Counter<u64>,
    pub seq_ratio: Counter<f64>,
    pub mean_req_size: Counter<f64>,
    pub nprocs: Counter<u64>,
    pub nnodes: Counter<u64>,
}

impl RunRecord {
    pub fn make_run_id(uid: u64, exe: &str, start_time: u64) -> String {
        format!("{}-{}-{}", uid, exe, start_time)
    }

    pub fn run_time(&self) -> u64 {
        self.end_time.saturating_sub(self.start_time)
    }

    pub fn io_mode(&self) -> IoMode {
        IoMode::of(self.bytes_read.value(), self.bytes_written.value())
    }
}

/// Per-run features which can be fed to the clustering engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureColumn {
    BytesRead,
    BytesWritten,
    IoTime,
    Opens,
    Reads,
    Writes,
    SeqRatio,
    MeanReqSize,
    Nprocs,
    Nnodes,
    RunTime,
}

impl FeatureColumn {
    pub const ALL: &'static [FeatureColumn] = &[
        FeatureColumn::BytesRead,
        FeatureColumn::BytesWritten,
        FeatureColumn::IoTime,
        FeatureColumn::Opens,
        FeatureColumn::Reads,
        FeatureColumn::Writes,
        FeatureColumn::SeqRatio,
        FeatureColumn::MeanReqSize,
        FeatureColumn::Nprocs,
        FeatureColumn::Nnodes,
        FeatureColumn::RunTime,
    ];

    pub const DFL_SELECTION: &'static [FeatureColumn] = &[
        FeatureColumn::BytesRead,
        FeatureColumn::BytesWritten,
        FeatureColumn::Reads,
        FeatureColumn::Writes,
        FeatureColumn::Opens,
        FeatureColumn::SeqRatio,
        FeatureColumn::MeanReqSize,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FeatureColumn::BytesRead => "bytes_read",
            FeatureColumn::BytesWritten => "bytes_written",
            FeatureColumn::IoTime => "io_time",
            FeatureColumn::Opens => "opens",
            FeatureColumn::Reads => "reads",
            FeatureColumn::Writes => "writes",
            FeatureColumn::SeqRatio => "seq_ratio",
            FeatureColumn::MeanReqSize => "mean_req_size",
            FeatureColumn::Nprocs => "nprocs",
            FeatureColumn::Nnodes => "nnodes",
            FeatureColumn::RunTime => "run_time",
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        for col in Self::ALL.iter() {
            if col.name() == input {
                return Ok(*col);
            }
        }
        bail!("unknown feature column {:?}", input);
    }

    pub fn parse_list(input: &str) -> Result<Vec<Self>> {
        let mut cols = vec![];
        for tok in input.split(',').filter(|tok| tok.trim().len() > 0) {
            let col = Self::parse(tok)?;
            if !cols.contains(&col) {
                cols.push(col);
            }
        }
        if cols.len() == 0 {
            bail!("empty feature column selection");
        }
        Ok(cols)
    }

    /// Missing counters read as zero.
    pub fn value(&self, rec: &RunRecord) -> f64 {
        match self {
            FeatureColumn::BytesRead => rec.bytes_read.value() as f64,
            FeatureColumn::BytesWritten => rec.bytes_written.value() as f64,
            FeatureColumn::IoTime => rec.io_time.value(),
            FeatureColumn::Opens => rec.opens.value() as f64,
            FeatureColumn::Reads => rec.reads.value() as f64,
            FeatureColumn::Writes => rec.writes.value() as f64,
            FeatureColumn::SeqRatio => rec.seq_ratio.value(),
            FeatureColumn::MeanReqSize => rec.mean_req_size.value(),
            FeatureColumn::Nprocs => rec.nprocs.value() as f64,
            FeatureColumn::Nnodes => rec.nnodes.value() as f64,
            FeatureColumn::RunTime => rec.run_time() as f64,
        }
    }
}

impl fmt::Display for FeatureColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_presence() {
        let reported = Counter::Reported(0u64);
        let missing = Counter::<u64>::Missing;
        assert_eq!(reported.value(), missing.value());
        assert!(reported.is_reported());
        assert!(!missing.is_reported());
        assert_eq!(Counter::from(Some(3u64)), Counter::Reported(3));
        assert_eq!(Counter::<u64>::from(None), Counter::Missing);
    }

    #[test]
    fn test_feature_column_parse() {
        let cols = FeatureColumn::parse_list("bytes_read, seq_ratio,bytes_read").unwrap();
        assert_eq!(cols, vec![FeatureColumn::BytesRead, FeatureColumn::SeqRatio]);
        assert!(FeatureColumn::parse_list("bytes_read,bogus").is_err());
        assert!(FeatureColumn::parse_list(" , ").is_err());

        for col in FeatureColumn::ALL {
            assert_eq!(FeatureColumn::parse(col.name()).unwrap(), *col);
        }
    }

    #[test]
    fn test_feature_column_serde_names() {
        let json = serde_json::to_string(&FeatureColumn::MeanReqSize).unwrap();
        assert_eq!(json, "\"mean_req_size\"");
    }
}
