// Copyright (c) Facebook, Inc. and its affiliates.
use iopat_util::*;

pub mod args;
pub mod cluster;
pub mod record;
pub mod report;

pub use args::{Args, Mode};
pub use cluster::{ClusterAssignment, GroupKey, IoMode, NOISE_CLUSTER};
pub use record::{Counter, FeatureColumn, RunRecord};
pub use report::{ClusterReport, ExcludedGroup, ExtractReport, SkipEvent};

lazy_static::lazy_static! {
    pub static ref VERSION: &'static str = env!("CARGO_PKG_VERSION");
    pub static ref FULL_VERSION: String = full_version(*VERSION);
}
