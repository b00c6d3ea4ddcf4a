// Copyright (c) Facebook, Inc. and its affiliates.
pub mod checkpoint;
pub mod cluster;
pub mod dbscan;
pub mod error;
pub mod extract;
pub mod group;
pub mod parser;
pub mod study;
pub mod table;
pub mod workqueue;

#[cfg(test)]
mod test_helpers;

pub use cluster::{ClusterConfig, ClusterStrategy};
pub use dbscan::Dbscan;
pub use error::{CheckpointCorruption, ClusteringFailed, MalformedLog};
pub use extract::ExtractConfig;
