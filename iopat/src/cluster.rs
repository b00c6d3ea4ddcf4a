// Copyright (c) Facebook, Inc. and its affiliates.

//! Tiled clustering engine.
//!
//! Each surviving application group is one tile. Tiles are normalized with
//! their own statistics and clustered independently on the worker pool.
//! The merge waits for every tile and orders the rows by group key. A tile
//! which fails for any reason is emitted as all-noise and doesn't affect
//! the others.
use anyhow::{bail, Result};
use crossbeam::channel::unbounded;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;

use super::error::ClusteringFailed;
use super::group::{group_runs, ApplicationGroup};
use super::workqueue::{catch_panic, WorkerPool};
use iopat_intf::{ClusterAssignment, ClusterReport, FeatureColumn, RunRecord, NOISE_CLUSTER};
use iopat_util::*;

/// A clustering algorithm applied to one normalized group.
pub trait ClusterStrategy: Send + Sync {
    fn name(&self) -> String;

    /// Seed of any randomness the strategy uses. Reported so that results
    /// can be reproduced.
    fn seed(&self) -> Option<u64> {
        None
    }

    /// One label per point. `NOISE_CLUSTER` marks noise, other labels are
    /// local to the group.
    fn cluster(&self, points: &[Vec<f64>]) -> std::result::Result<Vec<i64>, ClusteringFailed>;
}

#[derive(Clone, Debug)]
pub struct ClusterConfig {
    pub columns: Vec<FeatureColumn>,
    pub log_scale: bool,
    pub threshold: usize,
    pub workers: usize,
}

pub struct ClusterOutput {
    pub rows: Vec<ClusterAssignment>,
    pub report: ClusterReport,
}

/// Rows of the selected columns, `log10(1 + x)` scaled if requested.
pub fn feature_matrix(
    members: &[RunRecord],
    columns: &[FeatureColumn],
    log_scale: bool,
) -> std::result::Result<Vec<Vec<f64>>, ClusteringFailed> {
    let mut points = Vec::with_capacity(members.len());
    for rec in members.iter() {
        let mut row = Vec::with_capacity(columns.len());
        for col in columns.iter() {
            let mut v = col.value(rec);
            if log_scale {
                v = (1.0 + v).log10();
            }
            if !v.is_finite() {
                return Err(ClusteringFailed::NonFinite(col.name().to_string()));
            }
            row.push(v);
        }
        points.push(row);
    }
    Ok(points)
}

/// Z-score every column in place. Zero variance columns become 0.
pub fn normalize(points: &mut [Vec<f64>]) {
    let n = points.len();
    if n == 0 {
        return;
    }
    let dim = points[0].len();
    for c in 0..dim {
        let mean = points.iter().map(|p| p[c]).sum::<f64>() / n as f64;
        let var = points.iter().map(|p| (p[c] - mean).powi(2)).sum::<f64>() / n as f64;
        let std = var.sqrt();
        for p in points.iter_mut() {
            p[c] = if std > 0.0 { (p[c] - mean) / std } else { 0.0 };
        }
    }
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Build the group's rows from `labels`. Each run's distance is to the mean
/// of its cluster, noise runs measure against the group centroid which is
/// the origin after normalization.
fn assign(group: &ApplicationGroup, points: &[Vec<f64>], labels: &[i64]) -> Vec<ClusterAssignment> {
    let dim = points.first().map(|p| p.len()).unwrap_or(0);
    let mut centroids = BTreeMap::<i64, (Vec<f64>, usize)>::new();
    for (p, l) in points.iter().zip(labels.iter()) {
        let ent = centroids.entry(*l).or_insert_with(|| (vec![0.0; dim], 0));
        for (acc, v) in ent.0.iter_mut().zip(p.iter()) {
            *acc += v;
        }
        ent.1 += 1;
    }
    for (label, (sum, cnt)) in centroids.iter_mut() {
        for v in sum.iter_mut() {
            *v = if *label == NOISE_CLUSTER {
                0.0
            } else {
                *v / *cnt as f64
            };
        }
    }

    group
        .members
        .iter()
        .enumerate()
        .map(|(i, rec)| {
            let (centroid, size) = &centroids[&labels[i]];
            ClusterAssignment {
                run_id: rec.run_id.clone(),
                exe: group.key.exe.clone(),
                mode: group.key.mode,
                cluster: labels[i],
                distance: distance(&points[i], centroid),
                group_size: group.members.len(),
                cluster_size: *size,
                start_time: rec.start_time,
                end_time: rec.end_time,
            }
        })
        .collect()
}

/// Rows for a group which couldn't be clustered.
fn all_noise(group: &ApplicationGroup, cfg: &ClusterConfig) -> Vec<ClusterAssignment> {
    let labels = vec![NOISE_CLUSTER; group.members.len()];
    let points = match feature_matrix(&group.members, &cfg.columns, cfg.log_scale) {
        Ok(mut points) => {
            normalize(&mut points);
            points
        }
        Err(_) => vec![vec![]; group.members.len()],
    };
    assign(group, &points, &labels)
}

/// Cluster one tile. On failure the group is emitted as all-noise along
/// with the reason.
pub fn cluster_group(
    group: &ApplicationGroup,
    cfg: &ClusterConfig,
    strategy: &dyn ClusterStrategy,
) -> (Vec<ClusterAssignment>, Option<ClusteringFailed>) {
    let labels = feature_matrix(&group.members, &cfg.columns, cfg.log_scale).and_then(
        |mut points| {
            normalize(&mut points);
            let labels = strategy.cluster(&points)?;
            if labels.len() != points.len() {
                return Err(ClusteringFailed::LabelCount {
                    got: labels.len(),
                    want: points.len(),
                });
            }
            Ok((points, labels))
        },
    );

    match labels {
        Ok((points, labels)) => (assign(group, &points, &labels), None),
        Err(e) => (all_noise(group, cfg), Some(e)),
    }
}

/// Cluster every group on the worker pool and merge in group key order.
pub fn cluster_groups(
    groups: Vec<ApplicationGroup>,
    cfg: &ClusterConfig,
    strategy: Arc<dyn ClusterStrategy>,
) -> Result<(Vec<ClusterAssignment>, Vec<String>)> {
    let groups: Vec<Arc<ApplicationGroup>> = groups.into_iter().map(Arc::new).collect();
    let nr_groups = groups.len();
    let mut results = BTreeMap::new();

    {
        let pool = WorkerPool::new("cluster", cfg.workers)?;
        let (done_tx, done_rx) = unbounded();

        for (idx, group) in groups.iter().enumerate() {
            let group = group.clone();
            let cfg = cfg.clone();
            let strategy = strategy.clone();
            let tx = done_tx.clone();
            pool.queue(move || {
                let res = catch_panic(|| cluster_group(&group, &cfg, strategy.as_ref()));
                let _ = tx.send((idx, res));
            })?;
        }
        drop(done_tx);

        for (idx, res) in done_rx.iter() {
            results.insert(idx, res);
        }
    }

    if results.len() != nr_groups {
        bail!(
            "cluster: Only {} out of {} tiles reported back",
            results.len(),
            nr_groups
        );
    }

    let mut rows = vec![];
    let mut failed = vec![];
    for (idx, res) in results.into_iter() {
        let group = &groups[idx];
        let (mut grows, failure) = match res {
            Ok(v) => v,
            Err(msg) => (all_noise(group, cfg), Some(ClusteringFailed::Panicked(msg))),
        };
        if let Some(e) = failure {
            warn!("cluster: {} failed, marking all {} runs noise ({})", &group.key, grows.len(), &e);
            failed.push(group.key.to_string());
        } else {
            debug!(
                "cluster: {} has {} clusters over {} runs",
                &group.key,
                nr_clusters(&grows),
                grows.len()
            );
        }
        rows.append(&mut grows);
    }
    Ok((rows, failed))
}

fn nr_clusters(rows: &[ClusterAssignment]) -> usize {
    let mut ids: Vec<(&str, i64)> = rows
        .iter()
        .filter(|r| !r.is_noise())
        .map(|r| (r.exe.as_str(), r.cluster))
        .collect();
    ids.sort();
    ids.dedup();
    ids.len()
}

/// Group, filter and cluster the feature table.
pub fn run_clustering(
    table: &[RunRecord],
    cfg: &ClusterConfig,
    strategy: Arc<dyn ClusterStrategy>,
) -> Result<ClusterOutput> {
    let grouping = group_runs(table, cfg.threshold);
    let mut report = ClusterReport {
        strategy: strategy.name(),
        seed: strategy.seed(),
        threshold: cfg.threshold,
        nr_workers: cfg.workers,
        nr_runs: table.len(),
        groups_included: grouping.included.len(),
        groups_excluded: grouping.excluded.len(),
        runs_included: grouping.runs_included(),
        runs_excluded: grouping.runs_excluded(),
        ..Default::default()
    };
    info!(
        "cluster: {} groups with {} runs, {} groups with {} runs below threshold {}",
        report.groups_included,
        report.runs_included,
        report.groups_excluded,
        report.runs_excluded,
        cfg.threshold
    );

    report.excluded = grouping.excluded;
    let (rows, failed) = cluster_groups(grouping.included, cfg, strategy)?;

    report.nr_clusters = rows
        .iter()
        .filter(|r| !r.is_noise())
        .map(|r| (r.key(), r.cluster))
        .collect::<std::collections::BTreeSet<_>>()
        .len();
    report.noise_runs = rows.iter().filter(|r| r.is_noise()).count();
    report.failed_groups = failed;

    Ok(ClusterOutput { rows, report })
}

pub fn format_report(rep: &ClusterReport, verbose: bool) -> String {
    let mut buf = String::new();
    writeln!(
        buf,
        "Strategy: {}{}",
        &rep.strategy,
        match rep.seed {
            Some(seed) => format!(" seed={}", seed),
            None => "".to_string(),
        }
    )
    .unwrap();
    writeln!(
        buf,
        "Groups: {} clustered ({} runs), {} below threshold {} ({} runs)",
        rep.groups_included, rep.runs_included, rep.groups_excluded, rep.threshold, rep.runs_excluded
    )
    .unwrap();
    writeln!(
        buf,
        "Clusters: {}, noise runs: {} ({}), failed groups: {}",
        rep.nr_clusters,
        rep.noise_runs,
        format_pct(rep.noise_runs as f64 / rep.runs_included.max(1) as f64),
        rep.failed_groups.len()
    )
    .unwrap();

    if verbose {
        if rep.excluded.len() > 0 {
            writeln!(buf, "\nBelow threshold:").unwrap();
            for ex in rep.excluded.iter() {
                writeln!(buf, "  {:<32} {:>6}", format!("{}", &ex.key), ex.size).unwrap();
            }
        }
        if rep.failed_groups.len() > 0 {
            writeln!(buf, "\nFailed: {}", rep.failed_groups.join(", ")).unwrap();
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbscan::Dbscan;
    use crate::test_helpers::run_record;
    use iopat_intf::{GroupKey, IoMode};

    fn config(threshold: usize) -> ClusterConfig {
        ClusterConfig {
            columns: vec![FeatureColumn::BytesRead, FeatureColumn::BytesWritten],
            log_scale: true,
            threshold,
            workers: 2,
        }
    }

    /// simA: 9 read-dominant runs in two tight blobs and 3 write-dominant.
    /// simB: 4 read-dominant runs.
    fn scenario() -> Vec<RunRecord> {
        let mut table = vec![];
        for i in 0..5 {
            table.push(run_record(1, "simA", i, 1 << 20, 4096));
        }
        for i in 5..9 {
            table.push(run_record(1, "simA", i, 1 << 30, 4096));
        }
        for i in 9..12 {
            table.push(run_record(1, "simA", i, 0, 1 << 20));
        }
        for i in 0..4 {
            table.push(run_record(2, "simB", i, 1 << 20, 0));
        }
        table
    }

    struct Failing;

    impl ClusterStrategy for Failing {
        fn name(&self) -> String {
            "failing".into()
        }
        fn seed(&self) -> Option<u64> {
            Some(42)
        }
        fn cluster(&self, points: &[Vec<f64>]) -> std::result::Result<Vec<i64>, ClusteringFailed> {
            if points.len() > 5 {
                Err(ClusteringFailed::NonConvergence("too many points".into()))
            } else {
                Ok(vec![0; points.len()])
            }
        }
    }

    struct Panicking;

    impl ClusterStrategy for Panicking {
        fn name(&self) -> String {
            "panicking".into()
        }
        fn cluster(&self, _points: &[Vec<f64>]) -> std::result::Result<Vec<i64>, ClusteringFailed> {
            panic!("boom");
        }
    }

    #[test]
    fn test_normalize() {
        let mut points = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        normalize(&mut points);
        assert_eq!(points, vec![vec![-1.0, 0.0], vec![1.0, 0.0]]);
    }

    #[test]
    fn test_threshold_scenario() {
        let _ = env_logger::try_init();
        let out = run_clustering(&scenario(), &config(5), Arc::new(Dbscan::new(1.0, 3))).unwrap();
        assert_eq!(out.rows.len(), 9);
        assert!(out
            .rows
            .iter()
            .all(|r| r.key() == GroupKey::new("simA", IoMode::Read) && r.group_size == 9));
        assert_eq!(out.report.groups_excluded, 2);
        assert_eq!(out.report.runs_excluded, 7);
        assert_eq!(out.report.seed, None);

        // Two blobs, the first five runs in cluster 0.
        assert_eq!(out.report.nr_clusters, 2);
        assert!(out.rows[..5].iter().all(|r| r.cluster == 0 && r.cluster_size == 5));
        assert!(out.rows[5..].iter().all(|r| r.cluster == 1 && r.cluster_size == 4));
        assert!(out.rows.iter().all(|r| r.distance < 1e-9));
        assert!(format_report(&out.report, true).contains("simB/Read"));
    }

    #[test]
    fn test_local_ids_per_group() {
        let _ = env_logger::try_init();
        let out = run_clustering(&scenario(), &config(3), Arc::new(Dbscan::new(1.0, 3))).unwrap();
        assert_eq!(out.rows.len(), 16);
        let keys: Vec<String> = out.rows.iter().map(|r| r.key().to_string()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);

        let zero_keys: std::collections::BTreeSet<GroupKey> = out
            .rows
            .iter()
            .filter(|r| r.cluster == 0)
            .map(|r| r.key())
            .collect();
        assert!(zero_keys.len() >= 2);
    }

    #[test]
    fn test_failing_strategy() {
        let _ = env_logger::try_init();
        let out = run_clustering(&scenario(), &config(3), Arc::new(Failing)).unwrap();
        assert_eq!(out.rows.len(), 16);
        assert_eq!(out.report.failed_groups, vec!["simA/Read".to_string()]);
        assert_eq!(out.report.seed, Some(42));
        for r in out.rows.iter() {
            if r.key() == GroupKey::new("simA", IoMode::Read) {
                assert!(r.is_noise());
                assert_eq!(r.cluster_size, 9);
            } else {
                assert_eq!(r.cluster, 0);
            }
        }
        assert_eq!(out.report.noise_runs, 9);
    }

    #[test]
    fn test_panicking_strategy() {
        let _ = env_logger::try_init();
        let out = run_clustering(&scenario(), &config(3), Arc::new(Panicking)).unwrap();
        assert_eq!(out.rows.len(), 16);
        assert!(out.rows.iter().all(|r| r.is_noise()));
        assert_eq!(out.report.failed_groups.len(), 3);
    }

    #[test]
    fn test_non_finite() {
        let mut table = scenario();
        for r in table.iter_mut() {
            r.io_time = iopat_intf::Counter::Reported(f64::NAN);
        }
        let mut cfg = config(5);
        cfg.columns = vec![FeatureColumn::IoTime];
        let out = run_clustering(&table, &cfg, Arc::new(Dbscan::new(1.0, 3))).unwrap();
        assert_eq!(out.rows.len(), 9);
        assert!(out.rows.iter().all(|r| r.is_noise() && r.distance == 0.0));
        assert_eq!(out.report.failed_groups.len(), 1);
    }
}
