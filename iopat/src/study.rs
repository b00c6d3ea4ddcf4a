// Copyright (c) Facebook, Inc. and its affiliates.

//! Cluster study.
//!
//! Looks at how the clusters of each I/O mode are shaped: how many clusters
//! an application splits into, how big they are, how long they stay active
//! and how regularly their runs arrive.
use quantiles::ckms::CKMS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

use iopat_intf::{ClusterAssignment, IoMode};
use iopat_util::*;

pub const DFL_PCTS: &[&'static str] = &["00", "05", "25", "50", "75", "95", "100", "mean", "stdev"];
const CKMS_DFL_ERROR: f64 = 0.001;

pub type PctsMap = BTreeMap<String, f64>;

/// Upper bounds in days, exclusive. "2w" is half a month.
pub const SPAN_BUCKETS: &[(&'static str, f64)] = &[
    ("<1d", 1.0),
    ("1-3d", 3.0),
    ("3d-1w", 7.0),
    ("1w-2w", 15.0),
    ("2w-1M", 30.0),
    ("1-3M", 90.0),
    ("3-6M", 180.0),
    (">6M", std::f64::INFINITY),
];

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterStat {
    pub exe: String,
    pub cluster: i64,
    pub nr_runs: usize,
    pub first_start: u64,
    pub last_end: u64,
    /// Seconds from the first start to the last end.
    pub span: u64,
    pub runs_per_day: Option<f64>,
    /// Coefficient of variation of inter-arrival gaps in percents.
    pub inter_arrival_cov: Option<f64>,
}

impl ClusterStat {
    pub fn span_days(&self) -> f64 {
        self.span as f64 / SECS_PER_DAY
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModeStudy {
    pub nr_apps: usize,
    pub nr_clusters: usize,
    pub noise_runs: usize,
    pub clusters_per_app: PctsMap,
    pub runs_per_cluster: PctsMap,
    pub span_days: PctsMap,
    pub runs_per_day: PctsMap,
    pub inter_arrival_cov: PctsMap,
    pub span_buckets: Vec<(String, usize)>,
    pub clusters: Vec<ClusterStat>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StudyReport {
    pub modes: BTreeMap<String, ModeStudy>,
}

impl JsonLoad for StudyReport {}
impl JsonSave for StudyReport {}

/// Mean, stdev and percentiles of `data`. All zero if `data` is empty.
pub fn pcts(data: &[f64], pcts: Option<&[&str]>) -> PctsMap {
    let pcts = pcts.unwrap_or(DFL_PCTS);
    let mut ckms = CKMS::<f64>::new(CKMS_DFL_ERROR);
    for v in data.iter() {
        ckms.insert(*v);
    }

    pcts.iter()
        .map(|pct| {
            let val = if data.len() == 0 {
                0.0
            } else {
                match *pct {
                    "mean" => statistical::mean(data),
                    "stdev" => match data.len() {
                        1 => 0.0,
                        _ => statistical::standard_deviation(data, None),
                    },
                    pct => match pct.parse::<f64>() {
                        Ok(pctf) => ckms.query(pctf / 100.0).map(|x| x.1).unwrap_or(0.0),
                        Err(_) => 0.0,
                    },
                }
            };
            (pct.to_string(), val)
        })
        .collect()
}

pub fn span_bucket(span_days: f64) -> &'static str {
    for (name, upper) in SPAN_BUCKETS.iter() {
        if span_days < *upper {
            return *name;
        }
    }
    SPAN_BUCKETS[SPAN_BUCKETS.len() - 1].0
}

/// CoV in percents of `|end[j+1] - start[j]|` over runs in start order.
fn inter_arrival_cov(runs: &[&ClusterAssignment]) -> Option<f64> {
    let gaps: Vec<f64> = runs
        .windows(2)
        .map(|w| (w[1].end_time as f64 - w[0].start_time as f64).abs())
        .collect();
    match gaps.len() {
        0 => None,
        1 => Some(0.0),
        _ => {
            let mean = statistical::mean(&gaps);
            if mean > 0.0 {
                Some(statistical::population_standard_deviation(&gaps, None) / mean * TO_PCT)
            } else {
                None
            }
        }
    }
}

fn study_cluster(exe: &str, cluster: i64, mut runs: Vec<&ClusterAssignment>) -> ClusterStat {
    runs.sort_by_key(|r| (r.start_time, r.end_time));
    let first_start = runs.iter().map(|r| r.start_time).min().unwrap_or(0);
    let last_end = runs.iter().map(|r| r.end_time).max().unwrap_or(0);
    let span = last_end.saturating_sub(first_start);

    ClusterStat {
        exe: exe.to_string(),
        cluster,
        nr_runs: runs.len(),
        first_start,
        last_end,
        span,
        runs_per_day: match span {
            0 => None,
            span => Some(runs.len() as f64 / (span as f64 / SECS_PER_DAY)),
        },
        inter_arrival_cov: inter_arrival_cov(&runs),
    }
}

fn study_mode(rows: &[&ClusterAssignment]) -> ModeStudy {
    let mut apps = BTreeMap::<&str, BTreeMap<i64, Vec<&ClusterAssignment>>>::new();
    let mut noise_runs = 0;
    for row in rows.iter() {
        let clusters = apps.entry(row.exe.as_str()).or_default();
        if row.is_noise() {
            noise_runs += 1;
        } else {
            clusters.entry(row.cluster).or_default().push(*row);
        }
    }

    let mut clusters_per_app = vec![];
    let mut stats = vec![];
    for (exe, clusters) in apps.iter() {
        clusters_per_app.push(clusters.len() as f64);
        for (id, runs) in clusters.iter() {
            stats.push(study_cluster(exe, *id, runs.clone()));
        }
    }

    let collect = |f: &dyn Fn(&ClusterStat) -> Option<f64>| -> Vec<f64> {
        stats.iter().filter_map(|s| f(s)).collect()
    };

    let mut span_buckets: Vec<(String, usize)> = SPAN_BUCKETS
        .iter()
        .map(|(name, _)| (name.to_string(), 0))
        .collect();
    for st in stats.iter() {
        let bucket = span_bucket(st.span_days());
        if let Some(ent) = span_buckets.iter_mut().find(|(name, _)| name == bucket) {
            ent.1 += 1;
        }
    }

    ModeStudy {
        nr_apps: apps.len(),
        nr_clusters: stats.len(),
        noise_runs,
        clusters_per_app: pcts(&clusters_per_app, None),
        runs_per_cluster: pcts(&collect(&|s| Some(s.nr_runs as f64)), None),
        span_days: pcts(&collect(&|s| Some(s.span_days())), None),
        runs_per_day: pcts(&collect(&|s| s.runs_per_day), None),
        inter_arrival_cov: pcts(&collect(&|s| s.inter_arrival_cov), None),
        span_buckets,
        clusters: stats,
    }
}

pub fn study_clusters(rows: &[ClusterAssignment]) -> StudyReport {
    let mut report = StudyReport::default();
    for mode in [IoMode::Read, IoMode::Write].iter() {
        let mode_rows: Vec<&ClusterAssignment> = rows.iter().filter(|r| r.mode == *mode).collect();
        report
            .modes
            .insert(mode.name().to_string(), study_mode(&mode_rows));
    }
    report
}

fn print_pcts_header(out: &mut String, width: usize, name: &str) {
    writeln!(
        out,
        "{:<width$}  {}",
        format!("[{}]", name),
        DFL_PCTS
            .iter()
            .map(|x| format!("{:>7}", format_percentile(*x)))
            .collect::<Vec<String>>()
            .join(" "),
        width = width,
    )
    .unwrap();
}

fn print_pcts_line<F>(out: &mut String, width: usize, field_name: &str, data: &PctsMap, fmt: F)
where
    F: Fn(f64) -> String,
{
    write!(out, "{:<width$}  ", field_name, width = width).unwrap();
    for pct in DFL_PCTS.iter() {
        let v = data.get(*pct).cloned().unwrap_or(0.0);
        write!(out, "{:>7} ", fmt(v)).unwrap();
    }
    writeln!(out, "").unwrap();
}

pub fn format_study(rep: &StudyReport, verbose: bool) -> String {
    const WIDTH: usize = 20;
    let mut buf = String::new();

    for (mode, ms) in rep.modes.iter() {
        writeln!(
            buf,
            "{}: {} applications, {} clusters, {} noise runs",
            mode, ms.nr_apps, ms.nr_clusters, ms.noise_runs
        )
        .unwrap();
        if ms.nr_clusters == 0 {
            writeln!(buf, "").unwrap();
            continue;
        }

        print_pcts_header(&mut buf, WIDTH, mode);
        print_pcts_line(&mut buf, WIDTH, "clusters/app", &ms.clusters_per_app, |v| {
            format!("{:.1}", v)
        });
        print_pcts_line(&mut buf, WIDTH, "runs/cluster", &ms.runs_per_cluster, |v| {
            format_count(v)
        });
        print_pcts_line(&mut buf, WIDTH, "span(days)", &ms.span_days, |v| {
            format!("{:.1}", v)
        });
        print_pcts_line(&mut buf, WIDTH, "runs/day", &ms.runs_per_day, |v| {
            format!("{:.1}", v)
        });
        print_pcts_line(&mut buf, WIDTH, "arrival-cov%", &ms.inter_arrival_cov, |v| {
            format!("{:.1}", v)
        });

        writeln!(
            buf,
            "\nspan  {}\n",
            ms.span_buckets
                .iter()
                .map(|(name, cnt)| format!("{}={}", name, cnt))
                .collect::<Vec<String>>()
                .join(" ")
        )
        .unwrap();

        if verbose {
            for st in ms.clusters.iter() {
                writeln!(
                    buf,
                    "  {:<24} runs={:<6} span={:<6} {}",
                    format!("{}/{}", &st.exe, st.cluster),
                    st.nr_runs,
                    format_duration(st.span as f64),
                    format_period((st.first_start, st.last_end))
                )
                .unwrap();
            }
            writeln!(buf, "").unwrap();
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use iopat_intf::NOISE_CLUSTER;

    fn row(exe: &str, mode: IoMode, cluster: i64, start: u64, end: u64) -> ClusterAssignment {
        ClusterAssignment {
            run_id: format!("1-{}-{}", exe, start),
            exe: exe.to_string(),
            mode,
            cluster,
            distance: 0.0,
            group_size: 0,
            cluster_size: 0,
            start_time: start,
            end_time: end,
        }
    }

    #[test]
    fn test_span_bucket() {
        assert_eq!(span_bucket(0.0), "<1d");
        assert_eq!(span_bucket(1.0), "1-3d");
        assert_eq!(span_bucket(10.0), "1w-2w");
        assert_eq!(span_bucket(14.5), "1w-2w");
        assert_eq!(span_bucket(15.0), "2w-1M");
        assert_eq!(span_bucket(29.9), "2w-1M");
        assert_eq!(span_bucket(30.0), "1-3M");
        assert_eq!(span_bucket(400.0), ">6M");
    }

    #[test]
    fn test_study() {
        let day = 86400;
        let rows = vec![
            // Daily runs, listed out of order.
            row("simA", IoMode::Read, 0, 2 * day, 2 * day + 100),
            row("simA", IoMode::Read, 0, 0, 100),
            row("simA", IoMode::Read, 0, day, day + 100),
            // Short lived burst.
            row("simA", IoMode::Read, 1, 1000, 1100),
            row("simA", IoMode::Read, 1, 1200, 1300),
            row("simA", IoMode::Read, NOISE_CLUSTER, 5000, 5100),
            // Same local id in a different application.
            row("simB", IoMode::Read, 0, 0, 10 * day),
            row("simB", IoMode::Read, 0, 0, 10 * day),
            row("simC", IoMode::Write, NOISE_CLUSTER, 0, 10),
        ];

        let rep = study_clusters(&rows);
        let read = &rep.modes["Read"];
        assert_eq!(read.nr_apps, 2);
        assert_eq!(read.nr_clusters, 3);
        assert_eq!(read.noise_runs, 1);
        assert_eq!(read.clusters_per_app["mean"], 1.5);
        assert!((read.runs_per_cluster["mean"] - 7.0 / 3.0).abs() < 1e-9);

        let daily = &read.clusters[0];
        assert_eq!((daily.exe.as_str(), daily.cluster), ("simA", 0));
        assert_eq!(daily.span, 2 * day + 100);
        assert_eq!(daily.inter_arrival_cov, Some(0.0));
        let rpd = daily.runs_per_day.unwrap();
        assert!((rpd - 3.0 / ((2 * day + 100) as f64 / 86400.0)).abs() < 1e-9);

        let burst = &read.clusters[1];
        assert_eq!(burst.span, 300);
        assert_eq!(burst.inter_arrival_cov, Some(0.0));

        // Both simB runs start together, gap |end - start| is ten days.
        let simb = &read.clusters[2];
        assert_eq!(simb.exe, "simB");
        assert_eq!(simb.span, 10 * day);

        let buckets: BTreeMap<String, usize> = read.span_buckets.iter().cloned().collect();
        assert_eq!(buckets["<1d"], 1);
        assert_eq!(buckets["1-3d"], 1);
        assert_eq!(buckets["1w-2w"], 1);

        let write = &rep.modes["Write"];
        assert_eq!(write.nr_apps, 1);
        assert_eq!(write.nr_clusters, 0);
        assert_eq!(write.noise_runs, 1);
        assert_eq!(write.runs_per_cluster["mean"], 0.0);

        let text = format_study(&rep, false);
        assert!(text.contains("Read: 2 applications, 3 clusters"));
        assert!(!text.contains("simB/0"));
        let text = format_study(&rep, true);
        assert!(text.contains("simB/0"));
        assert!(text.contains("span=10.0D"));
    }

    #[test]
    fn test_inter_arrival_cov() {
        let rows = vec![
            row("a", IoMode::Read, 0, 0, 10),
            row("a", IoMode::Read, 0, 10, 20),
            row("a", IoMode::Read, 0, 20, 60),
        ];
        let refs: Vec<&ClusterAssignment> = rows.iter().collect();
        // Gaps are 20 and 50, mean 35, population stdev 15.
        let cov = inter_arrival_cov(&refs).unwrap();
        assert!((cov - 15.0 / 35.0 * 100.0).abs() < 1e-9);
        assert_eq!(inter_arrival_cov(&refs[..1]), None);
    }
}
