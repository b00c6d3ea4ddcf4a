// Copyright (c) Facebook, Inc. and its affiliates.
use log::error;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::process::exit;
use std::str::FromStr;

use super::FeatureColumn;
use iopat_util::*;

lazy_static::lazy_static! {
    static ref ARGS_STR: String = {
        let dfl_args = Args::default();
        format!(
            "-i, --input=[DIR]            'Directory of per-run totals logs, sorted by uid then executable'
             -f, --features=[FILE]        'Feature table parquet file (default: {dfl_features})'
             -c, --clusters=[FILE]        'Cluster table parquet file (default: {dfl_clusters})'
             -s, --study=[FILE]           'Cluster study json report, not written if unspecified'
             -w, --workers=[NR]           'Number of worker threads, 0 for one per cpu (default: {dfl_workers})'
             -C, --chunk-size=[NR]        'Logs per checkpointed chunk, 0 to derive from file and worker counts'
             -T, --threshold=[NR]         'Minimum number of runs for a group to be clustered (default: {dfl_threshold})'
             -F, --columns=[COLS]         'Comma separated clustering feature columns (default: {dfl_columns})'
                 --log-scale=[BOOL]       'Apply log10(1+x) to feature columns before normalization (default: {dfl_log_scale})'
                 --eps=[DIST]             'DBSCAN neighborhood radius in normalized units (default: {dfl_eps})'
                 --min-samples=[NR]       'DBSCAN neighbor count for a core run (default: {dfl_min_samples})'
             -a, --args=[FILE]            'Load base command line arguments from FILE'
                 --restart                'Discard the extraction checkpoint and start over'
                 --max-chunks=[NR]        'Commit at most NR chunks in this session and stop'
                 --nr-cpus=[NR]           'Override cpu count detection'
             -v...                        'Sets the level of verbosity'",
            dfl_features = &dfl_args.feature_table,
            dfl_clusters = &dfl_args.cluster_table,
            dfl_workers = nr_cpus(),
            dfl_threshold = dfl_args.threshold,
            dfl_columns = Args::format_columns(&dfl_args.columns),
            dfl_log_scale = dfl_args.log_scale,
            dfl_eps = dfl_args.eps,
            dfl_min_samples = dfl_args.min_samples,
        )
    };
}

const ARGS_DOC: &str = "\
//
// iopat command line arguments
//
// This file provides the base values for a subset of command line arguments.
// They can be overridden from command line.
//
//  mode: Extract, Cluster, Study or Run (extract then cluster then study)
//  input: Directory of per-run totals logs
//  feature_table: Extracted feature table, FILE.ckpt/ holds the checkpoint
//  cluster_table: Cluster assignment table
//  study_report: Cluster study report, skipped if null
//  workers: Number of worker threads, null for one per cpu
//  chunk_size: Logs per checkpointed chunk, null to derive
//  threshold: Groups with fewer runs are excluded from clustering
//  columns: Clustering feature columns
//  log_scale: Apply log10(1+x) to the columns before normalization
//  eps: DBSCAN neighborhood radius in normalized units
//  min_samples: DBSCAN neighbor count, including self, for a core run
//
";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Mode {
    Extract,
    Cluster,
    Study,
    Run,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Args {
    pub mode: Mode,
    pub input: Option<String>,
    pub feature_table: String,
    pub cluster_table: String,
    pub study_report: Option<String>,
    pub workers: Option<usize>,
    pub chunk_size: Option<usize>,
    pub threshold: usize,
    pub columns: Vec<FeatureColumn>,
    pub log_scale: bool,
    pub eps: f64,
    pub min_samples: usize,

    #[serde(skip)]
    pub restart: bool,
    #[serde(skip)]
    pub max_chunks: Option<usize>,
    #[serde(skip)]
    pub verbosity: u32,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            mode: Mode::Run,
            input: None,
            feature_table: Self::DFL_FEATURE_TABLE.into(),
            cluster_table: Self::DFL_CLUSTER_TABLE.into(),
            study_report: None,
            workers: None,
            chunk_size: None,
            threshold: Self::DFL_THRESHOLD,
            columns: FeatureColumn::DFL_SELECTION.to_vec(),
            log_scale: true,
            eps: Self::DFL_EPS,
            min_samples: Self::DFL_MIN_SAMPLES,
            restart: false,
            max_chunks: None,
            verbosity: 0,
        }
    }
}

impl Args {
    pub const DFL_FEATURE_TABLE: &'static str = "run_info.parquet";
    pub const DFL_CLUSTER_TABLE: &'static str = "cluster_info.parquet";
    pub const DFL_THRESHOLD: usize = 5;
    pub const DFL_EPS: f64 = 1.0;
    pub const DFL_MIN_SAMPLES: usize = 3;

    pub fn nr_workers(&self) -> usize {
        self.workers.unwrap_or_else(nr_cpus).max(1)
    }

    pub fn format_columns(cols: &[FeatureColumn]) -> String {
        cols.iter()
            .map(|c| c.name())
            .collect::<Vec<&str>>()
            .join(",")
    }

    fn parse_or_exit<T>(name: &str, v: &str) -> T
    where
        T: FromStr,
        T::Err: Display,
    {
        match v.parse::<T>() {
            Ok(v) => v,
            Err(e) => {
                error!("Invalid --{} value {:?} ({})", name, v, &e);
                exit(1);
            }
        }
    }

    /// `0` maps to `None` for knobs where zero means "pick automatically".
    fn parse_nonzero_or_exit(name: &str, v: &str) -> Option<usize> {
        match Self::parse_or_exit::<usize>(name, v) {
            0 => None,
            v => Some(v),
        }
    }
}

impl JsonLoad for Args {}

impl JsonSave for Args {
    fn preamble() -> Option<String> {
        Some(ARGS_DOC.to_string())
    }
}

impl JsonArgs for Args {
    #[allow(unknown_lints, dangerous_implicit_autorefs)]
    fn match_cmdline() -> clap::ArgMatches<'static> {
        clap::App::new("iopat")
            .version((*super::FULL_VERSION).as_str())
            .author(clap::crate_authors!("\n"))
            .about("Extracts per-run I/O features from HPC profiling logs and clusters them by application")
            .setting(clap::AppSettings::UnifiedHelpMessage)
            .setting(clap::AppSettings::DeriveDisplayOrder)
            .args_from_usage(&ARGS_STR)
            .subcommand(
                clap::SubCommand::with_name("extract")
                    .about("Extracts the feature table from the input logs, resuming from checkpoint"),
            )
            .subcommand(
                clap::SubCommand::with_name("cluster")
                    .about("Groups the feature table by application and I/O mode and clusters each group"),
            )
            .subcommand(
                clap::SubCommand::with_name("study")
                    .about("Studies cluster characteristics in the cluster table"),
            )
            .subcommand(
                clap::SubCommand::with_name("run")
                    .about("Runs extract, cluster and study in sequence"),
            )
            .get_matches()
    }

    fn verbosity(matches: &clap::ArgMatches) -> u32 {
        matches.occurrences_of("v") as u32
    }

    fn system_configuration_overrides(matches: &clap::ArgMatches) -> Option<usize> {
        matches
            .value_of("nr-cpus")
            .map(|v| Self::parse_or_exit::<usize>("nr-cpus", v))
    }

    fn process_cmdline(&mut self, matches: &clap::ArgMatches) -> bool {
        let dfl = Args::default();
        let mut updated_base = false;

        if let Some(v) = matches.value_of("input") {
            self.input = if v.len() > 0 {
                Some(v.to_string())
            } else {
                None
            };
            updated_base = true;
        }
        if let Some(v) = matches.value_of("features") {
            self.feature_table = if v.len() > 0 {
                v.to_string()
            } else {
                dfl.feature_table.clone()
            };
            updated_base = true;
        }
        if let Some(v) = matches.value_of("clusters") {
            self.cluster_table = if v.len() > 0 {
                v.to_string()
            } else {
                dfl.cluster_table.clone()
            };
            updated_base = true;
        }
        if let Some(v) = matches.value_of("study") {
            self.study_report = if v.len() > 0 {
                Some(v.to_string())
            } else {
                None
            };
            updated_base = true;
        }
        if let Some(v) = matches.value_of("workers") {
            self.workers = if v.len() > 0 {
                Self::parse_nonzero_or_exit("workers", v)
            } else {
                None
            };
            updated_base = true;
        }
        if let Some(v) = matches.value_of("chunk-size") {
            self.chunk_size = if v.len() > 0 {
                Self::parse_nonzero_or_exit("chunk-size", v)
            } else {
                None
            };
            updated_base = true;
        }
        if let Some(v) = matches.value_of("threshold") {
            self.threshold = if v.len() > 0 {
                Self::parse_or_exit::<usize>("threshold", v).max(1)
            } else {
                dfl.threshold
            };
            updated_base = true;
        }
        if let Some(v) = matches.value_of("columns") {
            self.columns = if v.len() > 0 {
                match FeatureColumn::parse_list(v) {
                    Ok(cols) => cols,
                    Err(e) => {
                        error!("Invalid --columns value {:?} ({})", v, &e);
                        exit(1);
                    }
                }
            } else {
                dfl.columns.clone()
            };
            updated_base = true;
        }
        if let Some(v) = matches.value_of("log-scale") {
            self.log_scale = if v.len() > 0 {
                Self::parse_or_exit::<bool>("log-scale", v)
            } else {
                dfl.log_scale
            };
            updated_base = true;
        }
        if let Some(v) = matches.value_of("eps") {
            self.eps = if v.len() > 0 {
                let eps = Self::parse_or_exit::<f64>("eps", v);
                if !(eps > 0.0) {
                    error!("--eps must be positive");
                    exit(1);
                }
                eps
            } else {
                dfl.eps
            };
            updated_base = true;
        }
        if let Some(v) = matches.value_of("min-samples") {
            self.min_samples = if v.len() > 0 {
                Self::parse_or_exit::<usize>("min-samples", v).max(1)
            } else {
                dfl.min_samples
            };
            updated_base = true;
        }

        if let Some(v) = matches.value_of("max-chunks") {
            self.max_chunks = Self::parse_nonzero_or_exit("max-chunks", v);
        }
        self.restart = matches.is_present("restart");
        self.verbosity = Self::verbosity(matches);

        let mode = match matches.subcommand() {
            ("extract", Some(_)) => Some(Mode::Extract),
            ("cluster", Some(_)) => Some(Mode::Cluster),
            ("study", Some(_)) => Some(Mode::Study),
            ("run", Some(_)) => Some(Mode::Run),
            _ => None,
        };
        if let Some(mode) = mode {
            if self.mode != mode {
                self.mode = mode;
                updated_base = true;
            }
        }

        match self.mode {
            Mode::Extract | Mode::Run if self.input.is_none() => {
                error!("{:?} requires --input", &self.mode);
                exit(1);
            }
            _ => {}
        }

        updated_base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_json_defaults() {
        let args: Args = serde_json::from_str(r#"{ "threshold": 7, "columns": ["io_time"] }"#).unwrap();
        assert_eq!(args.threshold, 7);
        assert_eq!(args.columns, vec![FeatureColumn::IoTime]);
        assert_eq!(args.feature_table, Args::DFL_FEATURE_TABLE);
        assert_eq!(args.eps, Args::DFL_EPS);
        assert_eq!(args.mode, Mode::Run);
        assert!(!args.restart);
    }

    #[test]
    fn test_nr_workers() {
        let mut args = Args::default();
        args.workers = Some(3);
        assert_eq!(args.nr_workers(), 3);
        args.workers = None;
        assert!(args.nr_workers() >= 1);
        assert_eq!(
            Args::format_columns(&[FeatureColumn::BytesRead, FeatureColumn::Opens]),
            "bytes_read,opens"
        );
    }
}
