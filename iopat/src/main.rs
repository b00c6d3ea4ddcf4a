// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::{anyhow, Result};
use log::{error, info};
use std::process::exit;
use std::sync::Arc;

use iopat::cluster::{self, ClusterConfig};
use iopat::extract::{self, ExtractConfig, ExtractOutput};
use iopat::study;
use iopat::table;
use iopat::Dbscan;
use iopat_intf::{Args, ClusterAssignment, Mode, RunRecord, FULL_VERSION};
use iopat_util::*;

fn run_extract(args: &Args) -> Result<ExtractOutput> {
    let input = args
        .input
        .as_ref()
        .ok_or_else(|| anyhow!("--input is required for extraction"))?;
    let files = extract::list_input_files(input)?;

    let mut cfg = ExtractConfig::new(files, &args.feature_table, args.nr_workers());
    cfg.chunk_size = args.chunk_size;
    cfg.restart = args.restart;
    cfg.max_chunks = args.max_chunks;
    cfg.progress = args.verbosity == 0 && console::user_attended_stderr();

    let out = extract::extract(&cfg)?;
    print!("{}", extract::format_report(&out.report, args.verbosity > 0));
    Ok(out)
}

fn run_cluster(args: &Args, records: Option<Vec<RunRecord>>) -> Result<Vec<ClusterAssignment>> {
    let records = match records {
        Some(v) => v,
        None => table::read_runs(&args.feature_table)?,
    };
    let cfg = ClusterConfig {
        columns: args.columns.clone(),
        log_scale: args.log_scale,
        threshold: args.threshold,
        workers: args.nr_workers(),
    };
    let strategy = Arc::new(Dbscan::new(args.eps, args.min_samples));

    let out = cluster::run_clustering(&records, &cfg, strategy)?;
    table::write_clusters(&args.cluster_table, &out.rows)?;
    info!(
        "cluster: Wrote {} rows to {:?}",
        out.rows.len(),
        &args.cluster_table
    );
    print!("{}", cluster::format_report(&out.report, args.verbosity > 0));
    Ok(out.rows)
}

fn run_study(args: &Args, rows: Option<Vec<ClusterAssignment>>) -> Result<()> {
    let rows = match rows {
        Some(v) => v,
        None => table::read_clusters(&args.cluster_table)?,
    };
    let report = study::study_clusters(&rows);
    print!("{}", study::format_study(&report, args.verbosity > 0));

    if let Some(path) = args.study_report.as_ref() {
        JsonReportFile::with_data(Some(path), report).commit()?;
        info!("study: Wrote {:?}", path);
    }
    Ok(())
}

fn run_all(args: &Args) -> Result<()> {
    let out = run_extract(args)?;
    if !out.report.complete {
        info!("Extraction incomplete, skipping clustering");
        return Ok(());
    }
    println!();
    let rows = run_cluster(args, Some(out.records))?;
    println!();
    run_study(args, Some(rows))
}

fn main() {
    setup_prog_state();

    let args_file = match Args::init_args_and_logging() {
        Ok(v) => v,
        Err(e) => {
            error!("Failed to process args file ({:#})", &e);
            exit(1);
        }
    };
    let args = &args_file.data;
    info!("iopat {}", *FULL_VERSION);

    let result = match args.mode {
        Mode::Extract => run_extract(args).map(|_| ()),
        Mode::Cluster => run_cluster(args, None).map(|_| ()),
        Mode::Study => run_study(args, None),
        Mode::Run => run_all(args),
    };

    if let Err(e) = result {
        error!("{:#}", &e);
        exit(1);
    }
}
