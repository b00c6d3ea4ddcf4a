// Copyright (c) Facebook, Inc. and its affiliates.

//! Parquet persistence for the feature and cluster tables.
//!
//! Every write goes to `PATH.staging` first and is renamed over `PATH` once
//! the parquet footer is on disk, so readers only ever see whole tables.
use anyhow::{anyhow, Context, Result};
use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use log::debug;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use iopat_intf::{ClusterAssignment, Counter, IoMode, RunRecord};
use iopat_util::*;

fn run_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("run_id", DataType::Utf8, false),
        Field::new("uid", DataType::UInt64, false),
        Field::new("exe", DataType::Utf8, false),
        Field::new("jobid", DataType::UInt64, true),
        Field::new("start_time", DataType::UInt64, false),
        Field::new("end_time", DataType::UInt64, false),
        Field::new("bytes_read", DataType::UInt64, true),
        Field::new("bytes_written", DataType::UInt64, true),
        Field::new("io_time", DataType::Float64, true),
        Field::new("opens", DataType::UInt64, true),
        Field::new("reads", DataType::UInt64, true),
        Field::new("writes", DataType::UInt64, true),
        Field::new("seq_ratio", DataType::Float64, true),
        Field::new("mean_req_size", DataType::Float64, true),
        Field::new("nprocs", DataType::UInt64, true),
        Field::new("nnodes", DataType::UInt64, true),
    ]))
}

/// Column names follow what downstream notebooks expect of a cluster
/// table.
fn cluster_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("run_id", DataType::Utf8, false),
        Field::new("application", DataType::Utf8, false),
        Field::new("operation", DataType::Utf8, false),
        Field::new("cluster", DataType::Int64, false),
        Field::new("distance", DataType::Float64, false),
        Field::new("group_size", DataType::UInt64, false),
        Field::new("cluster_size", DataType::UInt64, false),
        Field::new("start_time", DataType::UInt64, false),
        Field::new("end_time", DataType::UInt64, false),
    ]))
}

fn u64_col<F: Fn(&RunRecord) -> Counter<u64>>(rows: &[RunRecord], f: F) -> ArrayRef {
    Arc::new(UInt64Array::from(
        rows.iter().map(|r| f(r).as_option()).collect::<Vec<_>>(),
    ))
}

fn f64_col<F: Fn(&RunRecord) -> Counter<f64>>(rows: &[RunRecord], f: F) -> ArrayRef {
    Arc::new(Float64Array::from(
        rows.iter().map(|r| f(r).as_option()).collect::<Vec<_>>(),
    ))
}

fn write_batch(path: &Path, batch: &RecordBatch) -> Result<()> {
    create_parent_dir(path)?;
    let staging = staging_path(path);
    let file = fs::File::create(&staging).with_context(|| format!("Creating {:?}", &staging))?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;

    commit_staging(path)?;
    debug!("table: Wrote {} rows to {:?}", batch.num_rows(), path);
    Ok(())
}

fn read_batches(path: &Path) -> Result<Vec<RecordBatch>> {
    let file = fs::File::open(path).with_context(|| format!("Opening {:?}", path))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("Reading parquet metadata of {:?}", path))?
        .build()?;
    let mut batches = vec![];
    for batch in reader {
        batches.push(batch.with_context(|| format!("Reading {:?}", path))?);
    }
    Ok(batches)
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    let col = batch
        .column_by_name(name)
        .ok_or_else(|| anyhow!("missing column {:?}", name))?;
    col.as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| anyhow!("column {:?} has unexpected type {:?}", name, col.data_type()))
}

fn opt_u64(col: &UInt64Array, idx: usize) -> Counter<u64> {
    if col.is_null(idx) {
        Counter::Missing
    } else {
        Counter::Reported(col.value(idx))
    }
}

fn opt_f64(col: &Float64Array, idx: usize) -> Counter<f64> {
    if col.is_null(idx) {
        Counter::Missing
    } else {
        Counter::Reported(col.value(idx))
    }
}

/// Write the feature table. `Counter::Missing` is stored as null.
pub fn write_runs<P: AsRef<Path>>(path: P, rows: &[RunRecord]) -> Result<()> {
    let batch = RecordBatch::try_new(
        run_schema(),
        vec![
            Arc::new(StringArray::from(
                rows.iter().map(|r| r.run_id.as_str()).collect::<Vec<_>>(),
            )),
            Arc::new(UInt64Array::from(
                rows.iter().map(|r| r.uid).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                rows.iter().map(|r| r.exe.as_str()).collect::<Vec<_>>(),
            )),
            Arc::new(UInt64Array::from(
                rows.iter().map(|r| r.jobid).collect::<Vec<_>>(),
            )),
            Arc::new(UInt64Array::from(
                rows.iter().map(|r| r.start_time).collect::<Vec<_>>(),
            )),
            Arc::new(UInt64Array::from(
                rows.iter().map(|r| r.end_time).collect::<Vec<_>>(),
            )),
            u64_col(rows, |r| r.bytes_read),
            u64_col(rows, |r| r.bytes_written),
            f64_col(rows, |r| r.io_time),
            u64_col(rows, |r| r.opens),
            u64_col(rows, |r| r.reads),
            u64_col(rows, |r| r.writes),
            f64_col(rows, |r| r.seq_ratio),
            f64_col(rows, |r| r.mean_req_size),
            u64_col(rows, |r| r.nprocs),
            u64_col(rows, |r| r.nnodes),
        ],
    )?;
    write_batch(path.as_ref(), &batch)
}

pub fn read_runs<P: AsRef<Path>>(path: P) -> Result<Vec<RunRecord>> {
    let mut rows = vec![];
    for batch in read_batches(path.as_ref())?.iter() {
        let run_id = column::<StringArray>(batch, "run_id")?;
        let uid = column::<UInt64Array>(batch, "uid")?;
        let exe = column::<StringArray>(batch, "exe")?;
        let jobid = column::<UInt64Array>(batch, "jobid")?;
        let start_time = column::<UInt64Array>(batch, "start_time")?;
        let end_time = column::<UInt64Array>(batch, "end_time")?;
        let bytes_read = column::<UInt64Array>(batch, "bytes_read")?;
        let bytes_written = column::<UInt64Array>(batch, "bytes_written")?;
        let io_time = column::<Float64Array>(batch, "io_time")?;
        let opens = column::<UInt64Array>(batch, "opens")?;
        let reads = column::<UInt64Array>(batch, "reads")?;
        let writes = column::<UInt64Array>(batch, "writes")?;
        let seq_ratio = column::<Float64Array>(batch, "seq_ratio")?;
        let mean_req_size = column::<Float64Array>(batch, "mean_req_size")?;
        let nprocs = column::<UInt64Array>(batch, "nprocs")?;
        let nnodes = column::<UInt64Array>(batch, "nnodes")?;

        for i in 0..batch.num_rows() {
            rows.push(RunRecord {
                run_id: run_id.value(i).to_string(),
                uid: uid.value(i),
                exe: exe.value(i).to_string(),
                jobid: opt_u64(jobid, i).as_option(),
                start_time: start_time.value(i),
                end_time: end_time.value(i),
                bytes_read: opt_u64(bytes_read, i),
                bytes_written: opt_u64(bytes_written, i),
                io_time: opt_f64(io_time, i),
                opens: opt_u64(opens, i),
                reads: opt_u64(reads, i),
                writes: opt_u64(writes, i),
                seq_ratio: opt_f64(seq_ratio, i),
                mean_req_size: opt_f64(mean_req_size, i),
                nprocs: opt_u64(nprocs, i),
                nnodes: opt_u64(nnodes, i),
            });
        }
    }
    Ok(rows)
}

pub fn write_clusters<P: AsRef<Path>>(path: P, rows: &[ClusterAssignment]) -> Result<()> {
    let batch = RecordBatch::try_new(
        cluster_schema(),
        vec![
            Arc::new(StringArray::from(
                rows.iter().map(|r| r.run_id.as_str()).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                rows.iter().map(|r| r.exe.as_str()).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                rows.iter().map(|r| r.mode.name()).collect::<Vec<_>>(),
            )),
            Arc::new(Int64Array::from(
                rows.iter().map(|r| r.cluster).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(
                rows.iter().map(|r| r.distance).collect::<Vec<_>>(),
            )),
            Arc::new(UInt64Array::from(
                rows.iter().map(|r| r.group_size as u64).collect::<Vec<_>>(),
            )),
            Arc::new(UInt64Array::from(
                rows.iter().map(|r| r.cluster_size as u64).collect::<Vec<_>>(),
            )),
            Arc::new(UInt64Array::from(
                rows.iter().map(|r| r.start_time).collect::<Vec<_>>(),
            )),
            Arc::new(UInt64Array::from(
                rows.iter().map(|r| r.end_time).collect::<Vec<_>>(),
            )),
        ],
    )?;
    write_batch(path.as_ref(), &batch)
}

pub fn read_clusters<P: AsRef<Path>>(path: P) -> Result<Vec<ClusterAssignment>> {
    let mut rows = vec![];
    for batch in read_batches(path.as_ref())?.iter() {
        let run_id = column::<StringArray>(batch, "run_id")?;
        let application = column::<StringArray>(batch, "application")?;
        let operation = column::<StringArray>(batch, "operation")?;
        let cluster = column::<Int64Array>(batch, "cluster")?;
        let distance = column::<Float64Array>(batch, "distance")?;
        let group_size = column::<UInt64Array>(batch, "group_size")?;
        let cluster_size = column::<UInt64Array>(batch, "cluster_size")?;
        let start_time = column::<UInt64Array>(batch, "start_time")?;
        let end_time = column::<UInt64Array>(batch, "end_time")?;

        for i in 0..batch.num_rows() {
            rows.push(ClusterAssignment {
                run_id: run_id.value(i).to_string(),
                exe: application.value(i).to_string(),
                mode: IoMode::parse(operation.value(i))?,
                cluster: cluster.value(i),
                distance: distance.value(i),
                group_size: group_size.value(i) as usize,
                cluster_size: cluster_size.value(i) as usize,
                start_time: start_time.value(i),
                end_time: end_time.value(i),
            });
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::run_record;
    use iopat_intf::NOISE_CLUSTER;

    #[test]
    fn test_runs_missing_as_null() {
        let _ = env_logger::try_init();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_info.parquet");

        let mut a = run_record(1001, "simA", 100, 4096, 0);
        a.jobid = Some(17);
        a.seq_ratio = Counter::Reported(0.25);
        let mut b = run_record(1001, "simA", 200, 0, 0);
        b.bytes_written = Counter::Missing;
        b.io_time = Counter::Missing;
        let rows = vec![a, b];

        write_runs(&path, &rows).unwrap();
        assert!(!staging_path(&path).exists());

        let loaded = read_runs(&path).unwrap();
        assert_eq!(loaded, rows);
        assert_eq!(loaded[1].bytes_read, Counter::Reported(0));
        assert_eq!(loaded[1].bytes_written, Counter::Missing);
    }

    #[test]
    fn test_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("empty.parquet");
        write_runs(&path, &[]).unwrap();
        assert_eq!(read_runs(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_clusters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster_info.parquet");
        let rows = vec![
            ClusterAssignment {
                run_id: "1-simA-5".into(),
                exe: "simA".into(),
                mode: IoMode::Read,
                cluster: 0,
                distance: 0.5,
                group_size: 6,
                cluster_size: 5,
                start_time: 5,
                end_time: 9,
            },
            ClusterAssignment {
                run_id: "1-simA-6".into(),
                exe: "simA".into(),
                mode: IoMode::Write,
                cluster: NOISE_CLUSTER,
                distance: 2.0,
                group_size: 6,
                cluster_size: 1,
                start_time: 6,
                end_time: 6,
            },
        ];
        write_clusters(&path, &rows).unwrap();
        assert_eq!(read_clusters(&path).unwrap(), rows);
    }
}
