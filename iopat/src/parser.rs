// Copyright (c) Facebook, Inc. and its affiliates.

//! Totals log parser.
//!
//! A totals log is the text dump of one profiled run with all per-file
//! records folded into job-wide totals. Only two kinds of lines matter:
//!
//! ```text
//! # exe: /apps/simA/bin/simA --input deck.in
//! total_POSIX_BYTES_READ: 1073741824
//! ```
//!
//! Everything else is ignored.
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use super::error::MalformedLog;
use iopat_intf::{Counter, RunRecord};

/// Modules whose counters are summed. MPIIO is layered over POSIX and
/// would double count.
const SUM_MODULES: &[&str] = &["POSIX", "STDIO"];
const SEQ_MODULE: &str = "POSIX";

struct Totals<'a> {
    headers: HashMap<&'a str, &'a str>,
    counters: HashMap<&'a str, &'a str>,
}

impl<'a> Totals<'a> {
    fn scan(text: &'a str) -> Self {
        let mut headers = HashMap::new();
        let mut counters = HashMap::new();

        for line in text.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix('#') {
                if let Some((key, val)) = rest.split_once(':') {
                    headers.entry(key.trim()).or_insert(val.trim());
                }
            } else if let Some(rest) = line.strip_prefix("total_") {
                if let Some((key, val)) = rest.split_once(':') {
                    counters.insert(key.trim(), val.trim());
                }
            }
        }

        Self { headers, counters }
    }

    fn header(&self, key: &str) -> Result<&'a str, MalformedLog> {
        match self.headers.get(key) {
            Some(v) if v.len() > 0 => Ok(*v),
            _ => Err(MalformedLog::new(key, "missing")),
        }
    }

    fn header_num<T: FromStr>(&self, key: &str) -> Result<T, MalformedLog> {
        let v = self.header(key)?;
        v.parse::<T>()
            .map_err(|_| MalformedLog::new(key, &format!("unparsable value {:?}", v)))
    }

    fn opt_header_num<T: FromStr>(&self, key: &str) -> Result<Option<T>, MalformedLog> {
        match self.headers.get(key) {
            Some(v) if v.len() > 0 => Ok(Some(self.header_num(key)?)),
            _ => Ok(None),
        }
    }

    /// Negative values are how the profiler marks a counter it couldn't
    /// collect and read as not reported.
    fn counter(&self, module: &str, name: &str) -> Result<Option<f64>, MalformedLog> {
        let key = format!("{}_{}", module, name);
        match self.counters.get(key.as_str()) {
            Some(v) => match v.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(if v >= 0.0 { Some(v) } else { None }),
                _ => Err(MalformedLog::new(
                    &format!("total_{}", &key),
                    &format!("unparsable value {:?}", v),
                )),
            },
            None => Ok(None),
        }
    }

    fn sum(&self, modules: &[&str], names: &[&str]) -> Result<Option<f64>, MalformedLog> {
        let mut acc = None;
        for module in modules {
            for name in names {
                if let Some(v) = self.counter(module, name)? {
                    acc = Some(acc.unwrap_or(0.0) + v);
                }
            }
        }
        Ok(acc)
    }
}

fn ratio(num: Option<f64>, den: Option<f64>) -> Counter<f64> {
    match (num, den) {
        (Some(num), Some(den)) if den > 0.0 => Counter::Reported(num / den),
        _ => Counter::Missing,
    }
}

fn as_u64(v: Option<f64>) -> Counter<u64> {
    Counter::from(v.map(|v| v.round() as u64))
}

/// Executable name is the basename of the first token of the command line.
fn exe_name(cmdline: &str) -> Result<String, MalformedLog> {
    let first = cmdline.split_whitespace().next().unwrap_or("");
    match Path::new(first).file_name() {
        Some(name) if name.len() > 0 => Ok(name.to_string_lossy().to_string()),
        _ => Err(MalformedLog::new(
            "exe",
            &format!("no executable in {:?}", cmdline),
        )),
    }
}

/// Parse one totals log. Either the whole record is produced or the log is
/// rejected.
pub fn parse_totals(text: &str) -> Result<RunRecord, MalformedLog> {
    let totals = Totals::scan(text);

    let exe = exe_name(totals.header("exe")?)?;
    let uid: u64 = totals.header_num("uid")?;
    let start_time: u64 = totals.header_num("start_time")?;
    let end_time: u64 = totals.header_num("end_time")?;
    if end_time < start_time {
        return Err(MalformedLog::new(
            "end_time",
            &format!("{} precedes start_time {}", end_time, start_time),
        ));
    }
    let jobid: Option<u64> = totals.opt_header_num("jobid")?;
    let nprocs: Option<u64> = totals.opt_header_num("nprocs")?;
    let nnodes: Option<u64> = totals.opt_header_num("nnodes")?;

    let bytes_read = totals.sum(SUM_MODULES, &["BYTES_READ"])?;
    let bytes_written = totals.sum(SUM_MODULES, &["BYTES_WRITTEN"])?;
    let io_time = totals.sum(SUM_MODULES, &["F_READ_TIME", "F_WRITE_TIME", "F_META_TIME"])?;
    let opens = totals.sum(SUM_MODULES, &["OPENS"])?;
    let reads = totals.sum(SUM_MODULES, &["READS"])?;
    let writes = totals.sum(SUM_MODULES, &["WRITES"])?;
    let ops = totals.sum(SUM_MODULES, &["READS", "WRITES"])?;

    let seq_ops = totals.sum(&[SEQ_MODULE], &["SEQ_READS", "SEQ_WRITES"])?;
    let seq_den = totals.sum(&[SEQ_MODULE], &["READS", "WRITES"])?;
    let seq_ratio = match ratio(seq_ops, seq_den) {
        Counter::Reported(v) => Counter::Reported(v.min(1.0)),
        Counter::Missing => Counter::Missing,
    };

    let bytes = match (bytes_read, bytes_written) {
        (None, None) => None,
        (r, w) => Some(r.unwrap_or(0.0) + w.unwrap_or(0.0)),
    };
    let mean_req_size = ratio(bytes, ops);

    Ok(RunRecord {
        run_id: RunRecord::make_run_id(uid, &exe, start_time),
        uid,
        exe,
        jobid,
        start_time,
        end_time,
        bytes_read: as_u64(bytes_read),
        bytes_written: as_u64(bytes_written),
        io_time: Counter::from(io_time),
        opens: as_u64(opens),
        reads: as_u64(reads),
        writes: as_u64(writes),
        seq_ratio,
        mean_req_size,
        nprocs: Counter::from(nprocs),
        nnodes: Counter::from(nnodes),
    })
}
