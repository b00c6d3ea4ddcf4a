// Copyright (c) Facebook, Inc. and its affiliates.
use std::fs;
use std::path::{Path, PathBuf};

use iopat_intf::{Counter, RunRecord};

pub fn run_record(uid: u64, exe: &str, start: u64, bytes_read: u64, bytes_written: u64) -> RunRecord {
    RunRecord {
        run_id: RunRecord::make_run_id(uid, exe, start),
        uid,
        exe: exe.to_string(),
        jobid: None,
        start_time: start,
        end_time: start + 60,
        bytes_read: Counter::Reported(bytes_read),
        bytes_written: Counter::Reported(bytes_written),
        io_time: Counter::Reported(1.5),
        opens: Counter::Reported(4),
        reads: Counter::Reported(bytes_read / 4096),
        writes: Counter::Reported(bytes_written / 4096),
        seq_ratio: Counter::Missing,
        mean_req_size: Counter::Missing,
        nprocs: Counter::Reported(16),
        nnodes: Counter::Missing,
    }
}

pub fn totals_log(uid: u64, exe: &str, start: u64, bytes_read: u64, bytes_written: u64) -> String {
    format!(
        "# darshan log version: 3.41\n\
         # exe: /apps/{exe}/bin/{exe} -n 4\n\
         # uid: {uid}\n\
         # start_time: {start}\n\
         # end_time: {end}\n\
         # nprocs: 16\n\
         total_POSIX_OPENS: 4\n\
         total_POSIX_READS: {reads}\n\
         total_POSIX_WRITES: {writes}\n\
         total_POSIX_BYTES_READ: {bytes_read}\n\
         total_POSIX_BYTES_WRITTEN: {bytes_written}\n\
         total_POSIX_F_READ_TIME: 1.25\n",
        exe = exe,
        uid = uid,
        start = start,
        end = start + 60,
        reads = bytes_read / 4096,
        writes = bytes_written / 4096,
        bytes_read = bytes_read,
        bytes_written = bytes_written,
    )
}

pub fn write_log(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).unwrap();
    path
}
