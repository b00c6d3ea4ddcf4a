// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use log::info;
use simplelog as sl;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{atomic, Mutex};
use std::time::{Duration, UNIX_EPOCH};

pub mod json_file;

pub use json_file::{
    JsonArgs, JsonArgsHelper, JsonConfigFile, JsonLoad, JsonReportFile, JsonSave,
};

pub const TO_PCT: f64 = 100.0;
pub const SECS_PER_DAY: f64 = 86400.0;

lazy_static::lazy_static! {
    pub static ref NR_SYSTEM_CPUS: usize = ::num_cpus::get();
    static ref NR_CPUS: atomic::AtomicUsize = atomic::AtomicUsize::new(0);
}

/// Number of cpus to size worker pools with. Defaults to the detected host
/// core count unless overridden with `override_system_configuration()`.
pub fn nr_cpus() -> usize {
    match NR_CPUS.load(atomic::Ordering::Relaxed) {
        0 => *NR_SYSTEM_CPUS,
        v => v,
    }
}

pub fn override_system_configuration(nr_cpus: Option<usize>) {
    let nr_cpus = nr_cpus.unwrap_or(0);
    NR_CPUS.store(nr_cpus, atomic::Ordering::Relaxed);
    if nr_cpus > 0 {
        info!(
            "System configuration overrides: cpus={}->{}",
            *NR_SYSTEM_CPUS, nr_cpus
        );
    }
}

pub fn full_version(semver: &str) -> String {
    format!("{} {}", semver, env!("VERGEN_CARGO_TARGET_TRIPLE"))
}

fn format_count_internal<T>(count: T, zero: &str) -> String
where
    T: num::ToPrimitive,
{
    let format_count_helper = |count: u64, zeroes: u32, suffix: &str| -> Option<String> {
        let unit: u64 = 10_u64.pow(zeroes);

        if (count as f64 / unit as f64) < 99.95 {
            Some(format!(
                "{:.1}{}",
                (count as f64 / unit as f64).max(0.1),
                suffix
            ))
        } else if (count as f64 / unit as f64) < 1000.0 {
            Some(format!("{:.0}{}", count as f64 / unit as f64, suffix))
        } else {
            None
        }
    };

    let count = count.to_u64().unwrap_or(0);

    if count == 0 {
        zero.to_string()
    } else if count < 1000 {
        format!("{}", count)
    } else {
        format_count_helper(count, 3, "k")
            .or_else(|| format_count_helper(count, 6, "m"))
            .or_else(|| format_count_helper(count, 9, "g"))
            .or_else(|| format_count_helper(count, 12, "p"))
            .or_else(|| format_count_helper(count, 15, "e"))
            .unwrap_or_else(|| "INF".into())
    }
}

pub fn format_count<T>(count: T) -> String
where
    T: num::ToPrimitive,
{
    format_count_internal(count, "0")
}

fn format_duration_internal(dur: f64, zero: &str) -> String {
    let format_nsecs_helper = |nsecs: u64, unit: u64, max: u64, suffix: &str| -> Option<String> {
        if nsecs == 0 {
            Some(zero.to_string())
        } else if (nsecs as f64 / unit as f64) < 99.95 {
            Some(format!(
                "{:.1}{}",
                (nsecs as f64 / unit as f64).max(0.1),
                suffix
            ))
        } else if (nsecs as f64 / unit as f64) < max as f64 {
            Some(format!("{:.0}{}", nsecs as f64 / unit as f64, suffix))
        } else {
            None
        }
    };

    let nsecs = (dur * 1_000_000_000.0).round() as u64;

    format_nsecs_helper(nsecs, 10_u64.pow(0), 1000, "n")
        .or_else(|| format_nsecs_helper(nsecs, 10_u64.pow(3), 1000, "u"))
        .or_else(|| format_nsecs_helper(nsecs, 10_u64.pow(6), 1000, "m"))
        .or_else(|| format_nsecs_helper(nsecs, 10_u64.pow(9), 60, "s"))
        .or_else(|| format_nsecs_helper(nsecs, 10_u64.pow(9) * 60, 60, "M"))
        .or_else(|| format_nsecs_helper(nsecs, 10_u64.pow(9) * 60 * 60, 24, "H"))
        .or_else(|| format_nsecs_helper(nsecs, 10_u64.pow(9) * 60 * 60 * 24, 365, "D"))
        .or_else(|| format_nsecs_helper(nsecs, 10_u64.pow(9) * 60 * 60 * 24 * 365, 1000, "Y"))
        .unwrap_or_else(|| "INF".into())
}

pub fn format_duration(dur: f64) -> String {
    format_duration_internal(dur, "0")
}

fn format_pct_internal(ratio: f64, zero: &str) -> String {
    let pct = ratio * TO_PCT;
    if pct < 0.0 {
        "NEG".into()
    } else if pct == 0.0 {
        zero.to_string()
    } else if pct < 99.995 {
        format!("{:.02}", pct)
    } else if pct < 999.95 {
        format!("{:.01}", pct)
    } else if pct < 99999.5 {
        format!("{:.0}", pct)
    } else if pct / 1000.0 < 99.995 {
        format!("{:.1}k", pct / 1000.0)
    } else if pct / 1000.0 < 9999.5 {
        format!("{:.0}k", pct / 1000.0)
    } else {
        "INF".into()
    }
}

pub fn format_pct(ratio: f64) -> String {
    format_pct_internal(ratio, "0")
}

pub fn format_percentile(pct: &str) -> String {
    match pct.parse::<f64>() {
        Ok(pctf) if pctf == 0.0 => "min".to_string(),
        Ok(pctf) if pctf == 100.0 => "max".to_string(),
        Ok(_) => format!("p{}", pct),
        _ => pct.to_string(),
    }
}

pub fn format_unix_time(time: u64) -> String {
    DateTime::<Local>::from(UNIX_EPOCH + Duration::from_secs(time))
        .format("%Y-%m-%d %T")
        .to_string()
}

pub fn format_period(per: (u64, u64)) -> String {
    format!(
        "{} - {} ({}-{})",
        format_unix_time(per.0),
        format_unix_time(per.1),
        per.0,
        per.1
    )
}

/// `PATH.staging` next to `PATH`. Files are written there first and then
/// renamed over `PATH` so that readers never see a partial file.
pub fn staging_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let mut st = path.as_ref().to_path_buf().into_os_string();
    st.push(".staging");
    PathBuf::from(st)
}

pub fn commit_staging<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    let staging = staging_path(path);
    fs::File::open(&staging)
        .and_then(|f| f.sync_all())
        .with_context(|| format!("Syncing {:?}", &staging))?;
    fs::rename(&staging, path)
        .with_context(|| format!("Renaming {:?} to {:?}", &staging, path))?;
    Ok(())
}

pub fn create_parent_dir<P: AsRef<Path>>(path: P) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Creating directory {:?}", parent))?;
        }
    }
    Ok(())
}

pub fn init_logging(verbosity: u32) {
    if std::env::var("RUST_LOG").is_ok() {
        env_logger::init();
    } else {
        let sl_level = match verbosity {
            0 | 1 => sl::LevelFilter::Info,
            2 => sl::LevelFilter::Debug,
            _ => sl::LevelFilter::Trace,
        };
        let mut lcfg = sl::ConfigBuilder::new();
        lcfg.set_time_level(sl::LevelFilter::Off)
            .set_location_level(sl::LevelFilter::Off)
            .set_target_level(sl::LevelFilter::Off)
            .set_thread_level(sl::LevelFilter::Off);
        if !console::user_attended_stderr()
            || sl::TermLogger::init(
                sl_level,
                lcfg.build(),
                sl::TerminalMode::Stderr,
                sl::ColorChoice::Auto,
            )
            .is_err()
        {
            let _ = sl::SimpleLogger::init(sl_level, lcfg.build());
        }
    }
}

struct GlobalProgState {
    exiting: bool,
}

lazy_static::lazy_static! {
    static ref PROG_STATE: Mutex<GlobalProgState> = Mutex::new(GlobalProgState {
        exiting: false,
    });
}

pub fn setup_prog_state() {
    ctrlc::set_handler(move || {
        info!("SIGINT/TERM received, exiting...");
        set_prog_exiting();
    })
    .expect("Error setting term handler");
}

pub fn set_prog_exiting() {
    PROG_STATE.lock().unwrap().exiting = true;
}

pub fn prog_exiting() -> bool {
    PROG_STATE.lock().unwrap().exiting
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_format_duration() {
        for pair in &[
            (0.000003932, "3.9u"),
            (0.00448, "4.5m"),
            (0.3, "300m"),
            (2042.0, "34.0M"),
            (3456000.0, "40.0D"),
            (60480000.0, "1.9Y"),
        ] {
            let result = super::format_duration(pair.0);
            assert_eq!(&result, pair.1);
            println!("{} -> {} ({})", pair.0, &result, pair.1);
        }
    }

    #[test]
    fn test_format_count_and_pct() {
        assert_eq!(super::format_count(0), "0");
        assert_eq!(super::format_count(999), "999");
        assert_eq!(super::format_count(12_345), "12.3k");
        assert_eq!(super::format_pct(0.25), "25.00");
        assert_eq!(super::format_percentile("00"), "min");
        assert_eq!(super::format_percentile("95"), "p95");
        assert_eq!(super::format_percentile("mean"), "mean");
    }

    #[test]
    fn test_staging_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("out.json");
        super::create_parent_dir(&path).unwrap();

        let staging = super::staging_path(&path);
        assert_eq!(staging, dir.path().join("sub").join("out.json.staging"));

        std::fs::write(&staging, "hello").unwrap();
        super::commit_staging(&path).unwrap();
        assert!(!staging.exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }
}
