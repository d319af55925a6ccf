use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate};
use serde::Serialize;
use tracing::{debug, warn};

const SEPARATOR_WIDTH: usize = 80;
const LOG_PREFIX: &str = "cron_";
const LOG_SUFFIX: &str = ".log";

fn separator() -> String {
    "=".repeat(SEPARATOR_WIDTH)
}

fn now_stamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn log_file_name(date: NaiveDate) -> String {
    format!("{LOG_PREFIX}{}{LOG_SUFFIX}", date.format("%y%m%d"))
}

fn date_from_file_name(name: &str) -> Option<NaiveDate> {
    let stamp = name.strip_prefix(LOG_PREFIX)?.strip_suffix(LOG_SUFFIX)?;
    NaiveDate::parse_from_str(stamp, "%y%m%d").ok()
}

/// Append-only daily execution log. Every run is framed by a start block
/// and an end block, each carrying one separator line.
pub struct RunLog {
    path: PathBuf,
    file: File,
}

impl RunLog {
    pub fn open(dir: &Path, today: NaiveDate) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join(log_file_name(today));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn begin(&mut self, command: &str) -> Result<()> {
        let block = format!(
            "{}\n실행 시작: {}\n명령: {command}\n",
            separator(),
            now_stamp()
        );
        self.write(&block)
    }

    pub fn line(&mut self, message: &str) -> Result<()> {
        self.write(&format!("[{}] {message}\n", now_stamp()))
    }

    /// Like `line`, but a failed append is only reported through tracing.
    pub fn note(&mut self, message: &str) {
        if let Err(error) = self.line(message) {
            warn!(error = %format!("{error:#}"), "failed to write execution log");
        }
    }

    pub fn finish(&mut self, exit_code: i32) -> Result<()> {
        let block = format!(
            "실행 종료: {}\n종료 코드: {exit_code}\n{}\n",
            now_stamp(),
            separator()
        );
        self.write(&block)
    }

    fn write(&mut self, text: &str) -> Result<()> {
        self.file
            .write_all(text.as_bytes())
            .with_context(|| format!("failed to append to {}", self.path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogSummary {
    pub date: NaiveDate,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub executions: usize,
}

pub struct LogMaintenance {
    dir: PathBuf,
}

impl LogMaintenance {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Newest first; days without a log file are omitted.
    pub fn summaries(&self, days_back: u32, today: NaiveDate) -> Vec<LogSummary> {
        let mut output = Vec::new();
        for offset in 0..i64::from(days_back) {
            let date = today - Duration::days(offset);
            let path = self.dir.join(log_file_name(date));
            let Ok(metadata) = fs::metadata(&path) else {
                continue;
            };
            let executions = fs::read_to_string(&path)
                .map(|content| content.matches(&separator()).count() / 2)
                .unwrap_or(0);
            output.push(LogSummary {
                date,
                path,
                size_bytes: metadata.len(),
                executions,
            });
        }
        output
    }

    pub fn path_for(&self, days_back: u32, today: NaiveDate) -> PathBuf {
        self.dir
            .join(log_file_name(today - Duration::days(i64::from(days_back))))
    }

    pub fn read_today(&self, today: NaiveDate) -> Result<Option<String>> {
        let path = self.dir.join(log_file_name(today));
        if !path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&path)
            .map(Some)
            .with_context(|| format!("failed to read {}", path.display()))
    }

    /// Delete `cron_*.log` files dated before `today - keep_days`. Files whose
    /// names do not parse as a date are left alone.
    pub fn cleanup(&self, keep_days: u32, today: NaiveDate) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let cutoff = today - Duration::days(i64::from(keep_days));
        let mut removed = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("failed to list {}", self.dir.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("failed to list {}", self.dir.display()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(LOG_PREFIX) || !name.ends_with(LOG_SUFFIX) {
                continue;
            }
            let Some(date) = date_from_file_name(&name) else {
                warn!(file = %name, "skipping log file with unparseable date");
                continue;
            };
            if date < cutoff {
                let path = entry.path();
                fs::remove_file(&path)
                    .with_context(|| format!("failed to delete {}", path.display()))?;
                debug!(file = %name, "deleted old log file");
                removed.push(path);
            }
        }
        removed.sort();
        Ok(removed)
    }
}

/// Incremental reader over a growing log file. Each `read_new` returns only
/// the bytes appended since the previous call; a truncated file is reread
/// from the start.
pub struct LogFollower {
    path: PathBuf,
    offset: u64,
}

impl LogFollower {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_new(&mut self) -> Result<String> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
            Err(error) => {
                return Err(error).with_context(|| format!("failed to open {}", self.path.display()));
            }
        };
        let len = file
            .metadata()
            .with_context(|| format!("failed to stat {}", self.path.display()))?
            .len();
        if len < self.offset {
            debug!(path = %self.path.display(), "log file truncated; rereading");
            self.offset = 0;
        }
        file.seek(SeekFrom::Start(self.offset))
            .with_context(|| format!("failed to seek {}", self.path.display()))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        self.offset += bytes.len() as u64;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn file_name_uses_two_digit_year() {
        assert_eq!(log_file_name(date(2025, 7, 24)), "cron_250724.log");
        assert_eq!(date_from_file_name("cron_250724.log"), Some(date(2025, 7, 24)));
        assert_eq!(date_from_file_name("cron_latest.log"), None);
    }

    #[test]
    fn runs_append_framed_blocks() {
        let temp = tempdir().expect("tempdir");
        let today = date(2025, 7, 24);
        for code in [0, 1] {
            let mut log = RunLog::open(temp.path(), today).expect("open");
            log.begin("run update").expect("begin");
            log.line("tickets: 3").expect("line");
            log.finish(code).expect("finish");
        }

        let maintenance = LogMaintenance::new(temp.path());
        let content = maintenance.read_today(today).expect("read").expect("present");
        assert_eq!(content.matches("실행 시작").count(), 2);
        assert!(content.contains("명령: run update"));
        assert!(content.contains("] tickets: 3"));
        assert!(content.contains("종료 코드: 1"));

        let summaries = maintenance.summaries(7, today);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].executions, 2);
        assert!(summaries[0].size_bytes > 0);
    }

    #[test]
    fn follower_returns_only_appended_text() {
        let temp = tempdir().expect("tempdir");
        let today = date(2025, 7, 24);
        let maintenance = LogMaintenance::new(temp.path());
        let mut follower = LogFollower::new(maintenance.path_for(0, today));
        assert_eq!(follower.read_new().expect("missing file"), "");

        let mut log = RunLog::open(temp.path(), today).expect("open");
        log.begin("run update").expect("begin");
        let first = follower.read_new().expect("first read");
        assert!(first.contains("명령: run update"));
        assert_eq!(follower.read_new().expect("idle read"), "");

        log.line("tickets: 3").expect("line");
        let second = follower.read_new().expect("second read");
        assert!(second.ends_with("] tickets: 3\n"));
        assert!(!second.contains("명령"));

        fs::write(follower.path(), "fresh\n").expect("truncate");
        assert_eq!(follower.read_new().expect("after truncate"), "fresh\n");
    }

    #[test]
    fn path_for_counts_days_back() {
        let maintenance = LogMaintenance::new("logs");
        assert_eq!(
            maintenance.path_for(2, date(2025, 8, 1)),
            PathBuf::from("logs").join("cron_250730.log")
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn note_swallows_write_failures() {
        if !Path::new("/dev/full").exists() {
            return;
        }
        let temp = tempdir().expect("tempdir");
        let today = date(2025, 7, 24);
        std::os::unix::fs::symlink("/dev/full", temp.path().join(log_file_name(today)))
            .expect("symlink");
        let mut log = RunLog::open(temp.path(), today).expect("open");
        assert!(log.line("tickets: 3").is_err());
        log.note("tickets: 3");
    }

    #[test]
    fn read_today_is_none_without_a_file() {
        let temp = tempdir().expect("tempdir");
        let maintenance = LogMaintenance::new(temp.path());
        assert!(maintenance.read_today(date(2025, 7, 24)).expect("read").is_none());
    }

    #[test]
    fn cleanup_deletes_only_old_dated_logs() {
        let temp = tempdir().expect("tempdir");
        let today = date(2025, 7, 24);
        for name in [
            "cron_250724.log",
            "cron_250624.log",
            "cron_250601.log",
            "cron_garbage.log",
            "notes.txt",
        ] {
            fs::write(temp.path().join(name), "x").expect("seed");
        }

        let removed = LogMaintenance::new(temp.path())
            .cleanup(30, today)
            .expect("cleanup");
        let names = removed
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["cron_250601.log".to_string()]);
        assert!(temp.path().join("cron_250624.log").exists());
        assert!(temp.path().join("cron_garbage.log").exists());
        assert!(temp.path().join("notes.txt").exists());
    }
}
