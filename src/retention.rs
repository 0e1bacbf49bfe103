//! Housekeeping for aged log files: deletion past the retention window and
//! gzip compression past the compaction window.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::config::LogConfig;
use crate::error::{Error, Result};
use crate::rotation::{is_log_file, COMPRESSED_SUFFIX, FILE_SUFFIX};

const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(24 * 3600);

/// Age thresholds applied by a sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionRules {
    /// Files older than this many days are deleted.
    pub retention_days: Option<u32>,
    /// Files older than this many hours are compressed.
    pub compact_after_hours: Option<u32>,
    /// Files below this size are never compressed; `0` means no floor.
    pub compact_min_bytes: u64,
}

impl RetentionRules {
    pub fn from_config(cfg: &LogConfig) -> Self {
        Self {
            retention_days: cfg.file_max_remain_days,
            compact_after_hours: cfg.compress_frequent_hours,
            compact_min_bytes: cfg.compress_after_reach_bytes,
        }
    }

    fn retention(&self) -> Option<Duration> {
        self.retention_days.filter(|d| *d > 0).map(|d| DAY * d)
    }

    fn compaction(&self) -> Option<Duration> {
        self.compact_after_hours.filter(|h| *h > 0).map(|h| HOUR * h)
    }

    pub fn is_noop(&self) -> bool {
        self.retention().is_none() && self.compaction().is_none()
    }
}

/// What a sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// The sweep did not run because another one was in progress.
    pub skipped: bool,
    pub scanned: usize,
    pub deleted: usize,
    pub compressed: usize,
    pub failed: usize,
}

/// Runs sweeps, never more than one at a time.
#[derive(Debug, Default)]
pub struct RetentionSweeper {
    running: AtomicBool,
}

impl RetentionSweeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Scan `base_dir` recursively and apply `rules` to every file written
    /// under `prefix`. `active` names the file the writer currently holds
    /// open; it is never touched.
    ///
    /// Per-file failures are reported and counted; the walk continues.
    pub fn sweep(
        &self,
        base_dir: &Path,
        prefix: &str,
        active: Option<&str>,
        rules: &RetentionRules,
        now: SystemTime,
    ) -> SweepReport {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return SweepReport {
                skipped: true,
                ..Default::default()
            };
        }
        let _running = RunningGuard(&self.running);

        let mut report = SweepReport::default();
        if rules.is_noop() {
            return report;
        }

        let mut dirs = vec![base_dir.to_path_buf()];
        while let Some(dir) = dirs.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    report.failed += 1;
                    diag(&dir, &e, "cannot scan log directory");
                    continue;
                }
            };

            for entry in entries.flatten() {
                let path = entry.path();
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                if file_type.is_dir() {
                    dirs.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }

                let name = entry.file_name();
                let Some(name) = name.to_str() else {
                    continue;
                };
                if !is_log_file(name, prefix) || active == Some(name) {
                    continue;
                }

                report.scanned += 1;
                match apply(&path, name, rules, now) {
                    Ok(Action::Deleted) => report.deleted += 1,
                    Ok(Action::Compressed) => report.compressed += 1,
                    Ok(Action::Kept) => {}
                    Err(e) => {
                        report.failed += 1;
                        diag(&path, &e, "retention failed");
                    }
                }
            }
        }

        if report.deleted + report.compressed + report.failed > 0 {
            tracing::debug!(
                target: "logroll::diag",
                dir = %base_dir.display(),
                deleted = report.deleted,
                compressed = report.compressed,
                failed = report.failed,
                "retention sweep finished"
            );
        }
        report
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Action {
    Kept,
    Deleted,
    Compressed,
}

fn apply(path: &Path, name: &str, rules: &RetentionRules, now: SystemTime) -> Result<Action> {
    let meta = fs::metadata(path)?;
    let age = now
        .duration_since(meta.modified()?)
        .unwrap_or(Duration::ZERO);

    if rules.retention().is_some_and(|max| age > max) {
        match fs::remove_file(path) {
            Ok(()) => return Ok(Action::Deleted),
            // Removed by someone else in the meantime.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Action::Kept),
            Err(e) => return Err(e.into()),
        }
    }

    let compactable = name.ends_with(FILE_SUFFIX)
        && rules.compaction().is_some_and(|after| age > after)
        && meta.len() >= rules.compact_min_bytes;
    if compactable {
        compress(path)?;
        fs::remove_file(path)?;
        return Ok(Action::Compressed);
    }

    Ok(Action::Kept)
}

/// Gzip `path` into `<path>.gz`, leaving the original in place.
pub fn compress(path: &Path) -> Result<PathBuf> {
    let mut target = path.as_os_str().to_owned();
    target.push(COMPRESSED_SUFFIX);
    let target = PathBuf::from(target);

    let wrap = |source: io::Error| Error::Compress {
        path: path.to_path_buf(),
        source,
    };

    let result = (|| -> io::Result<()> {
        let mut input = BufReader::new(File::open(path)?);
        let output = BufWriter::new(File::create(&target)?);
        let mut encoder = GzEncoder::new(output, Compression::default());
        io::copy(&mut input, &mut encoder)?;
        let mut output = encoder.finish()?;
        output.flush()?;
        output.get_ref().sync_all()
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&target);
        return Err(wrap(e));
    }
    Ok(target)
}

fn diag(path: &Path, error: &dyn std::fmt::Display, what: &str) {
    tracing::warn!(
        target: "logroll::diag",
        path = %path.display(),
        error = %error,
        "{what}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use std::io::Read;
    use tempfile::TempDir;

    fn aged_file(dir: &Path, name: &str, size: usize, age: Duration, now: SystemTime) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, vec![b'x'; size]).unwrap();
        set_file_mtime(&path, FileTime::from_system_time(now - age)).unwrap();
        path
    }

    #[test]
    fn deletes_files_past_retention() {
        let dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        let old = aged_file(dir.path(), "app.2024050110.txt", 10, DAY * 2, now);
        let young = aged_file(dir.path(), "app.2024050210.txt", 10, HOUR * 12, now);

        let rules = RetentionRules {
            retention_days: Some(1),
            ..Default::default()
        };
        let report = RetentionSweeper::new().sweep(dir.path(), "app", None, &rules, now);

        assert!(!old.exists());
        assert!(young.exists());
        assert_eq!(report.deleted, 1);
        assert_eq!(report.scanned, 2);
    }

    #[test]
    fn compresses_large_aged_files_only() {
        let dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        let big = aged_file(dir.path(), "app.2024050110.txt", 2000, HOUR * 2, now);
        let small = aged_file(dir.path(), "app.2024050111.txt", 500, HOUR * 2, now);

        let rules = RetentionRules {
            compact_after_hours: Some(1),
            compact_min_bytes: 1000,
            ..Default::default()
        };
        let report = RetentionSweeper::new().sweep(dir.path(), "app", None, &rules, now);

        assert_eq!(report.compressed, 1);
        assert!(!big.exists());
        assert!(small.exists());

        let archive = dir.path().join("app.2024050110.txt.gz");
        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(File::open(archive).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, vec![b'x'; 2000]);
    }

    #[test]
    fn one_failing_file_does_not_stop_the_sweep() {
        let dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        let stuck = aged_file(dir.path(), "app.2024050110.txt", 2000, HOUR * 2, now);
        // The archive path is taken by a directory, so compressing fails.
        fs::create_dir(dir.path().join("app.2024050110.txt.gz")).unwrap();
        let expired = aged_file(dir.path(), "app.2024050111.txt", 10, DAY * 3, now);

        let rules = RetentionRules {
            retention_days: Some(1),
            compact_after_hours: Some(1),
            compact_min_bytes: 0,
        };
        let report = RetentionSweeper::new().sweep(dir.path(), "app", None, &rules, now);

        assert_eq!(report.failed, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.compressed, 0);
        assert!(stuck.exists());
        assert!(!expired.exists());
        assert!(dir.path().join("app.2024050110.txt.gz").is_dir());
    }

    #[test]
    fn retention_wins_over_compaction() {
        let dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        let path = aged_file(dir.path(), "app.2024050110.txt", 2000, DAY * 3, now);

        let rules = RetentionRules {
            retention_days: Some(1),
            compact_after_hours: Some(1),
            compact_min_bytes: 0,
        };
        let report = RetentionSweeper::new().sweep(dir.path(), "app", None, &rules, now);

        assert_eq!((report.deleted, report.compressed), (1, 0));
        assert!(!path.exists());
        assert!(!dir.path().join("app.2024050110.txt.gz").exists());
    }

    #[test]
    fn ignores_foreign_and_active_files() {
        let dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        let foreign = aged_file(dir.path(), "other.2024050110.txt", 10, DAY * 5, now);
        let active = aged_file(dir.path(), "app.2024050110.txt", 10, DAY * 5, now);
        fs::create_dir(dir.path().join("nested")).unwrap();
        let nested = aged_file(&dir.path().join("nested"), "app.2024040110.txt.gz", 10, DAY * 5, now);

        let rules = RetentionRules {
            retention_days: Some(1),
            ..Default::default()
        };
        let report =
            RetentionSweeper::new().sweep(dir.path(), "app", Some("app.2024050110.txt"), &rules, now);

        assert!(foreign.exists());
        assert!(active.exists());
        assert!(!nested.exists());
        assert_eq!(report.deleted, 1);
    }

    #[test]
    fn overlapping_sweep_exits_immediately() {
        let dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        let old = aged_file(dir.path(), "app.2024050110.txt", 10, DAY * 2, now);
        let sweeper = RetentionSweeper::new();
        sweeper.running.store(true, Ordering::Release);

        let rules = RetentionRules {
            retention_days: Some(1),
            ..Default::default()
        };
        let report = sweeper.sweep(dir.path(), "app", None, &rules, now);

        assert!(report.skipped);
        assert!(old.exists());

        sweeper.running.store(false, Ordering::Release);
        assert_eq!(sweeper.sweep(dir.path(), "app", None, &rules, now).deleted, 1);
        assert!(!sweeper.is_running());
    }

    #[test]
    fn missing_directory_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let rules = RetentionRules {
            retention_days: Some(1),
            ..Default::default()
        };
        let report =
            RetentionSweeper::new().sweep(&dir.path().join("absent"), "app", None, &rules, SystemTime::now());
        assert_eq!(report, SweepReport::default());
    }
}
