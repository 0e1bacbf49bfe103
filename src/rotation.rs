use chrono::{DateTime, Local, Timelike};

/// Suffix of live log files.
pub const FILE_SUFFIX: &str = ".txt";

/// Suffix appended to a log file once the retention sweep compressed it.
pub const COMPRESSED_SUFFIX: &str = ".gz";

/// Bookkeeping for the file the writer currently appends to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedFile {
    pub name: String,
    pub opened_at: DateTime<Local>,
    pub size_bytes: u64,
    /// Size split index within the hour bucket; `0` for the first file.
    pub seq: u32,
}

/// Outcome of a rotation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rotation {
    /// Keep appending to the open file.
    Keep,
    /// Open (or create) `name`.
    Open { name: String, seq: u32 },
}

/// Decides when the writer moves to a new file and how that file is named.
///
/// Names follow `<prefix>.<YYYYMMDDHH>[_<discriminator>][.<seq>].txt`. The
/// sequence part only appears when size splitting is enabled and the hour's
/// first file filled up.
#[derive(Debug, Clone, Default)]
pub struct RotationPolicy {
    discriminator: Option<String>,
    split_on_size: bool,
}

impl RotationPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Distinguish files of several instances sharing one directory.
    pub fn with_discriminator(mut self, discriminator: impl Into<String>) -> Self {
        let d = discriminator.into();
        self.discriminator = (!d.is_empty()).then_some(d);
        self
    }

    /// Use the process id as discriminator.
    pub fn with_pid_discriminator(self) -> Self {
        self.with_discriminator(std::process::id().to_string())
    }

    /// Open a new file within the same hour once the current one is full,
    /// instead of suppressing further output until the hour changes.
    pub fn with_size_split(mut self, enabled: bool) -> Self {
        self.split_on_size = enabled;
        self
    }

    pub fn splits_on_size(&self) -> bool {
        self.split_on_size
    }

    pub fn file_name(&self, prefix: &str, now: DateTime<Local>, seq: u32) -> String {
        let mut name = String::with_capacity(prefix.len() + 24);
        if !prefix.is_empty() {
            name.push_str(prefix);
            name.push('.');
        }
        name.push_str(&now.format("%Y%m%d%H").to_string());
        if let Some(d) = &self.discriminator {
            name.push('_');
            name.push_str(d);
        }
        if seq > 0 {
            name.push('.');
            name.push_str(&seq.to_string());
        }
        name.push_str(FILE_SUFFIX);
        name
    }

    /// Evaluate the rotation triggers in order; the first match wins.
    pub fn should_rotate(
        &self,
        prefix: &str,
        current: Option<&OpenedFile>,
        max_file_size: Option<u64>,
        now: DateTime<Local>,
    ) -> Rotation {
        let open = |seq| Rotation::Open {
            name: self.file_name(prefix, now, seq),
            seq,
        };

        let Some(current) = current else {
            return open(0);
        };
        if current.opened_at.hour() != now.hour() {
            return open(0);
        }
        if current.opened_at.date_naive() != now.date_naive() {
            return open(0);
        }
        if self.split_on_size {
            if let Some(max) = max_file_size.filter(|m| *m > 0) {
                if current.size_bytes >= max {
                    return open(current.seq + 1);
                }
            }
        }
        // A changed prefix in the config snapshot also moves to a new file.
        let expected = self.file_name(prefix, current.opened_at, current.seq);
        if expected != current.name {
            return open(current.seq);
        }
        Rotation::Keep
    }
}

/// True if `name` looks like a file written under `prefix`.
pub fn is_log_file(name: &str, prefix: &str) -> bool {
    let stem_ok = if prefix.is_empty() {
        name.chars().next().is_some_and(|c| c.is_ascii_digit())
    } else {
        name.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('.'))
    };
    stem_ok && (name.ends_with(FILE_SUFFIX) || name.ends_with(COMPRESSED_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap()
    }

    fn opened(policy: &RotationPolicy, t: DateTime<Local>, size: u64) -> OpenedFile {
        OpenedFile {
            name: policy.file_name("app", t, 0),
            opened_at: t,
            size_bytes: size,
            seq: 0,
        }
    }

    #[test]
    fn first_open_is_deterministic() {
        let policy = RotationPolicy::new().with_discriminator("node1");
        for _ in 0..3 {
            assert_eq!(
                policy.should_rotate("app", None, None, at(10, 30)),
                Rotation::Open {
                    name: "app.2024050110_node1.txt".into(),
                    seq: 0
                }
            );
        }
    }

    #[test]
    fn names_without_prefix_or_discriminator() {
        let policy = RotationPolicy::new();
        assert_eq!(policy.file_name("", at(9, 0), 0), "2024050109.txt");
        assert_eq!(policy.file_name("app", at(9, 0), 2), "app.2024050109.2.txt");
    }

    #[test]
    fn same_hour_keeps_the_file() {
        let policy = RotationPolicy::new();
        let cur = opened(&policy, at(10, 0), 10);
        assert_eq!(policy.should_rotate("app", Some(&cur), Some(100), at(10, 59)), Rotation::Keep);
    }

    #[test]
    fn new_hour_opens_new_file() {
        let policy = RotationPolicy::new();
        let cur = opened(&policy, at(10, 59), 10);
        assert_eq!(
            policy.should_rotate("app", Some(&cur), None, at(11, 0)),
            Rotation::Open {
                name: "app.2024050111.txt".into(),
                seq: 0
            }
        );
    }

    #[test]
    fn same_hour_on_another_day_rotates() {
        let policy = RotationPolicy::new();
        let cur = opened(&policy, at(10, 0), 10);
        let next_day = Local.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap();
        assert!(matches!(
            policy.should_rotate("app", Some(&cur), None, next_day),
            Rotation::Open { seq: 0, .. }
        ));
    }

    #[test]
    fn full_file_splits_only_when_enabled() {
        let cur = opened(&RotationPolicy::new(), at(10, 0), 100);

        let suppress = RotationPolicy::new();
        assert_eq!(suppress.should_rotate("app", Some(&cur), Some(100), at(10, 5)), Rotation::Keep);

        let split = RotationPolicy::new().with_size_split(true);
        assert_eq!(
            split.should_rotate("app", Some(&cur), Some(100), at(10, 5)),
            Rotation::Open {
                name: "app.2024050110.1.txt".into(),
                seq: 1
            }
        );
        assert_eq!(split.should_rotate("app", Some(&cur), None, at(10, 5)), Rotation::Keep);
    }

    #[test]
    fn prefix_change_moves_to_new_file() {
        let policy = RotationPolicy::new();
        let cur = opened(&policy, at(10, 0), 0);
        assert_eq!(
            policy.should_rotate("billing", Some(&cur), None, at(10, 1)),
            Rotation::Open {
                name: "billing.2024050110.txt".into(),
                seq: 0
            }
        );
    }

    #[test]
    fn recognises_own_files() {
        assert!(is_log_file("app.2024050110.txt", "app"));
        assert!(is_log_file("app.2024050110_7.txt.gz", "app"));
        assert!(!is_log_file("application.2024050110.txt", "app"));
        assert!(!is_log_file("app.2024050110.json", "app"));
        assert!(is_log_file("2024050110.txt", ""));
        assert!(!is_log_file("notes.txt", ""));
    }
}
