//! Import progress and running counters.
//!
//! [`ImportStats`] holds the counters the pipeline maintains for the whole
//! run; they only ever grow. [`ProgressTracker`] decides when a progress
//! line is due and derives throughput and ETA from the counters. Reporting is
//! purely observational: reporters never fail and never influence control
//! flow.
//!
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::collections::BTreeMap;
use std::io::Write;
use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::bail;

use crate::error::{FieldParseError, RowError};

/// Monotonic run counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportStats {
    /// Records read from the source this run (after the resume skip).
    pub processed: u64,
    /// Rows committed to the store.
    pub inserted: u64,
    /// Records rejected before reaching the writer.
    pub skipped: u64,
    /// Recovered errors by category, field parse warnings included.
    pub errors: BTreeMap<String, u64>,
    /// Raw status spellings that fell back to lowercasing.
    pub unmapped_statuses: BTreeMap<String, u64>,
}

impl ImportStats {
    pub fn record_row_error(&mut self, err: &RowError) {
        self.skipped += 1;
        *self.errors.entry(err.category().to_string()).or_insert(0) += 1;
    }

    /// Field warnings do not skip the row.
    pub fn record_field_error(&mut self, err: &FieldParseError) {
        *self.errors.entry(err.category()).or_insert(0) += 1;
    }

    pub fn total_errors(&self) -> u64 {
        self.errors.values().sum()
    }

    pub fn record_unmapped_status(&mut self, raw: &str) {
        *self.unmapped_statuses.entry(raw.to_string()).or_insert(0) += 1;
    }

    /// Most frequent unmapped spellings first, ties by spelling.
    pub fn top_unmapped_statuses(&self, n: usize) -> Vec<(&str, u64)> {
        let mut top: Vec<(&str, u64)> = self
            .unmapped_statuses
            .iter()
            .map(|(s, c)| (s.as_str(), *c))
            .collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        top.truncate(n);
        top
    }
}

/// A single progress event.
#[derive(Clone, Debug)]
pub struct ImportProgressEvent {
    pub source: String,
    /// Absolute record position in the source (resume offset included).
    pub position: u64,
    pub expected_total: u64,
    pub processed: u64,
    pub inserted: u64,
    pub skipped: u64,
    /// Records per second this run.
    pub rate: f64,
    pub eta: Option<Duration>,
}

/// Decides when to report and computes rate and ETA.
pub struct ProgressTracker {
    interval: u64,
    expected_total: u64,
    resume_offset: u64,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(interval: u64, expected_total: u64, resume_offset: u64) -> Self {
        Self {
            interval: interval.max(1),
            expected_total,
            resume_offset,
            started: Instant::now(),
        }
    }

    /// True every `interval` processed records.
    pub fn is_due(&self, processed: u64) -> bool {
        processed > 0 && processed % self.interval == 0
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn event(&self, source: &str, stats: &ImportStats) -> ImportProgressEvent {
        let rate = rate(stats.processed, self.elapsed());
        ImportProgressEvent {
            source: source.to_string(),
            position: self.resume_offset + stats.processed,
            expected_total: self.expected_total,
            processed: stats.processed,
            inserted: stats.inserted,
            skipped: stats.skipped,
            rate,
            eta: eta(self.expected_total, self.resume_offset, stats.processed, rate),
        }
    }
}

/// Records per second; zero before any time has passed.
pub fn rate(processed: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    processed as f64 / secs
}

/// Time left at `rate` to reach `expected_total`, clamped at zero.
///
/// `None` when the rate is not yet known.
pub fn eta(expected_total: u64, resume_offset: u64, processed: u64, rate: f64) -> Option<Duration> {
    if rate <= 0.0 || !rate.is_finite() {
        return None;
    }
    let remaining = expected_total.saturating_sub(resume_offset.saturating_add(processed));
    Some(Duration::from_secs_f64(remaining as f64 / rate))
}

/// Reports import progress. Implementations write to stderr (human or JSON).
pub trait ImportProgressReporter: Send + Sync {
    fn report(&self, event: &ImportProgressEvent);
}

/// Human-friendly progress on stderr:
/// "import data.csv  120,000 / 5,600,000  (skipped 12)  8,431 rows/s  eta 10m 48s".
pub struct StderrProgress;

impl ImportProgressReporter for StderrProgress {
    fn report(&self, event: &ImportProgressEvent) {
        let eta = event
            .eta
            .map(format_duration)
            .unwrap_or_else(|| "unknown".to_string());
        let line = format!(
            "import {}  {} / {}  (skipped {})  {} rows/s  eta {}\n",
            event.source,
            format_number(event.position),
            format_number(event.expected_total),
            format_number(event.skipped),
            format_number(event.rate.round() as u64),
            eta
        );
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ImportProgressReporter for JsonProgress {
    fn report(&self, event: &ImportProgressEvent) {
        let obj = serde_json::json!({
            "event": "progress",
            "source": event.source,
            "position": event.position,
            "expected_total": event.expected_total,
            "processed": event.processed,
            "inserted": event.inserted,
            "skipped": event.skipped,
            "rate": (event.rate * 10.0).round() / 10.0,
            "eta_secs": event.eta.map(|d| d.as_secs()),
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ImportProgressReporter for NoProgress {
    fn report(&self, _event: &ImportProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// "1h 02m", "10m 48s", "7s".
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ImportProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl FromStr for ProgressMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" | "none" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => bail!("unknown progress mode '{}' (expected off, human or json)", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FieldKind;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1), "1");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn format_duration_units() {
        assert_eq!(format_duration(Duration::from_secs(7)), "7s");
        assert_eq!(format_duration(Duration::from_secs(648)), "10m 48s");
        assert_eq!(format_duration(Duration::from_secs(3720)), "1h 02m");
    }

    #[test]
    fn rate_and_eta() {
        let r = rate(10_000, Duration::from_secs(4));
        assert_eq!(r, 2_500.0);
        assert_eq!(rate(10, Duration::ZERO), 0.0);

        // 100k total, resumed at 20k, 10k done this run: 70k left at 2.5k/s.
        assert_eq!(
            eta(100_000, 20_000, 10_000, r),
            Some(Duration::from_secs(28))
        );
        assert_eq!(eta(100_000, 0, 0, 0.0), None);
    }

    #[test]
    fn eta_clamps_past_expected_total() {
        assert_eq!(eta(1_000, 900, 500, 100.0), Some(Duration::ZERO));
    }

    #[test]
    fn tracker_due_every_interval() {
        let t = ProgressTracker::new(3, 10, 0);
        let due: Vec<u64> = (0..=9).filter(|n| t.is_due(*n)).collect();
        assert_eq!(due, vec![3, 6, 9]);

        let stats = ImportStats {
            processed: 4,
            ..ImportStats::default()
        };
        let resumed = ProgressTracker::new(3, 10, 5);
        assert_eq!(resumed.event("x.csv", &stats).position, 9);
    }

    #[test]
    fn stats_count_by_category() {
        let mut stats = ImportStats::default();
        stats.record_row_error(&RowError::MissingKey);
        stats.record_row_error(&RowError::MissingKey);
        stats.record_field_error(&FieldParseError {
            field: "date_of_creation",
            kind: FieldKind::Date,
            value: "someday".into(),
        });
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.errors["missing_company_number"], 2);
        assert_eq!(stats.errors["field_parse:date_of_creation"], 1);
        assert_eq!(stats.total_errors(), 3);
    }

    #[test]
    fn unmapped_statuses_by_frequency() {
        let mut stats = ImportStats::default();
        for raw in ["Open", "Registered", "Open", "Closed", "Registered", "Open"] {
            stats.record_unmapped_status(raw);
        }
        assert_eq!(
            stats.top_unmapped_statuses(2),
            vec![("Open", 3), ("Registered", 2)]
        );
        assert_eq!(stats.total_errors(), 0);
    }

    #[test]
    fn progress_mode_parses() {
        assert_eq!("json".parse::<ProgressMode>().unwrap(), ProgressMode::Json);
        assert_eq!("off".parse::<ProgressMode>().unwrap(), ProgressMode::Off);
        assert!("loud".parse::<ProgressMode>().is_err());
    }
}
