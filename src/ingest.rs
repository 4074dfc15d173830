//! Import pipeline orchestration.
//!
//! One sequential pass: source record → field mapper → normalizer → batch
//! writer, with progress reported along the way and the search mirror
//! brought up to date at the end.
//!
//! Ordering of side effects:
//!
//! 1. The source is resolved, opened and its header bound. Any failure here
//!    is fatal and happens before the database is even opened.
//! 2. Schema is ensured and the mirror prepared for the chosen strategy.
//! 3. The resume offset (explicit, or the stored checkpoint) is skipped.
//! 4. Records stream through until end of input or a stop request. Each
//!    batch commit also stores the checkpoint.
//! 5. The trailing batch is flushed, the mirror synchronized, `ANALYZE` run.
//!
//! A stop request (Ctrl-C) is honoured between records: the buffered batch
//! is flushed and the offset to resume from is reported. A second Ctrl-C
//! exits at once; committed batches survive, and the search mirror is
//! repaired by the next run or `coload reindex`.

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::config::{Config, SyncStrategy};
use crate::db;
use crate::mapping::Field;
use crate::migrate;
use crate::mirror;
use crate::normalize::normalize;
use crate::progress::{
    self, format_number, ImportProgressReporter, ImportStats, ProgressMode, ProgressTracker,
};
use crate::source::{self, SourceReader};
use crate::sqlite_store::SqliteStore;
use crate::store::Store;
use crate::writer::BatchWriter;

/// Rejected rows logged at WARN before dropping to DEBUG.
const LOUD_REJECTS: u64 = 10;

/// Unmapped status spellings listed in the summary.
const SUMMARY_STATUSES: usize = 10;

/// Exit status after a second interrupt (128 + SIGINT).
const ABORT_EXIT_CODE: i32 = 130;

/// Where to start reading the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeFrom {
    /// Skip exactly this many records.
    Offset(u64),
    /// Skip the offset stored by the last committed batch for this source.
    Checkpoint,
}

impl Default for ResumeFrom {
    fn default() -> Self {
        ResumeFrom::Offset(0)
    }
}

/// Per-run options. `None` falls back to the config value.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub source: PathBuf,
    pub resume: ResumeFrom,
    pub batch_size: Option<usize>,
    pub strategy: Option<SyncStrategy>,
    pub expected_total: Option<u64>,
    pub progress: ProgressMode,
}

impl ImportOptions {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            resume: ResumeFrom::default(),
            batch_size: None,
            strategy: None,
            expected_total: None,
            progress: ProgressMode::Off,
        }
    }
}

/// What a run did.
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub source: PathBuf,
    pub stats: ImportStats,
    /// Records skipped before processing started.
    pub resume_offset: u64,
    /// Offset to pass to a later run: everything before it is committed.
    pub next_offset: u64,
    pub interrupted: bool,
    pub strategy: SyncStrategy,
    /// Mirror size, when the run rebuilt it.
    pub mirror_rows: Option<u64>,
    pub duration: Duration,
}

/// Run an import, stopping cleanly on Ctrl-C.
pub async fn run_import(config: &Config, opts: &ImportOptions) -> Result<ImportOutcome> {
    let stop = Arc::new(AtomicBool::new(false));
    let signal_flag = stop.clone();
    let signal_task = tokio::spawn(watch_interrupts(
        tokio::signal::ctrl_c,
        signal_flag,
        || std::process::exit(ABORT_EXIT_CODE),
    ));

    let result = import_with_stop(config, opts, stop).await;
    signal_task.abort();
    result
}

/// Set `stop` on the first interrupt and call `abort` on the second.
///
/// The first Ctrl-C replaces the default SIGINT handler for the rest of the
/// process.
async fn watch_interrupts<F, Fut>(mut interrupt: F, stop: Arc<AtomicBool>, abort: impl FnOnce())
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if interrupt().await.is_err() {
        return;
    }
    tracing::warn!("interrupt received, finishing current batch (Ctrl-C again to abort)");
    stop.store(true, Ordering::SeqCst);

    if interrupt().await.is_ok() {
        tracing::error!("second interrupt, aborting; run `coload reindex` if the mirror is stale");
        abort();
    }
}

/// Run an import that stops once `stop` is set.
pub async fn import_with_stop(
    config: &Config,
    opts: &ImportOptions,
    stop: Arc<AtomicBool>,
) -> Result<ImportOutcome> {
    let reporter = opts.progress.reporter();
    import_with_reporter(config, opts, stop, reporter.as_ref()).await
}

/// [`import_with_stop`] with progress events sent to `reporter` instead of
/// the one `opts.progress` selects.
pub async fn import_with_reporter(
    config: &Config,
    opts: &ImportOptions,
    stop: Arc<AtomicBool>,
    reporter: &dyn ImportProgressReporter,
) -> Result<ImportOutcome> {
    let batch_size = opts.batch_size.unwrap_or(config.import.batch_size);
    if batch_size == 0 {
        bail!("batch size must be > 0");
    }
    let strategy = opts.strategy.unwrap_or(config.import.sync_strategy);
    let expected_total = opts.expected_total.unwrap_or(config.import.expected_total);

    // Everything that can fail on the source side fails here, before any write.
    let path = source::resolve_source(&opts.source, &config.source.include_globs)?;
    let mut reader = SourceReader::open(&path)?;
    let bound = config.field_map()?.bind(reader.headers());
    if bound.column_of(Field::CompanyNumber).is_none() {
        bail!(
            "No company number column in {} (header: {:?})",
            path.display(),
            reader.headers()
        );
    }
    let field_list = |fields: &[Field]| -> String {
        fields
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let expected_missing = bound.missing_expected();
    if !expected_missing.is_empty() {
        tracing::warn!(
            fields = %field_list(&expected_missing),
            "columns not found, fields will be null"
        );
    }
    let optional_missing: Vec<Field> = bound
        .missing()
        .iter()
        .copied()
        .filter(|f| f.is_optional())
        .collect();
    if !optional_missing.is_empty() {
        tracing::debug!(
            fields = %field_list(&optional_missing),
            "optional columns not found, fields default"
        );
    }
    let source_name = reader.name();

    let pool = db::connect(config).await?;
    migrate::ensure_schema(&pool).await?;
    mirror::prepare(&pool, strategy).await?;
    let store = SqliteStore::new(pool.clone());

    let resume_offset = match opts.resume {
        ResumeFrom::Offset(n) => n,
        ResumeFrom::Checkpoint => store
            .get_checkpoint(&source_name)
            .await?
            .map(|cp| cp.offset)
            .unwrap_or(0),
    };
    if resume_offset > 0 {
        let skipped = reader.skip(resume_offset)?;
        tracing::info!(offset = resume_offset, skipped, "resuming");
        if skipped < resume_offset {
            tracing::warn!(
                offset = resume_offset,
                available = skipped,
                "resume offset is past the end of the source"
            );
        }
    }

    tracing::info!(
        source = %path.display(),
        delimiter = %(reader.delimiter() as char).escape_default(),
        batch_size,
        strategy = %strategy,
        "import started"
    );

    let tracker = ProgressTracker::new(
        config.import.progress_interval,
        expected_total,
        resume_offset,
    );
    let mut stats = ImportStats::default();
    let mut writer =
        BatchWriter::new(&store, batch_size).with_checkpoint(source_name.clone(), reader.position());
    let mut interrupted = false;

    loop {
        if stop.load(Ordering::SeqCst) {
            interrupted = true;
            break;
        }

        let next = match reader.next_record() {
            Ok(next) => next,
            Err(e) => {
                writer.flush().await?;
                let offset = writer.committed_position();
                tracing::error!(offset, "source read failed, committed rows kept");
                return Err(e.context(format!("resume with --resume {}", offset)));
            }
        };
        let Some(record) = next else { break };

        stats.processed += 1;
        let position = reader.position();

        match record.and_then(|rec| normalize(&bound.resolve(&rec))) {
            Ok(normalized) => {
                for warning in &normalized.warnings {
                    tracing::debug!(position, %warning, "field kept as-is or defaulted");
                    stats.record_field_error(warning);
                }
                if let Some(raw) = &normalized.unmapped_status {
                    stats.record_unmapped_status(raw);
                }
                let committed = writer.committed_position();
                writer
                    .write(normalized.company, position)
                    .await
                    .with_context(|| {
                        format!("Batch commit failed; resume with --resume {}", committed)
                    })?;
                stats.inserted = writer.committed_rows();
            }
            Err(err) => {
                if stats.skipped < LOUD_REJECTS {
                    tracing::warn!(position, %err, "row rejected");
                } else {
                    tracing::debug!(position, %err, "row rejected");
                }
                stats.record_row_error(&err);
                writer.advance(position);
            }
        }

        if tracker.is_due(stats.processed) {
            reporter.report(&tracker.event(&source_name, &stats));
        }
    }

    writer.flush().await?;
    stats.inserted = writer.committed_rows();
    let next_offset = writer.committed_position();
    if interrupted {
        tracing::info!(next_offset, "import interrupted");
    }

    let mirror_rows = mirror::finish(&pool, strategy, stats.inserted).await?;
    if config.import.analyze_after && stats.inserted > 0 {
        sqlx::query("ANALYZE").execute(&pool).await?;
    }
    pool.close().await;

    Ok(ImportOutcome {
        source: path,
        stats,
        resume_offset,
        next_offset,
        interrupted,
        strategy,
        mirror_rows,
        duration: tracker.elapsed(),
    })
}

/// Print the end-of-run summary on stdout.
pub fn print_summary(outcome: &ImportOutcome) {
    let stats = &outcome.stats;
    let rate = progress::rate(stats.processed, outcome.duration);

    println!("import {}", outcome.source.display());
    println!("  duration: {:.1}s", outcome.duration.as_secs_f64());
    if outcome.resume_offset > 0 {
        println!("  resumed at: {}", format_number(outcome.resume_offset));
    }
    println!("  processed: {}", format_number(stats.processed));
    println!("  inserted: {}", format_number(stats.inserted));
    println!("  skipped: {}", format_number(stats.skipped));
    println!("  rate: {} rows/s", format_number(rate.round() as u64));
    if stats.errors.is_empty() {
        println!("  errors: none");
    } else {
        println!("  errors:");
        for (category, count) in &stats.errors {
            println!("    {}: {}", category, format_number(*count));
        }
    }
    let unmapped = stats.top_unmapped_statuses(SUMMARY_STATUSES);
    if !unmapped.is_empty() {
        println!("  unmapped statuses:");
        for (raw, count) in unmapped {
            println!("    {:?}: {}", raw, format_number(count));
        }
    }
    match outcome.mirror_rows {
        Some(rows) => println!("  search mirror: rebuilt ({} rows)", format_number(rows)),
        None => println!("  search mirror: {} (up to date)", outcome.strategy),
    }
    if outcome.interrupted {
        println!(
            "  interrupted: resume with --resume {} (or --continue)",
            outcome.next_offset
        );
    } else {
        println!("ok");
    }
}
