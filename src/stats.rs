//! Database statistics and health overview.
//!
//! Provides a quick summary of what's loaded: company totals, status and
//! country breakdowns, search mirror health and the stored resume
//! checkpoints. Used by `coload stats` to give confidence that an import
//! finished and the mirror is in step.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::mirror::{self, MirrorHealth};
use crate::progress::format_number;

/// Rows shown per breakdown.
const TOP_N: i64 = 10;

#[derive(Debug, Clone)]
pub struct DbStats {
    pub companies: i64,
    pub with_sic_codes: i64,
    pub with_previous_names: i64,
    pub by_status: Vec<(String, i64)>,
    pub by_country: Vec<(String, i64)>,
    pub mirror: MirrorHealth,
    pub checkpoints: Vec<CheckpointStats>,
}

#[derive(Debug, Clone)]
pub struct CheckpointStats {
    pub source: String,
    pub offset: String,
    pub updated_at: i64,
}

/// Query every figure shown by `coload stats`.
pub async fn collect(pool: &SqlitePool) -> Result<DbStats> {
    let companies: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM companies")
        .fetch_one(pool)
        .await?;
    let with_sic_codes: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM companies WHERE sic_codes IS NOT NULL")
            .fetch_one(pool)
            .await?;
    let with_previous_names: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM companies WHERE previous_names IS NOT NULL")
            .fetch_one(pool)
            .await?;

    let by_status = breakdown(pool, "company_status").await?;
    let by_country = breakdown(pool, "registered_office_country").await?;
    let mirror = mirror::check(pool).await?;

    let checkpoints = sqlx::query("SELECT source, cursor, updated_at FROM checkpoints ORDER BY source")
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| CheckpointStats {
            source: row.get("source"),
            offset: row.get("cursor"),
            updated_at: row.get("updated_at"),
        })
        .collect();

    Ok(DbStats {
        companies,
        with_sic_codes,
        with_previous_names,
        by_status,
        by_country,
        mirror,
        checkpoints,
    })
}

async fn breakdown(pool: &SqlitePool, column: &str) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query(&format!(
        "SELECT COALESCE({col}, '(none)') AS label, COUNT(*) AS n \
         FROM companies GROUP BY {col} ORDER BY n DESC, label LIMIT ?",
        col = column
    ))
    .bind(TOP_N)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| (row.get("label"), row.get("n")))
        .collect())
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    if !config.db.path.exists() {
        bail!(
            "No database at {} (run `coload init` or `coload import` first)",
            config.db.path.display()
        );
    }
    let pool = db::connect(config).await?;
    if !migrate::table_exists(&pool, "companies").await? {
        bail!("Database has no companies table (run `coload init` first)");
    }
    let stats = collect(&pool).await?;
    pool.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Company Loader - Database Stats");
    println!("===============================");
    println!();
    println!("  Database:        {}", config.db.path.display());
    println!("  Size:            {}", format_bytes(db_size));
    println!();
    println!("  Companies:       {}", format_number(stats.companies as u64));
    println!("  With SIC codes:  {}", format_number(stats.with_sic_codes as u64));
    println!(
        "  Previous names:  {}",
        format_number(stats.with_previous_names as u64)
    );
    println!(
        "  Search mirror:   {} rows, {} mismatched ({})",
        format_number(stats.mirror.mirror as u64),
        stats.mirror.mismatched,
        if stats.mirror.is_consistent() {
            "consistent"
        } else {
            "run `coload reindex`"
        }
    );

    print_breakdown("By status:", &stats.by_status);
    print_breakdown("By country:", &stats.by_country);

    if !stats.checkpoints.is_empty() {
        println!();
        println!("  Checkpoints:");
        println!("  {:<32} {:>12}   {}", "SOURCE", "OFFSET", "UPDATED");
        println!("  {}", "-".repeat(64));
        for cp in &stats.checkpoints {
            println!(
                "  {:<32} {:>12}   {}",
                cp.source,
                cp.offset,
                format_ts_relative(cp.updated_at)
            );
        }
    }

    println!();
    Ok(())
}

fn print_breakdown(title: &str, rows: &[(String, i64)]) {
    if rows.is_empty() {
        return;
    }
    println!();
    println!("  {}", title);
    for (label, n) in rows {
        println!("    {:<36} {:>12}", label, format_number(*n as u64));
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
