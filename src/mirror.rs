//! Search-index synchronization.
//!
//! The search mirror (`companies_fts`) is an FTS5 table holding, per company,
//! the name, the previous names and a one-line registered office address.
//! Its rowid equals the rowid of the company it mirrors, which lets the
//! triggers locate a mirror row without scanning.
//!
//! Two strategies keep it in step with `companies`:
//!
//! - [`SyncStrategy::Rebuild`]: no triggers; after a run the whole mirror is
//!   regenerated in one transaction.
//! - [`SyncStrategy::Incremental`]: `AFTER INSERT/UPDATE/DELETE` triggers
//!   update the mirror in the same transaction as each write.
//!
//! `VACUUM` may renumber rowids. [`check`] compares rowid *and*
//! company_number, and [`prepare`] rebuilds whenever the two disagree.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

use crate::config::{Config, SyncStrategy};
use crate::db;
use crate::migrate;

const TRIGGER_NAMES: &[&str] = &[
    "companies_fts_ai",
    "companies_fts_au",
    "companies_fts_ad",
    // left behind by older tooling
    "companies_ai",
    "companies_au",
    "companies_ad",
];

/// Mirror column values computed from a row of `companies` aliased `t`.
fn mirror_values(t: &str) -> String {
    format!(
        "{t}.rowid, {t}.company_number, {t}.company_name, \
         COALESCE((SELECT group_concat(value, ' ') FROM json_each({t}.previous_names)), ''), \
         COALESCE((SELECT group_concat(value, ' ') FROM json_each(json_array(\
            {t}.registered_office_address_line_1, \
            {t}.registered_office_address_line_2, \
            {t}.registered_office_locality, \
            {t}.registered_office_region, \
            {t}.registered_office_postal_code)) \
          WHERE value IS NOT NULL AND trim(value) != ''), '')",
        t = t
    )
}

const MIRROR_COLUMNS: &str =
    "rowid, company_number, company_name, previous_names, registered_office_address";

/// Row counts used to verify the mirror invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorHealth {
    pub companies: i64,
    pub mirror: i64,
    /// Mirror rows with no company behind them, or pointing at the wrong one.
    pub mismatched: i64,
}

impl MirrorHealth {
    pub fn is_consistent(&self) -> bool {
        self.companies == self.mirror && self.mismatched == 0
    }
}

/// A hit from [`search`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub company_number: String,
    pub company_name: String,
    pub rank: f64,
}

/// Get the store ready for a run with `strategy`.
pub async fn prepare(pool: &SqlitePool, strategy: SyncStrategy) -> Result<()> {
    match strategy {
        SyncStrategy::Rebuild => drop_triggers(pool).await,
        SyncStrategy::Incremental => {
            install_triggers(pool).await?;
            let health = check(pool).await?;
            if !health.is_consistent() {
                tracing::info!(
                    companies = health.companies,
                    mirror = health.mirror,
                    mismatched = health.mismatched,
                    "search mirror out of step, rebuilding before incremental run"
                );
                rebuild(pool).await?;
            }
            Ok(())
        }
    }
}

/// Bring the mirror up to date after a run that wrote `rows_written` rows.
///
/// Returns the mirror size when a rebuild happened.
pub async fn finish(
    pool: &SqlitePool,
    strategy: SyncStrategy,
    rows_written: u64,
) -> Result<Option<u64>> {
    match strategy {
        SyncStrategy::Incremental => Ok(None),
        SyncStrategy::Rebuild => {
            if rows_written == 0 && check(pool).await?.is_consistent() {
                return Ok(None);
            }
            rebuild(pool).await.map(Some)
        }
    }
}

/// Discard and regenerate the whole mirror from `companies`.
pub async fn rebuild(pool: &SqlitePool) -> Result<u64> {
    let started = std::time::Instant::now();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM companies_fts")
        .execute(&mut *tx)
        .await?;
    let inserted = sqlx::query(&format!(
        "INSERT INTO companies_fts ({}) SELECT {} FROM companies c",
        MIRROR_COLUMNS,
        mirror_values("c")
    ))
    .execute(&mut *tx)
    .await
    .context("Failed to rebuild search mirror")?
    .rows_affected();

    tx.commit().await?;
    tracing::info!(
        rows = inserted,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "rebuilt search mirror"
    );
    Ok(inserted)
}

pub async fn install_triggers(pool: &SqlitePool) -> Result<()> {
    let insert_new = format!(
        "INSERT INTO companies_fts ({}) VALUES ({});",
        MIRROR_COLUMNS,
        mirror_values("new")
    );

    let ddl = [
        format!(
            "CREATE TRIGGER IF NOT EXISTS companies_fts_ai AFTER INSERT ON companies BEGIN {} END",
            insert_new
        ),
        format!(
            "CREATE TRIGGER IF NOT EXISTS companies_fts_au AFTER UPDATE ON companies BEGIN \
             DELETE FROM companies_fts WHERE rowid = old.rowid; {} END",
            insert_new
        ),
        "CREATE TRIGGER IF NOT EXISTS companies_fts_ad AFTER DELETE ON companies BEGIN \
         DELETE FROM companies_fts WHERE rowid = old.rowid; END"
            .to_string(),
    ];

    for stmt in &ddl {
        sqlx::query(stmt).execute(pool).await?;
    }
    tracing::debug!("installed search mirror triggers");
    Ok(())
}

pub async fn drop_triggers(pool: &SqlitePool) -> Result<()> {
    for name in TRIGGER_NAMES {
        sqlx::query(&format!("DROP TRIGGER IF EXISTS {}", name))
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// Count companies, mirror rows and mirror rows that do not match a company.
pub async fn check(pool: &SqlitePool) -> Result<MirrorHealth> {
    let companies: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM companies")
        .fetch_one(pool)
        .await?;
    let mirror: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM companies_fts")
        .fetch_one(pool)
        .await?;
    let mismatched: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM companies_fts f
        LEFT JOIN companies c ON c.rowid = f.rowid
        WHERE c.company_number IS NULL OR c.company_number != f.company_number
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(MirrorHealth {
        companies,
        mirror,
        mismatched,
    })
}

/// Full-text probe over the mirror, best match first.
///
/// Each whitespace-separated term is quoted and prefix-matched, so user
/// input never reaches the FTS5 query parser as syntax.
pub async fn search(pool: &SqlitePool, query: &str, limit: i64) -> Result<Vec<SearchHit>> {
    let Some(match_expr) = build_match_expr(query) else {
        return Ok(Vec::new());
    };

    let rows = sqlx::query(
        r#"
        SELECT company_number, company_name, bm25(companies_fts) AS score
        FROM companies_fts
        WHERE companies_fts MATCH ?
        ORDER BY score
        LIMIT ?
        "#,
    )
    .bind(&match_expr)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| SearchHit {
            company_number: row.get("company_number"),
            company_name: row.get("company_name"),
            rank: row.get("score"),
        })
        .collect())
}

/// `coload reindex`: rebuild the mirror and report its health.
pub async fn run_reindex(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::ensure_schema(&pool).await?;
    let rows = rebuild(&pool).await?;
    let health = check(&pool).await?;
    pool.close().await;

    println!("reindex");
    println!("  companies: {}", health.companies);
    println!("  mirror rows: {}", rows);
    println!("  mismatched: {}", health.mismatched);
    println!("ok");
    Ok(())
}

/// `coload search`: print the best mirror hits for `query`.
pub async fn run_search(config: &Config, query: &str, limit: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let hits = search(&pool, query, limit).await?;
    pool.close().await;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. {}  {}  (score {:.2})",
            i + 1,
            hit.company_number,
            hit.company_name,
            hit.rank
        );
    }
    Ok(())
}

fn build_match_expr(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| t.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"*", t))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqlitePool) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("m.db")).await.unwrap();
        migrate::ensure_schema(&pool).await.unwrap();
        (tmp, pool)
    }

    async fn insert(pool: &SqlitePool, number: &str, name: &str, prev: Option<&str>) {
        sqlx::query(
            "INSERT INTO companies (company_number, company_name, previous_names, \
             registered_office_address_line_1, registered_office_postal_code) \
             VALUES (?, ?, ?, '1 High Street', 'AB1 2CD')",
        )
        .bind(number)
        .bind(name)
        .bind(prev)
        .execute(pool)
        .await
        .unwrap();
    }

    #[test]
    fn match_expr_quotes_terms() {
        assert_eq!(build_match_expr("acme widgets").as_deref(), Some("\"acme\"* \"widgets\"*"));
        assert_eq!(build_match_expr("o'brien (uk)").as_deref(), Some("\"obrien\"* \"uk\"*"));
        assert_eq!(build_match_expr("  \"* "), None);
    }

    #[tokio::test]
    async fn rebuild_mirrors_every_company() {
        let (_tmp, pool) = setup().await;
        insert(&pool, "00000001", "QUUXWORTH TRADING LIMITED", None).await;
        insert(&pool, "00000002", "OTHER LTD", Some(r#"["ZANZIBAR IMPORTS LTD"]"#)).await;

        assert!(!check(&pool).await.unwrap().is_consistent());
        assert_eq!(rebuild(&pool).await.unwrap(), 2);

        let health = check(&pool).await.unwrap();
        assert!(health.is_consistent(), "{:?}", health);

        let hits = search(&pool, "quuxworth", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].company_number, "00000001");

        let hits = search(&pool, "zanzibar", 10).await.unwrap();
        assert_eq!(hits[0].company_number, "00000002");

        let hits = search(&pool, "AB1", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn rebuild_drops_orphans() {
        let (_tmp, pool) = setup().await;
        insert(&pool, "00000001", "FIRST LTD", None).await;
        rebuild(&pool).await.unwrap();
        sqlx::query("DELETE FROM companies").execute(&pool).await.unwrap();

        let health = check(&pool).await.unwrap();
        assert_eq!(health.mismatched, 1);

        rebuild(&pool).await.unwrap();
        assert!(check(&pool).await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn incremental_triggers_follow_writes() {
        let (_tmp, pool) = setup().await;
        prepare(&pool, SyncStrategy::Incremental).await.unwrap();

        insert(&pool, "00000001", "ORIGINAL NAME LTD", None).await;
        assert!(check(&pool).await.unwrap().is_consistent());

        sqlx::query("UPDATE companies SET company_name = 'RENAMED PLC' WHERE company_number = '00000001'")
            .execute(&pool)
            .await
            .unwrap();
        assert!(search(&pool, "original", 10).await.unwrap().is_empty());
        assert_eq!(search(&pool, "plc", 10).await.unwrap().len(), 1);
        assert!(check(&pool).await.unwrap().is_consistent());

        sqlx::query("DELETE FROM companies").execute(&pool).await.unwrap();
        let health = check(&pool).await.unwrap();
        assert_eq!(health.mirror, 0);

        // Switching back to rebuild removes the triggers.
        prepare(&pool, SyncStrategy::Rebuild).await.unwrap();
        insert(&pool, "00000002", "UNTRACKED LTD", None).await;
        assert_eq!(check(&pool).await.unwrap().mirror, 0);
        assert_eq!(finish(&pool, SyncStrategy::Rebuild, 1).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn finish_skips_rebuild_when_nothing_changed() {
        let (_tmp, pool) = setup().await;
        insert(&pool, "00000001", "FIRST LTD", None).await;
        rebuild(&pool).await.unwrap();
        assert_eq!(finish(&pool, SyncStrategy::Rebuild, 0).await.unwrap(), None);
    }
}
