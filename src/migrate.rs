//! Schema management.
//!
//! [`ensure_schema`] creates the companies table, its lookup indexes, the
//! checkpoints table and the FTS5 search mirror. Everything is guarded by
//! `IF NOT EXISTS` (or an explicit existence check for the virtual table), so
//! running it against a populated store is a no-op.
//!
//! Stores created by older tooling differ in two ways, both repaired here:
//!
//! - a `CHECK` constraint limited `company_status` to a fixed vocabulary.
//!   Status is an open vocabulary now, so the table is rebuilt once without
//!   the constraint, keeping its rows.
//! - the search mirror was an external-content FTS5 table
//!   (`content=companies`) with a different column set, kept in step by
//!   triggers. Reads of it fail against the current `companies` columns, so
//!   it is dropped with its triggers and recreated empty. The mirror
//!   synchronizer refills it on the next import or `coload reindex`.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::mirror;

const CREATE_COMPANIES: &str = r#"
    CREATE TABLE IF NOT EXISTS companies (
        company_number TEXT PRIMARY KEY,
        company_name TEXT NOT NULL,
        company_status TEXT,
        company_type TEXT,
        jurisdiction TEXT,
        date_of_creation TEXT,
        date_of_cessation TEXT,

        registered_office_address_line_1 TEXT,
        registered_office_address_line_2 TEXT,
        registered_office_locality TEXT,
        registered_office_region TEXT,
        registered_office_country TEXT,
        registered_office_postal_code TEXT,
        registered_office_po_box TEXT,
        registered_office_care_of TEXT,

        -- JSON arrays, NULL when the source had none
        sic_codes TEXT,
        previous_names TEXT,

        accounting_reference_date_day INTEGER,
        accounting_reference_date_month INTEGER,
        last_accounts_made_up_to TEXT,
        accounts_category TEXT,
        confirmation_statement_last_made_up_to TEXT,

        has_charges BOOLEAN NOT NULL DEFAULT 0,
        has_been_liquidated BOOLEAN NOT NULL DEFAULT 0,
        has_insolvency_history BOOLEAN NOT NULL DEFAULT 0,

        imported_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        last_updated TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        -- owned by the query service
        search_popularity INTEGER DEFAULT 0,
        risk_score INTEGER DEFAULT 50
    )
"#;

/// Columns carried over when rebuilding a legacy table.
const CARRIED_COLUMNS: &str = "company_number, company_name, company_status, company_type, \
    jurisdiction, date_of_creation, date_of_cessation, \
    registered_office_address_line_1, registered_office_address_line_2, \
    registered_office_locality, registered_office_region, registered_office_country, \
    registered_office_postal_code, registered_office_po_box, registered_office_care_of, \
    sic_codes, previous_names, accounting_reference_date_day, accounting_reference_date_month, \
    last_accounts_made_up_to, accounts_category, confirmation_statement_last_made_up_to, \
    has_charges, has_been_liquidated, has_insolvency_history, \
    imported_at, last_updated, search_popularity, risk_score";

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_company_name ON companies(company_name)",
    "CREATE INDEX IF NOT EXISTS idx_company_status ON companies(company_status)",
    "CREATE INDEX IF NOT EXISTS idx_company_postcode ON companies(registered_office_postal_code)",
    "CREATE INDEX IF NOT EXISTS idx_company_created ON companies(date_of_creation)",
    "CREATE INDEX IF NOT EXISTS idx_company_popularity ON companies(search_popularity DESC)",
];

/// Name of the FTS5 search mirror.
pub const MIRROR_TABLE: &str = "companies_fts";

/// Declared columns of the search mirror, in order.
const MIRROR_COLUMN_NAMES: &[&str] = &[
    "company_number",
    "company_name",
    "previous_names",
    "registered_office_address",
];

/// Open the configured database and make sure the schema exists.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    ensure_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table, index and the search mirror if absent.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(CREATE_COMPANIES)
        .execute(pool)
        .await
        .context("Failed to create companies table")?;

    // Before the table rebuild: legacy triggers reference the legacy mirror.
    if table_exists(pool, MIRROR_TABLE).await? && !mirror_is_current(pool).await? {
        drop_legacy_mirror(pool).await?;
    }

    if has_legacy_status_check(pool).await? {
        rebuild_without_status_check(pool).await?;
    }

    for ddl in INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            source TEXT PRIMARY KEY,
            cursor TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    if !table_exists(pool, MIRROR_TABLE).await? {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE companies_fts USING fts5(
                company_number UNINDEXED,
                company_name,
                previous_names,
                registered_office_address,
                tokenize='porter unicode61'
            )
            "#,
        )
        .execute(pool)
        .await
        .context("Failed to create search mirror")?;
        tracing::info!(table = MIRROR_TABLE, "created search mirror");
    }

    Ok(())
}

pub async fn table_exists(pool: &SqlitePool, name: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name = ?",
    )
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// Whether the existing mirror stores its own content and declares exactly
/// the current columns.
async fn mirror_is_current(pool: &SqlitePool) -> Result<bool> {
    let sql: Option<String> =
        sqlx::query_scalar("SELECT sql FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(MIRROR_TABLE)
            .fetch_optional(pool)
            .await?;
    let compact: String = sql
        .unwrap_or_default()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if compact.contains("content=") {
        return Ok(false);
    }

    let columns: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
        .bind(MIRROR_TABLE)
        .fetch_all(pool)
        .await?;
    Ok(columns == MIRROR_COLUMN_NAMES)
}

async fn drop_legacy_mirror(pool: &SqlitePool) -> Result<()> {
    tracing::info!(table = MIRROR_TABLE, "replacing legacy search mirror");
    mirror::drop_triggers(pool).await?;
    sqlx::query(&format!("DROP TABLE {}", MIRROR_TABLE))
        .execute(pool)
        .await
        .context("Failed to drop legacy search mirror")?;
    Ok(())
}

async fn has_legacy_status_check(pool: &SqlitePool) -> Result<bool> {
    let sql: Option<String> =
        sqlx::query_scalar("SELECT sql FROM sqlite_master WHERE type='table' AND name='companies'")
            .fetch_optional(pool)
            .await?;
    Ok(sql
        .map(|s| s.to_ascii_uppercase().contains("CHECK (COMPANY_STATUS IN"))
        .unwrap_or(false))
}

async fn rebuild_without_status_check(pool: &SqlitePool) -> Result<()> {
    tracing::info!("dropping legacy company_status constraint");
    let mut tx = pool.begin().await?;

    sqlx::query("ALTER TABLE companies RENAME TO companies_legacy")
        .execute(&mut *tx)
        .await?;
    sqlx::query(CREATE_COMPANIES).execute(&mut *tx).await?;
    let copied = sqlx::query(&format!(
        "INSERT INTO companies ({cols}) SELECT {cols} FROM companies_legacy",
        cols = CARRIED_COLUMNS
    ))
    .execute(&mut *tx)
    .await
    .context("Failed to copy rows out of legacy companies table")?
    .rows_affected();
    sqlx::query("DROP TABLE companies_legacy")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    tracing::info!(rows = copied, "rebuilt companies table");
    Ok(())
}
