//! SQLite-backed [`Store`] implementation.
//!
//! One transaction per batch. Rows are upserted with
//! `ON CONFLICT(company_number) DO UPDATE`, which replaces every
//! importer-owned column (last write wins) while leaving `imported_at` and
//! the query service's `search_popularity` / `risk_score` untouched. An
//! `UPDATE` rather than `INSERT OR REPLACE` also keeps the row's rowid, so
//! the search mirror's triggers see a plain update.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::models::{Checkpoint, Company};
use crate::store::Store;

const UPSERT_COMPANY: &str = r#"
    INSERT INTO companies (
        company_number, company_name, company_status, company_type, jurisdiction,
        date_of_creation, date_of_cessation,
        registered_office_address_line_1, registered_office_address_line_2,
        registered_office_locality, registered_office_region,
        registered_office_country, registered_office_postal_code,
        registered_office_po_box, registered_office_care_of,
        sic_codes, previous_names,
        accounting_reference_date_day, accounting_reference_date_month,
        last_accounts_made_up_to, accounts_category,
        confirmation_statement_last_made_up_to,
        has_charges, has_been_liquidated, has_insolvency_history
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(company_number) DO UPDATE SET
        company_name = excluded.company_name,
        company_status = excluded.company_status,
        company_type = excluded.company_type,
        jurisdiction = excluded.jurisdiction,
        date_of_creation = excluded.date_of_creation,
        date_of_cessation = excluded.date_of_cessation,
        registered_office_address_line_1 = excluded.registered_office_address_line_1,
        registered_office_address_line_2 = excluded.registered_office_address_line_2,
        registered_office_locality = excluded.registered_office_locality,
        registered_office_region = excluded.registered_office_region,
        registered_office_country = excluded.registered_office_country,
        registered_office_postal_code = excluded.registered_office_postal_code,
        registered_office_po_box = excluded.registered_office_po_box,
        registered_office_care_of = excluded.registered_office_care_of,
        sic_codes = excluded.sic_codes,
        previous_names = excluded.previous_names,
        accounting_reference_date_day = excluded.accounting_reference_date_day,
        accounting_reference_date_month = excluded.accounting_reference_date_month,
        last_accounts_made_up_to = excluded.last_accounts_made_up_to,
        accounts_category = excluded.accounts_category,
        confirmation_statement_last_made_up_to = excluded.confirmation_statement_last_made_up_to,
        has_charges = excluded.has_charges,
        has_been_liquidated = excluded.has_been_liquidated,
        has_insolvency_history = excluded.has_insolvency_history,
        last_updated = CURRENT_TIMESTAMP
"#;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_batch(&self, batch: &[Company], checkpoint: Option<&Checkpoint>) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        for c in batch {
            sqlx::query(UPSERT_COMPANY)
                .bind(&c.company_number)
                .bind(&c.company_name)
                .bind(&c.company_status)
                .bind(&c.company_type)
                .bind(&c.jurisdiction)
                .bind(&c.date_of_creation)
                .bind(&c.date_of_cessation)
                .bind(&c.address_line_1)
                .bind(&c.address_line_2)
                .bind(&c.locality)
                .bind(&c.region)
                .bind(&c.country)
                .bind(&c.postal_code)
                .bind(&c.po_box)
                .bind(&c.care_of)
                .bind(c.sic_codes_json())
                .bind(c.previous_names_json())
                .bind(c.accounting_reference_day)
                .bind(c.accounting_reference_month)
                .bind(&c.last_accounts_made_up_to)
                .bind(&c.accounts_category)
                .bind(&c.confirmation_statement_last_made_up_to)
                .bind(c.has_charges)
                .bind(c.has_been_liquidated)
                .bind(c.has_insolvency_history)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to upsert company {}", c.company_number))?;
        }

        if let Some(cp) = checkpoint {
            sqlx::query(
                r#"
                INSERT INTO checkpoints (source, cursor, updated_at) VALUES (?, ?, ?)
                ON CONFLICT(source) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
                "#,
            )
            .bind(&cp.source)
            .bind(cp.offset.to_string())
            .bind(cp.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(batch.len() as u64)
    }

    async fn get_checkpoint(&self, source: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query("SELECT source, cursor, updated_at FROM checkpoints WHERE source = ?")
            .bind(source)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|r| {
            let cursor: String = r.get("cursor");
            cursor.parse::<u64>().ok().map(|offset| Checkpoint {
                source: r.get("source"),
                offset,
                updated_at: r.get("updated_at"),
            })
        }))
    }

    async fn count_companies(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM companies")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
