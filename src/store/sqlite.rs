//! SQLite [`CatalogStore`] backend.
//!
//! Prices and coefficients are stored as decimal TEXT so the values
//! round-trip exactly; timestamps are RFC 3339 TEXT. Batch methods open
//! one transaction per call — the orchestrator's unit of progress.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::models::{
    CatalogItem, CatalogSource, ChargeRegime, CompositionLink, ImportJobState, ItemKind,
    JobStatus, Methodology, Period, PriceObservation, SicroProductionRate, SicroTeamLink,
};

use super::{CatalogStore, NewPrice, SourceSummary};

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

fn parse_decimal(text: &str) -> Result<Decimal> {
    Decimal::from_str(text).with_context(|| format!("invalid stored decimal '{}'", text))
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid stored timestamp '{}'", text))
}

fn item_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CatalogItem> {
    let kind: String = row.get("kind");
    let methodology: String = row.get("methodology");
    Ok(CatalogItem {
        id: row.get("id"),
        source_id: row.get("source_id"),
        code: row.get("code"),
        description: row.get("description"),
        unit: row.get("unit"),
        kind: ItemKind::parse(&kind)
            .with_context(|| format!("invalid stored item kind '{}'", kind))?,
        methodology: Methodology::parse(&methodology)
            .with_context(|| format!("invalid stored methodology '{}'", methodology))?,
        is_official: row.get::<i64, _>("is_official") != 0,
        is_locked: row.get::<i64, _>("is_locked") != 0,
    })
}

fn price_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<PriceObservation> {
    let price: String = row.get("price");
    let regime: String = row.get("charge_regime");
    let inactivated_at: Option<String> = row.get("inactivated_at");
    Ok(PriceObservation {
        id: row.get("id"),
        item_id: row.get("item_id"),
        region: row.get("region"),
        price: parse_decimal(&price)?,
        currency: row.get("currency"),
        period: Period {
            year: row.get::<i64, _>("valid_year") as i32,
            month: row.get::<i64, _>("valid_month") as u32,
        },
        charge_regime: ChargeRegime::parse(&regime)
            .with_context(|| format!("invalid stored charge regime '{}'", regime))?,
        is_active: row.get::<i64, _>("is_active") != 0,
        inactivated_at: inactivated_at.as_deref().map(parse_timestamp).transpose()?,
        inactivated_by: row.get("inactivated_by"),
    })
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn ensure_source(&self, name: &str, description: &str) -> Result<CatalogSource> {
        let existing = sqlx::query("SELECT id, name, description FROM catalog_sources WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = existing {
            return Ok(CatalogSource {
                id: row.get("id"),
                name: row.get("name"),
                description: row.get("description"),
            });
        }

        let id = sqlx::query("INSERT INTO catalog_sources (name, description) VALUES (?, ?)")
            .bind(name)
            .bind(description)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();

        Ok(CatalogSource {
            id,
            name: name.to_string(),
            description: Some(description.to_string()),
        })
    }

    async fn list_sources(&self) -> Result<Vec<SourceSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.name, s.description, COUNT(i.id) AS item_count
            FROM catalog_sources s
            LEFT JOIN catalog_items i ON i.source_id = s.id
            GROUP BY s.id
            ORDER BY s.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| SourceSummary {
                source: CatalogSource {
                    id: row.get("id"),
                    name: row.get("name"),
                    description: row.get("description"),
                },
                item_count: row.get("item_count"),
            })
            .collect())
    }

    async fn item_codes(&self, source_id: i64) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT code, id FROM catalog_items WHERE source_id = ?")
            .bind(source_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("code"), row.get("id")))
            .collect())
    }

    async fn insert_items(&self, items: &[CatalogItem]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO catalog_items
                    (id, source_id, code, description, unit, kind, methodology, is_official, is_locked)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(source_id, code) DO NOTHING
                "#,
            )
            .bind(&item.id)
            .bind(item.source_id)
            .bind(&item.code)
            .bind(&item.description)
            .bind(&item.unit)
            .bind(item.kind.as_str())
            .bind(item.methodology.as_str())
            .bind(item.is_official as i64)
            .bind(item.is_locked as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_item(&self, id: &str) -> Result<Option<CatalogItem>> {
        let row = sqlx::query("SELECT * FROM catalog_items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn get_item_by_code(&self, source_id: i64, code: &str) -> Result<Option<CatalogItem>> {
        let row = sqlx::query("SELECT * FROM catalog_items WHERE source_id = ? AND code = ?")
            .bind(source_id)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn active_price_keys(
        &self,
        source_id: i64,
        period: Period,
    ) -> Result<Vec<(String, String, ChargeRegime)>> {
        let rows = sqlx::query(
            r#"
            SELECT p.item_id, p.region, p.charge_regime
            FROM price_observations p
            JOIN catalog_items i ON i.id = p.item_id
            WHERE i.source_id = ? AND p.valid_year = ? AND p.valid_month = ? AND p.is_active = 1
            "#,
        )
        .bind(source_id)
        .bind(period.year)
        .bind(period.month)
        .fetch_all(&self.pool)
        .await?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            let regime: String = row.get("charge_regime");
            keys.push((
                row.get("item_id"),
                row.get("region"),
                ChargeRegime::parse(&regime).unwrap_or(ChargeRegime::WithCharges),
            ));
        }
        Ok(keys)
    }

    async fn insert_prices(&self, prices: &[NewPrice]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        for price in prices {
            sqlx::query(
                r#"
                INSERT INTO price_observations
                    (item_id, region, price, currency, valid_year, valid_month, charge_regime, is_active)
                VALUES (?, ?, ?, 'BRL', ?, ?, ?, 1)
                "#,
            )
            .bind(&price.item_id)
            .bind(&price.region)
            .bind(price.price.to_string())
            .bind(price.period.year)
            .bind(price.period.month)
            .bind(price.charge_regime.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(prices.len() as u64)
    }

    async fn deactivate_prices(
        &self,
        source_id: i64,
        period: Period,
        region: Option<&str>,
        inactivated_by: Option<&str>,
    ) -> Result<u64> {
        let now = Utc::now().to_rfc3339();
        let result = if let Some(region) = region {
            sqlx::query(
                r#"
                UPDATE price_observations
                SET is_active = 0, inactivated_at = ?, inactivated_by = ?
                WHERE is_active = 1 AND valid_year = ? AND valid_month = ? AND region = ?
                  AND item_id IN (SELECT id FROM catalog_items WHERE source_id = ?)
                "#,
            )
            .bind(&now)
            .bind(inactivated_by)
            .bind(period.year)
            .bind(period.month)
            .bind(region)
            .bind(source_id)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE price_observations
                SET is_active = 0, inactivated_at = ?, inactivated_by = ?
                WHERE is_active = 1 AND valid_year = ? AND valid_month = ?
                  AND item_id IN (SELECT id FROM catalog_items WHERE source_id = ?)
                "#,
            )
            .bind(&now)
            .bind(inactivated_by)
            .bind(period.year)
            .bind(period.month)
            .bind(source_id)
            .execute(&self.pool)
            .await?
        };
        Ok(result.rows_affected())
    }

    async fn active_prices_for_items(
        &self,
        item_ids: &[String],
    ) -> Result<Vec<PriceObservation>> {
        if item_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; item_ids.len()].join(", ");
        let sql = format!(
            "SELECT * FROM price_observations WHERE is_active = 1 AND item_id IN ({}) \
             ORDER BY valid_year DESC, valid_month DESC",
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for id in item_ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(price_from_row).collect()
    }

    async fn replace_source_links(
        &self,
        source_id: i64,
        links: &[CompositionLink],
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM composition_links WHERE parent_item_id IN \
             (SELECT id FROM catalog_items WHERE source_id = ?)",
        )
        .bind(source_id)
        .execute(&mut *tx)
        .await?;

        for link in links {
            sqlx::query(
                "INSERT INTO composition_links (parent_item_id, child_item_id, coefficient, price_snapshot) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&link.parent_item_id)
            .bind(&link.child_item_id)
            .bind(link.coefficient.to_string())
            .bind(link.price_snapshot.map(|p| p.to_string()))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(links.len() as u64)
    }

    async fn replace_composition_graph(
        &self,
        composition_id: &str,
        team: &[SicroTeamLink],
        materials: &[CompositionLink],
        production: Option<&SicroProductionRate>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM sicro_team_links WHERE composition_item_id = ?")
            .bind(composition_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM composition_links WHERE parent_item_id = ?")
            .bind(composition_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sicro_production_rates WHERE item_id = ?")
            .bind(composition_id)
            .execute(&mut *tx)
            .await?;

        for member in team {
            sqlx::query(
                "INSERT INTO sicro_team_links (composition_item_id, member_item_id, quantity) \
                 VALUES (?, ?, ?)",
            )
            .bind(&member.composition_item_id)
            .bind(&member.member_item_id)
            .bind(member.quantity.to_string())
            .execute(&mut *tx)
            .await?;
        }
        for link in materials {
            sqlx::query(
                "INSERT INTO composition_links (parent_item_id, child_item_id, coefficient, price_snapshot) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&link.parent_item_id)
            .bind(&link.child_item_id)
            .bind(link.coefficient.to_string())
            .bind(link.price_snapshot.map(|p| p.to_string()))
            .execute(&mut *tx)
            .await?;
        }
        if let Some(rate) = production {
            sqlx::query(
                "INSERT INTO sicro_production_rates (item_id, hourly_rate, unit) VALUES (?, ?, ?)",
            )
            .bind(&rate.item_id)
            .bind(rate.hourly_rate.to_string())
            .bind(&rate.unit)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn links_with_children(
        &self,
        parent_id: &str,
    ) -> Result<Vec<(CompositionLink, CatalogItem)>> {
        let rows = sqlx::query(
            r#"
            SELECT l.parent_item_id, l.child_item_id, l.coefficient, l.price_snapshot,
                   i.id, i.source_id, i.code, i.description, i.unit, i.kind, i.methodology,
                   i.is_official, i.is_locked
            FROM composition_links l
            JOIN catalog_items i ON i.id = l.child_item_id
            WHERE l.parent_item_id = ?
            "#,
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let coefficient: String = row.get("coefficient");
            let snapshot: Option<String> = row.get("price_snapshot");
            let link = CompositionLink {
                parent_item_id: row.get("parent_item_id"),
                child_item_id: row.get("child_item_id"),
                coefficient: parse_decimal(&coefficient)?,
                price_snapshot: snapshot.as_deref().map(parse_decimal).transpose()?,
            };
            out.push((link, item_from_row(row)?));
        }
        Ok(out)
    }

    async fn team_with_members(
        &self,
        composition_id: &str,
    ) -> Result<Vec<(SicroTeamLink, CatalogItem)>> {
        let rows = sqlx::query(
            r#"
            SELECT t.composition_item_id, t.member_item_id, t.quantity,
                   i.id, i.source_id, i.code, i.description, i.unit, i.kind, i.methodology,
                   i.is_official, i.is_locked
            FROM sicro_team_links t
            JOIN catalog_items i ON i.id = t.member_item_id
            WHERE t.composition_item_id = ?
            "#,
        )
        .bind(composition_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let quantity: String = row.get("quantity");
            let link = SicroTeamLink {
                composition_item_id: row.get("composition_item_id"),
                member_item_id: row.get("member_item_id"),
                quantity: parse_decimal(&quantity)?,
            };
            out.push((link, item_from_row(row)?));
        }
        Ok(out)
    }

    async fn production_rate(&self, item_id: &str) -> Result<Option<SicroProductionRate>> {
        let row = sqlx::query(
            "SELECT item_id, hourly_rate, unit FROM sicro_production_rates WHERE item_id = ? LIMIT 1",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let rate: String = row.get("hourly_rate");
            Ok(SicroProductionRate {
                item_id: row.get("item_id"),
                hourly_rate: parse_decimal(&rate)?,
                unit: row.get("unit"),
            })
        })
        .transpose()
    }

    async fn upsert_job(&self, job: &ImportJobState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO import_jobs (id, status, progress, message, filename, file_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                progress = excluded.progress,
                message = excluded.message,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&job.id)
        .bind(job.status.as_str())
        .bind(job.progress as i64)
        .bind(&job.message)
        .bind(&job.filename)
        .bind(&job.file_hash)
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<ImportJobState>> {
        let row = sqlx::query("SELECT * FROM import_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let status: String = row.get("status");
            let created_at: String = row.get("created_at");
            let updated_at: String = row.get("updated_at");
            Ok(ImportJobState {
                id: row.get("id"),
                status: JobStatus::parse(&status)
                    .with_context(|| format!("invalid stored job status '{}'", status))?,
                progress: row.get::<i64, _>("progress") as u8,
                message: row.get("message"),
                filename: row.get("filename"),
                file_hash: row.get("file_hash"),
                created_at: parse_timestamp(&created_at)?,
                updated_at: parse_timestamp(&updated_at)?,
            })
        })
        .transpose()
    }
}
