use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates the catalog schema. Every statement is idempotent so `init`
/// can run against an existing database.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_items (
            id TEXT PRIMARY KEY,
            source_id INTEGER NOT NULL,
            code TEXT NOT NULL,
            description TEXT NOT NULL,
            unit TEXT NOT NULL DEFAULT 'UN',
            kind TEXT NOT NULL,
            methodology TEXT NOT NULL DEFAULT 'UNITARY',
            is_official INTEGER NOT NULL DEFAULT 1,
            is_locked INTEGER NOT NULL DEFAULT 1,
            UNIQUE(source_id, code),
            FOREIGN KEY (source_id) REFERENCES catalog_sources(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only price log; "current" is computed over active rows.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS price_observations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            item_id TEXT NOT NULL,
            region TEXT NOT NULL,
            price TEXT NOT NULL,
            currency TEXT NOT NULL DEFAULT 'BRL',
            valid_year INTEGER NOT NULL,
            valid_month INTEGER NOT NULL,
            charge_regime TEXT NOT NULL DEFAULT 'WITH_CHARGES',
            is_active INTEGER NOT NULL DEFAULT 1,
            inactivated_at TEXT,
            inactivated_by TEXT,
            FOREIGN KEY (item_id) REFERENCES catalog_items(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS composition_links (
            parent_item_id TEXT NOT NULL,
            child_item_id TEXT NOT NULL,
            coefficient TEXT NOT NULL,
            price_snapshot TEXT,
            FOREIGN KEY (parent_item_id) REFERENCES catalog_items(id),
            FOREIGN KEY (child_item_id) REFERENCES catalog_items(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sicro_team_links (
            composition_item_id TEXT NOT NULL,
            member_item_id TEXT NOT NULL,
            quantity TEXT NOT NULL,
            FOREIGN KEY (composition_item_id) REFERENCES catalog_items(id),
            FOREIGN KEY (member_item_id) REFERENCES catalog_items(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sicro_production_rates (
            item_id TEXT NOT NULL,
            hourly_rate TEXT NOT NULL,
            unit TEXT NOT NULL DEFAULT 'UN',
            FOREIGN KEY (item_id) REFERENCES catalog_items(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_jobs (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            progress INTEGER NOT NULL DEFAULT 0,
            message TEXT NOT NULL DEFAULT '',
            filename TEXT NOT NULL,
            file_hash TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_source_code ON catalog_items(source_id, code)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_prices_item ON price_observations(item_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_prices_window ON price_observations(valid_year, valid_month, is_active)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_links_parent ON composition_links(parent_item_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_team_composition ON sicro_team_links(composition_item_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
