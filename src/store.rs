//! Storage abstraction for the catalog engine.
//!
//! The [`CatalogStore`] trait defines every persistence operation the
//! import pipeline, price resolver, and job tracking need, so the
//! engine can be driven against SQLite in production and an in-memory
//! backend in tests. Implementations must be `Send + Sync`.
//!
//! Write-side contract: each method commits on its own (batch methods
//! wrap one transaction per call), which is what gives the orchestrator
//! its commit-per-batch progress visibility.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{
    CatalogItem, CatalogSource, ChargeRegime, CompositionLink, ImportJobState, Period,
    PriceObservation, SicroProductionRate, SicroTeamLink,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A price row about to be inserted; the store assigns the id and the
/// activity flags.
#[derive(Debug, Clone)]
pub struct NewPrice {
    pub item_id: String,
    pub region: String,
    pub price: Decimal,
    pub period: Period,
    pub charge_regime: ChargeRegime,
}

/// A catalog source together with how many items it carries.
#[derive(Debug, Clone)]
pub struct SourceSummary {
    pub source: CatalogSource,
    pub item_count: i64,
}

/// Abstract persistence backend for the catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Finds the source by name or creates it. Existing sources are
    /// returned untouched — imports never mutate a source row.
    async fn ensure_source(&self, name: &str, description: &str) -> Result<CatalogSource>;

    /// All sources with their item counts.
    async fn list_sources(&self) -> Result<Vec<SourceSummary>>;

    /// `(code, item_id)` pairs of a source, used to seed the identity
    /// cache that keeps re-imports from creating duplicates.
    async fn item_codes(&self, source_id: i64) -> Result<Vec<(String, String)>>;

    /// Inserts a batch of items in one transaction.
    async fn insert_items(&self, items: &[CatalogItem]) -> Result<()>;

    async fn get_item(&self, id: &str) -> Result<Option<CatalogItem>>;

    async fn get_item_by_code(&self, source_id: i64, code: &str) -> Result<Option<CatalogItem>>;

    /// `(item_id, region, charge_regime)` keys that already hold an
    /// active observation in the period, used for import-time dedup.
    async fn active_price_keys(
        &self,
        source_id: i64,
        period: Period,
    ) -> Result<Vec<(String, String, ChargeRegime)>>;

    /// Inserts a batch of active price observations in one transaction.
    async fn insert_prices(&self, prices: &[NewPrice]) -> Result<u64>;

    /// Soft-deactivates every active observation of the source in the
    /// `(period[, region])` window. Returns how many rows flipped.
    async fn deactivate_prices(
        &self,
        source_id: i64,
        period: Period,
        region: Option<&str>,
        inactivated_by: Option<&str>,
    ) -> Result<u64>;

    /// All active observations for the given items, newest period first.
    async fn active_prices_for_items(&self, item_ids: &[String])
        -> Result<Vec<PriceObservation>>;

    /// Deletes every composition link whose parent belongs to the
    /// source and inserts the given ones, in one transaction.
    async fn replace_source_links(
        &self,
        source_id: i64,
        links: &[CompositionLink],
    ) -> Result<u64>;

    /// Replaces one composition's crew, ingredient, and production
    /// rows in one transaction (SICRO analytic re-runs).
    async fn replace_composition_graph(
        &self,
        composition_id: &str,
        team: &[SicroTeamLink],
        materials: &[CompositionLink],
        production: Option<&SicroProductionRate>,
    ) -> Result<()>;

    /// Ingredient links of a parent with the child items joined in.
    async fn links_with_children(
        &self,
        parent_id: &str,
    ) -> Result<Vec<(CompositionLink, CatalogItem)>>;

    /// Crew links of a composition with the member items joined in.
    async fn team_with_members(
        &self,
        composition_id: &str,
    ) -> Result<Vec<(SicroTeamLink, CatalogItem)>>;

    async fn production_rate(&self, item_id: &str) -> Result<Option<SicroProductionRate>>;

    /// Creates or updates an import job row.
    async fn upsert_job(&self, job: &ImportJobState) -> Result<()>;

    async fn get_job(&self, id: &str) -> Result<Option<ImportJobState>>;
}
