//! In-memory [`CatalogStore`] implementation for tests.
//!
//! Uses `Vec` and `HashMap` behind `std::sync::RwLock` for thread
//! safety. Semantics mirror the SQLite backend, including the
//! `(source_id, code)` uniqueness guarantee and soft price
//! deactivation.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use crate::models::{
    CatalogItem, CatalogSource, ChargeRegime, CompositionLink, ImportJobState, Period,
    PriceObservation, SicroProductionRate, SicroTeamLink,
};

use super::{CatalogStore, NewPrice, SourceSummary};

#[derive(Default)]
struct Inner {
    sources: Vec<CatalogSource>,
    items: Vec<CatalogItem>,
    prices: Vec<PriceObservation>,
    next_price_id: i64,
    links: Vec<CompositionLink>,
    team: Vec<SicroTeamLink>,
    production: Vec<SicroProductionRate>,
    jobs: HashMap<String, ImportJobState>,
}

/// In-memory store for unit tests.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Snapshot of all price rows, active or not (test assertions).
    pub fn all_prices(&self) -> Vec<PriceObservation> {
        self.inner.read().unwrap().prices.clone()
    }

    /// Snapshot of all items (test assertions).
    pub fn all_items(&self) -> Vec<CatalogItem> {
        self.inner.read().unwrap().items.clone()
    }

    /// Snapshot of all composition links (test assertions).
    pub fn all_links(&self) -> Vec<CompositionLink> {
        self.inner.read().unwrap().links.clone()
    }

    /// Snapshot of all crew links (test assertions).
    pub fn all_team_links(&self) -> Vec<SicroTeamLink> {
        self.inner.read().unwrap().team.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn ensure_source(&self, name: &str, description: &str) -> Result<CatalogSource> {
        let mut inner = self.inner.write().unwrap();
        if let Some(existing) = inner.sources.iter().find(|s| s.name == name) {
            return Ok(existing.clone());
        }
        let source = CatalogSource {
            id: inner.sources.len() as i64 + 1,
            name: name.to_string(),
            description: Some(description.to_string()),
        };
        inner.sources.push(source.clone());
        Ok(source)
    }

    async fn list_sources(&self) -> Result<Vec<SourceSummary>> {
        let inner = self.inner.read().unwrap();
        let mut out: Vec<SourceSummary> = inner
            .sources
            .iter()
            .map(|source| SourceSummary {
                source: source.clone(),
                item_count: inner.items.iter().filter(|i| i.source_id == source.id).count()
                    as i64,
            })
            .collect();
        out.sort_by(|a, b| a.source.name.cmp(&b.source.name));
        Ok(out)
    }

    async fn item_codes(&self, source_id: i64) -> Result<Vec<(String, String)>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .items
            .iter()
            .filter(|i| i.source_id == source_id)
            .map(|i| (i.code.clone(), i.id.clone()))
            .collect())
    }

    async fn insert_items(&self, items: &[CatalogItem]) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        for item in items {
            let exists = inner
                .items
                .iter()
                .any(|i| i.source_id == item.source_id && i.code == item.code);
            if !exists {
                inner.items.push(item.clone());
            }
        }
        Ok(())
    }

    async fn get_item(&self, id: &str) -> Result<Option<CatalogItem>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.items.iter().find(|i| i.id == id).cloned())
    }

    async fn get_item_by_code(&self, source_id: i64, code: &str) -> Result<Option<CatalogItem>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .items
            .iter()
            .find(|i| i.source_id == source_id && i.code == code)
            .cloned())
    }

    async fn active_price_keys(
        &self,
        source_id: i64,
        period: Period,
    ) -> Result<Vec<(String, String, ChargeRegime)>> {
        let inner = self.inner.read().unwrap();
        let source_items: Vec<&str> = inner
            .items
            .iter()
            .filter(|i| i.source_id == source_id)
            .map(|i| i.id.as_str())
            .collect();
        Ok(inner
            .prices
            .iter()
            .filter(|p| p.is_active && p.period == period && source_items.contains(&p.item_id.as_str()))
            .map(|p| (p.item_id.clone(), p.region.clone(), p.charge_regime))
            .collect())
    }

    async fn insert_prices(&self, prices: &[NewPrice]) -> Result<u64> {
        let mut inner = self.inner.write().unwrap();
        for price in prices {
            inner.next_price_id += 1;
            let id = inner.next_price_id;
            inner.prices.push(PriceObservation {
                id,
                item_id: price.item_id.clone(),
                region: price.region.clone(),
                price: price.price,
                currency: "BRL".to_string(),
                period: price.period,
                charge_regime: price.charge_regime,
                is_active: true,
                inactivated_at: None,
                inactivated_by: None,
            });
        }
        Ok(prices.len() as u64)
    }

    async fn deactivate_prices(
        &self,
        source_id: i64,
        period: Period,
        region: Option<&str>,
        inactivated_by: Option<&str>,
    ) -> Result<u64> {
        let mut inner = self.inner.write().unwrap();
        let source_items: Vec<String> = inner
            .items
            .iter()
            .filter(|i| i.source_id == source_id)
            .map(|i| i.id.clone())
            .collect();
        let mut flipped = 0u64;
        for price in inner.prices.iter_mut() {
            if !price.is_active || price.period != period {
                continue;
            }
            if let Some(region) = region {
                if price.region != region {
                    continue;
                }
            }
            if !source_items.contains(&price.item_id) {
                continue;
            }
            price.is_active = false;
            price.inactivated_at = Some(Utc::now());
            price.inactivated_by = inactivated_by.map(|s| s.to_string());
            flipped += 1;
        }
        Ok(flipped)
    }

    async fn active_prices_for_items(
        &self,
        item_ids: &[String],
    ) -> Result<Vec<PriceObservation>> {
        let inner = self.inner.read().unwrap();
        let mut out: Vec<PriceObservation> = inner
            .prices
            .iter()
            .filter(|p| p.is_active && item_ids.contains(&p.item_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.period.cmp(&a.period));
        Ok(out)
    }

    async fn replace_source_links(
        &self,
        source_id: i64,
        links: &[CompositionLink],
    ) -> Result<u64> {
        let mut inner = self.inner.write().unwrap();
        let source_items: Vec<String> = inner
            .items
            .iter()
            .filter(|i| i.source_id == source_id)
            .map(|i| i.id.clone())
            .collect();
        inner
            .links
            .retain(|l| !source_items.contains(&l.parent_item_id));
        inner.links.extend_from_slice(links);
        Ok(links.len() as u64)
    }

    async fn replace_composition_graph(
        &self,
        composition_id: &str,
        team: &[SicroTeamLink],
        materials: &[CompositionLink],
        production: Option<&SicroProductionRate>,
    ) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner
            .team
            .retain(|t| t.composition_item_id != composition_id);
        inner.links.retain(|l| l.parent_item_id != composition_id);
        inner.production.retain(|p| p.item_id != composition_id);
        inner.team.extend_from_slice(team);
        inner.links.extend_from_slice(materials);
        if let Some(rate) = production {
            inner.production.push(rate.clone());
        }
        Ok(())
    }

    async fn links_with_children(
        &self,
        parent_id: &str,
    ) -> Result<Vec<(CompositionLink, CatalogItem)>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .links
            .iter()
            .filter(|l| l.parent_item_id == parent_id)
            .filter_map(|l| {
                inner
                    .items
                    .iter()
                    .find(|i| i.id == l.child_item_id)
                    .map(|i| (l.clone(), i.clone()))
            })
            .collect())
    }

    async fn team_with_members(
        &self,
        composition_id: &str,
    ) -> Result<Vec<(SicroTeamLink, CatalogItem)>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .team
            .iter()
            .filter(|t| t.composition_item_id == composition_id)
            .filter_map(|t| {
                inner
                    .items
                    .iter()
                    .find(|i| i.id == t.member_item_id)
                    .map(|i| (t.clone(), i.clone()))
            })
            .collect())
    }

    async fn production_rate(&self, item_id: &str) -> Result<Option<SicroProductionRate>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .production
            .iter()
            .find(|p| p.item_id == item_id)
            .cloned())
    }

    async fn upsert_job(&self, job: &ImportJobState) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<ImportJobState>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.jobs.get(id).cloned())
    }
}
