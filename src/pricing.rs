//! Price resolution and composition cost roll-up.
//!
//! The regional price index is never complete: a publisher quotes some
//! regions and not others, and older windows linger as the only data
//! for an item. Resolution therefore walks an explicit fallback order —
//! requested region, then each configured default region, then whatever
//! is available — and never fails: an unresolvable price is zero, which
//! downstream budget views surface as "no reference price".

use anyhow::Result;
use rust_decimal::Decimal;

use crate::config::PricingConfig;
use crate::models::{
    CatalogItem, ChargeRegime, Period, PriceObservation, SicroProductionRate,
};
use crate::store::CatalogStore;

/// Resolution policy: the fallback region order and the charge regime
/// assumed when the caller does not name one.
#[derive(Debug, Clone)]
pub struct PricePolicy {
    pub preferred_regions: Vec<String>,
    pub default_charges: ChargeRegime,
}

impl PricePolicy {
    pub fn from_config(config: &PricingConfig) -> Self {
        Self {
            preferred_regions: config.preferred_regions.clone(),
            default_charges: config.default_charge_regime(),
        }
    }
}

/// What the caller asked for. Every field is optional; the policy
/// fills the gaps.
#[derive(Debug, Clone, Default)]
pub struct PriceQuery {
    pub region: Option<String>,
    pub charges: Option<ChargeRegime>,
    /// Period ceiling: ignore observations newer than this.
    pub up_to: Option<Period>,
}

/// Picks the best observation for one item from its active
/// observations (expected newest-period-first, as the store returns
/// them). Returns `None` when nothing qualifies — never an error.
pub fn resolve<'a>(
    observations: &'a [PriceObservation],
    query: &PriceQuery,
    policy: &PricePolicy,
) -> Option<&'a PriceObservation> {
    let regime = query.charges.unwrap_or(policy.default_charges);
    let candidates: Vec<&PriceObservation> = observations
        .iter()
        .filter(|o| o.is_active && o.charge_regime == regime)
        .filter(|o| query.up_to.map_or(true, |ceiling| o.period <= ceiling))
        .collect();

    if let Some(region) = query.region.as_deref() {
        if let Some(found) = candidates.iter().find(|o| o.region == region).copied() {
            return Some(found);
        }
    }
    for region in &policy.preferred_regions {
        if let Some(found) = candidates.iter().find(|o| &o.region == region).copied() {
            return Some(found);
        }
    }
    candidates.first().copied()
}

/// A child of a composition with its resolved price.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResolvedChild {
    pub item: CatalogItem,
    pub coefficient: Decimal,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

/// A composition's full resolved view: own price, ingredient
/// breakdown, crew, and production rate.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CompositionBreakdown {
    pub item: CatalogItem,
    pub unit_price: Decimal,
    pub ingredients: Vec<ResolvedChild>,
    pub team: Vec<ResolvedChild>,
    pub production: Option<SicroProductionRate>,
    /// Weighted sum over the ingredient links (the cost base; crew
    /// hours are informational for production-methodology items).
    pub calculated_cost: Decimal,
}

/// Resolves an item's unit price for budget-line snapshotting. Zero
/// when no observation qualifies.
pub async fn snapshot_unit_price(
    store: &dyn CatalogStore,
    item_id: &str,
    query: &PriceQuery,
    policy: &PricePolicy,
) -> Result<Decimal> {
    let observations = store
        .active_prices_for_items(&[item_id.to_string()])
        .await?;
    Ok(resolve(&observations, query, policy)
        .map(|o| o.price)
        .unwrap_or(Decimal::ZERO))
}

/// Builds the resolved breakdown of a composition. Prices for all
/// children are fetched in one pass and resolved per item.
pub async fn composition_breakdown(
    store: &dyn CatalogStore,
    item_id: &str,
    query: &PriceQuery,
    policy: &PricePolicy,
) -> Result<Option<CompositionBreakdown>> {
    let Some(item) = store.get_item(item_id).await? else {
        return Ok(None);
    };

    let links = store.links_with_children(item_id).await?;
    let team = store.team_with_members(item_id).await?;
    let production = store.production_rate(item_id).await?;

    let mut wanted: Vec<String> = vec![item.id.clone()];
    wanted.extend(links.iter().map(|(_, child)| child.id.clone()));
    wanted.extend(team.iter().map(|(_, member)| member.id.clone()));
    wanted.sort();
    wanted.dedup();
    let observations = store.active_prices_for_items(&wanted).await?;

    let price_for = |id: &str| -> Decimal {
        let own: Vec<PriceObservation> = observations
            .iter()
            .filter(|o| o.item_id == id)
            .cloned()
            .collect();
        resolve(&own, query, policy)
            .map(|o| o.price)
            .unwrap_or(Decimal::ZERO)
    };

    let unit_price = price_for(&item.id);

    let mut calculated_cost = Decimal::ZERO;
    let ingredients: Vec<ResolvedChild> = links
        .into_iter()
        .map(|(link, child)| {
            let unit_price = price_for(&child.id);
            let total_price = link.coefficient * unit_price;
            calculated_cost += total_price;
            ResolvedChild {
                item: child,
                coefficient: link.coefficient,
                unit_price,
                total_price,
            }
        })
        .collect();

    let team: Vec<ResolvedChild> = team
        .into_iter()
        .map(|(link, member)| {
            let unit_price = price_for(&member.id);
            ResolvedChild {
                item: member,
                coefficient: link.quantity,
                unit_price,
                total_price: link.quantity * unit_price,
            }
        })
        .collect();

    Ok(Some(CompositionBreakdown {
        item,
        unit_price,
        ingredients,
        team,
        production,
        calculated_cost,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemKind, Methodology};
    use crate::store::{MemoryStore, NewPrice};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn policy() -> PricePolicy {
        PricePolicy {
            preferred_regions: vec!["RS".to_string(), "SP".to_string()],
            default_charges: ChargeRegime::WithCharges,
        }
    }

    fn obs(id: i64, item: &str, region: &str, price: &str) -> PriceObservation {
        PriceObservation {
            id,
            item_id: item.to_string(),
            region: region.to_string(),
            price: dec(price),
            currency: "BRL".to_string(),
            period: Period { year: 2024, month: 7 },
            charge_regime: ChargeRegime::WithCharges,
            is_active: true,
            inactivated_at: None,
            inactivated_by: None,
        }
    }

    #[test]
    fn requested_region_wins() {
        let observations = vec![obs(1, "a", "SP", "10"), obs(2, "a", "RJ", "12")];
        let query = PriceQuery {
            region: Some("RJ".to_string()),
            ..Default::default()
        };
        let found = resolve(&observations, &query, &policy()).unwrap();
        assert_eq!(found.region, "RJ");
    }

    #[test]
    fn missing_region_falls_to_primary_then_secondary_default() {
        // Observations only in SP and RS; request for RJ resolves to
        // RS (primary default), not zero and not SP.
        let observations = vec![obs(1, "a", "SP", "10"), obs(2, "a", "RS", "11")];
        let query = PriceQuery {
            region: Some("RJ".to_string()),
            ..Default::default()
        };
        let found = resolve(&observations, &query, &policy()).unwrap();
        assert_eq!(found.region, "RS");

        // Without the primary default, the secondary one answers.
        let observations = vec![obs(1, "a", "SP", "10"), obs(2, "a", "MG", "9")];
        let found = resolve(&observations, &query, &policy()).unwrap();
        assert_eq!(found.region, "SP");
    }

    #[test]
    fn any_available_as_last_resort_and_none_when_empty() {
        let observations = vec![obs(1, "a", "TO", "7")];
        let query = PriceQuery::default();
        assert_eq!(resolve(&observations, &query, &policy()).unwrap().region, "TO");

        assert!(resolve(&[], &query, &policy()).is_none());
    }

    #[test]
    fn charge_regime_is_filtered() {
        let mut without = obs(1, "a", "RS", "10");
        without.charge_regime = ChargeRegime::WithoutCharges;
        let observations = vec![without];

        let query = PriceQuery::default();
        assert!(resolve(&observations, &query, &policy()).is_none());

        let query = PriceQuery {
            charges: Some(ChargeRegime::WithoutCharges),
            ..Default::default()
        };
        assert!(resolve(&observations, &query, &policy()).is_some());
    }

    #[test]
    fn period_ceiling_excludes_newer_observations() {
        let mut newer = obs(1, "a", "RS", "20");
        newer.period = Period { year: 2024, month: 8 };
        let older = obs(2, "a", "RS", "10");
        let observations = vec![newer, older];

        let query = PriceQuery {
            up_to: Some(Period { year: 2024, month: 7 }),
            ..Default::default()
        };
        let found = resolve(&observations, &query, &policy()).unwrap();
        assert_eq!(found.price, dec("10"));
    }

    fn test_item(id: &str, code: &str, kind: ItemKind) -> CatalogItem {
        CatalogItem {
            id: id.to_string(),
            source_id: 1,
            code: code.to_string(),
            description: format!("item {}", code),
            unit: "UN".to_string(),
            kind,
            methodology: Methodology::Unitary,
            is_official: true,
            is_locked: true,
        }
    }

    #[tokio::test]
    async fn composition_cost_is_weighted_sum_of_children() {
        let store = MemoryStore::new();
        store
            .insert_items(&[
                test_item("comp", "90001", ItemKind::Composition),
                test_item("sand", "1001", ItemKind::Material),
                test_item("cement", "1002", ItemKind::Material),
            ])
            .await
            .unwrap();

        let period = Period { year: 2024, month: 7 };
        store
            .insert_prices(&[
                NewPrice {
                    item_id: "sand".into(),
                    region: "RS".into(),
                    price: dec("10.00"),
                    period,
                    charge_regime: ChargeRegime::WithCharges,
                },
                NewPrice {
                    item_id: "cement".into(),
                    region: "RS".into(),
                    price: dec("5.00"),
                    period,
                    charge_regime: ChargeRegime::WithCharges,
                },
            ])
            .await
            .unwrap();

        store
            .replace_source_links(
                1,
                &[
                    crate::models::CompositionLink {
                        parent_item_id: "comp".into(),
                        child_item_id: "sand".into(),
                        coefficient: dec("2.0"),
                        price_snapshot: None,
                    },
                    crate::models::CompositionLink {
                        parent_item_id: "comp".into(),
                        child_item_id: "cement".into(),
                        coefficient: dec("3.0"),
                        price_snapshot: None,
                    },
                ],
            )
            .await
            .unwrap();

        let query = PriceQuery {
            region: Some("RS".to_string()),
            ..Default::default()
        };
        let breakdown = composition_breakdown(&store, "comp", &query, &policy())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(breakdown.ingredients.len(), 2);
        assert_eq!(breakdown.calculated_cost, dec("35.00"));
    }

    #[tokio::test]
    async fn snapshot_price_is_zero_when_absent() {
        let store = MemoryStore::new();
        store
            .insert_items(&[test_item("lonely", "77", ItemKind::Material)])
            .await
            .unwrap();
        let price = snapshot_unit_price(&store, "lonely", &PriceQuery::default(), &policy())
            .await
            .unwrap();
        assert_eq!(price, Decimal::ZERO);
    }
}
