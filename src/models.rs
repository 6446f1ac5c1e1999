//! Core data models for the catalog engine.
//!
//! These types represent the sources, items, price observations, and
//! composition edges that flow through the import pipeline and the
//! price resolver.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A catalog publisher (SINAPI, SICRO, ...). Created lazily on first
/// import, never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogSource {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

/// What a catalog item is priced as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemKind {
    Service,
    Composition,
    Material,
    Labor,
    Equipment,
    Input,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Service => "SERVICE",
            ItemKind::Composition => "COMPOSITION",
            ItemKind::Material => "MATERIAL",
            ItemKind::Labor => "LABOR",
            ItemKind::Equipment => "EQUIPMENT",
            ItemKind::Input => "INPUT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SERVICE" => Some(ItemKind::Service),
            "COMPOSITION" => Some(ItemKind::Composition),
            "MATERIAL" => Some(ItemKind::Material),
            "LABOR" => Some(ItemKind::Labor),
            "EQUIPMENT" => Some(ItemKind::Equipment),
            "INPUT" => Some(ItemKind::Input),
            _ => None,
        }
    }
}

/// How a composition's cost relates to its ingredients: a unitary bill
/// of materials (SINAPI) or an hourly crew production rate (SICRO).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Methodology {
    Unitary,
    Production,
}

impl Methodology {
    pub fn as_str(&self) -> &'static str {
        match self {
            Methodology::Unitary => "UNITARY",
            Methodology::Production => "PRODUCTION",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UNITARY" => Some(Methodology::Unitary),
            "PRODUCTION" => Some(Methodology::Production),
            _ => None,
        }
    }
}

/// Whether statutory labor charges are embedded in quoted prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeRegime {
    WithCharges,
    WithoutCharges,
}

impl ChargeRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeRegime::WithCharges => "WITH_CHARGES",
            ChargeRegime::WithoutCharges => "WITHOUT_CHARGES",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WITH_CHARGES" => Some(ChargeRegime::WithCharges),
            "WITHOUT_CHARGES" => Some(ChargeRegime::WithoutCharges),
            _ => None,
        }
    }
}

/// A priced entry from an official publisher. Identity is
/// `(source_id, code)`; locked items are never edited by this engine.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogItem {
    pub id: String,
    pub source_id: i64,
    pub code: String,
    pub description: String,
    pub unit: String,
    pub kind: ItemKind,
    pub methodology: Methodology,
    pub is_official: bool,
    pub is_locked: bool,
}

/// Month-granularity validity period of a price observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// One observed price for an item in a (region, charge regime, period)
/// cell of the index. Append-only: replaced observations are soft
/// deactivated, never deleted.
#[derive(Debug, Clone, Serialize)]
pub struct PriceObservation {
    pub id: i64,
    pub item_id: String,
    pub region: String,
    pub price: Decimal,
    pub currency: String,
    pub period: Period,
    pub charge_regime: ChargeRegime,
    pub is_active: bool,
    pub inactivated_at: Option<DateTime<Utc>>,
    pub inactivated_by: Option<String>,
}

/// A one-level ingredient edge of a composition's bill of materials.
/// Rows for a parent are replaced wholesale on each re-import.
#[derive(Debug, Clone, Serialize)]
pub struct CompositionLink {
    pub parent_item_id: String,
    pub child_item_id: String,
    pub coefficient: Decimal,
    pub price_snapshot: Option<Decimal>,
}

/// A crew/headcount edge produced by the SICRO analytic parser,
/// distinct from the material ingredient graph.
#[derive(Debug, Clone, Serialize)]
pub struct SicroTeamLink {
    pub composition_item_id: String,
    pub member_item_id: String,
    pub quantity: Decimal,
}

/// Hourly crew production rate extracted from a SICRO composition
/// metadata block.
#[derive(Debug, Clone, Serialize)]
pub struct SicroProductionRate {
    pub item_id: String,
    pub hourly_rate: Decimal,
    pub unit: String,
}

/// Lifecycle status of an import job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }
}

/// Durable state of one import run, polled by callers while the worker
/// reports progress.
#[derive(Debug, Clone, Serialize)]
pub struct ImportJobState {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub filename: String,
    pub file_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
