use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::ChargeRegime;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub import: ImportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

/// Region fallback policy for the price resolver. The order is a
/// deployment decision, not a constant: the catalogs never cover every
/// region, and which regions stand in for missing ones depends on
/// which publishers a deployment imports.
#[derive(Debug, Deserialize, Clone)]
pub struct PricingConfig {
    #[serde(default = "default_preferred_regions")]
    pub preferred_regions: Vec<String>,
    #[serde(default = "default_charge_regime")]
    pub default_charges: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            preferred_regions: default_preferred_regions(),
            default_charges: default_charge_regime(),
        }
    }
}

fn default_preferred_regions() -> Vec<String> {
    vec!["RS".to_string(), "SP".to_string()]
}

fn default_charge_regime() -> String {
    "WITH_CHARGES".to_string()
}

impl PricingConfig {
    pub fn default_charge_regime(&self) -> ChargeRegime {
        ChargeRegime::parse(&self.default_charges).unwrap_or(ChargeRegime::WithCharges)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    #[serde(default = "default_item_batch")]
    pub item_batch: usize,
    #[serde(default = "default_price_batch")]
    pub price_batch: usize,
    #[serde(default = "default_header_scan_rows")]
    pub header_scan_rows: usize,
    #[serde(default = "default_analytic_scan_rows")]
    pub analytic_scan_rows: usize,
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            item_batch: default_item_batch(),
            price_batch: default_price_batch(),
            header_scan_rows: default_header_scan_rows(),
            analytic_scan_rows: default_analytic_scan_rows(),
            lock_file: default_lock_file(),
        }
    }
}

fn default_item_batch() -> usize {
    1000
}
fn default_price_batch() -> usize {
    2000
}
fn default_header_scan_rows() -> usize {
    50
}
fn default_analytic_scan_rows() -> usize {
    80
}
fn default_lock_file() -> PathBuf {
    PathBuf::from("import.lock")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.import.item_batch == 0 || config.import.price_batch == 0 {
        anyhow::bail!("import.item_batch and import.price_batch must be > 0");
    }

    if config.import.header_scan_rows == 0 {
        anyhow::bail!("import.header_scan_rows must be > 0");
    }

    if config.pricing.preferred_regions.is_empty() {
        anyhow::bail!("pricing.preferred_regions must list at least one region");
    }

    for region in &config.pricing.preferred_regions {
        if region.len() != 2 || !region.chars().all(|c| c.is_ascii_uppercase()) {
            anyhow::bail!(
                "pricing.preferred_regions entries must be two-letter UF codes, got '{}'",
                region
            );
        }
    }

    if ChargeRegime::parse(&config.pricing.default_charges).is_none() {
        anyhow::bail!(
            "pricing.default_charges must be WITH_CHARGES or WITHOUT_CHARGES, got '{}'",
            config.pricing.default_charges
        );
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let config: Config = toml::from_str(
            r#"
            [db]
            path = "data/custobase.sqlite"

            [server]
            bind = "127.0.0.1:7431"
            "#,
        )
        .unwrap();

        assert_eq!(config.pricing.preferred_regions, vec!["RS", "SP"]);
        assert_eq!(
            config.pricing.default_charge_regime(),
            ChargeRegime::WithCharges
        );
        assert_eq!(config.import.item_batch, 1000);
        assert_eq!(config.import.price_batch, 2000);
    }

    #[test]
    fn rejects_bad_region_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(
            &path,
            r#"
            [db]
            path = "data/custobase.sqlite"

            [server]
            bind = "127.0.0.1:7431"

            [pricing]
            preferred_regions = ["rio"]
            "#,
        )
        .unwrap();

        assert!(load_config(&path).is_err());
    }
}
