//! Import orchestration.
//!
//! Parsing happens off the async path (`spawn_blocking`); ingestion
//! then runs against the store in bounded batches, committing and
//! yielding between batches so a multi-hundred-thousand-row catalog
//! neither holds one giant transaction nor starves the scheduler.
//! Identity caches seeded from existing data make re-imports
//! idempotent: an item is keyed by `(source, code)` forever, and a
//! price cell is skipped when its `(item, region, regime)` key already
//! holds an active observation in the window.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::analytic::{extract_links, AnalyticLink};
use crate::classify::{
    classify_sheets, period_from_filename, unwrap_payload, CatalogKind, SheetTag,
};
use crate::config::ImportConfig;
use crate::header::locate_layout;
use crate::models::{
    CatalogItem, ChargeRegime, CompositionLink, ItemKind, Methodology, Period,
    SicroProductionRate, SicroTeamLink,
};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::rows::{extract_rows, CatalogRow, ExtractionStats};
use crate::sicro::{normalize_code, scan_report, SicroParse};
use crate::store::{CatalogStore, NewPrice};
use crate::workbook::Workbook;

#[derive(Debug, Error)]
pub enum ImportError {
    /// Nothing was written; the message is surfaced to the caller verbatim.
    #[error("{0}")]
    Structural(String),
    /// A SICRO composition had crew rows but no materials; the run is rejected.
    #[error("incomplete import: {0}")]
    Incomplete(String),
    /// Persistence failure; the failing batch rolled back.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Caller-supplied import parameters.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub source_name: String,
    pub source_description: String,
    /// Narrow a multi-region workbook to one UF, or name the UF of a
    /// single-region workbook.
    pub region: Option<String>,
    /// Validity period; parsed from the filename when absent.
    pub period: Option<Period>,
    /// Deactivate the target window's active prices before inserting.
    pub replace: bool,
    /// Recorded on deactivated rows (job id or operator name).
    pub actor: Option<String>,
}

/// Closing summary of a tabular catalog import.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ImportOutcome {
    pub period: Option<Period>,
    pub sheets: usize,
    pub items_created: u64,
    pub prices_inserted: u64,
    pub prices_deactivated: u64,
    pub links_replaced: u64,
    pub rows_skipped: usize,
    pub prices_unparseable: usize,
}

/// Closing summary of a SICRO analytic import.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SicroOutcome {
    pub compositions: usize,
    pub items_created: u64,
    pub team_links: u64,
    pub material_links: u64,
}

/// One classified-and-extracted catalog sheet.
#[derive(Debug, Clone)]
pub struct ParsedSheet {
    pub name: String,
    pub kind: CatalogKind,
    pub regime: ChargeRegime,
    pub rows: Vec<CatalogRow>,
    pub stats: ExtractionStats,
}

/// Everything the parse phase hands to ingestion.
#[derive(Debug, Clone)]
pub struct ParsedWorkbook {
    pub sheets: Vec<ParsedSheet>,
    pub links: Vec<AnalyticLink>,
    pub effective_filename: String,
}

/// SHA-256 of the uploaded payload, recorded on the job row.
pub fn payload_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Best-effort cross-process exclusion. A stale sentinel only warns:
/// manual runs kept dying on leftover lock files, so the lock
/// documents intent without enforcing it. Removed on drop.
pub struct ImportLock {
    path: PathBuf,
}

impl ImportLock {
    pub fn acquire(path: &Path) -> Self {
        if path.exists() {
            tracing::warn!(lock = %path.display(), "lock file present; proceeding anyway");
        } else if let Err(err) = std::fs::write(path, format!("{}\n", std::process::id())) {
            tracing::warn!(lock = %path.display(), %err, "could not create lock file");
        }
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl Drop for ImportLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// CPU-bound parse of a catalog payload: unwrap, classify, locate,
/// extract. Pure with respect to the store; runs under `spawn_blocking`.
pub fn parse_catalog_workbook(
    bytes: Vec<u8>,
    filename: &str,
    region_filter: Option<&str>,
    config: &ImportConfig,
) -> Result<ParsedWorkbook, ImportError> {
    let (bytes, effective_filename) =
        unwrap_payload(bytes, filename).map_err(ImportError::Structural)?;

    let workbook = Workbook::from_bytes(&bytes)
        .map_err(|e| ImportError::Structural(format!("could not read workbook: {}", e)))?;

    let classified = classify_sheets(workbook.sheets.iter().map(|s| s.name.as_str()));
    if !classified
        .iter()
        .any(|c| matches!(c.tag, SheetTag::Catalog { .. }))
    {
        return Err(ImportError::Structural(
            "no composition or input sheet found in the workbook".to_string(),
        ));
    }

    let mut sheets = Vec::new();
    let mut links = Vec::new();

    for entry in &classified {
        let Some(sheet) = workbook.sheet(&entry.name) else { continue };
        match entry.tag {
            SheetTag::Analytic => {
                links.extend(extract_links(&sheet.rows, config.analytic_scan_rows));
            }
            SheetTag::Catalog { kind, regime } => {
                let layout = match locate_layout(
                    &sheet.rows,
                    config.header_scan_rows,
                    region_filter,
                    &effective_filename,
                ) {
                    Ok(layout) => layout,
                    Err(_) => continue,
                };
                let (rows, stats) = extract_rows(&sheet.rows, &layout);
                if rows.is_empty() {
                    continue;
                }
                sheets.push(ParsedSheet {
                    name: entry.name.clone(),
                    kind,
                    regime,
                    rows,
                    stats,
                });
            }
        }
    }

    if sheets.is_empty() {
        return Err(ImportError::Structural(
            "no importable catalog sheet: header row or region columns not found".to_string(),
        ));
    }

    Ok(ParsedWorkbook {
        sheets,
        links,
        effective_filename,
    })
}

/// Full tabular import: parse off-thread, then ingest.
pub async fn run_catalog_import(
    store: &dyn CatalogStore,
    config: &ImportConfig,
    options: &ImportOptions,
    bytes: Vec<u8>,
    filename: &str,
    progress: &dyn ProgressReporter,
) -> Result<ImportOutcome, ImportError> {
    report(progress, 2, "Reading workbook...");

    let parse_config = config.clone();
    let parse_filename = filename.to_string();
    let parse_region = options.region.clone();
    let parsed = tokio::task::spawn_blocking(move || {
        parse_catalog_workbook(
            bytes,
            &parse_filename,
            parse_region.as_deref(),
            &parse_config,
        )
    })
    .await
    .map_err(|e| ImportError::Store(anyhow::anyhow!("parse task failed: {}", e)))??;

    ingest_catalog(store, config, options, parsed, progress).await
}

/// Ingests a parsed workbook. Separated from the parse so the batch,
/// replace, and idempotence semantics are testable against the
/// in-memory store.
pub async fn ingest_catalog(
    store: &dyn CatalogStore,
    config: &ImportConfig,
    options: &ImportOptions,
    parsed: ParsedWorkbook,
    progress: &dyn ProgressReporter,
) -> Result<ImportOutcome, ImportError> {
    let period = options
        .period
        .or_else(|| period_from_filename(&parsed.effective_filename))
        .ok_or_else(|| {
            ImportError::Structural(format!(
                "could not infer month/year from '{}'; pass them explicitly or use the \
                 SOURCE_YYYYMM naming convention",
                parsed.effective_filename
            ))
        })?;

    report(
        progress,
        10,
        &format!("Workbook read. Period {}. Importing...", period),
    );

    let _lock = ImportLock::acquire(&config.lock_file);

    let source = store
        .ensure_source(&options.source_name, &options.source_description)
        .await?;

    let mut outcome = ImportOutcome {
        period: Some(period),
        sheets: parsed.sheets.len(),
        ..Default::default()
    };

    if options.replace {
        outcome.prices_deactivated = store
            .deactivate_prices(
                source.id,
                period,
                options.region.as_deref().filter(|r| *r != "ALL"),
                options.actor.as_deref(),
            )
            .await?;
        tracing::info!(
            source = %options.source_name,
            %period,
            deactivated = outcome.prices_deactivated,
            "replace mode: prior active window deactivated"
        );
    }

    // Identity caches, seeded from existing data.
    let mut item_cache: HashMap<String, String> =
        store.item_codes(source.id).await?.into_iter().collect();
    let mut price_keys: HashSet<(String, String, ChargeRegime)> = store
        .active_price_keys(source.id, period)
        .await?
        .into_iter()
        .collect();

    let total_sheets = parsed.sheets.len();
    for (sheet_idx, sheet) in parsed.sheets.iter().enumerate() {
        let pct = 10 + ((sheet_idx as f64 / total_sheets as f64) * 40.0) as u8;
        report(
            progress,
            pct,
            &format!("Processing sheet {} ({} rows)", sheet.name, sheet.rows.len()),
        );
        outcome.rows_skipped += sheet.stats.rows_skipped;
        outcome.prices_unparseable += sheet.stats.prices_unparseable;

        // New items first, so every price row resolves an id.
        let mut item_batch: Vec<CatalogItem> = Vec::new();
        for row in &sheet.rows {
            if item_cache.contains_key(&row.code) {
                continue;
            }
            let kind = match sheet.kind {
                CatalogKind::Composition => ItemKind::Service,
                CatalogKind::Input => infer_input_kind(&row.description),
            };
            let item = CatalogItem {
                id: Uuid::new_v4().to_string(),
                source_id: source.id,
                code: row.code.clone(),
                description: row.description.clone(),
                unit: if row.unit.is_empty() {
                    "UN".to_string()
                } else {
                    row.unit.clone()
                },
                kind,
                methodology: Methodology::Unitary,
                is_official: true,
                is_locked: true,
            };
            item_cache.insert(item.code.clone(), item.id.clone());
            item_batch.push(item);
            outcome.items_created += 1;

            if item_batch.len() >= config.item_batch {
                store.insert_items(&item_batch).await?;
                item_batch.clear();
                tokio::task::yield_now().await;
            }
        }
        if !item_batch.is_empty() {
            store.insert_items(&item_batch).await?;
        }

        // Prices, deduplicated against the window's active keys.
        let mut price_batch: Vec<NewPrice> = Vec::new();
        for row in &sheet.rows {
            let Some(item_id) = item_cache.get(&row.code) else { continue };
            for (region, price) in &row.prices {
                let key = (item_id.clone(), region.clone(), sheet.regime);
                if price_keys.contains(&key) {
                    continue;
                }
                price_keys.insert(key);
                price_batch.push(NewPrice {
                    item_id: item_id.clone(),
                    region: region.clone(),
                    price: *price,
                    period,
                    charge_regime: sheet.regime,
                });
                outcome.prices_inserted += 1;

                if price_batch.len() >= config.price_batch {
                    store.insert_prices(&price_batch).await?;
                    price_batch.clear();
                    tokio::task::yield_now().await;
                }
            }
        }
        if !price_batch.is_empty() {
            store.insert_prices(&price_batch).await?;
        }
    }

    if !parsed.links.is_empty() {
        report(
            progress,
            90,
            &format!("Rebuilding {} composition links...", parsed.links.len()),
        );
        let links: Vec<CompositionLink> = parsed
            .links
            .iter()
            .filter_map(|link| {
                let parent = item_cache.get(&link.parent_code)?;
                let child = item_cache.get(&link.child_code)?;
                Some(CompositionLink {
                    parent_item_id: parent.clone(),
                    child_item_id: child.clone(),
                    coefficient: link.coefficient,
                    price_snapshot: None,
                })
            })
            .collect();
        outcome.links_replaced = store.replace_source_links(source.id, &links).await?;
        report(
            progress,
            95,
            &format!("Composition links rebuilt ({})", outcome.links_replaced),
        );
    }

    report(progress, 100, "Import completed");
    Ok(outcome)
}

/// Input-sheet items carry no kind column; the description tells the
/// labor and equipment entries apart from plain materials.
fn infer_input_kind(description: &str) -> ItemKind {
    let folded = crate::classify::fold_text(description);
    if folded.contains("MAO DE OBRA") || folded.contains("ENCARGOS") {
        ItemKind::Labor
    } else if folded.contains("EQUIPAMENTO") {
        ItemKind::Equipment
    } else {
        ItemKind::Material
    }
}

/// Full SICRO analytic import: scan the report off-thread, enforce the
/// completeness gate, then persist per-composition graphs.
pub async fn run_sicro_import(
    store: &dyn CatalogStore,
    config: &ImportConfig,
    options: &ImportOptions,
    bytes: Vec<u8>,
    filename: &str,
    progress: &dyn ProgressReporter,
) -> Result<SicroOutcome, ImportError> {
    report(progress, 2, "Reading analytic report...");

    let (bytes, _effective) = unwrap_payload(bytes, filename).map_err(ImportError::Structural)?;

    let source = store
        .ensure_source(&options.source_name, &options.source_description)
        .await?;

    // Cache keyed by zero-stripped code: the report pads codes that the
    // catalog stores bare.
    let mut item_cache: HashMap<String, String> = store
        .item_codes(source.id)
        .await?
        .into_iter()
        .map(|(code, id)| (normalize_code(&code), id))
        .collect();

    let known_codes: HashSet<String> = item_cache.keys().cloned().collect();
    let parse: SicroParse = tokio::task::spawn_blocking(move || {
        let workbook = Workbook::from_bytes(&bytes)
            .map_err(|e| ImportError::Structural(format!("could not read workbook: {}", e)))?;
        let sheet = workbook
            .sheets
            .first()
            .ok_or_else(|| ImportError::Structural("workbook has no sheets".to_string()))?;
        Ok::<_, ImportError>(scan_report(&sheet.rows, &|code| known_codes.contains(code)))
    })
    .await
    .map_err(|e| ImportError::Store(anyhow::anyhow!("parse task failed: {}", e)))??;

    ingest_sicro(store, config, options, source.id, &mut item_cache, parse, progress).await
}

/// Persists a scanned analytic report. All-or-nothing: the
/// completeness gate runs before the first write, so a rejected report
/// leaves the catalog untouched.
pub async fn ingest_sicro(
    store: &dyn CatalogStore,
    config: &ImportConfig,
    options: &ImportOptions,
    source_id: i64,
    item_cache: &mut HashMap<String, String>,
    parse: SicroParse,
    progress: &dyn ProgressReporter,
) -> Result<SicroOutcome, ImportError> {
    let incomplete = parse.incomplete_codes();
    if !incomplete.is_empty() {
        return Err(ImportError::Incomplete(format!(
            "{} composition(s) with crew but no materials: {}",
            incomplete.len(),
            incomplete.join(", ")
        )));
    }

    report(
        progress,
        30,
        &format!("Report scanned: {} compositions", parse.compositions.len()),
    );

    let _lock = ImportLock::acquire(&config.lock_file);

    let mut outcome = SicroOutcome {
        compositions: parse.compositions.len(),
        ..Default::default()
    };

    // Members unknown to the catalog are created first, in batches.
    let mut new_items: Vec<CatalogItem> = Vec::new();
    for comp in &parse.compositions {
        for member in comp.team.iter().chain(comp.materials.iter()) {
            let key = normalize_code(&member.code);
            if item_cache.contains_key(&key) {
                continue;
            }
            let item = CatalogItem {
                id: Uuid::new_v4().to_string(),
                source_id,
                code: member.code.clone(),
                description: member.description.clone(),
                unit: member.unit.clone(),
                kind: member.kind,
                methodology: Methodology::Production,
                is_official: true,
                is_locked: true,
            };
            item_cache.insert(key, item.id.clone());
            new_items.push(item);
            outcome.items_created += 1;
        }
    }
    for batch in new_items.chunks(config.item_batch) {
        store.insert_items(batch).await?;
        tokio::task::yield_now().await;
    }

    let total = parse.compositions.len().max(1);
    for (idx, comp) in parse.compositions.iter().enumerate() {
        let Some(comp_id) = item_cache.get(&normalize_code(&comp.code)).cloned() else {
            continue;
        };

        let team: Vec<SicroTeamLink> = comp
            .team
            .iter()
            .filter_map(|member| {
                let member_id = item_cache.get(&normalize_code(&member.code))?;
                Some(SicroTeamLink {
                    composition_item_id: comp_id.clone(),
                    member_item_id: member_id.clone(),
                    quantity: member.quantity,
                })
            })
            .collect();
        let materials: Vec<CompositionLink> = comp
            .materials
            .iter()
            .filter_map(|member| {
                let member_id = item_cache.get(&normalize_code(&member.code))?;
                Some(CompositionLink {
                    parent_item_id: comp_id.clone(),
                    child_item_id: member_id.clone(),
                    coefficient: member.quantity,
                    price_snapshot: None,
                })
            })
            .collect();
        let production = comp.production.as_ref().map(|(rate, unit)| SicroProductionRate {
            item_id: comp_id.clone(),
            hourly_rate: *rate,
            unit: unit.clone(),
        });

        outcome.team_links += team.len() as u64;
        outcome.material_links += materials.len() as u64;

        store
            .replace_composition_graph(&comp_id, &team, &materials, production.as_ref())
            .await?;

        if (idx + 1) % 100 == 0 {
            let pct = 30 + ((idx as f64 / total as f64) * 65.0) as u8;
            report(
                progress,
                pct,
                &format!("Persisted {} of {} compositions", idx + 1, total),
            );
            tokio::task::yield_now().await;
        }
    }

    report(progress, 100, "Analytic import completed");
    Ok(outcome)
}

fn report(progress: &dyn ProgressReporter, percent: u8, message: &str) {
    progress.report(ProgressEvent {
        percent: percent.min(100),
        message: message.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::store::MemoryStore;
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn options(replace: bool) -> ImportOptions {
        ImportOptions {
            source_name: "SINAPI".to_string(),
            source_description: "national construction cost survey".to_string(),
            region: None,
            period: None,
            replace,
            actor: Some("test".to_string()),
        }
    }

    fn catalog_row(code: &str, desc: &str, prices: &[(&str, &str)]) -> CatalogRow {
        CatalogRow {
            code: code.to_string(),
            description: desc.to_string(),
            unit: "UN".to_string(),
            prices: prices
                .iter()
                .map(|(region, price)| (region.to_string(), dec(price)))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn parsed(rows: Vec<CatalogRow>, links: Vec<AnalyticLink>) -> ParsedWorkbook {
        ParsedWorkbook {
            sheets: vec![ParsedSheet {
                name: "ICD".to_string(),
                kind: CatalogKind::Input,
                regime: ChargeRegime::WithCharges,
                rows,
                stats: ExtractionStats::default(),
            }],
            links,
            effective_filename: "SINAPI_202407.xlsx".to_string(),
        }
    }

    #[tokio::test]
    async fn reimport_without_replace_inserts_nothing_new() {
        let store = MemoryStore::new();
        let config = ImportConfig::default();
        let workbook = parsed(
            vec![
                catalog_row("1001", "Cimento", &[("SP", "10.00")]),
                catalog_row("1002", "Areia", &[("SP", "5.00")]),
            ],
            vec![],
        );

        let first = ingest_catalog(&store, &config, &options(false), workbook.clone(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(first.items_created, 2);
        assert_eq!(first.prices_inserted, 2);

        let second = ingest_catalog(&store, &config, &options(false), workbook, &NoProgress)
            .await
            .unwrap();
        assert_eq!(second.items_created, 0);
        assert_eq!(second.prices_inserted, 0);
        assert_eq!(store.all_items().len(), 2);
        assert_eq!(store.all_prices().len(), 2);
    }

    #[tokio::test]
    async fn replace_deactivates_prior_window_and_keeps_one_active_row_per_key() {
        let store = MemoryStore::new();
        let config = ImportConfig::default();
        let workbook = parsed(vec![catalog_row("1001", "Cimento", &[("SP", "10.00")])], vec![]);

        ingest_catalog(&store, &config, &options(false), workbook.clone(), &NoProgress)
            .await
            .unwrap();
        let outcome = ingest_catalog(&store, &config, &options(true), workbook, &NoProgress)
            .await
            .unwrap();

        assert_eq!(outcome.prices_deactivated, 1);
        assert_eq!(outcome.prices_inserted, 1);

        let prices = store.all_prices();
        assert_eq!(prices.len(), 2);
        let active: Vec<_> = prices.iter().filter(|p| p.is_active).collect();
        let inactive: Vec<_> = prices.iter().filter(|p| !p.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(inactive.len(), 1);
        assert_eq!(inactive[0].inactivated_by.as_deref(), Some("test"));
    }

    #[tokio::test]
    async fn missing_period_is_a_structural_error_before_any_write() {
        let store = MemoryStore::new();
        let config = ImportConfig::default();
        let mut workbook = parsed(vec![catalog_row("1001", "Cimento", &[("SP", "10.00")])], vec![]);
        workbook.effective_filename = "planilha-sem-data.xlsx".to_string();

        let err = ingest_catalog(&store, &config, &options(false), workbook, &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Structural(_)));
        assert!(store.all_items().is_empty());
        assert!(store.all_prices().is_empty());
    }

    #[tokio::test]
    async fn links_are_rebuilt_wholesale_per_import() {
        let store = MemoryStore::new();
        let config = ImportConfig::default();

        let link = |parent: &str, child: &str, coef: &str| AnalyticLink {
            parent_code: parent.to_string(),
            child_code: child.to_string(),
            coefficient: dec(coef),
        };

        let workbook = parsed(
            vec![
                catalog_row("90001", "Alvenaria de vedação", &[("SP", "100.00")]),
                catalog_row("1001", "Cimento", &[("SP", "10.00")]),
                catalog_row("1002", "Areia", &[("SP", "5.00")]),
            ],
            vec![link("90001", "1001", "2.0"), link("90001", "1002", "3.0")],
        );
        ingest_catalog(&store, &config, &options(false), workbook, &NoProgress)
            .await
            .unwrap();
        assert_eq!(store.all_links().len(), 2);

        // Re-import with a shrunk ingredient list: old rows must not survive.
        let workbook = parsed(
            vec![
                catalog_row("90001", "Alvenaria de vedação", &[("SP", "100.00")]),
                catalog_row("1001", "Cimento", &[("SP", "10.00")]),
            ],
            vec![link("90001", "1001", "4.0")],
        );
        ingest_catalog(&store, &config, &options(false), workbook, &NoProgress)
            .await
            .unwrap();

        let links = store.all_links();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].coefficient, dec("4.0"));
    }

    #[tokio::test]
    async fn links_with_unresolvable_endpoints_are_dropped() {
        let store = MemoryStore::new();
        let config = ImportConfig::default();
        let workbook = parsed(
            vec![catalog_row("90001", "Alvenaria", &[("SP", "100.00")])],
            vec![AnalyticLink {
                parent_code: "90001".to_string(),
                child_code: "4040".to_string(),
                coefficient: dec("1.0"),
            }],
        );
        let outcome = ingest_catalog(&store, &config, &options(false), workbook, &NoProgress)
            .await
            .unwrap();
        assert_eq!(outcome.links_replaced, 0);
        assert!(store.all_links().is_empty());
    }

    #[tokio::test]
    async fn input_kind_inference_follows_description() {
        assert_eq!(infer_input_kind("SERVENTE COM ENCARGOS"), ItemKind::Labor);
        assert_eq!(infer_input_kind("Mão de obra de pedreiro"), ItemKind::Labor);
        assert_eq!(
            infer_input_kind("EQUIPAMENTO VIBRADOR DE IMERSÃO"),
            ItemKind::Equipment
        );
        assert_eq!(infer_input_kind("Cimento Portland"), ItemKind::Material);
    }

    mod sicro {
        use super::*;
        use crate::models::ItemKind;
        use crate::sicro::{ParsedComposition, ParsedMember};

        fn member(code: &str, kind: ItemKind, qty: &str) -> ParsedMember {
            ParsedMember {
                code: code.to_string(),
                description: format!("member {}", code),
                unit: "h".to_string(),
                quantity: dec(qty),
                kind,
            }
        }

        async fn seed_composition(store: &MemoryStore) -> (i64, HashMap<String, String>) {
            let source = store.ensure_source("SICRO", "road works costs").await.unwrap();
            store
                .insert_items(&[CatalogItem {
                    id: "comp-1".to_string(),
                    source_id: source.id,
                    code: "0307731".to_string(),
                    description: "Escavação mecânica".to_string(),
                    unit: "m³".to_string(),
                    kind: ItemKind::Composition,
                    methodology: Methodology::Production,
                    is_official: true,
                    is_locked: true,
                }])
                .await
                .unwrap();
            let cache: HashMap<String, String> = store
                .item_codes(source.id)
                .await
                .unwrap()
                .into_iter()
                .map(|(code, id)| (normalize_code(&code), id))
                .collect();
            (source.id, cache)
        }

        #[tokio::test]
        async fn persists_graph_and_creates_members_on_the_fly() {
            let store = MemoryStore::new();
            let (source_id, mut cache) = seed_composition(&store).await;

            let parse = SicroParse {
                compositions: vec![ParsedComposition {
                    code: "0307731".to_string(),
                    production: Some((dec("35.00"), "m³".to_string())),
                    team: vec![member("E9524", ItemKind::Equipment, "1.0")],
                    materials: vec![member("M0305", ItemKind::Material, "0.25")],
                }],
            };

            let outcome = ingest_sicro(
                &store,
                &ImportConfig::default(),
                &options(false),
                source_id,
                &mut cache,
                parse,
                &NoProgress,
            )
            .await
            .unwrap();

            assert_eq!(outcome.compositions, 1);
            assert_eq!(outcome.items_created, 2);
            assert_eq!(outcome.team_links, 1);
            assert_eq!(outcome.material_links, 1);
            assert_eq!(store.all_team_links().len(), 1);
            assert_eq!(store.all_links().len(), 1);
            assert!(store.production_rate("comp-1").await.unwrap().is_some());
        }

        #[tokio::test]
        async fn completeness_gate_rejects_before_any_write() {
            let store = MemoryStore::new();
            let (source_id, mut cache) = seed_composition(&store).await;
            let items_before = store.all_items().len();

            let parse = SicroParse {
                compositions: vec![ParsedComposition {
                    code: "0307731".to_string(),
                    production: None,
                    team: vec![member("E9524", ItemKind::Equipment, "1.0")],
                    materials: vec![],
                }],
            };

            let err = ingest_sicro(
                &store,
                &ImportConfig::default(),
                &options(false),
                source_id,
                &mut cache,
                parse,
                &NoProgress,
            )
            .await
            .unwrap_err();

            assert!(matches!(err, ImportError::Incomplete(_)));
            assert_eq!(store.all_items().len(), items_before);
            assert!(store.all_team_links().is_empty());
            assert!(store.all_links().is_empty());
        }

        #[tokio::test]
        async fn rerun_replaces_the_composition_graph() {
            let store = MemoryStore::new();
            let (source_id, mut cache) = seed_composition(&store).await;

            let parse = |qty: &str| SicroParse {
                compositions: vec![ParsedComposition {
                    code: "0307731".to_string(),
                    production: None,
                    team: vec![member("E9524", ItemKind::Equipment, qty)],
                    materials: vec![member("M0305", ItemKind::Material, "0.25")],
                }],
            };

            ingest_sicro(
                &store,
                &ImportConfig::default(),
                &options(false),
                source_id,
                &mut cache,
                parse("1.0"),
                &NoProgress,
            )
            .await
            .unwrap();
            ingest_sicro(
                &store,
                &ImportConfig::default(),
                &options(false),
                source_id,
                &mut cache,
                parse("2.0"),
                &NoProgress,
            )
            .await
            .unwrap();

            let team = store.all_team_links();
            assert_eq!(team.len(), 1);
            assert_eq!(team[0].quantity, dec("2.0"));
        }
    }

    #[test]
    fn payload_hash_is_stable_sha256() {
        assert_eq!(
            payload_hash(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
