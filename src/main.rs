//! # Custobase CLI (`cbase`)
//!
//! The `cbase` binary drives the catalog engine from the command line:
//! database initialization, catalog imports, source listing,
//! composition inspection, and the HTTP server.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cbase init` | Create the SQLite database and run schema migrations |
//! | `cbase import <file>` | Import a catalog payload (xlsx/xls/zip) |
//! | `cbase sources` | List catalog sources with item counts |
//! | `cbase composition <id>` | Show a composition's resolved breakdown |
//! | `cbase serve` | Start the HTTP surface |
//!
//! ## Examples
//!
//! ```bash
//! cbase init --config ./config/cbase.toml
//!
//! # Monthly SINAPI release, all regions
//! cbase import SINAPI_202407.zip --source SINAPI
//!
//! # Replace an already-imported window for one region
//! cbase import SINAPI_202407.zip --source SINAPI --region RS --replace
//!
//! # SICRO analytic composition report
//! cbase import "RS 2024-07 Analitico.xlsx" --source SICRO --dialect analytic
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use custobase::config::{load_config, Config};
use custobase::import::{run_catalog_import, run_sicro_import, ImportOptions};
use custobase::models::{ChargeRegime, Period};
use custobase::pricing::{composition_breakdown, PricePolicy, PriceQuery};
use custobase::progress::ProgressMode;
use custobase::server::default_source_description;
use custobase::store::{CatalogStore, SqliteStore};
use custobase::{db, migrate, server};

/// Custobase CLI — ingestion and price resolution for official
/// construction cost catalogs.
#[derive(Parser)]
#[command(
    name = "cbase",
    about = "Custobase — ingestion and price resolution for official construction cost catalogs",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cbase.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all catalog tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Import a catalog payload (.xlsx, .xls, or .zip).
    Import {
        /// Path to the payload file.
        file: PathBuf,

        /// Publisher name (SINAPI, SICRO, ...). The source row is
        /// created on first use.
        #[arg(long)]
        source: String,

        /// Parser dialect: `tabular` catalog sheets or the SICRO
        /// `analytic` composition report.
        #[arg(long, default_value = "tabular")]
        dialect: String,

        /// Restrict to one UF (two-letter code), or name the UF of a
        /// single-region workbook.
        #[arg(long)]
        region: Option<String>,

        /// Validity month (1-12); inferred from the filename when omitted.
        #[arg(long)]
        month: Option<u32>,

        /// Validity year; inferred from the filename when omitted.
        #[arg(long)]
        year: Option<i32>,

        /// Deactivate the window's prior active prices before inserting.
        #[arg(long)]
        replace: bool,

        /// Progress output on stderr: auto, off, human, or json.
        #[arg(long, default_value = "auto")]
        progress: String,
    },

    /// List catalog sources with their item counts.
    Sources,

    /// Show a composition's resolved price breakdown.
    Composition {
        /// Catalog item id, or a publisher code when --source is given.
        id: String,

        /// Source name for code lookup (e.g. --source SINAPI).
        #[arg(long)]
        source: Option<String>,

        /// Region (UF) to resolve prices for.
        #[arg(long)]
        region: Option<String>,

        /// Charge regime: with or without.
        #[arg(long)]
        charges: Option<String>,
    },

    /// Start the HTTP surface.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("custobase=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&config).await?;
            println!("database initialized at {}", config.db.path.display());
        }
        Commands::Import {
            file,
            source,
            dialect,
            region,
            month,
            year,
            replace,
            progress,
        } => {
            run_import(
                &config, file, source, dialect, region, month, year, replace, progress,
            )
            .await?;
        }
        Commands::Sources => {
            let store = open_store(&config).await?;
            let sources = store.list_sources().await?;
            if sources.is_empty() {
                println!("no catalog sources yet — run an import first");
            }
            for summary in sources {
                println!(
                    "{:<10} {:>8} items  {}",
                    summary.source.name,
                    summary.item_count,
                    summary.source.description.as_deref().unwrap_or("")
                );
            }
        }
        Commands::Composition {
            id,
            source,
            region,
            charges,
        } => {
            let store = open_store(&config).await?;
            let policy = PricePolicy::from_config(&config.pricing);
            let query = PriceQuery {
                region: region.map(|r| r.to_uppercase()),
                charges: parse_charges(charges.as_deref())?,
                up_to: None,
            };
            let item_id = resolve_item_id(&store, &id, source.as_deref()).await?;
            let breakdown = composition_breakdown(&store, &item_id, &query, &policy)
                .await?
                .with_context(|| format!("no catalog item with id {}", item_id))?;

            println!(
                "{} {} [{}]",
                breakdown.item.code, breakdown.item.description, breakdown.item.unit
            );
            if let Some(production) = &breakdown.production {
                println!("  production: {} {}/h", production.hourly_rate, production.unit);
            }
            for member in &breakdown.team {
                println!(
                    "  crew  {:<10} {:<40} {:>10} x {:>10} = {:>12}",
                    member.item.code,
                    member.item.description,
                    member.coefficient,
                    member.unit_price,
                    member.total_price
                );
            }
            for child in &breakdown.ingredients {
                println!(
                    "  item  {:<10} {:<40} {:>10} x {:>10} = {:>12}",
                    child.item.code,
                    child.item.description,
                    child.coefficient,
                    child.unit_price,
                    child.total_price
                );
            }
            println!("  total {}", breakdown.calculated_cost.round_dp(2));
        }
        Commands::Serve => {
            let store = Arc::new(open_store(&config).await?);
            server::run_server(&config, store).await?;
        }
    }

    Ok(())
}

async fn open_store(config: &Config) -> anyhow::Result<SqliteStore> {
    let pool = db::connect(config).await?;
    Ok(SqliteStore::new(pool))
}

/// Accepts either an item id or, with `--source`, a publisher code.
async fn resolve_item_id(
    store: &SqliteStore,
    id_or_code: &str,
    source: Option<&str>,
) -> anyhow::Result<String> {
    if store.get_item(id_or_code).await?.is_some() {
        return Ok(id_or_code.to_string());
    }
    if let Some(source_name) = source {
        let sources = store.list_sources().await?;
        let source = sources
            .iter()
            .find(|s| s.source.name == source_name)
            .with_context(|| format!("no catalog source named {}", source_name))?;
        if let Some(item) = store.get_item_by_code(source.source.id, id_or_code).await? {
            return Ok(item.id);
        }
    }
    anyhow::bail!("no catalog item matching '{}'", id_or_code)
}

fn parse_charges(value: Option<&str>) -> anyhow::Result<Option<ChargeRegime>> {
    match value {
        None => Ok(None),
        Some("with") => Ok(Some(ChargeRegime::WithCharges)),
        Some("without") => Ok(Some(ChargeRegime::WithoutCharges)),
        Some(other) => anyhow::bail!("unknown charges value '{}': expected with or without", other),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_import(
    config: &Config,
    file: PathBuf,
    source: String,
    dialect: String,
    region: Option<String>,
    month: Option<u32>,
    year: Option<i32>,
    replace: bool,
    progress: String,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(&file)
        .with_context(|| format!("could not read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.xlsx".to_string());

    let period = match (year, month) {
        (Some(year), Some(month)) if (1..=12).contains(&month) => Some(Period { year, month }),
        (Some(_), Some(_)) => anyhow::bail!("month must be between 1 and 12"),
        (None, None) => None,
        _ => anyhow::bail!("pass --month and --year together"),
    };

    let mode = match progress.as_str() {
        "auto" => ProgressMode::default_for_tty(),
        "off" => ProgressMode::Off,
        "human" => ProgressMode::Human,
        "json" => ProgressMode::Json,
        other => anyhow::bail!("unknown progress mode '{}'", other),
    };
    let reporter = mode.reporter();

    let options = ImportOptions {
        source_description: default_source_description(&source).to_string(),
        source_name: source,
        region: region.map(|r| r.to_uppercase()),
        period,
        replace,
        actor: Some("cbase".to_string()),
    };

    let store = open_store(config).await?;

    match dialect.as_str() {
        "tabular" => {
            let outcome = run_catalog_import(
                &store,
                &config.import,
                &options,
                bytes,
                &filename,
                reporter.as_ref(),
            )
            .await?;
            println!("import {}", filename);
            if let Some(period) = outcome.period {
                println!("  period: {}", period);
            }
            println!("  sheets: {}", outcome.sheets);
            println!("  items created: {}", outcome.items_created);
            println!("  prices inserted: {}", outcome.prices_inserted);
            if options.replace {
                println!("  prices deactivated: {}", outcome.prices_deactivated);
            }
            println!("  links replaced: {}", outcome.links_replaced);
            println!("  rows skipped: {}", outcome.rows_skipped);
            println!("ok");
        }
        "analytic" => {
            let outcome = run_sicro_import(
                &store,
                &config.import,
                &options,
                bytes,
                &filename,
                reporter.as_ref(),
            )
            .await?;
            println!("import {}", filename);
            println!("  compositions: {}", outcome.compositions);
            println!("  items created: {}", outcome.items_created);
            println!("  crew links: {}", outcome.team_links);
            println!("  material links: {}", outcome.material_links);
            println!("ok");
        }
        other => anyhow::bail!("unknown dialect '{}': expected tabular or analytic", other),
    }

    Ok(())
}
