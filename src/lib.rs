//! # Custobase
//!
//! An ingestion and price-resolution engine for official Brazilian
//! construction cost catalogs (SINAPI, SICRO).
//!
//! Custobase reads the spreadsheets the publishers actually ship —
//! floating headers, formula-wrapped codes, localized decimals, zipped
//! payloads — into a normalized, versioned catalog, and resolves the
//! cost of a composite service against a regional price index with an
//! explicit fallback policy.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────┐
//! │   Intake     │──▶│    Import     │──▶│  SQLite   │
//! │ zip/xlsx/    │   │ orchestrator │   │  catalog  │
//! │ classifier   │   │ (batched)    │   └────┬──────┘
//! └──────────────┘   └──────────────┘        │
//!                          ┌─────────────────┤
//!                          ▼                 ▼
//!                    ┌──────────┐      ┌──────────┐
//!                    │   CLI    │      │   HTTP   │
//!                    │ (cbase)  │      │  (JSON)  │
//!                    └──────────┘      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cbase init                                    # create database
//! cbase import SINAPI_202407.zip --source SINAPI
//! cbase import relatorio.xlsx --source SICRO --dialect analytic
//! cbase composition <item-id> --region RS
//! cbase serve                                   # start HTTP surface
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`workbook`] | OOXML spreadsheet reading (ZIP + XML) |
//! | [`classify`] | Payload intake and sheet classification |
//! | [`header`] | Header row and column location |
//! | [`rows`] | Data-row extraction and code normalization |
//! | [`analytic`] | Tabular ingredient-link extraction |
//! | [`sicro`] | SICRO analytic state-machine parser |
//! | [`import`] | Import orchestration |
//! | [`pricing`] | Price resolution and cost roll-up |
//! | [`bdi`] | BDI markup rate |
//! | [`wbs`] | Budget tree building and renumbering |
//! | [`store`] | Storage abstraction (SQLite + in-memory) |
//! | [`jobs`] | Background import jobs |
//! | [`server`] | HTTP surface |

pub mod analytic;
pub mod bdi;
pub mod classify;
pub mod config;
pub mod db;
pub mod header;
pub mod import;
pub mod jobs;
pub mod migrate;
pub mod models;
pub mod pricing;
pub mod progress;
pub mod rows;
pub mod server;
pub mod sicro;
pub mod store;
pub mod wbs;
pub mod workbook;
