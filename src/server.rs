//! HTTP consumption surface.
//!
//! A thin JSON API over the engine for the hosting application:
//! uploads go to a background job, job status is polled, and
//! composition/price views call the resolver. Authentication, rate
//! limiting, and multipart upload framing belong to the gateway in
//! front of this service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/imports` | Upload a catalog payload, returns a job id |
//! | `GET`  | `/imports/{id}` | Import job status |
//! | `GET`  | `/sources` | Catalog sources with item counts |
//! | `GET`  | `/compositions/{id}` | Resolved composition breakdown |
//! | `GET`  | `/items/{id}/price` | Resolved unit-price snapshot |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "source must be given" } }
//! ```

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::import::ImportOptions;
use crate::jobs::{ImportDialect, JobRunner};
use crate::models::{ChargeRegime, Period};
use crate::pricing::{composition_breakdown, snapshot_unit_price, PricePolicy, PriceQuery};
use crate::store::CatalogStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    store: Arc<dyn CatalogStore>,
    policy: Arc<PricePolicy>,
    jobs: JobRunner,
}

/// Well-known publisher descriptions, used when a source is created
/// lazily by its first import.
pub fn default_source_description(name: &str) -> &'static str {
    match name {
        "SINAPI" => "Sistema Nacional de Pesquisa de Custos e Índices da Construção Civil",
        "SICRO" => "Sistema de Custos Referenciais de Obras - DNIT",
        _ => "official cost reference",
    }
}

/// Starts the HTTP surface. Binds to `[server].bind` and serves until
/// the process is terminated.
pub async fn run_server(config: &Config, store: Arc<dyn CatalogStore>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState {
        store: store.clone(),
        policy: Arc::new(PricePolicy::from_config(&config.pricing)),
        jobs: JobRunner::new(store, config.import.clone()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/imports", post(handle_submit_import))
        .route("/imports/{id}", get(handle_job_status))
        .route("/sources", get(handle_list_sources))
        .route("/compositions/{id}", get(handle_composition))
        .route("/items/{id}/price", get(handle_item_price))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    tracing::info!("catalog server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: err.to_string(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /imports ============

#[derive(Deserialize)]
struct ImportParams {
    source: Option<String>,
    dialect: Option<String>,
    region: Option<String>,
    month: Option<u32>,
    year: Option<i32>,
    replace: Option<bool>,
    filename: Option<String>,
}

#[derive(Serialize)]
struct SubmitResponse {
    job_id: String,
}

async fn handle_submit_import(
    State(state): State<AppState>,
    Query(params): Query<ImportParams>,
    body: Bytes,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    if body.is_empty() {
        return Err(bad_request("request body must contain the catalog file"));
    }
    let source = params
        .source
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad_request("source must be given (e.g. source=SINAPI)"))?;

    let dialect = match params.dialect.as_deref() {
        None | Some("tabular") => ImportDialect::Tabular,
        Some("analytic") => ImportDialect::SicroAnalytic,
        Some(other) => {
            return Err(bad_request(format!(
                "unknown dialect '{}': expected tabular or analytic",
                other
            )))
        }
    };

    let period = match (params.year, params.month) {
        (Some(year), Some(month)) => {
            if !(1..=12).contains(&month) {
                return Err(bad_request("month must be between 1 and 12"));
            }
            Some(Period { year, month })
        }
        (None, None) => None,
        _ => return Err(bad_request("month and year must be given together")),
    };

    let options = ImportOptions {
        source_description: default_source_description(&source).to_string(),
        source_name: source,
        region: params.region.map(|r| r.to_uppercase()),
        period,
        replace: params.replace.unwrap_or(false),
        actor: None,
    };
    let filename = params.filename.unwrap_or_else(|| "upload.xlsx".to_string());

    let job_id = state
        .jobs
        .submit(dialect, options, body.to_vec(), filename)
        .await
        .map_err(internal)?;

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id })))
}

// ============ GET /imports/{id} ============

#[derive(Serialize)]
struct JobStatusResponse {
    status: String,
    progress: u8,
    message: String,
}

async fn handle_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, AppError> {
    let job = state
        .jobs
        .status(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("no import job with id {}", id)))?;

    Ok(Json(JobStatusResponse {
        status: job.status.as_str().to_string(),
        progress: job.progress,
        message: job.message,
    }))
}

// ============ GET /sources ============

#[derive(Serialize)]
struct SourceResponse {
    id: i64,
    name: String,
    description: Option<String>,
    item_count: i64,
}

async fn handle_list_sources(
    State(state): State<AppState>,
) -> Result<Json<Vec<SourceResponse>>, AppError> {
    let sources = state.store.list_sources().await.map_err(internal)?;
    Ok(Json(
        sources
            .into_iter()
            .map(|s| SourceResponse {
                id: s.source.id,
                name: s.source.name,
                description: s.source.description,
                item_count: s.item_count,
            })
            .collect(),
    ))
}

// ============ GET /compositions/{id}, GET /items/{id}/price ============

#[derive(Deserialize)]
struct PriceParams {
    region: Option<String>,
    charges: Option<String>,
    month: Option<u32>,
    year: Option<i32>,
}

impl PriceParams {
    fn into_query(self) -> Result<PriceQuery, AppError> {
        let charges = match self.charges.as_deref() {
            None => None,
            Some("with") | Some("WITH_CHARGES") => Some(ChargeRegime::WithCharges),
            Some("without") | Some("WITHOUT_CHARGES") => Some(ChargeRegime::WithoutCharges),
            Some(other) => {
                return Err(bad_request(format!(
                    "unknown charges value '{}': expected with or without",
                    other
                )))
            }
        };
        let up_to = match (self.year, self.month) {
            (Some(year), Some(month)) => Some(Period { year, month }),
            (None, None) => None,
            _ => return Err(bad_request("month and year must be given together")),
        };
        Ok(PriceQuery {
            region: self.region.map(|r| r.to_uppercase()),
            charges,
            up_to,
        })
    }
}

async fn handle_composition(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<PriceParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let query = params.into_query()?;
    let breakdown = composition_breakdown(state.store.as_ref(), &id, &query, &state.policy)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("no catalog item with id {}", id)))?;

    Ok(Json(serde_json::json!({
        "item": breakdown.item,
        "unit_price": breakdown.unit_price,
        "ingredients": breakdown.ingredients,
        "team": breakdown.team,
        "production": breakdown.production,
        "calculated_cost": breakdown.calculated_cost,
    })))
}

#[derive(Serialize)]
struct PriceResponse {
    item_id: String,
    price: rust_decimal::Decimal,
}

async fn handle_item_price(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<PriceParams>,
) -> Result<Json<PriceResponse>, AppError> {
    let query = params.into_query()?;
    if state
        .store
        .get_item(&id)
        .await
        .map_err(internal)?
        .is_none()
    {
        return Err(not_found(format!("no catalog item with id {}", id)));
    }

    let price = snapshot_unit_price(state.store.as_ref(), &id, &query, &state.policy)
        .await
        .map_err(internal)?;

    Ok(Json(PriceResponse { item_id: id, price }))
}
