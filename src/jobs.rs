//! Background import jobs.
//!
//! Uploads return immediately with a job id; the import itself runs on
//! a background task that streams progress into a durable job row, so
//! status survives restarts and is visible from any process sharing
//! the database. Callers poll the row via the status endpoint.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::ImportConfig;
use crate::import::{
    payload_hash, run_catalog_import, run_sicro_import, ImportError, ImportOptions,
};
use crate::models::{ImportJobState, JobStatus};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::store::CatalogStore;

/// Which parser family handles the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportDialect {
    /// Catalog sheets with one row per item (SINAPI and SICRO
    /// synthetic reports).
    Tabular,
    /// The SICRO analytic composition report (state-machine scan).
    SicroAnalytic,
}

/// Forwards progress events from the (sync) reporter interface into
/// the async job-row updater.
struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressReporter for ChannelProgress {
    fn report(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

/// Spawns and tracks background imports.
#[derive(Clone)]
pub struct JobRunner {
    store: Arc<dyn CatalogStore>,
    config: ImportConfig,
}

impl JobRunner {
    pub fn new(store: Arc<dyn CatalogStore>, config: ImportConfig) -> Self {
        Self { store, config }
    }

    /// Registers a pending job and schedules the import on a background
    /// task. Returns the job id immediately.
    pub async fn submit(
        &self,
        dialect: ImportDialect,
        mut options: ImportOptions,
        bytes: Vec<u8>,
        filename: String,
    ) -> Result<String> {
        let job_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let job = ImportJobState {
            id: job_id.clone(),
            status: JobStatus::Pending,
            progress: 0,
            message: "queued".to_string(),
            filename: filename.clone(),
            file_hash: payload_hash(&bytes),
            created_at: now,
            updated_at: now,
        };
        self.store.upsert_job(&job).await?;

        if options.actor.is_none() {
            options.actor = Some(job_id.clone());
        }

        let store = self.store.clone();
        let config = self.config.clone();
        let spawn_job = job.clone();
        tokio::spawn(async move {
            run_job(store, config, dialect, options, bytes, filename, spawn_job).await;
        });

        Ok(job_id)
    }

    pub async fn status(&self, job_id: &str) -> Result<Option<ImportJobState>> {
        self.store.get_job(job_id).await
    }
}

async fn run_job(
    store: Arc<dyn CatalogStore>,
    config: ImportConfig,
    dialect: ImportDialect,
    options: ImportOptions,
    bytes: Vec<u8>,
    filename: String,
    mut job: ImportJobState,
) {
    job.status = JobStatus::Processing;
    job.message = "processing".to_string();
    job.updated_at = Utc::now();
    if let Err(err) = store.upsert_job(&job).await {
        tracing::error!(job = %job.id, %err, "could not mark job as processing");
        return;
    }

    // Progress events flow through a channel into row updates so the
    // import itself never blocks on the job table.
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let updater_store = store.clone();
    let mut updater_job = job.clone();
    let updater = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            updater_job.progress = event.percent;
            updater_job.message = event.message;
            updater_job.updated_at = Utc::now();
            if let Err(err) = updater_store.upsert_job(&updater_job).await {
                tracing::warn!(job = %updater_job.id, %err, "job progress update failed");
            }
        }
    });

    let reporter = ChannelProgress { tx };
    let result: Result<String, ImportError> = match dialect {
        ImportDialect::Tabular => {
            run_catalog_import(store.as_ref(), &config, &options, bytes, &filename, &reporter)
                .await
                .map(|outcome| {
                    format!(
                        "imported {} price(s), {} new item(s), {} link(s)",
                        outcome.prices_inserted, outcome.items_created, outcome.links_replaced
                    )
                })
        }
        ImportDialect::SicroAnalytic => {
            run_sicro_import(store.as_ref(), &config, &options, bytes, &filename, &reporter)
                .await
                .map(|outcome| {
                    format!(
                        "imported {} composition(s), {} crew link(s), {} material link(s)",
                        outcome.compositions, outcome.team_links, outcome.material_links
                    )
                })
        }
    };
    drop(reporter);
    let _ = updater.await;

    match result {
        Ok(summary) => {
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.message = summary;
        }
        Err(err) => {
            tracing::error!(job = %job.id, %err, "import failed");
            job.status = JobStatus::Error;
            job.message = err.to_string();
        }
    }
    job.updated_at = Utc::now();
    if let Err(err) = store.upsert_job(&job).await {
        tracing::error!(job = %job.id, %err, "could not record job outcome");
    }
}
