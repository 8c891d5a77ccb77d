//! Usage logging
//!
//! One record per answered turn: tokens, wall time, query, response and
//! whether it was a follow-up. Backed by Postgres when a database URL is
//! configured, otherwise by the tracing log.

use crate::error::PipelineError;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageRecord {
    pub id: Uuid,
    pub tokens_used: u64,
    /// Seconds
    pub time_spent: f64,
    pub query: String,
    pub response: String,
    pub followup: bool,
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(
        tokens_used: u64,
        time_spent: f64,
        query: impl Into<String>,
        response: impl Into<String>,
        followup: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tokens_used,
            time_spent,
            query: query.into(),
            response: response.into(),
            followup,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait UsageLogger: Send + Sync {
    async fn log(&self, record: UsageRecord) -> Result<()>;
}

/// Emits each record as a structured log event.
#[derive(Debug, Default)]
pub struct TracingUsageLogger;

#[async_trait]
impl UsageLogger for TracingUsageLogger {
    async fn log(&self, record: UsageRecord) -> Result<()> {
        info!(
            usage_id = %record.id,
            tokens_used = record.tokens_used,
            time_spent = record.time_spent,
            followup = record.followup,
            query = %record.query,
            "Usage recorded"
        );
        Ok(())
    }
}

/// Keeps records in memory; used by the API's tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryUsageLogger {
    records: RwLock<Vec<UsageRecord>>,
}

impl InMemoryUsageLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<UsageRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl UsageLogger for InMemoryUsageLogger {
    async fn log(&self, record: UsageRecord) -> Result<()> {
        self.records.write().await.push(record);
        Ok(())
    }
}

/// Writes records to the `usage_log` table, creating it on first use.
pub struct PgUsageLogger {
    pool: PgPool,
    schema_ready: OnceCell<()>,
}

impl PgUsageLogger {
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(database_url)
            .map_err(|e| PipelineError::DatabaseError(format!("Invalid database URL: {}", e)))?;

        Ok(Self {
            pool,
            schema_ready: OnceCell::new(),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS usage_log (
                      id UUID PRIMARY KEY,
                      tokens_used BIGINT NOT NULL,
                      time_spent DOUBLE PRECISION NOT NULL,
                      query TEXT NOT NULL,
                      response TEXT NOT NULL,
                      followup BOOLEAN NOT NULL DEFAULT FALSE,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                PipelineError::DatabaseError(format!("Failed to initialize usage log schema: {}", e))
            })?;

        Ok(())
    }
}

#[async_trait]
impl UsageLogger for PgUsageLogger {
    async fn log(&self, record: UsageRecord) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO usage_log (id, tokens_used, time_spent, query, response, followup, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(i64::try_from(record.tokens_used).unwrap_or(i64::MAX))
        .bind(record.time_spent)
        .bind(&record.query)
        .bind(&record.response)
        .bind(record.followup)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::DatabaseError(format!("Failed to write usage record: {}", e)))?;

        Ok(())
    }
}

/// Postgres when `database_url` is set and valid, tracing otherwise.
pub fn build_usage_logger(database_url: Option<&str>) -> Arc<dyn UsageLogger> {
    if let Some(url) = database_url {
        match PgUsageLogger::connect_lazy(url) {
            Ok(logger) => {
                info!("Usage log backend: postgres");
                return Arc::new(logger);
            }
            Err(error) => {
                warn!("Failed to initialize postgres usage log, falling back to tracing: {}", error);
            }
        }
    }

    info!("Usage log backend: tracing");
    Arc::new(TracingUsageLogger)
}
