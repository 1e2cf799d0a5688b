use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::warn;

use warden_core::audit::{AuditEvent, AuditOutcome, AuditSink};

use super::{decode_err, RepositoryError};
use crate::DbPool;

/// Persists audit events to `audit_log`. `emit` never blocks the request path.
#[derive(Clone)]
pub struct SqlAuditSink {
    pool: DbPool,
}

impl SqlAuditSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        let metadata = serde_json::to_string(&event.metadata).map_err(decode_err)?;

        sqlx::query(
            "INSERT INTO audit_log (event_id, correlation_id, caller, service, action, outcome,
                                    code, http_status, latency_ms, metadata_json, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_id)
        .bind(&event.correlation_id)
        .bind(&event.caller)
        .bind(&event.service)
        .bind(&event.action)
        .bind(event.outcome.as_str())
        .bind(&event.code)
        .bind(i64::from(event.http_status))
        .bind(i64::try_from(event.latency_ms).unwrap_or(i64::MAX))
        .bind(metadata)
        .bind(event.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent events first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT event_id, correlation_id, caller, service, action, outcome, code,
                    http_status, latency_ms, metadata_json, occurred_at
             FROM audit_log ORDER BY occurred_at DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }

    pub async fn find_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT event_id, correlation_id, caller, service, action, outcome, code,
                    http_status, latency_ms, metadata_json, occurred_at
             FROM audit_log WHERE correlation_id = ? ORDER BY occurred_at",
        )
        .bind(correlation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }
}

fn parse_outcome(value: &str) -> Result<AuditOutcome, RepositoryError> {
    match value {
        "success" => Ok(AuditOutcome::Success),
        "rejected" => Ok(AuditOutcome::Rejected),
        "failed" => Ok(AuditOutcome::Failed),
        other => Err(RepositoryError::Decode(format!("unknown audit outcome `{other}`"))),
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let outcome: String = row.try_get("outcome").map_err(decode_err)?;
    let http_status: i64 = row.try_get("http_status").map_err(decode_err)?;
    let latency_ms: i64 = row.try_get("latency_ms").map_err(decode_err)?;
    let metadata_json: String = row.try_get("metadata_json").map_err(decode_err)?;
    let occurred_at: String = row.try_get("occurred_at").map_err(decode_err)?;

    Ok(AuditEvent {
        event_id: row.try_get("event_id").map_err(decode_err)?,
        correlation_id: row.try_get("correlation_id").map_err(decode_err)?,
        caller: row.try_get("caller").map_err(decode_err)?,
        service: row.try_get("service").map_err(decode_err)?,
        action: row.try_get("action").map_err(decode_err)?,
        outcome: parse_outcome(&outcome)?,
        code: row.try_get("code").map_err(decode_err)?,
        http_status: u16::try_from(http_status).map_err(decode_err)?,
        latency_ms: u64::try_from(latency_ms).unwrap_or(0),
        metadata: serde_json::from_str(&metadata_json).map_err(decode_err)?,
        occurred_at: DateTime::parse_from_rfc3339(&occurred_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(decode_err)?,
    })
}

impl AuditSink for SqlAuditSink {
    fn emit(&self, event: AuditEvent) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                event_name = "gateway.audit.dropped",
                correlation_id = %event.correlation_id,
                "no async runtime available to persist audit event"
            );
            return;
        };

        let sink = self.clone();
        runtime.spawn(async move {
            if let Err(error) = sink.insert(&event).await {
                warn!(
                    event_name = "gateway.audit.persist_failed",
                    correlation_id = %event.correlation_id,
                    error = %error,
                    "failed to persist audit event"
                );
            }
        });
    }
}
