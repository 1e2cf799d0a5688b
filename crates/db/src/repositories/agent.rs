use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::Row;

use warden_core::auth::AgentRepository;
use warden_core::domain::agent::{Agent, AgentId};
use warden_core::errors::StoreError;

use super::{decode_err, RepositoryError};
use crate::DbPool;

const AGENT_COLUMNS: &str = "id, name, owner, secret_hash, scopes, rate_limit_rpm, \
                             rate_limit_daily, enabled, created_at, last_used_at, request_count";

pub struct SqlAgentRepository {
    pool: DbPool,
}

impl SqlAgentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_agent(r)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, agent: &Agent) -> Result<(), RepositoryError> {
        let scopes = serde_json::to_string(&agent.scopes).map_err(decode_err)?;

        sqlx::query(
            "INSERT INTO agents (id, name, owner, secret_hash, scopes, rate_limit_rpm,
                                 rate_limit_daily, enabled, created_at, last_used_at, request_count)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 owner = excluded.owner,
                 secret_hash = excluded.secret_hash,
                 scopes = excluded.scopes,
                 rate_limit_rpm = excluded.rate_limit_rpm,
                 rate_limit_daily = excluded.rate_limit_daily,
                 enabled = excluded.enabled",
        )
        .bind(&agent.id.0)
        .bind(&agent.name)
        .bind(&agent.owner)
        .bind(agent.secret_hash.expose_secret())
        .bind(scopes)
        .bind(i64::from(agent.rate_limit_rpm))
        .bind(i64::from(agent.rate_limit_daily))
        .bind(agent.enabled)
        .bind(agent.created_at.to_rfc3339())
        .bind(agent.last_used_at.map(|value| value.to_rfc3339()))
        .bind(i64::try_from(agent.request_count).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_all(&self) -> Result<Vec<Agent>, RepositoryError> {
        let rows = sqlx::query(&format!("SELECT {AGENT_COLUMNS} FROM agents ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_agent).collect()
    }

    async fn update_enabled(&self, id: &AgentId, enabled: bool) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE agents SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch(&self, id: &AgentId, used_at: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE agents SET last_used_at = ?, request_count = request_count + 1 WHERE id = ?",
        )
        .bind(used_at.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> Result<Agent, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_err)?;
    let name: String = row.try_get("name").map_err(decode_err)?;
    let owner: String = row.try_get("owner").map_err(decode_err)?;
    let secret_hash: String = row.try_get("secret_hash").map_err(decode_err)?;
    let scopes_json: String = row.try_get("scopes").map_err(decode_err)?;
    let rate_limit_rpm: i64 = row.try_get("rate_limit_rpm").map_err(decode_err)?;
    let rate_limit_daily: i64 = row.try_get("rate_limit_daily").map_err(decode_err)?;
    let enabled: bool = row.try_get("enabled").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;
    let last_used_at: Option<String> = row.try_get("last_used_at").map_err(decode_err)?;
    let request_count: i64 = row.try_get("request_count").map_err(decode_err)?;

    let scopes: Vec<String> = serde_json::from_str(&scopes_json)
        .map_err(|error| RepositoryError::Decode(format!("scopes: {error}")))?;

    Ok(Agent {
        id: AgentId(id),
        name,
        owner,
        secret_hash: SecretString::from(secret_hash),
        scopes,
        rate_limit_rpm: u32::try_from(rate_limit_rpm).map_err(decode_err)?,
        rate_limit_daily: u32::try_from(rate_limit_daily).map_err(decode_err)?,
        enabled,
        created_at: parse_timestamp("created_at", &created_at)?,
        last_used_at: last_used_at
            .as_deref()
            .map(|value| parse_timestamp("last_used_at", value))
            .transpose()?,
        request_count: u64::try_from(request_count).unwrap_or(0),
    })
}

#[async_trait]
impl AgentRepository for SqlAgentRepository {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, StoreError> {
        Ok(self.fetch(id).await?)
    }

    async fn save(&self, agent: Agent) -> Result<(), StoreError> {
        Ok(self.upsert(&agent).await?)
    }

    async fn list(&self) -> Result<Vec<Agent>, StoreError> {
        Ok(self.fetch_all().await?)
    }

    async fn set_enabled(&self, id: &AgentId, enabled: bool) -> Result<bool, StoreError> {
        Ok(self.update_enabled(id, enabled).await?)
    }

    async fn record_usage(&self, id: &AgentId, used_at: DateTime<Utc>) -> Result<(), StoreError> {
        Ok(self.touch(id, used_at).await?)
    }
}
