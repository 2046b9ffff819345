//! PostgreSQL-backed `ProcessStore`.
//!
//! Uses raw `sqlx::query` rather than the compile-time `query!` macros, so
//! the crate builds without a live database reachable at compile time.
//! Schema is embedded below rather than in a separate migrations
//! directory, mirroring how this store's teacher keeps its DDL close to
//! the queries that depend on it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::{
    InputStateRow, NewProcessRow, ProcessRow, ProcessStepRow, ProcessStore, ProcessUpdate, StoreError,
};
use crate::workflow::{Assignee, ProcessStatus, StepStatus};

/// The schema this store expects to already exist. Kept here as
/// documentation and for `PostgresProcessStore::migrate`, a convenience
/// for tests and small deployments; a real rollout is expected to run
/// this (or its evolution) through whatever migration tool the service
/// already uses.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS processes (
    process_id      UUID PRIMARY KEY,
    workflow_name    TEXT NOT NULL,
    last_status      TEXT NOT NULL,
    last_step        TEXT NOT NULL DEFAULT '',
    assignee         TEXT NOT NULL DEFAULT 'SYSTEM',
    is_task          BOOLEAN NOT NULL DEFAULT FALSE,
    created_by       TEXT NOT NULL,
    started_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
    last_modified_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS process_steps (
    process_id   UUID NOT NULL REFERENCES processes(process_id),
    sequence     BIGINT NOT NULL,
    name         TEXT NOT NULL,
    status       TEXT NOT NULL,
    state        JSONB NOT NULL,
    retries      INTEGER NOT NULL DEFAULT 0,
    created_at   TIMESTAMPTZ NOT NULL,
    completed_at TIMESTAMPTZ[] NOT NULL,
    PRIMARY KEY (process_id, sequence)
);

CREATE TABLE IF NOT EXISTS process_subscriptions (
    process_id      UUID NOT NULL REFERENCES processes(process_id),
    subscription_id UUID NOT NULL,
    PRIMARY KEY (process_id, subscription_id)
);

CREATE TABLE IF NOT EXISTS process_input_states (
    process_id UUID NOT NULL REFERENCES processes(process_id),
    step_name  TEXT NOT NULL,
    inputs     JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;

#[derive(Clone)]
pub struct PostgresProcessStore {
    pool: PgPool,
}

impl PostgresProcessStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply `SCHEMA_SQL`. Convenient for tests and first-run setup; not a
    /// substitute for a real migration pipeline in production.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }
}

fn parse_status(raw: &str) -> Result<ProcessStatus, StoreError> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn parse_step_status(raw: &str) -> Result<StepStatus, StoreError> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn parse_assignee(raw: &str) -> Result<Assignee, StoreError> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn status_str(status: ProcessStatus) -> String {
    serde_json::to_value(status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| status.to_string())
}

fn step_status_str(status: StepStatus) -> String {
    serde_json::to_value(status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| status.to_string())
}

fn assignee_str(assignee: Assignee) -> String {
    serde_json::to_value(assignee)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| assignee.to_string())
}

fn row_to_process(row: sqlx::postgres::PgRow, subscription_ids: Vec<Uuid>) -> Result<ProcessRow, StoreError> {
    let last_status: String = row.get("last_status");
    let assignee: String = row.get("assignee");
    Ok(ProcessRow {
        process_id: row.get("process_id"),
        workflow_name: row.get("workflow_name"),
        last_status: parse_status(&last_status)?,
        last_step: row.get("last_step"),
        assignee: parse_assignee(&assignee)?,
        is_task: row.get("is_task"),
        subscription_ids,
        started_at: row.get("started_at"),
        last_modified_at: row.get("last_modified_at"),
        created_by: row.get("created_by"),
    })
}

fn row_to_step(row: sqlx::postgres::PgRow) -> Result<ProcessStepRow, StoreError> {
    let status: String = row.get("status");
    let state: Value = row.get("state");
    let state = state
        .as_object()
        .cloned()
        .ok_or_else(|| StoreError::Serialization("step state was not a JSON object".into()))?;
    Ok(ProcessStepRow {
        process_id: row.get("process_id"),
        sequence: row.get("sequence"),
        name: row.get("name"),
        status: parse_step_status(&status)?,
        state,
        retries: row.get("retries"),
        created_at: row.get("created_at"),
        completed_at: row.get::<Vec<DateTime<Utc>>, _>("completed_at"),
    })
}

#[async_trait]
impl ProcessStore for PostgresProcessStore {
    #[instrument(skip(self, row))]
    async fn create_process(&self, row: NewProcessRow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO processes (process_id, workflow_name, last_status, is_task, created_by)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(row.process_id)
        .bind(&row.workflow_name)
        .bind(status_str(ProcessStatus::Created))
        .bind(row.is_task)
        .bind(&row.created_by)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to create process: {e}");
            StoreError::Database(e.to_string())
        })?;
        debug!(process_id = %row.process_id, "created process");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_process(&self, process_id: Uuid) -> Result<ProcessRow, StoreError> {
        let row = sqlx::query(r#"SELECT * FROM processes WHERE process_id = $1"#)
            .bind(process_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("failed to load process: {e}");
                StoreError::Database(e.to_string())
            })?
            .ok_or(StoreError::ProcessNotFound(process_id))?;

        let sub_rows = sqlx::query(r#"SELECT subscription_id FROM process_subscriptions WHERE process_id = $1"#)
            .bind(process_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let subscription_ids = sub_rows.into_iter().map(|r| r.get("subscription_id")).collect();

        row_to_process(row, subscription_ids)
    }

    #[instrument(skip(self, update))]
    async fn update_process(&self, process_id: Uuid, update: ProcessUpdate) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE processes
            SET last_status = COALESCE($2, last_status),
                last_step = COALESCE($3, last_step),
                assignee = COALESCE($4, assignee),
                last_modified_at = now()
            WHERE process_id = $1
            "#,
        )
        .bind(process_id)
        .bind(update.last_status.map(status_str))
        .bind(update.last_step)
        .bind(update.assignee.map(assignee_str))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to update process: {e}");
            StoreError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ProcessNotFound(process_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn last_step(&self, process_id: Uuid) -> Result<Option<ProcessStepRow>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM process_steps
            WHERE process_id = $1
            ORDER BY sequence DESC
            LIMIT 1
            "#,
        )
        .bind(process_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to load last step: {e}");
            StoreError::Database(e.to_string())
        })?;

        row.map(row_to_step).transpose()
    }

    #[instrument(skip(self))]
    async fn steps_for(&self, process_id: Uuid) -> Result<Vec<ProcessStepRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM process_steps
            WHERE process_id = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(process_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to load steps: {e}");
            StoreError::Database(e.to_string())
        })?;

        rows.into_iter().map(row_to_step).collect()
    }

    #[instrument(skip(self, row))]
    async fn append_step(&self, row: ProcessStepRow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO process_steps
                (process_id, sequence, name, status, state, retries, created_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(row.process_id)
        .bind(row.sequence)
        .bind(&row.name)
        .bind(step_status_str(row.status))
        .bind(Value::Object(row.state))
        .bind(row.retries)
        .bind(row.created_at)
        .bind(&row.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to append step: {e}");
            StoreError::Database(e.to_string())
        })?;
        Ok(())
    }

    #[instrument(skip(self, row))]
    async fn update_step(&self, row: ProcessStepRow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE process_steps
            SET status = $3, state = $4, retries = $5, completed_at = $6
            WHERE process_id = $1 AND sequence = $2
            "#,
        )
        .bind(row.process_id)
        .bind(row.sequence)
        .bind(step_status_str(row.status))
        .bind(Value::Object(row.state))
        .bind(row.retries)
        .bind(&row.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to update step: {e}");
            StoreError::Database(e.to_string())
        })?;
        Ok(())
    }

    #[instrument(skip(self, row))]
    async fn append_input_state(&self, row: InputStateRow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO process_input_states (process_id, step_name, inputs, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(row.process_id)
        .bind(&row.step_name)
        .bind(Value::Array(row.inputs))
        .bind(row.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to append input state: {e}");
            StoreError::Database(e.to_string())
        })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn add_subscription(&self, process_id: Uuid, subscription_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO process_subscriptions (process_id, subscription_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(process_id)
        .bind(subscription_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to link subscription: {e}");
            StoreError::Database(e.to_string())
        })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_processes(&self) -> Result<Vec<ProcessRow>, StoreError> {
        let rows = sqlx::query(r#"SELECT * FROM processes ORDER BY started_at ASC"#)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("failed to list processes: {e}");
                StoreError::Database(e.to_string())
            })?;

        let mut processes = Vec::with_capacity(rows.len());
        for row in rows {
            let process_id: Uuid = row.get("process_id");
            let sub_rows = sqlx::query(r#"SELECT subscription_id FROM process_subscriptions WHERE process_id = $1"#)
                .bind(process_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
            let subscription_ids = sub_rows.into_iter().map(|r| r.get("subscription_id")).collect();
            processes.push(row_to_process(row, subscription_ids)?);
        }
        Ok(processes)
    }
}
