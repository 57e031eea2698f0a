//! Stored-function collection in Postgres
//!
//! One row per `(db_name, name)` in `system_js`. Values are stored as JSONB in
//! the serde form of [`ScriptValue`]; plain JSON written by other tools is
//! accepted too and converted with [`ScriptValue::from_json`].
//!
//! Every write bumps the supplied [`LibraryVersion`] once it has committed.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::debug;

use crate::error::ScriptError;
use crate::stored::{LibraryVersion, StoredFunctionRecord, StoredFunctionSource};
use crate::types::ScriptValue;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredFunctionRow {
    pub db_name: String,
    pub name: String,
    pub value: Option<ScriptValue>,
    pub updated_at: DateTime<Utc>,
}

fn decode_value(json: JsonValue) -> ScriptValue {
    match serde_json::from_value::<ScriptValue>(json.clone()) {
        Ok(value) => value,
        Err(_) => ScriptValue::from_json(&json),
    }
}

/// Insert or replace a stored function
pub async fn save_stored_function<'e, E>(
    executor: E,
    version: &LibraryVersion,
    db_name: &str,
    name: &str,
    value: &ScriptValue,
) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO system_js (db_name, name, value, updated_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (db_name, name)
        DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
        "#,
    )
    .bind(db_name)
    .bind(name)
    .bind(Json(value))
    .execute(executor)
    .await
    .context("Failed to save stored function")?;

    let current = version.stored_func_mod();
    debug!(db = db_name, name, version = current, "Saved stored function");
    Ok(())
}

/// Remove a stored function. Returns false if it did not exist.
pub async fn remove_stored_function<'e, E>(
    executor: E,
    version: &LibraryVersion,
    db_name: &str,
    name: &str,
) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let result = sqlx::query("DELETE FROM system_js WHERE db_name = $1 AND name = $2")
        .bind(db_name)
        .bind(name)
        .execute(executor)
        .await
        .context("Failed to remove stored function")?;

    let removed = result.rows_affected() > 0;
    if removed {
        version.stored_func_mod();
    }
    Ok(removed)
}

/// Every stored function of `db_name`, ordered by name
pub async fn list_stored_functions<'e, E>(
    executor: E,
    db_name: &str,
) -> Result<Vec<StoredFunctionRow>>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let rows = sqlx::query(
        r#"
        SELECT db_name, name, value, updated_at
        FROM system_js
        WHERE db_name = $1
        ORDER BY name
        "#,
    )
    .bind(db_name)
    .fetch_all(executor)
    .await
    .context("Failed to list stored functions")?;

    rows.into_iter()
        .map(|row| {
            let value: Option<Json<JsonValue>> = row.try_get("value")?;
            Ok(StoredFunctionRow {
                db_name: row.try_get("db_name")?,
                name: row.try_get("name")?,
                value: value.map(|Json(json)| decode_value(json)),
                updated_at: row.try_get("updated_at")?,
            })
        })
        .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
        .context("Failed to decode stored function row")
}

/// [`StoredFunctionSource`] reading `system_js`.
///
/// Queries run on the captured runtime with `block_on`, so `fetch_stored`
/// must be called from a worker thread (for example inside
/// `tokio::task::spawn_blocking`), never from an async task.
#[derive(Debug, Clone)]
pub struct PgStoredFunctions {
    pool: PgPool,
    runtime: Handle,
}

impl PgStoredFunctions {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self { pool, runtime }
    }

    /// Capture the runtime of the calling task
    pub fn from_current(pool: PgPool) -> Result<Self> {
        let runtime = Handle::try_current().context("No tokio runtime is running")?;
        Ok(Self::new(pool, runtime))
    }
}

impl StoredFunctionSource for PgStoredFunctions {
    fn fetch_stored(&self, db_name: &str) -> crate::error::Result<Vec<StoredFunctionRecord>> {
        let rows = self
            .runtime
            .block_on(list_stored_functions(&self.pool, db_name))
            .map_err(|e| ScriptError::Fetch(format!("{:#}", e)))?;

        Ok(rows
            .into_iter()
            .map(|row| StoredFunctionRecord {
                name: ScriptValue::String(row.name),
                value: row.value,
            })
            .collect())
    }
}
