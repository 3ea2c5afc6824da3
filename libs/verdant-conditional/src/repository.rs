//! Conditional Repository - SQLite persistence
//!
//! Implements the data source traits over the daemon database: conditionals
//! and their sub-conditions, device measurement metadata with unit
//! conversions, and the measurement time series.

use crate::error::{ConditionalError, Result};
use crate::resolver::{MeasurementCatalog, MeasurementResolver};
use crate::store::RuleStore;
use crate::types::{
    ConditionKind, Measurement, MeasurementInfo, MeasurementQuery, RuleDefinition, SubCondition,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::warn;

/// Create the tables used by the conditional controller
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS conditional (
            unique_id TEXT PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            conditional_statement TEXT NOT NULL DEFAULT '',
            period REAL NOT NULL DEFAULT 60.0,
            start_offset REAL NOT NULL DEFAULT 0.0,
            refractory_period REAL NOT NULL DEFAULT 0.0,
            is_activated INTEGER NOT NULL DEFAULT 0
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS conditional_conditions (
            unique_id TEXT PRIMARY KEY,
            conditional_id TEXT NOT NULL,
            condition_type TEXT NOT NULL,
            measurement TEXT,
            max_age INTEGER,
            gpio_pin INTEGER,
            position INTEGER NOT NULL DEFAULT 0
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS device_measurements (
            unique_id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL,
            measurement TEXT NOT NULL DEFAULT '',
            unit TEXT NOT NULL DEFAULT '',
            channel INTEGER NOT NULL DEFAULT 0,
            conversion_id TEXT
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS conversion (
            unique_id TEXT PRIMARY KEY,
            convert_unit_from TEXT NOT NULL,
            convert_unit_to TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS measurements (
            device_id TEXT NOT NULL,
            measurement TEXT NOT NULL,
            unit TEXT NOT NULL,
            channel INTEGER NOT NULL DEFAULT 0,
            value REAL NOT NULL,
            timestamp INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_measurements_lookup
            ON measurements (device_id, measurement, unit, channel, timestamp)
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS misc (
            id INTEGER PRIMARY KEY,
            sample_rate_controller_conditional REAL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS conditional_trigger_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            conditional_id TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Insert or replace a conditional and all of its sub-conditions
pub async fn upsert_conditional(pool: &SqlitePool, rule: &RuleDefinition) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO conditional
            (unique_id, name, conditional_statement, period, start_offset, refractory_period, is_activated)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(unique_id) DO UPDATE SET
            name = excluded.name,
            conditional_statement = excluded.conditional_statement,
            period = excluded.period,
            start_offset = excluded.start_offset,
            refractory_period = excluded.refractory_period,
            is_activated = excluded.is_activated
        "#,
    )
    .bind(&rule.id)
    .bind(&rule.name)
    .bind(&rule.expression)
    .bind(rule.period_secs)
    .bind(rule.start_offset_secs)
    .bind(rule.refractory_secs)
    .bind(rule.activated)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM conditional_conditions WHERE conditional_id = ?")
        .bind(&rule.id)
        .execute(&mut *tx)
        .await?;

    for (position, condition) in rule.conditions.iter().enumerate() {
        let (condition_type, measurement, max_age, gpio_pin) = match &condition.kind {
            ConditionKind::Measurement {
                reference,
                max_age_secs,
            } => (
                "measurement",
                Some(reference.as_str()),
                max_age_secs.map(|s| s as i64),
                None,
            ),
            ConditionKind::Edge { pin } => ("edge", None, None, pin.map(i64::from)),
        };

        sqlx::query(
            r#"
            INSERT INTO conditional_conditions
                (unique_id, conditional_id, condition_type, measurement, max_age, gpio_pin, position)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&condition.id)
        .bind(&rule.id)
        .bind(condition_type)
        .bind(measurement)
        .bind(max_age)
        .bind(gpio_pin)
        .bind(position as i64)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Delete a conditional and its sub-conditions
pub async fn delete_conditional(pool: &SqlitePool, rule_id: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM conditional_conditions WHERE conditional_id = ?")
        .bind(rule_id)
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM conditional WHERE unique_id = ?")
        .bind(rule_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

/// Load every conditional with its sub-conditions, ordered by id
pub async fn list_conditionals(pool: &SqlitePool) -> Result<Vec<RuleDefinition>> {
    let store = SqliteRuleStore::new(pool.clone());
    let mut rules = Vec::new();
    for id in store.list_ids().await? {
        if let Some(rule) = store.load(&id).await? {
            rules.push(rule);
        }
    }
    Ok(rules)
}

/// Sampling cadence in seconds from the `misc` table, if configured
pub async fn load_sample_interval(pool: &SqlitePool) -> Result<Option<f64>> {
    let value: Option<Option<f64>> = sqlx::query_scalar(
        "SELECT sample_rate_controller_conditional FROM misc ORDER BY id LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(value.flatten().filter(|secs| secs.is_finite() && *secs > 0.0))
}

/// Append a trigger entry to `conditional_trigger_log`
pub async fn record_trigger(pool: &SqlitePool, rule_id: &str, message: &str) -> Result<()> {
    sqlx::query("INSERT INTO conditional_trigger_log (conditional_id, message) VALUES (?, ?)")
        .bind(rule_id)
        .bind(message)
        .execute(pool)
        .await?;
    Ok(())
}

/// Append a sample to the measurement series
pub async fn insert_measurement(
    pool: &SqlitePool,
    device_id: &str,
    info: &MeasurementInfo,
    value: f64,
    timestamp: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO measurements (device_id, measurement, unit, channel, value, timestamp)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(device_id)
    .bind(&info.measurement)
    .bind(&info.unit)
    .bind(info.channel)
    .bind(value)
    .bind(timestamp.timestamp_millis())
    .execute(pool)
    .await?;
    Ok(())
}

/// Rule store over the `conditional` and `conditional_conditions` tables
#[derive(Clone)]
pub struct SqliteRuleStore {
    pool: SqlitePool,
}

impl SqliteRuleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RuleStore for SqliteRuleStore {
    async fn load(&self, rule_id: &str) -> Result<Option<RuleDefinition>> {
        let row = sqlx::query(
            r#"
            SELECT unique_id, name, conditional_statement, period, start_offset,
                   refractory_period, is_activated
            FROM conditional
            WHERE unique_id = ?
            "#,
        )
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let condition_rows = sqlx::query(
            r#"
            SELECT unique_id, condition_type, measurement, max_age, gpio_pin
            FROM conditional_conditions
            WHERE conditional_id = ?
            ORDER BY position ASC, rowid ASC
            "#,
        )
        .bind(rule_id)
        .fetch_all(&self.pool)
        .await?;

        let mut conditions = Vec::with_capacity(condition_rows.len());
        for condition_row in condition_rows {
            if let Some(condition) = hydrate_condition(rule_id, condition_row)? {
                conditions.push(condition);
            }
        }

        Ok(Some(RuleDefinition {
            id: row.try_get("unique_id")?,
            name: row.try_get("name")?,
            expression: row.try_get("conditional_statement")?,
            period_secs: row.try_get("period")?,
            start_offset_secs: row.try_get("start_offset")?,
            refractory_secs: row.try_get("refractory_period")?,
            activated: row.try_get("is_activated")?,
            conditions,
        }))
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar("SELECT unique_id FROM conditional ORDER BY unique_id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }
}

fn hydrate_condition(rule_id: &str, row: SqliteRow) -> Result<Option<SubCondition>> {
    let id: String = row.try_get("unique_id")?;
    let condition_type: String = row.try_get("condition_type")?;

    let kind = match condition_type.as_str() {
        "measurement" => {
            let reference: Option<String> = row.try_get("measurement")?;
            let max_age: Option<i64> = row.try_get("max_age")?;
            ConditionKind::Measurement {
                reference: reference.unwrap_or_default(),
                max_age_secs: max_age.filter(|age| *age > 0).map(|age| age as u64),
            }
        },
        "edge" => {
            let stored: Option<i64> = row.try_get("gpio_pin")?;
            let pin = stored.and_then(|p| u32::try_from(p).ok());
            if pin.is_none() {
                warn!(
                    "Conditional {}: edge condition {} has no valid GPIO pin ({:?})",
                    rule_id, id, stored
                );
            }
            ConditionKind::Edge { pin }
        },
        other => {
            warn!(
                "Conditional {}: ignoring condition {} with unsupported type '{}'",
                rule_id, id, other
            );
            return Ok(None);
        },
    };

    Ok(Some(SubCondition { id, kind }))
}

/// Device measurement metadata over `device_measurements` and `conversion`
#[derive(Clone)]
pub struct SqliteMeasurementCatalog {
    pool: SqlitePool,
}

impl SqliteMeasurementCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MeasurementCatalog for SqliteMeasurementCatalog {
    async fn describe(&self, measurement_id: &str) -> Result<Option<MeasurementInfo>> {
        let row = sqlx::query(
            r#"
            SELECT dm.measurement, dm.unit, dm.channel, c.convert_unit_to
            FROM device_measurements dm
            LEFT JOIN conversion c ON c.unique_id = dm.conversion_id
            WHERE dm.unique_id = ?
            "#,
        )
        .bind(measurement_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let unit: String = row.try_get("unit")?;
        let converted: Option<String> = row.try_get("convert_unit_to")?;
        Ok(Some(MeasurementInfo {
            channel: row.try_get("channel")?,
            unit: converted.filter(|u| !u.is_empty()).unwrap_or(unit),
            measurement: row.try_get("measurement")?,
        }))
    }
}

/// Measurement time series over the `measurements` table
#[derive(Clone)]
pub struct SqliteMeasurementStore {
    pool: SqlitePool,
}

impl SqliteMeasurementStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MeasurementResolver for SqliteMeasurementStore {
    async fn query(&self, query: &MeasurementQuery) -> Result<Option<Measurement>> {
        let oldest_ms = query
            .max_age
            .and_then(|age| chrono::Duration::from_std(age).ok())
            .map(|age| (Utc::now() - age).timestamp_millis())
            .unwrap_or(i64::MIN);

        let row = sqlx::query(
            r#"
            SELECT value, timestamp
            FROM measurements
            WHERE device_id = ? AND measurement = ? AND unit = ? AND channel = ?
              AND timestamp >= ?
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(&query.device_id)
        .bind(&query.measurement)
        .bind(&query.unit)
        .bind(query.channel)
        .bind(oldest_ms)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let millis: i64 = row.try_get("timestamp")?;
        let timestamp = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
            ConditionalError::Database(format!("invalid measurement timestamp {}", millis))
        })?;
        Ok(Some(Measurement {
            value: row.try_get("value")?,
            timestamp,
        }))
    }
}
