//! Integration tests for the SQLite repositories
//!
//! Uses a single-connection in-memory database so every query sees the same data.

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use verdant_conditional::memory::{MemoryDigitalInput, RecordingDispatcher};
use verdant_conditional::repository::{delete_conditional, insert_measurement, upsert_conditional};
use verdant_conditional::{
    init_schema, list_conditionals, load_sample_interval, record_trigger, ConditionKind,
    ConditionResolver, ConditionalController, ControllerContext, MeasurementCatalog,
    MeasurementInfo, MeasurementQuery, MeasurementResolver, RuleDefinition, RuleStore,
    SqliteMeasurementCatalog, SqliteMeasurementStore, SqliteRuleStore, SubCondition,
};

async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    init_schema(&pool).await.expect("Failed to create schema");
    pool
}

fn sample_rule() -> RuleDefinition {
    RuleDefinition {
        id: "3f2a-88c1".to_string(),
        name: "Greenhouse heat".to_string(),
        expression: "{c1} > 20 and {e1}".to_string(),
        period_secs: 30.0,
        start_offset_secs: 5.0,
        refractory_secs: 120.0,
        activated: true,
        conditions: vec![
            SubCondition::measurement("c1-aaaa", "dev1,m-temp", Some(300)),
            SubCondition::edge("e1-bbbb", 17),
        ],
    }
}

async fn seed_device_measurement(pool: &SqlitePool, conversion: Option<&str>) {
    sqlx::query(
        "INSERT INTO device_measurements (unique_id, device_id, measurement, unit, channel, conversion_id)
         VALUES ('m-temp', 'dev1', 'temperature', 'C', 2, ?)",
    )
    .bind(conversion)
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn test_rule_round_trip() {
    let pool = setup_test_db().await;
    let rule = sample_rule();
    upsert_conditional(&pool, &rule).await.unwrap();

    let store = SqliteRuleStore::new(pool.clone());
    let loaded = store.load(&rule.id).await.unwrap().unwrap();
    assert_eq!(loaded, rule);
    assert_eq!(store.list_ids().await.unwrap(), vec![rule.id.clone()]);

    // upsert replaces sub-conditions wholesale
    let mut updated = rule.clone();
    updated.conditions.pop();
    updated.expression = "{c1} > 25".to_string();
    upsert_conditional(&pool, &updated).await.unwrap();
    let loaded = store.load(&rule.id).await.unwrap().unwrap();
    assert_eq!(loaded.conditions.len(), 1);
    assert_eq!(loaded.expression, "{c1} > 25");

    assert!(delete_conditional(&pool, &rule.id).await.unwrap());
    assert!(store.load(&rule.id).await.unwrap().is_none());
    assert!(!delete_conditional(&pool, &rule.id).await.unwrap());
}

#[tokio::test]
async fn test_conditions_load_in_position_order() {
    let pool = setup_test_db().await;
    sqlx::query(
        "INSERT INTO conditional (unique_id, name, conditional_statement, period, is_activated)
         VALUES ('r1', 'ordered', '{b} and {a}', 10, 1)",
    )
    .execute(&pool)
    .await
    .unwrap();
    for (id, kind, position) in [("b", "edge", 1), ("a", "edge", 0), ("z", "output", 2)] {
        sqlx::query(
            "INSERT INTO conditional_conditions (unique_id, conditional_id, condition_type, gpio_pin, position)
             VALUES (?, 'r1', ?, 4, ?)",
        )
        .bind(id)
        .bind(kind)
        .bind(position)
        .execute(&pool)
        .await
        .unwrap();
    }

    let rule = SqliteRuleStore::new(pool).load("r1").await.unwrap().unwrap();
    let ids: Vec<_> = rule.conditions.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"], "unsupported types are skipped");
    assert_eq!(rule.period_secs, 10.0);
    assert_eq!(rule.start_offset_secs, 0.0);
    assert!(matches!(
        rule.conditions[0].kind,
        ConditionKind::Edge { pin: Some(4) }
    ));
}

#[tokio::test]
async fn test_edge_without_pin_loads() {
    let pool = setup_test_db().await;
    sqlx::query(
        "INSERT INTO conditional (unique_id, name, conditional_statement, period, is_activated)
         VALUES ('r2', 'unwired', '{t1} > 20 or {e1}', 10, 1)",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO conditional_conditions (unique_id, conditional_id, condition_type, measurement, position)
         VALUES ('t1-x', 'r2', 'measurement', 'dev1,m1', 0)",
    )
    .execute(&pool)
    .await
    .unwrap();
    for (id, pin, position) in [("e1-x", None, 1), ("e2-x", Some(-3_i64), 2)] {
        sqlx::query(
            "INSERT INTO conditional_conditions (unique_id, conditional_id, condition_type, gpio_pin, position)
             VALUES (?, 'r2', 'edge', ?, ?)",
        )
        .bind(id)
        .bind(pin)
        .bind(position)
        .execute(&pool)
        .await
        .unwrap();
    }

    let rule = SqliteRuleStore::new(pool).load("r2").await.unwrap().unwrap();
    assert_eq!(rule.conditions.len(), 3);
    assert!(matches!(
        rule.conditions[0].kind,
        ConditionKind::Measurement { .. }
    ));
    assert_eq!(rule.conditions[1].kind, ConditionKind::Edge { pin: None });
    assert_eq!(rule.conditions[2].kind, ConditionKind::Edge { pin: None });
}

#[tokio::test]
async fn test_catalog_applies_conversion() {
    let pool = setup_test_db().await;
    sqlx::query(
        "INSERT INTO conversion (unique_id, convert_unit_from, convert_unit_to) VALUES ('conv1', 'C', 'F')",
    )
    .execute(&pool)
    .await
    .unwrap();
    seed_device_measurement(&pool, Some("conv1")).await;

    let catalog = SqliteMeasurementCatalog::new(pool);
    let info = catalog.describe("m-temp").await.unwrap().unwrap();
    assert_eq!(
        info,
        MeasurementInfo {
            channel: 2,
            unit: "F".to_string(),
            measurement: "temperature".to_string(),
        }
    );
    assert!(catalog.describe("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_catalog_without_conversion_keeps_unit() {
    let pool = setup_test_db().await;
    seed_device_measurement(&pool, None).await;
    let info = SqliteMeasurementCatalog::new(pool)
        .describe("m-temp")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.unit, "C");
}

#[tokio::test]
async fn test_measurement_query_respects_max_age() {
    let pool = setup_test_db().await;
    let info = MeasurementInfo {
        channel: 2,
        unit: "C".to_string(),
        measurement: "temperature".to_string(),
    };
    let now = Utc::now();
    insert_measurement(&pool, "dev1", &info, 18.0, now - ChronoDuration::seconds(900))
        .await
        .unwrap();
    insert_measurement(&pool, "dev1", &info, 21.0, now - ChronoDuration::seconds(120))
        .await
        .unwrap();

    let store = SqliteMeasurementStore::new(pool);
    let mut query = MeasurementQuery {
        device_id: "dev1".to_string(),
        unit: "C".to_string(),
        measurement: "temperature".to_string(),
        channel: 2,
        max_age: None,
    };

    let latest = store.query(&query).await.unwrap().unwrap();
    assert_eq!(latest.value, 21.0);

    query.max_age = Some(Duration::from_secs(60));
    assert!(store.query(&query).await.unwrap().is_none());

    query.max_age = Some(Duration::from_secs(600));
    assert_eq!(store.query(&query).await.unwrap().unwrap().value, 21.0);

    query.channel = 3;
    query.max_age = None;
    assert!(store.query(&query).await.unwrap().is_none());
}

#[tokio::test]
async fn test_sample_interval_and_trigger_log() {
    let pool = setup_test_db().await;
    assert_eq!(load_sample_interval(&pool).await.unwrap(), None);

    sqlx::query("INSERT INTO misc (id, sample_rate_controller_conditional) VALUES (1, 0.5)")
        .execute(&pool)
        .await
        .unwrap();
    assert_eq!(load_sample_interval(&pool).await.unwrap(), Some(0.5));

    record_trigger(&pool, "3f2a-88c1", "message").await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conditional_trigger_log")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_list_conditionals() {
    let pool = setup_test_db().await;
    let mut second = sample_rule();
    second.id = "0a1b-0001".to_string();
    second.conditions = vec![SubCondition::edge("e2-cccc", 5)];
    upsert_conditional(&pool, &sample_rule()).await.unwrap();
    upsert_conditional(&pool, &second).await.unwrap();

    let rules = list_conditionals(&pool).await.unwrap();
    let ids: Vec<_> = rules.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["0a1b-0001", "3f2a-88c1"]);
}

#[tokio::test]
async fn test_controller_over_sqlite() {
    let pool = setup_test_db().await;
    let mut rule = sample_rule();
    rule.start_offset_secs = 0.0;
    upsert_conditional(&pool, &rule).await.unwrap();
    seed_device_measurement(&pool, None).await;
    let info = MeasurementInfo {
        channel: 2,
        unit: "C".to_string(),
        measurement: "temperature".to_string(),
    };
    insert_measurement(&pool, "dev1", &info, 24.5, Utc::now())
        .await
        .unwrap();

    let inputs = Arc::new(MemoryDigitalInput::new());
    inputs.set(17, true);
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let resolver = ConditionResolver::new(
        Arc::new(SqliteMeasurementCatalog::new(pool.clone())),
        Arc::new(SqliteMeasurementStore::new(pool.clone())),
        inputs,
    );
    let ctx = ControllerContext::new(
        Arc::new(SqliteRuleStore::new(pool)),
        resolver,
        dispatcher.clone(),
    )
    .with_sample_interval(Duration::from_millis(20));

    let controller = ConditionalController::load("3f2a-88c1", ctx).await.unwrap();
    controller.start();
    tokio::time::sleep(Duration::from_millis(400)).await;
    controller.stop().await;

    let calls = dispatcher.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].1.contains("Replaced:\n24.5 > 20 and true"));
}
