#![cfg(feature = "postgres")]

mod common;

use common::{JANE, WILL, seed, user_by_email};
use strata_orm::{diff_database, format_schema_diff_summary};
use strata_orm::prelude::*;

const TABLES: &[&str] = &["post_tag_rel", "user", "profile", "post", "tag"];

/// A scratch database: synchronization drops every table the models do not declare.
async fn get_pg_env() -> Option<Environment> {
    let db_url = std::env::var("STRATA_TEST_POSTGRES_URL").ok()?;
    if !db_url.starts_with("postgres://") && !db_url.starts_with("postgresql://") {
        return None;
    }
    let executor = Executor::connect(&db_url).await.ok()?;
    for table in TABLES {
        let sql = format!("DROP TABLE IF EXISTS \"{}\" CASCADE", table);
        executor.execute_ddl(&sql).await.ok();
    }
    let models = common::bootstrap_models();
    sync_database(&executor, &models).await.expect("sync");
    Some(Environment::new(models, executor, Principal::superuser()))
}

#[tokio::test]
async fn postgres_sync_is_idempotent() {
    let Some(env) = get_pg_env().await else {
        return;
    };
    let diff = diff_database(env.executor(), env.models()).await.expect("diff");
    assert!(diff.is_empty(), "{}", format_schema_diff_summary(&diff));
    let second = sync_database(env.executor(), env.models()).await.expect("sync");
    assert!(second.is_empty(), "{:?}", second);
}

#[tokio::test]
async fn postgres_records_round_trip() {
    let Some(env) = get_pg_env().await else {
        return;
    };
    seed(&env).await;

    let jane = user_by_email(&env, JANE);
    assert_eq!(jane.get("Age").await.unwrap(), Value::Int(23));
    assert_eq!(jane.get("PMoney").await.unwrap(), Value::Float(12345.0));
    assert_eq!(
        jane.get("DecoratedName").await.unwrap(),
        Value::from("User: Jane A. Smith [<jane.smith@example.com>]")
    );

    jane.get_records("Profile").await.unwrap().set("Age", 24).await.unwrap();
    assert_eq!(jane.get("Age").await.unwrap(), Value::Int(24));

    let users = env.pool("User").unwrap();
    let found = users
        .search(Condition::field("Name").ilike("smith").and().field("IsStaff").equals(true))
        .limit(5);
    assert_eq!(found.ids().await.unwrap(), user_by_email(&env, WILL).ids().await.unwrap());
}

#[tokio::test]
async fn postgres_dates_bind_and_decode() {
    let Some(env) = get_pg_env().await else {
        return;
    };
    // The fixture models stay declared so their tables survive the sync.
    let registry = Registry::new();
    common::declare_models(&registry);
    registry.new_model("Event");
    registry.add_field("Event", Field::date("Day"));
    registry.add_field("Event", Field::datetime("At"));
    let models = registry.bootstrap();
    let executor = env.executor().clone();
    executor.execute_ddl("DROP TABLE IF EXISTS \"event\" CASCADE").await.ok();
    sync_database(&executor, &models).await.expect("sync");
    let env = Environment::new(models, executor, Principal::superuser());

    let day = chrono::NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
    let at = day.and_hms_opt(13, 30, 0).unwrap();
    let event = env
        .pool("Event")
        .unwrap()
        .create(field_map! { "Day" => day, "At" => at })
        .await
        .unwrap();
    assert_eq!(event.get("Day").await.unwrap(), Value::Date(day));
    assert_eq!(event.get("At").await.unwrap(), Value::DateTime(at));

    let later = env
        .pool("Event")
        .unwrap()
        .search(Condition::field("Day").greater_or_equal(day));
    assert_eq!(later.len().await.unwrap(), 1);
}
