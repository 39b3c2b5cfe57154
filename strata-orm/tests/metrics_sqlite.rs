#![cfg(feature = "metrics")]

mod common;

use strata_orm::metrics::{install_prometheus_recorder, record_pool_stats};
use strata_orm::prelude::*;

#[tokio::test]
async fn metrics_are_recorded_for_queries() {
    let handle = install_prometheus_recorder().expect("recorder");
    let env = common::setup().await;
    common::seed(&env).await;

    let users = env
        .pool("User")
        .unwrap()
        .search(Condition::field("Name").ilike("smith"));
    assert_eq!(users.len().await.unwrap(), 3);
    record_pool_stats(env.executor());

    metrics::counter!("strata.test.counter").increment(1);

    let rendered = handle.render();
    assert!(rendered.contains("strata_test_counter"));
    assert!(rendered.contains("strata_pool_size"));
    assert!(rendered.contains("strata_query_count"));
}
