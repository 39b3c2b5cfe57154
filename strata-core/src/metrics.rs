use metrics_exporter_prometheus::PrometheusBuilder;
pub use metrics_exporter_prometheus::PrometheusHandle;

use crate::executor::Executor;

/// Install the Prometheus recorder and return the handle for scraping.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, Box<dyn std::error::Error>> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

/// Record the executor's pool stats as gauges, labelled by dialect.
#[allow(clippy::cast_precision_loss)]
pub fn record_pool_stats(executor: &Executor) {
    let pool = executor.pool();
    let db = executor.dialect().name();
    metrics::gauge!("strata.pool.size", "db" => db).set(f64::from(pool.size()));
    metrics::gauge!("strata.pool.idle", "db" => db).set(pool.num_idle() as f64);
    metrics::gauge!("strata.pool.max_size", "db" => db)
        .set(f64::from(pool.options().get_max_connections()));
}
