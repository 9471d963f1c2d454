//! Periodic pool gauges
//!
//! Spawns a background task that publishes credential counts as metrics
//! gauges. Health is otherwise only visible on request; the gauges let
//! dashboards alert when the pool drains. The task runs independently of the
//! dispatch path and only takes the pool's read lock.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::pool::CredentialPool;

/// Spawn a background task that publishes pool gauges every `interval`.
///
/// Returns a `JoinHandle` for the spawned task.
pub fn spawn_gauge_task(pool: Arc<CredentialPool>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            publish_gauges(&pool).await;
        }
    })
}

/// Publish one round of gauges from a status snapshot.
async fn publish_gauges(pool: &CredentialPool) {
    let snapshot = pool.status_snapshot().await;
    metrics::gauge!("credential_pool_total").set(snapshot.total as f64);
    metrics::gauge!("credential_pool_active").set(snapshot.active as f64);
    metrics::gauge!("credential_pool_rate_limited").set(snapshot.rate_limited as f64);
    metrics::gauge!("credential_pool_error").set(snapshot.error as f64);
    metrics::gauge!("credential_pool_usable").set(snapshot.usable as f64);
    debug!(
        total = snapshot.total,
        active = snapshot.active,
        rate_limited = snapshot.rate_limited,
        "published credential pool gauges"
    );
}
