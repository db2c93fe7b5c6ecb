//! Periodic job dispatch.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Run `job` every `period` on the maintenance cadence. The first tick fires
/// after one full period, not immediately.
pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, mut job: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            tracing::debug!(job = name, "periodic job tick");
            job().await;
        }
    })
}
