//! Background job engines. Each engine owns a polling loop with a
//! configurable tick, reads its work set in a single query, and wraps every
//! item in a recovery scope so one bad job never takes the loop down. All
//! of them originate transactions exclusively through the executor.

pub mod dca;
pub mod flow;
pub mod limit_orders;
pub mod signals;
pub mod snipe;
pub mod whales;

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Drive `tick` on a fixed interval until the shutdown flag flips.
pub(crate) async fn run_poll_loop<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    tick: F,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(engine = name, interval_ms = interval.as_millis() as u64, "engine started");

    loop {
        tokio::select! {
            _ = timer.tick() => tick().await,
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(engine = name, "engine stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn poll_loop_ticks_then_honors_shutdown() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let ticks = Arc::new(AtomicU32::new(0));

        let counter = ticks.clone();
        let handle = tokio::spawn(async move {
            run_poll_loop("test", Duration::from_millis(5), stop_rx, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }
}
