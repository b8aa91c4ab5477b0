//! Supervision of long-lived watch streams
//!
//! A watch is re-opened whenever the stream ends or fails, after an
//! exponential backoff delay. The consumer keeps running on whatever
//! state it already has while the watch is down.

use crate::backoff::{Backoff, BackoffConfig};
use crate::cluster::{ClusterError, ResourceEvent, WatchStream};
use crate::health::HealthRegistry;
use crate::observability::EngineMetrics;
use futures::StreamExt;
use std::future::Future;
use std::ops::ControlFlow;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct WatchSupervisor {
    component: &'static str,
    backoff: BackoffConfig,
    health: HealthRegistry,
    metrics: EngineMetrics,
}

impl WatchSupervisor {
    pub fn new(
        component: &'static str,
        backoff: BackoffConfig,
        health: HealthRegistry,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            component,
            backoff,
            health,
            metrics,
        }
    }

    pub fn component(&self) -> &'static str {
        self.component
    }

    /// Feed events from `open` into `handle` until `handle` breaks.
    ///
    /// Never returns otherwise. The backoff resets after every delivered
    /// event.
    pub async fn run<T, Open, Fut, Handle>(&self, mut open: Open, mut handle: Handle)
    where
        Open: FnMut() -> Fut,
        Fut: Future<Output = Result<WatchStream<T>, ClusterError>>,
        Handle: FnMut(ResourceEvent<T>) -> ControlFlow<()>,
    {
        let mut backoff = Backoff::new(self.backoff);

        loop {
            let reason = match open().await {
                Ok(mut stream) => {
                    info!(component = self.component, "Watch established");
                    self.health.set_healthy(self.component).await;

                    let mut reason = "stream closed".to_string();
                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(event) => {
                                backoff.reset();
                                if handle(event).is_break() {
                                    debug!(component = self.component, "Watch consumer stopped");
                                    return;
                                }
                            }
                            Err(e) => {
                                reason = e.to_string();
                                break;
                            }
                        }
                    }
                    reason
                }
                Err(e) => e.to_string(),
            };

            let delay = backoff.next_delay();
            warn!(
                component = self.component,
                reason = %reason,
                attempt = backoff.attempts(),
                retry_in_ms = delay.as_millis() as u64,
                "Watch interrupted, reconnecting"
            );
            self.metrics.inc_watch_reconnects(self.component);
            self.health
                .set_degraded(self.component, format!("reconnecting: {}", reason))
                .await;

            tokio::time::sleep(delay).await;
        }
    }
}
