//! Container event watching.
//!
//! Owns the daemon event subscription and keeps it alive across
//! failures: a closed or erroring stream tears the subscription down
//! and resubscribes after a fixed backoff, and a 10 second idle window
//! triggers a liveness ping whose failure forces the same teardown.
//! After every successful (re)subscribe a resync is requested so no
//! event missed during the gap leaves stale output behind. Allow-listed
//! events fan out to every registered pipeline channel; a full pipeline
//! channel drops the event for that pipeline only, which is safe
//! because the pending resync or a later event covers it.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::docker::DockerClient;
use crate::event::ContainerEvent;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(10);
const IDLE_PING: Duration = Duration::from_secs(10);

/// Watches the daemon event stream and fans events out to pipelines.
pub struct EventWatcher<C> {
    client: Arc<C>,
    sinks: Vec<mpsc::Sender<ContainerEvent>>,
    resync: mpsc::Sender<()>,
    cancel: CancellationToken,
}

impl<C: DockerClient> EventWatcher<C> {
    pub fn new(
        client: Arc<C>,
        sinks: Vec<mpsc::Sender<ContainerEvent>>,
        resync: mpsc::Sender<()>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            sinks,
            resync,
            cancel,
        }
    }

    /// Runs until cancelled. Dropping the watcher closes every pipeline
    /// channel, which ends the downstream debounce loops.
    pub async fn run(self) {
        loop {
            let mut events = self.client.events();
            info!("watching container events");

            // Events between subscriptions are lost; regenerate
            // everything to catch up.
            if self.resync.send(()).await.is_err() {
                return;
            }

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        info!("event watcher stopping");
                        return;
                    }
                    next = tokio::time::timeout(IDLE_PING, events.next()) => {
                        match next {
                            Ok(Some(Ok(event))) => {
                                if event.is_watched() {
                                    info!(
                                        kind = %event.kind,
                                        action = %event.action,
                                        id = %event.short_id(),
                                        "received event"
                                    );
                                    self.fan_out(&event);
                                }
                            }
                            Ok(Some(Err(e))) => {
                                warn!(error = %e, "event stream failed");
                                break;
                            }
                            Ok(None) => {
                                warn!("event stream closed");
                                break;
                            }
                            Err(_) => {
                                if let Err(e) = self.client.ping().await {
                                    warn!(error = %e, "daemon liveness check failed");
                                    break;
                                }
                            }
                        }
                    }
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("event watcher stopping");
                    return;
                }
                _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
            }
        }
    }

    fn fan_out(&self, event: &ContainerEvent) {
        for sink in &self.sinks {
            match sink.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(id = %event.short_id(), "pipeline event channel full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }
}
