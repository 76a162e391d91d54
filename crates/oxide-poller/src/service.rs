//! Interval loop driving a repository poller.

use crate::poller::{PollOutcome, RepositoryPoller};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, error, info};

/// Polls on a fixed interval until shutdown or a fatal poll result.
pub struct PollingService {
    poller: Arc<RepositoryPoller>,
    interval: Duration,
}

impl PollingService {
    pub fn new(poller: Arc<RepositoryPoller>) -> Self {
        let interval = poller.config().poll_interval();
        Self { poller, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn poller(&self) -> &Arc<RepositoryPoller> {
        &self.poller
    }

    /// Run on a background task.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Run the poll loop until shutdown. The first poll happens immediately.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let name = &self.poller.config().name;
        info!(
            poller = %name,
            interval_secs = self.interval.as_secs(),
            "Starting polling service"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.poller.poll().await {
                        Ok(PollOutcome::Emitted(count)) => {
                            debug!(poller = %name, count, "Poll cycle emitted changes");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(poller = %name, error = %e, "{}", self.poller.describe());
                            if e.is_fatal() {
                                break;
                            }
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!(poller = %name, "Shutdown channel closed, polling service exiting");
                        break;
                    }
                    if *shutdown.borrow() {
                        info!(poller = %name, "Polling service shutting down");
                        break;
                    }
                }
            }
        }

        self.poller.stop();
    }
}
