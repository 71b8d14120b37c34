//! Reconnection supervisor.
//!
//! Wraps one side of the pipeline (producer or subscriber). Whenever the
//! side's startup or session fails, the failure is logged and the whole
//! startup routine is run again after a fixed delay. There is no retry limit
//! and no backoff growth: broker outages are assumed transient and the
//! process is expected to be supervised externally.

use crate::shutdown::Shutdown;
use async_trait::async_trait;
use std::fmt::Display;
use std::time::Duration;
use tracing::{error, info, warn};

/// Delay between a failed attempt and the next full restart.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(5000);

/// A restartable side of the pipeline.
#[async_trait]
pub trait Service: Send {
    type Error: Display + Send;

    /// Run one full session: connect, set up, work until `shutdown` fires.
    ///
    /// `Ok(())` means a clean stop; any `Err` schedules a restart.
    async fn run(&mut self, shutdown: Shutdown) -> Result<(), Self::Error>;
}

/// Summary of a supervised run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorReport {
    /// Number of times the service was started.
    pub attempts: u32,
    /// Number of attempts that ended in an error.
    pub failures: u32,
}

/// Restarts a [`Service`] with a fixed delay until shutdown.
pub struct Supervisor {
    name: String,
    retry_delay: Duration,
}

impl Supervisor {
    pub fn new(name: impl Into<String>, retry_delay: Duration) -> Self {
        Self {
            name: name.into(),
            retry_delay,
        }
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Drive `service` until it stops cleanly or shutdown is broadcast.
    ///
    /// `own_shutdown` is held across attempts, so a signal that lands before
    /// the first attempt or between attempts is not lost.
    pub async fn run<S: Service>(
        &self,
        service: &mut S,
        mut own_shutdown: Shutdown,
    ) -> SupervisorReport {
        let mut report = SupervisorReport {
            attempts: 0,
            failures: 0,
        };

        loop {
            // Taken before the poll: a signal sent in between is seen by one of the two.
            let session_shutdown = own_shutdown.resubscribe();
            if own_shutdown.poll() {
                info!(side = %self.name, "Shutdown requested, not starting");
                break;
            }

            report.attempts += 1;
            info!(side = %self.name, attempt = report.attempts, "Starting");

            match service.run(session_shutdown).await {
                Ok(()) => {
                    info!(side = %self.name, "Stopped cleanly");
                    break;
                }
                Err(e) => {
                    report.failures += 1;
                    error!(side = %self.name, error = %e, "Session failed");
                }
            }

            if own_shutdown.poll() {
                break;
            }

            warn!(
                side = %self.name,
                delay_ms = self.retry_delay.as_millis() as u64,
                "Restarting after delay"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.retry_delay) => {}
                _ = own_shutdown.recv() => {
                    info!(side = %self.name, "Shutdown requested during restart delay");
                    break;
                }
            }
        }

        report
    }
}
