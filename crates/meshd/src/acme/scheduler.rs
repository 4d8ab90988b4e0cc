//! Background certificate renewal scheduler
//!
//! Periodically runs a renewal sweep until cancelled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Default check interval (12 hours)
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(12 * 3600);

/// Minimum check interval (1 minute)
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Maximum check interval (30 days)
pub const MAX_CHECK_INTERVAL: Duration = Duration::from_secs(30 * 24 * 3600);

/// Outcome of one renewal sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Hostnames examined
    pub checked: usize,
    /// Certificates successfully renewed
    pub renewed: usize,
    /// Renewal attempts that failed
    pub failed: usize,
}

/// Something that can run a renewal sweep
#[async_trait]
pub trait RenewalSweep: Send + Sync {
    async fn sweep(&self) -> SweepReport;
}

/// Background certificate renewal scheduler
///
/// The first sweep runs one interval after start. A sweep with failures is
/// logged and the loop carries on.
pub struct RenewalScheduler {
    target: Arc<dyn RenewalSweep>,
    check_interval: Duration,
    shutdown: CancellationToken,
}

impl RenewalScheduler {
    pub fn new(target: Arc<dyn RenewalSweep>, shutdown: CancellationToken) -> Self {
        Self {
            target,
            check_interval: DEFAULT_CHECK_INTERVAL,
            shutdown,
        }
    }

    /// Set the check interval
    ///
    /// The interval is clamped to between 1 minute and 30 days.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval.clamp(MIN_CHECK_INTERVAL, MAX_CHECK_INTERVAL);
        self
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Run the renewal loop until the shutdown token is cancelled
    pub async fn run(self) {
        info!(
            check_interval_secs = self.check_interval.as_secs(),
            "Starting certificate renewal scheduler"
        );

        let mut ticker = interval_at(Instant::now() + self.check_interval, self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Certificate renewal scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            debug!("Running scheduled certificate renewal check");

            let report = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Certificate renewal scheduler stopped during sweep");
                    return;
                }
                report = self.target.sweep() => report,
            };

            if report.failed > 0 {
                error!(
                    checked = report.checked,
                    renewed = report.renewed,
                    failed = report.failed,
                    "Certificate renewal sweep had failures"
                );
            } else {
                info!(
                    checked = report.checked,
                    renewed = report.renewed,
                    "Certificate renewal sweep complete"
                );
            }
        }
    }
}

impl std::fmt::Debug for RenewalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalScheduler")
            .field("check_interval", &self.check_interval)
            .field("cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}
