use crate::metrics;
use std::sync::Arc;
use tokio::time::{interval, Duration, Instant};
use tracing::{debug, error, info};

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<crate::context::AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        // Spawn cleanup tasks
        tokio::spawn(Self::expiry_cleanup_job(Arc::clone(&self)));
        tokio::spawn(Self::rate_limiter_prune_job(Arc::clone(&self)));

        // Spawn monitoring tasks
        tokio::spawn(Self::health_check_job(Arc::clone(&self)));
        tokio::spawn(Self::uptime_job());

        info!("Background jobs started");
    }

    /// Purge expired sessions and one-time codes
    async fn expiry_cleanup_job(scheduler: Arc<Self>) {
        let period = Duration::from_secs(scheduler.context.config.jobs.cleanup_interval);
        let mut interval = interval(period);

        loop {
            interval.tick().await;
            debug!("Running expiry cleanup");

            match tasks::cleanup_expired(&scheduler.context).await {
                Ok((sessions, codes)) => {
                    metrics::record_background_job("expiry_cleanup", "success");
                    if sessions > 0 || codes > 0 {
                        info!(
                            "Expiry cleanup removed {} sessions and {} one-time codes",
                            sessions, codes
                        );
                    }
                }
                Err(e) => {
                    metrics::record_background_job("expiry_cleanup", "failure");
                    error!("Failed to purge expired sessions and codes: {}", e);
                }
            }
        }
    }

    /// Drop idle rate-limiter buckets (runs every 10 minutes)
    async fn rate_limiter_prune_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(600));

        loop {
            interval.tick().await;
            let remaining = tasks::prune_rate_limiter(&scheduler.context);
            metrics::record_background_job("rate_limit_prune", "success");
            debug!("Rate limiter tracking {} keys after prune", remaining);
        }
    }

    /// Health check job (runs every 5 minutes)
    async fn health_check_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300));

        loop {
            interval.tick().await;

            match tasks::health_check(&scheduler.context).await {
                Ok(_) => metrics::record_background_job("health_check", "success"),
                Err(e) => {
                    metrics::record_background_job("health_check", "failure");
                    error!("Health check failed: {}", e);
                }
            }
        }
    }

    /// Keep the uptime gauge current
    async fn uptime_job() {
        let started = Instant::now();
        let mut interval = interval(Duration::from_secs(15));

        loop {
            interval.tick().await;
            metrics::UPTIME_SECONDS.set(started.elapsed().as_secs_f64());
        }
    }
}
