// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Rate Limit Record Sweeper
//!
//! Background task that periodically drops rate limit records whose window
//! has passed and whose block has expired. Pure memory hygiene; the
//! limiter also resets stale records lazily on access, so a missed sweep
//! never affects correctness.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown,
//! mirroring the server's own shutdown path.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::RateLimiter;

/// Default interval between sweeps.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Background sweeper for a shared [`RateLimiter`].
pub struct Sweeper {
    limiter: Arc<RateLimiter>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Override the sweep interval (tests).
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the sweep loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "rate limit sweeper starting"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("rate limit sweeper shutting down");
                    return;
                }
            }

            let removed = self.limiter.store().sweep(Utc::now());
            if removed > 0 {
                debug!(
                    removed,
                    tracked = self.limiter.store().tracked(),
                    "swept expired rate limit records"
                );
            }
        }
    }
}
