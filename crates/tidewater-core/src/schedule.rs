//! Fixed-delay scheduling loop for running without an external cron.
//!
//! Ticks never overlap: the delay starts only once the previous tick has
//! finished, so a tick that outlasts the interval pushes the next one back
//! instead of racing it.

use async_trait::async_trait;
use rand::Rng;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::emit;
use crate::metrics::events::TickCompleted;

/// Work performed once per scheduled tick.
#[async_trait]
pub trait ScheduledJob: Send {
    /// Fatal error type. Errors returned here stop the loop.
    type Error: std::error::Error + Send;

    /// Run one tick. `tick` counts from zero.
    async fn tick(&mut self, tick: u64) -> Result<(), Self::Error>;
}

/// Random delay between zero and `max_secs` seconds.
pub fn random_jitter(max_secs: u64) -> Duration {
    if max_secs > 0 {
        Duration::from_millis(rand::rng().random_range(0..max_secs * 1000))
    } else {
        Duration::ZERO
    }
}

/// Run `job` every `interval` (plus jitter) until `shutdown` is cancelled.
///
/// Cancellation during a tick drops the tick's future, which rolls back any
/// open warehouse transaction; the job never observes a half-finished tick
/// as success.
pub async fn run_schedule<J: ScheduledJob>(
    job: &mut J,
    interval: Duration,
    jitter_secs: u64,
    shutdown: CancellationToken,
    name: &str,
) -> Result<(), J::Error> {
    let mut tick = 0u64;

    loop {
        let started = Instant::now();
        let shutdown_clone = shutdown.clone();
        tokio::select! {
            biased;

            _ = shutdown_clone.cancelled() => {
                info!(target = name, tick, "Shutdown requested during tick");
                return Ok(());
            }

            result = job.tick(tick) => result?,
        }

        emit!(TickCompleted {
            name: name.to_string(),
            duration: started.elapsed(),
        });

        let delay = interval + random_jitter(jitter_secs);
        debug!(
            target = name,
            tick,
            delay_secs = delay.as_secs(),
            "Tick complete, waiting for next"
        );
        tick += 1;

        if shutdown
            .run_until_cancelled(tokio::time::sleep(delay))
            .await
            .is_none()
        {
            info!(target = name, "Shutdown requested while waiting");
            return Ok(());
        }
    }
}
