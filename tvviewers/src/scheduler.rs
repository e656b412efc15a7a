//! Periodic loops: viewer ticks and program refreshes.
//!
//! Both loops are independent Tokio tasks. A slow iteration only delays its
//! own loop (`MissedTickBehavior::Delay`), and both exit when the shutdown
//! token is cancelled.

use crate::context::ViewersContext;
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Handles of the two background loops.
pub struct SchedulerHandles {
    pub viewers: JoinHandle<()>,
    pub programs: JoinHandle<()>,
}

impl SchedulerHandles {
    /// Waits for both loops to finish (after cancellation).
    pub async fn join(self) {
        let _ = tokio::join!(self.viewers, self.programs);
    }
}

/// Spawns the viewer tick loop and the program refresh loop.
pub fn spawn_loops(ctx: Arc<ViewersContext>, shutdown: CancellationToken) -> SchedulerHandles {
    let viewers = tokio::spawn(run_viewer_loop(ctx.clone(), shutdown.clone()));
    let programs = tokio::spawn(run_program_loop(ctx, shutdown));
    SchedulerHandles { viewers, programs }
}

/// Generates, publishes and broadcasts one snapshot per tick interval.
pub async fn run_viewer_loop(ctx: Arc<ViewersContext>, shutdown: CancellationToken) {
    let period = ctx.config().tick_interval();
    info!(period_secs = period.as_secs(), "viewer loop started");
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                match ctx.tick(Local::now()) {
                    Ok(report) => debug!(
                        queued = report.queued,
                        dropped = report.dropped,
                        webhooks = report.webhooks,
                        "viewer tick"
                    ),
                    Err(e) => error!(error = %e, "viewer tick failed"),
                }
            }
        }
    }

    info!("viewer loop stopped");
}

/// Keeps the now-playing projection fresh.
pub async fn run_program_loop(ctx: Arc<ViewersContext>, shutdown: CancellationToken) {
    let period = ctx.refresh_interval().max(Duration::from_secs(1));
    info!(period_secs = period.as_secs(), "program refresh loop started");
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                // L'erreur est déjà journalisée, la projection précédente reste en place
                let _ = ctx.refresh_programs(Local::now()).await;
            }
        }
    }

    info!("program refresh loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViewersConfig;
    use crate::generator::ViewerGenerator;
    use tvguide::MemoryProgramSource;

    #[tokio::test(start_paused = true)]
    async fn test_loops_tick_and_stop() {
        let config = ViewersConfig {
            tick_interval_secs: 1,
            ..Default::default()
        };
        let ctx = Arc::new(
            ViewersContext::with_generator(
                ViewerGenerator::with_seed(Arc::new(config), 5),
                Arc::new(MemoryProgramSource::new()),
                Duration::from_secs(1),
            )
            .unwrap(),
        );
        let (mut sub, initial) = ctx.subscribe_stream();
        assert_eq!(initial.seq(), 0);

        let shutdown = CancellationToken::new();
        let handles = spawn_loops(ctx.clone(), shutdown.clone());

        // Premier tick immédiat puis un par seconde
        assert_eq!(sub.recv().await.unwrap().seq, 1);
        assert_eq!(sub.recv().await.unwrap().seq, 2);

        shutdown.cancel();
        handles.join().await;
        let last = ctx.latest().seq();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ctx.latest().seq(), last);
    }
}
