//! 20ms tick scheduler for the playout engine.
//!
//! The engine is moved onto a dedicated tokio task that owns it for the
//! whole call, so ticks can never overlap. Late ticks are skipped rather
//! than bunched up.

use crate::playout::PlayoutEngine;
use crate::stats::PlayoutStats;

use anyhow::{Context, Result};
use rtp_ai_common::FRAME_DURATION_MS;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// A running playout task.
pub struct PlayoutTask {
    // ---
    handle: JoinHandle<(PlayoutEngine, PlayoutStats)>,
    shutdown: watch::Sender<bool>,
}

impl PlayoutTask {
    // ---
    /// Stops ticking and hands the engine back, reset and with an empty
    /// queue, together with the stats it had gathered before the reset.
    ///
    /// # Errors
    ///
    /// Returns error if the task panicked.
    pub async fn stop(self) -> Result<(PlayoutEngine, PlayoutStats)> {
        // ---
        // The task also exits if the receiver sees the sender dropped
        let _ = self.shutdown.send(true);
        self.handle.await.context("playout task failed")
    }

    /// Cancels the task without waiting for it.
    pub fn abort(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Spawns `engine` onto the current tokio runtime, ticking every 20ms.
///
/// Must be called from within a runtime.
pub fn spawn_playout(mut engine: PlayoutEngine) -> PlayoutTask {
    // ---
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(FRAME_DURATION_MS as u64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Playout started ({})", engine.codec());

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    engine.tick();
                }
            }
        }

        let stats = engine.stats().clone();
        engine.reset();
        debug!("Playout stopped");
        (engine, stats)
    });

    PlayoutTask { handle, shutdown }
}
