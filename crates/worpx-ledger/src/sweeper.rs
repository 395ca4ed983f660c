//! Background sweeper.
//!
//! Runs [`Ledger::sweep`] on a fixed tokio interval until the returned
//! handle is stopped or dropped. Each sweep pass is idempotent, so a tick
//! that overlaps live traffic is harmless.

use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinHandle};

use crate::Ledger;

/// Handle to a running sweeper. Dropping it stops the loop at the next tick.
pub struct SweeperHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the loop to stop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.cancel.send(true);
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "sweeper task ended abnormally");
        }
    }
}

/// Spawn the sweeper on the current tokio runtime, ticking every
/// `sweep_interval_ms` from the ledger's configuration.
#[must_use]
pub fn spawn_sweeper(ledger: Arc<Ledger>) -> SweeperHandle {
    let (cancel, cancel_rx) = watch::channel(false);
    let task = tokio::spawn(run_sweeper(ledger, cancel_rx));
    SweeperHandle { cancel, task }
}

async fn run_sweeper(ledger: Arc<Ledger>, mut cancel_rx: watch::Receiver<bool>) {
    let period = ledger.config().sweep_interval().max(Duration::from_millis(1));
    tracing::info!(interval_ms = ledger.config().sweep_interval_ms, "starting ledger sweeper");

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = ledger.sweep() {
                    tracing::warn!(error = %err, "sweep failed");
                }
            }
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    tracing::info!("ledger sweeper shutting down");
                    break;
                }
            }
        }
    }
}
