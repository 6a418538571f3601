//! Background expiry sweeper.
//!
//! Reads are already lazy about expiry; the sweeper only bounds memory by
//! pruning records nobody will read again. Correctness never depends on it
//! running.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::stores::MemoryStores;

/// Spawns the sweeper; aborts with the returned handle.
pub fn spawn_sweeper(stores: Arc<MemoryStores>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            stores.codes.sweep();
            stores.par.sweep();
            stores.challenges.sweep();
            stores.sessions.sweep();
            stores.refresh_tokens.sweep();
            stores.ciba.sweep();
            stores.devices.sweep();
            debug!("store sweep completed");
        }
    })
}
