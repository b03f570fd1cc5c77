//! Periodic world growth.
//!
//! A fixed-interval timer drives one bounded tick at a time: select parents,
//! spawn mutated offspring through the exclusion path, broadcast the net
//! delta. A failed tick logs and waits for the next interval; a tick never
//! publishes a partial result.

use crate::AppState;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

pub fn spawn_growth_scheduler(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_millis(state.params.flower_spread_interval_ms.max(1));
        // First tick fires one full period after startup, not immediately.
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut rng = SmallRng::from_entropy();
        loop {
            ticker.tick().await;
            run_growth_tick(&state, &mut rng).await;
        }
    })
}

/// One growth tick: mutate the field under the writer lock, then broadcast
/// the delta after the lock is released.
pub(crate) async fn run_growth_tick(state: &AppState, rng: &mut SmallRng) {
    let delta = {
        let mut field = state.field.lock().await;
        field.spread_flowers(
            rng,
            state.params.flower_spread_fraction,
            state.params.max_flower_updates,
            state.params.flower_exclusion_range,
        )
    };
    if delta.is_empty() {
        return;
    }
    debug!(
        added = delta.added.len(),
        removed = delta.removed.len(),
        "growth tick"
    );
    // No receivers just means no viewers are connected right now.
    let _ = state.updates.send(delta);
}
