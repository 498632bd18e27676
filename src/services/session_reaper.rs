use tokio::time::{MissedTickBehavior, interval};
use tracing::debug;

use crate::state::SharedState;

/// Periodically evict finished or idle group sessions.
pub async fn run(state: SharedState) {
    let ttl = state.config().idle_session_ttl;
    let mut ticker = interval(state.config().eviction_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let evicted = state.evict_idle(ttl);
        if evicted > 0 {
            debug!(evicted, remaining = state.live_sessions(), "session sweep finished");
        }
    }
}
