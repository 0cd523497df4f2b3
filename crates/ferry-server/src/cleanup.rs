//! Background task that reaps abandoned upload sessions.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::session::{SessionRegistry, SessionState};
use crate::storage::ChunkStore;

/// Periodic sweep over the session registry.
///
/// Runs on its own timer, independent of request traffic: sessions idle past
/// the timeout are expired and their staged chunks removed; terminal sessions
/// (already complete, failed, or expired) are only dropped from the table
/// once stale. The state is re-checked under the session's own lock, so a
/// session that completed between the scan and the lock acquisition is left
/// alone.
pub async fn run_reaper_loop(
    registry: Arc<SessionRegistry>,
    store: Arc<ChunkStore>,
    interval_secs: u64,
    timeout: Duration,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    // The first tick fires immediately; skip it so a fresh start never sweeps.
    interval.tick().await;

    loop {
        interval.tick().await;
        let reaped = sweep(&registry, &store, timeout).await;
        if reaped > 0 {
            info!("Reaper: retired {} stale sessions", reaped);
        }
    }
}

/// One sweep. Returns how many sessions were removed from the registry.
pub async fn sweep(registry: &SessionRegistry, store: &ChunkStore, timeout: Duration) -> usize {
    let mut reaped = 0;

    for session in registry.snapshot().await {
        {
            let mut p = session.progress().await;
            if p.last_activity.elapsed() < timeout {
                continue;
            }
            match p.state {
                // Mid-merge sessions get a full timeout window from their
                // transition before anything touches them.
                SessionState::Assembling => continue,
                SessionState::Receiving => {
                    p.state = SessionState::Expired;
                    info!(
                        "Reaper: session {} expired after {:?} idle ({} of {} bytes received)",
                        session.id, timeout, p.bytes_received, session.declared_size
                    );
                }
                // Terminal sessions just age out of the table.
                _ => {}
            }
        }

        // Expired and failed sessions may still have staged chunks on disk.
        store.remove_session_dir(&session.id).await;
        registry.remove(&session.id).await;
        reaped += 1;
    }

    reaped
}
