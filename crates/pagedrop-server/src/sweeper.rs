//! Background expiry sweep.
//!
//! Reads already hide expired pages. The sweep tombstones them so their
//! content is reclaimed and the live-page gauge stays accurate. It runs on a
//! fixed interval until the shutdown channel flips.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::state::AppState;

/// Maximum retries per tick when the storage backend is unreachable.
const SWEEP_MAX_RETRIES: u32 = 3;

/// Consecutive failed ticks before the log level escalates to `error`.
const ESCALATE_AFTER: u32 = 5;

/// Periodically tombstone expired pages until shutdown is signalled.
///
/// A failing tick is retried with exponential backoff (1s, 2s, 4s). A
/// consecutive-failure counter escalates the log level so a persistent
/// storage outage is visible without flooding on transient blips.
pub async fn expiry_sweeper(
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
    interval_secs: u64,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    let mut consecutive_failures: u32 = 0;
    info!(interval_secs, "expiry sweeper started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match sweep_with_retry(&state, &mut shutdown).await {
                    Ok(None) => {
                        info!("expiry sweeper shutting down");
                        return;
                    }
                    Ok(Some(retired)) => {
                        consecutive_failures = 0;
                        debug!(retired, "expiry sweep tick complete");
                    }
                    Err(last_err) => {
                        consecutive_failures = consecutive_failures.saturating_add(1);
                        if consecutive_failures >= ESCALATE_AFTER {
                            error!(
                                error = %last_err,
                                consecutive_failures,
                                "expiry sweep persistently failing, storage may be down"
                            );
                        } else {
                            warn!(
                                error = %last_err,
                                consecutive_failures,
                                retries = SWEEP_MAX_RETRIES,
                                "expiry sweep failed after retries, will retry next tick"
                            );
                        }
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("expiry sweeper shutting down");
                return;
            }
        }
    }
}

/// Run one sweep with backoff. Returns:
/// - `Ok(Some(n))` with the number of pages retired
/// - `Ok(None)` if shutdown was signalled during a backoff
/// - `Err(last_error)` if all retries failed
async fn sweep_with_retry(
    state: &AppState,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Option<usize>, String> {
    let mut last_err = String::new();

    for attempt in 0..=SWEEP_MAX_RETRIES {
        match state.pages.sweep_expired().await {
            Ok(retired) => return Ok(Some(retired)),
            Err(e) => {
                last_err = e.to_string();
                if attempt == SWEEP_MAX_RETRIES {
                    break;
                }

                let backoff = Duration::from_secs(1u64 << attempt);
                debug!(
                    attempt = attempt.saturating_add(1),
                    backoff_secs = backoff.as_secs(),
                    error = %e,
                    "expiry sweep failed, retrying"
                );

                tokio::select! {
                    () = tokio::time::sleep(backoff) => {}
                    _ = shutdown.changed() => return Ok(None),
                }
            }
        }
    }

    Err(last_err)
}
