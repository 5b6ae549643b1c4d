use std::sync::{Arc, Once};

use tokio::signal::unix::{signal, SignalKind};

use crate::watcher::WatcherRegistry;

static INSTALL_ONCE: Once = Once::new();

/// Installs the process-wide SIGINT/SIGTERM handler exactly once (spec
/// §4.G step 4). On either signal, every watcher this process currently
/// owns releases its lock before the process exits with code 0.
///
/// Idempotent: subsequent calls from other `Queue::start()` invocations in
/// the same process are no-ops, matching "once-per-process" in the spec.
pub fn install_once(registry: Arc<WatcherRegistry>) {
    INSTALL_ONCE.call_once(|| {
        tokio::spawn(run(registry));
    });
}

async fn run(registry: Arc<WatcherRegistry>) {
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(%err, "failed to install SIGINT handler");
            return;
        }
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(%err, "failed to install SIGTERM handler");
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }

    tracing::info!("shutdown signal received, releasing owned watcher locks");
    registry.release_all_owned().await;
    std::process::exit(0);
}

/// Test-only seam: lets unit tests exercise the release path without a
/// real process signal or `Once` ever firing.
#[cfg(test)]
pub(crate) async fn release_all_for_test(registry: &WatcherRegistry) {
    registry.release_all_owned().await;
}
