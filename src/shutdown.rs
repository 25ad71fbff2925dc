//! Signal handling for cooperative shutdown.
//!
//! The first SIGINT/SIGTERM cancels the returned token: workers stop taking
//! new items and let in-flight adapter calls finish. A second signal exits
//! immediately with status 130.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Install signal handlers and return the token they cancel.
pub fn install_signal_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let count = Arc::new(AtomicU32::new(0));

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let handler_token = token.clone();
    tokio::spawn(async move {
        loop {
            #[cfg(unix)]
            {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }

            #[cfg(not(unix))]
            {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
            }

            if count.fetch_add(1, Ordering::SeqCst) == 0 {
                info!("Shutdown requested, letting in-flight transfers finish (signal again to force)");
                handler_token.cancel();
            } else {
                warn!("Force exit requested");
                std::process::exit(130);
            }
        }
    });

    Ok(token)
}
