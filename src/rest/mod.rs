//  MOD.rs
//
//  Created:
//    04 Mar 2025, 09:10:44
//  Last edited:
//    22 Jul 2025, 16:05:31
//
//  Description:
//!   The REST surface of the mesh: the warp-based site and registry APIs,
//!   and the reqwest-based clients for them.
//

// Declare the submodules
pub mod api;
pub mod clients;
pub mod registry_api;

use std::time::Duration;

use log::{error, info, warn};
use tokio::signal::unix::{signal, Signal, SignalKind};


/***** LIBRARY FUNCTIONS *****/
/// Returns a future that only resolves once SIGTERM or SIGINT has been sent
/// to this process.
///
/// This is what shuts the warp servers down gracefully, which mostly
/// improves Docker-compatibility (`docker stop` sends SIGTERM).
///
/// Only works on Unix.
pub(crate) async fn graceful_signal() {
    // Register a SIGTERM handler to be Docker-friendly
    let term_handler: Option<Signal> = match signal(SignalKind::terminate()) {
        Ok(handler) => Some(handler),
        Err(err) => {
            error!("Failed to register SIGTERM signal handler: {err}");
            warn!("Service will NOT shutdown gracefully on SIGTERM");
            None
        },
    };

    // Also register a SIGINT handler to be manual-friendly
    let int_handler: Option<Signal> = match signal(SignalKind::interrupt()) {
        Ok(handler) => Some(handler),
        Err(err) => {
            error!("Failed to register SIGINT signal handler: {err}");
            warn!("Service will NOT shutdown gracefully on SIGINT");
            None
        },
    };

    // Wait until we receive such a signal after which we terminate the server
    match (term_handler, int_handler) {
        (Some(mut term), Some(mut int)) => tokio::select! {
            _ = term.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
            },

            _ = int.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
            },
        },

        (Some(mut term), None) => {
            term.recv().await;
            info!("Received SIGTERM, shutting down gracefully...");
        },
        (None, Some(mut int)) => {
            int.recv().await;
            info!("Received SIGINT, shutting down gracefully...");
        },

        // Just wait forever to not stop the warp server
        (None, None) => loop {
            tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        },
    }
}
