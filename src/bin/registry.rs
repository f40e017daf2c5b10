//  REGISTRY.rs
//
//  Created:
//    06 Mar 2025, 09:42:51
//  Last edited:
//    22 Jul 2025, 16:40:09
//
//  Description:
//!   Entrypoint to the central registry daemon.
//

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use clap::Parser;
use datamesh::rest::registry_api::RegistryRestApi;
use datamesh::settings::RegistrySettings;
use error_trace::ErrorTrace as _;
use humanlog::{DebugMode, HumanLogger};
use log::{error, info};
use registry::{RegistryStore, SharedRegistryStore};


/***** ARGUMENTS *****/
/// Defines the arguments for the registry daemon.
#[derive(Debug, Parser)]
struct Arguments {
    /// Whether to enable full debugging
    #[clap(long, global = true, help = "If given, enables more verbose debugging.")]
    trace: bool,

    /// The settings file to run with.
    #[clap(short, long, env = "DATAMESH_REGISTRY_CONFIG", default_value = "./config/registry.yml", help = "Path to the registry settings file.")]
    config: PathBuf,
}





/***** ENTRYPOINT *****/
#[tokio::main]
async fn main() {
    // Parse arguments
    let args = Arguments::parse();

    // Setup a logger
    if let Err(err) = HumanLogger::terminal(if args.trace { DebugMode::Full } else { DebugMode::Debug }).init() {
        eprintln!("WARNING: Failed to setup logger: {err} (no logging for this session)");
    }
    info!("{} registry - v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    // Load the settings
    let settings: RegistrySettings = match RegistrySettings::load(&args.config) {
        Ok(settings) => settings,
        Err(err) => {
            error!("{}", err.trace());
            std::process::exit(1);
        },
    };

    // The registry is just a canonical store behind a REST API
    let store: SharedRegistryStore =
        Arc::new(RwLock::new(RegistryStore::new(std::time::Duration::from_millis(settings.max_lag_ms))));
    RegistryRestApi::new(settings.bind_address, store).run().await;
}
