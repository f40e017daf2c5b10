//  MAIN.rs
//
//  Created:
//    06 Mar 2025, 08:55:14
//  Last edited:
//    01 Aug 2025, 11:12:20
//
//  Description:
//!   Entrypoint to the `datamesh` site daemon.
//

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use datamesh::clients::SiteClient;
use datamesh::domain::NullDomainAdministrator;
use datamesh::rest::api::SiteRestApi;
use datamesh::rest::clients::{RestPolicySourceFactory, RestSiteClient, RestUpdateSource};
use datamesh::settings::SiteSettings;
use datamesh::site::{Site, SiteConfig};
use error_trace::ErrorTrace as _;
use humanlog::{DebugMode, HumanLogger};
use ident::Identifier;
use log::{error, info};
use registry::{RegisteredObject, RegistryClient, RegistryValidator};


/***** ARGUMENTS *****/
/// Defines the arguments for the `datamesh` site daemon.
#[derive(Debug, Parser)]
struct Arguments {
    /// Whether to enable full debugging
    #[clap(long, global = true, help = "If given, enables more verbose debugging.")]
    trace: bool,

    /// The settings file to run with.
    #[clap(short, long, env = "DATAMESH_CONFIG", default_value = "./config/site.yml", help = "Path to the site settings file.")]
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
    info!("{} - v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    // Load the settings
    let settings: SiteSettings = match SiteSettings::load(&args.config) {
        Ok(settings) => settings,
        Err(err) => {
            error!("{}", err.trace());
            std::process::exit(1);
        },
    };

    // Wire the site together with REST clients for everything remote
    let registry_source = RestUpdateSource::<RegisteredObject>::new(format!("{}/updates", settings.registry_endpoint.trim_end_matches('/')));
    let registry_client = Arc::new(RegistryClient::new(Box::new(registry_source), Some(Box::new(RegistryValidator::new()))));

    let site_id: Identifier = match Identifier::new(format!("site:{}:{}", settings.namespace, settings.name)) {
        Ok(site_id) => site_id,
        Err(err) => {
            error!("{}", err.trace());
            std::process::exit(1);
        },
    };
    let site_client: Arc<dyn SiteClient> = Arc::new(RestSiteClient::new(site_id, registry_client.clone()));

    let site: Site = match Site::new(
        SiteConfig::from(&settings),
        registry_client,
        site_client,
        Box::new(RestPolicySourceFactory),
        Arc::new(NullDomainAdministrator),
    ) {
        Ok(site) => site,
        Err(err) => {
            error!("{}", err.trace());
            std::process::exit(1);
        },
    };

    // And serve it
    SiteRestApi::new(settings.bind_address, Arc::new(site)).run().await;
}
