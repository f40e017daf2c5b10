//  CLIENTS.rs
//
//  Created:
//    26 Feb 2025, 08:58:33
//  Last edited:
//    30 Jul 2025, 16:02:10
//
//  Description:
//!   Defines the interface through which one site talks to another.
//!
//!   The runner and orchestrator only ever see this trait; production wires
//!   in the REST client from [`crate::rest`], tests wire sites together
//!   directly.
//

use async_trait::async_trait;
use ident::Identifier;
use workflow::ExecutionRequest;

use crate::assets::Asset;


/***** ERRORS *****/
/// Describes failures of site-to-site calls.
#[derive(Debug, thiserror::Error)]
pub enum SiteClientError {
    /// The asset is not (or not yet, or not for us) available at the peer.
    #[error("Asset '{asset}' not available at site '{site}'")]
    NotFound { site: Identifier, asset: Identifier },
    #[error("Site '{site}' is not known to the registry")]
    UnknownSite {
        site: Identifier,
        #[source]
        source: registry::RegistryError,
    },
    #[error("Failed to reach site '{site}'")]
    Unreachable {
        site: Identifier,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Site '{site}' rejected the request (status {status})")]
    Rejected { site: Identifier, status: u16 },
}





/***** LIBRARY *****/
/// A client for calling other sites' external APIs.
#[async_trait]
pub trait SiteClient: Send + Sync {
    /// Retrieves an asset from a peer site.
    ///
    /// # Errors
    /// This function errors with [`SiteClientError::NotFound`] if the peer
    /// reports the asset as unavailable, which during workflow execution
    /// usually means "not produced yet, try again later".
    async fn retrieve_asset(&self, site: &Identifier, asset: &Identifier) -> Result<Asset, SiteClientError>;

    /// Submits an execution request to a peer site named in its plan.
    ///
    /// The peer re-verifies legality on its own; acceptance here only means
    /// the request was structurally valid and the peer has a runner.
    async fn submit_request(&self, site: &Identifier, request: &ExecutionRequest) -> Result<(), SiteClientError>;
}
