//  CLIENTS.rs
//
//  Created:
//    05 Mar 2025, 13:21:17
//  Last edited:
//    01 Aug 2025, 11:05:48
//
//  Description:
//!   The reqwest-based clients for the site and registry APIs.
//!
//!   Replication fetches retry with exponential backoff for up to ~20
//!   seconds total; everything else fails fast and leaves retrying to the
//!   caller's own loop (the runner's scan loop, the executor's poll loop).
//

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ident::Identifier;
use log::debug;
use policy::Rule;
use registry::{PartyDescription, RegistryClient, SiteDescription};
use replication::{ReplicaUpdate, SourceError, UpdateSource};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use workflow::ExecutionRequest;

use crate::assets::Asset;
use crate::clients::{SiteClient, SiteClientError};
use crate::policy_client::PolicySourceFactory;


/***** CONSTANTS *****/
/// The total retry budget for one replication fetch.
const RETRY_BUDGET: Duration = Duration::from_secs(20);

/// The initial backoff between replication fetch retries; doubles per
/// attempt up to [`RETRY_MAX_BACKOFF`].
const RETRY_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// The backoff ceiling for replication fetch retries.
const RETRY_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// The per-request timeout on all HTTP calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);





/***** ERRORS *****/
/// Describes failures while registering with the central registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("Failed to reach the registry at '{endpoint}'")]
    Unreachable {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("The registry rejected the request (status {status})")]
    Rejected { status: u16 },
}





/***** LIBRARY *****/
/// An [`UpdateSource`] that fetches updates from a remote `/updates`-style
/// endpoint.
pub struct RestUpdateSource<T> {
    /// The full URL of the updates endpoint.
    endpoint: String,
    /// The HTTP client to fetch with.
    client: reqwest::Client,
    _type: PhantomData<fn() -> T>,
}
impl<T> RestUpdateSource<T> {
    /// Creates a new RestUpdateSource fetching from the given URL.
    pub fn new(endpoint: impl Into<String>) -> Self { Self { endpoint: endpoint.into(), client: reqwest::Client::new(), _type: PhantomData } }
}
#[async_trait]
impl<T: DeserializeOwned + Send + Sync> UpdateSource<T> for RestUpdateSource<T> {
    async fn get_updates_since(&self, from_version: u64) -> Result<ReplicaUpdate<T>, SourceError> {
        let mut backoff: Duration = RETRY_INITIAL_BACKOFF;
        let deadline: tokio::time::Instant = tokio::time::Instant::now() + RETRY_BUDGET;
        let response: reqwest::Response = loop {
            let attempt = self
                .client
                .get(&self.endpoint)
                .query(&[("from_version", from_version)])
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await
                .and_then(|response| response.error_for_status());
            match attempt {
                Ok(response) => break response,
                Err(err) if (err.is_connect() || err.is_timeout()) && tokio::time::Instant::now() + backoff < deadline => {
                    debug!("Retrying update fetch from '{}' in {}ms: {err}", self.endpoint, backoff.as_millis());
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(RETRY_MAX_BACKOFF);
                },
                Err(err) => return Err(SourceError::Unreachable { source: Box::new(err) }),
            }
        };
        response.json::<ReplicaUpdate<T>>().await.map_err(|err| SourceError::Malformed { source: Box::new(err) })
    }
}



/// Builds [`RestUpdateSource`]s for peer sites' policy stores.
pub struct RestPolicySourceFactory;
impl PolicySourceFactory for RestPolicySourceFactory {
    fn source_for(&self, site: &SiteDescription) -> Box<dyn UpdateSource<Rule>> {
        Box::new(RestUpdateSource::new(format!("{}/rules/updates", site.endpoint.trim_end_matches('/'))))
    }
}



/// A [`SiteClient`] that reaches peer sites over their REST APIs,
/// resolving endpoints through the registry.
pub struct RestSiteClient {
    /// The site on whose behalf we make requests.
    this_site: Identifier,
    /// Resolves site ids to endpoints.
    registry: Arc<RegistryClient>,
    /// The HTTP client to call with.
    client: reqwest::Client,
}
impl RestSiteClient {
    /// Creates a new RestSiteClient.
    ///
    /// # Arguments
    /// - `this_site`: The site on whose behalf requests are made; sent as
    ///   the requester of asset retrievals.
    /// - `registry`: The registry client to resolve peer endpoints with.
    pub fn new(this_site: Identifier, registry: Arc<RegistryClient>) -> Self {
        Self { this_site, registry, client: reqwest::Client::new() }
    }

    /// Resolves a site id to its registered endpoint.
    async fn endpoint_of(&self, site: &Identifier) -> Result<String, SiteClientError> {
        match self.registry.get_site_by_id(site).await {
            Ok(desc) => Ok(desc.endpoint.trim_end_matches('/').to_string()),
            Err(source) => Err(SiteClientError::UnknownSite { site: site.clone(), source }),
        }
    }
}
#[async_trait]
impl SiteClient for RestSiteClient {
    async fn retrieve_asset(&self, site: &Identifier, asset: &Identifier) -> Result<Asset, SiteClientError> {
        let endpoint: String = self.endpoint_of(site).await?;
        let response: reqwest::Response = self
            .client
            .get(format!("{endpoint}/assets/{asset}"))
            .query(&[("requester", self.this_site.as_str())])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|err| SiteClientError::Unreachable { site: site.clone(), source: Box::new(err) })?;

        match response.status() {
            StatusCode::OK => {
                response.json::<Asset>().await.map_err(|err| SiteClientError::Unreachable { site: site.clone(), source: Box::new(err) })
            },
            StatusCode::NOT_FOUND => Err(SiteClientError::NotFound { site: site.clone(), asset: asset.clone() }),
            status => Err(SiteClientError::Rejected { site: site.clone(), status: status.as_u16() }),
        }
    }

    async fn submit_request(&self, site: &Identifier, request: &ExecutionRequest) -> Result<(), SiteClientError> {
        let endpoint: String = self.endpoint_of(site).await?;
        let response: reqwest::Response = self
            .client
            .post(format!("{endpoint}/jobs"))
            .json(request)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|err| SiteClientError::Unreachable { site: site.clone(), source: Box::new(err) })?;

        if !response.status().is_success() {
            return Err(SiteClientError::Rejected { site: site.clone(), status: response.status().as_u16() });
        }
        Ok(())
    }
}



/// A client for the registry's registration API.
pub struct RegistrationClient {
    /// The registry's endpoint.
    endpoint: String,
    /// The HTTP client to call with.
    client: reqwest::Client,
}
impl RegistrationClient {
    /// Creates a new RegistrationClient for the registry at the given
    /// endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint: String = endpoint.into();
        Self { endpoint: endpoint.trim_end_matches('/').to_string(), client: reqwest::Client::new() }
    }

    /// Registers a party.
    ///
    /// # Errors
    /// This function errors if the registry is unreachable or rejected the
    /// record.
    pub async fn register_party(&self, party: &PartyDescription) -> Result<(), RegistrationError> {
        self.post_json(format!("{}/parties", self.endpoint), party).await
    }

    /// Registers a site. Its owning party must have been registered first.
    ///
    /// # Errors
    /// This function errors if the registry is unreachable or rejected the
    /// record.
    pub async fn register_site(&self, site: &SiteDescription) -> Result<(), RegistrationError> {
        self.post_json(format!("{}/sites", self.endpoint), site).await
    }

    /// Deregisters a party.
    pub async fn deregister_party(&self, party_id: &Identifier) -> Result<(), RegistrationError> {
        self.delete(format!("{}/parties/{party_id}", self.endpoint)).await
    }

    /// Deregisters a site.
    pub async fn deregister_site(&self, site_id: &Identifier) -> Result<(), RegistrationError> {
        self.delete(format!("{}/sites/{site_id}", self.endpoint)).await
    }

    async fn post_json<T: serde::Serialize>(&self, url: String, body: &T) -> Result<(), RegistrationError> {
        let response = self
            .client
            .post(&url)
            .json(body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|source| RegistrationError::Unreachable { endpoint: self.endpoint.clone(), source })?;
        if !response.status().is_success() {
            return Err(RegistrationError::Rejected { status: response.status().as_u16() });
        }
        Ok(())
    }

    async fn delete(&self, url: String) -> Result<(), RegistrationError> {
        let response = self
            .client
            .delete(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|source| RegistrationError::Unreachable { endpoint: self.endpoint.clone(), source })?;
        if !response.status().is_success() {
            return Err(RegistrationError::Rejected { status: response.status().as_u16() });
        }
        Ok(())
    }
}
