//  API.rs
//
//  Created:
//    04 Mar 2025, 09:31:26
//  Last edited:
//    01 Aug 2025, 10:40:12
//
//  Description:
//!   The REST API of a site.
//!
//!   The external surface serves peer sites: policy rule replication, asset
//!   retrieval and execution requests. The internal surface serves the
//!   site's own party: publishing rules, storing assets and submitting
//!   jobs. Authenticating callers is the transport layer's business and is
//!   not handled here.
//

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use ident::Identifier;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::reject::Rejection;
use warp::reply::Reply;
use warp::Filter;
use workflow::{ExecutionRequest, Job};

use crate::assets::Asset;
use crate::orchestration::OrchestratorError;
use crate::site::Site;
use crate::store::StoreError;


/***** AUXILLARY *****/
/// The query parameters of a replication update request.
#[derive(Debug, Deserialize)]
struct UpdatesQuery {
    /// The version the requester is at.
    from_version: u64,
}

/// The query parameters of an asset retrieval request.
#[derive(Debug, Deserialize)]
struct AssetQuery {
    /// The site on whose behalf the asset is requested.
    requester: Identifier,
}

/// The response to a job submission.
#[derive(Debug, Deserialize, Serialize)]
struct JobSubmitted {
    /// The id under which the job is tracked.
    job_id: String,
}

/// The response to a job status poll.
#[derive(Debug, Deserialize, Serialize)]
struct JobStatus {
    /// Whether every workflow output is retrievable.
    done: bool,
}

/// A machine-readable error body.
#[derive(Debug, Deserialize, Serialize)]
struct ErrorBody {
    /// What went wrong.
    error: String,
}

/// Builds an error reply with the given status code.
fn error_reply(status: StatusCode, error: impl Into<String>) -> warp::reply::Response {
    warp::reply::with_status(warp::reply::json(&ErrorBody { error: error.into() }), status).into_response()
}





/***** LIBRARY *****/
/// The warp server for one site's API.
pub struct SiteRestApi {
    /// The address to bind on.
    addr: SocketAddr,
    /// The site being served.
    site: Arc<Site>,
}
impl SiteRestApi {
    /// Creates a new SiteRestApi.
    #[inline]
    pub fn new(addr: impl Into<SocketAddr>, site: Arc<Site>) -> Self { Self { addr: addr.into(), site } }

    /// Runs the server until SIGTERM/SIGINT.
    pub async fn run(self) {
        let site = self.site;
        let with_site = {
            let site = site.clone();
            warp::any().map(move || site.clone())
        };

        // GET /rules/updates?from_version=N
        let rule_updates = warp::get()
            .and(warp::path!("rules" / "updates"))
            .and(warp::query::<UpdatesQuery>())
            .and(with_site.clone())
            .and_then(Self::handle_rule_updates);

        // GET /assets/:id?requester=site:...
        let retrieve_asset = warp::get()
            .and(warp::path!("assets" / Identifier))
            .and(warp::query::<AssetQuery>())
            .and(with_site.clone())
            .and_then(Self::handle_retrieve_asset);

        // GET /assets/:id/image?requester=site:...
        let retrieve_image = warp::get()
            .and(warp::path!("assets" / Identifier / "image"))
            .and(warp::query::<AssetQuery>())
            .and(with_site.clone())
            .and_then(Self::handle_retrieve_image);

        // POST /jobs
        let submit_request = warp::post()
            .and(warp::path!("jobs"))
            .and(warp::body::json::<ExecutionRequest>())
            .and(with_site.clone())
            .and_then(Self::handle_execution_request);

        // POST /internal/rules
        let add_rule = warp::post()
            .and(warp::path!("internal" / "rules"))
            .and(warp::body::json::<policy::Rule>())
            .and(with_site.clone())
            .and_then(Self::handle_add_rule);

        // POST /internal/assets
        let add_asset = warp::post()
            .and(warp::path!("internal" / "assets"))
            .and(warp::body::json::<Asset>())
            .and(with_site.clone())
            .and_then(Self::handle_add_asset);

        // POST /internal/jobs
        let submit_job = warp::post()
            .and(warp::path!("internal" / "jobs"))
            .and(warp::body::json::<Job>())
            .and(with_site.clone())
            .and_then(Self::handle_submit_job);

        // GET /internal/jobs/:id/status
        let job_status = warp::get()
            .and(warp::path!("internal" / "jobs" / String / "status"))
            .and(with_site.clone())
            .and_then(Self::handle_job_status);

        // GET /internal/jobs/:id/results
        let job_results = warp::get()
            .and(warp::path!("internal" / "jobs" / String / "results"))
            .and(with_site.clone())
            .and_then(Self::handle_job_results);

        let routes = rule_updates
            .or(retrieve_asset)
            .or(retrieve_image)
            .or(submit_request)
            .or(add_rule)
            .or(add_asset)
            .or(submit_job)
            .or(job_status)
            .or(job_results);

        info!("Site {} API listening on {}", site.id, self.addr);
        let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(self.addr, super::graceful_signal());
        server.await;
    }

    async fn handle_rule_updates(query: UpdatesQuery, site: Arc<Site>) -> Result<warp::reply::Response, Rejection> {
        let update = site.policy_store.read().unwrap().get_updates_since(query.from_version);
        Ok(warp::reply::json(&update).into_response())
    }

    async fn handle_retrieve_asset(asset_id: Identifier, query: AssetQuery, site: Arc<Site>) -> Result<warp::reply::Response, Rejection> {
        // Retrieval decisions want a current policy view
        if let Err(err) = site.policy_client.update().await {
            debug!("Deciding retrieval with stale policies: {err}");
        }
        match site.store.retrieve(&asset_id, &query.requester) {
            Ok(asset) => Ok(warp::reply::json(&asset).into_response()),
            Err(err @ StoreError::NotFound { .. }) => Ok(error_reply(StatusCode::NOT_FOUND, err.to_string())),
            Err(err) => Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())),
        }
    }

    async fn handle_retrieve_image(asset_id: Identifier, query: AssetQuery, site: Arc<Site>) -> Result<warp::reply::Response, Rejection> {
        if let Err(err) = site.policy_client.update().await {
            debug!("Deciding retrieval with stale policies: {err}");
        }
        let asset: Asset = match site.store.retrieve(&asset_id, &query.requester) {
            Ok(asset) => asset,
            Err(err @ StoreError::NotFound { .. }) => return Ok(error_reply(StatusCode::NOT_FOUND, err.to_string())),
            Err(err) => return Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())),
        };
        let path = match asset.image_location {
            Some(path) => path,
            None => return Ok(error_reply(StatusCode::NOT_FOUND, format!("Asset '{asset_id}' has no image"))),
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(warp::reply::Response::new(bytes.into())),
            Err(err) => Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to read image: {err}"))),
        }
    }

    async fn handle_execution_request(request: ExecutionRequest, site: Arc<Site>) -> Result<warp::reply::Response, Rejection> {
        // Only structural validation here; the spawned run re-verifies
        // legality itself
        if let Err(err) = request.job.validate() {
            return Ok(error_reply(StatusCode::BAD_REQUEST, err.to_string()));
        }
        site.runner.execute_request(request);
        Ok(warp::reply::with_status(warp::reply(), StatusCode::CREATED).into_response())
    }

    async fn handle_add_rule(rule: policy::Rule, site: Arc<Site>) -> Result<warp::reply::Response, Rejection> {
        site.add_rule(rule);
        Ok(warp::reply::with_status(warp::reply(), StatusCode::CREATED).into_response())
    }

    async fn handle_add_asset(asset: Asset, site: Arc<Site>) -> Result<warp::reply::Response, Rejection> {
        match site.store_asset(asset, false) {
            Ok(_) => Ok(warp::reply::with_status(warp::reply(), StatusCode::CREATED).into_response()),
            Err(err @ StoreError::AlreadyExists { .. }) => Ok(error_reply(StatusCode::CONFLICT, err.to_string())),
            Err(err) => Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())),
        }
    }

    async fn handle_submit_job(job: Job, site: Arc<Site>) -> Result<warp::reply::Response, Rejection> {
        if let Err(err) = job.validate() {
            return Ok(error_reply(StatusCode::BAD_REQUEST, err.to_string()));
        }
        match site.orchestrator.start_job(&site.owner, &site.id, job).await {
            Ok(job_id) => {
                Ok(warp::reply::with_status(warp::reply::json(&JobSubmitted { job_id }), StatusCode::CREATED).into_response())
            },
            Err(err @ OrchestratorError::NoLegalPlan) => Ok(error_reply(StatusCode::FORBIDDEN, err.to_string())),
            Err(err) => Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())),
        }
    }

    async fn handle_job_status(job_id: String, site: Arc<Site>) -> Result<warp::reply::Response, Rejection> {
        match site.orchestrator.is_done(&job_id).await {
            Ok(done) => Ok(warp::reply::json(&JobStatus { done }).into_response()),
            Err(err @ OrchestratorError::UnknownJob { .. }) => Ok(error_reply(StatusCode::NOT_FOUND, err.to_string())),
            Err(err) => Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())),
        }
    }

    async fn handle_job_results(job_id: String, site: Arc<Site>) -> Result<warp::reply::Response, Rejection> {
        // Don't block the request on a polling loop; callers poll the
        // status endpoint first
        match site.orchestrator.is_done(&job_id).await {
            Ok(true) => {},
            Ok(false) => return Ok(error_reply(StatusCode::NOT_FOUND, format!("Job '{job_id}' is not done yet"))),
            Err(err @ OrchestratorError::UnknownJob { .. }) => return Ok(error_reply(StatusCode::NOT_FOUND, err.to_string())),
            Err(err) => return Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())),
        }
        match site.orchestrator.get_results(&job_id).await {
            Ok(results) => {
                let results: HashMap<String, Asset> = results;
                Ok(warp::reply::json(&results).into_response())
            },
            Err(err) => Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())),
        }
    }
}
