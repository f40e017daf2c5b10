//  REGISTRY_API.rs
//
//  Created:
//    05 Mar 2025, 10:02:29
//  Last edited:
//    01 Aug 2025, 10:52:40
//
//  Description:
//!   The REST API of the central registry.
//!
//!   Registration is the one place where trust enters the mesh: a party
//!   record must be correctly self-signed, and a site record must be signed
//!   by an already-registered owner. Everything downstream (replicas at the
//!   sites) re-validates independently.
//

use std::net::SocketAddr;

use ident::{Identifier, Signable as _};
use log::{info, warn};
use registry::{PartyDescription, RegisteredObject, SharedRegistryStore, SiteDescription};
use serde::Deserialize;
use warp::http::StatusCode;
use warp::reject::Rejection;
use warp::reply::Reply;
use warp::Filter;


/***** AUXILLARY *****/
/// The query parameters of a replication update request.
#[derive(Debug, Deserialize)]
struct UpdatesQuery {
    /// The version the requester is at.
    from_version: u64,
}

/// Builds an empty reply with the given status code.
fn status_reply(status: StatusCode) -> warp::reply::Response { warp::reply::with_status(warp::reply(), status).into_response() }





/***** LIBRARY *****/
/// The warp server for the central registry.
pub struct RegistryRestApi {
    /// The address to bind on.
    addr:  SocketAddr,
    /// The canonical registry store.
    store: SharedRegistryStore,
}
impl RegistryRestApi {
    /// Creates a new RegistryRestApi.
    #[inline]
    pub fn new(addr: impl Into<SocketAddr>, store: SharedRegistryStore) -> Self { Self { addr: addr.into(), store } }

    /// Runs the server until SIGTERM/SIGINT.
    pub async fn run(self) {
        let store = self.store;
        let with_store = {
            let store = store.clone();
            warp::any().map(move || store.clone())
        };

        // GET /updates?from_version=N
        let updates = warp::get()
            .and(warp::path!("updates"))
            .and(warp::query::<UpdatesQuery>())
            .and(with_store.clone())
            .and_then(Self::handle_updates);

        // POST /parties
        let register_party = warp::post()
            .and(warp::path!("parties"))
            .and(warp::body::json::<PartyDescription>())
            .and(with_store.clone())
            .and_then(Self::handle_register_party);

        // DELETE /parties/:id
        let deregister_party = warp::delete()
            .and(warp::path!("parties" / Identifier))
            .and(with_store.clone())
            .and_then(Self::handle_deregister_party);

        // POST /sites
        let register_site = warp::post()
            .and(warp::path!("sites"))
            .and(warp::body::json::<SiteDescription>())
            .and(with_store.clone())
            .and_then(Self::handle_register_site);

        // DELETE /sites/:id
        let deregister_site = warp::delete()
            .and(warp::path!("sites" / Identifier))
            .and(with_store.clone())
            .and_then(Self::handle_deregister_site);

        let routes = updates.or(register_party).or(deregister_party).or(register_site).or(deregister_site);

        info!("Registry API listening on {}", self.addr);
        let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(self.addr, super::graceful_signal());
        server.await;
    }

    async fn handle_updates(query: UpdatesQuery, store: SharedRegistryStore) -> Result<warp::reply::Response, Rejection> {
        let update = store.read().unwrap().get_updates_since(query.from_version);
        Ok(warp::reply::json(&update).into_response())
    }

    async fn handle_register_party(party: PartyDescription, store: SharedRegistryStore) -> Result<warp::reply::Response, Rejection> {
        // Parties vouch for themselves; the record just has to be coherent
        let key = match party.main_key() {
            Ok(key) => key,
            Err(err) => {
                warn!("Rejecting party {}: {err}", party.id);
                return Ok(status_reply(StatusCode::BAD_REQUEST));
            },
        };
        if !party.has_valid_signature(&key) {
            warn!("Rejecting party {}: record is not correctly self-signed", party.id);
            return Ok(status_reply(StatusCode::FORBIDDEN));
        }

        info!("Registering party {}", party.id);
        store.write().unwrap().insert(RegisteredObject::Party(party));
        Ok(status_reply(StatusCode::CREATED))
    }

    async fn handle_deregister_party(party_id: Identifier, store: SharedRegistryStore) -> Result<warp::reply::Response, Rejection> {
        let mut store = store.write().unwrap();
        let record: Option<RegisteredObject> = store
            .objects()
            .find(|object| matches!(object, RegisteredObject::Party(party) if party.id == party_id))
            .cloned();
        match record {
            Some(record) => {
                info!("Deregistering party {party_id}");
                // The record was just found under the same lock
                let _ = store.delete(&record);
                Ok(status_reply(StatusCode::NO_CONTENT))
            },
            None => Ok(status_reply(StatusCode::NOT_FOUND)),
        }
    }

    async fn handle_register_site(site: SiteDescription, store: SharedRegistryStore) -> Result<warp::reply::Response, Rejection> {
        if let Err(err) = site.validate() {
            warn!("Rejecting site {}: {err}", site.id);
            return Ok(status_reply(StatusCode::BAD_REQUEST));
        }

        // Sites must be vouched for by an already-registered owner; this is
        // what makes "parties before their sites" hold in every update
        let mut store = store.write().unwrap();
        let owner_key = store.objects().find_map(|object| match object {
            RegisteredObject::Party(party) if party.id == site.owner_id => party.main_key().ok(),
            _ => None,
        });
        let key = match owner_key {
            Some(key) => key,
            None => {
                warn!("Rejecting site {}: owner {} is not registered", site.id, site.owner_id);
                return Ok(status_reply(StatusCode::FORBIDDEN));
            },
        };
        if !site.has_valid_signature(&key) {
            warn!("Rejecting site {}: record is not signed by its owner {}", site.id, site.owner_id);
            return Ok(status_reply(StatusCode::FORBIDDEN));
        }

        info!("Registering site {}", site.id);
        store.insert(RegisteredObject::Site(site));
        Ok(status_reply(StatusCode::CREATED))
    }

    async fn handle_deregister_site(site_id: Identifier, store: SharedRegistryStore) -> Result<warp::reply::Response, Rejection> {
        let mut store = store.write().unwrap();
        let record: Option<RegisteredObject> = store
            .objects()
            .find(|object| matches!(object, RegisteredObject::Site(site) if site.id == site_id))
            .cloned();
        match record {
            Some(record) => {
                info!("Deregistering site {site_id}");
                let _ = store.delete(&record);
                Ok(status_reply(StatusCode::NO_CONTENT))
            },
            None => Ok(status_reply(StatusCode::NOT_FOUND)),
        }
    }
}
