//  CLIENT.rs
//
//  Created:
//    19 Feb 2025, 09:15:30
//  Last edited:
//    31 Jul 2025, 18:44:58
//
//  Description:
//!   Defines the local client for the central registry.
//!
//!   This provides read-only access to the registry through a validated
//!   local replica that is refreshed on demand.
//

use ed25519_dalek::VerifyingKey;
use ident::Identifier;
use replication::{ObjectValidator, Replica, SourceError, UpdateSource};
use tokio::sync::Mutex;

use crate::descriptions::{PartyDescription, RegisteredObject, RegistryError, SiteDescription};


/***** LIBRARY *****/
/// Local client for the central registry, backed by a replica.
pub struct RegistryClient {
    /// The replica of the registry's canonical store.
    replica: Mutex<Replica<RegisteredObject>>,
}
impl RegistryClient {
    /// Creates a new RegistryClient.
    ///
    /// # Arguments
    /// - `source`: Where registry updates come from (a REST client in
    ///   production, the registry's own store in tests).
    /// - `validator`: Validates incoming records; pass
    ///   [`crate::RegistryValidator`] unless the source is trusted.
    pub fn new(source: Box<dyn UpdateSource<RegisteredObject>>, validator: Option<Box<dyn ObjectValidator<RegisteredObject>>>) -> Self {
        Self { replica: Mutex::new(Replica::new(source, validator, None)) }
    }

    /// Ensures the local registry information is up-to-date.
    ///
    /// # Errors
    /// This function errors if the registry could not be reached. The
    /// replica keeps its previous contents in that case.
    pub async fn update(&self) -> Result<(), SourceError> { self.replica.lock().await.update().await }

    /// Returns the public key of the party owning the given namespace.
    ///
    /// # Errors
    /// This function errors if no such party is known or its key is
    /// unusable.
    pub async fn get_public_key_for_ns(&self, namespace: &str) -> Result<VerifyingKey, RegistryError> {
        let replica = self.replica.lock().await;
        for object in replica.objects() {
            if let RegisteredObject::Party(party) = object {
                if party.namespace == namespace {
                    return party.main_key();
                }
            }
        }
        Err(RegistryError::UnknownNamespace { namespace: namespace.into() })
    }

    /// Returns the ids of all sites that can run workflow steps.
    ///
    /// Refreshes the replica first, so the planner works on reasonably
    /// current data.
    ///
    /// # Errors
    /// This function errors if the registry could not be reached.
    pub async fn list_sites_with_runners(&self) -> Result<Vec<Identifier>, SourceError> {
        let mut replica = self.replica.lock().await;
        replica.update().await?;
        let mut sites: Vec<Identifier> = replica
            .objects()
            .iter()
            .filter_map(|object| match object {
                RegisteredObject::Site(site) if site.has_runner => Some(site.id.clone()),
                _ => None,
            })
            .collect();
        // Deterministic order; the planner's enumeration order depends on it
        sites.sort();
        Ok(sites)
    }

    /// Returns the descriptions of all sites that serve policy rules.
    pub async fn list_sites_with_policies(&self) -> Vec<SiteDescription> {
        let replica = self.replica.lock().await;
        replica
            .objects()
            .iter()
            .filter_map(|object| match object {
                RegisteredObject::Site(site) if site.has_policies => Some(site.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns a site's description by id.
    ///
    /// # Errors
    /// This function errors if no site with that id is known.
    pub async fn get_site_by_id(&self, site_id: &Identifier) -> Result<SiteDescription, RegistryError> {
        let replica = self.replica.lock().await;
        for object in replica.objects() {
            if let RegisteredObject::Site(site) = object {
                if site.id == *site_id {
                    return Ok(site.clone());
                }
            }
        }
        Err(RegistryError::UnknownSite { id: site_id.clone() })
    }

    /// Returns a party's description by id.
    ///
    /// # Errors
    /// This function errors if no party with that id is known.
    pub async fn get_party_by_id(&self, party_id: &Identifier) -> Result<PartyDescription, RegistryError> {
        let replica = self.replica.lock().await;
        for object in replica.objects() {
            if let RegisteredObject::Party(party) = object {
                if party.id == *party_id {
                    return Ok(party.clone());
                }
            }
        }
        Err(RegistryError::UnknownParty { id: party_id.clone() })
    }
}





/***** TESTS *****/
