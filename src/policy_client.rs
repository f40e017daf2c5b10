//  POLICY_CLIENT.rs
//
//  Created:
//    26 Feb 2025, 10:24:49
//  Last edited:
//    31 Jul 2025, 20:01:33
//
//  Description:
//!   Makes the mesh's policies available locally.
//!
//!   Every policy-serving site in the registry gets one validated rule
//!   replica here, keyed by its namespace; the merged view is what the
//!   policy evaluator consumes. Replicas are reconciled against the
//!   registry on every update rather than via registry callbacks, so no
//!   lock is ever taken re-entrantly.
//

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ed25519_dalek::VerifyingKey;
use log::{debug, warn};
use policy::{PolicyCollection, Rule, RuleValidator};
use registry::{RegistryClient, SiteDescription};
use replication::{Replica, SourceError, UpdateSource};
use tokio::sync::Mutex;


/***** AUXILLARY *****/
/// Builds an update source for the policy store of a given site.
///
/// Production builds REST clients against `<endpoint>/rules/updates`; tests
/// hand out direct store handles.
pub trait PolicySourceFactory: Send + Sync {
    /// Returns an update source for the given site's policy store.
    fn source_for(&self, site: &SiteDescription) -> Box<dyn UpdateSource<Rule>>;
}





/***** LIBRARY *****/
/// Ties together the policy replicas of all policy-serving sites.
pub struct PolicyClient {
    /// Used to discover policy-serving sites and their owners' keys.
    registry: Arc<RegistryClient>,
    /// Builds update sources for newly discovered sites.
    factory: Box<dyn PolicySourceFactory>,
    /// One rule replica per namespace.
    replicas: Mutex<HashMap<String, Replica<Rule>>>,
    /// Merged snapshot of all replicas, for synchronous readers.
    rules: RwLock<Vec<Rule>>,
}
impl PolicyClient {
    /// Creates a new PolicyClient without any replicas yet.
    ///
    /// # Arguments
    /// - `registry`: The registry client to discover policy servers
    ///   through.
    /// - `factory`: Builds an update source per discovered site.
    pub fn new(registry: Arc<RegistryClient>, factory: Box<dyn PolicySourceFactory>) -> Self {
        Self { registry, factory, replicas: Mutex::new(HashMap::new()), rules: RwLock::new(Vec::new()) }
    }

    /// Brings the local policy view up-to-date.
    ///
    /// Refreshes the registry replica, reconciles the set of rule replicas
    /// with the currently registered policy-serving sites, updates each
    /// replica, and refreshes the merged snapshot served by
    /// [`PolicyClient::policies()`].
    ///
    /// A replica that cannot be refreshed keeps serving its previous
    /// contents; eventual consistency is the contract here.
    ///
    /// # Errors
    /// This function errors only if the registry itself cannot be reached.
    pub async fn update(&self) -> Result<(), SourceError> {
        self.registry.update().await?;
        let sites: Vec<SiteDescription> = self.registry.list_sites_with_policies().await;

        let mut replicas = self.replicas.lock().await;

        // Add replicas for newly registered policy servers
        let mut namespaces: Vec<String> = Vec::with_capacity(sites.len());
        for site in sites {
            let namespace: String = match self.registry.get_party_by_id(&site.owner_id).await {
                Ok(party) => party.namespace,
                Err(err) => {
                    warn!("Skipping policy server {}: {err}", site.id);
                    continue;
                },
            };
            if !replicas.contains_key(&namespace) {
                let key: VerifyingKey = match self.registry.get_public_key_for_ns(&namespace).await {
                    Ok(key) => key,
                    Err(err) => {
                        warn!("Skipping policy server {}: {err}", site.id);
                        continue;
                    },
                };
                debug!("Tracking policies of namespace '{namespace}' via {}", site.id);
                let validator = RuleValidator::new(namespace.clone(), key);
                replicas.insert(namespace.clone(), Replica::new(self.factory.source_for(&site), Some(Box::new(validator)), None));
            }
            namespaces.push(namespace);
        }

        // Drop replicas whose site has deregistered
        replicas.retain(|namespace, _| {
            if namespaces.contains(namespace) {
                true
            } else {
                debug!("Dropping policies of deregistered namespace '{namespace}'");
                false
            }
        });

        // Refresh each replica; failures keep the previous contents
        for (namespace, replica) in replicas.iter_mut() {
            if let Err(err) = replica.update().await {
                warn!("Failed to update policy replica for namespace '{namespace}': {err}");
            }
        }

        // Publish the merged snapshot
        let merged: Vec<Rule> = replicas.values().flat_map(|replica| replica.objects().iter().cloned()).collect();
        *self.rules.write().unwrap() = merged;
        Ok(())
    }
}
impl PolicyCollection for PolicyClient {
    fn policies(&self) -> Vec<Rule> { self.rules.read().unwrap().clone() }
}
