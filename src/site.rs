//  SITE.rs
//
//  Created:
//    03 Mar 2025, 13:40:57
//  Last edited:
//    01 Aug 2025, 10:21:30
//
//  Description:
//!   A single site installation: wires the policy store, replicas,
//!   evaluator, asset store, runner and orchestrator together.
//

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use ident::{Identifier, IdentifierError};
use policy::{PermissionCalculator, PolicyEvaluator, Rule, SharedPolicyStore};
use registry::RegistryClient;
use replication::CanonicalStore;

use crate::assets::Asset;
use crate::clients::SiteClient;
use crate::domain::DomainAdministrator;
use crate::orchestration::{WorkflowExecutor, WorkflowOrchestrator, WorkflowPlanner};
use crate::policy_client::{PolicyClient, PolicySourceFactory};
use crate::runner::StepRunner;
use crate::settings::SiteSettings;
use crate::store::{AssetStore, StoreError};


/***** ERRORS *****/
/// Describes failures while composing a site.
#[derive(Debug, thiserror::Error)]
pub enum SiteError {
    #[error("Illegal site name")]
    Identifier {
        #[from]
        source: IdentifierError,
    },
}





/***** AUXILLARY *****/
/// The local configuration of one site.
#[derive(Clone, Debug)]
pub struct SiteConfig {
    /// Name of the site (without namespace).
    pub name: String,
    /// Namespace controlled by this site's policy server.
    pub namespace: String,
    /// The party owning this site.
    pub owner: Identifier,
    /// Local directory for stored asset images.
    pub image_dir: PathBuf,
    /// How long replicas of this site's stores may lag behind.
    pub max_lag: Duration,
}
impl From<&SiteSettings> for SiteConfig {
    fn from(settings: &SiteSettings) -> Self {
        Self {
            name: settings.name.clone(),
            namespace: settings.namespace.clone(),
            owner: settings.owner.clone(),
            image_dir: settings.image_dir.clone(),
            max_lag: Duration::from_millis(settings.max_lag_ms),
        }
    }
}





/***** LIBRARY *****/
/// A single datamesh site installation.
pub struct Site {
    /// The site's id.
    pub id: Identifier,
    /// The party owning this site.
    pub owner: Identifier,
    /// The party administrating this site. Owner and administrator are the
    /// same for now, but they differ semantically (think SaaS), so both are
    /// kept.
    pub administrator: Identifier,
    /// The namespace whose rules this site's policy server is authoritative
    /// for.
    pub namespace: String,

    /// The canonical store of this namespace's policy rules.
    pub policy_store: SharedPolicyStore,
    /// The merged local view of everyone's policies.
    pub policy_client: Arc<PolicyClient>,
    /// This site's asset store.
    pub store: Arc<AssetStore>,
    /// Executes workflow steps assigned to this site.
    pub runner: Arc<StepRunner>,
    /// Plans and runs workflows submitted at this site.
    pub orchestrator: Arc<WorkflowOrchestrator>,
}
impl Site {
    /// Creates a new Site.
    ///
    /// # Arguments
    /// - `config`: The site's local configuration.
    /// - `registry_client`: The client for the central registry.
    /// - `site_client`: The client for talking to peer sites.
    /// - `policy_sources`: Builds update sources for peers' policy stores.
    /// - `domain_administrator`: Executes containerized steps.
    ///
    /// # Errors
    /// This function errors if the configured name and namespace do not
    /// form a legal site identifier.
    pub fn new(
        config: SiteConfig,
        registry_client: Arc<RegistryClient>,
        site_client: Arc<dyn SiteClient>,
        policy_sources: Box<dyn PolicySourceFactory>,
        domain_administrator: Arc<dyn DomainAdministrator>,
    ) -> Result<Self, SiteError> {
        let id: Identifier = Identifier::new(format!("site:{}:{}", config.namespace, config.name))?;

        // Policy support
        let policy_store: SharedPolicyStore = Arc::new(RwLock::new(CanonicalStore::new(config.max_lag)));
        let policy_client: Arc<PolicyClient> = Arc::new(PolicyClient::new(registry_client.clone(), policy_sources));
        let evaluator: Arc<PolicyEvaluator> = Arc::new(PolicyEvaluator::new(Box::new(policy_client.clone())));

        // Server side
        let store: Arc<AssetStore> =
            Arc::new(AssetStore::new(PermissionCalculator::new(evaluator.clone()), domain_administrator.clone(), config.image_dir));
        let runner: Arc<StepRunner> = Arc::new(StepRunner::new(
            id.clone(),
            site_client.clone(),
            policy_client.clone(),
            evaluator.clone(),
            domain_administrator,
            store.clone(),
        ));

        // Client side
        let planner: WorkflowPlanner = WorkflowPlanner::new(registry_client, evaluator);
        let executor: WorkflowExecutor = WorkflowExecutor::new(site_client);
        let orchestrator: Arc<WorkflowOrchestrator> = Arc::new(WorkflowOrchestrator::new(planner, executor, policy_client.clone()));

        Ok(Self {
            id,
            owner: config.owner.clone(),
            administrator: config.owner,
            namespace: config.namespace,
            policy_store,
            policy_client,
            store,
            runner,
            orchestrator,
        })
    }

    /// Publishes a rule through this site's policy server.
    ///
    /// The rule should be about this site's namespace and signed by the
    /// namespace owner; peers will silently drop it otherwise.
    pub fn add_rule(&self, rule: Rule) { self.policy_store.write().unwrap().insert(rule); }

    /// Stores an asset in this site's store.
    ///
    /// # Errors
    /// This function errors if an asset with this id already exists or its
    /// image could not be placed.
    pub fn store_asset(&self, asset: Asset, move_image: bool) -> Result<(), StoreError> { self.store.store(asset, move_image) }

    /// Releases the site's resources.
    pub fn close(&self) { self.store.close(); }
}
