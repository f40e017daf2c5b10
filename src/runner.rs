//  RUNNER.rs
//
//  Created:
//    27 Feb 2025, 09:05:12
//  Last edited:
//    01 Aug 2025, 09:48:56
//
//  Description:
//!   Components for on-site workflow execution.
//!
//!   A [`JobRun`] is the execution of (our part of) one workflow at this
//!   site. It re-verifies the plan's legality locally before touching
//!   anything; the orchestrator that sent the request is not trusted. Steps
//!   are then executed in dependency order, with inputs fetched from peer
//!   sites by content-derived identifier and outputs committed to the local
//!   store.
//

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use error_trace::ErrorTrace as _;
use ident::{Identifier, IdentifierError};
use log::{debug, error, info};
use policy::{PermissionCalculator, PermissionError, PolicyEvaluator};
use serde_json::Value;
use workflow::{ExecutionRequest, Job, Plan, Workflow, WorkflowError, WorkflowStep};

use crate::assets::{Asset, AssetKind, ComputeError};
use crate::clients::{SiteClient, SiteClientError};
use crate::domain::{DomainAdministrator, DomainError, StepResult};
use crate::policy_client::PolicyClient;
use crate::store::{AssetStore, StoreError};


/***** CONSTANTS *****/
/// How long a [`JobRun`] sleeps between scans when no step is executable.
///
/// This makes the run a cooperative busy-poll with backoff. It is not
/// starvation-free against an adversarial peer; the job-global deadline is
/// the backstop for that.
pub const SCAN_INTERVAL: Duration = Duration::from_millis(500);

/// The job-global deadline: a [`JobRun`] that has not finished after this
/// long is abandoned, whatever it is waiting on.
pub const JOB_DEADLINE: Duration = Duration::from_secs(3600);





/***** ERRORS *****/
/// Describes fatal failures of a [`JobRun`].
#[derive(Debug, thiserror::Error)]
pub enum JobRunError {
    #[error("Security violation: this site was asked to perform an illegal job")]
    IllegalRequest,
    #[error("Failed to evaluate the job's permissions")]
    Permissions {
        #[from]
        source: PermissionError,
    },
    #[error("The job's workflow is malformed")]
    Workflow {
        #[from]
        source: WorkflowError,
    },
    #[error("Workflow value '{item}' has no id-hash")]
    MissingIdHash { item: String },
    #[error("Input source '{source_name}' cannot be resolved to a site")]
    UnresolvableSource { source_name: String },
    #[error("Illegal result identifier")]
    ResultIdentifier {
        #[from]
        source: IdentifierError,
    },
    #[error("Failed to retrieve asset '{asset}' from site '{site}'")]
    Retrieve {
        site:  Identifier,
        asset: Identifier,
        #[source]
        source: SiteClientError,
    },
    #[error("Compute asset '{id}' is not a compute asset")]
    NotAComputeAsset { id: Identifier },
    #[error("Output '{output}' of step '{step}' declares no base asset")]
    MissingOutputBase { step: String, output: String },
    #[error("Built-in execution of step '{step}' failed")]
    Compute {
        step: String,
        #[source]
        source: ComputeError,
    },
    #[error("Containerized execution of step '{step}' failed")]
    Domain {
        step: String,
        #[source]
        source: DomainError,
    },
    #[error("Step '{step}' produced no value for output '{output}'")]
    MissingOutput { step: String, output: String },
    #[error("Failed to store a result")]
    Store {
        #[from]
        source: StoreError,
    },
}





/***** LIBRARY *****/
/// A run of a job: the reification of executing (parts of) a workflow at
/// this site.
pub struct JobRun {
    /// The site we are running at.
    this_site: Identifier,
    /// The client for fetching inputs from peer sites.
    site_client: Arc<dyn SiteClient>,
    /// The local policy view, refreshed before the legality check.
    policy_client: Arc<PolicyClient>,
    /// Decides the legality of the request.
    calculator: PermissionCalculator,
    /// Executes containerized steps.
    domain_administrator: Arc<dyn DomainAdministrator>,
    /// Where results are committed.
    target_store: Arc<AssetStore>,
    /// The job to execute and the plan to do it by.
    request: ExecutionRequest,
}
impl JobRun {
    /// Runs the job to completion, fatal failure or the job-global
    /// deadline, logging the outcome.
    pub async fn run(self) {
        info!("Starting job at {}", self.this_site);
        match tokio::time::timeout(JOB_DEADLINE, self.execute()).await {
            Ok(Ok(_)) => info!("Job at {} done", self.this_site),
            Ok(Err(err)) => {
                // The job fails fatally on our side; the submitter observes a
                // timeout, never a partial result.
                error!("Job at {} failed: {}", self.this_site, err.trace());
            },
            Err(_) => error!("Job at {} abandoned after {}s", self.this_site, JOB_DEADLINE.as_secs()),
        }
    }

    /// The actual execution: legality check, then the step scan loop.
    async fn execute(&self) -> Result<(), JobRunError> {
        let job: &Job = &self.request.job;
        let plan: &Plan = &self.request.plan;
        let workflow: &Workflow = &job.workflow;

        // Re-verify locally that what we were sent is well-formed and
        // allowed; the orchestrator is not trusted.
        job.validate()?;
        if let Err(err) = self.policy_client.update().await {
            debug!("Proceeding with stale policies: {err}");
        }
        if !self.calculator.is_legal(job, plan)? {
            return Err(JobRunError::IllegalRequest);
        }

        let id_hashes: HashMap<String, String> = job.id_hashes()?;
        let mut steps_to_do: Vec<&WorkflowStep> =
            workflow.steps.values().filter(|step| plan.step_sites.get(&step.name) == Some(&self.this_site)).collect();

        while !steps_to_do.is_empty() {
            let mut executed: Option<usize> = None;
            for (idx, step) in steps_to_do.iter().enumerate() {
                if self.try_execute_step(step, &id_hashes).await? {
                    executed = Some(idx);
                    break;
                }
            }
            match executed {
                Some(idx) => {
                    steps_to_do.remove(idx);
                },
                // Nothing was ready; wait for our peers to catch up
                None => tokio::time::sleep(SCAN_INTERVAL).await,
            }
        }
        Ok(())
    }

    /// Tries to execute a step, if its inputs are all available.
    ///
    /// # Returns
    /// False if at least one input is not yet available (try again later),
    /// true if the step was executed and its results stored.
    ///
    /// # Errors
    /// Any error is fatal for the job; there are no per-step retries.
    async fn try_execute_step(&self, step: &WorkflowStep, id_hashes: &HashMap<String, String>) -> Result<bool, JobRunError> {
        let inputs: HashMap<String, Asset> = match self.get_step_inputs(step, id_hashes).await? {
            Some(inputs) => inputs,
            None => return Ok(false),
        };

        let compute_asset: Asset = self.retrieve_compute_asset(&step.compute_asset_id).await?;
        let step_subjob: Job = self.request.job.subjob(&step.name)?;

        if compute_asset.image_location.is_some() {
            info!("Job at {} executing containerized step '{}'", self.this_site, step.name);
            let output_bases: HashMap<String, Asset> = self.get_output_bases(step).await?;
            let result: StepResult = self
                .domain_administrator
                .execute_step(step, &inputs, &compute_asset, &output_bases, id_hashes, &step_subjob)
                .await
                .map_err(|source| JobRunError::Domain { step: step.name.clone(), source })?;

            for (outp_name, path) in &result.files {
                let item: String = format!("{}.{}", step.name, outp_name);
                let result_id: Identifier = self.result_id(&item, id_hashes)?;
                let asset: Asset = Asset::new_result(result_id, None, Some(path.clone()), step_subjob.clone(), item);
                self.target_store.store(asset, true)?;
            }
            result.cleanup();
        } else {
            info!("Job at {} executing built-in step '{}'", self.this_site, step.name);
            let input_data: HashMap<String, Value> =
                inputs.iter().map(|(name, asset)| (name.clone(), asset.data.clone().unwrap_or(Value::Null))).collect();
            let mut outputs: HashMap<String, Value> =
                compute_asset.run(&input_data).map_err(|source| JobRunError::Compute { step: step.name.clone(), source })?;

            for outp_name in step.outputs.keys() {
                let value: Value = outputs
                    .remove(outp_name)
                    .ok_or_else(|| JobRunError::MissingOutput { step: step.name.clone(), output: outp_name.clone() })?;
                let item: String = format!("{}.{}", step.name, outp_name);
                let result_id: Identifier = self.result_id(&item, id_hashes)?;
                let asset: Asset = Asset::new_result(result_id, Some(value), None, step_subjob.clone(), item);
                self.target_store.store(asset, false)?;
            }
        }
        Ok(true)
    }

    /// Finds and obtains all inputs for a step.
    ///
    /// # Returns
    /// The input assets by input name, or [`None`] if at least one input is
    /// not yet available at its source site.
    async fn get_step_inputs(&self, step: &WorkflowStep, id_hashes: &HashMap<String, String>) -> Result<Option<HashMap<String, Asset>>, JobRunError> {
        let mut inputs: HashMap<String, Asset> = HashMap::new();
        for (inp_name, inp_source) in &step.inputs {
            let (source_site, source_asset): (Identifier, Identifier) = self.source(inp_source, id_hashes)?;
            match self.site_client.retrieve_asset(&source_site, &source_asset).await {
                Ok(asset) => {
                    debug!("Job at {} found input {source_asset} available at {source_site}", self.this_site);
                    inputs.insert(inp_name.clone(), asset);
                },
                Err(SiteClientError::NotFound { .. }) => {
                    debug!("Job at {} found input {source_asset} not yet available", self.this_site);
                    return Ok(None);
                },
                Err(source) => return Err(JobRunError::Retrieve { site: source_site, asset: source_asset, source }),
            }
        }
        Ok(Some(inputs))
    }

    /// Obtains the declared output base assets for a step, from their
    /// owning sites.
    async fn get_output_bases(&self, step: &WorkflowStep) -> Result<HashMap<String, Asset>, JobRunError> {
        let mut bases: HashMap<String, Asset> = HashMap::new();
        for (outp_name, base_asset) in &step.outputs {
            let base_asset: &Identifier = base_asset
                .as_ref()
                .ok_or_else(|| JobRunError::MissingOutputBase { step: step.name.clone(), output: outp_name.clone() })?;
            let location: Identifier = base_asset.location()?;
            match self.site_client.retrieve_asset(&location, base_asset).await {
                Ok(asset) => {
                    bases.insert(outp_name.clone(), asset);
                },
                Err(source) => return Err(JobRunError::Retrieve { site: location, asset: base_asset.clone(), source }),
            }
        }
        Ok(bases)
    }

    /// Retrieves the compute asset for a step from its owning site.
    async fn retrieve_compute_asset(&self, compute_asset_id: &Identifier) -> Result<Asset, JobRunError> {
        let location: Identifier = compute_asset_id.location()?;
        let asset: Asset = self
            .site_client
            .retrieve_asset(&location, compute_asset_id)
            .await
            .map_err(|source| JobRunError::Retrieve { site: location, asset: compute_asset_id.clone(), source })?;
        if asset.kind != AssetKind::Compute {
            return Err(JobRunError::NotAComputeAsset { id: compute_asset_id.clone() });
        }
        Ok(asset)
    }

    /// Resolves an input source reference to `(site, asset id)`.
    ///
    /// A `step.output` reference resolves to the site planned for that step
    /// and the output's content-derived result id; a workflow input
    /// resolves to the bound asset's owning site and the asset itself.
    fn source(&self, inp_source: &str, id_hashes: &HashMap<String, String>) -> Result<(Identifier, Identifier), JobRunError> {
        match inp_source.split_once('.') {
            Some((step_name, _)) => {
                // Legality checking guarantees every step is planned
                let site: Identifier = self
                    .request
                    .plan
                    .step_sites
                    .get(step_name)
                    .cloned()
                    .ok_or_else(|| JobRunError::UnresolvableSource { source_name: inp_source.into() })?;
                Ok((site, self.result_id(inp_source, id_hashes)?))
            },
            None => {
                let dataset: &Identifier = self
                    .request
                    .job
                    .inputs
                    .get(inp_source)
                    .ok_or_else(|| JobRunError::UnresolvableSource { source_name: inp_source.into() })?;
                Ok((dataset.location()?, dataset.clone()))
            },
        }
    }

    /// Builds the `result:` identifier for a workflow item.
    fn result_id(&self, item: &str, id_hashes: &HashMap<String, String>) -> Result<Identifier, JobRunError> {
        let hash: &String = id_hashes.get(item).ok_or_else(|| JobRunError::MissingIdHash { item: item.into() })?;
        Ok(Identifier::for_result(hash)?)
    }
}



/// A service for running workflow steps at this site.
///
/// Each accepted request spawns a detached [`JobRun`] task; acceptance
/// itself returns immediately.
pub struct StepRunner {
    /// The site this runner is located at.
    site_id: Identifier,
    /// The client for fetching assets from peer sites.
    site_client: Arc<dyn SiteClient>,
    /// The local policy view.
    policy_client: Arc<PolicyClient>,
    /// The evaluator answering legality questions.
    evaluator: Arc<PolicyEvaluator>,
    /// Executes containerized steps.
    domain_administrator: Arc<dyn DomainAdministrator>,
    /// Where results are committed.
    target_store: Arc<AssetStore>,
}
impl StepRunner {
    /// Creates a new StepRunner.
    pub fn new(
        site_id: Identifier,
        site_client: Arc<dyn SiteClient>,
        policy_client: Arc<PolicyClient>,
        evaluator: Arc<PolicyEvaluator>,
        domain_administrator: Arc<dyn DomainAdministrator>,
        target_store: Arc<AssetStore>,
    ) -> Self {
        Self { site_id, site_client, policy_client, evaluator, domain_administrator, target_store }
    }

    /// Starts executing our part of the given request in a background task.
    pub fn execute_request(&self, request: ExecutionRequest) {
        let run: JobRun = JobRun {
            this_site: self.site_id.clone(),
            site_client: self.site_client.clone(),
            policy_client: self.policy_client.clone(),
            calculator: PermissionCalculator::new(self.evaluator.clone()),
            domain_administrator: self.domain_administrator.clone(),
            target_store: self.target_store.clone(),
            request,
        };
        tokio::spawn(run.run());
    }
}

