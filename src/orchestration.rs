//  ORCHESTRATION.rs
//
//  Created:
//    27 Feb 2025, 14:12:30
//  Last edited:
//    01 Aug 2025, 10:02:17
//
//  Description:
//!   Supports running mesh-wide workflows.
//!
//!   The planner enumerates site assignments that every involved policy
//!   permits; the executor dispatches an execution request to every site in
//!   the chosen plan and polls for the workflow's outputs by their
//!   content-derived identifiers.
//

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use ident::{Identifier, IdentifierError};
use itertools::Itertools as _;
use log::{debug, info, warn};
use policy::{PermissionCalculator, PermissionError, Permissions, PolicyEvaluator};
use registry::RegistryClient;
use replication::SourceError;
use workflow::{ExecutionRequest, Job, Plan, WorkflowError, WorkflowStep};

use crate::assets::Asset;
use crate::clients::{SiteClient, SiteClientError};
use crate::policy_client::PolicyClient;


/***** CONSTANTS *****/
/// The maximum number of complete plans [`WorkflowPlanner::make_plans()`]
/// enumerates.
///
/// Enumeration is depth-first over steps in topological order, with sites
/// tried in the registry's (sorted) listing order; large fleets times large
/// workflows would otherwise produce exponentially many plans.
pub const MAX_PLANS: usize = 64;

/// How often [`WorkflowExecutor::get_results()`] polls for outputs.
pub const RESULT_POLL_INTERVAL: Duration = Duration::from_secs(5);





/***** ERRORS *****/
/// Describes failures while planning a workflow.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
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
    #[error("Failed to list runner sites from the registry")]
    Registry {
        #[from]
        source: SourceError,
    },
}

/// Describes failures while executing a workflow across sites.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("The job's workflow is malformed")]
    Workflow {
        #[from]
        source: WorkflowError,
    },
    #[error("Illegal result identifier")]
    ResultIdentifier {
        #[from]
        source: IdentifierError,
    },
    #[error("Failed to submit the execution request to site '{site}'")]
    Submit {
        site: Identifier,
        #[source]
        source: SiteClientError,
    },
    #[error("Failed to poll site '{site}' for result '{asset}'")]
    Poll {
        site:  Identifier,
        asset: Identifier,
        #[source]
        source: SiteClientError,
    },
}

/// Describes failures of the orchestrator as a whole.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("This workflow cannot be run due to insufficient permissions")]
    NoLegalPlan,
    #[error("No job with id '{job_id}' was submitted here")]
    UnknownJob { job_id: String },
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error("Failed to refresh the local policy view")]
    Policies {
        #[from]
        source: SourceError,
    },
}





/***** LIBRARY *****/
/// Plans workflow execution across the sites in the mesh.
pub struct WorkflowPlanner {
    /// Knows which sites have runners.
    registry: Arc<RegistryClient>,
    /// Answers the output-access questions.
    evaluator: Arc<PolicyEvaluator>,
    /// Computes per-value permissions and permitted sites.
    calculator: PermissionCalculator,
}
impl WorkflowPlanner {
    /// Creates a new WorkflowPlanner.
    pub fn new(registry: Arc<RegistryClient>, evaluator: Arc<PolicyEvaluator>) -> Self {
        let calculator: PermissionCalculator = PermissionCalculator::new(evaluator.clone());
        Self { registry, evaluator, calculator }
    }

    /// Enumerates plans that assign a permitted site to every workflow
    /// step.
    ///
    /// Returns no plans at all if the submitting site may not access, or
    /// the submitting party may not use, some workflow output; running a
    /// workflow whose results the submitter cannot touch would only waste
    /// everyone's time.
    ///
    /// At most [`MAX_PLANS`] plans are enumerated, depth-first over the
    /// steps in topological order with candidate sites in sorted order.
    ///
    /// # Arguments
    /// - `submitting_party`: The party submitting the job, who will use
    ///   the results.
    /// - `submitting_site`: The site the job was submitted through, where
    ///   the results will be collected.
    /// - `job`: The job to plan.
    ///
    /// # Errors
    /// This function errors if permissions cannot be evaluated or the
    /// registry cannot be reached.
    pub async fn make_plans(&self, submitting_party: &Identifier, submitting_site: &Identifier, job: &Job) -> Result<Vec<Plan>, PlanError> {
        let permissions: HashMap<String, Permissions> = self.calculator.calculate_permissions(job)?;

        // If the submitter cannot touch the outputs, there are no plans
        for output in job.workflow.outputs.keys() {
            // Calculated permissions always cover the workflow outputs
            let output_perms: &Permissions = &permissions[output];
            if !self.evaluator.may_access(output_perms, submitting_site) {
                debug!("Submitting site {submitting_site} may not access workflow output '{output}'");
                return Ok(vec![]);
            }
            if !self.evaluator.may_use(output_perms, submitting_party) {
                debug!("Submitting party {submitting_party} may not use workflow output '{output}'");
                return Ok(vec![]);
            }
        }

        let sites: Vec<Identifier> = self.registry.list_sites_with_runners().await?;
        let permitted: HashMap<String, Vec<Identifier>> = self.calculator.permitted_sites(job, &sites, Some(&permissions))?;
        debug!("Permitted sites: {permitted:?}");

        let sorted: Vec<&WorkflowStep> = job.workflow.sorted_steps()?;

        let mut plans: Vec<Plan> = Vec::new();
        let mut assignment: Vec<Identifier> = Vec::with_capacity(sorted.len());
        Self::plan_from(&sorted, &permitted, &mut assignment, &mut plans);
        if plans.len() >= MAX_PLANS {
            warn!("Plan enumeration hit the cap of {MAX_PLANS} plans; some legal plans were not considered");
        }
        Ok(plans)
    }

    /// Recursively extends a partial site assignment to complete plans,
    /// stopping at [`MAX_PLANS`].
    fn plan_from(sorted: &[&WorkflowStep], permitted: &HashMap<String, Vec<Identifier>>, assignment: &mut Vec<Identifier>, plans: &mut Vec<Plan>) {
        if plans.len() >= MAX_PLANS {
            return;
        }
        let idx: usize = assignment.len();
        if idx == sorted.len() {
            plans.push(Plan {
                step_sites: sorted.iter().map(|step| step.name.clone()).zip(assignment.iter().cloned()).collect(),
            });
            return;
        }
        for site in permitted.get(&sorted[idx].name).map(Vec::as_slice).unwrap_or(&[]) {
            assignment.push(site.clone());
            Self::plan_from(sorted, permitted, assignment, plans);
            assignment.pop();
        }
    }
}



/// Executes planned workflows across sites.
pub struct WorkflowExecutor {
    /// The client for talking to the sites in the plan.
    site_client: Arc<dyn SiteClient>,
    /// How often to poll for results in [`WorkflowExecutor::get_results()`].
    poll_interval: Duration,
}
impl WorkflowExecutor {
    /// Creates a new WorkflowExecutor.
    pub fn new(site_client: Arc<dyn SiteClient>) -> Self { Self { site_client, poll_interval: RESULT_POLL_INTERVAL } }

    /// Overrides the result polling interval (tests mostly).
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Starts the given execution request by sending it to every distinct
    /// site named in its plan.
    ///
    /// # Errors
    /// This function errors if some site could not be reached or rejected
    /// the request.
    pub async fn start_workflow(&self, request: &ExecutionRequest) -> Result<(), ExecutorError> {
        for site in request.plan.step_sites.values().unique() {
            self.site_client.submit_request(site, request).await.map_err(|source| ExecutorError::Submit { site: site.clone(), source })?;
        }
        Ok(())
    }

    /// Checks whether every workflow output of the request is retrievable
    /// from the site that produces it.
    ///
    /// # Errors
    /// This function errors if the workflow is malformed or a producing
    /// site failed in a way other than "not found".
    pub async fn is_done(&self, request: &ExecutionRequest) -> Result<bool, ExecutorError> {
        let id_hashes: HashMap<String, String> = request.job.id_hashes()?;
        for outp_name in request.job.workflow.outputs.keys() {
            if self.try_retrieve_output(request, &id_hashes, outp_name).await?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Downloads the results of the request, blocking (with a fixed poll
    /// interval) until all of them are available.
    ///
    /// # Returns
    /// The resulting assets, by workflow output name.
    pub async fn get_results(&self, request: &ExecutionRequest) -> Result<HashMap<String, Asset>, ExecutorError> {
        let id_hashes: HashMap<String, String> = request.job.id_hashes()?;
        let mut results: HashMap<String, Asset> = HashMap::new();
        loop {
            for outp_name in request.job.workflow.outputs.keys() {
                if results.contains_key(outp_name) {
                    continue;
                }
                if let Some(asset) = self.try_retrieve_output(request, &id_hashes, outp_name).await? {
                    results.insert(outp_name.clone(), asset);
                }
            }
            if results.len() == request.job.workflow.outputs.len() {
                return Ok(results);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Attempts to retrieve one workflow output from its producing site.
    ///
    /// # Returns
    /// The asset, or [`None`] if it is not available (yet).
    async fn try_retrieve_output(
        &self,
        request: &ExecutionRequest,
        id_hashes: &HashMap<String, String>,
        outp_name: &str,
    ) -> Result<Option<Asset>, ExecutorError> {
        // The workflow is validated, so the output source and its site
        // assignment exist
        let source: &String = &request.job.workflow.outputs[outp_name];
        let src_step: &str = source.split_once('.').map(|(step, _)| step).unwrap_or(source);
        let src_site: &Identifier = &request.plan.step_sites[src_step];
        let asset_id: Identifier = Identifier::for_result(&id_hashes[outp_name])?;

        match self.site_client.retrieve_asset(src_site, &asset_id).await {
            Ok(asset) => Ok(Some(asset)),
            Err(SiteClientError::NotFound { .. }) => Ok(None),
            Err(source) => Err(ExecutorError::Poll { site: src_site.clone(), asset: asset_id, source }),
        }
    }
}



/// Plans and runs workflows on behalf of this site's users.
///
/// Submitted jobs are tracked by an id, a URL-safe string.
pub struct WorkflowOrchestrator {
    /// Picks the sites.
    planner: WorkflowPlanner,
    /// Talks to them.
    executor: WorkflowExecutor,
    /// The local policy view, refreshed before planning.
    policy_client: Arc<PolicyClient>,
    /// The submitted jobs, by job id.
    jobs: RwLock<HashMap<String, ExecutionRequest>>,
    /// The id for the next submitted job.
    next_id: AtomicU64,
}
impl WorkflowOrchestrator {
    /// Creates a new WorkflowOrchestrator.
    pub fn new(planner: WorkflowPlanner, executor: WorkflowExecutor, policy_client: Arc<PolicyClient>) -> Self {
        Self { planner, executor, policy_client, jobs: RwLock::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }

    /// Plans and starts the given job.
    ///
    /// If multiple legal plans exist, the last enumerated one is selected.
    ///
    /// # Returns
    /// The new job's id.
    ///
    /// # Errors
    /// This function errors if no legal plan exists, or if planning or
    /// dispatch failed.
    pub async fn start_job(
        &self,
        submitting_party: &Identifier,
        submitting_site: &Identifier,
        job: Job,
    ) -> Result<String, OrchestratorError> {
        self.policy_client.update().await?;

        let mut plans: Vec<Plan> = self.planner.make_plans(submitting_party, submitting_site, &job).await?;
        for (idx, plan) in plans.iter().enumerate() {
            debug!("Plan {idx}: {plan:?}");
        }
        // There is no tie-break policy; take the last one enumerated
        let selected: Plan = match plans.pop() {
            Some(plan) => plan,
            None => {
                warn!("No plans for job submitted by {submitting_party}");
                return Err(OrchestratorError::NoLegalPlan);
            },
        };

        let request: ExecutionRequest = ExecutionRequest { job, plan: selected };
        self.executor.start_workflow(&request).await?;

        let job_id: String = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        info!("Started job {job_id} submitted by {submitting_party}");
        self.jobs.write().unwrap().insert(job_id.clone(), request);
        Ok(job_id)
    }

    /// Returns the plan selected for a submitted job.
    ///
    /// # Errors
    /// This function errors if the job id is unknown.
    pub fn get_plan(&self, job_id: &str) -> Result<Plan, OrchestratorError> {
        let jobs = self.jobs.read().unwrap();
        jobs.get(job_id).map(|request| request.plan.clone()).ok_or_else(|| OrchestratorError::UnknownJob { job_id: job_id.into() })
    }

    /// Checks whether the given job's outputs are all retrievable.
    ///
    /// # Errors
    /// This function errors if the job id is unknown or polling failed.
    pub async fn is_done(&self, job_id: &str) -> Result<bool, OrchestratorError> {
        let request: ExecutionRequest = self.request_for(job_id)?;
        Ok(self.executor.is_done(&request).await?)
    }

    /// Downloads the results of a submitted job, blocking until they are
    /// all available. Use [`WorkflowOrchestrator::is_done()`] to poll
    /// without blocking.
    ///
    /// # Returns
    /// The resulting assets, by workflow output name.
    ///
    /// # Errors
    /// This function errors if the job id is unknown or retrieval failed.
    pub async fn get_results(&self, job_id: &str) -> Result<HashMap<String, Asset>, OrchestratorError> {
        let request: ExecutionRequest = self.request_for(job_id)?;
        Ok(self.executor.get_results(&request).await?)
    }

    /// Looks up a submitted job by id.
    fn request_for(&self, job_id: &str) -> Result<ExecutionRequest, OrchestratorError> {
        let jobs = self.jobs.read().unwrap();
        jobs.get(job_id).cloned().ok_or_else(|| OrchestratorError::UnknownJob { job_id: job_id.into() })
    }
}
