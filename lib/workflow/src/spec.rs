//  SPEC.rs
//
//  Created:
//    13 Feb 2025, 10:44:09
//  Last edited:
//    31 Jul 2025, 17:20:13
//
//  Description:
//!   Defines workflows, jobs and plans.
//!
//!   A workflow is a DAG of steps, each executing one compute asset over
//!   named inputs to produce named outputs. A [`Job`] binds a workflow's
//!   inputs to concrete assets; a [`Plan`] assigns each step to a site.
//!   Workflow values (inputs, step outputs, workflow outputs) are
//!   content-addressed by chained SHA-256 id-hashes, which is how
//!   intermediate results are found across sites.
//

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use ident::Identifier;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};


/***** ERRORS *****/
/// Describes what is wrong with an invalid workflow or job.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Duplicate name '{name}' among workflow inputs, steps and outputs")]
    DuplicateName { name: String },
    #[error("Duplicate parameter name '{name}' in step '{step}'")]
    DuplicateParameter { step: String, name: String },
    #[error("Input '{input}' of step '{step}' refers to unknown source '{source_name}'")]
    UnknownInputSource { step: String, input: String, source_name: String },
    #[error("Workflow output '{output}' refers to unknown step output '{source_name}'")]
    UnknownOutputSource { output: String, source_name: String },
    #[error("Workflow contains a dependency cycle")]
    Cyclic,
    #[error("Step '{name}' not found in workflow")]
    UnknownStep { name: String },
    #[error("Job binds unknown workflow input '{name}'")]
    UnknownJobInput { name: String },
    #[error("Job does not bind workflow input '{name}'")]
    UnboundJobInput { name: String },
}





/***** LIBRARY *****/
/// A single step in a [`Workflow`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct WorkflowStep {
    /// The name of this step.
    pub name: String,
    /// Maps input parameter names to their sources: either the name of a
    /// workflow input, or `other_step.output_name`.
    pub inputs: BTreeMap<String, String>,
    /// Maps output parameter names to the base assets to build them on, if
    /// container output staging is used.
    pub outputs: BTreeMap<String, Option<Identifier>>,
    /// The compute asset executed by this step.
    pub compute_asset_id: Identifier,
}
impl WorkflowStep {
    /// Checks that the step's input and output parameter names are unique.
    ///
    /// # Errors
    /// This function errors on the first duplicate found.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        // The maps guarantee uniqueness on their own; only cross-map
        // duplicates can occur.
        for name in self.inputs.keys() {
            if self.outputs.contains_key(name) {
                return Err(WorkflowError::DuplicateParameter { step: self.name.clone(), name: name.clone() });
            }
        }
        Ok(())
    }
}



/// A directed acyclic graph of [`WorkflowStep`]s.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Workflow {
    /// The workflow's input parameter names.
    pub inputs:  Vec<String>,
    /// Maps workflow output names to step outputs of the form
    /// `step.output`.
    pub outputs: BTreeMap<String, String>,
    /// The steps comprising this workflow, by name.
    pub steps:   BTreeMap<String, WorkflowStep>,
}
impl Workflow {
    /// Creates and validates a workflow.
    ///
    /// # Arguments
    /// - `inputs`: The workflow's input parameter names.
    /// - `outputs`: Maps output names to `step.output` references.
    /// - `steps`: The steps; their names become the map keys.
    ///
    /// # Errors
    /// This function errors if any name is duplicated, any reference does
    /// not resolve or the step graph has a cycle.
    pub fn new(
        inputs: impl IntoIterator<Item = impl Into<String>>,
        outputs: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
        steps: impl IntoIterator<Item = WorkflowStep>,
    ) -> Result<Self, WorkflowError> {
        let workflow: Self = Self {
            inputs:  inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(|(name, source)| (name.into(), source.into())).collect(),
            steps:   steps.into_iter().map(|step| (step.name.clone(), step)).collect(),
        };
        workflow.validate()?;
        Ok(workflow)
    }

    /// Validates this workflow.
    ///
    /// Checks that workflow inputs, step names and workflow output names
    /// are mutually unique, that every step input and workflow output
    /// reference resolves, that step parameters are unique and that the
    /// step graph is acyclic.
    ///
    /// Deserialized workflows must be validated before use; construction
    /// through [`Workflow::new()`] does so automatically.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        // Uniqueness among inputs, step names and output names
        let mut seen: HashSet<&str> = HashSet::new();
        for name in self.inputs.iter().chain(self.steps.keys()).chain(self.outputs.keys()) {
            if !seen.insert(name) {
                return Err(WorkflowError::DuplicateName { name: name.clone() });
            }
        }

        // Per-step checks, including that input sources resolve
        for step in self.steps.values() {
            step.validate()?;
            for (input, source) in &step.inputs {
                if !self.resolves(source) {
                    return Err(WorkflowError::UnknownInputSource {
                        step:        step.name.clone(),
                        input:       input.clone(),
                        source_name: source.clone(),
                    });
                }
            }
        }

        // Workflow outputs must name existing step outputs
        for (output, source) in &self.outputs {
            if !source.contains('.') || !self.resolves(source) {
                return Err(WorkflowError::UnknownOutputSource { output: output.clone(), source_name: source.clone() });
            }
        }

        // Reject cycles up front rather than relying on downstream
        // fixpoints to stall
        self.sorted_steps()?;
        Ok(())
    }

    /// Sorts the steps topologically (Kahn's algorithm).
    ///
    /// In the returned list, each step is preceded by the steps it depends
    /// on. Ties break alphabetically on step name.
    ///
    /// # Errors
    /// This function errors if the step graph has a cycle.
    pub fn sorted_steps(&self) -> Result<Vec<&WorkflowStep>, WorkflowError> {
        // Dependencies and dependents per step
        let mut in_degree: BTreeMap<&str, usize> = self.steps.keys().map(|name| (name.as_str(), 0)).collect();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for step in self.steps.values() {
            for source in step.inputs.values() {
                if let Some((dep, _)) = source.split_once('.') {
                    *in_degree.get_mut(step.name.as_str()).unwrap() += 1;
                    dependents.entry(dep).or_default().push(&step.name);
                }
            }
        }

        let mut queue: VecDeque<&str> = in_degree.iter().filter(|(_, deg)| **deg == 0).map(|(name, _)| *name).collect();
        let mut sorted: Vec<&WorkflowStep> = Vec::with_capacity(self.steps.len());
        while let Some(name) = queue.pop_front() {
            sorted.push(&self.steps[name]);
            for dependent in dependents.get(name).into_iter().flatten() {
                let degree: &mut usize = in_degree.get_mut(dependent).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(dependent);
                }
            }
        }
        if sorted.len() < self.steps.len() {
            return Err(WorkflowError::Cyclic);
        }
        Ok(sorted)
    }

    /// Returns the minimal subworkflow producing the given step's outputs.
    ///
    /// The subworkflow contains the step, its direct and indirect
    /// predecessors, and exactly the workflow inputs they reference. It has
    /// no workflow outputs; it serves as the provenance record of the
    /// step's results.
    ///
    /// # Errors
    /// This function errors if the named step does not exist.
    pub fn subworkflow(&self, step_name: &str) -> Result<Workflow, WorkflowError> {
        let step: &WorkflowStep = self.steps.get(step_name).ok_or_else(|| WorkflowError::UnknownStep { name: step_name.into() })?;

        let mut steps: BTreeMap<String, WorkflowStep> = BTreeMap::new();
        let mut inputs: HashSet<&str> = HashSet::new();
        let mut todo: Vec<&WorkflowStep> = vec![step];
        while let Some(step) = todo.pop() {
            if steps.contains_key(&step.name) {
                continue;
            }
            steps.insert(step.name.clone(), step.clone());
            for source in step.inputs.values() {
                match source.split_once('.') {
                    Some((pred, _)) => {
                        if !steps.contains_key(pred) {
                            // Valid workflows only reference existing steps
                            todo.push(&self.steps[pred]);
                        }
                    },
                    None => {
                        inputs.insert(source);
                    },
                }
            }
        }

        let mut inputs: Vec<String> = inputs.into_iter().map(String::from).collect();
        inputs.sort();
        Ok(Workflow { inputs, outputs: BTreeMap::new(), steps })
    }

    /// Whether a source reference resolves to a workflow input or an
    /// existing step output.
    fn resolves(&self, source: &str) -> bool {
        match source.split_once('.') {
            Some((step, output)) => self.steps.get(step).map(|step| step.outputs.contains_key(output)).unwrap_or(false),
            None => self.inputs.iter().any(|input| input == source),
        }
    }
}



/// A workflow plus concrete assets bound to its inputs, submitted by some
/// party.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Job {
    /// The party submitting this job and using its results.
    pub submitter: Identifier,
    /// The workflow to run.
    pub workflow:  Workflow,
    /// Maps the workflow's input parameters to asset ids.
    pub inputs:    BTreeMap<String, Identifier>,
}
impl Job {
    /// Creates and validates a job.
    ///
    /// # Errors
    /// This function errors if the workflow is invalid or the input
    /// bindings do not match the workflow's inputs exactly.
    pub fn new(
        submitter: Identifier,
        workflow: Workflow,
        inputs: impl IntoIterator<Item = (impl Into<String>, Identifier)>,
    ) -> Result<Self, WorkflowError> {
        let job: Self = Self { submitter, workflow, inputs: inputs.into_iter().map(|(name, asset)| (name.into(), asset)).collect() };
        job.validate()?;
        Ok(job)
    }

    /// Validates this job: the workflow must be valid and the bindings must
    /// cover its inputs exactly.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        self.workflow.validate()?;
        for name in self.inputs.keys() {
            if !self.workflow.inputs.iter().any(|input| input == name) {
                return Err(WorkflowError::UnknownJobInput { name: name.clone() });
            }
        }
        for name in &self.workflow.inputs {
            if !self.inputs.contains_key(name) {
                return Err(WorkflowError::UnboundJobInput { name: name.clone() });
            }
        }
        Ok(())
    }

    /// Returns a zero-step job representing a primary data asset.
    ///
    /// The job has a single input named `dataset` bound to the given
    /// asset; it serves as the provenance record of assets that are not the
    /// product of any workflow.
    pub fn niljob(asset_id: Identifier) -> Self {
        Self {
            submitter: Identifier::wildcard(),
            workflow:  Workflow { inputs: vec!["dataset".into()], outputs: BTreeMap::new(), steps: BTreeMap::new() },
            inputs:    BTreeMap::from([("dataset".into(), asset_id)]),
        }
    }

    /// Returns the minimal job producing the given step's outputs: the
    /// step's subworkflow plus the required subset of input bindings.
    ///
    /// # Errors
    /// This function errors if the named step does not exist.
    pub fn subjob(&self, step_name: &str) -> Result<Job, WorkflowError> {
        let sub_wf: Workflow = self.workflow.subworkflow(step_name)?;
        let inputs: BTreeMap<String, Identifier> =
            self.inputs.iter().filter(|(name, _)| sub_wf.inputs.contains(name)).map(|(name, asset)| (name.clone(), asset.clone())).collect();
        Ok(Job { submitter: self.submitter.clone(), workflow: sub_wf, inputs })
    }

    /// Calculates the id-hash of every value in the job's workflow.
    ///
    /// Workflow inputs hash their bound asset id; step outputs chain the
    /// (hex) hashes of the step's inputs in name order, then the compute
    /// asset id, then the output name. Structurally identical subjobs thus
    /// produce byte-identical hashes, and any ancestor change changes every
    /// downstream hash.
    ///
    /// # Returns
    /// A map from workflow item (input name, `step.input`, `step.output`,
    /// workflow output name) to lower-case hex id-hash.
    ///
    /// # Errors
    /// This function errors if the workflow's steps cannot be ordered.
    pub fn id_hashes(&self) -> Result<HashMap<String, String>, WorkflowError> {
        let mut hashes: HashMap<String, String> = HashMap::new();
        for (inp_name, inp_asset) in &self.inputs {
            hashes.insert(inp_name.clone(), hex::encode(Sha256::digest(inp_asset.as_str().as_bytes())));
        }

        let mut steps_done: HashSet<&str> = HashSet::new();
        while steps_done.len() < self.workflow.steps.len() {
            let mut progress: bool = false;
            for step in self.workflow.steps.values() {
                if steps_done.contains(step.name.as_str()) {
                    continue;
                }
                if !step.inputs.values().all(|source| hashes.contains_key(source)) {
                    continue;
                }

                // Step inputs take their source's hash
                for (inp_name, inp_source) in &step.inputs {
                    let hash: String = hashes[inp_source].clone();
                    hashes.insert(format!("{}.{}", step.name, inp_name), hash);
                }

                // Step outputs chain inputs (in name order), compute asset,
                // output name
                let mut step_hash: Sha256 = Sha256::new();
                for inp_name in step.inputs.keys() {
                    step_hash.update(hashes[&format!("{}.{}", step.name, inp_name)].as_bytes());
                }
                step_hash.update(step.compute_asset_id.as_str().as_bytes());
                for outp_name in step.outputs.keys() {
                    let mut outp_hash: Sha256 = step_hash.clone();
                    outp_hash.update(outp_name.as_bytes());
                    hashes.insert(format!("{}.{}", step.name, outp_name), hex::encode(outp_hash.finalize()));
                }

                steps_done.insert(&step.name);
                progress = true;
            }
            if !progress {
                return Err(WorkflowError::Cyclic);
            }
        }

        for (outp_name, outp_source) in &self.workflow.outputs {
            let hash: String = hashes[outp_source].clone();
            hashes.insert(outp_name.clone(), hash);
        }
        Ok(hashes)
    }
}



/// An assignment of workflow steps to the sites that will execute them.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Plan {
    /// Maps step names to site ids.
    pub step_sites: BTreeMap<String, Identifier>,
}

/// A request to execute a job according to a plan, as sent to every site
/// participating in the plan.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ExecutionRequest {
    /// The job to execute.
    pub job:  Job,
    /// The plan according to which to execute it.
    pub plan: Plan,
}
