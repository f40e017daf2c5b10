//  EVALUATION.rs
//
//  Created:
//    11 Feb 2025, 09:20:34
//  Last edited:
//    31 Jul 2025, 16:55:02
//
//  Description:
//!   Components for evaluating workflow permissions.
//!
//!   The [`PolicyEvaluator`] answers questions about single assets and
//!   single propagation steps; the [`PermissionCalculator`] lifts those
//!   answers over a whole workflow, producing a [`Permissions`] record for
//!   every workflow value and deciding which sites may run which steps.
//!
//!   All closure computations are monotone fixpoints over finite rule sets,
//!   so they always terminate. Evaluation never mutates the rule set and
//!   may be called concurrently from any task.
//

use std::collections::{HashMap, HashSet};

use ident::Identifier;
use workflow::{Job, Plan, WorkflowStep};

use crate::rules::{GroupingKind, Rule};


/***** ERRORS *****/
/// Describes failures while calculating workflow permissions.
#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("Workflow contains a dependency cycle")]
    CyclicWorkflow,
    #[error("Workflow value '{name}' refers to unknown source '{source_name}'")]
    UnknownSource { name: String, source_name: String },
}





/***** HELPER FUNCTIONS *****/
/// Computes the upward closure of `object` under the given family of
/// grouping rules: the object itself plus every group it is directly or
/// transitively in.
fn upward_closure(rules: &[Rule], kind: GroupingKind, object: &Identifier) -> HashSet<Identifier> {
    let mut closure: HashSet<Identifier> = HashSet::new();
    let mut todo: Vec<Identifier> = vec![object.clone()];
    while let Some(cur) = todo.pop() {
        if !closure.insert(cur.clone()) {
            continue;
        }
        for rule in rules {
            if let Some((rule_kind, grouped, group)) = rule.grouping() {
                if rule_kind == kind && *grouped == cur && !closure.contains(group) {
                    todo.push(group.clone());
                }
            }
        }
    }
    closure
}

/// Computes the downward closure of `object` under the given family of
/// grouping rules: the object itself plus, if it is a grouping, everything
/// in it or in a subgrouping.
fn downward_closure(rules: &[Rule], kind: GroupingKind, object: &Identifier) -> HashSet<Identifier> {
    let mut closure: HashSet<Identifier> = HashSet::new();
    let mut todo: Vec<Identifier> = vec![object.clone()];
    while let Some(cur) = todo.pop() {
        if !closure.insert(cur.clone()) {
            continue;
        }
        for rule in rules {
            if let Some((rule_kind, grouped, group)) = rule.grouping() {
                if rule_kind == kind && *group == cur && !closure.contains(grouped) {
                    todo.push(grouped.clone());
                }
            }
        }
    }
    closure
}





/***** AUXILLARY *****/
/// Provides the current set of rules to a [`PolicyEvaluator`].
///
/// Implementations typically merge one or more policy replicas; tests hand
/// in a plain vector.
pub trait PolicyCollection: Send + Sync {
    /// Returns a snapshot of the currently known rules.
    fn policies(&self) -> Vec<Rule>;
}
impl PolicyCollection for Vec<Rule> {
    fn policies(&self) -> Vec<Rule> { self.clone() }
}
impl<T: PolicyCollection + ?Sized> PolicyCollection for std::sync::Arc<T> {
    fn policies(&self) -> Vec<Rule> { (**self).policies() }
}



/// The access requirements for one workflow value.
///
/// An ordered list of sets of identifiers: to access the value, a site must
/// be permitted access to at least one identifier in _each_ set. An empty
/// set therefore means that no one may access the value. Duplicate sets are
/// deliberately kept; the same policy firing for independent reasons counts
/// twice.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Permissions {
    sets: Vec<HashSet<Identifier>>,
}
impl Permissions {
    /// Creates Permissions from the given list of requirement sets.
    #[inline]
    pub fn from_sets(sets: Vec<HashSet<Identifier>>) -> Self { Self { sets } }

    /// Provides access to the requirement sets, in insertion order.
    #[inline]
    pub fn sets(&self) -> &[HashSet<Identifier>] { &self.sets }
}





/***** LIBRARY *****/
/// Interprets policies to support planning and execution.
pub struct PolicyEvaluator {
    /// Where the rules come from.
    collection: Box<dyn PolicyCollection>,
}
impl PolicyEvaluator {
    /// Creates a new PolicyEvaluator on top of the given collection of
    /// policies.
    #[inline]
    pub fn new(collection: Box<dyn PolicyCollection>) -> Self { Self { collection } }

    /// Returns the permissions for a primary asset.
    ///
    /// Primary means this follows `InAssetCollection` rules only; for
    /// intermediate results, use
    /// [`PermissionCalculator::calculate_permissions()`] on the provenance
    /// workflow instead.
    pub fn permissions_for_asset(&self, asset: &Identifier) -> Permissions {
        let rules: Vec<Rule> = self.collection.policies();
        Permissions { sets: vec![upward_closure(&rules, GroupingKind::AssetCollection, asset)] }
    }

    /// Determines the permissions of one output of one operation from the
    /// permissions of the operation's inputs.
    ///
    /// For every requirement set of every input, the `ResultOfDataIn` and
    /// `ResultOfComputeIn` rules that match it (and the compute asset, and
    /// the output name) each route the result into collections; the
    /// matching data-rule collections and compute-rule collections become
    /// two new requirement sets on the output. An input set that no rule
    /// matches yields empty sets: unreachable by policy.
    ///
    /// # Arguments
    /// - `input_permissions`: Permissions of each operation input, in
    ///   order.
    /// - `compute_asset`: The compute asset performing the operation.
    /// - `output`: The name of the operation output to propagate for.
    pub fn propagate_permissions(&self, input_permissions: &[Permissions], compute_asset: &Identifier, output: &str) -> Permissions {
        let rules: Vec<Rule> = self.collection.policies();
        let mut sets: Vec<HashSet<Identifier>> = Vec::with_capacity(2 * input_permissions.len());
        for input_perms in input_permissions {
            for asset_set in &input_perms.sets {
                let (data_colls, compute_colls) = Self::resultofin_collections(&rules, asset_set, compute_asset, output);
                sets.push(data_colls);
                sets.push(compute_colls);
            }
        }
        Permissions { sets }
    }

    /// Checks whether the given site satisfies the given permissions, i.e.,
    /// whether an asset with these permissions may be at that site.
    ///
    /// True iff, for every requirement set, some identifier in it is the
    /// object of a `MayAccess` rule whose site equals the given site,
    /// covers it via `InSiteCategory`, or is the literal `*`.
    pub fn may_access(&self, permissions: &Permissions, site: &Identifier) -> bool {
        let rules: Vec<Rule> = self.collection.policies();
        let equiv_sites: HashSet<Identifier> = upward_closure(&rules, GroupingKind::SiteCategory, site);
        permissions.sets.iter().all(|asset_set| {
            asset_set.iter().any(|asset| {
                rules.iter().any(|rule| match rule {
                    Rule::MayAccess(rule) => rule.asset == *asset && (rule.site.is_wildcard() || equiv_sites.contains(&rule.site)),
                    _ => false,
                })
            })
        })
    }

    /// Checks whether the given party satisfies the given permissions,
    /// i.e., whether the party may use results with these permissions.
    ///
    /// The `MayUse` counterpart of [`PolicyEvaluator::may_access()`],
    /// following `InPartyCollection` upward from the party. A party needs
    /// no grant for identifiers in its own namespace; it could always sign
    /// one itself.
    pub fn may_use(&self, permissions: &Permissions, party: &Identifier) -> bool {
        let rules: Vec<Rule> = self.collection.policies();
        let equiv_parties: HashSet<Identifier> = upward_closure(&rules, GroupingKind::PartyCollection, party);
        let party_ns: Option<&str> = party.namespace().ok();
        permissions.sets.iter().all(|asset_set| {
            asset_set.iter().any(|asset| {
                if party_ns.is_some() && asset.namespace().ok() == party_ns {
                    return true;
                }
                rules.iter().any(|rule| match rule {
                    Rule::MayUse(rule) => rule.asset == *asset && (rule.party.is_wildcard() || equiv_parties.contains(&rule.party)),
                    _ => false,
                })
            })
        })
    }

    /// Collects the collections that `ResultOf*In` rules route one
    /// requirement set into, as `(data rules' collections, compute rules'
    /// collections)`.
    fn resultofin_collections(
        rules: &[Rule],
        input_assets: &HashSet<Identifier>,
        compute_asset: &Identifier,
        output: &str,
    ) -> (HashSet<Identifier>, HashSet<Identifier>) {
        // Everything the inputs resp. the compute asset count as, collection-wise
        let input_colls: HashSet<Identifier> =
            input_assets.iter().flat_map(|asset| upward_closure(rules, GroupingKind::AssetCollection, asset)).collect();
        let compute_colls: HashSet<Identifier> = upward_closure(rules, GroupingKind::AssetCollection, compute_asset);

        let mut data_collections: HashSet<Identifier> = HashSet::new();
        let mut compute_collections: HashSet<Identifier> = HashSet::new();
        for rule in rules {
            match rule {
                Rule::ResultOfDataIn(rule) => {
                    if rule.output != "*" && rule.output != output {
                        continue;
                    }
                    if input_colls.contains(&rule.data_asset)
                        && (rule.compute_asset.is_wildcard()
                            || downward_closure(rules, GroupingKind::AssetCategory, &rule.compute_asset).contains(compute_asset))
                    {
                        data_collections.insert(rule.collection.clone());
                    }
                },

                Rule::ResultOfComputeIn(rule) => {
                    if rule.output != "*" && rule.output != output {
                        continue;
                    }
                    if !compute_colls.contains(&rule.compute_asset) {
                        continue;
                    }
                    if rule.data_asset.is_wildcard() {
                        compute_collections.insert(rule.collection.clone());
                        continue;
                    }
                    let equiv_data: HashSet<Identifier> = downward_closure(rules, GroupingKind::AssetCategory, &rule.data_asset);
                    if !input_assets.is_disjoint(&equiv_data) {
                        compute_collections.insert(rule.collection.clone());
                    }
                },

                _ => {},
            }
        }
        (data_collections, compute_collections)
    }
}



/// Evaluates policies pertaining to a given workflow.
pub struct PermissionCalculator {
    /// The evaluator answering the per-asset and per-step questions.
    evaluator: std::sync::Arc<PolicyEvaluator>,
}
impl PermissionCalculator {
    /// Creates a new PermissionCalculator on top of the given evaluator.
    #[inline]
    pub fn new(evaluator: std::sync::Arc<PolicyEvaluator>) -> Self { Self { evaluator } }

    /// Provides access to the wrapped evaluator.
    #[inline]
    pub fn evaluator(&self) -> &PolicyEvaluator { &self.evaluator }

    /// Computes [`Permissions`] for every value in the job's workflow.
    ///
    /// The resulting map is keyed by workflow input name, `step.input`,
    /// step name (the compute asset), `step.@output` (the output's base
    /// asset, when declared), `step.output`, and workflow output name.
    ///
    /// Steps are processed in any dependency-compatible order; a step is
    /// skipped until all of its inputs have permissions.
    ///
    /// # Errors
    /// This function errors if the workflow's steps cannot be ordered,
    /// which means there is a dependency cycle. Workflow validation rejects
    /// those up front; jobs received from other sites are checked here
    /// again.
    pub fn calculate_permissions(&self, job: &Job) -> Result<HashMap<String, Permissions>, PermissionError> {
        let mut permissions: HashMap<String, Permissions> = HashMap::new();

        // The job's inputs are primary assets
        for (inp_name, inp_asset) in &job.inputs {
            permissions.insert(inp_name.clone(), self.evaluator.permissions_for_asset(inp_asset));
        }

        // Then push permissions through the steps, in dependency order
        let mut steps_done: HashSet<&str> = HashSet::new();
        while steps_done.len() < job.workflow.steps.len() {
            let mut progress: bool = false;
            for step in job.workflow.steps.values() {
                if steps_done.contains(step.name.as_str()) {
                    continue;
                }
                if !step.inputs.values().all(|source| permissions.contains_key(source)) {
                    continue;
                }
                self.prop_input_sources(&mut permissions, step);
                self.calc_step_permissions(&mut permissions, step);
                self.prop_step_outputs(&mut permissions, step);
                steps_done.insert(&step.name);
                progress = true;
            }
            if !progress {
                return Err(PermissionError::CyclicWorkflow);
            }
        }

        // Finally, workflow outputs alias their sources
        for (name, source) in &job.workflow.outputs {
            match permissions.get(source) {
                Some(perms) => {
                    let perms: Permissions = perms.clone();
                    permissions.insert(name.clone(), perms);
                },
                None => return Err(PermissionError::UnknownSource { name: name.clone(), source_name: source.clone() }),
            }
        }
        Ok(permissions)
    }

    /// Determines, for each step in the job's workflow, the sites at which
    /// that step is allowed to run.
    ///
    /// A site is allowed iff every permission around the step (all inputs,
    /// the compute asset, any output base assets, all outputs) is satisfied
    /// for that site.
    ///
    /// # Arguments
    /// - `job`: The job to evaluate.
    /// - `sites`: The sites to consider.
    /// - `permissions`: Workflow permissions as calculated by
    ///   [`Self::calculate_permissions()`]; calculated on the fly if
    ///   omitted.
    pub fn permitted_sites(
        &self,
        job: &Job,
        sites: &[Identifier],
        permissions: Option<&HashMap<String, Permissions>>,
    ) -> Result<HashMap<String, Vec<Identifier>>, PermissionError> {
        let calculated: HashMap<String, Permissions>;
        let permissions: &HashMap<String, Permissions> = match permissions {
            Some(permissions) => permissions,
            None => {
                calculated = self.calculate_permissions(job)?;
                &calculated
            },
        };

        let mut result: HashMap<String, Vec<Identifier>> = HashMap::new();
        for step in job.workflow.steps.values() {
            let allowed: Vec<Identifier> =
                sites.iter().filter(|site| self.site_permitted_for_step(permissions, step, site)).cloned().collect();
            result.insert(step.name.clone(), allowed);
        }
        Ok(result)
    }

    /// Checks whether this plan for this job is legal: every step of the
    /// workflow must be assigned a site it is permitted to run at.
    pub fn is_legal(&self, job: &Job, plan: &Plan) -> Result<bool, PermissionError> {
        let sites: Vec<Identifier> = plan.step_sites.values().cloned().collect();
        let permitted: HashMap<String, Vec<Identifier>> = self.permitted_sites(job, &sites, None)?;
        Ok(job.workflow.steps.keys().all(|step_name| {
            plan.step_sites.get(step_name).map(|site| permitted.get(step_name).map(|sites| sites.contains(site)).unwrap_or(false)).unwrap_or(false)
        }))
    }

    /// Checks every permission around a single step for a single site.
    fn site_permitted_for_step(&self, permissions: &HashMap<String, Permissions>, step: &WorkflowStep, site: &Identifier) -> bool {
        // Each input...
        for inp_name in step.inputs.keys() {
            if let Some(perms) = permissions.get(&format!("{}.{}", step.name, inp_name)) {
                if !self.evaluator.may_access(perms, site) {
                    return false;
                }
            }
        }
        // ...the compute asset...
        if let Some(perms) = permissions.get(&step.name) {
            if !self.evaluator.may_access(perms, site) {
                return false;
            }
        }
        // ...and each output, plus its base asset if it has one
        for outp_name in step.outputs.keys() {
            if let Some(perms) = permissions.get(&format!("{}.@{}", step.name, outp_name)) {
                if !self.evaluator.may_access(perms, site) {
                    return false;
                }
            }
            if let Some(perms) = permissions.get(&format!("{}.{}", step.name, outp_name)) {
                if !self.evaluator.may_access(perms, site) {
                    return false;
                }
            }
        }
        true
    }

    /// Copies the permissions of each step input from its source (another
    /// step's output or a workflow input).
    fn prop_input_sources(&self, permissions: &mut HashMap<String, Permissions>, step: &WorkflowStep) {
        for (inp_name, inp_source) in &step.inputs {
            let inp_item: String = format!("{}.{}", step.name, inp_name);
            if !permissions.contains_key(&inp_item) {
                if let Some(perms) = permissions.get(inp_source) {
                    let perms: Permissions = perms.clone();
                    permissions.insert(inp_item, perms);
                }
            }
        }
    }

    /// Stores the permissions needed for the step itself: access to the
    /// compute asset, and access to any output base assets.
    fn calc_step_permissions(&self, permissions: &mut HashMap<String, Permissions>, step: &WorkflowStep) {
        permissions.insert(step.name.clone(), self.evaluator.permissions_for_asset(&step.compute_asset_id));
        for (outp_name, base_asset) in &step.outputs {
            if let Some(base_asset) = base_asset {
                permissions.insert(format!("{}.@{}", step.name, outp_name), self.evaluator.permissions_for_asset(base_asset));
            }
        }
    }

    /// Derives each step output's permissions from the inputs (plus the
    /// output's base asset, if any) through the compute asset.
    fn prop_step_outputs(&self, permissions: &mut HashMap<String, Permissions>, step: &WorkflowStep) {
        let input_perms: Vec<Permissions> =
            step.inputs.keys().filter_map(|inp_name| permissions.get(&format!("{}.{}", step.name, inp_name)).cloned()).collect();

        for outp_name in step.outputs.keys() {
            let mut o_input_perms: Vec<Permissions> = input_perms.clone();
            if let Some(base_perms) = permissions.get(&format!("{}.@{}", step.name, outp_name)) {
                o_input_perms.push(base_perms.clone());
            }
            let perms: Permissions = self.evaluator.propagate_permissions(&o_input_perms, &step.compute_asset_id, outp_name);
            permissions.insert(format!("{}.{}", step.name, outp_name), perms);
        }
    }
}
