//  TESTS.rs
//
//  Created:
//    14 Feb 2025, 09:02:33
//  Last edited:
//    31 Jul 2025, 17:26:40
//
//  Description:
//!   Implements tests for workflow validation, subworkflows and id-hashes.
//

use std::collections::BTreeMap;

use ident::Identifier;

use super::spec::{Job, Workflow, WorkflowError, WorkflowStep};


/***** HELPER FUNCTIONS *****/
fn id(raw: &str) -> Identifier { Identifier::new(raw).unwrap() }

fn step(name: &str, inputs: &[(&str, &str)], outputs: &[&str], compute: &str) -> WorkflowStep {
    WorkflowStep {
        name: name.into(),
        inputs: inputs.iter().map(|(name, source)| (name.to_string(), source.to_string())).collect(),
        outputs: outputs.iter().map(|name| (name.to_string(), None)).collect(),
        compute_asset_id: id(compute),
    }
}

/// The three-step pipeline used in several tests: combine(x1, x2) ->
/// anonymise -> aggregate.
fn pipeline() -> Workflow {
    Workflow::new(
        ["x1", "x2"],
        [("result", "aggregate.y")],
        [
            step("combine", &[("x1", "x1"), ("x2", "x2")], &["y"], "asset:ns3:combine:ns3:site3"),
            step("anonymise", &[("x1", "combine.y")], &["y"], "asset:ns3:anonymise:ns3:site3"),
            step("aggregate", &[("x1", "anonymise.y")], &["y"], "asset:ns3:aggregate:ns3:site3"),
        ],
    )
    .unwrap()
}

fn pipeline_job() -> Job {
    Job::new(id("party:ns2:party2"), pipeline(), [
        ("x1", id("asset:ns1:pii1:ns1:site1")),
        ("x2", id("asset:ns2:pii2:ns2:site2")),
    ])
    .unwrap()
}





/***** TESTS *****/
#[test]
fn rejects_duplicate_names() {
    // A step named like a workflow input
    let err = Workflow::new(["x1"], [("y", "x1.y")], [step("x1", &[("a", "x1")], &["y"], "asset:ns1:c:ns1:site1")]).unwrap_err();
    assert!(matches!(err, WorkflowError::DuplicateName { .. }));

    // An output named like a workflow input
    let err = Workflow::new(["x1"], [("x1", "s.y")], [step("s", &[("a", "x1")], &["y"], "asset:ns1:c:ns1:site1")]).unwrap_err();
    assert!(matches!(err, WorkflowError::DuplicateName { .. }));
}

#[test]
fn rejects_duplicate_step_parameters() {
    let err = Workflow::new(["x1"], [("out", "s.a")], [step("s", &[("a", "x1")], &["a"], "asset:ns1:c:ns1:site1")]).unwrap_err();
    assert!(matches!(err, WorkflowError::DuplicateParameter { .. }));
}

#[test]
fn rejects_unresolved_references() {
    let err = Workflow::new(["x1"], [("y", "s.y")], [step("s", &[("a", "x2")], &["y"], "asset:ns1:c:ns1:site1")]).unwrap_err();
    assert!(matches!(err, WorkflowError::UnknownInputSource { .. }));

    let err = Workflow::new(["x1"], [("y", "s.nope")], [step("s", &[("a", "x1")], &["y"], "asset:ns1:c:ns1:site1")]).unwrap_err();
    assert!(matches!(err, WorkflowError::UnknownOutputSource { .. }));

    // Workflow outputs cannot alias workflow inputs directly
    let err = Workflow::new(["x1"], [("y", "x1")], [step("s", &[("a", "x1")], &["y"], "asset:ns1:c:ns1:site1")]).unwrap_err();
    assert!(matches!(err, WorkflowError::UnknownOutputSource { .. }));
}

#[test]
fn rejects_cycles() {
    let err = Workflow::new(["x1"], Vec::<(String, String)>::new(), [
        step("a", &[("inp", "b.out")], &["out"], "asset:ns1:c:ns1:site1"),
        step("b", &[("inp", "a.out")], &["out"], "asset:ns1:c:ns1:site1"),
    ])
    .unwrap_err();
    assert!(matches!(err, WorkflowError::Cyclic));
}

#[test]
fn sorts_topologically() {
    let wf: Workflow = pipeline();
    let order: Vec<&str> = wf.sorted_steps().unwrap().into_iter().map(|step| step.name.as_str()).collect();
    assert_eq!(order, vec!["combine", "anonymise", "aggregate"]);
}

#[test]
fn job_bindings_must_match() {
    let err = Job::new(id("party:ns1:party1"), pipeline(), [("x1", id("asset:ns1:d:ns1:site1"))]).unwrap_err();
    assert!(matches!(err, WorkflowError::UnboundJobInput { .. }));

    let err = Job::new(id("party:ns1:party1"), pipeline(), [
        ("x1", id("asset:ns1:d:ns1:site1")),
        ("x2", id("asset:ns1:d:ns1:site1")),
        ("x3", id("asset:ns1:d:ns1:site1")),
    ])
    .unwrap_err();
    assert!(matches!(err, WorkflowError::UnknownJobInput { .. }));
}

#[test]
fn subworkflow_is_minimal() {
    let wf: Workflow = pipeline();

    let sub: Workflow = wf.subworkflow("anonymise").unwrap();
    assert_eq!(sub.steps.keys().collect::<Vec<_>>(), vec!["anonymise", "combine"]);
    assert_eq!(sub.inputs, vec!["x1", "x2"]);
    assert!(sub.outputs.is_empty());

    let sub: Workflow = wf.subworkflow("combine").unwrap();
    assert_eq!(sub.steps.keys().collect::<Vec<_>>(), vec!["combine"]);
    assert_eq!(sub.inputs, vec!["x1", "x2"]);

    assert!(matches!(wf.subworkflow("nope"), Err(WorkflowError::UnknownStep { .. })));
}

#[test]
fn subjob_keeps_needed_inputs_only() {
    // Two independent steps; the subjob for one must not bind the other's
    // input
    let wf: Workflow = Workflow::new(["x1", "x2"], [("y1", "s1.y"), ("y2", "s2.y")], [
        step("s1", &[("a", "x1")], &["y"], "asset:ns1:c:ns1:site1"),
        step("s2", &[("a", "x2")], &["y"], "asset:ns1:c:ns1:site1"),
    ])
    .unwrap();
    let job: Job =
        Job::new(id("party:ns1:party1"), wf, [("x1", id("asset:ns1:d1:ns1:site1")), ("x2", id("asset:ns1:d2:ns1:site1"))]).unwrap();

    let sub: Job = job.subjob("s1").unwrap();
    assert_eq!(sub.inputs.keys().collect::<Vec<_>>(), vec!["x1"]);
    assert_eq!(sub.submitter, job.submitter);
}

#[test]
fn id_hashes_are_deterministic() {
    let job: Job = pipeline_job();
    let hashes1 = job.id_hashes().unwrap();
    let hashes2 = pipeline_job().id_hashes().unwrap();
    assert_eq!(hashes1, hashes2);

    // Every workflow value has a hash
    for item in ["x1", "x2", "combine.x1", "combine.y", "anonymise.y", "aggregate.y", "result"] {
        assert!(hashes1.contains_key(item), "no hash for {item}");
    }

    // Outputs alias their sources; inputs propagate from theirs
    assert_eq!(hashes1["result"], hashes1["aggregate.y"]);
    assert_eq!(hashes1["combine.x1"], hashes1["x1"]);
}

#[test]
fn id_hashes_change_with_ancestors() {
    let job: Job = pipeline_job();
    let hashes = job.id_hashes().unwrap();

    // Rebinding a workflow input changes everything downstream of it
    let mut rebound: Job = job.clone();
    rebound.inputs.insert("x1".into(), id("asset:ns1:other:ns1:site1"));
    let rebound_hashes = rebound.id_hashes().unwrap();
    assert_ne!(rebound_hashes["x1"], hashes["x1"]);
    assert_ne!(rebound_hashes["combine.y"], hashes["combine.y"]);
    assert_ne!(rebound_hashes["result"], hashes["result"]);
    // ...but not the untouched input
    assert_eq!(rebound_hashes["x2"], hashes["x2"]);

    // Changing an intermediate compute asset changes the tail of the chain
    let mut recomputed: Job = job.clone();
    recomputed.workflow.steps.get_mut("anonymise").unwrap().compute_asset_id = id("asset:ns3:other:ns3:site3");
    let recomputed_hashes = recomputed.id_hashes().unwrap();
    assert_eq!(recomputed_hashes["combine.y"], hashes["combine.y"]);
    assert_ne!(recomputed_hashes["anonymise.y"], hashes["anonymise.y"]);
    assert_ne!(recomputed_hashes["result"], hashes["result"]);
}

#[test]
fn subjob_hashes_agree_with_parent() {
    // A result's id under the full job and under its provenance subjob must
    // coincide, or cross-site retrieval by content address would break.
    let job: Job = pipeline_job();
    let hashes = job.id_hashes().unwrap();

    let sub: Job = job.subjob("anonymise").unwrap();
    let sub_hashes = sub.id_hashes().unwrap();
    assert_eq!(sub_hashes["anonymise.y"], hashes["anonymise.y"]);
    assert_eq!(sub_hashes["combine.y"], hashes["combine.y"]);
}

#[test]
fn niljob_is_valid() {
    let job: Job = Job::niljob(id("asset:ns1:d1:ns1:site1"));
    job.validate().unwrap();
    let hashes = job.id_hashes().unwrap();
    assert_eq!(hashes.len(), 1);
    assert!(hashes.contains_key("dataset"));
}

#[test]
fn execution_request_roundtrips() {
    let job: Job = pipeline_job();
    let plan = super::spec::Plan {
        step_sites: BTreeMap::from([
            ("combine".to_string(), id("site:ns3:site3")),
            ("anonymise".to_string(), id("site:ns3:site3")),
            ("aggregate".to_string(), id("site:ns3:site3")),
        ]),
    };
    let request = super::spec::ExecutionRequest { job, plan };
    let json: String = serde_json::to_string(&request).unwrap();
    let back: super::spec::ExecutionRequest = serde_json::from_str(&json).unwrap();
    assert_eq!(back.job, request.job);
    assert_eq!(back.plan, request.plan);
}
