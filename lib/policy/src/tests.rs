//  TESTS.rs
//
//  Created:
//    12 Feb 2025, 13:36:28
//  Last edited:
//    31 Jul 2025, 18:02:19
//
//  Description:
//!   Implements tests for the policy rules and their evaluation.
//

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use ident::{Identifier, Signable as _};
use rand::rngs::OsRng;
use replication::{Replica, ReplicaUpdate};
use workflow::{Job, Plan, Workflow, WorkflowStep};

use super::evaluation::{PermissionCalculator, PermissionError, Permissions, PolicyEvaluator};
use super::replication::{PolicyStore, RuleValidator};
use super::rules::{InAssetCategory, InAssetCollection, InPartyCollection, InSiteCategory, MayAccess, MayUse, ResultOfIn, Rule};


/***** HELPER FUNCTIONS *****/
fn id(raw: &str) -> Identifier { Identifier::new(raw).unwrap() }

fn in_asset_collection(asset: &str, collection: &str) -> Rule {
    Rule::InAssetCollection(InAssetCollection { asset: id(asset), collection: id(collection), signature: None })
}
fn in_asset_category(asset: &str, category: &str) -> Rule {
    Rule::InAssetCategory(InAssetCategory { asset: id(asset), category: id(category), signature: None })
}
fn in_site_category(site: &str, category: &str) -> Rule {
    Rule::InSiteCategory(InSiteCategory { site: id(site), category: id(category), signature: None })
}
fn in_party_collection(party: &str, collection: &str) -> Rule {
    Rule::InPartyCollection(InPartyCollection { party: id(party), collection: id(collection), signature: None })
}
fn may_access(site: &str, asset: &str) -> Rule { Rule::MayAccess(MayAccess { site: id(site), asset: id(asset), signature: None }) }
fn may_use(party: &str, asset: &str) -> Rule {
    Rule::MayUse(MayUse { party: id(party), asset: id(asset), conditions: "For any use".into(), signature: None })
}
fn result_of_data_in(data: &str, compute: &str, output: &str, collection: &str) -> Rule {
    Rule::ResultOfDataIn(ResultOfIn { data_asset: id(data), compute_asset: id(compute), output: output.into(), collection: id(collection), signature: None })
}
fn result_of_compute_in(data: &str, compute: &str, output: &str, collection: &str) -> Rule {
    Rule::ResultOfComputeIn(ResultOfIn {
        data_asset: id(data),
        compute_asset: id(compute),
        output: output.into(),
        collection: id(collection),
        signature: None,
    })
}

fn evaluator(rules: Vec<Rule>) -> PolicyEvaluator { PolicyEvaluator::new(Box::new(rules)) }

fn set(ids: &[&str]) -> HashSet<Identifier> { ids.iter().map(|raw| id(raw)).collect() }

fn input_perms(ids: &[&str]) -> Vec<Permissions> { vec![Permissions::from_sets(vec![set(ids)])] }

// The fixture identifiers, as used throughout
const ASSET1: &str = "asset:ns1:asset1:ns1:site1";
const ASSET2: &str = "asset:ns2:asset2:ns2:site2";
const ASSET3: &str = "asset:ns3:asset3:ns3:site3";
const SITE1: &str = "site:ns1:site1";
const SITE2: &str = "site:ns2:site2";
const SITE_CATEGORY1A: &str = "site_category:ns1:site_category_a";
const COLLECTION1A: &str = "asset_collection:ns1:asset_collection_a";
const COLLECTION1B: &str = "asset_collection:ns1:asset_collection_b";
const COLLECTION1C: &str = "asset_collection:ns1:asset_collection_c";
const COLLECTION2A: &str = "asset_collection:ns2:asset_collection_a";
const COLLECTION2B: &str = "asset_collection:ns2:asset_collection_b";
const COLLECTION3A: &str = "asset_collection:ns3:asset_collection_a";
const CATEGORY1A: &str = "asset_category:ns1:asset_category_a";
const CATEGORY1B: &str = "asset_category:ns1:asset_category_b";
const CATEGORY3A: &str = "asset_category:ns3:asset_category_a";





/***** ACCESS TESTS *****/
#[test]
fn primary_asset_access() {
    let eval: PolicyEvaluator = evaluator(vec![may_access(SITE1, ASSET1)]);
    let perms: Permissions = eval.permissions_for_asset(&id(ASSET1));
    assert_eq!(perms.sets(), &[set(&[ASSET1])]);
    assert!(eval.may_access(&perms, &id(SITE1)));
    assert!(!eval.may_access(&perms, &id(SITE2)));
}

#[test]
fn asset_collection_access() {
    let eval: PolicyEvaluator = evaluator(vec![in_asset_collection(ASSET1, COLLECTION1A), may_access(SITE1, COLLECTION1A)]);
    let perms: Permissions = eval.permissions_for_asset(&id(ASSET1));
    assert_eq!(perms.sets(), &[set(&[ASSET1, COLLECTION1A])]);
    assert!(eval.may_access(&perms, &id(SITE1)));
    assert!(!eval.may_access(&perms, &id(SITE2)));
}

#[test]
fn asset_category_grants_no_access() {
    // Categories group assets for rule matching; unlike collections, they
    // must not pass access down.
    let eval: PolicyEvaluator = evaluator(vec![in_asset_category(ASSET1, CATEGORY1A), may_access(SITE1, CATEGORY1A)]);
    let perms: Permissions = eval.permissions_for_asset(&id(ASSET1));
    assert_eq!(perms.sets(), &[set(&[ASSET1])]);
    assert!(!eval.may_access(&perms, &id(SITE1)));
}

#[test]
fn site_category_access() {
    let eval: PolicyEvaluator = evaluator(vec![in_site_category(SITE2, SITE_CATEGORY1A), may_access(SITE_CATEGORY1A, ASSET1)]);
    let perms: Permissions = eval.permissions_for_asset(&id(ASSET1));
    assert!(eval.may_access(&perms, &id(SITE2)));
    assert!(!eval.may_access(&perms, &id(SITE1)));
}

#[test]
fn wildcard_site_access() {
    let eval: PolicyEvaluator = evaluator(vec![may_access("*", ASSET1)]);
    let perms: Permissions = eval.permissions_for_asset(&id(ASSET1));
    assert!(eval.may_access(&perms, &id(SITE1)));
    assert!(eval.may_access(&perms, &id(SITE2)));
}

#[test]
fn wildcard_on_category_grants_no_access() {
    let eval: PolicyEvaluator = evaluator(vec![in_asset_category(ASSET1, CATEGORY1A), may_access("*", CATEGORY1A)]);
    let perms: Permissions = eval.permissions_for_asset(&id(ASSET1));
    assert!(!eval.may_access(&perms, &id(SITE1)));
}

#[test]
fn empty_set_denies_everyone() {
    let eval: PolicyEvaluator = evaluator(vec![may_access(SITE1, ASSET1)]);
    let perms: Permissions = Permissions::from_sets(vec![set(&[ASSET1]), HashSet::new()]);
    assert!(!eval.may_access(&perms, &id(SITE1)));
}

#[test]
fn may_use_follows_party_collections() {
    let eval: PolicyEvaluator = evaluator(vec![
        in_party_collection("party:ns1:party1", "party_category:ns1:members"),
        may_use("party_category:ns1:members", COLLECTION3A),
    ]);
    let perms: Permissions = Permissions::from_sets(vec![set(&[COLLECTION3A])]);
    assert!(eval.may_use(&perms, &id("party:ns1:party1")));
    assert!(!eval.may_use(&perms, &id("party:ns2:party2")));

    let eval: PolicyEvaluator = evaluator(vec![may_use("*", COLLECTION3A)]);
    assert!(eval.may_use(&perms, &id("party:ns2:party2")));
}

#[test]
fn may_use_is_implicit_within_own_namespace() {
    // The owner of a namespace never needs to grant itself usage
    let eval: PolicyEvaluator = evaluator(vec![]);
    let perms: Permissions = Permissions::from_sets(vec![set(&[COLLECTION1A])]);
    assert!(eval.may_use(&perms, &id("party:ns1:party1")));
    assert!(!eval.may_use(&perms, &id("party:ns3:party3")));
}

#[test]
fn may_access_is_monotone() {
    // Adding a MayAccess rule must never shrink access for anyone.
    let base: Vec<Rule> = vec![
        in_asset_collection(ASSET1, COLLECTION1A),
        in_site_category(SITE2, SITE_CATEGORY1A),
        may_access(SITE1, COLLECTION1A),
        may_access(SITE_CATEGORY1A, ASSET2),
    ];
    let perms: Vec<Permissions> = vec![
        Permissions::from_sets(vec![set(&[ASSET1, COLLECTION1A])]),
        Permissions::from_sets(vec![set(&[ASSET2])]),
        Permissions::from_sets(vec![set(&[ASSET1]), set(&[ASSET2])]),
    ];
    let sites: Vec<Identifier> = vec![id(SITE1), id(SITE2)];

    let eval_before: PolicyEvaluator = evaluator(base.clone());
    let before: Vec<bool> = perms.iter().flat_map(|p| sites.iter().map(move |s| (p, s))).map(|(p, s)| eval_before.may_access(p, s)).collect();

    let mut extended: Vec<Rule> = base;
    extended.push(may_access(SITE2, ASSET1));
    let eval_after: PolicyEvaluator = evaluator(extended);
    let after: Vec<bool> = perms.iter().flat_map(|p| sites.iter().map(move |s| (p, s))).map(|(p, s)| eval_after.may_access(p, s)).collect();

    for (before, after) in before.into_iter().zip(after) {
        assert!(!before || after);
    }
}





/***** PROPAGATION TESTS *****/
#[test]
fn propagate_result_of_data_in() {
    let eval: PolicyEvaluator = evaluator(vec![result_of_data_in(ASSET1, ASSET2, "output1", COLLECTION1A)]);
    let perms: Permissions = eval.propagate_permissions(&input_perms(&[ASSET1]), &id(ASSET2), "output1");
    assert_eq!(perms.sets(), &[set(&[COLLECTION1A]), HashSet::new()]);
}

#[test]
fn propagate_result_of_data_in_data_collection() {
    let eval: PolicyEvaluator =
        evaluator(vec![in_asset_collection(ASSET1, COLLECTION1A), result_of_data_in(COLLECTION1A, ASSET2, "output1", COLLECTION1B)]);
    let perms: Permissions = eval.propagate_permissions(&input_perms(&[ASSET1]), &id(ASSET2), "output1");
    assert_eq!(perms.sets(), &[set(&[COLLECTION1B]), HashSet::new()]);
}

#[test]
fn propagate_result_of_data_in_data_category() {
    // Asset categories do not make an asset count as its category for
    // data-side matching
    let eval: PolicyEvaluator =
        evaluator(vec![in_asset_category(ASSET1, CATEGORY1A), result_of_data_in(CATEGORY1A, ASSET2, "output1", COLLECTION1A)]);
    let perms: Permissions = eval.propagate_permissions(&input_perms(&[ASSET1]), &id(ASSET2), "output1");
    assert_eq!(perms.sets(), &[HashSet::new(), HashSet::new()]);
}

#[test]
fn propagate_result_of_data_in_compute_category() {
    let eval: PolicyEvaluator =
        evaluator(vec![in_asset_category(ASSET1, CATEGORY1A), result_of_data_in(ASSET2, CATEGORY1A, "output1", COLLECTION1A)]);
    let perms: Permissions = eval.propagate_permissions(&input_perms(&[ASSET2]), &id(ASSET1), "output1");
    assert_eq!(perms.sets(), &[set(&[COLLECTION1A]), HashSet::new()]);
}

#[test]
fn propagate_result_of_compute_in() {
    let eval: PolicyEvaluator = evaluator(vec![result_of_compute_in(ASSET1, ASSET2, "output1", COLLECTION2A)]);
    let perms: Permissions = eval.propagate_permissions(&input_perms(&[ASSET1]), &id(ASSET2), "output1");
    assert_eq!(perms.sets(), &[HashSet::new(), set(&[COLLECTION2A])]);
}

#[test]
fn propagate_result_of_compute_in_data_category() {
    let eval: PolicyEvaluator =
        evaluator(vec![in_asset_category(ASSET1, CATEGORY1A), result_of_compute_in(CATEGORY1A, ASSET2, "output1", COLLECTION2A)]);
    let perms: Permissions = eval.propagate_permissions(&input_perms(&[ASSET1]), &id(ASSET2), "output1");
    assert_eq!(perms.sets(), &[HashSet::new(), set(&[COLLECTION2A])]);
}

#[test]
fn propagate_result_of_compute_in_compute_collection() {
    let eval: PolicyEvaluator =
        evaluator(vec![in_asset_collection(ASSET1, COLLECTION1A), result_of_compute_in(ASSET2, COLLECTION1A, "output1", COLLECTION1B)]);
    let perms: Permissions = eval.propagate_permissions(&input_perms(&[ASSET2]), &id(ASSET1), "output1");
    assert_eq!(perms.sets(), &[HashSet::new(), set(&[COLLECTION1B])]);
}

#[test]
fn propagate_deep_closures() {
    // Nested collections on the data side, nested categories on the
    // compute side
    let eval: PolicyEvaluator = evaluator(vec![
        in_asset_collection(ASSET1, COLLECTION1A),
        in_asset_collection(COLLECTION1A, COLLECTION1B),
        in_asset_category(ASSET2, CATEGORY1A),
        in_asset_category(CATEGORY1A, CATEGORY1B),
        result_of_data_in(COLLECTION1B, CATEGORY1B, "output1", COLLECTION1C),
    ]);
    let perms: Permissions = eval.propagate_permissions(&input_perms(&[ASSET1]), &id(ASSET2), "output1");
    assert_eq!(perms.sets(), &[set(&[COLLECTION1C]), HashSet::new()]);
}

#[test]
fn propagate_collection_nesting_is_directional() {
    // asset1 is in collection1a; collection1b is *also* in collection1a,
    // but that does not make asset1 a member of collection1b.
    let eval: PolicyEvaluator = evaluator(vec![
        in_asset_collection(ASSET1, COLLECTION1A),
        in_asset_collection(COLLECTION1B, COLLECTION1A),
        result_of_data_in(COLLECTION1B, ASSET2, "output1", COLLECTION1C),
    ]);
    let perms: Permissions = eval.propagate_permissions(&input_perms(&[ASSET1]), &id(ASSET2), "output1");
    assert_eq!(perms.sets(), &[HashSet::new(), HashSet::new()]);
}

#[test]
fn propagate_multiple_inputs() {
    let eval: PolicyEvaluator = evaluator(vec![
        result_of_data_in(ASSET1, ASSET3, "output1", COLLECTION1A),
        result_of_data_in(ASSET2, ASSET3, "output1", COLLECTION2A),
        in_asset_category(ASSET1, CATEGORY3A),
        in_asset_category(ASSET2, CATEGORY3A),
        result_of_compute_in(CATEGORY3A, ASSET3, "output1", COLLECTION3A),
    ]);
    let perms: Permissions = eval.propagate_permissions(
        &[Permissions::from_sets(vec![set(&[ASSET1])]), Permissions::from_sets(vec![set(&[ASSET2])])],
        &id(ASSET3),
        "output1",
    );
    assert_eq!(perms.sets(), &[set(&[COLLECTION1A]), set(&[COLLECTION3A]), set(&[COLLECTION2A]), set(&[COLLECTION3A])]);
}

#[test]
fn propagate_multiple_outputs() {
    let eval: PolicyEvaluator = evaluator(vec![
        result_of_data_in(ASSET1, ASSET2, "output1", COLLECTION1A),
        result_of_data_in(ASSET1, ASSET2, "output2", COLLECTION1B),
        result_of_compute_in(ASSET1, ASSET2, "output1", COLLECTION2A),
        result_of_compute_in(ASSET1, ASSET2, "output2", COLLECTION2B),
    ]);
    let perms: Permissions = eval.propagate_permissions(&input_perms(&[ASSET1]), &id(ASSET2), "output1");
    assert_eq!(perms.sets(), &[set(&[COLLECTION1A]), set(&[COLLECTION2A])]);

    let perms: Permissions = eval.propagate_permissions(&input_perms(&[ASSET1]), &id(ASSET2), "output2");
    assert_eq!(perms.sets(), &[set(&[COLLECTION1B]), set(&[COLLECTION2B])]);
}

#[test]
fn propagate_asset_wildcards() {
    let eval: PolicyEvaluator =
        evaluator(vec![result_of_data_in(ASSET1, "*", "output1", COLLECTION1A), result_of_compute_in("*", ASSET2, "output1", COLLECTION2A)]);
    let perms: Permissions = eval.propagate_permissions(&input_perms(&[ASSET1]), &id(ASSET2), "output1");
    assert_eq!(perms.sets(), &[set(&[COLLECTION1A]), set(&[COLLECTION2A])]);
}

#[test]
fn propagate_output_wildcards() {
    let eval: PolicyEvaluator =
        evaluator(vec![result_of_data_in(ASSET1, ASSET2, "*", COLLECTION1A), result_of_compute_in(ASSET1, ASSET2, "*", COLLECTION2A)]);
    let perms: Permissions = eval.propagate_permissions(&input_perms(&[ASSET1]), &id(ASSET2), "output1");
    assert_eq!(perms.sets(), &[set(&[COLLECTION1A]), set(&[COLLECTION2A])]);
}

#[test]
fn propagate_wildcard_and_named_output_both_fire() {
    // When a wildcard-output rule and a named-output rule both match, both
    // contribute their collections.
    let eval: PolicyEvaluator =
        evaluator(vec![result_of_data_in(ASSET1, ASSET2, "*", COLLECTION1A), result_of_data_in(ASSET1, ASSET2, "output1", COLLECTION1B)]);
    let perms: Permissions = eval.propagate_permissions(&input_perms(&[ASSET1]), &id(ASSET2), "output1");
    assert_eq!(perms.sets(), &[set(&[COLLECTION1A, COLLECTION1B]), HashSet::new()]);
}





/***** CALCULATOR TESTS *****/
/// A one-step addition workflow with full permissions for site1 only.
fn addition_fixture() -> (PermissionCalculator, Job) {
    const DATA1: &str = "asset:ns1:data1:ns1:site1";
    const DATA2: &str = "asset:ns2:data2:ns2:site2";
    const ADDITION: &str = "asset:ns2:addition:ns2:site2";

    let rules: Vec<Rule> = vec![
        may_access(SITE1, DATA1),
        may_access(SITE1, DATA2),
        may_access(SITE1, ADDITION),
        may_access(SITE1, COLLECTION1A),
        may_access(SITE1, COLLECTION2A),
        result_of_data_in(DATA1, ADDITION, "y", COLLECTION1A),
        result_of_data_in(DATA2, ADDITION, "y", COLLECTION1A),
        result_of_compute_in(DATA1, ADDITION, "y", COLLECTION2A),
        result_of_compute_in(DATA2, ADDITION, "y", COLLECTION2A),
        may_use("party:ns1:party1", COLLECTION1A),
        may_use("party:ns1:party1", COLLECTION2A),
    ];
    let calculator = PermissionCalculator::new(Arc::new(evaluator(rules)));

    let workflow: Workflow = Workflow::new(["x1", "x2"], [("y", "addstep.y")], [WorkflowStep {
        name: "addstep".into(),
        inputs: [("x1".to_string(), "x1".to_string()), ("x2".to_string(), "x2".to_string())].into(),
        outputs: [("y".to_string(), None)].into(),
        compute_asset_id: id(ADDITION),
    }])
    .unwrap();
    let job: Job = Job::new(id("party:ns1:party1"), workflow, [("x1", id(DATA1)), ("x2", id(DATA2))]).unwrap();
    (calculator, job)
}

#[test]
fn calculates_all_workflow_values() {
    let (calculator, job) = addition_fixture();
    let permissions = calculator.calculate_permissions(&job).unwrap();
    for item in ["x1", "x2", "addstep.x1", "addstep.x2", "addstep", "addstep.y", "y"] {
        assert!(permissions.contains_key(item), "no permissions for {item}");
    }

    // The output needs both the data-side and compute-side collections, per
    // input
    assert_eq!(permissions["addstep.y"].sets(), &[
        set(&[COLLECTION1A]),
        set(&[COLLECTION2A]),
        set(&[COLLECTION1A]),
        set(&[COLLECTION2A]),
    ]);
    assert_eq!(permissions["y"], permissions["addstep.y"]);

    // The submitter may use the output, an unrelated party may not
    assert!(calculator.evaluator().may_use(&permissions["y"], &id("party:ns1:party1")));
    assert!(!calculator.evaluator().may_use(&permissions["y"], &id("party:ns2:party2")));
}

#[test]
fn permitted_sites_and_legality() {
    let (calculator, job) = addition_fixture();
    let sites: Vec<Identifier> = vec![id(SITE1), id(SITE2)];
    let permitted = calculator.permitted_sites(&job, &sites, None).unwrap();
    assert_eq!(permitted["addstep"], vec![id(SITE1)]);

    let legal = Plan { step_sites: [("addstep".to_string(), id(SITE1))].into() };
    assert!(calculator.is_legal(&job, &legal).unwrap());

    let illegal = Plan { step_sites: [("addstep".to_string(), id(SITE2))].into() };
    assert!(!calculator.is_legal(&job, &illegal).unwrap());
}

#[test]
fn cyclic_job_is_rejected() {
    // A malicious peer can hand-craft a cyclic workflow that bypasses
    // Workflow::new(); the calculator must refuse it rather than loop.
    let (calculator, mut job) = addition_fixture();
    job.workflow.steps.insert("loop_a".into(), WorkflowStep {
        name: "loop_a".into(),
        inputs: [("inp".to_string(), "loop_b.out".to_string())].into(),
        outputs: [("out".to_string(), None)].into(),
        compute_asset_id: id("asset:ns1:c:ns1:site1"),
    });
    job.workflow.steps.insert("loop_b".into(), WorkflowStep {
        name: "loop_b".into(),
        inputs: [("inp".to_string(), "loop_a.out".to_string())].into(),
        outputs: [("out".to_string(), None)].into(),
        compute_asset_id: id("asset:ns1:c:ns1:site1"),
    });
    assert!(matches!(calculator.calculate_permissions(&job), Err(PermissionError::CyclicWorkflow)));
}





/***** RULE VALUE & SIGNATURE TESTS *****/
#[test]
fn rules_roundtrip_and_hash_as_values() {
    let key = SigningKey::generate(&mut OsRng);
    let mut rule: Rule = may_access(SITE1, ASSET1);
    rule.sign(&key);

    let json: String = serde_json::to_string(&rule).unwrap();
    let back: Rule = serde_json::from_str(&json).unwrap();
    assert_eq!(back, rule);

    let copy: Rule = rule.clone();
    let hash = |rule: &Rule| {
        use std::hash::{Hash as _, Hasher as _};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        rule.hash(&mut hasher);
        hasher.finish()
    };
    assert_eq!(hash(&rule), hash(&copy));
}

#[test]
fn every_variant_signs_and_verifies() {
    let key = SigningKey::generate(&mut OsRng);
    let rules: Vec<Rule> = vec![
        in_asset_collection(ASSET1, COLLECTION1A),
        in_asset_category(ASSET1, CATEGORY1A),
        in_site_category(SITE1, SITE_CATEGORY1A),
        in_party_collection("party:ns2:party2", "party_category:ns2:coll"),
        may_access(SITE1, ASSET1),
        may_use("party:ns1:party1", ASSET1),
        result_of_data_in(ASSET1, ASSET2, "y", COLLECTION1A),
        result_of_compute_in(ASSET1, ASSET2, "y", COLLECTION2A),
    ];
    for mut rule in rules {
        assert!(!rule.has_valid_signature(&key.verifying_key()));
        rule.sign(&key);
        assert!(rule.has_valid_signature(&key.verifying_key()), "signature on {rule:?} did not verify");
    }
}

#[test]
fn signing_namespaces() {
    assert_eq!(in_asset_collection(ASSET1, COLLECTION2A).signing_namespace().unwrap(), "ns1");
    assert_eq!(in_party_collection("party:ns1:party1", "party_category:ns2:coll").signing_namespace().unwrap(), "ns2");
    assert_eq!(may_access(SITE2, ASSET1).signing_namespace().unwrap(), "ns1");
    assert_eq!(may_use("party:ns2:party2", ASSET1).signing_namespace().unwrap(), "ns1");
    assert_eq!(result_of_data_in(ASSET1, ASSET2, "y", COLLECTION1A).signing_namespace().unwrap(), "ns1");
    assert_eq!(result_of_compute_in(ASSET1, ASSET2, "y", COLLECTION2A).signing_namespace().unwrap(), "ns2");
    // A wildcard in the signing position is unsignable
    assert!(result_of_compute_in(ASSET1, "*", "y", COLLECTION2A).signing_namespace().is_err());
}

#[test]
fn tampering_invalidates_signatures() {
    let key = SigningKey::generate(&mut OsRng);
    let mut rule: Rule = may_use("party:ns1:party1", ASSET1);
    rule.sign(&key);

    if let Rule::MayUse(inner) = &mut rule {
        inner.conditions = "For any use whatsoever".into();
    }
    assert!(!rule.has_valid_signature(&key.verifying_key()));
}

#[tokio::test]
async fn tampered_update_is_discarded() {
    // Serialize a legitimate rule, flip one character in its asset field,
    // and feed the result through replication: the replica must stay at its
    // prior version.
    let key = SigningKey::generate(&mut OsRng);
    let mut rule: Rule = may_access(SITE1, ASSET1);
    rule.sign(&key);

    let tampered: Rule = serde_json::from_str(&serde_json::to_string(&rule).unwrap().replace("asset1", "asset2")).unwrap();

    let store = Arc::new(std::sync::RwLock::new(PolicyStore::new(Duration::from_millis(0))));
    store.write().unwrap().insert(tampered.clone());

    let validator = RuleValidator::new("ns1", key.verifying_key());
    let mut replica: Replica<Rule> = Replica::new(Box::new(store.clone()), Some(Box::new(validator)), None);
    replica.update().await.unwrap();
    assert_eq!(replica.version(), 0);
    assert!(replica.objects().is_empty());

    // Once the canonical store withdraws the tampered rule, updates flow
    // again
    store.write().unwrap().delete(&tampered).unwrap();
    let mut rule: Rule = may_access(SITE2, ASSET1);
    rule.sign(&key);
    store.write().unwrap().insert(rule.clone());
    replica.update().await.unwrap();
    assert_eq!(replica.version(), 3);
    assert_eq!(replica.objects().len(), 1);
    assert!(replica.objects().contains(&rule));
}

#[test]
fn foreign_namespace_rules_are_rejected() {
    let key = SigningKey::generate(&mut OsRng);
    let mut rule: Rule = may_access(SITE1, ASSET2);
    rule.sign(&key);

    // Correctly signed, but about ns2 while this replica expects ns1
    let validator = RuleValidator::new("ns1", key.verifying_key());
    use replication::ObjectValidator as _;
    assert!(!validator.is_valid(&rule));
}

#[test]
fn rules_are_values_across_churn() {
    // If a rule is deleted and a structurally identical one (same fields,
    // same deterministic signature) is reinserted, an update straddling
    // both must not mention the rule at all.
    let key = SigningKey::generate(&mut OsRng);
    let sign = |mut rule: Rule| {
        rule.sign(&key);
        rule
    };
    let rule1: Rule = sign(in_asset_collection("asset:ns1:data1:ns1:s", COLLECTION1A));
    let rule2: Rule = sign(in_party_collection("party:ns2:party2", "party_category:ns2:collection2"));
    let rule3: Rule = sign(may_access("site:ns3:site3", "asset:ns3:data3:ns3:s"));

    let mut store: PolicyStore = PolicyStore::new(Duration::from_secs(1));
    for rule in [&rule1, &rule2, &rule3] {
        store.insert(rule.clone());
    }
    let update1: ReplicaUpdate<Rule> = store.get_updates_since(0);
    assert_eq!(update1.created.iter().collect::<HashSet<_>>(), HashSet::from([&rule1, &rule2, &rule3]));

    store.delete(&rule1).unwrap();
    store.delete(&rule2).unwrap();
    store.insert(rule1.clone());

    let rule4a: Rule = sign(result_of_data_in("asset:ns4:data4:ns4:s", "asset:ns4:compute4:ns4:s", "y", "asset_collection:ns4:collection4"));
    let rule4b: Rule = sign(result_of_compute_in("asset:ns4:data4:ns4:s", "asset:ns4:compute4:ns4:s", "y", "asset_collection:ns4:collection4"));
    store.insert(rule4a.clone());
    store.insert(rule4b.clone());

    let update2: ReplicaUpdate<Rule> = store.get_updates_since(update1.to_version);
    assert_eq!(update2.deleted, vec![rule2]);
    assert_eq!(update2.created.iter().collect::<HashSet<_>>(), HashSet::from([&rule4a, &rule4b]));
}

#[test]
fn shared_resultofin_bytes() {
    // The two result-rule families sign identical bytes; the wire envelope
    // carries the discriminator.
    let data: Rule = result_of_data_in(ASSET1, ASSET2, "y", COLLECTION1A);
    let compute: Rule = result_of_compute_in(ASSET1, ASSET2, "y", COLLECTION1A);
    assert_eq!(data.signing_representation(), compute.signing_representation());
    assert_ne!(data, compute);

    let json: String = serde_json::to_string(&data).unwrap();
    assert!(json.contains("\"type\":\"ResultOfDataIn\""));
}
