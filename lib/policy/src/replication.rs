//  REPLICATION.rs
//
//  Created:
//    11 Feb 2025, 15:41:27
//  Last edited:
//    22 Jul 2025, 13:58:06
//
//  Description:
//!   Support for replication of policy rules.
//

use std::sync::{Arc, RwLock};

use ed25519_dalek::VerifyingKey;
use ident::Signable as _;
use log::warn;
use replication::{CanonicalStore, ObjectValidator};

use crate::rules::Rule;


/***** LIBRARY *****/
/// A canonical store of policy rules, as served by a site's policy server.
pub type PolicyStore = CanonicalStore<Rule>;

/// A policy store as shared between the policy server and the site's
/// internal administration API.
pub type SharedPolicyStore = Arc<RwLock<PolicyStore>>;



/// Validates incoming policy rules by checking their signatures.
///
/// A rule replica holds the rules of exactly one namespace, so a rule is
/// valid iff it claims that namespace and carries a valid signature by the
/// namespace owner's key.
pub struct RuleValidator {
    /// The namespace to expect rules for.
    namespace: String,
    /// The namespace owner's public key.
    key: VerifyingKey,
}
impl RuleValidator {
    /// Creates a new RuleValidator for the given namespace.
    ///
    /// # Arguments
    /// - `namespace`: The namespace to expect rules for.
    /// - `key`: The key to validate rules with.
    #[inline]
    pub fn new(namespace: impl Into<String>, key: VerifyingKey) -> Self { Self { namespace: namespace.into(), key } }
}
impl ObjectValidator<Rule> for RuleValidator {
    fn is_valid(&self, rule: &Rule) -> bool {
        let namespace: &str = match rule.signing_namespace() {
            Ok(namespace) => namespace,
            Err(err) => {
                warn!("Rule {rule:?} is invalid: {err}");
                return false;
            },
        };
        if namespace != self.namespace {
            warn!("Rule {rule:?} is invalid due to a namespace mismatch: got {namespace}, expected {}", self.namespace);
            return false;
        }
        rule.has_valid_signature(&self.key)
    }
}
