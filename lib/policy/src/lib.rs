//  LIB.rs
//
//  Created:
//    10 Feb 2025, 08:44:51
//  Last edited:
//    30 Jul 2025, 11:12:40
//
//  Description:
//!   Defines the signed policy rules exchanged between sites and the
//!   inference engine that turns a set of rules into access decisions for
//!   assets, workflow steps and workflow results.
//

// Declare the submodules
pub mod evaluation;
pub mod replication;
pub mod rules;
#[cfg(test)]
pub mod tests;

// Bring the main types into the crate root for convenience
pub use evaluation::{PermissionCalculator, PermissionError, Permissions, PolicyCollection, PolicyEvaluator};
pub use replication::{PolicyStore, RuleValidator, SharedPolicyStore};
pub use rules::{GroupingKind, Rule, RuleError};
