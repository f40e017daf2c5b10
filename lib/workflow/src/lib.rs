//  LIB.rs
//
//  Created:
//    13 Feb 2025, 10:31:25
//  Last edited:
//    30 Jul 2025, 09:12:51
//
//  Description:
//!   Defines the workflow representation shared by the planner, the
//!   orchestrator and the step runners.
//

// Declare the submodules
pub mod spec;
#[cfg(test)]
pub mod tests;

// Bring the main types into the crate root for convenience
pub use spec::{ExecutionRequest, Job, Plan, Workflow, WorkflowError, WorkflowStep};
