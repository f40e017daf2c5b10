//  LIB.rs
//
//  Created:
//    18 Feb 2025, 14:20:08
//  Last edited:
//    30 Jul 2025, 10:44:21
//
//  Description:
//!   Defines the party and site records kept in the central registry, and
//!   the replica-backed client through which sites consult them.
//

// Declare the submodules
pub mod client;
pub mod descriptions;
pub mod replication;

// Bring the main types into the crate root for convenience
pub use client::RegistryClient;
pub use descriptions::{decode_verifying_key, encode_verifying_key, PartyDescription, RegisteredObject, RegistryError, SiteDescription};
pub use replication::{RegistryStore, RegistryValidator, SharedRegistryStore};
