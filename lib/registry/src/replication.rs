//  REPLICATION.rs
//
//  Created:
//    18 Feb 2025, 16:02:44
//  Last edited:
//    31 Jul 2025, 18:40:10
//
//  Description:
//!   Support for replication of the registry.
//

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ed25519_dalek::VerifyingKey;
use ident::Signable as _;
use log::warn;
use replication::{CanonicalStore, ObjectValidator};

use crate::descriptions::RegisteredObject;


/***** LIBRARY *****/
/// The canonical store behind the central registry.
pub type RegistryStore = CanonicalStore<RegisteredObject>;

/// A registry store as shared between the replication endpoint and the
/// registration API.
pub type SharedRegistryStore = Arc<RwLock<RegistryStore>>;



/// Validates incoming registry records by checking their signatures.
///
/// Party records are self-signed with the main key they carry; site records
/// must be signed by their owning party's main key. The validator remembers
/// the keys of every party record it has accepted, so that site records can
/// be checked even when they arrive in the same update batch as their owner
/// (batches preserve the registry's insertion order, and parties register
/// before their sites).
pub struct RegistryValidator {
    /// Main keys of accepted parties, by party id.
    party_keys: RwLock<HashMap<String, VerifyingKey>>,
}
impl RegistryValidator {
    /// Creates a new RegistryValidator that doesn't know any parties yet.
    #[inline]
    pub fn new() -> Self { Self { party_keys: RwLock::new(HashMap::new()) } }
}
impl Default for RegistryValidator {
    #[inline]
    fn default() -> Self { Self::new() }
}
impl ObjectValidator<RegisteredObject> for RegistryValidator {
    fn is_valid(&self, object: &RegisteredObject) -> bool {
        match object {
            RegisteredObject::Party(party) => {
                let key: VerifyingKey = match party.main_key() {
                    Ok(key) => key,
                    Err(err) => {
                        warn!("Party record {} carries an unusable main key: {err}", party.id);
                        return false;
                    },
                };
                if !party.has_valid_signature(&key) {
                    warn!("Party record {} is not correctly self-signed", party.id);
                    return false;
                }
                self.party_keys.write().unwrap().insert(party.id.as_str().into(), key);
                true
            },

            RegisteredObject::Site(site) => {
                if let Err(err) = site.validate() {
                    warn!("Site record {} is inconsistent: {err}", site.id);
                    return false;
                }
                let keys = self.party_keys.read().unwrap();
                let key: &VerifyingKey = match keys.get(site.owner_id.as_str()) {
                    Some(key) => key,
                    None => {
                        warn!("Site record {} is owned by unknown party {}", site.id, site.owner_id);
                        return false;
                    },
                };
                if !site.has_valid_signature(key) {
                    warn!("Site record {} is not signed by its owner {}", site.id, site.owner_id);
                    return false;
                }
                true
            },
        }
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;
    use ident::{Identifier, Signable as _};
    use rand::rngs::OsRng;

    use super::*;
    use crate::descriptions::{encode_verifying_key, PartyDescription, SiteDescription};

    fn id(raw: &str) -> Identifier { Identifier::new(raw).unwrap() }

    #[test]
    fn validates_party_then_site() {
        let key = SigningKey::generate(&mut OsRng);
        let mut party = PartyDescription {
            id: id("party:ns1:party1"),
            namespace: "ns1".into(),
            main_certificate: encode_verifying_key(&key.verifying_key()),
            user_ca_certificate: encode_verifying_key(&key.verifying_key()),
            user_certificates: vec![],
            signature: None,
        };
        party.sign(&key);
        let mut site = SiteDescription {
            id: id("site:ns1:site1"),
            owner_id: id("party:ns1:party1"),
            admin_id: id("party:ns1:party1"),
            endpoint: "https://site1.example.org".into(),
            https_certificate: "cert".into(),
            has_runner: true,
            has_store: true,
            has_policies: true,
            signature: None,
        };
        site.sign(&key);

        let validator = RegistryValidator::new();

        // Without its party, the site is not acceptable
        assert!(!validator.is_valid(&RegisteredObject::Site(site.clone())));

        // After the party has been seen, it is
        assert!(validator.is_valid(&RegisteredObject::Party(party.clone())));
        assert!(validator.is_valid(&RegisteredObject::Site(site.clone())));

        // A site signed by some other key is not
        let other = SigningKey::generate(&mut OsRng);
        let mut forged: SiteDescription = site.clone();
        forged.endpoint = "https://evil.example.org".into();
        forged.sign(&other);
        assert!(!validator.is_valid(&RegisteredObject::Site(forged)));

        // Neither is a party record whose self-signature doesn't match
        let mut tampered: PartyDescription = party.clone();
        tampered.namespace = "ns2".into();
        assert!(!validator.is_valid(&RegisteredObject::Party(tampered)));
    }
}
