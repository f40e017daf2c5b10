//  DESCRIPTIONS.rs
//
//  Created:
//    18 Feb 2025, 14:28:51
//  Last edited:
//    31 Jul 2025, 18:31:47
//
//  Description:
//!   Value-typed descriptions of parties and sites.
//!
//!   These are the records replicated from the central registry to every
//!   site. Like policy rules, they are values: equality and hashing cover
//!   all fields plus the signature, so that churn in the registry cancels
//!   out in replica updates.
//!
//!   Key material travels as PEM-encoded Ed25519 public keys; certificate
//!   issuance itself is the identity layer's business, not ours.
//

use enum_debug::EnumDebug;
use ed25519_dalek::pkcs8::{DecodePublicKey as _, EncodePublicKey as _, LineEnding};
use ed25519_dalek::VerifyingKey;
use ident::{Identifier, Signable, SignatureBytes};
use serde::{Deserialize, Serialize};


/***** ERRORS *****/
/// Describes what is wrong with a registry record or a key in it.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Site '{id}' declares a runner but no store")]
    RunnerWithoutStore { id: Identifier },
    #[error("Illegal Ed25519 public key PEM")]
    IllegalKey {
        #[source]
        source: ed25519_dalek::pkcs8::spki::Error,
    },
    #[error("No party with namespace '{namespace}' known")]
    UnknownNamespace { namespace: String },
    #[error("Party '{id}' not found")]
    UnknownParty { id: Identifier },
    #[error("Site '{id}' not found")]
    UnknownSite { id: Identifier },
}





/***** HELPER FUNCTIONS *****/
/// Encodes a verifying key as SPKI PEM, the form in which keys are carried
/// in registry records.
pub fn encode_verifying_key(key: &VerifyingKey) -> String {
    // Ed25519 keys are always encodable
    key.to_public_key_pem(LineEnding::LF).unwrap_or_default()
}

/// Decodes a verifying key from its SPKI PEM form.
///
/// # Errors
/// This function errors if the PEM does not contain a valid Ed25519 public
/// key.
pub fn decode_verifying_key(pem: &str) -> Result<VerifyingKey, RegistryError> {
    VerifyingKey::from_public_key_pem(pem).map_err(|source| RegistryError::IllegalKey { source })
}





/***** LIBRARY *****/
/// Describes a party to the rest of the mesh.
///
/// Self-signed with the party's own main key; whether that key is to be
/// trusted at all is decided by the registry's registration procedure, not
/// by this record.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct PartyDescription {
    /// The id of the party.
    pub id: Identifier,
    /// The namespace owned by this party. Rules about objects in this
    /// namespace must be signed with the main key below.
    pub namespace: String,
    /// PEM-encoded key for verifying policies and registry records.
    pub main_certificate: String,
    /// PEM-encoded key with which the party signs its users' certificates.
    pub user_ca_certificate: String,
    /// PEM-encoded keys of the party's users, for verifying workflow
    /// execution requests.
    pub user_certificates: Vec<String>,
    /// The party's own signature over this record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureBytes>,
}
impl PartyDescription {
    /// Returns the party's main verification key.
    ///
    /// # Errors
    /// This function errors if the record's key PEM is illegal.
    #[inline]
    pub fn main_key(&self) -> Result<VerifyingKey, RegistryError> { decode_verifying_key(&self.main_certificate) }
}
impl Signable for PartyDescription {
    fn signing_representation(&self) -> Vec<u8> {
        let mut repr: String = format!("PartyDescription|{}|{}|{}|{}", self.id, self.namespace, self.main_certificate, self.user_ca_certificate);
        for cert in &self.user_certificates {
            repr.push('|');
            repr.push_str(cert);
        }
        repr.into_bytes()
    }

    #[inline]
    fn signature(&self) -> Option<&SignatureBytes> { self.signature.as_ref() }

    #[inline]
    fn set_signature(&mut self, signature: SignatureBytes) { self.signature = Some(signature); }
}



/// Describes a site to the rest of the mesh.
///
/// Signed by the owning party's main key.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct SiteDescription {
    /// The id of the site.
    pub id: Identifier,
    /// The party which owns this site.
    pub owner_id: Identifier,
    /// The party which administrates this site.
    pub admin_id: Identifier,
    /// The HTTPS endpoint at which the site's API is reachable.
    pub endpoint: String,
    /// PEM-encoded certificate for the site's HTTPS endpoint.
    pub https_certificate: String,
    /// Whether the site runs workflow steps.
    pub has_runner: bool,
    /// Whether the site stores assets.
    pub has_store: bool,
    /// Whether the site serves policy rules.
    pub has_policies: bool,
    /// The owning party's signature over this record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureBytes>,
}
impl SiteDescription {
    /// Checks the record's internal invariant: a site with a runner needs a
    /// store to put the results in.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.has_runner && !self.has_store {
            return Err(RegistryError::RunnerWithoutStore { id: self.id.clone() });
        }
        Ok(())
    }
}
impl Signable for SiteDescription {
    fn signing_representation(&self) -> Vec<u8> {
        format!(
            "SiteDescription|{}|{}|{}|{}|{}|{}|{}|{}",
            self.id, self.owner_id, self.admin_id, self.endpoint, self.https_certificate, self.has_runner, self.has_store, self.has_policies
        )
        .into_bytes()
    }

    #[inline]
    fn signature(&self) -> Option<&SignatureBytes> { self.signature.as_ref() }

    #[inline]
    fn set_signature(&mut self, signature: SignatureBytes) { self.signature = Some(signature); }
}



/// Any record in the registry.
///
/// Discriminated structurally on the wire: party and site records share no
/// field layout.
#[derive(Clone, Debug, Deserialize, EnumDebug, Eq, Hash, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RegisteredObject {
    Party(PartyDescription),
    Site(SiteDescription),
}
impl Signable for RegisteredObject {
    fn signing_representation(&self) -> Vec<u8> {
        match self {
            Self::Party(party) => party.signing_representation(),
            Self::Site(site) => site.signing_representation(),
        }
    }

    fn signature(&self) -> Option<&SignatureBytes> {
        match self {
            Self::Party(party) => party.signature(),
            Self::Site(site) => site.signature(),
        }
    }

    fn set_signature(&mut self, signature: SignatureBytes) {
        match self {
            Self::Party(party) => party.set_signature(signature),
            Self::Site(site) => site.set_signature(signature),
        }
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    use super::*;

    fn id(raw: &str) -> Identifier { Identifier::new(raw).unwrap() }

    fn party(key: &SigningKey) -> PartyDescription {
        let mut party = PartyDescription {
            id: id("party:ns1:party1"),
            namespace: "ns1".into(),
            main_certificate: encode_verifying_key(&key.verifying_key()),
            user_ca_certificate: encode_verifying_key(&key.verifying_key()),
            user_certificates: vec![],
            signature: None,
        };
        party.sign(key);
        party
    }

    fn site(key: &SigningKey) -> SiteDescription {
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
        site.sign(key);
        site
    }

    #[test]
    fn parties_are_values() {
        let key = SigningKey::generate(&mut OsRng);
        let party1: PartyDescription = party(&key);
        let party2: PartyDescription = party(&key);
        // Ed25519 is deterministic, so independently built records are
        // byte-for-byte equal, signature included
        assert_eq!(party1, party2);
        assert!(party1.has_valid_signature(&key.verifying_key()));

        let json: String = serde_json::to_string(&RegisteredObject::Party(party1.clone())).unwrap();
        let back: RegisteredObject = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RegisteredObject::Party(party1));
    }

    #[test]
    fn sites_are_values() {
        let key = SigningKey::generate(&mut OsRng);
        let site1: SiteDescription = site(&key);
        let site2: SiteDescription = site(&key);
        assert_eq!(site1, site2);
        assert!(site1.has_valid_signature(&key.verifying_key()));

        let json: String = serde_json::to_string(&RegisteredObject::Site(site1.clone())).unwrap();
        let back: RegisteredObject = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RegisteredObject::Site(site1));
    }

    #[test]
    fn runner_requires_store() {
        let key = SigningKey::generate(&mut OsRng);
        let mut desc: SiteDescription = site(&key);
        desc.has_store = false;
        assert!(matches!(desc.validate(), Err(RegistryError::RunnerWithoutStore { .. })));
    }

    #[test]
    fn key_pem_roundtrips() {
        let key = SigningKey::generate(&mut OsRng);
        let pem: String = encode_verifying_key(&key.verifying_key());
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert_eq!(decode_verifying_key(&pem).unwrap(), key.verifying_key());
        assert!(decode_verifying_key("not a key").is_err());
    }
}
