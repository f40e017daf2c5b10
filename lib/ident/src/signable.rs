//  SIGNABLE.rs
//
//  Created:
//    04 Feb 2025, 13:26:09
//  Last edited:
//    22 Jul 2025, 10:03:37
//
//  Description:
//!   Support for cryptographically signed objects.
//!
//!   Replicated objects (policy rules, registry records) carry an Ed25519
//!   signature over a canonical byte representation. The representation is
//!   pure: it depends only on the object's fields, never on the signature
//!   itself or on any archive bookkeeping.
//

use std::fmt::{Debug, Formatter, Result as FResult};

use base64ct::Encoding as _;
use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};


/***** LIBRARY *****/
/// Raw Ed25519 signature bytes.
///
/// Serialized as standard Base64 on the wire. Compares and hashes by the
/// exact bytes, since replicated identity includes the signature.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct SignatureBytes(Vec<u8>);
impl SignatureBytes {
    /// Wraps raw signature bytes.
    #[inline]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self { Self(bytes.into()) }

    /// Provides access to the raw bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] { &self.0 }
}
impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult { write!(f, "SignatureBytes({})", base64ct::Base64::encode_string(&self.0)) }
}
impl Serialize for SignatureBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64ct::Base64::encode_string(&self.0))
    }
}
impl<'de> Deserialize<'de> for SignatureBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Base64Visitor;
        impl<'de> Visitor<'de> for Base64Visitor {
            type Value = SignatureBytes;

            fn expecting(&self, f: &mut Formatter) -> FResult { write!(f, "a Base64-encoded signature") }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                match base64ct::Base64::decode_vec(v) {
                    Ok(bytes) => Ok(SignatureBytes(bytes)),
                    Err(err) => Err(E::custom(format!("Illegal Base64: {err}"))),
                }
            }
        }
        deserializer.deserialize_str(Base64Visitor)
    }
}



/// Interface for objects that carry an Ed25519 signature over a canonical
/// representation of their fields.
pub trait Signable {
    /// Returns the canonical byte representation covered by the signature.
    ///
    /// This must contain every field of the object, and must not depend on
    /// the signature itself.
    fn signing_representation(&self) -> Vec<u8>;

    /// Returns the signature currently attached to this object, if any.
    fn signature(&self) -> Option<&SignatureBytes>;

    /// Attaches a signature to this object.
    fn set_signature(&mut self, signature: SignatureBytes);


    /// Signs the object with the given private key, replacing any previous
    /// signature.
    fn sign(&mut self, key: &SigningKey) {
        let signature = key.sign(&self.signing_representation());
        self.set_signature(SignatureBytes::new(signature.to_bytes().to_vec()));
    }

    /// Verifies the signature on this object against the given public key.
    ///
    /// # Returns
    /// True iff a signature is present and valid.
    fn has_valid_signature(&self, key: &VerifyingKey) -> bool {
        let signature: &SignatureBytes = match self.signature() {
            Some(signature) => signature,
            None => return false,
        };
        let signature: ed25519_dalek::Signature = match ed25519_dalek::Signature::from_slice(signature.as_bytes()) {
            Ok(signature) => signature,
            Err(_) => return false,
        };
        key.verify_strict(&self.signing_representation(), &signature).is_ok()
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    struct Message {
        text: String,
        signature: Option<SignatureBytes>,
    }
    impl Signable for Message {
        fn signing_representation(&self) -> Vec<u8> { self.text.as_bytes().to_vec() }

        fn signature(&self) -> Option<&SignatureBytes> { self.signature.as_ref() }

        fn set_signature(&mut self, signature: SignatureBytes) { self.signature = Some(signature); }
    }

    #[test]
    fn sign_and_verify() {
        let key = SigningKey::generate(&mut OsRng);
        let mut msg = Message { text: "hello".into(), signature: None };
        assert!(!msg.has_valid_signature(&key.verifying_key()));

        msg.sign(&key);
        assert!(msg.has_valid_signature(&key.verifying_key()));

        // Any field change invalidates the signature
        msg.text = "hellp".into();
        assert!(!msg.has_valid_signature(&key.verifying_key()));

        // And so does verifying with someone else's key
        msg.text = "hello".into();
        let other = SigningKey::generate(&mut OsRng);
        assert!(!msg.has_valid_signature(&other.verifying_key()));
    }

    #[test]
    fn signature_bytes_roundtrip() {
        let sig = SignatureBytes::new(vec![0u8, 1, 2, 254, 255]);
        let json = serde_json::to_string(&sig).unwrap();
        let back: SignatureBytes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sig);
    }
}
