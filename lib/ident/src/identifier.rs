//  IDENTIFIER.rs
//
//  Created:
//    04 Feb 2025, 11:08:31
//  Last edited:
//    29 Jul 2025, 14:17:55
//
//  Description:
//!   Defines the [`Identifier`], the structurally validated name by which
//!   parties, sites, assets, groupings and workflow results are known
//!   throughout the mesh.
//

use std::fmt::{Display, Formatter, Result as FResult};
use std::str::FromStr;

use enum_debug::EnumDebug;
use serde::{Deserialize, Serialize};


/***** ERRORS *****/
/// Describes what went wrong when parsing or examining an [`Identifier`].
#[derive(Debug, thiserror::Error)]
pub enum IdentifierError {
    #[error("Unknown identifier kind '{kind}' in '{raw}'")]
    UnknownKind { raw: String, kind: String },
    #[error("Too few or too many segments in '{raw}'")]
    SegmentCount { raw: String },
    #[error("Invalid character in identifier segment '{segment}' of '{raw}'")]
    InvalidSegment { raw: String, segment: String },
    #[error("'{raw}' does not carry a {what}")]
    NotApplicable { raw: String, what: &'static str },
}





/***** AUXILLARY *****/
/// Enumerates the kinds of [`Identifier`]s, one per prefix.
#[derive(Clone, Copy, Debug, EnumDebug, Eq, Hash, PartialEq)]
pub enum Kind {
    /// `party:<ns>:<name>`
    Party,
    /// `party_category:<ns>:<name>`
    PartyCategory,
    /// `site:<ns>:<name>`
    Site,
    /// `site_category:<ns>:<name>`
    SiteCategory,
    /// `asset:<ns>:<name>:<owning_site_ns>:<owning_site_name>`
    Asset,
    /// `asset_collection:<ns>:<name>`
    AssetCollection,
    /// `asset_category:<ns>:<name>`
    AssetCategory,
    /// `result:<hex_hash>`
    Result,
    /// The literal `*`, only legal inside policy rules.
    Wildcard,
}
impl Kind {
    /// Maps an identifier's first segment to its kind.
    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "party" => Some(Self::Party),
            "party_category" => Some(Self::PartyCategory),
            "site" => Some(Self::Site),
            "site_category" => Some(Self::SiteCategory),
            "asset" => Some(Self::Asset),
            "asset_collection" => Some(Self::AssetCollection),
            "asset_category" => Some(Self::AssetCategory),
            "result" => Some(Self::Result),
            _ => None,
        }
    }

    /// Returns the number of `:`-separated segments this kind requires,
    /// including the prefix itself.
    fn num_segments(&self) -> usize {
        match self {
            Self::Asset => 5,
            Self::Result => 2,
            Self::Wildcard => 1,
            _ => 3,
        }
    }
}





/***** LIBRARY *****/
/// A structurally validated identifier.
///
/// An identifier is a string of one of the following forms:
/// - `party:<ns>:<name>`
/// - `party_category:<ns>:<name>`
/// - `site:<ns>:<name>`
/// - `site_category:<ns>:<name>`
/// - `asset:<ns>:<name>:<owning_site_ns>:<owning_site_name>`
/// - `asset_collection:<ns>:<name>`
/// - `asset_category:<ns>:<name>`
/// - `result:<hex_hash>`
/// - the literal `*`, used as a wildcard inside rules.
///
/// Every segment matches `[A-Za-z0-9_.-]*`. The `<ns>` segment is the
/// identifier's _namespace_: the authority whose owner must sign any rule
/// about the identified object.
///
/// Identifiers compare, hash and order by their full string representation.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);
impl Identifier {
    /// Parses and validates an identifier.
    ///
    /// # Arguments
    /// - `raw`: The string to parse.
    ///
    /// # Returns
    /// A new Identifier wrapping the given string.
    ///
    /// # Errors
    /// This function errors if the string is not a well-formed identifier of
    /// any of the known kinds.
    pub fn new(raw: impl Into<String>) -> Result<Self, IdentifierError> {
        let raw: String = raw.into();
        if raw == "*" {
            return Ok(Self(raw));
        }

        let segments: Vec<&str> = raw.split(':').collect();
        let kind: Kind = match Kind::from_prefix(segments[0]) {
            Some(kind) => kind,
            None => return Err(IdentifierError::UnknownKind { raw: raw.clone(), kind: segments[0].into() }),
        };
        if segments.len() != kind.num_segments() {
            return Err(IdentifierError::SegmentCount { raw: raw.clone() });
        }
        for segment in segments {
            if !segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-') {
                let segment: String = segment.into();
                return Err(IdentifierError::InvalidSegment { raw: raw.clone(), segment });
            }
        }
        Ok(Self(raw))
    }

    /// Returns the wildcard identifier `*`.
    #[inline]
    pub fn wildcard() -> Self { Self("*".into()) }

    /// Builds the `result:<hex_hash>` identifier for a workflow result with
    /// the given id hash.
    ///
    /// # Errors
    /// This function errors if the hash contains characters outside the
    /// identifier segment alphabet.
    #[inline]
    pub fn for_result(id_hash: &str) -> Result<Self, IdentifierError> { Self::new(format!("result:{id_hash}")) }

    /// Returns the kind of this identifier.
    pub fn kind(&self) -> Kind {
        if self.0 == "*" {
            return Kind::Wildcard;
        }
        // The constructor only lets known prefixes through
        Kind::from_prefix(self.0.split(':').next().unwrap_or("")).unwrap_or(Kind::Wildcard)
    }

    /// Checks whether this is the wildcard identifier.
    #[inline]
    pub fn is_wildcard(&self) -> bool { self.0 == "*" }

    /// Provides access to the underlying string.
    #[inline]
    pub fn as_str(&self) -> &str { &self.0 }

    /// Returns the namespace segment of this identifier.
    ///
    /// # Errors
    /// This function errors for `result:` identifiers and the wildcard,
    /// which do not carry a namespace.
    pub fn namespace(&self) -> Result<&str, IdentifierError> {
        match self.kind() {
            Kind::Result | Kind::Wildcard => Err(IdentifierError::NotApplicable { raw: self.0.clone(), what: "namespace" }),
            _ => Ok(self.segment(1)),
        }
    }

    /// Returns the name segment of this identifier.
    ///
    /// # Errors
    /// This function errors for `result:` identifiers and the wildcard,
    /// which do not carry a name.
    pub fn name(&self) -> Result<&str, IdentifierError> {
        match self.kind() {
            Kind::Result | Kind::Wildcard => Err(IdentifierError::NotApplicable { raw: self.0.clone(), what: "name" }),
            _ => Ok(self.segment(2)),
        }
    }

    /// Returns the identifier of the site storing this asset.
    ///
    /// # Returns
    /// A `site:` identifier built from the asset's fourth and fifth
    /// segments.
    ///
    /// # Errors
    /// This function errors if this is not a concrete `asset:` identifier.
    pub fn location(&self) -> Result<Identifier, IdentifierError> {
        if self.kind() != Kind::Asset {
            return Err(IdentifierError::NotApplicable { raw: self.0.clone(), what: "location" });
        }
        Identifier::new(format!("site:{}:{}", self.segment(3), self.segment(4)))
    }

    /// Returns the `i`th segment, panicking on out-of-bounds.
    ///
    /// Only called for indices the constructor guarantees to exist.
    #[inline]
    fn segment(&self, i: usize) -> &str { self.0.split(':').nth(i).unwrap() }
}

impl Display for Identifier {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult { write!(f, "{}", self.0) }
}
impl FromStr for Identifier {
    type Err = IdentifierError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::new(s) }
}
impl TryFrom<String> for Identifier {
    type Error = IdentifierError;

    #[inline]
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::new(value) }
}
impl TryFrom<&str> for Identifier {
    type Error = IdentifierError;

    #[inline]
    fn try_from(value: &str) -> Result<Self, Self::Error> { Self::new(value) }
}
impl From<Identifier> for String {
    #[inline]
    fn from(value: Identifier) -> String { value.0 }
}
impl AsRef<str> for Identifier {
    #[inline]
    fn as_ref(&self) -> &str { &self.0 }
}
impl PartialEq<str> for Identifier {
    #[inline]
    fn eq(&self, other: &str) -> bool { self.0 == other }
}
impl PartialEq<&str> for Identifier {
    #[inline]
    fn eq(&self, other: &&str) -> bool { self.0 == *other }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_all_kinds() {
        for raw in [
            "party:ns1:party1",
            "party_category:ns1:cat1",
            "site:ns1:site1",
            "site_category:ns1:cat1",
            "asset:ns1:data1:ns1:site1",
            "asset_collection:ns1:coll1",
            "asset_category:ns1:cat1",
            "result:0a1b2c3d",
            "*",
        ] {
            let id = Identifier::new(raw).unwrap_or_else(|err| panic!("'{raw}' rejected: {err}"));
            assert_eq!(id.as_str(), raw);
        }
    }

    #[test]
    fn rejects_malformed() {
        assert!(matches!(Identifier::new("group:ns:foo"), Err(IdentifierError::UnknownKind { .. })));
        assert!(matches!(Identifier::new("party:ns"), Err(IdentifierError::SegmentCount { .. })));
        assert!(matches!(Identifier::new("asset:ns:name"), Err(IdentifierError::SegmentCount { .. })));
        assert!(matches!(Identifier::new("site:ns:na me"), Err(IdentifierError::InvalidSegment { .. })));
        assert!(matches!(Identifier::new("site:ns:na/me"), Err(IdentifierError::InvalidSegment { .. })));
    }

    #[test]
    fn accessors() {
        let asset = Identifier::new("asset:ns1:data1:ns2:site2").unwrap();
        assert_eq!(asset.kind(), Kind::Asset);
        assert_eq!(asset.namespace().unwrap(), "ns1");
        assert_eq!(asset.name().unwrap(), "data1");
        assert_eq!(asset.location().unwrap().as_str(), "site:ns2:site2");

        let result = Identifier::new("result:abcd").unwrap();
        assert!(matches!(result.namespace(), Err(IdentifierError::NotApplicable { .. })));
        assert!(matches!(result.name(), Err(IdentifierError::NotApplicable { .. })));

        let site = Identifier::new("site:ns1:site1").unwrap();
        assert!(matches!(site.location(), Err(IdentifierError::NotApplicable { .. })));
    }

    #[test]
    fn serde_roundtrip() {
        let id = Identifier::new("asset:ns1:data1:ns1:site1").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"asset:ns1:data1:ns1:site1\"");
        let back: Identifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        // Deserialization must go through validation
        assert!(serde_json::from_str::<Identifier>("\"nonsense:ns:x\"").is_err());
    }
}
