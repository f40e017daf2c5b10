//  RULES.rs
//
//  Created:
//    10 Feb 2025, 08:52:13
//  Last edited:
//    30 Jul 2025, 11:12:40
//
//  Description:
//!   Defines the policy rules as a closed sum type.
//!
//!   Every rule is signed by the owner of one particular namespace: the
//!   namespace of the object the rule grants or classifies. Which field
//!   that is differs per variant, see [`Rule::signing_namespace()`].
//!
//!   Rules are values: equality and hashing cover all fields plus the
//!   signature bytes, never any replication bookkeeping. Deleting a rule
//!   and re-inserting a structurally identical one must cancel out in a
//!   replica update.
//

use enum_debug::EnumDebug;
use ident::{Identifier, IdentifierError, Signable, SignatureBytes};
use serde::{Deserialize, Serialize};


/***** ERRORS *****/
/// Describes what is wrong with a malformed rule.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Rule of type {variant} cannot be signed")]
    Unsignable {
        variant: String,
        #[source]
        source:  IdentifierError,
    },
}





/***** HELPER MACROS *****/
/// Implements [`Signable`] for a rule variant struct.
///
/// The canonical representation concatenates the named fields with `|` as
/// separator, in declaration order, UTF-8 encoded.
macro_rules! signable_impl {
    ($name:ident, $($field:ident),+) => {
        impl Signable for $name {
            fn signing_representation(&self) -> Vec<u8> {
                let mut parts: Vec<&str> = Vec::new();
                $(parts.push(self.$field.as_ref());)+
                parts.join("|").into_bytes()
            }

            #[inline]
            fn signature(&self) -> Option<&SignatureBytes> { self.signature.as_ref() }

            #[inline]
            fn set_signature(&mut self, signature: SignatureBytes) { self.signature = Some(signature); }
        }
    };
}





/***** LIBRARY *****/
/// Says that an asset is in an asset collection.
///
/// Anyone who may access the collection may access the asset.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct InAssetCollection {
    /// The asset that is in the collection.
    pub asset:      Identifier,
    /// The collection it is in.
    pub collection: Identifier,
    /// The namespace owner's signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature:  Option<SignatureBytes>,
}
signable_impl!(InAssetCollection, asset, collection);

/// Says that an asset is in an asset category.
///
/// Categories group assets for matching in `ResultOf*In` rules; unlike
/// collections, they do not pass access permissions down.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct InAssetCategory {
    /// The asset that is in the category.
    pub asset:     Identifier,
    /// The category it is in.
    pub category:  Identifier,
    /// The namespace owner's signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureBytes>,
}
signable_impl!(InAssetCategory, asset, category);

/// Says that a site is in a site category.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct InSiteCategory {
    /// The site that is in the category.
    pub site:      Identifier,
    /// The category it is in.
    pub category:  Identifier,
    /// The namespace owner's signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureBytes>,
}
signable_impl!(InSiteCategory, site, category);

/// Says that a party is in a party collection.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct InPartyCollection {
    /// The party that is in the collection.
    pub party:      Identifier,
    /// The collection it is in.
    pub collection: Identifier,
    /// The namespace owner's signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature:  Option<SignatureBytes>,
}
signable_impl!(InPartyCollection, party, collection);

/// Says that a site may access (store, read) an asset.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct MayAccess {
    /// The site that may access. May be `*` to grant every site access.
    pub site:      Identifier,
    /// The asset that may be accessed.
    pub asset:     Identifier,
    /// The namespace owner's signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureBytes>,
}
signable_impl!(MayAccess, site, asset);

/// Says that a party may use an asset (or anything it covers) under the
/// given conditions.
///
/// The conditions are an opaque legal text; they are disclosed alongside
/// results, not interpreted.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct MayUse {
    /// The party that may use. May be `*` to permit everyone.
    pub party:      Identifier,
    /// The asset that may be used.
    pub asset:      Identifier,
    /// Free-form conditions attached to the grant.
    pub conditions: String,
    /// The namespace owner's signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature:  Option<SignatureBytes>,
}
signable_impl!(MayUse, party, asset, conditions);

/// Says that results computed from a data asset are in a collection.
///
/// The same shape serves both [`Rule::ResultOfDataIn`] (stated by the data
/// asset's owner) and [`Rule::ResultOfComputeIn`] (stated by the compute
/// asset's owner); the enum tag is the wire discriminator, the signed bytes
/// are identical.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct ResultOfIn {
    /// The source data asset, or a collection covering it, or `*`.
    pub data_asset:    Identifier,
    /// The compute asset processing the data, or a category covering it,
    /// or `*`.
    pub compute_asset: Identifier,
    /// The name of the step output the rule applies to, or `*` for all.
    pub output:        String,
    /// The collection the result ends up in.
    pub collection:    Identifier,
    /// The namespace owner's signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature:     Option<SignatureBytes>,
}
signable_impl!(ResultOfIn, data_asset, compute_asset, output, collection);



/// Which family of grouping rules a closure follows.
#[derive(Clone, Copy, Debug, EnumDebug, Eq, Hash, PartialEq)]
pub enum GroupingKind {
    AssetCollection,
    AssetCategory,
    SiteCategory,
    PartyCollection,
}



/// A policy rule, as replicated between sites.
///
/// This is a closed sum so that the evaluator can match exhaustively.
#[derive(Clone, Debug, Deserialize, EnumDebug, Eq, Hash, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Rule {
    InAssetCollection(InAssetCollection),
    InAssetCategory(InAssetCategory),
    InSiteCategory(InSiteCategory),
    InPartyCollection(InPartyCollection),
    MayAccess(MayAccess),
    MayUse(MayUse),
    ResultOfDataIn(ResultOfIn),
    ResultOfComputeIn(ResultOfIn),
}
impl Rule {
    /// Returns the namespace whose owner must sign this rule.
    ///
    /// # Errors
    /// This function errors if the relevant field does not carry a
    /// namespace (a rule with a wildcard in its signing position can never
    /// validate).
    pub fn signing_namespace(&self) -> Result<&str, RuleError> {
        let res: Result<&str, IdentifierError> = match self {
            Self::InAssetCollection(rule) => rule.asset.namespace(),
            Self::InAssetCategory(rule) => rule.asset.namespace(),
            Self::InSiteCategory(rule) => rule.site.namespace(),
            Self::InPartyCollection(rule) => rule.collection.namespace(),
            Self::MayAccess(rule) => rule.asset.namespace(),
            Self::MayUse(rule) => rule.asset.namespace(),
            Self::ResultOfDataIn(rule) => rule.data_asset.namespace(),
            Self::ResultOfComputeIn(rule) => rule.compute_asset.namespace(),
        };
        res.map_err(|source| RuleError::Unsignable { variant: format!("{:?}", self.variant()), source })
    }

    /// If this is a grouping rule, returns which family it belongs to plus
    /// its `(grouped, group)` pair.
    pub fn grouping(&self) -> Option<(GroupingKind, &Identifier, &Identifier)> {
        match self {
            Self::InAssetCollection(rule) => Some((GroupingKind::AssetCollection, &rule.asset, &rule.collection)),
            Self::InAssetCategory(rule) => Some((GroupingKind::AssetCategory, &rule.asset, &rule.category)),
            Self::InSiteCategory(rule) => Some((GroupingKind::SiteCategory, &rule.site, &rule.category)),
            Self::InPartyCollection(rule) => Some((GroupingKind::PartyCollection, &rule.party, &rule.collection)),
            _ => None,
        }
    }
}
impl Signable for Rule {
    fn signing_representation(&self) -> Vec<u8> {
        match self {
            Self::InAssetCollection(rule) => rule.signing_representation(),
            Self::InAssetCategory(rule) => rule.signing_representation(),
            Self::InSiteCategory(rule) => rule.signing_representation(),
            Self::InPartyCollection(rule) => rule.signing_representation(),
            Self::MayAccess(rule) => rule.signing_representation(),
            Self::MayUse(rule) => rule.signing_representation(),
            Self::ResultOfDataIn(rule) => rule.signing_representation(),
            Self::ResultOfComputeIn(rule) => rule.signing_representation(),
        }
    }

    fn signature(&self) -> Option<&SignatureBytes> {
        match self {
            Self::InAssetCollection(rule) => rule.signature(),
            Self::InAssetCategory(rule) => rule.signature(),
            Self::InSiteCategory(rule) => rule.signature(),
            Self::InPartyCollection(rule) => rule.signature(),
            Self::MayAccess(rule) => rule.signature(),
            Self::MayUse(rule) => rule.signature(),
            Self::ResultOfDataIn(rule) => rule.signature(),
            Self::ResultOfComputeIn(rule) => rule.signature(),
        }
    }

    fn set_signature(&mut self, signature: SignatureBytes) {
        match self {
            Self::InAssetCollection(rule) => rule.set_signature(signature),
            Self::InAssetCategory(rule) => rule.set_signature(signature),
            Self::InSiteCategory(rule) => rule.set_signature(signature),
            Self::InPartyCollection(rule) => rule.set_signature(signature),
            Self::MayAccess(rule) => rule.set_signature(signature),
            Self::MayUse(rule) => rule.set_signature(signature),
            Self::ResultOfDataIn(rule) => rule.set_signature(signature),
            Self::ResultOfComputeIn(rule) => rule.set_signature(signature),
        }
    }
}
