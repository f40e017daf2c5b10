//  LIB.rs
//
//  Created:
//    06 Feb 2025, 09:55:12
//  Last edited:
//    30 Jul 2025, 15:48:29
//
//  Description:
//!   A simple data replication system.
//!
//!   A [`CanonicalStore`] is the authoritative, monotonically versioned set
//!   of objects at one site; a [`Replica`] is a pull-based cache of such a
//!   store at another site. Replicas request deltas
//!   ([`ReplicaUpdate`]s) rather than full snapshots, and may validate
//!   every received object (e.g. a signature check) before applying
//!   anything.
//!
//!   Only low-velocity data is replicated this way (policy rules, party and
//!   site records), so a single coarse lock around each store is plenty.
//

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};


/***** ERRORS *****/
/// Describes errors raised by [`CanonicalStore`] mutations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Object not found")]
    NotFound,
}

/// Describes errors raised when fetching updates from an [`UpdateSource`].
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Failed to reach the update source")]
    Unreachable {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("The update source returned a malformed update")]
    Malformed {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}





/***** AUXILLARY *****/
/// Wrapper for an object in a [`ReplicableArchive`].
///
/// The version stamps are archive bookkeeping only; they never participate
/// in the wrapped object's identity.
#[derive(Clone, Debug)]
pub struct Replicable<T> {
    /// The first version from which this object exists.
    pub created: u64,
    /// The first version from which this object no longer exists, if any.
    pub deleted: Option<u64>,
    /// The wrapped object.
    pub object:  T,
}

/// Stores all versions of a replicated object set, including deleted
/// records. This models the raw database behind a [`CanonicalStore`].
#[derive(Clone, Debug)]
pub struct ReplicableArchive<T> {
    /// The stored records, encoding all versions of the data set.
    pub records: Vec<Replicable<T>>,
    /// The current (latest) version of the data.
    pub version: u64,
}
impl<T> Default for ReplicableArchive<T> {
    #[inline]
    fn default() -> Self { Self { records: Vec::new(), version: 0 } }
}

/// A delta between two versions of a [`CanonicalStore`].
///
/// `created` preserves the store's insertion order, which receivers may rely
/// on when objects in one batch reference each other.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReplicaUpdate<T> {
    /// The version this update applies to.
    pub from_version: u64,
    /// The version this update updates to.
    pub to_version:   u64,
    /// Time until which the new version is to be considered fresh.
    pub valid_until:  DateTime<Utc>,
    /// Objects that were created in the interval.
    pub created:      Vec<T>,
    /// Objects that were deleted in the interval.
    pub deleted:      Vec<T>,
}

/// Interface for anything a [`Replica`] can pull updates from: a local
/// [`CanonicalStore`] or a client for a remote site's `/updates` endpoint.
#[async_trait]
pub trait UpdateSource<T>: Send + Sync {
    /// Returns the delta from the given version to the source's current
    /// version.
    ///
    /// # Arguments
    /// - `from_version`: A version received from a previous update, or 0
    ///   for a fresh replica.
    async fn get_updates_since(&self, from_version: u64) -> Result<ReplicaUpdate<T>, SourceError>;
}

/// Validates objects received in a replica update before they are applied.
pub trait ObjectValidator<T>: Send + Sync {
    /// Returns true iff the object may be accepted into the replica.
    fn is_valid(&self, object: &T) -> bool;
}

/// Called by [`Replica::update()`] with the applied changes.
pub type OnUpdate<T> = Box<dyn Fn(&[T], &[T]) + Send + Sync>;





/***** LIBRARY *****/
/// The authoritative, versioned multiset of replicated objects at one site.
///
/// Every insert or delete bumps the archive version by one; deltas between
/// any two versions can be reconstructed from the archive.
#[derive(Clone, Debug)]
pub struct CanonicalStore<T> {
    /// The archive holding all records, live and dead.
    archive: ReplicableArchive<T>,
    /// How long replicas may consider an update fresh.
    max_lag: Duration,
}
impl<T: Clone + PartialEq> CanonicalStore<T> {
    /// Creates an empty store.
    ///
    /// # Arguments
    /// - `max_lag`: Maximum time replicas may be out-of-date, advertised to
    ///   them as the `valid_until` of every update.
    #[inline]
    pub fn new(max_lag: Duration) -> Self { Self { archive: ReplicableArchive::default(), max_lag } }

    /// Returns the current archive version.
    #[inline]
    pub fn version(&self) -> u64 { self.archive.version }

    /// Iterates over the currently live objects.
    pub fn objects(&self) -> impl Iterator<Item = &T> { self.archive.records.iter().filter(|rec| rec.deleted.is_none()).map(|rec| &rec.object) }

    /// Inserts an object, bumping the version.
    pub fn insert(&mut self, object: T) {
        let version: u64 = self.archive.version + 1;
        self.archive.records.push(Replicable { created: version, deleted: None, object });
        self.archive.version = version;
    }

    /// Deletes an object, bumping the version.
    ///
    /// The first live record that compares equal to the given object is
    /// stamped as deleted.
    ///
    /// # Errors
    /// This function errors if no live record matches.
    pub fn delete(&mut self, object: &T) -> Result<(), StoreError> {
        let version: u64 = self.archive.version + 1;
        match self.archive.records.iter_mut().find(|rec| rec.deleted.is_none() && rec.object == *object) {
            Some(rec) => rec.deleted = Some(version),
            None => return Err(StoreError::NotFound),
        }
        self.archive.version = version;
        Ok(())
    }

    /// Computes the delta from the given version to the current one.
    ///
    /// An object that was created and deleted (or deleted and re-created)
    /// within the interval appears on neither side of the delta.
    pub fn get_updates_since(&self, from_version: u64) -> ReplicaUpdate<T> {
        let to_version: u64 = self.archive.version;

        let mut created: Vec<T> = self
            .archive
            .records
            .iter()
            .filter(|rec| from_version < rec.created && rec.created <= to_version && rec.deleted.map_or(true, |del| del > to_version))
            .map(|rec| rec.object.clone())
            .collect();
        let mut deleted: Vec<T> = self
            .archive
            .records
            .iter()
            .filter(|rec| rec.created <= from_version && rec.deleted.map_or(false, |del| from_version < del && del <= to_version))
            .map(|rec| rec.object.clone())
            .collect();

        // Cancel out objects that were deleted and re-created as values
        let readded: Vec<T> = created.iter().filter(|obj| deleted.contains(obj)).cloned().collect();
        created.retain(|obj| !readded.contains(obj));
        deleted.retain(|obj| !readded.contains(obj));

        let valid_until: DateTime<Utc> = Utc::now() + self.max_lag;
        ReplicaUpdate { from_version, to_version, valid_until, created, deleted }
    }
}

#[async_trait]
impl<T: Clone + PartialEq + Send + Sync> UpdateSource<T> for Arc<RwLock<CanonicalStore<T>>> {
    async fn get_updates_since(&self, from_version: u64) -> Result<ReplicaUpdate<T>, SourceError> {
        Ok(self.read().unwrap().get_updates_since(from_version))
    }
}



/// A pull-based cache of a remote [`CanonicalStore`].
///
/// Objects are validated before anything is applied; a single invalid
/// object discards the entire update and leaves the replica at its previous
/// version. Updates are applied atomically as far as observers of
/// [`Replica::objects()`] are concerned.
pub struct Replica<T> {
    /// The currently live set of replicated objects.
    objects: HashSet<T>,
    /// The version of the canonical store this replica reflects.
    version: u64,
    /// Time until which this replica considers itself fresh.
    valid_until: DateTime<Utc>,

    /// Where updates come from.
    source:    Box<dyn UpdateSource<T>>,
    /// Optional per-object validation hook.
    validator: Option<Box<dyn ObjectValidator<T>>>,
    /// Optional change notification hook.
    on_update: Option<OnUpdate<T>>,
}
impl<T: Clone + Debug + Eq + Hash> Replica<T> {
    /// Creates an empty replica.
    ///
    /// # Arguments
    /// - `source`: Where to pull updates from.
    /// - `validator`: If given, validates every created and deleted object
    ///   in an update before it is applied.
    /// - `on_update`: If given, called with (created, deleted) after every
    ///   applied update.
    pub fn new(source: Box<dyn UpdateSource<T>>, validator: Option<Box<dyn ObjectValidator<T>>>, on_update: Option<OnUpdate<T>>) -> Self {
        Self { objects: HashSet::new(), version: 0, valid_until: DateTime::<Utc>::UNIX_EPOCH, source, validator, on_update }
    }

    /// Returns the currently replicated objects.
    #[inline]
    pub fn objects(&self) -> &HashSet<T> { &self.objects }

    /// Returns the replicated version.
    #[inline]
    pub fn version(&self) -> u64 { self.version }

    /// Whether the replica is still fresh according to the server.
    #[inline]
    pub fn is_fresh(&self) -> bool { Utc::now() < self.valid_until }

    /// Brings the replica up-to-date if its freshness window has lapsed.
    ///
    /// If any object in the fetched update fails validation, the whole
    /// update is discarded: the failure is logged, the replica stays at its
    /// previous version, and the next call will fetch again.
    ///
    /// # Errors
    /// This function errors if the update source could not be reached or
    /// produced garbage. The replica is left untouched in that case.
    pub async fn update(&mut self) -> Result<(), SourceError> {
        if self.is_fresh() {
            return Ok(());
        }

        let update: ReplicaUpdate<T> = self.source.get_updates_since(self.version).await?;
        if let Some(validator) = &self.validator {
            for object in update.created.iter().chain(update.deleted.iter()) {
                if !validator.is_valid(object) {
                    warn!("Object {object:?} failed validation; discarding update {} -> {}", update.from_version, update.to_version);
                    return Ok(());
                }
            }
        }

        for object in &update.deleted {
            self.objects.remove(object);
        }
        self.objects.extend(update.created.iter().cloned());
        self.version = update.to_version;
        self.valid_until = update.valid_until;

        if let Some(on_update) = &self.on_update {
            on_update(&update.created, &update.deleted);
        }
        Ok(())
    }
}





/***** TESTS *****/
