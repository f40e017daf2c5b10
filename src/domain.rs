//  DOMAIN.rs
//
//  Created:
//    25 Feb 2025, 09:36:40
//  Last edited:
//    31 Jul 2025, 19:22:05
//
//  Description:
//!   Defines the domain administrator: the component that manages the
//!   (virtual) networks and containers in which containerized workflow
//!   steps execute.
//!
//!   The container runtime itself is deliberately behind a trait. The core
//!   only depends on the contract below; production deployments plug in an
//!   administrator backed by their runtime of choice.
//

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use ident::Identifier;
use log::warn;
use serde::{Deserialize, Serialize};
use workflow::{Job, WorkflowStep};

use crate::assets::Asset;


/***** ERRORS *****/
/// Describes failures of the domain administrator.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("No container runtime is configured at this site")]
    RuntimeUnavailable,
    #[error("Asset '{id}' has no image to load")]
    NoImage { id: Identifier },
    #[error("Failed to stage image for asset '{id}' at '{}'", path.display())]
    ImageIo {
        id:   Identifier,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Connection '{conn_id}' not found")]
    UnknownConnection { conn_id: String },
}





/***** AUXILLARY *****/
/// Describes the remote end of a streaming-access connection to an asset.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ConnectionRequest {
    /// The requesting side's endpoint within the connection to set up.
    pub client_endpoint: String,
}

/// Describes the local end of an established streaming-access connection.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ConnectionInfo {
    /// Identifies the connection, for stopping it later.
    pub conn_id:  String,
    /// The endpoint at which the asset is being served.
    pub endpoint: String,
}



/// Contains and manages the outputs of one executed step.
///
/// The image files live in a per-step working directory; call
/// [`StepResult::cleanup()`] after the outputs have been stored.
#[derive(Debug)]
pub struct StepResult {
    /// One produced image file per step output, by output name.
    pub files: HashMap<String, PathBuf>,
    /// The working directory holding the files.
    workdir: Option<PathBuf>,
}
impl StepResult {
    /// Creates a new StepResult.
    ///
    /// # Arguments
    /// - `files`: The produced image file per step output.
    /// - `workdir`: The per-step working directory to remove on cleanup,
    ///   if any.
    #[inline]
    pub fn new(files: HashMap<String, PathBuf>, workdir: Option<PathBuf>) -> Self { Self { files, workdir } }

    /// Releases the per-step working directory. The image files are gone
    /// after this has been called.
    pub fn cleanup(self) {
        if let Some(workdir) = self.workdir {
            if let Err(err) = std::fs::remove_dir_all(&workdir) {
                warn!("Failed to clean up step working directory '{}': {err}", workdir.display());
            }
        }
    }
}





/***** LIBRARY *****/
/// Manages container resources for a site.
///
/// The "domain" is a system administration domain: the (virtual) networks
/// and containers in which workflow steps execute. Implementations MUST
/// uphold the following contract in `execute_step`:
///
/// - Isolate the compute container from all networks except a private
///   per-job network containing one container per input and one per output
///   base.
/// - Supply the compute container with a configuration blob mapping each
///   input name and each output name to an HTTP(S) URL within that private
///   network, via an environment variable or well-known file.
/// - Wait for the compute container to exit, then snapshot every output
///   container's filesystem into a tarball.
/// - Fail fatally if any participating container fails to start, the
///   compute container exits non-zero, or any output snapshot fails.
/// - Reference-count images across concurrent jobs (see [`ImageCache`]).
#[async_trait]
pub trait DomainAdministrator: Send + Sync {
    /// Executes the given workflow step in containers.
    ///
    /// # Arguments
    /// - `step`: The step to execute.
    /// - `inputs`: Input assets, by input name.
    /// - `compute_asset`: The compute asset to run.
    /// - `output_bases`: The base images for the outputs, by output name.
    /// - `id_hashes`: The id-hash of every workflow item, by item.
    /// - `step_subjob`: The step's subjob, for the results' provenance.
    ///
    /// # Returns
    /// A [`StepResult`] with one image file per step output. Call its
    /// `cleanup()` after storing the outputs.
    ///
    /// # Errors
    /// Any error is fatal for the step, and thereby for the job.
    async fn execute_step(
        &self,
        step: &WorkflowStep,
        inputs: &HashMap<String, Asset>,
        compute_asset: &Asset,
        output_bases: &HashMap<String, Asset>,
        id_hashes: &HashMap<String, String>,
        step_subjob: &Job,
    ) -> Result<StepResult, DomainError>;

    /// Serves an asset over a dedicated network connection.
    ///
    /// # Errors
    /// This function errors if the connection cannot be established.
    async fn serve_asset(&self, asset: &Asset, request: &ConnectionRequest) -> Result<ConnectionInfo, DomainError>;

    /// Stops serving an asset previously served with
    /// [`Self::serve_asset()`].
    ///
    /// # Errors
    /// This function errors if the connection is not known.
    async fn stop_serving_asset(&self, conn_id: &str) -> Result<(), DomainError>;
}



/// A reference-counted cache of container images on local disk.
///
/// Keyed by asset id. [`ImageCache::ensure_image()`] stages the image on
/// first reference and bumps the count; [`ImageCache::free_image()`] drops
/// the count and evicts the file when it reaches zero. Concurrent `ensure`
/// calls for the same asset serialize on the cache's mutex, so an image is
/// staged at most once.
pub struct ImageCache {
    /// Where staged images live.
    workdir: PathBuf,
    /// Staged images by asset id: their path and reference count.
    entries: Mutex<HashMap<Identifier, (PathBuf, usize)>>,
}
impl ImageCache {
    /// Creates an empty cache staging images into the given directory.
    #[inline]
    pub fn new(workdir: impl Into<PathBuf>) -> Self { Self { workdir: workdir.into(), entries: Mutex::new(HashMap::new()) } }

    /// References the image of the given asset, staging it into the cache
    /// directory on first use.
    ///
    /// # Returns
    /// The local path of the staged image.
    ///
    /// # Errors
    /// This function errors if the asset has no image or staging it fails.
    pub fn ensure_image(&self, asset: &Asset) -> Result<PathBuf, DomainError> {
        let mut entries = self.entries.lock().unwrap();
        if let Some((path, refs)) = entries.get_mut(&asset.id) {
            *refs += 1;
            return Ok(path.clone());
        }

        let source: &PathBuf = asset.image_location.as_ref().ok_or_else(|| DomainError::NoImage { id: asset.id.clone() })?;
        let target: PathBuf = self.workdir.join(format!("{}.tar.gz", asset.id));
        std::fs::create_dir_all(&self.workdir)
            .and_then(|_| std::fs::copy(source, &target).map(|_| ()))
            .map_err(|source| DomainError::ImageIo { id: asset.id.clone(), path: target.clone(), source })?;
        entries.insert(asset.id.clone(), (target.clone(), 1));
        Ok(target)
    }

    /// Releases one reference to the given asset's image, evicting the
    /// staged file when no references remain.
    pub fn free_image(&self, id: &Identifier) {
        let mut entries = self.entries.lock().unwrap();
        let evict: bool = match entries.get_mut(id) {
            Some((_, refs)) => {
                *refs -= 1;
                *refs == 0
            },
            None => false,
        };
        if evict {
            if let Some((path, _)) = entries.remove(id) {
                if let Err(err) = std::fs::remove_file(&path) {
                    warn!("Failed to evict cached image '{}': {err}", path.display());
                }
            }
        }
    }
}



/// The administrator used when no container runtime is configured.
///
/// Sites composed with this administrator can execute built-in (imageless)
/// compute assets, which the runner handles in-process, but fail fatally on
/// any containerized step.
pub struct NullDomainAdministrator;
#[async_trait]
impl DomainAdministrator for NullDomainAdministrator {
    async fn execute_step(
        &self,
        _step: &WorkflowStep,
        _inputs: &HashMap<String, Asset>,
        _compute_asset: &Asset,
        _output_bases: &HashMap<String, Asset>,
        _id_hashes: &HashMap<String, String>,
        _step_subjob: &Job,
    ) -> Result<StepResult, DomainError> {
        Err(DomainError::RuntimeUnavailable)
    }

    async fn serve_asset(&self, _asset: &Asset, _request: &ConnectionRequest) -> Result<ConnectionInfo, DomainError> {
        Err(DomainError::RuntimeUnavailable)
    }

    async fn stop_serving_asset(&self, _conn_id: &str) -> Result<(), DomainError> { Err(DomainError::RuntimeUnavailable) }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir: PathBuf = std::env::temp_dir().join(format!("datamesh-test-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn image_cache_refcounts() {
        let dir: PathBuf = scratch_dir("image-cache");
        let image: PathBuf = dir.join("source.tar.gz");
        std::fs::write(&image, b"image bytes").unwrap();

        let mut asset: Asset = Asset::new_compute(Identifier::new("asset:ns1:software.step:ns1:site1").unwrap());
        asset.image_location = Some(image);

        let cache: ImageCache = ImageCache::new(dir.join("cache"));
        let staged1: PathBuf = cache.ensure_image(&asset).unwrap();
        assert!(staged1.exists());

        // A second reference reuses the staged file
        let staged2: PathBuf = cache.ensure_image(&asset).unwrap();
        assert_eq!(staged1, staged2);

        // The file survives until the last reference is gone
        cache.free_image(&asset.id);
        assert!(staged1.exists());
        cache.free_image(&asset.id);
        assert!(!staged1.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn image_cache_requires_an_image() {
        let cache: ImageCache = ImageCache::new(scratch_dir("image-cache-miss"));
        let asset: Asset = Asset::new_data(Identifier::new("asset:ns1:data1:ns1:site1").unwrap(), json!(42));
        assert!(matches!(cache.ensure_image(&asset), Err(DomainError::NoImage { .. })));
    }

    #[test]
    fn step_result_cleanup_removes_workdir() {
        let dir: PathBuf = scratch_dir("step-result");
        let file: PathBuf = dir.join("y.tar.gz");
        std::fs::write(&file, b"output").unwrap();

        let result: StepResult = StepResult::new(HashMap::from([("y".to_string(), file.clone())]), Some(dir.clone()));
        assert!(file.exists());
        result.cleanup();
        assert!(!dir.exists());
    }
}
