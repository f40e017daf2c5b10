//  STORE.rs
//
//  Created:
//    25 Feb 2025, 13:55:18
//  Last edited:
//    31 Jul 2025, 19:40:26
//
//  Description:
//!   Storage and exchange of data and compute assets.
//!
//!   The store is the policy enforcement point for asset retrieval: a
//!   requesting site gets an asset back only if the composed access policy
//!   permits it. Denial and absence are deliberately indistinguishable, so
//!   that probing the store leaks no information about which assets exist.
//

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use ident::Identifier;
use log::{debug, info};
use policy::{PermissionCalculator, Permissions};

use crate::assets::{Asset, AssetKind};
use crate::domain::{ConnectionInfo, ConnectionRequest, DomainAdministrator, DomainError};


/***** ERRORS *****/
/// Describes failures of the asset store.
///
/// Note that [`StoreError::NotFound`] covers both absence and policy
/// denial; callers cannot and must not tell them apart.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Asset '{id}' not found")]
    NotFound { id: Identifier },
    #[error("There is already an asset with id '{id}'")]
    AlreadyExists { id: Identifier },
    #[error("Failed to place image for asset '{id}' at '{}'", path.display())]
    ImageIo {
        id:   Identifier,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serve asset '{id}'")]
    Serve {
        id: Identifier,
        #[source]
        source: DomainError,
    },
}





/***** LIBRARY *****/
/// A site's local store of assets.
pub struct AssetStore {
    /// Decides retrieval requests.
    calculator: PermissionCalculator,
    /// Serves assets over dedicated connections.
    domain_administrator: Arc<dyn DomainAdministrator>,
    /// The stored assets, by id.
    assets: RwLock<HashMap<Identifier, Asset>>,
    /// Where stored image files live.
    image_dir: PathBuf,
}
impl AssetStore {
    /// Creates a new, empty AssetStore.
    ///
    /// # Arguments
    /// - `calculator`: The permission calculator used to decide retrieval
    ///   requests.
    /// - `domain_administrator`: Used to serve assets over dedicated
    ///   connections.
    /// - `image_dir`: Local directory to keep image files in.
    pub fn new(calculator: PermissionCalculator, domain_administrator: Arc<dyn DomainAdministrator>, image_dir: impl Into<PathBuf>) -> Self {
        Self { calculator, domain_administrator, assets: RwLock::new(HashMap::new()), image_dir: image_dir.into() }
    }

    /// Stores an asset.
    ///
    /// # Arguments
    /// - `asset`: The asset to store.
    /// - `move_image`: If the asset has an image, whether to move the file
    ///   into the store instead of copying it.
    ///
    /// # Errors
    /// This function errors if an asset with this id already exists or the
    /// image could not be placed.
    pub fn store(&self, mut asset: Asset, move_image: bool) -> Result<(), StoreError> {
        // One exclusive lock around the whole operation; the asset must
        // never be observable without its image, and a duplicate id must
        // not clobber the existing asset's image file
        let mut assets = self.assets.write().unwrap();
        if assets.contains_key(&asset.id) {
            return Err(StoreError::AlreadyExists { id: asset.id });
        }
        if let Some(src) = asset.image_location.clone() {
            let target: PathBuf = self.place_image(&asset.id, &src, move_image)?;
            asset.image_location = Some(target);
        }
        assets.insert(asset.id.clone(), asset);
        Ok(())
    }

    /// Attaches an image file to a previously stored asset.
    ///
    /// # Errors
    /// This function errors if no asset with this id exists or the image
    /// could not be placed.
    pub fn store_image(&self, asset_id: &Identifier, image_file: &Path, move_image: bool) -> Result<(), StoreError> {
        let mut assets = self.assets.write().unwrap();
        if !assets.contains_key(asset_id) {
            return Err(StoreError::NotFound { id: asset_id.clone() });
        }
        let target: PathBuf = self.place_image(asset_id, image_file, move_image)?;
        // Just checked above, still under the same lock
        assets.get_mut(asset_id).unwrap().image_location = Some(target);
        Ok(())
    }

    /// Retrieves an asset on behalf of a peer site.
    ///
    /// The requesting site must be permitted access by the composed policy:
    /// for data assets, the permissions of the asset's provenance item; for
    /// compute assets, the asset's own permissions.
    ///
    /// # Errors
    /// This function errors with [`StoreError::NotFound`] if the asset does
    /// not exist _or_ the requester is not permitted to see it.
    pub fn retrieve(&self, asset_id: &Identifier, requester: &Identifier) -> Result<Asset, StoreError> {
        info!("Servicing request from {requester} for asset {asset_id}");
        self.check_request(asset_id, requester)?;
        let assets = self.assets.read().unwrap();
        Ok(assets[asset_id].clone())
    }

    /// Serves an asset over a dedicated network connection.
    ///
    /// Access is checked exactly as in [`AssetStore::retrieve()`].
    ///
    /// # Errors
    /// This function errors if access is denied (as `NotFound`) or the
    /// connection cannot be established.
    pub async fn serve(&self, asset_id: &Identifier, request: &ConnectionRequest, requester: &Identifier) -> Result<ConnectionInfo, StoreError> {
        info!("Servicing request from {requester} for a connection to {asset_id}");
        self.check_request(asset_id, requester)?;
        let asset: Asset = self.assets.read().unwrap()[asset_id].clone();
        self.domain_administrator.serve_asset(&asset, request).await.map_err(|source| StoreError::Serve { id: asset_id.clone(), source })
    }

    /// Releases the store's image directory.
    pub fn close(&self) {
        let _ = std::fs::remove_dir_all(&self.image_dir);
    }

    /// Checks that a request for an asset is allowed.
    ///
    /// # Errors
    /// This function errors with `NotFound` if the asset is absent, the
    /// requester is denied, or permissions cannot be evaluated.
    fn check_request(&self, asset_id: &Identifier, requester: &Identifier) -> Result<(), StoreError> {
        let not_found = || StoreError::NotFound { id: asset_id.clone() };

        let asset: Asset = match self.assets.read().unwrap().get(asset_id) {
            Some(asset) => asset.clone(),
            None => return Err(not_found()),
        };

        let perms: Permissions = match asset.kind {
            AssetKind::Data => {
                let all_perms = match self.calculator.calculate_permissions(&asset.metadata.job) {
                    Ok(all_perms) => all_perms,
                    Err(err) => {
                        debug!("Cannot evaluate provenance of {asset_id}: {err}");
                        return Err(not_found());
                    },
                };
                match all_perms.get(&asset.metadata.item) {
                    Some(perms) => perms.clone(),
                    None => {
                        debug!("Provenance of {asset_id} does not cover item '{}'", asset.metadata.item);
                        return Err(not_found());
                    },
                }
            },
            AssetKind::Compute => self.calculator.evaluator().permissions_for_asset(asset_id),
        };

        if !self.calculator.evaluator().may_access(&perms, requester) {
            debug!("Access to {asset_id} denied for {requester}");
            return Err(not_found());
        }
        Ok(())
    }

    /// Copies or moves an image file into the store's image directory.
    fn place_image(&self, asset_id: &Identifier, src: &Path, move_image: bool) -> Result<PathBuf, StoreError> {
        let target: PathBuf = self.image_dir.join(format!("{asset_id}.tar.gz"));
        let io_err = |source: std::io::Error| StoreError::ImageIo { id: asset_id.clone(), path: target.clone(), source };

        std::fs::create_dir_all(&self.image_dir).map_err(io_err)?;
        if move_image {
            // A plain rename fails across filesystems, so fall back to
            // copy-and-remove
            if std::fs::rename(src, &target).is_err() {
                std::fs::copy(src, &target).map_err(io_err)?;
                std::fs::remove_file(src).map_err(io_err)?;
            }
        } else {
            std::fs::copy(src, &target).map_err(io_err)?;
        }
        Ok(target)
    }
}
