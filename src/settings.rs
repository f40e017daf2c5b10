//  SETTINGS.rs
//
//  Created:
//    03 Mar 2025, 11:14:02
//  Last edited:
//    22 Jul 2025, 15:32:44
//
//  Description:
//!   Site and registry daemon configuration, loaded from YAML files.
//

use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use ident::Identifier;
use serde::Deserialize;


/***** ERRORS *****/
/// Describes failures while loading settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to open settings file '{}'", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse settings file '{}'", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}





/***** HELPER FUNCTIONS *****/
#[inline]
fn default_bind_address() -> SocketAddr { SocketAddr::from(([127, 0, 0, 1], 3030)) }

#[inline]
fn default_max_lag_ms() -> u64 { 10_000 }

fn load<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, SettingsError> {
    let handle: File = File::open(path).map_err(|source| SettingsError::Open { path: path.into(), source })?;
    serde_yaml::from_reader(handle).map_err(|source| SettingsError::Parse { path: path.into(), source })
}





/***** LIBRARY *****/
/// Settings for a site daemon.
#[derive(Clone, Debug, Deserialize)]
pub struct SiteSettings {
    /// Name of the site (without namespace).
    pub name: String,
    /// Namespace controlled by this site's policy server.
    pub namespace: String,
    /// Id of the party owning the site, e.g. `party:namespace:name`.
    pub owner: Identifier,
    /// Where the central registry's API lives.
    pub registry_endpoint: String,
    /// The address to bind the site's API on.
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,
    /// Local directory for stored asset images.
    pub image_dir: PathBuf,
    /// How long (ms) replicas of this site's stores may lag behind.
    #[serde(default = "default_max_lag_ms")]
    pub max_lag_ms: u64,
}
impl SiteSettings {
    /// Loads site settings from a YAML file.
    ///
    /// # Errors
    /// This function errors if the file cannot be opened or parsed.
    #[inline]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> { load(path.as_ref()) }
}



/// Settings for the registry daemon.
#[derive(Clone, Debug, Deserialize)]
pub struct RegistrySettings {
    /// The address to bind the registry's API on.
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,
    /// How long (ms) registry replicas may lag behind.
    #[serde(default = "default_max_lag_ms")]
    pub max_lag_ms: u64,
}
impl RegistrySettings {
    /// Loads registry settings from a YAML file.
    ///
    /// # Errors
    /// This function errors if the file cannot be opened or parsed.
    #[inline]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> { load(path.as_ref()) }
}
