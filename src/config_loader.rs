use crate::config::Manifest;
use crate::ip::StoreConfig;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::info;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Load and validate a deployment manifest from a YAML file
pub fn load_manifest(manifest_path: &Path) -> Result<Manifest> {
    info!("Loading manifest from: {:?}", manifest_path);

    // Open the manifest file
    let file = File::open(manifest_path)
        .wrap_err_with(|| format!("Failed to open manifest '{}'", manifest_path.display()))?;

    // Parse the YAML into manifest structures
    let manifest: Manifest = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse manifest '{}'", manifest_path.display()))?;

    // Reject structurally broken manifests before any network is built
    manifest.validate()?;

    info!(
        "Loaded deployment '{}' with {} network(s) and {} job(s)",
        manifest.name,
        manifest.networks.len(),
        manifest.jobs.len()
    );
    Ok(manifest)
}

/// CLI arguments that can override manifest settings
#[derive(Debug, Clone, Default)]
pub struct StoreOverrides {
    /// Keep reservations in a ledger file at this path
    pub ledger: Option<PathBuf>,
    /// Keep reservations in memory only
    pub transient: bool,
}

/// Apply CLI store overrides to a loaded manifest
pub fn apply_store_overrides(manifest: &mut Manifest, overrides: &StoreOverrides) {
    // An explicit ledger path wins over --transient
    if let Some(path) = &overrides.ledger {
        info!("Reservation store overridden: durable ledger at {:?}", path);
        manifest.reservation_store = StoreConfig::Durable { path: path.clone() };
    } else if overrides.transient {
        info!("Reservation store overridden: transient");
        manifest.reservation_store = StoreConfig::Transient;
    }
}
