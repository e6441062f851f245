use std::path::Path;

use tracing::info;

use conductor_core::error::{ConductorError, Result};

use super::model::WorkflowManifest;
use super::validate::ValidatedManifest;

/// On-disk manifest encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Toml,
    Json,
}

impl ManifestFormat {
    /// `.json` files are JSON; everything else is TOML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

/// Parse and validate a manifest from text.
pub fn parse_manifest(content: &str, format: ManifestFormat) -> Result<ValidatedManifest> {
    let manifest: WorkflowManifest = match format {
        ManifestFormat::Toml => {
            toml::from_str(content).map_err(|e| ConductorError::ManifestParse(e.to_string()))?
        }
        ManifestFormat::Json => serde_json::from_str(content)
            .map_err(|e| ConductorError::ManifestParse(e.to_string()))?,
    };
    ValidatedManifest::new(manifest)
}

/// Load and validate a manifest file.
pub fn load_manifest(path: &Path) -> Result<ValidatedManifest> {
    let content = std::fs::read_to_string(path)
        .map_err(|_| ConductorError::ManifestNotFound(path.display().to_string()))?;
    let manifest = parse_manifest(&content, ManifestFormat::from_path(path))?;
    info!(
        path = %path.display(),
        nodes = manifest.nodes.len(),
        "Loaded workflow manifest"
    );
    Ok(manifest)
}
