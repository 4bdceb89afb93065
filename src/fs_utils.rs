use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

/// Write an artifact, creating missing parent directories first.
pub async fn write_artifact(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create output directory: {}", parent.display())
        })?;
    }

    tokio::fs::write(path, data)
        .await
        .with_context(|| format!("Failed to write artifact to {}", path.display()))?;

    debug!(path = %path.display(), size = data.len(), "Artifact written");
    Ok(())
}
