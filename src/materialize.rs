//! # Materialization
//!
//! Writes artifacts into the mount's target directory with per-file
//! atomicity: each value lands in a temp file created inside the target
//! directory, gets its mode and an fsync, and is renamed over the final
//! path. A cancelled mount leaves at most an abandoned temp file, which is
//! deleted when its handle drops.

use std::fs::Permissions;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::backend::SecretArtifact;

/// Write every artifact under `target_path` atomically.
pub fn write_artifacts(target_path: &Path, artifacts: &[SecretArtifact]) -> Result<()> {
    for artifact in artifacts {
        write_artifact(target_path, artifact)
            .with_context(|| format!("writing {}", artifact.file_name))?;
    }
    Ok(())
}

fn write_artifact(target_path: &Path, artifact: &SecretArtifact) -> Result<()> {
    let final_path = target_path.join(&artifact.file_name);

    let mut temp = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(target_path)
        .context("creating temp file in target directory")?;
    temp.write_all(&artifact.data).context("writing value")?;
    temp.as_file()
        .set_permissions(Permissions::from_mode(artifact.mode))
        .context("setting file mode")?;
    temp.as_file().sync_all().context("syncing value")?;
    temp.persist(&final_path)
        .with_context(|| format!("renaming into {}", final_path.display()))?;

    debug!(
        "Materialized {} ({} bytes, mode {:o})",
        final_path.display(),
        artifact.data.len(),
        artifact.mode
    );
    Ok(())
}
