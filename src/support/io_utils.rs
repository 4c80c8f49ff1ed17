use crate::core::{Result, ShardError};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Writes `bytes` to a sibling temp file, syncs it, then renames it over `path`.
pub(crate) async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|err| {
            ShardError::IoError(format!(
                "Failed to create parent directory '{}': {}",
                parent.display(),
                err
            ))
        })?;
    }

    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp).await.map_err(|err| {
        ShardError::IoError(format!(
            "Failed to create temp file '{}': {}",
            tmp.display(),
            err
        ))
    })?;
    file.write_all(bytes).await.map_err(|err| {
        ShardError::IoError(format!(
            "Failed to write temp file '{}': {}",
            tmp.display(),
            err
        ))
    })?;
    file.sync_all().await.map_err(|err| {
        ShardError::IoError(format!("Failed to sync temp file '{}': {}", tmp.display(), err))
    })?;
    drop(file);

    fs::rename(&tmp, path).await.map_err(|err| {
        ShardError::IoError(format!(
            "Failed to rename temp file '{}' -> '{}': {}",
            tmp.display(),
            path.display(),
            err
        ))
    })?;
    Ok(())
}

/// Reads a file, treating a missing file as `None`.
pub(crate) async fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(ShardError::IoError(format!(
            "Failed to read '{}': {}",
            path.display(),
            err
        ))),
    }
}
