use crate::core::{Result, ShardError, ShardIdentityDocument};
use crate::support::io_utils::{atomic_write, read_if_exists};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const IDENTITY_FILE_NAME: &str = "shard_identity.json";
const IDENTITY_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityFile {
    version: u32,
    written_at: DateTime<Utc>,
    document: ShardIdentityDocument,
}

/// Local durable home of a node's shard identity document.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(IDENTITY_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted document, if any.
    ///
    /// An unreadable or incomplete file is reported rather than ignored: a
    /// node must never silently fall back to the uninitialized state.
    pub async fn load(&self) -> Result<Option<ShardIdentityDocument>> {
        let Some(bytes) = read_if_exists(&self.path).await? else {
            return Ok(None);
        };
        let file: IdentityFile = serde_json::from_slice(&bytes).map_err(|err| {
            ShardError::InvalidIdentity(format!(
                "corrupt identity document '{}': {}",
                self.path.display(),
                err
            ))
        })?;
        if file.version != IDENTITY_FORMAT_VERSION {
            return Err(ShardError::InvalidIdentity(format!(
                "unsupported identity document version {} in '{}'",
                file.version,
                self.path.display()
            )));
        }
        file.document.validate()?;
        Ok(Some(file.document))
    }

    pub async fn save(&self, document: &ShardIdentityDocument) -> Result<()> {
        let file = IdentityFile {
            version: IDENTITY_FORMAT_VERSION,
            written_at: Utc::now(),
            document: document.clone(),
        };
        let json = serde_json::to_vec_pretty(&file).map_err(|err| {
            ShardError::ExecutionError(format!("serialize identity document: {}", err))
        })?;
        atomic_write(&self.path, &json).await
    }
}
