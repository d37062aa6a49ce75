use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::models::{BrowserState, SessionRecord};
use crate::utils::error::AppError;
use crate::Result;

/// Raw byte storage for session records, keyed by profile.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn read(&self, profile: &str) -> Result<Option<Vec<u8>>>;
    async fn write(&self, profile: &str, bytes: &[u8]) -> Result<()>;
    async fn remove(&self, profile: &str) -> Result<()>;
}

/// One JSON document per profile in a directory.
pub struct FileSessionBackend {
    directory: PathBuf,
}

impl FileSessionBackend {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn path_for(&self, profile: &str) -> PathBuf {
        let file: String = profile
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.directory.join(format!("{}.session.json", file))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

#[async_trait]
impl SessionBackend for FileSessionBackend {
    async fn read(&self, profile: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(profile)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, profile: &str, bytes: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.directory).await?;
        let path = self.path_for(profile);
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn remove(&self, profile: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(profile)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Default)]
pub struct MemorySessionBackend {
    records: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySessionBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionBackend for MemorySessionBackend {
    async fn read(&self, profile: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.records.read().await.get(profile).cloned())
    }

    async fn write(&self, profile: &str, bytes: &[u8]) -> Result<()> {
        self.records
            .write()
            .await
            .insert(profile.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn remove(&self, profile: &str) -> Result<()> {
        self.records.write().await.remove(profile);
        Ok(())
    }
}

/// Persists the logged-in browser state for one profile across runs.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    profile: String,
    validity: Duration,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn SessionBackend>, profile: impl Into<String>, validity: Duration) -> Self {
        Self {
            backend,
            profile: profile.into(),
            validity,
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// The stored record, if it exists and is still usable. Anything else is `None`.
    pub async fn load(&self) -> Option<SessionRecord> {
        let bytes = match self.backend.read(&self.profile).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(profile = %self.profile, "No stored session");
                return None;
            }
            Err(e) => {
                warn!(profile = %self.profile, "Could not read stored session: {}", e);
                return None;
            }
        };

        let record: SessionRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!(profile = %self.profile, "Stored session is unreadable: {}", e);
                return None;
            }
        };

        match record.validate(&self.profile, Utc::now()) {
            Ok(()) => Some(record),
            Err(reason) => {
                info!(profile = %self.profile, "Ignoring stored session: {}", reason);
                None
            }
        }
    }

    pub async fn save(&self, record: &SessionRecord) -> Result<()> {
        if record.profile != self.profile {
            return Err(AppError::Validation(format!(
                "session for profile '{}' cannot be stored under '{}'",
                record.profile, self.profile
            )));
        }
        let bytes = serde_json::to_vec_pretty(record)?;
        self.backend.write(&self.profile, &bytes).await?;
        info!(profile = %self.profile, expires_at = %record.expires_at, "Saved session");
        Ok(())
    }

    /// Wrap freshly exported browser state in a record and persist it.
    pub async fn save_state(&self, state: BrowserState) -> Result<SessionRecord> {
        let record = SessionRecord::new(self.profile.clone(), state, self.validity);
        self.save(&record).await?;
        Ok(record)
    }

    /// Make sure no usable record remains for this profile.
    pub async fn invalidate(&self) -> Result<()> {
        match self.backend.remove(&self.profile).await {
            Ok(()) => {
                info!(profile = %self.profile, "Invalidated session");
                Ok(())
            }
            Err(remove_err) => {
                warn!(profile = %self.profile, "Could not delete session, revoking instead: {}", remove_err);
                let mut revoked = SessionRecord::new(self.profile.clone(), BrowserState::default(), Duration::zero());
                revoked.revoked = true;
                let bytes = serde_json::to_vec(&revoked)?;
                self.backend.write(&self.profile, &bytes).await
            }
        }
    }
}
