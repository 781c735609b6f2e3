use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::AuthError;

/// GitHub authorization codes are only valid for ten minutes.
pub const PENDING_AUTHORIZATION_TTL_SECS: i64 = 600;

/// Anti-forgery state issued with the most recent authorization URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub state: String,
    pub created_at: DateTime<Utc>,
}

impl PendingAuthorization {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            created_at: Utc::now(),
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::seconds(PENDING_AUTHORIZATION_TTL_SECS)
    }
}

/// Compare a returned `state` with the pending authorization.
pub fn verify_state(
    pending: Option<&PendingAuthorization>,
    returned: &str,
    now: DateTime<Utc>,
) -> Result<(), AuthError> {
    let pending = pending.ok_or(AuthError::NoPendingAuthorization)?;
    if pending.state != returned {
        return Err(AuthError::StateMismatch);
    }
    if pending.is_stale(now) {
        return Err(AuthError::AuthorizationExpired);
    }
    Ok(())
}

/// JSON file holding at most one [`PendingAuthorization`].
#[derive(Debug, Clone)]
pub struct PendingAuthorizationStore {
    path: PathBuf,
}

impl PendingAuthorizationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, pending: &PendingAuthorization) -> Result<(), AuthError> {
        let payload = serde_json::to_string_pretty(pending)?;
        self.write(payload.as_bytes())
            .map_err(|source| self.inaccessible(source))
    }

    fn write(&self, payload: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty() && !parent.exists())
        {
            DirBuilder::new().recursive(true).mode(0o700).create(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o600)
            .open(&self.path)?;
        file.write_all(payload)
    }

    pub fn load(&self) -> Result<Option<PendingAuthorization>, AuthError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(self.inaccessible(err)),
        }
    }

    pub fn clear(&self) -> Result<(), AuthError> {
        match fs::remove_file(&self.path) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.inaccessible(err)),
        }
    }

    fn inaccessible(&self, source: std::io::Error) -> AuthError {
        AuthError::PendingState {
            path: self.path.clone(),
            source,
        }
    }
}
