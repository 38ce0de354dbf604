//! Where the signed-in user's identity and token live between runs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::warn;

/// Identity needed to open the realtime connection and call the REST API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: String,
    pub token: String,
}

impl Credentials {
    /// Returns `None` when either half is blank: a session without both
    /// cannot connect.
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Option<Self> {
        let user_id = user_id.into();
        let token = token.into();
        if user_id.trim().is_empty() || token.trim().is_empty() {
            return None;
        }
        Some(Self { user_id, token })
    }
}

/// Source of the current session.
pub trait SessionStore: Send + Sync {
    fn credentials(&self) -> Option<Credentials>;

    /// Forget the session (logout, or the server rejected the token).
    fn clear(&self) -> io::Result<()>;
}

// =============================================================================
// File-backed store
// =============================================================================

/// On-disk shape of `session.json`: `{"user": {"user_id": ..., ...}, "token": ...}`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionFile {
    #[serde(default)]
    user: Option<StoredUser>,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredUser {
    user_id: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Session persisted as JSON in the data directory.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist credentials, keeping any other profile fields already stored.
    pub fn save(&self, creds: &Credentials) -> io::Result<()> {
        let mut file = self.read_file().unwrap_or_default();
        let extra = file.user.take().map(|u| u.extra).unwrap_or_default();
        file.user = Some(StoredUser {
            user_id: creds.user_id.clone(),
            extra,
        });
        file.token = Some(creds.token.clone());

        let json = serde_json::to_string_pretty(&file).map_err(io::Error::other)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)
    }

    fn read_file(&self) -> Option<SessionFile> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read session file");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring malformed session file");
                None
            }
        }
    }
}

impl SessionStore for FileSessionStore {
    fn credentials(&self) -> Option<Credentials> {
        let file = self.read_file()?;
        Credentials::new(file.user?.user_id, file.token?)
    }

    fn clear(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    inner: RwLock<Option<Credentials>>,
}

impl MemorySessionStore {
    pub fn signed_in(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(Credentials::new(user_id, token)),
        }
    }

    pub fn set(&self, creds: Option<Credentials>) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = creds;
    }
}

impl SessionStore for MemorySessionStore {
    fn credentials(&self) -> Option<Credentials> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn clear(&self) -> io::Result<()> {
        self.set(None);
        Ok(())
    }
}
