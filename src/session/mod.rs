use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::utils;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no admin session; run `ngoreport session login <TOKEN>` first")]
    Missing,

    #[error("admin session expired; log in again")]
    Expired,

    #[error("admin token is empty")]
    EmptyToken,

    #[error("failed to read session file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write session file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt session file {path}: {message}")]
    Corrupt { path: String, message: String },
}

/// A backend-issued admin token kept between invocations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminSession {
    pub token: String,
    pub created_at: u64,
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl AdminSession {
    pub fn new(token: &str, ttl_seconds: Option<u64>, now: u64) -> Result<Self, SessionError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(SessionError::EmptyToken);
        }
        Ok(Self {
            token: token.to_string(),
            created_at: now,
            expires_at: ttl_seconds.map(|ttl| now.saturating_add(ttl)),
        })
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// Client-side precondition for admin-only requests. Passing it grants
/// nothing; it only avoids sending requests the backend would reject.
pub trait SessionGate: Send + Sync {
    fn check(&self) -> Result<(), SessionError>;
}

/// The session in effect for one invocation.
#[derive(Clone, Debug, Default)]
pub struct ActiveSession {
    session: Option<AdminSession>,
    checked_at: u64,
}

impl ActiveSession {
    pub fn new(session: Option<AdminSession>, now: u64) -> Self {
        Self {
            session,
            checked_at: now,
        }
    }

    /// A session built from a token given directly (flag or config); never expires.
    pub fn from_token(token: &str) -> Result<Self, SessionError> {
        let now = utils::unix_now();
        Ok(Self::new(Some(AdminSession::new(token, None, now)?), now))
    }

    pub fn session(&self) -> Option<&AdminSession> {
        self.session.as_ref()
    }

    /// The bearer token to attach to requests, if the session is usable.
    pub fn token(&self) -> Option<&str> {
        self.session
            .as_ref()
            .filter(|s| !s.is_expired(self.checked_at))
            .map(|s| s.token.as_str())
    }
}

impl SessionGate for ActiveSession {
    fn check(&self) -> Result<(), SessionError> {
        match self.session.as_ref() {
            None => Err(SessionError::Missing),
            Some(s) if s.is_expired(self.checked_at) => Err(SessionError::Expired),
            Some(_) => Ok(()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<AdminSession>, SessionError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SessionError::Read {
                    path: self.path.display().to_string(),
                    source: e,
                })
            }
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| SessionError::Corrupt {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })
    }

    pub fn save(&self, session: &AdminSession) -> Result<(), SessionError> {
        let write_err = |e: std::io::Error| SessionError::Write {
            path: self.path.display().to_string(),
            source: e,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_vec_pretty(session).map_err(|e| SessionError::Corrupt {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(&self.path, json).map_err(write_err)?;
        restrict_permissions(&self.path).map_err(write_err)?;
        debug!(path = %self.path.display(), "session saved");
        Ok(())
    }

    /// Removes the stored session. Returns whether one existed.
    pub fn clear(&self) -> Result<bool, SessionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SessionError::Write {
                path: self.path.display().to_string(),
                source: e,
            }),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
