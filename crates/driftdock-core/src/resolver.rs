//! Scoped access to user-chosen media.
//!
//! A [`ScopedReference`] is what gets persisted: the last known path plus an
//! opaque grant blob. Resolution prefers the grant and refreshes both halves
//! when the grant reports staleness; without a usable grant it falls back to
//! parsing the path string.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use driftdock_platform::AccessGrants;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ResolveError;

const BUILTIN_PREFIX: &str = "builtin:";

/// Where a piece of media lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MediaSource {
    File(PathBuf),
    /// Asset shipped inside the application bundle, by relative name.
    Builtin(String),
    Remote(String),
}

impl MediaSource {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Some(name) = raw.strip_prefix(BUILTIN_PREFIX) {
            return Some(Self::Builtin(name.trim_start_matches('/').to_string()));
        }
        if let Some(path) = raw.strip_prefix("file://") {
            return Some(Self::File(PathBuf::from(path)));
        }
        if raw.contains("://") {
            return Some(Self::Remote(raw.to_string()));
        }
        Some(Self::File(PathBuf::from(raw)))
    }

    pub fn is_local(&self) -> bool {
        !matches!(self, Self::Remote(_))
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Builtin(name) => write!(f, "{BUILTIN_PREFIX}{name}"),
            Self::Remote(url) => f.write_str(url),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopedReference {
    pub path: String,
    pub grant: Option<Vec<u8>>,
}

impl ScopedReference {
    pub fn from_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            grant: None,
        }
    }

    pub fn builtin(name: &str) -> Self {
        Self::from_path(format!("{BUILTIN_PREFIX}{name}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub source: Option<MediaSource>,
    /// Set when the stored reference should be replaced by this one.
    pub refreshed: Option<ScopedReference>,
}

pub struct ScopedAccessResolver {
    grants: Arc<dyn AccessGrants>,
}

/// Access held for the lifetime of the guard, released on every exit path.
struct AccessScope<'a> {
    grants: &'a dyn AccessGrants,
    path: &'a Path,
    active: bool,
}

impl<'a> AccessScope<'a> {
    fn acquire(grants: &'a dyn AccessGrants, path: &'a Path) -> Self {
        let active = grants.start_access(path);
        Self {
            grants,
            path,
            active,
        }
    }
}

impl Drop for AccessScope<'_> {
    fn drop(&mut self) {
        if self.active {
            self.grants.stop_access(self.path);
        }
    }
}

impl ScopedAccessResolver {
    pub fn new(grants: Arc<dyn AccessGrants>) -> Self {
        Self { grants }
    }

    pub fn resolve(&self, reference: &ScopedReference) -> Resolved {
        if let Some(grant) = reference.grant.as_deref() {
            match self.grants.resolve_grant(grant) {
                Ok(resolved) => {
                    let path_string = resolved.path.to_string_lossy().into_owned();
                    let mut refreshed = None;
                    if resolved.stale {
                        warn!(path = %path_string, "access grant is stale; re-deriving");
                        match self.grants.create_grant(&resolved.path) {
                            Ok(fresh) => {
                                refreshed = Some(ScopedReference {
                                    path: path_string.clone(),
                                    grant: Some(fresh),
                                });
                            }
                            Err(err) => warn!(path = %path_string, "grant refresh failed: {err}"),
                        }
                    }
                    if refreshed.is_none() && path_string != reference.path {
                        refreshed = Some(ScopedReference {
                            path: path_string,
                            grant: reference.grant.clone(),
                        });
                    }
                    return Resolved {
                        source: Some(MediaSource::File(resolved.path)),
                        refreshed,
                    };
                }
                Err(err) => {
                    warn!(path = %reference.path, "{}; falling back to path", ResolveError::Resolve(err));
                }
            }
        }

        Resolved {
            source: MediaSource::parse(&reference.path),
            refreshed: None,
        }
    }

    /// Filesystem location for a source, if it has one.
    pub fn local_path(&self, source: &MediaSource) -> Option<PathBuf> {
        match source {
            MediaSource::File(path) => Some(path.clone()),
            MediaSource::Builtin(name) => self.grants.bundle_dir().map(|dir| dir.join(name)),
            MediaSource::Remote(_) => None,
        }
    }

    pub fn exists(&self, path: &Path) -> bool {
        let _scope = AccessScope::acquire(self.grants.as_ref(), path);
        path.exists()
    }

    pub fn list_directory(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let _scope = AccessScope::acquire(self.grants.as_ref(), path);
        let mut entries = std::fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        entries.sort();
        Ok(entries)
    }

    /// Builds a persistable reference for `source`.
    ///
    /// Remote sources get nothing; bundle assets become a builtin marker.
    pub fn create_grant(&self, source: &MediaSource) -> Result<ScopedReference, ResolveError> {
        match source {
            MediaSource::Remote(url) => Err(ResolveError::Ineligible(url.clone())),
            MediaSource::Builtin(name) => Ok(ScopedReference::builtin(name)),
            MediaSource::File(path) => {
                if let Some(name) = self.bundle_relative(path) {
                    return Ok(ScopedReference::builtin(&name));
                }
                let grant = self
                    .grants
                    .create_grant(path)
                    .map_err(|reason| ResolveError::Create {
                        path: path.clone(),
                        reason,
                    })?;
                Ok(ScopedReference {
                    path: path.to_string_lossy().into_owned(),
                    grant: Some(grant),
                })
            }
        }
    }

    /// Turns an externally dropped file into a stable reference.
    pub fn reference_for(&self, path: &Path) -> ScopedReference {
        let source = MediaSource::File(path.to_path_buf());
        match self.create_grant(&source) {
            Ok(reference) => reference,
            Err(err) => {
                debug!("no grant for dropped file: {err}");
                ScopedReference::from_path(path.to_string_lossy())
            }
        }
    }

    fn bundle_relative(&self, path: &Path) -> Option<String> {
        let bundle = self.grants.bundle_dir()?;
        let relative = path.strip_prefix(&bundle).ok()?;
        Some(relative.to_string_lossy().replace('\\', "/"))
    }
}
