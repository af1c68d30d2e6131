//! Error types for the engine.
//!
//! Nothing here is fatal to the process: event handlers log and degrade, so
//! these types mostly travel between a fallible helper and the handler that
//! decides how to recover.

use std::path::PathBuf;

use thiserror::Error;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media file {0:?} does not exist")]
    Missing(PathBuf),

    #[error("failed to decode image {path:?}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("asset {0:?} is not playable")]
    NotPlayable(PathBuf),

    #[error("asset {0:?} has no video track")]
    NoVideoTrack(PathBuf),

    #[error("media backend failed for {path:?}: {reason}")]
    Backend { path: PathBuf, reason: BoxedError },

    #[error("media source {0} is not a local file")]
    NotLocal(String),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("grant for {path:?} could not be created: {reason}")]
    Create { path: PathBuf, reason: BoxedError },

    #[error("grant could not be resolved: {0}")]
    Resolve(BoxedError),

    #[error("{0} is not eligible for an access grant")]
    Ineligible(String),
}

#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("malformed wallpaper preferences")]
    Json(#[from] serde_json::Error),

    #[error("unrecognised wallpaper preference shape")]
    UnknownShape,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("dock store: {0}")]
    Docks(BoxedError),

    #[error("preference store: {0}")]
    Prefs(BoxedError),
}
