//! Engine settings loaded from TOML, with defaults for every field.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub timings: Timings,
    pub windows: WindowSettings,
    pub workers: WorkerSettings,
    pub paths: PathSettings,
}

/// Delays and spacings, all in milliseconds on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub load_gate_spacing: u64,
    pub probe_retry_delay: u64,
    pub probe_max_retries: u8,
    pub wake_settle: u64,
    pub resume_after_wake: u64,
    pub resume_after_session: u64,
    pub wake_reload_base: u64,
    pub wake_reload_jitter: u64,
    pub frame_save_debounce: u64,
    pub wallpaper_rebuild: u64,
    pub wallpaper_edit_rebuild: u64,
    pub launch_stagger: u64,
    pub wake_shell_spacing: u64,
    pub wake_attach_spacing: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            load_gate_spacing: 180,
            probe_retry_delay: 800,
            probe_max_retries: 2,
            wake_settle: 1000,
            resume_after_wake: 2500,
            resume_after_session: 5000,
            wake_reload_base: 1200,
            wake_reload_jitter: 900,
            frame_save_debounce: 400,
            wallpaper_rebuild: 600,
            wallpaper_edit_rebuild: 100,
            launch_stagger: 16,
            wake_shell_spacing: 120,
            wake_attach_spacing: 350,
        }
    }
}

impl Timings {
    pub fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    pub fn load_gate_spacing(&self) -> Duration {
        Self::ms(self.load_gate_spacing)
    }

    pub fn probe_retry_delay(&self) -> Duration {
        Self::ms(self.probe_retry_delay)
    }

    pub fn wake_settle(&self) -> Duration {
        Self::ms(self.wake_settle)
    }

    pub fn resume_after_wake(&self) -> Duration {
        Self::ms(self.resume_after_wake)
    }

    pub fn resume_after_session(&self) -> Duration {
        Self::ms(self.resume_after_session)
    }

    pub fn frame_save_debounce(&self) -> Duration {
        Self::ms(self.frame_save_debounce)
    }

    pub fn wallpaper_rebuild(&self) -> Duration {
        Self::ms(self.wallpaper_rebuild)
    }

    pub fn wallpaper_edit_rebuild(&self) -> Duration {
        Self::ms(self.wallpaper_edit_rebuild)
    }

    /// Base delay plus a per-surface share of the jitter window.
    ///
    /// `seed` is any stable per-surface value; the same seed always yields the
    /// same delay so tests stay deterministic.
    pub fn wake_reload_delay(&self, seed: u64) -> Duration {
        let jitter = if self.wake_reload_jitter == 0 {
            0
        } else {
            seed % (self.wake_reload_jitter + 1)
        };
        Self::ms(self.wake_reload_base + jitter)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub snap_threshold: f32,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            snap_threshold: 15.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub threads: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self { threads: 2 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub preview_cache: Option<PathBuf>,
}

impl EngineConfig {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}
