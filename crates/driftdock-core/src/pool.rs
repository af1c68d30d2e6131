//! Cache of heavyweight players keyed by surface identity.
//!
//! Each identity is one visible window or one display, so the pool holds at
//! most one live player per identity and evicts purely by identity; there is
//! no capacity bound and no LRU.

use std::collections::HashMap;
use std::fmt;

use driftdock_platform::{DisplayId, MediaPlayer, PlaybackStatus};
use glam::Vec2;
use tracing::debug;

use crate::resolver::MediaSource;
use crate::worker::Disposer;

/// Logical slot a surface renders into; stable across reloads of that slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceKey(String);

impl SurfaceKey {
    pub fn dock(dock_id: &str) -> Self {
        Self(format!("dock:{dock_id}"))
    }

    pub fn wallpaper(display: &DisplayId) -> Self {
        Self(format!("wallpaper:{display}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable per-key seed, used to spread wake reloads.
    pub fn seed(&self) -> u64 {
        stable_hash(self.0.as_bytes())
    }
}

/// FNV-1a; stable across runs, unlike the std hasher.
pub(crate) fn stable_hash(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

impl fmt::Display for SurfaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct PooledMedia {
    pub player: Box<dyn MediaPlayer>,
    pub source: MediaSource,
    pub natural: Vec2,
}

impl PooledMedia {
    pub fn is_healthy(&self) -> bool {
        self.player.status() != PlaybackStatus::Failed
            && self.player.item_status() != PlaybackStatus::Failed
    }
}

impl fmt::Debug for PooledMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledMedia")
            .field("source", &self.source)
            .field("natural", &self.natural)
            .finish_non_exhaustive()
    }
}

pub struct MediaPool {
    entries: HashMap<SurfaceKey, PooledMedia>,
    disposer: Disposer,
}

impl MediaPool {
    pub fn new(disposer: Disposer) -> Self {
        Self {
            entries: HashMap::new(),
            disposer,
        }
    }

    /// Cached entry for `key`, only if it plays `source` and has not failed.
    pub fn get(&mut self, key: &SurfaceKey, source: &MediaSource) -> Option<&mut PooledMedia> {
        let entry = self.entries.get_mut(key)?;
        if entry.source != *source {
            debug!(%key, "pool entry plays a different source");
            return None;
        }
        if !entry.is_healthy() {
            debug!(%key, "pool entry has failed; not reusing it");
            return None;
        }
        Some(entry)
    }

    /// The attached entry regardless of health, for playback control.
    pub fn attached(&mut self, key: &SurfaceKey) -> Option<&mut PooledMedia> {
        self.entries.get_mut(key)
    }

    pub fn store(&mut self, key: SurfaceKey, entry: PooledMedia) {
        if let Some(previous) = self.entries.insert(key.clone(), entry) {
            debug!(%key, source = %previous.source, "evicting replaced pool entry");
            self.retire(previous);
        }
    }

    pub fn remove(&mut self, key: &SurfaceKey) -> bool {
        match self.entries.remove(key) {
            Some(previous) => {
                debug!(%key, "removing pool entry");
                self.retire(previous);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &SurfaceKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn retire(&self, mut entry: PooledMedia) {
        entry.player.stop();
        self.disposer.dispose(entry.player);
    }
}
