//! Process-wide services shared by every window and surface.
//!
//! One instance is built at startup and lent to the managers for the duration
//! of each event; nothing here is reachable through a global.

use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use driftdock_platform::MediaBackend;

use crate::clock::Clock;
use crate::config::{EngineConfig, Timings};
use crate::engine::EngineTimer;
use crate::gate::LoadGate;
use crate::pool::{MediaPool, SurfaceKey};
use crate::preview::PreviewCache;
use crate::resolver::ScopedAccessResolver;
use crate::session::SessionTimer;
use crate::surface::SurfaceTimer;
use crate::timer::{TimerId, TimerQueue};
use crate::wallpaper::WallpaperTimer;
use crate::worker::{Disposer, Reports, Worker};

/// Payload of every main-context timer.
#[derive(Debug, Clone)]
pub enum Scheduled {
    Surface { key: SurfaceKey, timer: SurfaceTimer },
    Session(SessionTimer),
    Wallpaper(WallpaperTimer),
    Engine(EngineTimer),
}

/// The system-wide playback toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackPolicy {
    /// User preference.
    pub user_enabled: bool,
    /// Held while the machine sleeps or the session is inactive.
    pub suspended: bool,
    /// When false, videos are replaced by a still preview.
    pub video_allowed: bool,
}

impl PlaybackPolicy {
    pub fn enabled(&self) -> bool {
        self.user_enabled && !self.suspended
    }
}

impl Default for PlaybackPolicy {
    fn default() -> Self {
        Self {
            user_enabled: true,
            suspended: false,
            video_allowed: true,
        }
    }
}

pub struct Services {
    pub timings: Timings,
    pub clock: Arc<dyn Clock>,
    pub timers: TimerQueue<Scheduled>,
    pub gate: LoadGate,
    pub pool: MediaPool,
    pub previews: PreviewCache,
    pub resolver: Arc<ScopedAccessResolver>,
    pub backend: Arc<dyn MediaBackend>,
    pub worker: Rc<dyn Worker>,
    pub reports: Reports,
    pub playback: PlaybackPolicy,
}

impl Services {
    pub fn new(
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
        resolver: Arc<ScopedAccessResolver>,
        backend: Arc<dyn MediaBackend>,
        worker: Rc<dyn Worker>,
    ) -> Self {
        let timings = config.timings.clone();
        Self {
            gate: LoadGate::new(timings.load_gate_spacing()),
            pool: MediaPool::new(Disposer::new(Rc::clone(&worker))),
            previews: PreviewCache::new(config.paths.preview_cache.clone()),
            timings,
            clock,
            timers: TimerQueue::new(),
            resolver,
            backend,
            worker,
            reports: Reports::new(),
            playback: PlaybackPolicy::default(),
        }
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn schedule_after(&mut self, delay: Duration, payload: Scheduled) -> TimerId {
        let now = self.now();
        self.timers.schedule_after(now, delay, payload)
    }

    pub fn request_preview(&mut self, video: &Path) -> bool {
        let sender = self.reports.sender();
        self.previews
            .request(video, &self.backend, self.worker.as_ref(), sender)
    }
}
