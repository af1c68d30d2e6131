//! The main-context entry point.
//!
//! The host owns an [`Engine`], feeds it [`SystemEvent`]s and UI calls, and
//! calls [`Engine::pump`] whenever a worker report may have arrived or the
//! deadline returned by the previous pump has passed. A host with its own
//! event loop can take the reports itself with [`Engine::set_report_sink`].

use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use driftdock_platform::{
    AccessGrants, Appearance, DisplayId, DisplayProvider, DockRecord, DockStore, KeyValueStore,
    MediaBackend, SkinRecord, SystemEvent, WindowServer,
};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::generation::{Generation, LoadToken};
use crate::pool::SurfaceKey;
use crate::resolver::ScopedAccessResolver;
use crate::services::{Scheduled, Services};
use crate::session::{Stagger, WindowSessionManager};
use crate::surface::{BackgroundSurface, SurfaceTimer};
use crate::wallpaper::{WallpaperManager, WallpaperPreference};
use crate::worker::{ReportSink, Worker, WorkerReport};

/// External collaborators driven from the main context.
pub struct Platform {
    pub windows: Box<dyn WindowServer>,
    pub displays: Box<dyn DisplayProvider>,
    pub docks: Box<dyn DockStore>,
    pub prefs: Box<dyn KeyValueStore>,
}

#[derive(Debug, Clone)]
pub enum EngineTimer {
    WakeSettled { token: LoadToken },
    ResumePlayback { token: LoadToken },
}

pub struct Engine {
    services: Services,
    platform: Platform,
    sessions: WindowSessionManager,
    wallpapers: WallpaperManager,
    /// Advanced on every power or session transition.
    power: Generation,
}

impl Engine {
    pub fn new(
        config: &EngineConfig,
        platform: Platform,
        clock: Arc<dyn Clock>,
        grants: Arc<dyn AccessGrants>,
        backend: Arc<dyn MediaBackend>,
        worker: Rc<dyn Worker>,
    ) -> Self {
        let resolver = Arc::new(ScopedAccessResolver::new(grants));
        Self {
            services: Services::new(config, clock, resolver, backend, worker),
            platform,
            sessions: WindowSessionManager::new(config.windows.clone()),
            wallpapers: WallpaperManager::new(),
            power: Generation::new(),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn sessions(&self) -> &WindowSessionManager {
        &self.sessions
    }

    pub fn wallpapers(&self) -> &WallpaperManager {
        &self.wallpapers
    }

    pub fn resolver(&self) -> &ScopedAccessResolver {
        &self.services.resolver
    }

    /// Posts worker reports to `sink` instead of the internal queue. The host
    /// hands each one back through [`Engine::deliver_report`]. Install it before
    /// [`Engine::start`].
    pub fn set_report_sink(&mut self, sink: Arc<dyn ReportSink>) {
        self.services.reports.redirect(sink);
    }

    /// Handles one report, then runs whatever became due.
    pub fn deliver_report(&mut self, report: WorkerReport) -> Option<Instant> {
        self.on_report(report);
        self.pump()
    }

    /// Launches the stored docks and the wallpaper windows.
    pub fn start(&mut self) {
        info!("engine starting");
        let stagger = Stagger::launch(&self.services.timings);
        self.sessions.launch(stagger, &mut self.platform, &mut self.services);
        self.wallpapers.restore(&mut self.platform);
        self.wallpapers
            .schedule_rebuild(std::time::Duration::ZERO, &mut self.services);
    }

    pub fn handle_event(&mut self, event: SystemEvent) {
        let svc = &mut self.services;
        let platform = &mut self.platform;
        match event {
            SystemEvent::WillSleep => {
                info!("system will sleep");
                self.power.advance();
                svc.playback.suspended = true;
                self.sessions.sleep(platform, svc);
                self.wallpapers.sleep(platform, svc);
                self.broadcast_playback();
            }
            SystemEvent::DidWake => {
                let token = self.power.advance();
                let settle = svc.timings.wake_settle();
                info!(?settle, "system woke; waiting for the window server to settle");
                svc.schedule_after(settle, Scheduled::Engine(EngineTimer::WakeSettled { token }));
            }
            SystemEvent::SessionInactive => {
                info!("session inactive; pausing playback");
                self.power.advance();
                svc.playback.suspended = true;
                self.broadcast_playback();
            }
            SystemEvent::SessionActive => {
                let token = self.power.advance();
                let delay = svc.timings.resume_after_session();
                info!(?delay, "session active; playback resume scheduled");
                svc.schedule_after(delay, Scheduled::Engine(EngineTimer::ResumePlayback { token }));
            }
            SystemEvent::DisplaysChanged => {
                let delay = svc.timings.wallpaper_rebuild();
                self.wallpapers.schedule_rebuild(delay, svc);
            }
            SystemEvent::Occlusion { window, visible } => {
                self.sessions.set_window_visible(window, visible, svc);
                self.wallpapers.set_window_visible(window, visible, svc);
            }
            SystemEvent::Miniaturized(window) => self.sessions.set_window_visible(window, false, svc),
            SystemEvent::Deminiaturized(window) => self.sessions.set_window_visible(window, true, svc),
            SystemEvent::WindowClosed(window) => self.sessions.window_closed(window, platform, svc),
            SystemEvent::WindowMoved { window, frame } => {
                self.sessions.moved(window, frame, platform, svc)
            }
            SystemEvent::WindowResized { window, frame } => {
                self.sessions.resized(window, frame, platform, svc)
            }
        }
    }

    /// Drains worker reports and runs every due timer. Returns the next deadline.
    pub fn pump(&mut self) -> Option<Instant> {
        loop {
            let mut progressed = false;
            while let Some(report) = self.services.reports.try_recv() {
                self.on_report(report);
                progressed = true;
            }
            let now = self.services.now();
            if let Some(due) = self.services.timers.pop_due(now) {
                self.on_timer(due);
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
        self.next_deadline()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.services.timers.next_deadline()
    }

    fn on_report(&mut self, report: WorkerReport) {
        match report {
            WorkerReport::Probe(report) => {
                let key = report.key.clone();
                match find_surface(&mut self.sessions, &mut self.wallpapers, &key) {
                    Some(surface) => surface.on_probe_report(report, &mut self.services),
                    None => debug!(%key, "probe result for a surface that no longer exists"),
                }
            }
            WorkerReport::PreviewReady { video, preview } => {
                let ready = preview.is_some();
                self.services.previews.complete(video, preview);
                if ready && !self.services.playback.video_allowed {
                    self.refresh_policy();
                }
            }
        }
    }

    fn on_timer(&mut self, scheduled: Scheduled) {
        match scheduled {
            Scheduled::Surface { key, timer } => self.on_surface_timer(key, timer),
            Scheduled::Session(timer) => {
                self.sessions
                    .on_timer(timer, &mut self.platform, &mut self.services)
            }
            Scheduled::Wallpaper(timer) => {
                self.wallpapers
                    .on_timer(timer, &mut self.platform, &mut self.services)
            }
            Scheduled::Engine(EngineTimer::WakeSettled { token }) => self.on_wake_settled(token),
            Scheduled::Engine(EngineTimer::ResumePlayback { token }) => {
                if !self.power.is_current(token) {
                    debug!("stale playback resume");
                    return;
                }
                info!("resuming playback");
                self.services.playback.suspended = false;
                self.broadcast_playback();
            }
        }
    }

    fn on_surface_timer(&mut self, key: SurfaceKey, timer: SurfaceTimer) {
        match find_surface(&mut self.sessions, &mut self.wallpapers, &key) {
            Some(surface) => surface.on_timer(timer, &mut self.services),
            None => debug!(%key, "timer for a surface that no longer exists"),
        }
    }

    fn on_wake_settled(&mut self, token: LoadToken) {
        if !self.power.is_current(token) {
            debug!("stale wake settle");
            return;
        }
        info!("resuming windows after wake");
        self.sessions.resume(&mut self.platform, &mut self.services);
        self.wallpapers.wake(&mut self.services);
        let delay = self.services.timings.resume_after_wake();
        self.services
            .schedule_after(delay, Scheduled::Engine(EngineTimer::ResumePlayback { token }));
    }

    fn broadcast_playback(&mut self) {
        let enabled = self.services.playback.enabled();
        self.sessions.set_playback_enabled(enabled, &mut self.services);
        self.wallpapers.set_playback_enabled(enabled, &mut self.services);
    }

    fn refresh_policy(&mut self) {
        self.sessions.refresh_policy(&mut self.services);
        self.wallpapers.refresh_policy(&mut self.services);
    }

    // UI entry points.

    pub fn create_dock(&mut self, record: DockRecord) -> bool {
        self.sessions
            .create_dock(record, &mut self.platform, &mut self.services)
    }

    pub fn delete_dock(&mut self, dock_id: &str) {
        self.sessions
            .delete_dock(dock_id, &mut self.platform, &mut self.services);
    }

    /// Attaches rendering content to a dock's window; a no-op when already attached.
    pub fn attach_dock(&mut self, dock_id: &str) -> bool {
        self.sessions
            .attach_content(dock_id, &mut self.platform, &mut self.services)
    }

    pub fn update_skin(&mut self, dock_id: &str, skin: SkinRecord) {
        self.sessions
            .update_skin(dock_id, skin, &mut self.platform, &mut self.services);
    }

    pub fn set_appearance(&mut self, dock_id: &str, appearance: Appearance) {
        self.sessions
            .set_appearance(dock_id, appearance, &mut self.platform, &mut self.services);
    }

    pub fn set_alpha(&mut self, dock_id: &str, alpha: f32) {
        self.sessions.set_alpha(dock_id, alpha, &mut self.platform);
    }

    pub fn reload_docks(&mut self) {
        self.sessions
            .reload_from_store(&mut self.platform, &mut self.services);
    }

    pub fn apply_wallpaper(&mut self, display: DisplayId, preference: WallpaperPreference) {
        self.wallpapers
            .apply(display, preference, &mut self.platform, &mut self.services);
    }

    pub fn clear_wallpaper(&mut self, display: &DisplayId) {
        self.wallpapers
            .clear(display, &mut self.platform, &mut self.services);
    }

    pub fn toggle_wallpaper_mute(&mut self, display: &DisplayId) -> Option<bool> {
        self.wallpapers
            .toggle_mute(display, &mut self.platform, &mut self.services)
    }

    pub fn set_playback_enabled(&mut self, enabled: bool) {
        info!(enabled, "playback toggle changed");
        self.services.playback.user_enabled = enabled;
        self.broadcast_playback();
    }

    pub fn set_video_allowed(&mut self, allowed: bool) {
        if self.services.playback.video_allowed == allowed {
            return;
        }
        info!(allowed, "video playback allowance changed");
        self.services.playback.video_allowed = allowed;
        self.refresh_policy();
    }
}

fn find_surface<'a>(
    sessions: &'a mut WindowSessionManager,
    wallpapers: &'a mut WallpaperManager,
    key: &SurfaceKey,
) -> Option<&'a mut BackgroundSurface> {
    match sessions.surface_mut(key) {
        Some(surface) => Some(surface),
        None => wallpapers.surface_mut(key),
    }
}
