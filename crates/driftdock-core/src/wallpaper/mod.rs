//! One desktop-level media window per display.
//!
//! Display changes and edits only schedule a rebuild; the debounced rebuild
//! diffs the current displays against the tracked windows and the stored
//! preferences.

mod prefs;

use std::collections::BTreeMap;
use std::time::Duration;

use driftdock_platform::{DisplayId, DisplayInfo, Frame, WindowId, WindowSpec};
use glam::Vec2;
use tracing::{debug, info, warn};

pub use prefs::{
    parse_prefs, serialize_prefs, LoadedPrefs, WallpaperPreference, WallpaperPrefs, PREFS_KEY,
};

use crate::engine::Platform;
use crate::error::StoreError;
use crate::pool::SurfaceKey;
use crate::services::{Scheduled, Services};
use crate::surface::BackgroundSurface;
use crate::timer::Debouncer;

#[derive(Debug, Clone)]
pub enum WallpaperTimer {
    Rebuild,
}

struct WallpaperWindow {
    window: WindowId,
    frame: Frame,
    /// Deactivated windows stay around hidden for a fast re-show.
    active: bool,
    surface: BackgroundSurface,
}

pub struct WallpaperManager {
    prefs: WallpaperPrefs,
    loaded: bool,
    windows: BTreeMap<DisplayId, WallpaperWindow>,
    rebuild: Debouncer,
    sleeping: bool,
}

impl Default for WallpaperManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WallpaperManager {
    pub fn new() -> Self {
        Self {
            prefs: WallpaperPrefs::new(),
            loaded: false,
            windows: BTreeMap::new(),
            rebuild: Debouncer::new(),
            sleeping: false,
        }
    }

    pub fn preferences(&self) -> &WallpaperPrefs {
        &self.prefs
    }

    pub fn window_for(&self, display: &DisplayId) -> Option<WindowId> {
        self.windows.get(display).map(|entry| entry.window)
    }

    pub fn is_active(&self, display: &DisplayId) -> bool {
        self.windows.get(display).is_some_and(|entry| entry.active)
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn surface(&self, display: &DisplayId) -> Option<&BackgroundSurface> {
        self.windows.get(display).map(|entry| &entry.surface)
    }

    pub fn surface_mut(&mut self, key: &SurfaceKey) -> Option<&mut BackgroundSurface> {
        self.windows
            .values_mut()
            .map(|entry| &mut entry.surface)
            .find(|surface| surface.key() == key)
    }

    /// Reads stored preferences, upgrading older shapes in place.
    pub fn restore(&mut self, platform: &mut Platform) {
        self.loaded = true;
        let Some(raw) = platform.prefs.get(PREFS_KEY) else {
            return;
        };
        let displays = platform.displays.displays().unwrap_or_default();
        let legacy_display = displays
            .iter()
            .find(|display| display.primary)
            .or_else(|| displays.first())
            .map(|display| display.id.clone())
            .unwrap_or_else(|| DisplayId::from("main"));
        let records = platform.docks.fetch_docks().unwrap_or_default();
        let dock_skin = |id: &str| {
            records
                .iter()
                .find(|record| record.id == id)
                .map(|record| record.skin.clone())
        };

        match parse_prefs(&raw, &legacy_display, dock_skin) {
            Ok(loaded) => {
                info!(displays = loaded.prefs.len(), upgraded = loaded.upgraded, "wallpaper preferences loaded");
                self.prefs = loaded.prefs;
                if loaded.upgraded {
                    self.persist(platform);
                }
            }
            Err(err) => warn!("ignoring stored wallpaper preferences: {err}"),
        }
    }

    pub fn apply(
        &mut self,
        display_id: DisplayId,
        preference: WallpaperPreference,
        platform: &mut Platform,
        svc: &mut Services,
    ) {
        info!(display = %display_id, url = %preference.url_path, "wallpaper applied");
        self.prefs.insert(display_id, preference);
        self.persist(platform);
        self.schedule_rebuild(svc.timings.wallpaper_edit_rebuild(), svc);
    }

    pub fn clear(&mut self, display_id: &DisplayId, platform: &mut Platform, svc: &mut Services) {
        if self.prefs.remove(display_id).is_none() {
            return;
        }
        info!(display = %display_id, "wallpaper cleared");
        self.persist(platform);
        self.schedule_rebuild(svc.timings.wallpaper_edit_rebuild(), svc);
    }

    /// Flips mute on the live player without rebuilding. Returns the new state.
    pub fn toggle_mute(&mut self, display: &DisplayId, platform: &mut Platform, svc: &mut Services) -> Option<bool> {
        let preference = self.prefs.get_mut(display)?;
        preference.is_muted = !preference.is_muted;
        let muted = preference.is_muted;
        self.persist(platform);
        self.apply_preference(display, platform, svc);
        Some(muted)
    }

    pub fn schedule_rebuild(&mut self, delay: Duration, svc: &mut Services) {
        let now = svc.now();
        self.rebuild
            .schedule(&mut svc.timers, now, delay, Scheduled::Wallpaper(WallpaperTimer::Rebuild));
    }

    pub fn on_timer(&mut self, timer: WallpaperTimer, platform: &mut Platform, svc: &mut Services) {
        match timer {
            WallpaperTimer::Rebuild => {
                self.rebuild.fired();
                self.rebuild_now(platform, svc);
            }
        }
    }

    fn rebuild_now(&mut self, platform: &mut Platform, svc: &mut Services) {
        if self.sleeping {
            debug!("skipping wallpaper rebuild while asleep");
            return;
        }
        if !self.loaded {
            self.restore(platform);
        }
        let displays = match platform.displays.displays() {
            Ok(displays) => displays,
            Err(err) => {
                warn!("display enumeration failed; keeping wallpaper windows: {err}");
                return;
            }
        };

        let mut shown = 0;
        for display in &displays {
            if self.prefs.contains_key(&display.id) {
                if self.show(display, platform, svc) {
                    shown += 1;
                }
            } else {
                self.deactivate(&display.id, platform, svc);
            }
        }

        let vanished: Vec<DisplayId> = self
            .windows
            .keys()
            .filter(|id| !displays.iter().any(|display| &display.id == *id))
            .cloned()
            .collect();
        for id in &vanished {
            self.destroy(id, platform, svc);
        }
        info!(
            displays = displays.len(),
            shown,
            removed = vanished.len(),
            "wallpaper windows rebuilt"
        );
    }

    /// Updates or creates the window for a configured display.
    fn show(&mut self, monitor: &DisplayInfo, platform: &mut Platform, svc: &mut Services) -> bool {
        let frame = Frame::from(monitor.rect);
        match self.windows.get_mut(&monitor.id) {
            Some(entry) => {
                if entry.frame != frame {
                    platform.windows.set_frame(entry.window, frame);
                    entry.frame = frame;
                    entry.surface.set_container(Vec2::new(frame.width, frame.height));
                }
                if !entry.active {
                    platform.windows.set_visible(entry.window, true);
                    match platform.windows.attach_content(entry.window) {
                        Ok(view) => entry.surface.attach_view(view, svc),
                        Err(err) => {
                            warn!(display = %monitor.id, "failed to attach wallpaper content: {err}");
                            return false;
                        }
                    }
                    entry.active = true;
                }
            }
            None => {
                let window = match platform.windows.create_window(&WindowSpec::wallpaper(monitor)) {
                    Ok(window) => window,
                    Err(err) => {
                        warn!(display = %monitor.id, "failed to create wallpaper window: {err}");
                        return false;
                    }
                };
                platform.windows.set_visible(window, true);
                let mut surface =
                    BackgroundSurface::new(SurfaceKey::wallpaper(&monitor.id), svc.playback.enabled());
                surface.set_container(Vec2::new(frame.width, frame.height));
                match platform.windows.attach_content(window) {
                    Ok(view) => surface.attach_view(view, svc),
                    Err(err) => {
                        warn!(display = %monitor.id, "failed to attach wallpaper content: {err}");
                        platform.windows.close_window(window);
                        return false;
                    }
                }
                debug!(display = %monitor.id, %window, "wallpaper window created");
                self.windows.insert(
                    monitor.id.clone(),
                    WallpaperWindow {
                        window,
                        frame,
                        active: true,
                        surface,
                    },
                );
            }
        }
        self.apply_preference(&monitor.id, platform, svc);
        true
    }

    /// Pushes the stored preference into the display's surface, refreshing a
    /// stale grant on the way.
    fn apply_preference(&mut self, display_id: &DisplayId, platform: &mut Platform, svc: &mut Services) {
        let Some(preference) = self.prefs.get_mut(display_id) else {
            return;
        };
        let resolved = svc.resolver.resolve(&preference.reference());
        let refreshed = resolved.refreshed.is_some();
        if let Some(reference) = resolved.refreshed {
            info!(display = %display_id, path = %reference.path, "wallpaper access grant refreshed");
            preference.set_reference(reference);
        }
        let descriptor = preference.descriptor(resolved.source);
        if refreshed {
            self.persist(platform);
        }
        if let Some(entry) = self.windows.get_mut(display_id).filter(|entry| entry.active) {
            entry.surface.set_descriptor(descriptor, svc);
        }
    }

    fn deactivate(&mut self, display_id: &DisplayId, platform: &mut Platform, svc: &mut Services) {
        let Some(entry) = self.windows.get_mut(display_id) else {
            return;
        };
        if !entry.active {
            return;
        }
        entry.surface.release(svc);
        platform.windows.detach_content(entry.window);
        platform.windows.set_visible(entry.window, false);
        entry.active = false;
        debug!(display = %display_id, "wallpaper window deactivated");
    }

    fn destroy(&mut self, display_id: &DisplayId, platform: &mut Platform, svc: &mut Services) {
        let Some(mut entry) = self.windows.remove(display_id) else {
            return;
        };
        entry.surface.release(svc);
        if entry.active {
            platform.windows.detach_content(entry.window);
        }
        platform.windows.close_window(entry.window);
        debug!(display = %display_id, window = %entry.window, "wallpaper window destroyed");
    }

    /// Desktop windows do not survive sleep; they are rebuilt after wake.
    pub fn sleep(&mut self, platform: &mut Platform, svc: &mut Services) {
        self.sleeping = true;
        self.rebuild.cancel(&mut svc.timers);
        let displays: Vec<DisplayId> = self.windows.keys().cloned().collect();
        for display in &displays {
            self.destroy(display, platform, svc);
        }
        info!(closed = displays.len(), "wallpaper windows closed for sleep");
    }

    pub fn wake(&mut self, svc: &mut Services) {
        self.sleeping = false;
        self.schedule_rebuild(svc.timings.wallpaper_rebuild(), svc);
    }

    pub fn set_window_visible(&mut self, window: WindowId, visible: bool, svc: &mut Services) {
        if let Some(entry) = self.windows.values_mut().find(|entry| entry.window == window) {
            entry.surface.set_window_visible(visible, svc);
        }
    }

    pub fn set_playback_enabled(&mut self, enabled: bool, svc: &mut Services) {
        for entry in self.windows.values_mut() {
            entry.surface.set_playback_enabled(enabled, svc);
        }
    }

    pub fn refresh_policy(&mut self, svc: &mut Services) {
        for entry in self.windows.values_mut().filter(|entry| entry.active) {
            entry.surface.refresh_policy(svc);
        }
    }

    fn persist(&self, platform: &mut Platform) {
        let raw = match serialize_prefs(&self.prefs) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("failed to encode wallpaper preferences: {err}");
                return;
            }
        };
        if let Err(err) = platform.prefs.set(PREFS_KEY, raw) {
            warn!("failed to persist wallpaper preferences: {}", StoreError::Prefs(err));
        }
    }
}
