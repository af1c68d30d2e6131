//! Dock windows: creation, content attachment, persistence and the
//! sleep/resume protocol.
//!
//! Shells are always created before any content is attached, and both run as
//! staggered timer chains carrying a batch token. Sleep and teardown advance
//! the batch counters, so a chain interrupted half way simply stops.

mod frame;

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use driftdock_platform::{Appearance, DockRecord, Frame, SkinRecord, WindowId, WindowSpec};
use glam::Vec2;
use tracing::{debug, info, warn};

pub use frame::{format_geometry, parse_geometry, snap_to_edges, DEFAULT_DOCK_FRAME};

use crate::config::{Timings, WindowSettings};
use crate::engine::Platform;
use crate::error::StoreError;
use crate::generation::{Generation, LoadToken};
use crate::media::MediaDescriptor;
use crate::pool::SurfaceKey;
use crate::resolver::ScopedReference;
use crate::services::{Scheduled, Services};
use crate::surface::BackgroundSurface;
use crate::timer::Debouncer;

#[derive(Debug, Clone)]
pub enum SessionTimer {
    CreateNext { token: LoadToken },
    AttachNext { token: LoadToken },
    CloseNext { token: LoadToken },
    SaveFrames,
}

/// Spacing of one staggered bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stagger {
    pub shell: Duration,
    pub attach: Duration,
}

impl Stagger {
    /// Roughly one per event-loop tick.
    pub fn launch(timings: &Timings) -> Self {
        let tick = Timings::ms(timings.launch_stagger);
        Self {
            shell: tick,
            attach: tick,
        }
    }

    pub fn wake(timings: &Timings) -> Self {
        Self {
            shell: Timings::ms(timings.wake_shell_spacing),
            attach: Timings::ms(timings.wake_attach_spacing),
        }
    }
}

struct DockWindow {
    window: WindowId,
    record: DockRecord,
    attached: bool,
    surface: BackgroundSurface,
}

pub struct WindowSessionManager {
    docks: BTreeMap<String, DockWindow>,
    by_window: HashMap<WindowId, String>,
    creation: Generation,
    attach: Generation,
    teardown: Generation,
    create_queue: VecDeque<DockRecord>,
    attach_queue: VecDeque<String>,
    close_queue: VecDeque<String>,
    stagger: Option<Stagger>,
    /// Launch again once the running teardown chain finishes.
    relaunch_after_teardown: bool,
    save: Debouncer,
    dirty: BTreeSet<String>,
    prior_visibility: HashMap<String, bool>,
    settings: WindowSettings,
}

impl WindowSessionManager {
    pub fn new(settings: WindowSettings) -> Self {
        Self {
            docks: BTreeMap::new(),
            by_window: HashMap::new(),
            creation: Generation::new(),
            attach: Generation::new(),
            teardown: Generation::new(),
            create_queue: VecDeque::new(),
            attach_queue: VecDeque::new(),
            close_queue: VecDeque::new(),
            stagger: None,
            relaunch_after_teardown: false,
            save: Debouncer::new(),
            dirty: BTreeSet::new(),
            prior_visibility: HashMap::new(),
            settings,
        }
    }

    pub fn len(&self) -> usize {
        self.docks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docks.is_empty()
    }

    pub fn dock_ids(&self) -> impl Iterator<Item = &str> {
        self.docks.keys().map(String::as_str)
    }

    pub fn window_for(&self, dock_id: &str) -> Option<WindowId> {
        self.docks.get(dock_id).map(|dock| dock.window)
    }

    pub fn is_attached(&self, dock_id: &str) -> bool {
        self.docks.get(dock_id).is_some_and(|dock| dock.attached)
    }

    pub fn record(&self, dock_id: &str) -> Option<&DockRecord> {
        self.docks.get(dock_id).map(|dock| &dock.record)
    }

    pub fn surface(&self, dock_id: &str) -> Option<&BackgroundSurface> {
        self.docks.get(dock_id).map(|dock| &dock.surface)
    }

    pub fn surface_mut(&mut self, key: &SurfaceKey) -> Option<&mut BackgroundSurface> {
        self.docks
            .values_mut()
            .map(|dock| &mut dock.surface)
            .find(|surface| surface.key() == key)
    }

    /// Materializes every stored dock that has no window yet, then attaches
    /// content to every shell that lacks it.
    pub fn launch(&mut self, stagger: Stagger, platform: &mut Platform, svc: &mut Services) {
        let records = match platform.docks.fetch_docks() {
            Ok(records) => records,
            Err(err) => {
                warn!("{}", StoreError::Docks(err));
                return;
            }
        };

        let token = self.creation.advance();
        self.attach.advance();
        self.attach_queue.clear();
        self.stagger = Some(stagger);
        self.create_queue = records
            .into_iter()
            .filter(|record| !self.docks.contains_key(&record.id))
            .collect();

        info!(
            existing = self.docks.len(),
            pending = self.create_queue.len(),
            "launching dock windows"
        );
        svc.schedule_after(Duration::ZERO, Scheduled::Session(SessionTimer::CreateNext { token }));
    }

    /// Closes every window in a staggered chain, then launches from the store.
    pub fn reload_from_store(&mut self, platform: &mut Platform, svc: &mut Services) {
        self.flush_saves(platform, svc);
        let token = self.teardown.advance();
        self.creation.advance();
        self.attach.advance();
        self.create_queue.clear();
        self.attach_queue.clear();
        self.close_queue = self.docks.keys().cloned().collect();
        self.relaunch_after_teardown = true;
        info!(windows = self.close_queue.len(), "reloading docks from store");
        svc.schedule_after(Duration::ZERO, Scheduled::Session(SessionTimer::CloseNext { token }));
    }

    pub fn on_timer(&mut self, timer: SessionTimer, platform: &mut Platform, svc: &mut Services) {
        match timer {
            SessionTimer::CreateNext { token } => self.create_next(token, platform, svc),
            SessionTimer::AttachNext { token } => self.attach_next(token, platform, svc),
            SessionTimer::CloseNext { token } => self.close_next(token, platform, svc),
            SessionTimer::SaveFrames => {
                self.save.fired();
                self.flush_saves(platform, svc);
            }
        }
    }

    fn create_next(&mut self, token: LoadToken, platform: &mut Platform, svc: &mut Services) {
        if !self.creation.is_current(token) {
            debug!(generation = token.generation(), "stale creation batch");
            return;
        }
        let stagger = self.stagger.unwrap_or_else(|| Stagger::launch(&svc.timings));

        if let Some(record) = self.create_queue.pop_front() {
            if !self.docks.contains_key(&record.id) {
                self.create_shell(record, platform, svc);
            }
            svc.schedule_after(stagger.shell, Scheduled::Session(SessionTimer::CreateNext { token }));
            return;
        }

        // Every shell exists; start attaching.
        let token = self.attach.advance();
        self.attach_queue = self
            .docks
            .iter()
            .filter(|(_, dock)| !dock.attached)
            .map(|(id, _)| id.clone())
            .collect();
        if !self.attach_queue.is_empty() {
            svc.schedule_after(stagger.attach, Scheduled::Session(SessionTimer::AttachNext { token }));
        }
    }

    fn attach_next(&mut self, token: LoadToken, platform: &mut Platform, svc: &mut Services) {
        if !self.attach.is_current(token) {
            debug!(generation = token.generation(), "stale attach batch");
            return;
        }
        let Some(dock_id) = self.attach_queue.pop_front() else {
            return;
        };
        self.attach_content(&dock_id, platform, svc);
        if !self.attach_queue.is_empty() {
            let spacing = self
                .stagger
                .map_or_else(|| Timings::ms(svc.timings.launch_stagger), |s| s.attach);
            svc.schedule_after(spacing, Scheduled::Session(SessionTimer::AttachNext { token }));
        }
    }

    fn close_next(&mut self, token: LoadToken, platform: &mut Platform, svc: &mut Services) {
        if !self.teardown.is_current(token) {
            debug!(generation = token.generation(), "stale teardown batch");
            return;
        }
        if let Some(dock_id) = self.close_queue.pop_front() {
            self.destroy(&dock_id, platform, svc);
            let spacing = Timings::ms(svc.timings.launch_stagger);
            svc.schedule_after(spacing, Scheduled::Session(SessionTimer::CloseNext { token }));
            return;
        }
        if std::mem::take(&mut self.relaunch_after_teardown) {
            let stagger = Stagger::launch(&svc.timings);
            self.launch(stagger, platform, svc);
        }
    }

    fn create_shell(&mut self, record: DockRecord, platform: &mut Platform, svc: &mut Services) -> bool {
        let frame = parse_geometry(&record.geometry).unwrap_or_else(|| {
            warn!(dock = %record.id, geometry = %record.geometry, "unreadable geometry; using default frame");
            DEFAULT_DOCK_FRAME
        });
        let window = match platform.windows.create_window(&WindowSpec::dock(&record.name, frame)) {
            Ok(window) => window,
            Err(err) => {
                warn!(dock = %record.id, "failed to create dock window: {err}");
                return false;
            }
        };
        platform.windows.set_appearance(window, &record.appearance);
        platform.windows.set_visible(window, record.visible);

        let mut surface = BackgroundSurface::new(SurfaceKey::dock(&record.id), svc.playback.enabled());
        surface.set_container(Vec2::new(frame.width, frame.height));
        surface.set_window_visible(record.visible, svc);
        debug!(dock = %record.id, %window, "dock shell created");

        self.by_window.insert(window, record.id.clone());
        self.docks.insert(
            record.id.clone(),
            DockWindow {
                window,
                record,
                attached: false,
                surface,
            },
        );
        true
    }

    /// Attaches the rendering view once per shell; later calls are no-ops.
    pub fn attach_content(&mut self, dock_id: &str, platform: &mut Platform, svc: &mut Services) -> bool {
        let Some(dock) = self.docks.get_mut(dock_id) else {
            return false;
        };
        if dock.attached {
            debug!(dock = %dock_id, "content already attached");
            return false;
        }
        let view = match platform.windows.attach_content(dock.window) {
            Ok(view) => view,
            Err(err) => {
                warn!(dock = %dock_id, "failed to attach content: {err}");
                return false;
            }
        };
        dock.attached = true;
        dock.surface.attach_view(view, svc);
        self.apply_skin(dock_id, platform, svc);
        true
    }

    /// Resolves the dock's skin and hands the result to its surface.
    fn apply_skin(&mut self, dock_id: &str, platform: &mut Platform, svc: &mut Services) {
        let Some(dock) = self.docks.get_mut(dock_id) else {
            return;
        };
        let skin = &dock.record.skin;
        let source = if skin.path.is_some() || skin.grant.is_some() {
            let reference = ScopedReference {
                path: skin.path.clone().unwrap_or_default(),
                grant: skin.grant.clone(),
            };
            let resolved = svc.resolver.resolve(&reference);
            if let Some(refreshed) = resolved.refreshed {
                info!(dock = %dock_id, path = %refreshed.path, "skin access grant refreshed");
                dock.record.skin.path = Some(refreshed.path);
                dock.record.skin.grant = refreshed.grant;
                if let Err(err) = platform.docks.update_dock(&dock.record) {
                    warn!(dock = %dock_id, "{}", StoreError::Docks(err));
                }
                self.dirty.insert(dock_id.to_string());
            }
            resolved.source
        } else {
            None
        };

        let Some(dock) = self.docks.get_mut(dock_id) else {
            return;
        };
        let descriptor = MediaDescriptor::from_skin(&dock.record.skin, source);
        dock.surface.set_descriptor(descriptor, svc);
        if !self.dirty.is_empty() {
            self.schedule_save(svc);
        }
    }

    pub fn create_dock(&mut self, record: DockRecord, platform: &mut Platform, svc: &mut Services) -> bool {
        if self.docks.contains_key(&record.id) {
            warn!(dock = %record.id, "dock already exists");
            return false;
        }
        if let Err(err) = platform.docks.insert_dock(record.clone()) {
            warn!(dock = %record.id, "{}", StoreError::Docks(err));
        }
        if let Err(err) = platform.docks.save() {
            warn!("{}", StoreError::Docks(err));
        }
        let id = record.id.clone();
        info!(dock = %id, "creating dock");
        self.create_shell(record, platform, svc) && self.attach_content(&id, platform, svc)
    }

    pub fn delete_dock(&mut self, dock_id: &str, platform: &mut Platform, svc: &mut Services) {
        self.destroy(dock_id, platform, svc);
        self.dirty.remove(dock_id);
        if let Err(err) = platform.docks.delete_dock(dock_id) {
            warn!(dock = %dock_id, "{}", StoreError::Docks(err));
        }
        if let Err(err) = platform.docks.save() {
            warn!("{}", StoreError::Docks(err));
        }
        info!(dock = %dock_id, "dock deleted");
    }

    /// The user closed the window: the session entry goes, the record stays hidden.
    pub fn window_closed(&mut self, window: WindowId, platform: &mut Platform, svc: &mut Services) {
        let Some(dock_id) = self.by_window.get(&window).cloned() else {
            return;
        };
        if let Some(dock) = self.docks.get_mut(&dock_id) {
            dock.record.visible = false;
            if let Err(err) = platform.docks.update_dock(&dock.record) {
                warn!(dock = %dock_id, "{}", StoreError::Docks(err));
            }
        }
        self.destroy(&dock_id, platform, svc);
        self.dirty.insert(dock_id);
        self.schedule_save(svc);
    }

    fn destroy(&mut self, dock_id: &str, platform: &mut Platform, svc: &mut Services) {
        let Some(mut dock) = self.docks.remove(dock_id) else {
            return;
        };
        self.by_window.remove(&dock.window);
        self.prior_visibility.remove(dock_id);
        dock.surface.release(svc);
        if dock.attached {
            platform.windows.detach_content(dock.window);
        }
        platform.windows.close_window(dock.window);
        debug!(dock = %dock_id, window = %dock.window, "dock window destroyed");
    }

    pub fn moved(&mut self, window: WindowId, frame: Frame, platform: &mut Platform, svc: &mut Services) {
        let Some(dock_id) = self.by_window.get(&window).cloned() else {
            return;
        };
        let displays = platform.displays.displays().unwrap_or_else(|err| {
            debug!("display enumeration failed; skipping snap: {err}");
            Vec::new()
        });
        let snapped = snap_to_edges(frame, &displays, self.settings.snap_threshold);
        if snapped != frame {
            platform.windows.set_frame(window, snapped);
        }
        self.record_frame(&dock_id, snapped, svc);
    }

    pub fn resized(&mut self, window: WindowId, frame: Frame, platform: &mut Platform, svc: &mut Services) {
        let Some(dock_id) = self.by_window.get(&window).cloned() else {
            return;
        };
        let mut frame = frame;
        let locked = self
            .docks
            .get(&dock_id)
            .and_then(|dock| dock.record.appearance.aspect_ratio)
            .filter(|ratio| *ratio > 0.0);
        if let Some(ratio) = locked {
            let height = frame.width / ratio;
            if (height - frame.height).abs() > 0.5 {
                frame.height = height;
                platform.windows.set_frame(window, frame);
            }
        }
        self.record_frame(&dock_id, frame, svc);
    }

    fn record_frame(&mut self, dock_id: &str, frame: Frame, svc: &mut Services) {
        let Some(dock) = self.docks.get_mut(dock_id) else {
            return;
        };
        dock.record.geometry = format_geometry(&frame);
        dock.surface.set_container(Vec2::new(frame.width, frame.height));
        self.dirty.insert(dock_id.to_string());
        self.schedule_save(svc);
    }

    fn schedule_save(&mut self, svc: &mut Services) {
        let now = svc.now();
        let delay = svc.timings.frame_save_debounce();
        self.save
            .schedule(&mut svc.timers, now, delay, Scheduled::Session(SessionTimer::SaveFrames));
    }

    /// Writes dirty records. Failures keep them dirty for the next attempt.
    fn flush_saves(&mut self, platform: &mut Platform, svc: &mut Services) {
        self.save.cancel(&mut svc.timers);
        if self.dirty.is_empty() {
            return;
        }
        let mut failed = false;
        for dock_id in &self.dirty {
            let Some(dock) = self.docks.get(dock_id) else {
                continue;
            };
            if let Err(err) = platform.docks.update_dock(&dock.record) {
                warn!(dock = %dock_id, "{}", StoreError::Docks(err));
                failed = true;
            }
        }
        match platform.docks.save() {
            Ok(()) if !failed => {
                debug!(count = self.dirty.len(), "dock records saved");
                self.dirty.clear();
            }
            Ok(()) => {}
            Err(err) => warn!("save failed; will retry: {}", StoreError::Docks(err)),
        }
    }

    pub fn update_skin(&mut self, dock_id: &str, skin: SkinRecord, platform: &mut Platform, svc: &mut Services) {
        let Some(dock) = self.docks.get_mut(dock_id) else {
            return;
        };
        dock.record.skin = skin;
        if let Err(err) = platform.docks.update_dock(&dock.record) {
            warn!(dock = %dock_id, "{}", StoreError::Docks(err));
        }
        self.dirty.insert(dock_id.to_string());
        self.apply_skin(dock_id, platform, svc);
        self.schedule_save(svc);
    }

    pub fn set_appearance(
        &mut self,
        dock_id: &str,
        appearance: Appearance,
        platform: &mut Platform,
        svc: &mut Services,
    ) {
        let Some(dock) = self.docks.get_mut(dock_id) else {
            return;
        };
        dock.record.appearance = appearance;
        platform.windows.set_appearance(dock.window, &appearance);
        self.dirty.insert(dock_id.to_string());
        self.schedule_save(svc);
    }

    /// Transient fade used by auto-hide; never persisted.
    pub fn set_alpha(&mut self, dock_id: &str, alpha: f32, platform: &mut Platform) {
        if let Some(dock) = self.docks.get(dock_id) {
            platform.windows.set_alpha(dock.window, alpha.clamp(0.0, 1.0));
        }
    }

    pub fn set_window_visible(&mut self, window: WindowId, visible: bool, svc: &mut Services) {
        let Some(dock) = self
            .by_window
            .get(&window)
            .and_then(|dock_id| self.docks.get_mut(dock_id))
        else {
            return;
        };
        dock.surface.set_window_visible(visible, svc);
    }

    pub fn set_playback_enabled(&mut self, enabled: bool, svc: &mut Services) {
        for dock in self.docks.values_mut() {
            dock.surface.set_playback_enabled(enabled, svc);
        }
    }

    pub fn refresh_policy(&mut self, svc: &mut Services) {
        for dock in self.docks.values_mut() {
            dock.surface.refresh_policy(svc);
        }
    }

    /// Stops any running bring-up. Its queue is kept for [`Self::resume`].
    pub fn sleep(&mut self, platform: &mut Platform, svc: &mut Services) {
        self.creation.advance();
        self.attach.advance();
        self.attach_queue.clear();
        self.save.cancel(&mut svc.timers);

        self.prior_visibility = self
            .docks
            .iter()
            .map(|(id, dock)| (id.clone(), platform.windows.is_visible(dock.window)))
            .collect();
        for dock in self.docks.values_mut() {
            dock.surface.sleep(svc);
        }
        info!(windows = self.docks.len(), "dock windows suspended");
    }

    /// Runs after the wake settle delay. The store is only consulted when no
    /// dock windows survived; otherwise the in-memory windows are restored and
    /// an interrupted bring-up picks up where it stopped.
    pub fn resume(&mut self, platform: &mut Platform, svc: &mut Services) {
        let stagger = Stagger::wake(&svc.timings);
        if self.docks.is_empty() {
            info!("no dock windows in memory; reloading from store");
            self.prior_visibility.clear();
            self.launch(stagger, platform, svc);
            return;
        }

        for (id, dock) in self.docks.iter_mut() {
            let visible = self
                .prior_visibility
                .get(id)
                .copied()
                .unwrap_or(dock.record.visible);
            platform.windows.set_visible(dock.window, visible);
            platform.windows.set_appearance(dock.window, &dock.record.appearance);
            dock.surface.set_window_visible(visible, svc);
            dock.surface.wake(svc);
        }
        info!(windows = self.docks.len(), "dock windows restored");
        self.prior_visibility.clear();
        if !self.dirty.is_empty() {
            self.schedule_save(svc);
        }
        self.continue_bring_up(stagger, svc);
    }

    fn continue_bring_up(&mut self, stagger: Stagger, svc: &mut Services) {
        self.create_queue.retain(|record| !self.docks.contains_key(&record.id));
        let unattached = self.docks.values().filter(|dock| !dock.attached).count();
        if self.create_queue.is_empty() && unattached == 0 {
            return;
        }
        let token = self.creation.advance();
        self.attach.advance();
        self.stagger = Some(stagger);
        info!(
            pending = self.create_queue.len(),
            unattached, "continuing interrupted dock bring-up"
        );
        svc.schedule_after(Duration::ZERO, Scheduled::Session(SessionTimer::CreateNext { token }));
    }
}
