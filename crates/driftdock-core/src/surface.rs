//! The per-window background renderer.
//!
//! A surface shows at most one piece of media. Loads go through a probe on a
//! worker, then (for video) a Load Gate slot before the player is built, and
//! every step re-checks the load token it started with. Playback follows a
//! single derived predicate over window visibility, power state and the
//! system-wide toggle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use driftdock_platform::{DecodedImage, Frame, MediaBackend, SurfaceView, VideoInfo};
use glam::Vec2;
use tracing::{debug, info, warn};

use crate::error::MediaError;
use crate::generation::{Generation, LoadToken};
use crate::geometry::layout_media;
use crate::media::{decode_image, MediaDescriptor, MediaKind};
use crate::pool::{PooledMedia, SurfaceKey};
use crate::resolver::{MediaSource, ScopedAccessResolver};
use crate::services::{Scheduled, Services};
use crate::worker::{ProbeOutcome, ProbeReport, WorkerReport};

#[derive(Debug, Clone)]
pub enum SurfaceTimer {
    Retry { token: LoadToken, attempt: u8 },
    GateFired { token: LoadToken, info: VideoInfo },
    WakeReload { token: LoadToken },
}

/// The three inputs that decide whether media plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackState {
    pub window_visible: bool,
    pub awake: bool,
    pub playback_enabled: bool,
}

impl PlaybackState {
    pub fn should_play(&self) -> bool {
        self.window_visible && self.awake && self.playback_enabled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfacePhase {
    Empty,
    Loading,
    Ready { playing: bool },
    Sleeping,
}

enum Content {
    Empty,
    Loading { token: LoadToken },
    Image { image: DecodedImage },
    /// The player lives in the pool under this surface's key.
    Video,
}

pub struct BackgroundSurface {
    key: SurfaceKey,
    /// What the owner asked for.
    requested: Option<MediaDescriptor>,
    /// What is actually loaded, after the preview substitution.
    target: Option<MediaDescriptor>,
    generation: Generation,
    content: Content,
    playback: PlaybackState,
    view: Option<Box<dyn SurfaceView>>,
    container: Vec2,
    natural: Option<Vec2>,
    layout: Option<Frame>,
    pending_reload: bool,
}

impl BackgroundSurface {
    pub fn new(key: SurfaceKey, playback_enabled: bool) -> Self {
        Self {
            key,
            requested: None,
            target: None,
            generation: Generation::new(),
            content: Content::Empty,
            playback: PlaybackState {
                window_visible: true,
                awake: true,
                playback_enabled,
            },
            view: None,
            container: Vec2::ZERO,
            natural: None,
            layout: None,
            pending_reload: false,
        }
    }

    pub fn key(&self) -> &SurfaceKey {
        &self.key
    }

    pub fn target(&self) -> Option<&MediaDescriptor> {
        self.target.as_ref()
    }

    pub fn playback(&self) -> PlaybackState {
        self.playback
    }

    pub fn layout(&self) -> Option<Frame> {
        self.layout
    }

    pub fn has_view(&self) -> bool {
        self.view.is_some()
    }

    pub fn pending_reload(&self) -> bool {
        self.pending_reload
    }

    pub fn load_generation(&self) -> u64 {
        self.generation.value()
    }

    pub fn phase(&self) -> SurfacePhase {
        match self.content {
            Content::Empty if self.pending_reload && !self.playback.awake => SurfacePhase::Sleeping,
            Content::Empty => SurfacePhase::Empty,
            Content::Loading { .. } => SurfacePhase::Loading,
            Content::Image { .. } | Content::Video if !self.playback.awake => SurfacePhase::Sleeping,
            Content::Image { .. } | Content::Video => SurfacePhase::Ready {
                playing: self.playback.should_play(),
            },
        }
    }

    /// Gives the surface somewhere to draw. Pended loads start now.
    pub fn attach_view(&mut self, view: Box<dyn SurfaceView>, svc: &mut Services) {
        self.view = Some(view);
        if self.pending_reload && self.playback.awake {
            self.reload(svc);
        } else {
            self.present_current(svc);
        }
    }

    /// Drops everything: pending work, the pooled player and the view.
    pub fn release(&mut self, svc: &mut Services) {
        self.generation.advance();
        svc.pool.remove(&self.key);
        if let Some(mut view) = self.view.take() {
            view.clear();
        }
        self.content = Content::Empty;
        self.requested = None;
        self.target = None;
        self.natural = None;
        self.pending_reload = false;
    }

    pub fn set_descriptor(&mut self, descriptor: Option<MediaDescriptor>, svc: &mut Services) {
        self.requested = descriptor.clone();
        let effective = self.substitute(descriptor, svc);

        let unchanged = match (&self.target, &effective) {
            (Some(current), Some(next)) => current.same_media(next),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            self.target = effective;
            self.apply_transform(svc);
            return;
        }

        debug!(key = %self.key, to = ?effective.as_ref().map(|d| d.source.to_string()), "media changed");
        self.target = effective;
        self.reload(svc);
    }

    /// Re-evaluates the preview substitution, e.g. after the toggle flips.
    pub fn refresh_policy(&mut self, svc: &mut Services) {
        let requested = self.requested.clone();
        self.set_descriptor(requested, svc);
    }

    pub fn set_container(&mut self, size: Vec2) {
        self.container = size;
        self.relayout();
    }

    pub fn set_window_visible(&mut self, visible: bool, svc: &mut Services) {
        if self.playback.window_visible == visible {
            return;
        }
        self.playback.window_visible = visible;
        if visible && self.pending_reload && self.playback.awake && self.view.is_some() {
            self.reload(svc);
        } else {
            self.apply_playback(svc);
        }
    }

    pub fn set_playback_enabled(&mut self, enabled: bool, svc: &mut Services) {
        if self.playback.playback_enabled == enabled {
            return;
        }
        self.playback.playback_enabled = enabled;
        self.apply_playback(svc);
    }

    pub fn sleep(&mut self, svc: &mut Services) {
        self.playback.awake = false;
        match self.content {
            Content::Loading { .. } => {
                self.pending_reload = true;
                self.content = Content::Empty;
            }
            Content::Video => self.pending_reload = true,
            Content::Empty | Content::Image { .. } => {}
        }
        self.apply_playback(svc);
    }

    pub fn wake(&mut self, svc: &mut Services) {
        self.playback.awake = true;
        if self.pending_reload {
            let delay = svc.timings.wake_reload_delay(self.key.seed());
            let token = self.generation.current();
            debug!(key = %self.key, ?delay, "scheduling wake reload");
            svc.schedule_after(
                delay,
                Scheduled::Surface {
                    key: self.key.clone(),
                    timer: SurfaceTimer::WakeReload { token },
                },
            );
        } else {
            self.apply_playback(svc);
        }
    }

    pub fn on_timer(&mut self, timer: SurfaceTimer, svc: &mut Services) {
        match timer {
            SurfaceTimer::Retry { token, attempt } => self.on_retry(token, attempt, svc),
            SurfaceTimer::GateFired { token, info } => self.on_gate_fired(token, info, svc),
            SurfaceTimer::WakeReload { token } => self.on_wake_reload(token, svc),
        }
    }

    pub fn on_probe_report(&mut self, report: ProbeReport, svc: &mut Services) {
        if !self.is_current_load(report.token, &report.source, report.kind) {
            debug!(key = %self.key, generation = report.token.generation(), "discarding stale probe result");
            return;
        }
        if !self.playback.awake {
            self.pending_reload = true;
            self.content = Content::Empty;
            return;
        }

        match report.outcome {
            ProbeOutcome::Image(Ok(image)) if report.kind == MediaKind::Image => {
                self.present_image(image, svc);
            }
            ProbeOutcome::Video(Ok(info)) if report.kind == MediaKind::Video => {
                let now = svc.now();
                let work = Scheduled::Surface {
                    key: self.key.clone(),
                    timer: SurfaceTimer::GateFired {
                        token: report.token,
                        info,
                    },
                };
                let (slot, _) = svc.gate.schedule_on_main(&mut svc.timers, now, work);
                debug!(key = %self.key, wait = ?slot.saturating_duration_since(now), "player construction gated");
            }
            ProbeOutcome::Image(Err(err)) | ProbeOutcome::Video(Err(err)) => {
                self.on_probe_failed(report.token, report.attempt, err, svc);
            }
            _ => debug!(key = %self.key, "probe outcome does not match media kind"),
        }
    }

    fn is_current_load(&self, token: LoadToken, source: &MediaSource, kind: MediaKind) -> bool {
        if !self.generation.is_current(token) {
            return false;
        }
        let wants = self
            .target
            .as_ref()
            .is_some_and(|target| target.source == *source && target.kind == kind);
        wants && matches!(self.content, Content::Loading { token: loading } if loading == token)
    }

    fn on_probe_failed(&mut self, token: LoadToken, attempt: u8, err: MediaError, svc: &mut Services) {
        if attempt < svc.timings.probe_max_retries {
            warn!(key = %self.key, attempt, "media probe failed, retrying: {err}");
            let delay = svc.timings.probe_retry_delay();
            svc.schedule_after(
                delay,
                Scheduled::Surface {
                    key: self.key.clone(),
                    timer: SurfaceTimer::Retry {
                        token,
                        attempt: attempt + 1,
                    },
                },
            );
        } else {
            warn!(key = %self.key, "giving up on media: {err}");
            self.show_nothing();
        }
    }

    fn on_retry(&mut self, token: LoadToken, attempt: u8, svc: &mut Services) {
        if !self.generation.is_current(token) {
            return;
        }
        if !self.playback.awake {
            self.pending_reload = true;
            self.content = Content::Empty;
            return;
        }
        self.spawn_probe(token, attempt, svc);
    }

    fn on_gate_fired(&mut self, token: LoadToken, info: VideoInfo, svc: &mut Services) {
        if !self.generation.is_current(token)
            || !matches!(self.content, Content::Loading { token: loading } if loading == token)
        {
            debug!(key = %self.key, "gate slot is stale; abandoning player");
            return;
        }
        if !self.playback.awake || !self.playback.window_visible || self.view.is_none() {
            debug!(key = %self.key, "surface not presentable at gate slot; pending reload");
            self.pending_reload = true;
            self.content = Content::Empty;
            return;
        }
        let Some(target) = self.target.clone() else {
            return;
        };
        let Some(path) = svc.resolver.local_path(&target.source) else {
            self.show_nothing();
            return;
        };

        match svc.backend.open_player(&path, &info) {
            Ok(mut player) => {
                player.set_looping(true);
                player.set_muted(target.muted);
                info!(key = %self.key, source = %target.source, "video player ready");
                svc.pool.store(
                    self.key.clone(),
                    PooledMedia {
                        player,
                        source: target.source.clone(),
                        natural: Vec2::new(info.width as f32, info.height as f32),
                    },
                );
                self.present_video(svc);
                svc.request_preview(&path);
            }
            Err(reason) => {
                let err = MediaError::Backend { path, reason };
                warn!(key = %self.key, "player construction failed: {err}");
                self.show_nothing();
            }
        }
    }

    fn on_wake_reload(&mut self, token: LoadToken, svc: &mut Services) {
        if !self.generation.is_current(token) || !self.playback.awake || !self.pending_reload {
            return;
        }
        if !self.playback.window_visible || self.view.is_none() {
            // Stays pended until the window shows again.
            return;
        }
        self.pending_reload = false;

        if let Content::Video = self.content {
            let healthy = svc
                .pool
                .attached(&self.key)
                .is_some_and(|entry| entry.is_healthy());
            if healthy {
                debug!(key = %self.key, "player survived sleep; resuming");
                self.apply_playback(svc);
                return;
            }
            warn!(key = %self.key, "player failed during sleep; rebuilding");
            svc.pool.remove(&self.key);
            self.content = Content::Empty;
        }
        if let Content::Image { .. } = self.content {
            self.apply_playback(svc);
            return;
        }
        self.reload(svc);
    }

    /// Starts a fresh load of the current target under a new generation.
    fn reload(&mut self, svc: &mut Services) {
        let token = self.generation.advance();
        self.pending_reload = false;

        let Some(target) = self.target.clone() else {
            svc.pool.remove(&self.key);
            self.show_nothing();
            return;
        };

        if !self.playback.awake || self.view.is_none() {
            self.pending_reload = true;
            self.content = Content::Empty;
            if let Some(view) = self.view.as_mut() {
                view.clear();
            }
            return;
        }

        if target.kind == MediaKind::Video {
            if let Some(entry) = svc.pool.get(&self.key, &target.source) {
                debug!(key = %self.key, natural = ?entry.natural, "pool hit");
                self.present_video(svc);
                return;
            }
        }

        svc.pool.remove(&self.key);
        if let Some(view) = self.view.as_mut() {
            view.clear();
        }
        self.natural = None;
        self.content = Content::Loading { token };
        self.spawn_probe(token, 0, svc);
    }

    fn spawn_probe(&mut self, token: LoadToken, attempt: u8, svc: &mut Services) {
        let Some(target) = self.target.as_ref() else {
            return;
        };
        let Some(path) = svc.resolver.local_path(&target.source) else {
            warn!(key = %self.key, "{}", MediaError::NotLocal(target.source.to_string()));
            self.show_nothing();
            return;
        };

        self.content = Content::Loading { token };
        let key = self.key.clone();
        let source = target.source.clone();
        let kind = target.kind;
        let resolver = Arc::clone(&svc.resolver);
        let backend = Arc::clone(&svc.backend);
        let reports = svc.reports.sender();

        svc.worker.spawn(Box::new(move || {
            let outcome = match kind {
                MediaKind::Video => ProbeOutcome::Video(probe_video(&resolver, backend.as_ref(), &path)),
                _ => ProbeOutcome::Image(probe_image(&resolver, &path)),
            };
            reports.post(WorkerReport::Probe(ProbeReport {
                key,
                token,
                attempt,
                source,
                kind,
                outcome,
            }));
        }));
    }

    fn substitute(
        &self,
        descriptor: Option<MediaDescriptor>,
        svc: &mut Services,
    ) -> Option<MediaDescriptor> {
        let descriptor = descriptor?;
        if descriptor.kind != MediaKind::Video || svc.playback.video_allowed {
            return Some(descriptor);
        }
        let video = svc.resolver.local_path(&descriptor.source)?;
        match svc.previews.lookup(&video) {
            Some(preview) => Some(MediaDescriptor {
                source: MediaSource::File(preview.to_path_buf()),
                kind: MediaKind::Image,
                ..descriptor
            }),
            None => {
                svc.request_preview(&video);
                None
            }
        }
    }

    fn present_current(&mut self, svc: &mut Services) {
        match &self.content {
            Content::Image { image } => {
                let image = image.clone();
                self.present_image(image, svc);
            }
            Content::Video => self.present_video(svc),
            Content::Empty | Content::Loading { .. } => {
                if let Some(view) = self.view.as_mut() {
                    view.clear();
                }
            }
        }
    }

    fn present_image(&mut self, image: DecodedImage, svc: &mut Services) {
        self.natural = Some(Vec2::new(image.width as f32, image.height as f32));
        if let Some(view) = self.view.as_mut() {
            view.show_image(&image);
        }
        self.content = Content::Image { image };
        self.apply_transform(svc);
        self.apply_playback(svc);
    }

    fn present_video(&mut self, svc: &mut Services) {
        let Some(entry) = svc.pool.attached(&self.key) else {
            self.show_nothing();
            return;
        };
        self.natural = Some(entry.natural);
        if let Some(view) = self.view.as_mut() {
            view.show_player(entry.player.as_ref());
        }
        self.content = Content::Video;
        self.apply_transform(svc);
        self.apply_playback(svc);
    }

    fn show_nothing(&mut self) {
        self.content = Content::Empty;
        self.natural = None;
        if let Some(view) = self.view.as_mut() {
            view.clear();
        }
    }

    fn apply_transform(&mut self, svc: &mut Services) {
        let Some(target) = self.target.as_ref() else {
            return;
        };
        if let Some(view) = self.view.as_mut() {
            view.set_opacity(target.opacity);
        }
        if let Content::Video = self.content {
            if let Some(entry) = svc.pool.attached(&self.key) {
                entry.player.set_muted(target.muted);
            }
        }
        self.relayout();
    }

    fn apply_playback(&mut self, svc: &mut Services) {
        let should_play = self.playback.should_play();
        match &self.content {
            Content::Video => {
                if let Some(entry) = svc.pool.attached(&self.key) {
                    if should_play && !entry.player.is_playing() {
                        entry.player.play();
                    } else if !should_play && entry.player.is_playing() {
                        entry.player.pause();
                    }
                }
            }
            Content::Image { image } => {
                let animated = image.is_animated();
                if let Some(view) = self.view.as_mut() {
                    view.set_animating(should_play && animated);
                }
            }
            Content::Empty | Content::Loading { .. } => {}
        }
    }

    fn relayout(&mut self) {
        let (Some(target), Some(natural)) = (self.target.as_ref(), self.natural) else {
            return;
        };
        let Some(frame) = layout_media(self.container, natural, target.fit, target.scale, target.offset)
        else {
            return;
        };
        self.layout = Some(frame);
        if let Some(view) = self.view.as_mut() {
            view.set_content_frame(frame);
        }
    }
}

fn probe_image(resolver: &ScopedAccessResolver, path: &Path) -> Result<DecodedImage, MediaError> {
    if !resolver.exists(path) {
        return Err(MediaError::Missing(path.to_path_buf()));
    }
    decode_image(path)
}

fn probe_video(
    resolver: &ScopedAccessResolver,
    backend: &dyn MediaBackend,
    path: &Path,
) -> Result<VideoInfo, MediaError> {
    if !resolver.exists(path) {
        return Err(MediaError::Missing(path.to_path_buf()));
    }
    let info = backend.probe_video(path).map_err(|reason| MediaError::Backend {
        path: PathBuf::from(path),
        reason,
    })?;
    if !info.playable {
        return Err(MediaError::NotPlayable(path.to_path_buf()));
    }
    if !info.has_video_track {
        return Err(MediaError::NoVideoTrack(path.to_path_buf()));
    }
    Ok(info)
}
