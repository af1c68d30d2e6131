//! A platform with no compositor: JSON files for persistence, plain paths for
//! access grants, and a window server and media backend that only log.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use driftdock_platform::{
    AccessGrants, Appearance, DecodedImage, DisplayId, DisplayInfo, DisplayProvider, DockRecord,
    DockStore, Frame, KeyValueStore, MediaBackend, MediaPlayer, MonitorRect, PlaybackStatus,
    ResolvedGrant, Result, SurfaceView, VideoInfo, WindowId, WindowServer, WindowSpec,
};
use tracing::{debug, info, trace, warn};

/// Writes through a sibling temp file so a crash never leaves half a file.
fn write_atomically(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned + Default>(path: &Path) -> T {
    match fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).unwrap_or_else(|err| {
            warn!(path = %path.display(), "ignoring unreadable store: {err}");
            T::default()
        }),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => T::default(),
        Err(err) => {
            warn!(path = %path.display(), "failed to read store: {err}");
            T::default()
        }
    }
}

// ---------------- persistence ----------------

/// Dock records kept in memory and written out on `save`.
pub struct JsonDockStore {
    path: PathBuf,
    records: Vec<DockRecord>,
}

impl JsonDockStore {
    pub fn open(path: PathBuf) -> Self {
        let records: Vec<DockRecord> = read_json(&path);
        info!(path = %path.display(), docks = records.len(), "dock store opened");
        Self { path, records }
    }
}

impl DockStore for JsonDockStore {
    fn fetch_docks(&self) -> Result<Vec<DockRecord>> {
        Ok(self.records.clone())
    }

    fn insert_dock(&mut self, record: DockRecord) -> Result<()> {
        if self.records.iter().any(|stored| stored.id == record.id) {
            return Err(format!("dock {} already stored", record.id).into());
        }
        self.records.push(record);
        Ok(())
    }

    fn update_dock(&mut self, record: &DockRecord) -> Result<()> {
        let stored = self
            .records
            .iter_mut()
            .find(|stored| stored.id == record.id)
            .ok_or_else(|| format!("dock {} is not stored", record.id))?;
        *stored = record.clone();
        Ok(())
    }

    fn delete_dock(&mut self, id: &str) -> Result<()> {
        self.records.retain(|record| record.id != id);
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.records)?;
        write_atomically(&self.path, &text)?;
        debug!(path = %self.path.display(), "dock store saved");
        Ok(())
    }
}

/// String preferences in one JSON object, rewritten on every change.
pub struct JsonPrefs {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl JsonPrefs {
    pub fn open(path: PathBuf) -> Self {
        let values = read_json(&path);
        Self { path, values }
    }

    fn flush(&self) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.values)?;
        write_atomically(&self.path, &text)
    }
}

impl KeyValueStore for JsonPrefs {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        self.values.insert(key.to_string(), value);
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        if self.values.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}

// ---------------- access ----------------

/// Grants are just the UTF-8 path; there is no sandbox to ask.
pub struct PathGrants {
    bundle: Option<PathBuf>,
}

impl PathGrants {
    pub fn new(bundle: Option<PathBuf>) -> Self {
        Self { bundle }
    }
}

impl AccessGrants for PathGrants {
    fn create_grant(&self, path: &Path) -> Result<Vec<u8>> {
        let path = path.canonicalize()?;
        Ok(path.to_string_lossy().into_owned().into_bytes())
    }

    fn resolve_grant(&self, grant: &[u8]) -> Result<ResolvedGrant> {
        let path = PathBuf::from(std::str::from_utf8(grant)?);
        Ok(ResolvedGrant { path, stale: false })
    }

    fn start_access(&self, path: &Path) -> bool {
        trace!(path = %path.display(), "access start");
        false
    }

    fn stop_access(&self, _path: &Path) {}

    fn bundle_dir(&self) -> Option<PathBuf> {
        self.bundle.clone()
    }
}

// ---------------- displays ----------------

/// One 1080p display, for hosts without monitor enumeration.
pub struct FixedDisplays {
    displays: Vec<DisplayInfo>,
}

impl FixedDisplays {
    pub fn single() -> Self {
        Self {
            displays: vec![DisplayInfo {
                id: DisplayId::from("main"),
                rect: MonitorRect {
                    x: 0,
                    y: 0,
                    width: 1920,
                    height: 1080,
                    dpi: 96,
                },
                primary: true,
            }],
        }
    }
}

impl DisplayProvider for FixedDisplays {
    fn displays(&self) -> Result<Vec<DisplayInfo>> {
        Ok(self.displays.clone())
    }
}

// ---------------- windows ----------------

struct LogWindow {
    title: String,
    frame: Frame,
    visible: bool,
}

/// Tracks window state and logs every change.
#[derive(Default)]
pub struct LogWindowServer {
    next_id: u64,
    windows: BTreeMap<WindowId, LogWindow>,
}

impl LogWindowServer {
    pub fn new() -> Self {
        Self::default()
    }
}

struct LogView {
    window: WindowId,
}

impl SurfaceView for LogView {
    fn show_image(&mut self, image: &DecodedImage) {
        info!(
            window = %self.window,
            width = image.width,
            height = image.height,
            animated = image.is_animated(),
            "showing image"
        );
    }

    fn show_player(&mut self, _player: &dyn MediaPlayer) {
        info!(window = %self.window, "showing player");
    }

    fn clear(&mut self) {
        debug!(window = %self.window, "content cleared");
    }

    fn set_content_frame(&mut self, frame: Frame) {
        trace!(window = %self.window, ?frame, "content frame");
    }

    fn set_opacity(&mut self, opacity: f32) {
        trace!(window = %self.window, opacity, "content opacity");
    }

    fn set_animating(&mut self, animating: bool) {
        trace!(window = %self.window, animating, "animation");
    }
}

impl WindowServer for LogWindowServer {
    fn create_window(&mut self, spec: &WindowSpec) -> Result<WindowId> {
        self.next_id += 1;
        let id = WindowId(self.next_id);
        info!(window = %id, title = %spec.title, level = ?spec.level, frame = ?spec.frame, "window created");
        self.windows.insert(
            id,
            LogWindow {
                title: spec.title.clone(),
                frame: spec.frame,
                visible: false,
            },
        );
        Ok(id)
    }

    fn close_window(&mut self, window: WindowId) {
        if let Some(closed) = self.windows.remove(&window) {
            info!(%window, title = %closed.title, "window closed");
        }
    }

    fn set_visible(&mut self, window: WindowId, visible: bool) {
        if let Some(entry) = self.windows.get_mut(&window) {
            entry.visible = visible;
            debug!(%window, visible, "window visibility");
        }
    }

    fn is_visible(&self, window: WindowId) -> bool {
        self.windows.get(&window).is_some_and(|entry| entry.visible)
    }

    fn set_frame(&mut self, window: WindowId, frame: Frame) {
        if let Some(entry) = self.windows.get_mut(&window) {
            entry.frame = frame;
            debug!(%window, ?frame, "window frame");
        }
    }

    fn frame(&self, window: WindowId) -> Option<Frame> {
        self.windows.get(&window).map(|entry| entry.frame)
    }

    fn set_alpha(&mut self, window: WindowId, alpha: f32) {
        debug!(%window, alpha, "window alpha");
    }

    fn set_appearance(&mut self, window: WindowId, appearance: &Appearance) {
        debug!(%window, ?appearance, "window appearance");
    }

    fn attach_content(&mut self, window: WindowId) -> Result<Box<dyn SurfaceView>> {
        if !self.windows.contains_key(&window) {
            return Err(format!("{window} does not exist").into());
        }
        Ok(Box::new(LogView { window }))
    }

    fn detach_content(&mut self, window: WindowId) {
        debug!(%window, "content detached");
    }
}

// ---------------- media ----------------

/// Nominal size reported for clips, which are never decoded here.
const NOMINAL_VIDEO: (u32, u32) = (1920, 1080);

/// Checks that a clip is a readable, non-empty file; players only track state.
pub struct FileProbeBackend;

impl MediaBackend for FileProbeBackend {
    fn probe_video(&self, path: &Path) -> Result<VideoInfo> {
        let metadata = fs::metadata(path)?;
        if !metadata.is_file() || metadata.len() == 0 {
            return Err(format!("{} is not a media file", path.display()).into());
        }
        let (width, height) = NOMINAL_VIDEO;
        Ok(VideoInfo {
            width,
            height,
            duration: None,
            playable: true,
            has_video_track: true,
        })
    }

    fn open_player(&self, path: &Path, _info: &VideoInfo) -> Result<Box<dyn MediaPlayer>> {
        info!(path = %path.display(), "player opened");
        Ok(Box::new(LogPlayer {
            path: path.to_path_buf(),
            playing: false,
        }))
    }

    fn extract_preview(&self, video: &Path, _dest: &Path) -> Result<()> {
        Err(format!("no frame extractor for {}", video.display()).into())
    }
}

struct LogPlayer {
    path: PathBuf,
    playing: bool,
}

impl MediaPlayer for LogPlayer {
    fn play(&mut self) {
        if !std::mem::replace(&mut self.playing, true) {
            debug!(path = %self.path.display(), "play");
        }
    }

    fn pause(&mut self) {
        if std::mem::replace(&mut self.playing, false) {
            debug!(path = %self.path.display(), "pause");
        }
    }

    fn stop(&mut self) {
        self.playing = false;
        debug!(path = %self.path.display(), "stop");
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn set_muted(&mut self, muted: bool) {
        trace!(path = %self.path.display(), muted, "mute");
    }

    fn set_looping(&mut self, _looping: bool) {}

    fn status(&self) -> PlaybackStatus {
        PlaybackStatus::ReadyToPlay
    }

    fn item_status(&self) -> PlaybackStatus {
        PlaybackStatus::ReadyToPlay
    }

    fn release(self: Box<Self>) {
        info!(path = %self.path.display(), "player released");
    }
}
