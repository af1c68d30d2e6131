//! Platform abstraction traits so `driftdock-core` stays OS-agnostic.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub dpi: u32,
}

/// Stable identity of a physical display, as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayId(pub String);

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DisplayId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub id: DisplayId,
    pub rect: MonitorRect,
    pub primary: bool,
}

/// Window or content rectangle in screen points.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Frame {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Frame {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

impl From<MonitorRect> for Frame {
    fn from(rect: MonitorRect) -> Self {
        Self::new(
            rect.x as f32,
            rect.y as f32,
            rect.width as f32,
            rect.height as f32,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowLevel {
    /// Floating dock panel above normal windows.
    Floating,
    /// Desktop-level, behind every application window.
    Desktop,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowSpec {
    pub title: String,
    pub level: WindowLevel,
    pub frame: Frame,
    pub borderless: bool,
    pub ignores_input: bool,
}

impl WindowSpec {
    pub fn dock(title: impl Into<String>, frame: Frame) -> Self {
        Self {
            title: title.into(),
            level: WindowLevel::Floating,
            frame,
            borderless: true,
            ignores_input: false,
        }
    }

    pub fn wallpaper(display: &DisplayInfo) -> Self {
        Self {
            title: format!("Wallpaper {}", display.id),
            level: WindowLevel::Desktop,
            frame: display.rect.into(),
            borderless: true,
            ignores_input: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlurMaterial {
    #[default]
    None,
    HudWindow,
    Sidebar,
    Popover,
    UnderWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Appearance {
    pub opacity: f32,
    pub material: BlurMaterial,
    /// Width / height ratio the window is locked to while resizing.
    pub aspect_ratio: Option<f32>,
}

impl Default for Appearance {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            material: BlurMaterial::None,
            aspect_ratio: None,
        }
    }
}

/// First frame of a decoded still or animated image.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub frame_count: usize,
    pub rgba: Arc<[u8]>,
}

impl DecodedImage {
    pub fn is_animated(&self) -> bool {
        self.frame_count > 1
    }
}

/// Rendering target inside a window's content area.
pub trait SurfaceView {
    fn show_image(&mut self, image: &DecodedImage);
    fn show_player(&mut self, player: &dyn MediaPlayer);
    fn clear(&mut self);
    fn set_content_frame(&mut self, frame: Frame);
    fn set_opacity(&mut self, opacity: f32);
    fn set_animating(&mut self, animating: bool);
}

/// The OS window server, driven from the main context only.
pub trait WindowServer {
    fn create_window(&mut self, spec: &WindowSpec) -> Result<WindowId>;
    fn close_window(&mut self, window: WindowId);
    fn set_visible(&mut self, window: WindowId, visible: bool);
    fn is_visible(&self, window: WindowId) -> bool;
    fn set_frame(&mut self, window: WindowId, frame: Frame);
    fn frame(&self, window: WindowId) -> Option<Frame>;
    fn set_alpha(&mut self, window: WindowId, alpha: f32);
    fn set_appearance(&mut self, window: WindowId, appearance: &Appearance);
    fn attach_content(&mut self, window: WindowId) -> Result<Box<dyn SurfaceView>>;
    fn detach_content(&mut self, window: WindowId);
}

/// Screen enumeration.
pub trait DisplayProvider {
    fn displays(&self) -> Result<Vec<DisplayInfo>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Unknown,
    ReadyToPlay,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub duration: Option<Duration>,
    pub playable: bool,
    pub has_video_track: bool,
}

/// A heavyweight decoder/player bundle.
pub trait MediaPlayer: Send {
    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    fn is_playing(&self) -> bool;
    fn set_muted(&mut self, muted: bool);
    fn set_looping(&mut self, looping: bool);
    fn status(&self) -> PlaybackStatus;
    fn item_status(&self) -> PlaybackStatus;
    /// Final teardown. May block; callers run it off the main context.
    fn release(self: Box<Self>);
}

pub trait MediaBackend: Send + Sync {
    /// Loads track metadata. Runs on a worker thread.
    fn probe_video(&self, path: &Path) -> Result<VideoInfo>;
    fn open_player(&self, path: &Path, info: &VideoInfo) -> Result<Box<dyn MediaPlayer>>;
    /// Writes a still frame of `video` to `dest`. Runs on a worker thread.
    fn extract_preview(&self, video: &Path, dest: &Path) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedGrant {
    pub path: PathBuf,
    pub stale: bool,
}

/// Persistent, renewable file access grants ("bookmarks").
pub trait AccessGrants: Send + Sync {
    fn create_grant(&self, path: &Path) -> Result<Vec<u8>>;
    fn resolve_grant(&self, grant: &[u8]) -> Result<ResolvedGrant>;
    fn start_access(&self, path: &Path) -> bool;
    fn stop_access(&self, path: &Path);
    /// Directory holding the application's built-in assets, if any.
    fn bundle_dir(&self) -> Option<PathBuf>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkinRecord {
    pub kind: String,
    pub path: Option<String>,
    pub grant: Option<Vec<u8>>,
    pub fit_mode: String,
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub opacity: f32,
    pub muted: bool,
}

impl Default for SkinRecord {
    fn default() -> Self {
        Self {
            kind: "none".into(),
            path: None,
            grant: None,
            fit_mode: "fill".into(),
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            opacity: 1.0,
            muted: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockRecord {
    pub id: String,
    pub name: String,
    pub geometry: String,
    pub visible: bool,
    #[serde(default)]
    pub appearance: Appearance,
    #[serde(default)]
    pub skin: SkinRecord,
}

/// Persistent store of dock records.
pub trait DockStore {
    fn fetch_docks(&self) -> Result<Vec<DockRecord>>;
    fn insert_dock(&mut self, record: DockRecord) -> Result<()>;
    fn update_dock(&mut self, record: &DockRecord) -> Result<()>;
    fn delete_dock(&mut self, id: &str) -> Result<()>;
    fn save(&mut self) -> Result<()>;
}

/// Simple preference store that survives restarts.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
}

/// OS notifications routed into the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SystemEvent {
    WillSleep,
    DidWake,
    SessionActive,
    SessionInactive,
    DisplaysChanged,
    Occlusion { window: WindowId, visible: bool },
    Miniaturized(WindowId),
    Deminiaturized(WindowId),
    WindowClosed(WindowId),
    WindowMoved { window: WindowId, frame: Frame },
    WindowResized { window: WindowId, frame: Frame },
}
