//! Scenario tests against an in-memory platform.
//!
//! Worker jobs queue in a [`ManualWorker`] so a test can complete probes in any
//! order, and time only moves through the harness's [`ManualClock`].

mod surfaces;

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use driftdock_platform::{
    AccessGrants, Appearance, DecodedImage, DisplayId, DisplayInfo, DisplayProvider, DockRecord,
    DockStore, Frame, KeyValueStore, MediaBackend, MediaPlayer, MonitorRect, PlaybackStatus,
    ResolvedGrant, Result as PlatformResult, SkinRecord, SurfaceView, VideoInfo, WindowId,
    WindowLevel, WindowServer, WindowSpec,
};
use tempfile::TempDir;

use crate::clock::{Clock, ManualClock};
use crate::config::EngineConfig;
use crate::engine::{Engine, Platform};
use crate::session::format_geometry;
use crate::worker::{Job, Worker};

// ---------------- worker ----------------

/// Holds jobs until the test runs them.
#[derive(Default)]
pub struct ManualWorker {
    jobs: RefCell<VecDeque<Job>>,
}

impl ManualWorker {
    pub fn pending(&self) -> usize {
        self.jobs.borrow().len()
    }

    pub fn run_next(&self) -> bool {
        let job = self.jobs.borrow_mut().pop_front();
        job.map(|job| job()).is_some()
    }

    pub fn run_last(&self) -> bool {
        let job = self.jobs.borrow_mut().pop_back();
        job.map(|job| job()).is_some()
    }

    /// Runs until the queue is empty, including jobs spawned along the way.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl Worker for ManualWorker {
    fn spawn(&self, job: Job) {
        self.jobs.borrow_mut().push_back(job);
    }
}

// ---------------- window server ----------------

#[derive(Debug, Default)]
pub struct ViewState {
    pub image: Option<(u32, u32)>,
    pub showing_player: bool,
    pub clears: usize,
    pub content_frame: Option<Frame>,
    pub opacity: Option<f32>,
    pub animating: bool,
}

struct FakeView(Rc<RefCell<ViewState>>);

impl SurfaceView for FakeView {
    fn show_image(&mut self, image: &DecodedImage) {
        let mut view = self.0.borrow_mut();
        view.image = Some((image.width, image.height));
        view.showing_player = false;
    }

    fn show_player(&mut self, _player: &dyn MediaPlayer) {
        let mut view = self.0.borrow_mut();
        view.image = None;
        view.showing_player = true;
    }

    fn clear(&mut self) {
        let mut view = self.0.borrow_mut();
        view.image = None;
        view.showing_player = false;
        view.clears += 1;
    }

    fn set_content_frame(&mut self, frame: Frame) {
        self.0.borrow_mut().content_frame = Some(frame);
    }

    fn set_opacity(&mut self, opacity: f32) {
        self.0.borrow_mut().opacity = Some(opacity);
    }

    fn set_animating(&mut self, animating: bool) {
        self.0.borrow_mut().animating = animating;
    }
}

pub struct FakeWindow {
    pub spec: WindowSpec,
    pub visible: bool,
    pub frame: Frame,
    pub alpha: f32,
    pub appearance: Appearance,
    pub attached: bool,
    pub closed: bool,
    pub view: Rc<RefCell<ViewState>>,
}

#[derive(Default)]
pub struct WindowState {
    next_id: u64,
    pub windows: BTreeMap<WindowId, FakeWindow>,
    pub created: usize,
    pub attach_calls: usize,
}

impl WindowState {
    pub fn open(&self, level: WindowLevel) -> Vec<WindowId> {
        self.windows
            .iter()
            .filter(|(_, window)| !window.closed && window.spec.level == level)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn window(&self, id: WindowId) -> &FakeWindow {
        &self.windows[&id]
    }

    pub fn view(&self, id: WindowId) -> Rc<RefCell<ViewState>> {
        Rc::clone(&self.windows[&id].view)
    }
}

struct FakeWindowServer(Rc<RefCell<WindowState>>);

impl WindowServer for FakeWindowServer {
    fn create_window(&mut self, spec: &WindowSpec) -> PlatformResult<WindowId> {
        let mut state = self.0.borrow_mut();
        state.next_id += 1;
        state.created += 1;
        let id = WindowId(state.next_id);
        state.windows.insert(
            id,
            FakeWindow {
                spec: spec.clone(),
                visible: false,
                frame: spec.frame,
                alpha: 1.0,
                appearance: Appearance::default(),
                attached: false,
                closed: false,
                view: Rc::default(),
            },
        );
        Ok(id)
    }

    fn close_window(&mut self, window: WindowId) {
        if let Some(window) = self.0.borrow_mut().windows.get_mut(&window) {
            window.closed = true;
            window.visible = false;
        }
    }

    fn set_visible(&mut self, window: WindowId, visible: bool) {
        if let Some(window) = self.0.borrow_mut().windows.get_mut(&window) {
            window.visible = visible;
        }
    }

    fn is_visible(&self, window: WindowId) -> bool {
        self.0
            .borrow()
            .windows
            .get(&window)
            .is_some_and(|window| window.visible)
    }

    fn set_frame(&mut self, window: WindowId, frame: Frame) {
        if let Some(window) = self.0.borrow_mut().windows.get_mut(&window) {
            window.frame = frame;
        }
    }

    fn frame(&self, window: WindowId) -> Option<Frame> {
        self.0.borrow().windows.get(&window).map(|window| window.frame)
    }

    fn set_alpha(&mut self, window: WindowId, alpha: f32) {
        if let Some(window) = self.0.borrow_mut().windows.get_mut(&window) {
            window.alpha = alpha;
        }
    }

    fn set_appearance(&mut self, window: WindowId, appearance: &Appearance) {
        if let Some(window) = self.0.borrow_mut().windows.get_mut(&window) {
            window.appearance = *appearance;
        }
    }

    fn attach_content(&mut self, window: WindowId) -> PlatformResult<Box<dyn SurfaceView>> {
        let mut state = self.0.borrow_mut();
        state.attach_calls += 1;
        let window = state
            .windows
            .get_mut(&window)
            .ok_or("attach to unknown window")?;
        window.attached = true;
        window.view = Rc::default();
        Ok(Box::new(FakeView(Rc::clone(&window.view))))
    }

    fn detach_content(&mut self, window: WindowId) {
        if let Some(window) = self.0.borrow_mut().windows.get_mut(&window) {
            window.attached = false;
        }
    }
}

// ---------------- displays and stores ----------------

#[derive(Default)]
pub struct DisplayState {
    pub displays: Vec<DisplayInfo>,
    pub enumerations: usize,
}

struct FakeDisplays(Rc<RefCell<DisplayState>>);

impl DisplayProvider for FakeDisplays {
    fn displays(&self) -> PlatformResult<Vec<DisplayInfo>> {
        let mut state = self.0.borrow_mut();
        state.enumerations += 1;
        Ok(state.displays.clone())
    }
}

#[derive(Default)]
pub struct DockState {
    pub records: Vec<DockRecord>,
    pub saves: usize,
    pub fail_saves: bool,
}

impl DockState {
    pub fn record(&self, id: &str) -> Option<&DockRecord> {
        self.records.iter().find(|record| record.id == id)
    }
}

struct FakeDocks(Rc<RefCell<DockState>>);

impl DockStore for FakeDocks {
    fn fetch_docks(&self) -> PlatformResult<Vec<DockRecord>> {
        Ok(self.0.borrow().records.clone())
    }

    fn insert_dock(&mut self, record: DockRecord) -> PlatformResult<()> {
        self.0.borrow_mut().records.push(record);
        Ok(())
    }

    fn update_dock(&mut self, record: &DockRecord) -> PlatformResult<()> {
        let mut state = self.0.borrow_mut();
        let stored = state
            .records
            .iter_mut()
            .find(|stored| stored.id == record.id)
            .ok_or("unknown dock")?;
        *stored = record.clone();
        Ok(())
    }

    fn delete_dock(&mut self, id: &str) -> PlatformResult<()> {
        self.0.borrow_mut().records.retain(|record| record.id != id);
        Ok(())
    }

    fn save(&mut self) -> PlatformResult<()> {
        let mut state = self.0.borrow_mut();
        if state.fail_saves {
            return Err("disk full".into());
        }
        state.saves += 1;
        Ok(())
    }
}

struct FakePrefs(Rc<RefCell<BTreeMap<String, String>>>);

impl KeyValueStore for FakePrefs {
    fn get(&self, key: &str) -> Option<String> {
        self.0.borrow().get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> PlatformResult<()> {
        self.0.borrow_mut().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> PlatformResult<()> {
        self.0.borrow_mut().remove(key);
        Ok(())
    }
}

// ---------------- grants ----------------

#[derive(Default)]
pub struct GrantState {
    /// Files the user moved: old location to new location.
    pub moved: HashMap<PathBuf, PathBuf>,
    pub bundle: Option<PathBuf>,
    pub created: usize,
    pub started: usize,
    pub stopped: usize,
}

pub fn grant_for(path: &Path) -> Vec<u8> {
    format!("grant:{}", path.display()).into_bytes()
}

struct FakeGrants(Arc<Mutex<GrantState>>);

impl AccessGrants for FakeGrants {
    fn create_grant(&self, path: &Path) -> PlatformResult<Vec<u8>> {
        self.0.lock().unwrap().created += 1;
        Ok(grant_for(path))
    }

    fn resolve_grant(&self, grant: &[u8]) -> PlatformResult<ResolvedGrant> {
        let text = std::str::from_utf8(grant)?;
        let path = PathBuf::from(text.strip_prefix("grant:").ok_or("not a grant")?);
        let state = self.0.lock().unwrap();
        Ok(match state.moved.get(&path) {
            Some(moved) => ResolvedGrant {
                path: moved.clone(),
                stale: true,
            },
            None => ResolvedGrant { path, stale: false },
        })
    }

    fn start_access(&self, _path: &Path) -> bool {
        self.0.lock().unwrap().started += 1;
        true
    }

    fn stop_access(&self, _path: &Path) {
        self.0.lock().unwrap().stopped += 1;
    }

    fn bundle_dir(&self) -> Option<PathBuf> {
        self.0.lock().unwrap().bundle.clone()
    }
}

// ---------------- media backend ----------------

#[derive(Debug)]
pub struct PlayerState {
    pub path: PathBuf,
    pub playing: bool,
    pub muted: bool,
    pub looping: bool,
    pub stops: usize,
    pub released: bool,
    pub status: PlaybackStatus,
}

struct FakePlayer(Arc<Mutex<PlayerState>>);

impl MediaPlayer for FakePlayer {
    fn play(&mut self) {
        self.0.lock().unwrap().playing = true;
    }

    fn pause(&mut self) {
        self.0.lock().unwrap().playing = false;
    }

    fn stop(&mut self) {
        let mut state = self.0.lock().unwrap();
        state.playing = false;
        state.stops += 1;
    }

    fn is_playing(&self) -> bool {
        self.0.lock().unwrap().playing
    }

    fn set_muted(&mut self, muted: bool) {
        self.0.lock().unwrap().muted = muted;
    }

    fn set_looping(&mut self, looping: bool) {
        self.0.lock().unwrap().looping = looping;
    }

    fn status(&self) -> PlaybackStatus {
        self.0.lock().unwrap().status
    }

    fn item_status(&self) -> PlaybackStatus {
        PlaybackStatus::ReadyToPlay
    }

    fn release(self: Box<Self>) {
        self.0.lock().unwrap().released = true;
    }
}

#[derive(Default)]
pub struct BackendState {
    pub probes: Vec<PathBuf>,
    /// Number of upcoming probes that fail.
    pub failing_probes: usize,
    pub opened: Vec<(PathBuf, Instant)>,
    pub players: Vec<Arc<Mutex<PlayerState>>>,
    pub previews: Vec<PathBuf>,
}

impl BackendState {
    pub fn player(&self, index: usize) -> std::sync::MutexGuard<'_, PlayerState> {
        self.players[index].lock().unwrap()
    }

    pub fn playing(&self) -> usize {
        self.players
            .iter()
            .filter(|player| player.lock().unwrap().playing)
            .count()
    }

    /// Whether any live player for the named file is playing.
    pub fn is_playing(&self, file_name: &str) -> bool {
        self.players.iter().any(|player| {
            let player = player.lock().unwrap();
            player.playing && player.path.file_name().is_some_and(|name| name == file_name)
        })
    }
}

struct FakeBackend {
    state: Arc<Mutex<BackendState>>,
    clock: Arc<ManualClock>,
}

impl MediaBackend for FakeBackend {
    fn probe_video(&self, path: &Path) -> PlatformResult<VideoInfo> {
        let mut state = self.state.lock().unwrap();
        state.probes.push(path.to_path_buf());
        if state.failing_probes > 0 {
            state.failing_probes -= 1;
            return Err("tracks not loaded yet".into());
        }
        Ok(VideoInfo {
            width: 1920,
            height: 1080,
            duration: Some(Duration::from_secs(12)),
            playable: true,
            has_video_track: true,
        })
    }

    fn open_player(&self, path: &Path, _info: &VideoInfo) -> PlatformResult<Box<dyn MediaPlayer>> {
        let player = Arc::new(Mutex::new(PlayerState {
            path: path.to_path_buf(),
            playing: false,
            muted: false,
            looping: false,
            stops: 0,
            released: false,
            status: PlaybackStatus::ReadyToPlay,
        }));
        let mut state = self.state.lock().unwrap();
        state.opened.push((path.to_path_buf(), self.clock.now()));
        state.players.push(Arc::clone(&player));
        Ok(Box::new(FakePlayer(player)))
    }

    fn extract_preview(&self, video: &Path, dest: &Path) -> PlatformResult<()> {
        image::RgbaImage::new(16, 9).save(dest)?;
        self.state.lock().unwrap().previews.push(video.to_path_buf());
        Ok(())
    }
}

// ---------------- harness ----------------

pub struct Harness {
    pub engine: Engine,
    pub clock: Arc<ManualClock>,
    pub worker: Rc<ManualWorker>,
    pub windows: Rc<RefCell<WindowState>>,
    pub displays: Rc<RefCell<DisplayState>>,
    pub docks: Rc<RefCell<DockState>>,
    pub prefs: Rc<RefCell<BTreeMap<String, String>>>,
    pub grants: Arc<Mutex<GrantState>>,
    pub backend: Arc<Mutex<BackendState>>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_stores(Vec::new(), BTreeMap::new())
    }

    /// Starts from pre-populated dock records and preferences.
    pub fn with_stores(records: Vec<DockRecord>, prefs: BTreeMap<String, String>) -> Self {
        Self::with_dir(TempDir::new().unwrap(), records, prefs)
    }

    pub fn with_dir(dir: TempDir, records: Vec<DockRecord>, prefs: BTreeMap<String, String>) -> Self {
        let mut config = EngineConfig::default();
        config.paths.preview_cache = Some(dir.path().join("previews"));

        let clock = Arc::new(ManualClock::new());
        let worker = Rc::new(ManualWorker::default());
        let windows = Rc::new(RefCell::new(WindowState::default()));
        let displays = Rc::new(RefCell::new(DisplayState {
            displays: vec![display("1", 0, true), display("2", 1920, false)],
            enumerations: 0,
        }));
        let docks = Rc::new(RefCell::new(DockState {
            records,
            ..DockState::default()
        }));
        let prefs = Rc::new(RefCell::new(prefs));
        let grants = Arc::new(Mutex::new(GrantState::default()));
        let backend = Arc::new(Mutex::new(BackendState::default()));

        let platform = Platform {
            windows: Box::new(FakeWindowServer(Rc::clone(&windows))),
            displays: Box::new(FakeDisplays(Rc::clone(&displays))),
            docks: Box::new(FakeDocks(Rc::clone(&docks))),
            prefs: Box::new(FakePrefs(Rc::clone(&prefs))),
        };
        let engine = Engine::new(
            &config,
            platform,
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::new(FakeGrants(Arc::clone(&grants))),
            Arc::new(FakeBackend {
                state: Arc::clone(&backend),
                clock: Arc::clone(&clock),
            }),
            Rc::clone(&worker) as Rc<dyn Worker>,
        );

        Self {
            engine,
            clock,
            worker,
            windows,
            displays,
            docks,
            prefs,
            grants,
            backend,
            dir,
        }
    }

    /// Pumps and runs worker jobs until neither has anything left to do now.
    pub fn settle(&mut self) {
        loop {
            self.engine.pump();
            if self.worker.run_all() == 0 {
                break;
            }
        }
    }

    /// Moves time forward, stopping at every deadline on the way.
    pub fn advance(&mut self, by: Duration) {
        let target = self.clock.now() + by;
        loop {
            self.settle();
            match self.engine.next_deadline() {
                Some(deadline) if deadline <= target => self.clock_to(deadline),
                _ => break,
            }
        }
        self.clock_to(target);
        self.settle();
    }

    pub fn advance_ms(&mut self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    fn clock_to(&self, at: Instant) {
        let now = self.clock.now();
        if at > now {
            self.clock.advance(at - now);
        }
    }

    /// Writes a PNG fixture of the given size.
    pub fn image(&self, name: &str, width: u32, height: u32) -> PathBuf {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        image::RgbaImage::new(width, height).save(&path).unwrap();
        path
    }

    /// Writes a stand-in video file; the fake backend never reads it.
    pub fn video(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"not really a movie").unwrap();
        path
    }

    pub fn dock_window(&self, dock_id: &str) -> WindowId {
        self.engine.sessions().window_for(dock_id).unwrap()
    }

    pub fn dock_view(&self, dock_id: &str) -> Rc<RefCell<ViewState>> {
        self.windows.borrow().view(self.dock_window(dock_id))
    }

    pub fn wallpaper_view(&self, display_id: &str) -> Rc<RefCell<ViewState>> {
        let window = self
            .engine
            .wallpapers()
            .window_for(&DisplayId::from(display_id))
            .unwrap();
        self.windows.borrow().view(window)
    }
}

pub fn display(id: &str, x: i32, primary: bool) -> DisplayInfo {
    DisplayInfo {
        id: DisplayId::from(id),
        rect: MonitorRect {
            x,
            y: 0,
            width: 1920,
            height: 1080,
            dpi: 96,
        },
        primary,
    }
}

pub fn skin(kind: &str, path: &Path) -> SkinRecord {
    SkinRecord {
        kind: kind.into(),
        path: Some(path.to_string_lossy().into_owned()),
        grant: Some(grant_for(path)),
        ..SkinRecord::default()
    }
}

pub fn dock(id: &str, skin: SkinRecord) -> DockRecord {
    DockRecord {
        id: id.into(),
        name: format!("Dock {id}"),
        geometry: format_geometry(&Frame::new(200.0, 200.0, 400.0, 300.0)),
        visible: true,
        appearance: Appearance::default(),
        skin,
    }
}
