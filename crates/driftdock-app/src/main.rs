mod commands;
mod headless;

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use calloop::channel::{self, Event};
use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop, LoopHandle, LoopSignal, RegistrationToken};
use driftdock_core::session::{format_geometry, DEFAULT_DOCK_FRAME};
use driftdock_core::{
    Engine, EngineConfig, MediaKind, Platform, ReportSink, SystemClock, ThreadWorker,
    WallpaperPreference, Worker, WorkerReport,
};
use driftdock_platform::{DisplayId, DisplayProvider, DockRecord, SkinRecord, SystemEvent};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::commands::{Command, HELP};
use crate::headless::{FileProbeBackend, JsonDockStore, JsonPrefs, LogWindowServer, PathGrants};

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    info!("Driftdock starting");
    if let Err(e) = run() {
        eprintln!("Driftdock error: {e}");
        std::process::exit(1);
    }
}

fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| dirs::config_dir().map(|dir| dir.join("driftdock").join("config.toml")))
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("driftdock")
}

#[cfg(windows)]
fn display_provider() -> Box<dyn DisplayProvider> {
    Box::new(driftdock_win::Win32Displays::new())
}

#[cfg(not(windows))]
fn display_provider() -> Box<dyn DisplayProvider> {
    Box::new(headless::FixedDisplays::single())
}

fn bundle_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    Some(exe.parent()?.join("assets"))
}

/// Worker threads post reports into the event loop through this.
struct LoopReports(Mutex<channel::Sender<WorkerReport>>);

impl ReportSink for LoopReports {
    fn post(&self, report: WorkerReport) {
        let sent = match self.0.lock() {
            Ok(sender) => sender.send(report).is_ok(),
            Err(_) => false,
        };
        if !sent {
            debug!("event loop is gone; dropping worker report");
        }
    }
}

/// Shared state for the event loop callbacks.
struct Driftdock {
    engine: Engine,
    handle: LoopHandle<'static, Driftdock>,
    signal: LoopSignal,
    /// The armed engine timer and the deadline it was armed for.
    timer: Option<(Instant, RegistrationToken)>,
}

impl Driftdock {
    /// Runs whatever engine work is due and re-arms for the next deadline.
    fn pump(&mut self) {
        let deadline = self.engine.pump();
        self.arm(deadline);
    }

    fn arm(&mut self, deadline: Option<Instant>) {
        if self.timer.as_ref().map(|(at, _)| *at) == deadline {
            return;
        }
        if let Some((_, token)) = self.timer.take() {
            self.handle.remove(token);
        }
        let Some(deadline) = deadline else {
            return;
        };
        let inserted = self
            .handle
            .insert_source(Timer::from_deadline(deadline), |_, _, state| {
                state.timer = None;
                state.pump();
                TimeoutAction::Drop
            });
        match inserted {
            Ok(token) => self.timer = Some((deadline, token)),
            Err(err) => warn!("failed to arm the engine timer: {}", err.error),
        }
    }
}

type LoopParts = (EventLoop<'static, Driftdock>, Driftdock, channel::Sender<Command>);

/// Routes worker reports and commands through a new event loop. Engine timers
/// are armed on it by [`Driftdock::pump`].
fn build_event_loop(mut engine: Engine) -> Result<LoopParts, Box<dyn std::error::Error>> {
    let event_loop: EventLoop<'static, Driftdock> = EventLoop::try_new()?;
    let handle = event_loop.handle();

    let (report_sender, reports) = channel::channel::<WorkerReport>();
    engine.set_report_sink(Arc::new(LoopReports(Mutex::new(report_sender))));
    handle
        .insert_source(reports, |event, _, state| {
            if let Event::Msg(report) = event {
                let deadline = state.engine.deliver_report(report);
                state.arm(deadline);
            }
        })
        .map_err(|err| err.error)?;

    let (command_sender, commands) = channel::channel::<Command>();
    handle
        .insert_source(commands, |event, _, state| match event {
            Event::Msg(Command::Quit) | Event::Closed => state.signal.stop(),
            Event::Msg(command) => {
                dispatch(&mut state.engine, command);
                state.pump();
            }
        })
        .map_err(|err| err.error)?;

    let state = Driftdock {
        engine,
        handle,
        signal: event_loop.get_signal(),
        timer: None,
    };
    Ok((event_loop, state, command_sender))
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match config_path() {
        Some(path) => {
            info!(path = %path.display(), "loading configuration");
            EngineConfig::load(&path)?
        }
        None => EngineConfig::default(),
    };
    if config.paths.preview_cache.is_none() {
        config.paths.preview_cache =
            dirs::cache_dir().map(|dir| dir.join("driftdock").join("previews"));
    }

    let data = data_dir();
    let platform = Platform {
        windows: Box::new(LogWindowServer::new()),
        displays: display_provider(),
        docks: Box::new(JsonDockStore::open(data.join("docks.json"))),
        prefs: Box::new(JsonPrefs::open(data.join("prefs.json"))),
    };
    let worker: Rc<dyn Worker> = Rc::new(ThreadWorker::new(config.workers.threads));
    let engine = Engine::new(
        &config,
        platform,
        Arc::new(SystemClock),
        Arc::new(PathGrants::new(bundle_dir())),
        Arc::new(FileProbeBackend),
        worker,
    );

    let (mut event_loop, mut state, command_sender) = build_event_loop(engine)?;
    commands::spawn_stdin_reader(command_sender)?;
    state.engine.start();
    state.pump();
    info!("ready; type `help` for commands");

    event_loop.run(None::<Duration>, &mut state, |_| {})?;

    info!("Driftdock shutting down");
    Ok(())
}

fn media_kind(path: &Path) -> MediaKind {
    if image::ImageFormat::from_path(path).is_ok() {
        MediaKind::Image
    } else {
        MediaKind::Video
    }
}

fn set_dock_occluded(engine: &mut Engine, dock_id: &str, occluded: bool) {
    match engine.sessions().window_for(dock_id) {
        Some(window) => engine.handle_event(SystemEvent::Occlusion {
            window,
            visible: !occluded,
        }),
        None => warn!(dock = %dock_id, "no window for dock"),
    }
}

fn dispatch(engine: &mut Engine, command: Command) {
    match command {
        Command::Sleep => engine.handle_event(SystemEvent::WillSleep),
        Command::Wake => engine.handle_event(SystemEvent::DidWake),
        Command::Lock => engine.handle_event(SystemEvent::SessionInactive),
        Command::Unlock => engine.handle_event(SystemEvent::SessionActive),
        Command::DisplaysChanged => engine.handle_event(SystemEvent::DisplaysChanged),
        Command::AddDock(path) => {
            let reference = engine.resolver().reference_for(&path);
            let id = uuid::Uuid::new_v4().to_string();
            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "Dock".into());
            let record = DockRecord {
                id: id.clone(),
                name,
                geometry: format_geometry(&DEFAULT_DOCK_FRAME),
                visible: true,
                appearance: Default::default(),
                skin: SkinRecord {
                    kind: media_kind(&path).as_raw().into(),
                    path: Some(reference.path),
                    grant: reference.grant,
                    ..SkinRecord::default()
                },
            };
            if engine.create_dock(record) {
                info!(dock = %id, "dock added");
            }
        }
        Command::RemoveDock(id) => engine.delete_dock(&id),
        Command::HideDock(id) => set_dock_occluded(engine, &id, true),
        Command::ShowDock(id) => set_dock_occluded(engine, &id, false),
        Command::ListDocks => {
            for id in engine.sessions().dock_ids() {
                let window = engine.sessions().window_for(id);
                let name = engine
                    .sessions()
                    .record(id)
                    .map(|record| record.name.as_str())
                    .unwrap_or_default();
                info!(dock = %id, name, ?window, attached = engine.sessions().is_attached(id), "dock");
            }
        }
        Command::Reload => engine.reload_docks(),
        Command::Wallpaper { display_id, path } => {
            let reference = engine.resolver().reference_for(&path);
            let preference = WallpaperPreference::new(reference, media_kind(&path));
            engine.apply_wallpaper(DisplayId(display_id), preference);
        }
        Command::ClearWallpaper(display_id) => engine.clear_wallpaper(&DisplayId(display_id)),
        Command::Mute(display_id) => {
            match engine.toggle_wallpaper_mute(&DisplayId(display_id.clone())) {
                Some(muted) => info!(display = %display_id, muted, "wallpaper mute toggled"),
                None => warn!(display = %display_id, "no wallpaper on display"),
            }
        }
        Command::Playback(enabled) => engine.set_playback_enabled(enabled),
        Command::Video(allowed) => engine.set_video_allowed(allowed),
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
}

#[cfg(test)]
mod tests {
    use driftdock_core::surface::SurfacePhase;
    use driftdock_platform::DockStore;

    use super::*;
    use crate::headless::FixedDisplays;

    fn headless_engine(dir: &Path) -> Engine {
        let platform = Platform {
            windows: Box::new(LogWindowServer::new()),
            displays: Box::new(FixedDisplays::single()),
            docks: Box::new(JsonDockStore::open(dir.join("docks.json"))),
            prefs: Box::new(JsonPrefs::open(dir.join("prefs.json"))),
        };
        Engine::new(
            &EngineConfig::default(),
            platform,
            Arc::new(SystemClock),
            Arc::new(PathGrants::new(None)),
            Arc::new(FileProbeBackend),
            Rc::new(ThreadWorker::new(1)),
        )
    }

    fn image_dock(id: &str, path: &Path) -> DockRecord {
        DockRecord {
            id: id.into(),
            name: id.into(),
            geometry: format_geometry(&DEFAULT_DOCK_FRAME),
            visible: true,
            appearance: Default::default(),
            skin: SkinRecord {
                kind: "image".into(),
                path: Some(path.to_string_lossy().into_owned()),
                ..SkinRecord::default()
            },
        }
    }

    fn phase(state: &Driftdock, id: &str) -> Option<SurfacePhase> {
        state.engine.sessions().surface(id).map(|surface| surface.phase())
    }

    /// Dispatches until `done` holds or about two seconds pass.
    fn dispatch_until(
        event_loop: &mut EventLoop<'static, Driftdock>,
        state: &mut Driftdock,
        done: impl Fn(&Driftdock) -> bool,
    ) -> bool {
        for _ in 0..200 {
            if done(state) {
                return true;
            }
            event_loop
                .dispatch(Some(Duration::from_millis(10)), state)
                .unwrap();
        }
        done(state)
    }

    #[test]
    fn stored_docks_launch_through_loop_timers_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let skin = dir.path().join("skin.png");
        image::RgbaImage::new(8, 8).save(&skin).unwrap();
        let mut store = JsonDockStore::open(dir.path().join("docks.json"));
        store.insert_dock(image_dock("d1", &skin)).unwrap();
        store.save().unwrap();

        let (mut event_loop, mut state, _commands) =
            build_event_loop(headless_engine(dir.path())).unwrap();
        state.engine.start();
        state.pump();
        // Attachment waits on the staggered chain, so only the loop timer can finish it.
        assert!(state.timer.is_some());
        assert!(!state.engine.sessions().is_attached("d1"));

        let ready = dispatch_until(&mut event_loop, &mut state, |state| {
            matches!(phase(state, "d1"), Some(SurfacePhase::Ready { playing: true }))
        });
        assert!(ready, "dock never became ready: {:?}", phase(&state, "d1"));
        assert!(state.engine.sessions().is_attached("d1"));
    }

    #[test]
    fn commands_reach_the_engine_and_quit_stops_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let skin = dir.path().join("skin.png");
        image::RgbaImage::new(8, 8).save(&skin).unwrap();

        let (mut event_loop, mut state, commands) =
            build_event_loop(headless_engine(dir.path())).unwrap();
        state.engine.start();
        state.pump();
        commands.send(Command::AddDock(skin)).unwrap();

        let added = dispatch_until(&mut event_loop, &mut state, |state| {
            state.engine.sessions().dock_ids().any(|id| {
                matches!(phase(state, id), Some(SurfacePhase::Ready { .. }))
            })
        });
        assert!(added);

        commands.send(Command::Quit).unwrap();
        event_loop.run(None::<Duration>, &mut state, |_| {}).unwrap();
        assert_eq!(state.engine.sessions().len(), 1);
    }
}
