use std::sync::{Arc, Mutex};

use driftdock_platform::{PlaybackStatus, SystemEvent};

use super::{dock, skin, Harness};
use crate::media::MediaKind;
use crate::resolver::MediaSource;
use crate::surface::SurfacePhase;
use crate::worker::{ReportSink, WorkerReport};

#[test]
fn late_video_probe_cannot_override_newer_image() {
    // Probe completion order must not matter: try both.
    for newest_first in [true, false] {
        let mut h = Harness::new();
        let video = h.video("a.mov");
        let image = h.image("b.png", 64, 48);

        assert!(h.engine.create_dock(dock("d1", skin("video", &video))));
        h.engine.update_skin("d1", skin("image", &image));
        assert_eq!(h.worker.pending(), 2);

        if newest_first {
            h.worker.run_last();
            h.engine.pump();
            h.worker.run_next();
            h.engine.pump();
        } else {
            h.worker.run_next();
            h.engine.pump();
            h.worker.run_next();
            h.engine.pump();
        }
        h.advance_ms(2_000);

        let view = h.dock_view("d1");
        assert_eq!(view.borrow().image, Some((64, 48)));
        assert!(!view.borrow().showing_player);
        assert!(h.backend.lock().unwrap().opened.is_empty());

        let surface = h.engine.sessions().surface("d1").unwrap();
        let target = surface.target().unwrap();
        assert_eq!(target.source, MediaSource::File(image.clone()));
        assert_eq!(target.kind, MediaKind::Image);
        assert!(matches!(surface.phase(), SurfacePhase::Ready { .. }));
    }
}

#[test]
fn transform_change_updates_in_place() {
    let mut h = Harness::new();
    let video = h.video("a.mov");
    h.engine.create_dock(dock("d1", skin("video", &video)));
    h.advance_ms(1_000);
    assert_eq!(h.backend.lock().unwrap().opened.len(), 1);
    let generation = h.engine.sessions().surface("d1").unwrap().load_generation();

    let mut edited = skin("video", &video);
    edited.opacity = 0.5;
    edited.muted = false;
    edited.scale = 2.0;
    h.engine.update_skin("d1", edited);
    h.advance_ms(1_000);

    let backend = h.backend.lock().unwrap();
    assert_eq!(backend.opened.len(), 1, "no reload for a transform-only edit");
    assert!(!backend.player(0).muted);
    assert_eq!(h.dock_view("d1").borrow().opacity, Some(0.5));
    assert_eq!(
        h.engine.sessions().surface("d1").unwrap().load_generation(),
        generation
    );
}

#[test]
fn image_decode_failures_retry_twice_then_render_nothing() {
    let mut h = Harness::new();
    let missing = h.dir.path().join("gone.png");
    h.engine.create_dock(dock("d1", skin("image", &missing)));
    h.settle();
    assert_eq!(h.grants.lock().unwrap().started, 1);

    h.advance_ms(799);
    assert_eq!(h.grants.lock().unwrap().started, 1);
    h.advance_ms(1);
    assert_eq!(h.grants.lock().unwrap().started, 2);
    h.advance_ms(800);
    assert_eq!(h.grants.lock().unwrap().started, 3);
    h.advance_ms(5_000);

    let grants = h.grants.lock().unwrap();
    assert_eq!(grants.started, 3);
    assert_eq!(grants.started, grants.stopped);
    assert_eq!(h.dock_view("d1").borrow().image, None);
    assert_eq!(
        h.engine.sessions().surface("d1").unwrap().phase(),
        SurfacePhase::Empty
    );
}

#[test]
fn video_probe_recovers_on_retry() {
    let mut h = Harness::new();
    let video = h.video("a.mov");
    h.backend.lock().unwrap().failing_probes = 1;
    h.engine.create_dock(dock("d1", skin("video", &video)));
    h.advance_ms(700);
    assert!(h.backend.lock().unwrap().opened.is_empty());

    h.advance_ms(500);
    let backend = h.backend.lock().unwrap();
    assert_eq!(backend.probes.len(), 2);
    assert_eq!(backend.opened.len(), 1);
    assert!(backend.player(0).playing);
    assert!(backend.player(0).looping);
    assert!(h.dock_view("d1").borrow().showing_player);
}

#[test]
fn playback_follows_visibility_and_toggle() {
    let mut h = Harness::new();
    let video = h.video("a.mov");
    h.engine.create_dock(dock("d1", skin("video", &video)));
    h.advance_ms(1_000);
    let window = h.dock_window("d1");
    let playing = |h: &Harness| h.backend.lock().unwrap().player(0).playing;
    assert!(playing(&h));

    h.engine.handle_event(SystemEvent::Occlusion {
        window,
        visible: false,
    });
    assert!(!playing(&h));
    h.engine.handle_event(SystemEvent::Occlusion {
        window,
        visible: true,
    });
    assert!(playing(&h));

    h.engine.handle_event(SystemEvent::Miniaturized(window));
    assert!(!playing(&h));
    h.engine.handle_event(SystemEvent::Deminiaturized(window));
    assert!(playing(&h));

    h.engine.set_playback_enabled(false);
    assert!(!playing(&h));
    h.engine.set_playback_enabled(true);
    assert!(playing(&h));

    // Pausing never tears the player down.
    let backend = h.backend.lock().unwrap();
    assert_eq!(backend.opened.len(), 1);
    assert_eq!(backend.player(0).stops, 0);
}

#[test]
fn animated_images_stop_when_hidden() {
    let mut h = Harness::new();
    let path = h.dir.path().join("spin.gif");
    let frames = (0..3).map(|_| image::Frame::new(image::RgbaImage::new(8, 8)));
    {
        let file = std::fs::File::create(&path).unwrap();
        let mut encoder = image::codecs::gif::GifEncoder::new(file);
        encoder.encode_frames(frames).unwrap();
    }
    h.engine.create_dock(dock("d1", skin("image", &path)));
    h.advance_ms(100);
    let view = h.dock_view("d1");
    assert!(view.borrow().animating);

    let window = h.dock_window("d1");
    h.engine.handle_event(SystemEvent::Occlusion {
        window,
        visible: false,
    });
    assert!(!view.borrow().animating);
}

#[test]
fn disallowed_video_shows_a_preview_still() {
    let mut h = Harness::new();
    let video = h.video("a.mov");
    h.engine.set_video_allowed(false);
    h.engine.create_dock(dock("d1", skin("video", &video)));
    h.advance_ms(1_000);

    {
        let backend = h.backend.lock().unwrap();
        assert!(backend.opened.is_empty());
        assert_eq!(backend.previews, vec![video.clone()]);
    }
    assert_eq!(h.dock_view("d1").borrow().image, Some((16, 9)));

    h.engine.set_video_allowed(true);
    h.advance_ms(1_000);
    assert_eq!(h.backend.lock().unwrap().opened.len(), 1);
    assert!(h.dock_view("d1").borrow().showing_player);
}

#[test]
fn layout_tracks_window_resizes() {
    let mut h = Harness::new();
    let image = h.image("wide.png", 200, 100);
    let mut fit = skin("image", &image);
    fit.fit_mode = "fit".into();
    h.engine.create_dock(dock("d1", fit));
    h.advance_ms(100);

    let window = h.dock_window("d1");
    h.engine.handle_event(SystemEvent::WindowResized {
        window,
        frame: driftdock_platform::Frame::new(200.0, 200.0, 400.0, 400.0),
    });
    let frame = h.dock_view("d1").borrow().content_frame.unwrap();
    assert_eq!(frame.width, 400.0);
    assert_eq!(frame.height, 200.0);
    assert_eq!(frame.y, 100.0);
}

#[test]
fn failed_player_is_not_reused_after_sleep() {
    let mut h = Harness::new();
    let video = h.video("a.mov");
    h.engine.create_dock(dock("d1", skin("video", &video)));
    h.advance_ms(1_000);

    h.engine.handle_event(SystemEvent::WillSleep);
    h.backend.lock().unwrap().player(0).status = PlaybackStatus::Failed;
    h.advance_ms(500);
    h.engine.handle_event(SystemEvent::DidWake);
    h.advance_ms(6_000);

    let backend = h.backend.lock().unwrap();
    assert_eq!(backend.opened.len(), 2);
    assert_eq!(backend.player(0).stops, 1);
    assert!(backend.player(0).released);
    assert!(backend.player(1).playing);
}

#[derive(Default)]
struct CollectedReports(Mutex<Vec<WorkerReport>>);

impl ReportSink for CollectedReports {
    fn post(&self, report: WorkerReport) {
        self.0.lock().unwrap().push(report);
    }
}

#[test]
fn reports_routed_to_a_host_sink_apply_when_delivered() {
    let mut h = Harness::new();
    let image = h.image("a.png", 30, 20);
    let sink = Arc::new(CollectedReports::default());
    h.engine.set_report_sink(sink.clone());

    h.engine.create_dock(dock("d1", skin("image", &image)));
    assert_eq!(h.worker.run_all(), 1);
    h.engine.pump();
    assert_eq!(h.dock_view("d1").borrow().image, None);

    let reports = std::mem::take(&mut *sink.0.lock().unwrap());
    assert_eq!(reports.len(), 1);
    for report in reports {
        h.engine.deliver_report(report);
    }
    assert_eq!(h.dock_view("d1").borrow().image, Some((30, 20)));
}
