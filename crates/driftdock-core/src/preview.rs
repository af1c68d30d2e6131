//! Still frames substituted for videos while video playback is disallowed.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use driftdock_platform::MediaBackend;
use tracing::{debug, warn};

use crate::pool::stable_hash;
use crate::worker::{ReportSink, Worker, WorkerReport};

pub struct PreviewCache {
    dir: Option<PathBuf>,
    ready: HashMap<PathBuf, PathBuf>,
    requested: HashSet<PathBuf>,
}

impl PreviewCache {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            ready: HashMap::new(),
            requested: HashSet::new(),
        }
    }

    pub fn lookup(&self, video: &Path) -> Option<&Path> {
        self.ready.get(video).map(PathBuf::as_path)
    }

    /// Where the preview for `video` is written.
    pub fn preview_path(&self, video: &Path) -> Option<PathBuf> {
        let hash = stable_hash(video.to_string_lossy().as_bytes());
        self.dir.as_ref().map(|dir| dir.join(format!("{hash:016x}.png")))
    }

    /// Queues extraction unless it is already known or in flight.
    pub fn request(
        &mut self,
        video: &Path,
        backend: &Arc<dyn MediaBackend>,
        worker: &dyn Worker,
        reports: Arc<dyn ReportSink>,
    ) -> bool {
        if self.ready.contains_key(video) || self.requested.contains(video) {
            return false;
        }
        let Some(dest) = self.preview_path(video) else {
            return false;
        };
        self.requested.insert(video.to_path_buf());

        let backend = Arc::clone(backend);
        let video = video.to_path_buf();
        worker.spawn(Box::new(move || {
            let preview = extract(backend.as_ref(), &video, dest);
            reports.post(WorkerReport::PreviewReady { video, preview });
        }));
        true
    }

    pub fn complete(&mut self, video: PathBuf, preview: Option<PathBuf>) {
        self.requested.remove(&video);
        if let Some(preview) = preview {
            debug!(video = %video.display(), "preview ready");
            self.ready.insert(video, preview);
        }
    }
}

fn extract(backend: &dyn MediaBackend, video: &Path, dest: PathBuf) -> Option<PathBuf> {
    if dest.exists() {
        return Some(dest);
    }
    if let Some(parent) = dest.parent() {
        if let Err(err) = std::fs::create_dir_all(parent) {
            warn!(dir = %parent.display(), "cannot create preview cache: {err}");
            return None;
        }
    }
    match backend.extract_preview(video, &dest) {
        Ok(()) if dest.exists() => Some(dest),
        Ok(()) => None,
        Err(err) => {
            warn!(video = %video.display(), "preview extraction failed: {err}");
            None
        }
    }
}
