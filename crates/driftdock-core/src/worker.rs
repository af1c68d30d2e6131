//! Background worker pool and the player reaper.
//!
//! Workers only ever run file probes, image decodes, preview extraction and
//! player teardown. Results travel back as [`WorkerReport`]s through a
//! [`ReportSink`]: by default a channel the main context drains, or whatever a
//! host event loop installs. Nothing on a worker touches engine state.

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use driftdock_platform::{DecodedImage, MediaPlayer, VideoInfo};
use tracing::{debug, warn};

use crate::error::MediaError;
use crate::generation::LoadToken;
use crate::media::MediaKind;
use crate::pool::SurfaceKey;
use crate::resolver::MediaSource;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait Worker {
    fn spawn(&self, job: Job);
}

/// Fixed pool of named threads fed by an unbounded channel.
pub struct ThreadWorker {
    sender: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl ThreadWorker {
    pub fn new(threads: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let mut handles = Vec::new();
        for index in 0..threads.max(1) {
            let receiver = receiver.clone();
            let spawned = thread::Builder::new()
                .name(format!("driftdock-worker-{index}"))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => warn!("failed to start worker thread {index}: {err}"),
            }
        }
        Self {
            sender: Some(sender),
            handles,
        }
    }
}

impl Worker for ThreadWorker {
    fn spawn(&self, job: Job) {
        if self.handles.is_empty() {
            // No thread could be started; degrade to running inline.
            job();
            return;
        }
        if let Some(sender) = &self.sender {
            if sender.send(job).is_err() {
                warn!("worker channel closed; dropping job");
            }
        }
    }
}

impl Drop for ThreadWorker {
    fn drop(&mut self) {
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[derive(Debug)]
pub enum ProbeOutcome {
    Image(Result<DecodedImage, MediaError>),
    Video(Result<VideoInfo, MediaError>),
}

#[derive(Debug)]
pub struct ProbeReport {
    pub key: SurfaceKey,
    pub token: LoadToken,
    pub attempt: u8,
    /// The media the probe was started for.
    pub source: MediaSource,
    pub kind: MediaKind,
    pub outcome: ProbeOutcome,
}

#[derive(Debug)]
pub enum WorkerReport {
    Probe(ProbeReport),
    PreviewReady {
        video: PathBuf,
        preview: Option<PathBuf>,
    },
}

/// Destination for reports posted from worker threads.
pub trait ReportSink: Send + Sync {
    fn post(&self, report: WorkerReport);
}

impl ReportSink for Sender<WorkerReport> {
    fn post(&self, report: WorkerReport) {
        if self.send(report).is_err() {
            debug!("report channel closed; dropping report");
        }
    }
}

/// The sink handed to jobs plus the local queue [`Reports::try_recv`] drains.
pub struct Reports {
    sink: Arc<dyn ReportSink>,
    receiver: Receiver<WorkerReport>,
}

impl Reports {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            sink: Arc::new(sender),
            receiver,
        }
    }

    pub fn sender(&self) -> Arc<dyn ReportSink> {
        Arc::clone(&self.sink)
    }

    /// Sends later reports to `sink`. Jobs already queued keep the old one.
    pub fn redirect(&mut self, sink: Arc<dyn ReportSink>) {
        self.sink = sink;
    }

    pub fn try_recv(&self) -> Option<WorkerReport> {
        self.receiver.try_recv().ok()
    }
}

impl Default for Reports {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases orphaned players off the main context.
#[derive(Clone)]
pub struct Disposer {
    worker: Rc<dyn Worker>,
}

impl Disposer {
    pub fn new(worker: Rc<dyn Worker>) -> Self {
        Self { worker }
    }

    /// Queues the release; the caller must not assume it has happened on return.
    pub fn dispose(&self, player: Box<dyn MediaPlayer>) {
        debug!("queueing player release");
        self.worker.spawn(Box::new(move || player.release()));
    }
}
