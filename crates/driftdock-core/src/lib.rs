//! Driftdock core engine: media surfaces, the player pool, the load gate and
//! the dock/wallpaper window sessions, all driven from one main context.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod generation;
pub mod geometry;
pub mod media;
pub mod pool;
pub mod preview;
pub mod resolver;
pub mod services;
pub mod session;
pub mod surface;
pub mod timer;
pub mod wallpaper;
pub mod worker;

#[cfg(test)]
mod tests;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{Engine, Platform};
pub use media::{FitMode, MediaDescriptor, MediaKind};
pub use resolver::{MediaSource, ScopedAccessResolver, ScopedReference};
pub use wallpaper::WallpaperPreference;
pub use worker::{ReportSink, ThreadWorker, Worker, WorkerReport};
