//! Windows display enumeration for Driftdock.
//!
//! Only the display topology comes from Win32 here; windows and media stay
//! with whichever host embeds the engine.

#[cfg(windows)]
mod displays;

#[cfg(windows)]
pub use displays::Win32Displays;
