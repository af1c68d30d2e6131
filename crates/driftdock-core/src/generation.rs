//! Increment-and-compare cancellation.
//!
//! In-flight work never receives a cancel signal. It carries the [`LoadToken`]
//! it was started with and checks it against the owning [`Generation`] at every
//! resumption point; a newer request makes every older token stale.

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadToken(u64);

impl LoadToken {
    pub fn generation(&self) -> u64 {
        self.0
    }
}

impl Generation {
    pub fn new() -> Self {
        Self(0)
    }

    /// Invalidates every outstanding token and returns the new current one.
    pub fn advance(&mut self) -> LoadToken {
        self.0 += 1;
        LoadToken(self.0)
    }

    pub fn current(&self) -> LoadToken {
        LoadToken(self.0)
    }

    pub fn is_current(&self, token: LoadToken) -> bool {
        token.0 == self.0
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}
