//! Time source abstraction.
//!
//! Session timeouts are derived by comparing stored timestamps against the
//! current time, so the time source is an explicit collaborator instead of an
//! ambient call. Production code uses [`Clock::system`]; tests pin the clock
//! with [`Clock::fixed`] and move it with [`Clock::advance`].

use std::sync::Arc;

use parking_lot::RwLock;
use time::{Duration, OffsetDateTime};

/// A shared time source.
///
/// Cloning a fixed clock yields a handle to the same instant, so a test can
/// hold one handle and advance the clock under a store holding another.
#[derive(Debug, Clone)]
pub enum Clock {
    /// Wall-clock time.
    System,
    /// A pinned instant shared between clones.
    Fixed(Arc<RwLock<OffsetDateTime>>),
}

impl Clock {
    /// Creates a wall-clock time source.
    #[must_use]
    pub fn system() -> Self {
        Self::System
    }

    /// Creates a pinned clock at `instant`.
    #[must_use]
    pub fn fixed(instant: OffsetDateTime) -> Self {
        Self::Fixed(Arc::new(RwLock::new(instant)))
    }

    /// Returns the current instant.
    #[must_use]
    pub fn now(&self) -> OffsetDateTime {
        match self {
            Self::System => OffsetDateTime::now_utc(),
            Self::Fixed(instant) => *instant.read(),
        }
    }

    /// Moves a fixed clock forward by `delta`. No-op on a system clock.
    pub fn advance(&self, delta: Duration) {
        if let Self::Fixed(instant) = self {
            let mut guard = instant.write();
            *guard += delta;
        }
    }

    /// Repins a fixed clock to `instant`. No-op on a system clock.
    pub fn set(&self, at: OffsetDateTime) {
        if let Self::Fixed(instant) = self {
            *instant.write() = at;
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::System
    }
}
