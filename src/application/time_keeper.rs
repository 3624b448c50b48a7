//! Clock-bound window tracker.

use crate::application::ports::Clock;
use crate::domain::window::WindowState;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Error returned by [`TimeKeeper::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    /// The window was already started and not reset
    #[error("window already started; reset it before starting again")]
    AlreadyStarted,
}

/// Tracks one fixed-duration window against a clock.
///
/// # Example
/// ```
/// use advanced_throttle::{SystemClock, TimeKeeper};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let mut keeper = TimeKeeper::new(Duration::from_secs(120), Arc::new(SystemClock::new()));
/// keeper.start().unwrap();
///
/// assert!(keeper.remaining() <= Duration::from_secs(120));
/// assert!(keeper.start().is_err());
///
/// keeper.reset();
/// assert!(keeper.start().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct TimeKeeper {
    window: Duration,
    clock: Arc<dyn Clock>,
    state: Option<WindowState>,
}

impl TimeKeeper {
    /// Create an unstarted tracker for windows of length `window`.
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            clock,
            state: None,
        }
    }

    /// Start the window now.
    ///
    /// # Errors
    /// Returns [`WindowError::AlreadyStarted`] if the window is running or has
    /// expired without a [`reset`](Self::reset).
    pub fn start(&mut self) -> Result<&WindowState, WindowError> {
        if self.state.is_some() {
            return Err(WindowError::AlreadyStarted);
        }
        let state = self
            .state
            .insert(WindowState::start(self.window, self.clock.now()));
        Ok(&*state)
    }

    /// Forget the current window.
    pub fn reset(&mut self) {
        self.state = None;
    }

    /// The started window, if any.
    pub fn state(&self) -> Option<&WindowState> {
        self.state.as_ref()
    }

    /// Length of the tracked windows.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Time left in the current window; zero when not started or expired.
    pub fn remaining(&self) -> Duration {
        self.state
            .map(|state| state.remaining(self.clock.now()))
            .unwrap_or(Duration::ZERO)
    }

    /// End of the current window.
    pub fn expiration(&self) -> Option<SystemTime> {
        self.state.map(|state| state.expires_at())
    }

    /// Whether the current window has ended. An unstarted tracker counts as expired.
    pub fn is_expired(&self) -> bool {
        self.state
            .map(|state| state.is_expired(self.clock.now()))
            .unwrap_or(true)
    }
}
