//! Scoped release of listener registrations.

use std::fmt;

type Release = Box<dyn FnOnce() + Send>;

/// Runs its release action exactly once: on the first [`Disposer::dispose`]
/// call, or on drop if it was never disposed explicitly.
pub struct Disposer {
    release: Option<Release>,
}

impl Disposer {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A disposer with nothing to release.
    #[must_use]
    pub fn noop() -> Self {
        Self { release: None }
    }

    /// Release the registration. Returns `true` only for the call that
    /// actually ran the release action.
    pub fn dispose(&mut self) -> bool {
        match self.release.take() {
            Some(release) => {
                release();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.release.is_none()
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
