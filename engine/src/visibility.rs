//! Foreground/background signal.

use std::sync::Arc;

use tokio::sync::watch;
use wallet_types::Visibility;

/// Latest-value cell for whether the application is in front of the user.
///
/// Hosts publish every transition they see; observers only ever read the
/// most recent value. Intermediate transitions are not buffered.
#[derive(Debug, Clone)]
pub struct VisibilitySignal {
    tx: Arc<watch::Sender<Visibility>>,
}

impl VisibilitySignal {
    /// `None` means the host cannot tell, which reads as backgrounded.
    #[must_use]
    pub fn new(initial: Option<Visibility>) -> Self {
        let initial = initial.unwrap_or_else(|| {
            tracing::debug!("Host cannot report visibility; assuming background");
            Visibility::Background
        });
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    #[must_use]
    pub fn current(&self) -> Visibility {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn is_foreground(&self) -> bool {
        self.current().is_foreground()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Visibility> {
        self.tx.subscribe()
    }

    /// Record a transition. Returns `false` (and wakes nobody) if the value
    /// did not change.
    pub fn publish(&self, visibility: Visibility) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == visibility {
                false
            } else {
                *current = visibility;
                true
            }
        });
        if changed {
            tracing::debug!(visibility = %visibility, "Visibility changed");
        }
        changed
    }
}
