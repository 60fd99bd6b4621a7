//! Focus and visibility events for revalidate-on-focus bindings.

use tokio::sync::broadcast;

/// A window/page activation event reported by the embedding UI shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusEvent {
    /// The window regained input focus.
    WindowFocused,
    /// The page became visible again.
    PageVisible,
}

/// Broadcast channel for focus events.
///
/// The UI shell holds one signal and fires it from its own event mechanism;
/// every binding with `revalidate_on_focus` receives each firing and
/// revalidates its key (subject to the dedupe window).
#[derive(Debug, Clone)]
pub struct FocusSignal {
    tx: broadcast::Sender<FocusEvent>,
}

impl FocusSignal {
    /// Create a new signal with no listeners.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Report that the window regained focus.
    pub fn window_focused(&self) {
        let _ = self.tx.send(FocusEvent::WindowFocused);
    }

    /// Report that the page became visible.
    pub fn page_visible(&self) {
        let _ = self.tx.send(FocusEvent::PageVisible);
    }

    /// Subscribe to subsequent focus events.
    pub fn subscribe(&self) -> broadcast::Receiver<FocusEvent> {
        self.tx.subscribe()
    }
}

impl Default for FocusSignal {
    fn default() -> Self {
        Self::new()
    }
}
