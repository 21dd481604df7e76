use tokio::sync::watch;

/// Source of connectivity status for online-only gating.
///
/// The processor consults `is_connected` synchronously while filtering
/// claimed jobs and wakes on false→true transitions observed through the
/// subscription. With no monitor configured the processor treats the
/// process as permanently online.
pub trait NetworkMonitor: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Receivers observe every connectivity change.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Watch-channel backed connectivity source.
///
/// Host glue owns one and reports transitions through [`set_connected`];
/// the platform binding (reachability API, connectivity manager, ...)
/// stays outside the core.
///
/// [`set_connected`]: NetworkState::set_connected
pub struct NetworkState {
    tx: watch::Sender<bool>,
}

impl NetworkState {
    pub fn new(connected: bool) -> Self {
        let (tx, _rx) = watch::channel(connected);
        Self { tx }
    }

    pub fn set_connected(&self, connected: bool) {
        self.tx.send_replace(connected);
    }
}

impl Default for NetworkState {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkMonitor for NetworkState {
    fn is_connected(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
