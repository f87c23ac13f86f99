//! Process-wide instances shared by every subcommand.

use liftlog_cache::NamespacedStore;
use liftlog_core::{Config, HostSignal};
use liftlog_scheduler::ConcurrencyManager;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

const SIGNAL_CAPACITY: usize = 16;

/// Built once in `main`, torn down once by [`App::shutdown`].
pub struct App {
    pub config: Config,
    pub scheduler: ConcurrencyManager,
    pub store: NamespacedStore,
    signals: broadcast::Sender<HostSignal>,
    listener: JoinHandle<()>,
}

impl App {
    pub fn new(config: Config) -> Self {
        let scheduler = ConcurrencyManager::new(&config.scheduler);
        let (signals, rx) = broadcast::channel(SIGNAL_CAPACITY);
        let listener = scheduler.attach_signal_source(rx);
        Self {
            config,
            scheduler,
            store: NamespacedStore::new(),
            signals,
            listener,
        }
    }

    /// Sender for host signals; every attached listener receives them.
    pub fn signal_sender(&self) -> broadcast::Sender<HostSignal> {
        self.signals.clone()
    }

    /// Cancel all outstanding work and stop the signal listener.
    pub fn shutdown(self) {
        self.scheduler.destroy();
        self.listener.abort();
        debug!("shutdown complete");
    }
}
