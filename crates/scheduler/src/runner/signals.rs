use std::sync::Arc;

use liftlog_core::{HostSignal, MemoryPressure};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::tags;
use crate::types::effective_limit;

use super::ConcurrencyManager;

impl ConcurrencyManager {
    /// React to a memory-pressure report: shed tagged background work and
    /// cap the admission bound. `Low` restores the configured bound.
    pub fn handle_memory_pressure(&self, level: MemoryPressure) {
        let previous = {
            let mut state = self.state();
            let previous = state.pressure;
            state.pressure = level;
            state.limit = effective_limit(state.configured_limit, level);
            previous
        };

        let shed: usize = tags::shed_on_pressure(level)
            .iter()
            .map(|tag| self.cancel_by_tag(tag))
            .sum();

        if previous != level || shed > 0 {
            info!(from = %previous, to = %level, shed, "memory pressure changed");
        }
        self.process_queue();
    }

    /// React to a visibility change. Hiding sheds sync/prefetch work;
    /// becoming visible re-triggers admission.
    pub fn handle_visibility_change(&self, visible: bool) {
        self.state().visible = visible;
        if visible {
            debug!("page visible, resuming admission");
        } else {
            let shed: usize = tags::shed_on_hidden()
                .iter()
                .map(|tag| self.cancel_by_tag(tag))
                .sum();
            debug!(shed, "page hidden");
        }
        self.process_queue();
    }

    pub fn handle_signal(&self, signal: HostSignal) {
        match signal {
            HostSignal::MemoryPressure(level) => self.handle_memory_pressure(level),
            HostSignal::Visibility(visible) => self.handle_visibility_change(visible),
        }
    }

    /// Listen for host signals on `source` until the channel closes or the
    /// last manager handle is dropped.
    ///
    /// The listener only holds a weak reference, so attaching a source does
    /// not keep the scheduler alive.
    pub fn attach_signal_source(
        &self,
        mut source: broadcast::Receiver<HostSignal>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(signal) => {
                        let Some(shared) = weak.upgrade() else {
                            break;
                        };
                        ConcurrencyManager { shared }.handle_signal(signal);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "host signal listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("host signal listener stopped");
        })
    }
}
