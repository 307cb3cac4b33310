use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::error::RefsketchError;

/// Cooperative stop request, checked between accessions.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Cancels this flag on SIGINT (and SIGTERM on unix). Can be installed
    /// once per process.
    pub fn cancel_on_interrupt(&self) -> Result<(), RefsketchError> {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            if !flag.is_cancelled() {
                warn!("interrupt received; stopping after the current genome");
            }
            flag.cancel();
        })
        .map_err(|err| RefsketchError::SignalHandler(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let flag = CancelFlag::new();
        let seen_by_worker = flag.clone();
        assert!(!seen_by_worker.is_cancelled());
        flag.cancel();
        assert!(seen_by_worker.is_cancelled());
    }
}
