use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared stop flag checked by the driver loop once per iteration
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that is cancelled on SIGINT / SIGTERM
    pub fn from_signals() -> Result<Self, ctrlc::Error> {
        let token = Self::new();
        let handle = token.clone();
        ctrlc::set_handler(move || {
            tracing::info!("Shutdown signal received...");
            handle.cancel();
        })?;
        Ok(token)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
