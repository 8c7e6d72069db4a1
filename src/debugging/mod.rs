//! # Debugging Supports
//!
//! Owns process-wide observability: installing the `tracing` subscriber
//! and tracking whether the debugging layer is up. Other modules treat
//! this as a hard dependency: engine memory refuses to initialize before
//! it and reports a dependent-module error if it is torn down first at
//! shutdown.
//!
//! Subscriber installation is global and idempotent: the first engine in
//! a process installs it, later engines (and unit tests) reuse it. The
//! filter honors `RUST_LOG`.

use std::sync::atomic::{AtomicBool, Ordering};

use eyre::Result;
use tracing_subscriber::EnvFilter;

/// Tracks debugging-layer lifecycle for dependent-module checks.
#[derive(Debug, Default)]
pub struct DebuggingSupports {
    initialized: AtomicBool,
}

impl DebuggingSupports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the global tracing subscriber (first caller in the
    /// process wins; later calls only flip the initialized flag).
    pub fn initialize(&self) -> Result<()> {
        // A subscriber may already be installed by an earlier engine or
        // by the test harness; that is not an error.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_target(false)
            .try_init();
        self.initialized.store(true, Ordering::Release);
        tracing::debug!("debugging supports initialized");
        Ok(())
    }

    pub fn uninitialize(&self) {
        self.initialized.store(false, Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_flag() {
        let debug = DebuggingSupports::new();
        assert!(!debug.is_initialized());
        debug.initialize().unwrap();
        assert!(debug.is_initialized());
        debug.uninitialize();
        assert!(!debug.is_initialized());
    }
}
