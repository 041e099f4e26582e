//! Operator stop requests.
//!
//! Ctrl-C is observed on a helper thread running a single-threaded tokio
//! runtime. It only raises a flag; the control loop polls the flag and winds
//! the current phase down through its normal finalization.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tracing::warn;

/// Shared flag raised when the operator asks the run to stop.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Raises `flag` on every Ctrl-C for the rest of the process.
pub fn install_ctrl_c(flag: &StopFlag) -> io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let flag = flag.clone();
    thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                while tokio::signal::ctrl_c().await.is_ok() {
                    if flag.is_requested() {
                        warn!("stop already requested; waiting for outputs to switch off");
                    } else {
                        warn!("stop requested; finishing the current step");
                    }
                    flag.request();
                }
            });
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_one_flag() {
        let flag = StopFlag::new();
        let observer = flag.clone();
        assert!(!observer.is_requested());
        flag.request();
        assert!(observer.is_requested());
    }
}
