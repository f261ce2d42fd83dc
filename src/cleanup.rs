//! Background expiry sweep.

use crate::cache::Inner;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::io;
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Handle to the thread that runs `cleanup` every interval.
///
/// The thread holds only a weak reference to the cache, so it never keeps a
/// dropped cache alive. Stopping waits for a pass already in progress to
/// finish, never for the next interval.
pub struct CleanupTask {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl CleanupTask {
    pub(crate) fn spawn(cache: Weak<Inner>, interval: Duration) -> io::Result<Self> {
        let (stop, stopped) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("embcache-cleanup".to_string())
            .spawn(move || {
                debug!(?interval, "cleanup task started");
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let Some(cache) = cache.upgrade() else {
                                break;
                            };
                            let outcome = cache.cleanup();
                            debug!(
                                memory_expired = outcome.memory_expired,
                                durable_removed = outcome.durable_removed,
                                "scheduled cleanup"
                            );
                        }
                        // explicit stop, or the handle was dropped
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("cleanup task stopped");
            })?;

        Ok(Self { stop, handle })
    }

    /// Signal the thread and wait for it to exit.
    pub fn stop(self) {
        let _ = self.stop.try_send(());
        if self.handle.join().is_err() {
            warn!("cleanup task panicked");
        }
    }
}
