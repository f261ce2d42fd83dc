//! Bounded-wait access to the durable tier.
//!
//! With a worker, every durable operation is shipped as a closure to one
//! dedicated thread that owns the store, and the caller waits for the reply
//! for at most the configured timeout. Submission and waiting are separate
//! steps so the cache can enqueue while it holds its lock (keeping per-key
//! order) and wait after releasing it.
//!
//! Without a worker, operations run inline on the calling thread.

use super::durable::DurableStore;
use crate::error::{StoreError, StoreResult};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

type Job = Box<dyn FnOnce(&DurableStore) + Send>;

enum Dispatch {
    Inline,
    Worker {
        jobs: Mutex<Option<Sender<Job>>>,
        handle: Mutex<Option<JoinHandle<()>>>,
    },
}

/// The durable tier as seen by the cache.
pub struct PersistentTier {
    store: Arc<DurableStore>,
    dispatch: Dispatch,
    timeout: Duration,
}

/// A submitted operation whose result has not been collected yet.
#[must_use = "a pending operation does nothing until waited on"]
pub struct Pending<T> {
    state: PendingState<T>,
    timeout: Duration,
}

enum PendingState<T> {
    Ready(StoreResult<T>),
    Waiting(Receiver<StoreResult<T>>),
}

impl<T> Pending<T> {
    /// Collect the result, giving up after the tier's timeout.
    pub fn wait(self) -> StoreResult<T> {
        match self.state {
            PendingState::Ready(result) => result,
            PendingState::Waiting(rx) => match rx.recv_timeout(self.timeout) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => Err(StoreError::Timeout(self.timeout)),
                Err(RecvTimeoutError::Disconnected) => Err(StoreError::Closed),
            },
        }
    }
}

impl PersistentTier {
    /// Run operations inline on the caller's thread.
    pub fn inline(store: DurableStore, timeout: Duration) -> Self {
        Self {
            store: Arc::new(store),
            dispatch: Dispatch::Inline,
            timeout,
        }
    }

    /// Run operations on a dedicated worker thread.
    pub fn spawn(store: DurableStore, timeout: Duration) -> StoreResult<Self> {
        let store = Arc::new(store);
        let (tx, rx) = unbounded::<Job>();

        let worker_store = store.clone();
        let handle = thread::Builder::new()
            .name("embcache-persist".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job(&worker_store);
                }
                debug!("persistence worker exiting");
            })?;

        Ok(Self {
            store,
            dispatch: Dispatch::Worker {
                jobs: Mutex::new(Some(tx)),
                handle: Mutex::new(Some(handle)),
            },
            timeout,
        })
    }

    /// Direct access to the store, bypassing the worker.
    pub fn store(&self) -> &DurableStore {
        &self.store
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True when operations go through a worker thread.
    pub fn is_concurrent(&self) -> bool {
        matches!(self.dispatch, Dispatch::Worker { .. })
    }

    /// Submit `op`. Inline tiers run it before returning.
    pub fn submit<T, F>(&self, op: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&DurableStore) -> StoreResult<T> + Send + 'static,
    {
        let state = match &self.dispatch {
            Dispatch::Inline => PendingState::Ready(op(&self.store)),
            Dispatch::Worker { jobs, .. } => {
                let (reply_tx, reply_rx) = bounded(1);
                let job: Job = Box::new(move |store| {
                    // the caller may have timed out and dropped the receiver
                    let _ = reply_tx.send(op(store));
                });
                let sent = jobs
                    .lock()
                    .as_ref()
                    .map(|tx| tx.send(job).is_ok())
                    .unwrap_or(false);
                if sent {
                    PendingState::Waiting(reply_rx)
                } else {
                    PendingState::Ready(Err(StoreError::Closed))
                }
            }
        };
        Pending {
            state,
            timeout: self.timeout,
        }
    }

    /// Submit `op` and wait for it.
    pub fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&DurableStore) -> StoreResult<T> + Send + 'static,
    {
        self.submit(op).wait()
    }

    /// Stop accepting work and join the worker after it drains its queue.
    /// Later submissions fail with [`StoreError::Closed`].
    pub fn shutdown(&self) {
        if let Dispatch::Worker { jobs, handle } = &self.dispatch {
            drop(jobs.lock().take());
            if let Some(handle) = handle.lock().take() {
                if handle.join().is_err() {
                    warn!("persistence worker panicked");
                }
            }
        }
    }
}

impl Drop for PersistentTier {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::CompressionMode;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> DurableStore {
        DurableStore::open(
            &dir.path().join("worker.redb"),
            CompressionMode::None,
            Arc::new(SystemClock),
        )
        .unwrap()
    }

    #[test]
    fn test_inline_runs_immediately() {
        let dir = TempDir::new().unwrap();
        let tier = PersistentTier::inline(store(&dir), Duration::from_millis(50));
        assert!(!tier.is_concurrent());
        assert_eq!(tier.run(|s| s.len()).unwrap(), 0);
    }

    #[test]
    fn test_worker_round_trip() {
        let dir = TempDir::new().unwrap();
        let tier = PersistentTier::spawn(store(&dir), Duration::from_secs(5)).unwrap();
        assert!(tier.is_concurrent());
        assert_eq!(tier.run(|s| s.len()).unwrap(), 0);
        assert_eq!(tier.run(|_| Ok(7_u32)).unwrap(), 7);
    }

    #[test]
    fn test_slow_operation_times_out() {
        let dir = TempDir::new().unwrap();
        let tier = PersistentTier::spawn(store(&dir), Duration::from_millis(20)).unwrap();

        let result = tier.run(|_| {
            thread::sleep(Duration::from_millis(200));
            Ok(())
        });
        assert!(matches!(result, Err(StoreError::Timeout(_))));

        // the worker is still alive once the slow job finishes
        let tier_ok = tier.submit(|s| s.len());
        thread::sleep(Duration::from_millis(250));
        assert_eq!(tier_ok.wait().unwrap(), 0);
    }

    #[test]
    fn test_submit_after_shutdown_is_closed() {
        let dir = TempDir::new().unwrap();
        let tier = PersistentTier::spawn(store(&dir), Duration::from_secs(1)).unwrap();
        tier.shutdown();
        assert!(matches!(tier.run(|s| s.len()), Err(StoreError::Closed)));
        tier.shutdown();
    }
}
