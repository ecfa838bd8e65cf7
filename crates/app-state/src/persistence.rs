//! Debounced persistence of store keys
//!
//! The coordinator watches the store and arms a timer per [`StoreKey`]
//! whenever that key's value changes. When a key has been quiet for the
//! debounce window, its latest value is dehydrated and written to the
//! backend. Timers are independent: a burst of collection updates never
//! delays a settings write.
//!
//! All writes happen on one task, so writes to the same key are serialized.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use storage::StorageBackend;

use crate::hydration::dehydrate;
use crate::store::{StoreData, StoreKey};

/// Default quiet period before a changed key is written
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

enum Command {
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the background persistence task
pub struct PersistenceCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
}

impl PersistenceCoordinator {
    /// Start persisting changes observed on `states`
    ///
    /// The value current at start is treated as already persisted.
    pub fn start(
        mut states: watch::Receiver<Arc<StoreData>>,
        backend: Arc<dyn StorageBackend>,
        debounce: Duration,
    ) -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        let last = Arc::clone(&states.borrow_and_update());
        let worker = Worker {
            states,
            backend,
            debounce,
            pending: HashMap::new(),
        };
        let task = tokio::spawn(worker.run(last, inbox));

        Self { commands, task: Some(task) }
    }

    /// Write every armed key now, without waiting for its timer
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.commands.send(Command::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Flush pending writes and stop the task
    pub async fn shutdown(mut self) {
        let (done, wait) = oneshot::channel();
        if self.commands.send(Command::Shutdown(done)).is_ok() {
            let _ = wait.await;
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Persistence task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for PersistenceCoordinator {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                tracing::warn!("Persistence stopped without shutdown, unwritten changes may be lost");
            }
            task.abort();
        }
    }
}

/// Write attempts made for the remaining keys when stopping
const FINAL_WRITE_ATTEMPTS: usize = 3;

struct Worker {
    states: watch::Receiver<Arc<StoreData>>,
    backend: Arc<dyn StorageBackend>,
    debounce: Duration,
    pending: HashMap<StoreKey, Instant>,
}

impl Worker {
    async fn run(mut self, mut last: Arc<StoreData>, mut inbox: mpsc::UnboundedReceiver<Command>) {
        loop {
            let next_deadline = self.pending.values().min().copied();
            let timer = async move {
                match next_deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                changed = self.states.changed() => {
                    if changed.is_err() {
                        // Store dropped
                        self.write_remaining(&last).await;
                        break;
                    }
                    self.arm_changed(&mut last);
                }
                _ = timer => {
                    self.write_pending(&last, false).await;
                }
                command = inbox.recv() => {
                    // Changes dispatched right before the command still count
                    if self.states.has_changed().unwrap_or(false) {
                        self.arm_changed(&mut last);
                    }
                    match command {
                        Some(Command::Flush(done)) => {
                            self.write_pending(&last, true).await;
                            let _ = done.send(());
                        }
                        Some(Command::Shutdown(done)) => {
                            self.write_remaining(&last).await;
                            let _ = done.send(());
                            break;
                        }
                        None => {
                            self.write_remaining(&last).await;
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Arm a timer for every key that differs from `last`
    fn arm_changed(&mut self, last: &mut Arc<StoreData>) {
        let current = Arc::clone(&self.states.borrow_and_update());
        let deadline = Instant::now() + self.debounce;
        for key in last.changed_keys(&current) {
            self.pending.insert(key, deadline);
        }
        *last = current;
    }

    /// Write every armed key before stopping, retrying failed writes
    async fn write_remaining(&mut self, data: &StoreData) {
        for _ in 0..FINAL_WRITE_ATTEMPTS {
            if self.pending.is_empty() {
                return;
            }
            self.write_pending(data, true).await;
        }
        if !self.pending.is_empty() {
            let mut lost: Vec<&str> = self.pending.keys().map(|key| key.as_str()).collect();
            lost.sort_unstable();
            tracing::error!("Giving up on persisting {}", lost.join(", "));
        }
    }

    /// Write due keys, or every armed key when `all` is set
    ///
    /// Keys whose write fails are re-armed for another debounce window.
    async fn write_pending(&mut self, data: &StoreData, all: bool) {
        let now = Instant::now();
        let mut due: Vec<StoreKey> = self
            .pending
            .iter()
            .filter(|(_, deadline)| all || **deadline <= now)
            .map(|(key, _)| *key)
            .collect();
        if due.is_empty() {
            return;
        }
        due.sort_by_key(|key| key.as_str());

        let mut written = Vec::with_capacity(due.len());
        let mut entries = Vec::with_capacity(due.len());
        for key in due {
            self.pending.remove(&key);
            match dehydrate(data, key) {
                Ok(blob) => {
                    written.push(key);
                    entries.push((key.as_str().to_string(), blob));
                }
                Err(e) => tracing::error!("Failed to dehydrate {}: {}", key, e),
            }
        }
        if entries.is_empty() {
            return;
        }

        tracing::debug!("Persisting {} key(s)", entries.len());
        let result = if let [(key, blob)] = entries.as_slice() {
            self.backend.set(key, blob).await
        } else {
            self.backend.multi_set(&entries).await
        };
        if let Err(e) = result {
            tracing::warn!("Failed to persist store keys, retrying: {}", e);
            let retry_at = Instant::now() + self.debounce;
            for key in written {
                // A newer change may have armed the key already
                self.pending.entry(key).or_insert(retry_at);
            }
        }
    }
}
