//! Worker registry.
//!
//! The list of workers is append-only: entries are published once their
//! thread exists and are never removed, so a [`WorkerHandle`] stays valid
//! (and identical) for the whole life of the scenario.

use std::fmt::{self, Display};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};
use std::thread::{JoinHandle, Thread};

use crate::error::ConductorError;
use crate::status::{StatusCell, WorkerStatus};
use crate::sync::lock;

/// Registration index of a worker within its conductor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(usize);

impl WorkerId {
    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub(crate) struct WorkerEntry {
    pub(crate) id: WorkerId,
    pub(crate) name: String,
    pub(crate) thread: Thread,
    pub(crate) status: Arc<StatusCell>,
    pub(crate) interrupted: AtomicBool,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerEntry {
    pub(crate) fn status(&self) -> WorkerStatus {
        self.status.load()
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.status() == WorkerStatus::Terminated
    }

    /// Joins the worker thread if nobody has yet. Only call once the worker
    /// has published `Terminated`.
    pub(crate) fn join(&self) {
        if let Some(handle) = lock(&self.join).take() {
            if handle.join().is_err() {
                tracing::error!(worker = %self.name, "worker thread panicked outside its body");
            }
        }
    }

    /// Drops the join handle, leaving the thread running on its own.
    pub(crate) fn detach(&self) -> bool {
        lock(&self.join).take().is_some()
    }
}

/// Stable handle to a registered worker.
///
/// Two handles compare equal iff they refer to the same worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle(pub(crate) Arc<WorkerEntry>);

impl WorkerHandle {
    pub fn id(&self) -> WorkerId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The worker's OS thread.
    pub fn thread(&self) -> &Thread {
        &self.0.thread
    }

    pub fn status(&self) -> WorkerStatus {
        self.0.status()
    }

    /// Asks the worker to stop blocking.
    ///
    /// The worker's current blocking point (or its next one, if it is not
    /// blocked right now) returns `ConductorError::Interrupted`.
    pub fn interrupt(&self) {
        self.0.interrupted.store(true, Ordering::SeqCst);
        self.0.thread.unpark();
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.interrupted.load(Ordering::SeqCst)
    }
}

impl PartialEq for WorkerHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for WorkerHandle {}

/// Snapshot of worker statuses taken once per monitor cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Census {
    pub(crate) alive: usize,
    pub(crate) runnable: usize,
    pub(crate) timed_waiting: usize,
}

#[derive(Debug, Default)]
pub(crate) struct WorkerRegistry {
    workers: RwLock<Vec<Arc<WorkerEntry>>>,
}

impl WorkerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Validates `name` and reserves the next id under the write lock, then
    /// lets `spawn` start the thread. The entry is published only if `spawn`
    /// succeeds, so a failed spawn leaves no trace.
    pub(crate) fn register(
        &self,
        name: Option<String>,
        spawn: impl FnOnce(&str) -> io::Result<JoinHandle<()>>,
    ) -> Result<Arc<WorkerEntry>, ConductorError> {
        let mut workers = self
            .workers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let id = WorkerId(workers.len());
        let name = name.unwrap_or_else(|| format!("Conductor-Thread-{}", workers.len()));
        if workers.iter().any(|w| w.name == name) {
            return Err(ConductorError::DuplicateName { name });
        }

        let handle = spawn(&name).map_err(|source| ConductorError::Spawn {
            name: name.clone(),
            source,
        })?;
        let entry = Arc::new(WorkerEntry {
            id,
            name,
            thread: handle.thread().clone(),
            status: Arc::new(StatusCell::new()),
            interrupted: AtomicBool::new(false),
            join: Mutex::new(Some(handle)),
        });
        workers.push(Arc::clone(&entry));
        Ok(entry)
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<WorkerEntry>>> {
        self.workers.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn get(&self, name: &str) -> Option<WorkerHandle> {
        self.read()
            .iter()
            .find(|w| w.name == name)
            .map(|w| WorkerHandle(Arc::clone(w)))
    }

    pub(crate) fn entry(&self, index: usize) -> Option<Arc<WorkerEntry>> {
        self.read().get(index).cloned()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<WorkerEntry>> {
        self.read().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.read().len()
    }

    pub(crate) fn census(&self) -> Census {
        let mut census = Census::default();
        for worker in self.read().iter() {
            let status = worker.status();
            if status.is_alive() {
                census.alive += 1;
            }
            if status.is_runnable() {
                census.runnable += 1;
            }
            if status == WorkerStatus::TimedWaiting {
                census.timed_waiting += 1;
            }
        }
        census
    }

    pub(crate) fn all_terminated(&self) -> bool {
        self.read().iter().all(|w| w.is_terminated())
    }
}
