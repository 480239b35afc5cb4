//! Declaring a multi-threaded test subject.

use lockstep::Worker;

/// A worker method of a subject: runs on its own thread with shared access
/// to the subject.
pub type ThreadMethod<T> = fn(&T, &Worker) -> anyhow::Result<()>;

/// One worker declared by a [`MultiThreadedTest`].
///
/// The worker is named after its method unless [`Threaded::named`] gives it
/// an explicit name.
pub struct Threaded<T> {
    method: &'static str,
    name: Option<String>,
    body: ThreadMethod<T>,
}

impl<T> Threaded<T> {
    pub fn new(method: &'static str, body: ThreadMethod<T>) -> Self {
        Self {
            method,
            name: None,
            body,
        }
    }

    /// Overrides the worker name. An empty name keeps the method name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.name = (!name.is_empty()).then_some(name);
        self
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn worker_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.method)
    }

    pub(crate) fn body(&self) -> ThreadMethod<T> {
        self.body
    }
}

impl<T> Clone for Threaded<T> {
    fn clone(&self) -> Self {
        Self {
            method: self.method,
            name: self.name.clone(),
            body: self.body,
        }
    }
}

impl<T> std::fmt::Debug for Threaded<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Threaded")
            .field("method", &self.method)
            .field("name", &self.worker_name())
            .finish_non_exhaustive()
    }
}

/// A subject whose worker methods run concurrently under a conductor.
///
/// ```no_run
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use lockstep::Worker;
/// use lockstep_harness::{MultiThreadedTest, Threaded};
///
/// #[derive(Default)]
/// struct Counter {
///     hits: AtomicUsize,
/// }
///
/// impl Counter {
///     fn first(&self, _: &Worker) -> anyhow::Result<()> {
///         self.hits.fetch_add(1, Ordering::SeqCst);
///         Ok(())
///     }
///
///     fn second(&self, w: &Worker) -> anyhow::Result<()> {
///         w.wait_for_beat(1)?;
///         self.hits.fetch_add(1, Ordering::SeqCst);
///         Ok(())
///     }
/// }
///
/// impl MultiThreadedTest for Counter {
///     fn threads() -> Vec<Threaded<Self>> {
///         vec![
///             Threaded::new("first", Self::first),
///             Threaded::new("second", Self::second),
///         ]
///     }
///
///     fn finish(&self) -> anyhow::Result<()> {
///         anyhow::ensure!(self.hits.load(Ordering::SeqCst) == 2);
///         Ok(())
///     }
/// }
/// ```
pub trait MultiThreadedTest: Send + Sync + Sized + 'static {
    /// The worker methods to run, in registration order.
    fn threads() -> Vec<Threaded<Self>>;

    /// Checked once after every repetition has been conducted.
    fn finish(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
