use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

/// Error type returned by work functions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkError {
    #[error("{0}")]
    Failed(String),
    /// The item had nothing to do. Reported as completed and counted as skipped.
    #[error("skipped: {0}")]
    Skipped(String),
}

impl WorkError {
    pub fn failed(msg: impl fmt::Display) -> Self {
        Self::Failed(msg.to_string())
    }
}

pub type WorkOutput = Result<Value, WorkError>;

/// Caller-supplied unit of work: consumes an item payload, yields a JSON result.
pub type WorkFn<P> = Arc<dyn Fn(P) -> BoxFuture<'static, WorkOutput> + Send + Sync>;

/// Box an async closure into a [`WorkFn`].
pub fn work_fn<P, F, Fut>(f: F) -> WorkFn<P>
where
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = WorkOutput> + Send + 'static,
{
    Arc::new(move |payload| f(payload).boxed())
}

/// One submitted unit of work. Consumed exactly once by a worker.
pub struct WorkItem<P> {
    id: String,
    name: String,
    payload: P,
    work: WorkFn<P>,
}

impl<P: Send + 'static> WorkItem<P> {
    pub fn new<F, Fut>(id: impl Into<String>, payload: P, f: F) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = WorkOutput> + Send + 'static,
    {
        Self::with_work(id, payload, work_fn(f))
    }

    /// Build an item around an existing (possibly shared) work function.
    pub fn with_work(id: impl Into<String>, payload: P, work: WorkFn<P>) -> Self {
        let id = id.into();
        Self { name: id.clone(), id, payload, work }
    }

    /// One item per payload, all sharing `f`. Ids are `item-0`, `item-1`, ...
    pub fn batch<I, F, Fut>(payloads: I, f: F) -> Vec<Self>
    where
        I: IntoIterator<Item = P>,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = WorkOutput> + Send + 'static,
    {
        let work = work_fn(f);
        payloads
            .into_iter()
            .enumerate()
            .map(|(i, p)| Self::with_work(format!("item-{i}"), p, Arc::clone(&work)))
            .collect()
    }

    /// Override the display name (defaults to the id).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<P> WorkItem<P> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub(crate) fn into_parts(self) -> (String, String, P, WorkFn<P>) {
        (self.id, self.name, self.payload, self.work)
    }
}

impl<P> fmt::Debug for WorkItem<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
