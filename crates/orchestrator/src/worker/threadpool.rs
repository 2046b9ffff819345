//! The default in-process dispatch backend: a bounded pool of tokio tasks,
//! one permit per concurrently running process.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::engine::Engine;
use crate::persistence::ProcessStore;

use super::dispatch::{Dispatch, DispatchError, WorkerStatus};

/// Dispatches directly into the calling process via a `tokio::spawn`,
/// bounded to `max_workers` concurrent runs. When `testing` is set the
/// dispatch awaits the run inline instead of spawning, so a test can
/// observe the outcome without a synchronization point of its own.
pub struct ThreadPoolExecutor<S: ProcessStore> {
    engine: Arc<Engine<S>>,
    semaphore: Arc<Semaphore>,
    max_workers: usize,
    running: Arc<AtomicUsize>,
    queued: Arc<AtomicUsize>,
    testing: bool,
}

impl<S: ProcessStore> ThreadPoolExecutor<S> {
    pub fn new(engine: Arc<Engine<S>>, max_workers: usize, testing: bool) -> Self {
        ThreadPoolExecutor {
            engine,
            semaphore: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            running: Arc::new(AtomicUsize::new(0)),
            queued: Arc::new(AtomicUsize::new(0)),
            testing,
        }
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            executor_type: "threadpool".to_string(),
            number_of_workers_online: self.max_workers,
            number_of_queued_jobs: self.queued.load(Ordering::Relaxed),
            number_of_running_jobs: self.running.load(Ordering::Relaxed),
        }
    }

    async fn run<F>(&self, job: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.queued.fetch_add(1, Ordering::Relaxed);
        let semaphore = self.semaphore.clone();
        let running = self.running.clone();
        let queued = self.queued.clone();

        let task = async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            queued.fetch_sub(1, Ordering::Relaxed);
            running.fetch_add(1, Ordering::Relaxed);
            job.await;
            running.fetch_sub(1, Ordering::Relaxed);
        };

        if self.testing {
            task.await;
        } else {
            tokio::spawn(task);
        }
    }
}

#[async_trait]
impl<S: ProcessStore> Dispatch for ThreadPoolExecutor<S> {
    #[instrument(skip(self))]
    async fn start(&self, process_id: Uuid, user: String) -> Result<(), DispatchError> {
        let engine = self.engine.clone();
        self.run(async move {
            if let Err(e) = engine.run_started(process_id, user).await {
                error!(%process_id, error = %e, "process run failed");
            }
        })
        .await;
        Ok(())
    }

    #[instrument(skip(self, resume_inputs))]
    async fn resume(&self, process_id: Uuid, user: String, resume_inputs: Vec<Value>) -> Result<(), DispatchError> {
        let engine = self.engine.clone();
        self.run(async move {
            if let Err(e) = engine.run_resumed(process_id, user, resume_inputs).await {
                error!(%process_id, error = %e, "process resume failed");
            }
        })
        .await;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn abort(&self, process_id: Uuid, user: String) -> Result<(), DispatchError> {
        let engine = self.engine.clone();
        self.run(async move {
            if let Err(e) = engine.run_aborted(process_id, user).await {
                error!(%process_id, error = %e, "process abort failed");
            }
        })
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::WorkflowRegistry;
    use crate::persistence::InMemoryProcessStore;
    use crate::workflow::{done, init, step, Target, Workflow};

    #[tokio::test]
    async fn synchronous_mode_runs_the_process_before_returning() {
        let store = Arc::new(InMemoryProcessStore::new());
        let mut registry = WorkflowRegistry::new();
        registry.register(Workflow::new(
            "noop",
            Target::Create,
            "test",
            None,
            init() >> step("only", &[], |_| Ok(None)) >> done(),
        ));
        let engine = Arc::new(Engine::new(store.clone(), registry));
        let executor = ThreadPoolExecutor::new(engine.clone(), 2, true);

        let process_id = Uuid::new_v4();
        crate::engine::create_process(&*store, process_id, "noop", false, "john.doe")
            .await
            .unwrap();

        executor.start(process_id, "john.doe".to_string()).await.unwrap();

        let row = store.get_process(process_id).await.unwrap();
        assert_eq!(row.last_status, crate::workflow::ProcessStatus::Completed);
    }
}
