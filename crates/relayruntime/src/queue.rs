//! Bounded job queue feeding executions to the runtime.

use crate::{Runtime, TriggerInput};
use relaycore::{EngineError, Execution, ExecutionId};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One delivery of an execution to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    pub execution_id: ExecutionId,
}

pub struct JobQueue {
    runtime: Runtime,
    sender: mpsc::Sender<Job>,
    worker: JoinHandle<()>,
}

impl JobQueue {
    /// Start the worker. Capacity and concurrency come from the runtime's config.
    pub fn start(runtime: Runtime) -> Self {
        let (sender, receiver) = mpsc::channel(runtime.config().queue_capacity.max(1));
        let worker = tokio::spawn(work(runtime.clone(), receiver));
        Self {
            runtime,
            sender,
            worker,
        }
    }

    /// Submit a trigger and queue its execution.
    pub async fn enqueue(&self, trigger: TriggerInput) -> Result<Execution, EngineError> {
        let execution = self.runtime.submit(trigger).await?;
        self.deliver(execution.id()).await?;
        Ok(execution)
    }

    /// Queue an already submitted execution. Redelivering an execution that
    /// is running or finished is harmless: the worker rejects it.
    pub async fn deliver(&self, execution_id: ExecutionId) -> Result<(), EngineError> {
        self.sender
            .send(Job { execution_id })
            .await
            .map_err(|_| EngineError::QueueClosed)
    }

    /// Stop accepting jobs and wait for queued and in-flight runs to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(err) = self.worker.await {
            error!(error = %err, "Job queue worker stopped abnormally");
        }
    }
}

async fn work(runtime: Runtime, mut receiver: mpsc::Receiver<Job>) {
    let max_runs = runtime.config().max_concurrent_runs.max(1);
    let permits = Arc::new(Semaphore::new(max_runs));

    while let Some(job) = receiver.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let runtime = runtime.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match runtime.run(job.execution_id).await {
                Ok(execution) => {
                    debug!(execution_id = %job.execution_id, status = %execution.status(), "Job done")
                }
                Err(EngineError::Transition(err)) => {
                    warn!(execution_id = %job.execution_id, error = %err, "Dropped duplicate job")
                }
                Err(err) => error!(execution_id = %job.execution_id, error = %err, "Job failed"),
            }
        });
    }

    // Wait for in-flight runs by taking every permit back.
    let _ = permits.acquire_many(max_runs as u32).await;
    info!("Job queue drained");
}
