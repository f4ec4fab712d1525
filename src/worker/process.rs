//! Process start and stop hooks for a worker process.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use super::context::{LifecycleState, WorkerContext};
use super::runner::{RunnerOptions, TaskRunner};
use super::tasks::TaskOptions;
use crate::config::WorkerConfig;
use crate::domain::repositories::VisitRepository;
use crate::error::{LifecycleError, PersistenceError};
use crate::infrastructure::queue::TaskConsumer;

/// A running worker process: its context plus the task threads feeding it.
///
/// [`Self::start`] runs once when the process comes up, before any task is
/// consumed. [`Self::stop`] runs once when the supervisor stops the process.
pub struct WorkerProcess {
    context: Arc<WorkerContext>,
    runner: TaskRunner,
}

impl WorkerProcess {
    /// Starts the worker context, then one task thread per consumer.
    ///
    /// # Errors
    ///
    /// Returns an error if the context fails to start (for example, the database
    /// is unreachable) or a task thread cannot be spawned. Nothing is left
    /// running in either case.
    pub fn start<C, F, Fut>(
        config: &WorkerConfig,
        connect: F,
        consumers: Vec<C>,
    ) -> anyhow::Result<Self>
    where
        C: TaskConsumer + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Arc<dyn VisitRepository>, PersistenceError>> + Send + 'static,
    {
        let context = Arc::new(WorkerContext::new(config));
        context
            .start(connect)
            .context("Failed to start worker context")?;

        let options = RunnerOptions {
            poll_interval: config.poll_interval(),
            task: TaskOptions {
                deduplicate: config.deduplicate,
            },
        };

        let runner = match TaskRunner::spawn(context.clone(), consumers, options) {
            Ok(runner) => runner,
            Err(e) => {
                context.stop()?;
                return Err(e).context("Failed to spawn task threads");
            }
        };

        info!("Worker process started");
        Ok(Self { context, runner })
    }

    pub fn context(&self) -> &Arc<WorkerContext> {
        &self.context
    }

    pub fn state(&self) -> LifecycleState {
        self.context.state()
    }

    /// Stops consuming, then stops the worker context.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Loop`] if the execution loop could not be
    /// joined in time; the process should exit with a failure status then.
    pub fn stop(self) -> Result<(), LifecycleError> {
        self.runner.shutdown();
        self.context.stop()?;
        info!("Worker process stopped");
        Ok(())
    }
}
