//! Per-process worker context: database engine, execution loop and loop thread.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{error, info};

use super::bridge::LoopBridge;
use crate::config::WorkerConfig;
use crate::domain::repositories::VisitRepository;
use crate::error::{LifecycleError, PersistenceError, TaskError};

const LOOP_THREAD_NAME: &str = "visit-loop";

/// Lifecycle of a [`WorkerContext`].
///
/// `Uninitialized → Running → ShuttingDown → Stopped`. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Running => "running",
            Self::ShuttingDown => "shutting down",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// The async resources a worker process owns while running.
///
/// Installed and removed as one value, so task code sees all of them or none.
struct Resources {
    engine: Arc<dyn VisitRepository>,
    bridge: LoopBridge,
}

struct Inner {
    state: LifecycleState,
    starting: bool,
    resources: Option<Resources>,
}

/// Async resources of one worker process, with their lifecycle.
///
/// Created once per process and passed by reference into every task
/// invocation. [`Self::start`] is the process-start hook and [`Self::stop`] the
/// process-stop hook; [`Self::submit`] only admits work in between.
///
/// Admission and the stop request are serialized by one lock: a unit of work
/// is either dispatched before the loop is told to stop (and then completes
/// before the pool is disposed) or rejected with
/// [`LifecycleError::NotRunning`].
pub struct WorkerContext {
    inner: Mutex<Inner>,
    persist_timeout: Duration,
    shutdown_timeout: Duration,
}

impl WorkerContext {
    /// Creates an uninitialized context.
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: LifecycleState::Uninitialized,
                starting: false,
                resources: None,
            }),
            persist_timeout: config.persist_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> LifecycleState {
        self.lock().state
    }

    /// Starts the execution loop and builds the database engine on it.
    ///
    /// `connect` runs on the loop, so the pool it creates is bound to that loop.
    /// On failure the loop is torn down again and the context stays
    /// uninitialized.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::AlreadyStarted`] unless the context is uninitialized
    /// - [`LifecycleError::EngineFailed`] if `connect` fails
    /// - [`LifecycleError::Loop`] if the loop thread cannot be started
    pub fn start<C, Fut>(&self, connect: C) -> Result<(), LifecycleError>
    where
        C: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Arc<dyn VisitRepository>, PersistenceError>> + Send + 'static,
    {
        {
            let mut inner = self.lock();
            if inner.state != LifecycleState::Uninitialized || inner.starting {
                return Err(LifecycleError::AlreadyStarted(inner.state));
            }
            inner.starting = true;
        }

        let built = self.build(connect);

        let mut inner = self.lock();
        inner.starting = false;
        inner.resources = Some(built?);
        inner.state = LifecycleState::Running;

        info!("Worker context running");
        Ok(())
    }

    fn build<C, Fut>(&self, connect: C) -> Result<Resources, LifecycleError>
    where
        C: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Arc<dyn VisitRepository>, PersistenceError>> + Send + 'static,
    {
        let bridge = LoopBridge::spawn(LOOP_THREAD_NAME, self.persist_timeout)?;

        let engine = bridge.submit(async move { connect().await.map_err(LifecycleError::EngineFailed) });

        match engine {
            Ok(engine) => Ok(Resources { engine, bridge }),
            Err(e) => {
                error!("Worker context failed to start: {}", e);
                if let Ok(runtime) = bridge.stop(self.shutdown_timeout) {
                    runtime.shutdown_timeout(self.shutdown_timeout);
                }
                Err(e)
            }
        }
    }

    /// Runs async work against the engine on the execution loop and blocks the
    /// calling thread until it finishes.
    ///
    /// Safe to call from many task threads at once. The work's own error is
    /// returned unchanged.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NotRunning`] (wrapped in [`TaskError::Lifecycle`]) unless running
    /// - [`TaskError::TimedOut`] if the work exceeds the persist timeout
    ///
    /// # Panics
    ///
    /// Panics if called from inside an async runtime.
    pub fn submit<F, Fut, T>(&self, work: F) -> Result<T, TaskError>
    where
        F: FnOnce(Arc<dyn VisitRepository>) -> Fut,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
        T: Send + 'static,
    {
        let pending = {
            let inner = self.lock();
            let resources = match (&inner.resources, inner.state) {
                (Some(resources), LifecycleState::Running) => resources,
                (_, state) => return Err(LifecycleError::NotRunning(state).into()),
            };
            resources.bridge.dispatch(work(resources.engine.clone()))?
        };

        pending.wait()
    }

    /// Stops admitting work, drains the loop, joins its thread, disposes the
    /// pool and closes the loop.
    ///
    /// If the loop thread cannot be joined within the shutdown timeout the
    /// context stays `ShuttingDown` and the error must be treated as fatal for
    /// the process.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NotStoppable`] unless running
    /// - [`LifecycleError::Loop`] if the loop thread cannot be joined in time
    ///
    /// # Panics
    ///
    /// Panics if called from inside an async runtime.
    pub fn stop(&self) -> Result<(), LifecycleError> {
        let resources = {
            let mut inner = self.lock();
            if inner.state != LifecycleState::Running {
                return Err(LifecycleError::NotStoppable(inner.state));
            }
            inner.state = LifecycleState::ShuttingDown;
            let Some(resources) = inner.resources.take() else {
                inner.state = LifecycleState::Stopped;
                return Ok(());
            };
            resources.bridge.request_stop();
            resources
        };
        info!("Worker context shutting down");

        let Resources { engine, bridge } = resources;
        let runtime = bridge.stop(self.shutdown_timeout)?;

        runtime.block_on(engine.close());
        drop(engine);
        runtime.shutdown_timeout(self.shutdown_timeout);

        self.lock().state = LifecycleState::Stopped;
        info!("Worker context stopped");
        Ok(())
    }
}
