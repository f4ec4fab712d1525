//! Dispatch bridge between blocking task threads and one async execution loop.
//!
//! The loop is a current-thread Tokio runtime driven by a dedicated OS thread.
//! Task threads hand it futures through an unbounded command channel and block
//! on a oneshot reply. Every future runs on the loop thread; they interleave
//! only at their await points.
//!
//! ```text
//!  task thread 1 ──┐                       ┌──────────────────────────┐
//!  task thread 2 ──┼── Command::Run(job) ──▶ loop thread (current_thread)│
//!  task thread N ──┘        ◀── oneshot ───│ JoinSet of in-flight jobs │
//!                                          └──────────────────────────┘
//! ```
//!
//! Dispatching never blocks: [`LoopBridge::dispatch`] only enqueues the command
//! and returns a [`Pending`] reply. Waiting is a separate step, so callers can
//! admit work under a lock and wait outside it.

use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc as std_mpsc;
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

enum Command {
    Run(Job),
    Stop,
}

/// Failures of the bridge itself, as opposed to failures of the submitted work.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("execution loop is not accepting work")]
    Closed,

    #[error("unit of work exceeded {0:?}")]
    TimedOut(Duration),

    #[error("unit of work was dropped before it completed")]
    Abandoned,

    #[error("execution loop thread did not exit within {0:?}")]
    JoinTimedOut(Duration),

    #[error("execution loop thread panicked")]
    Panicked,

    #[error("failed to start execution loop: {0}")]
    Spawn(#[source] std::io::Error),
}

/// One execution loop and the thread that drives it.
///
/// `Sync`: any number of threads may dispatch through a shared reference.
pub struct LoopBridge {
    commands: mpsc::UnboundedSender<Command>,
    finished: Mutex<std_mpsc::Receiver<Runtime>>,
    thread: JoinHandle<()>,
    work_timeout: Duration,
}

/// Reply handle for one dispatched unit of work.
#[must_use = "the unit of work runs regardless, but its result is only observed through wait()"]
pub struct Pending<T, E> {
    reply: oneshot::Receiver<Result<T, E>>,
}

impl<T, E> Pending<T, E>
where
    E: From<BridgeError>,
{
    /// Blocks the calling thread until the unit of work finishes.
    ///
    /// Returns the unit's own result, so its error reaches the caller unchanged.
    ///
    /// # Panics
    ///
    /// Panics if called from inside an async runtime.
    pub fn wait(self) -> Result<T, E> {
        self.reply
            .blocking_recv()
            .map_err(|_| E::from(BridgeError::Abandoned))?
    }
}

impl LoopBridge {
    /// Builds the runtime and starts the thread that drives it.
    ///
    /// Every unit of work is cancelled with [`BridgeError::TimedOut`] once it runs
    /// longer than `work_timeout`.
    pub fn spawn(name: &str, work_timeout: Duration) -> Result<Self, BridgeError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .thread_name(name)
            .build()
            .map_err(BridgeError::Spawn)?;

        let (commands, receiver) = mpsc::unbounded_channel();
        let (finished_tx, finished) = std_mpsc::sync_channel(1);

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                runtime.block_on(drive(receiver));
                // Hand the runtime back so disposal can still run on it after join.
                let _ = finished_tx.send(runtime);
            })
            .map_err(BridgeError::Spawn)?;

        debug!("Execution loop '{}' started", name);

        Ok(Self {
            commands,
            finished: Mutex::new(finished),
            thread,
            work_timeout,
        })
    }

    /// Queues a unit of work on the loop without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Closed`] once the loop has stopped receiving.
    pub fn dispatch<Fut, T, E>(&self, work: Fut) -> Result<Pending<T, E>, BridgeError>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<BridgeError> + Send + 'static,
    {
        let (reply_tx, reply) = oneshot::channel();
        let limit = self.work_timeout;

        let job: Job = Box::pin(async move {
            let result = match tokio::time::timeout(limit, work).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Unit of work cancelled after {:?}", limit);
                    Err(E::from(BridgeError::TimedOut(limit)))
                }
            };
            // The caller may have given up waiting; the result is dropped then.
            let _ = reply_tx.send(result);
        });

        self.commands
            .send(Command::Run(job))
            .map_err(|_| BridgeError::Closed)?;

        Ok(Pending { reply })
    }

    /// Dispatches a unit of work and blocks until it finishes.
    pub fn submit<Fut, T, E>(&self, work: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<BridgeError> + Send + 'static,
    {
        self.dispatch(work)?.wait()
    }

    /// Asks the loop to stop after finishing everything already dispatched.
    ///
    /// Work dispatched after this call is never run: it is rejected with
    /// [`BridgeError::Closed`] or its caller sees [`BridgeError::Abandoned`].
    pub fn request_stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    /// Requests a stop and joins the loop thread, waiting at most `join_within`.
    ///
    /// Returns the runtime so a final disposal can run on it before it is closed.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::JoinTimedOut`] if the thread is still running after the bound;
    ///   the thread is left detached
    /// - [`BridgeError::Panicked`] if the loop thread panicked
    pub fn stop(self, join_within: Duration) -> Result<Runtime, BridgeError> {
        self.request_stop();

        let finished = self
            .finished
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);

        match finished.recv_timeout(join_within) {
            Ok(runtime) => {
                self.thread.join().map_err(|_| BridgeError::Panicked)?;
                debug!("Execution loop joined");
                Ok(runtime)
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                error!("Execution loop did not stop within {:?}", join_within);
                Err(BridgeError::JoinTimedOut(join_within))
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                let _ = self.thread.join();
                Err(BridgeError::Panicked)
            }
        }
    }
}

/// Runs dispatched jobs until a stop request, then drains what is in flight.
async fn drive(mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Run(job)) => {
                    in_flight.spawn(job);
                }
                Some(Command::Stop) | None => break,
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!("Unit of work panicked: {}", e);
                }
            }
        }
    }

    // Jobs queued behind the stop request are dropped unrun.
    drop(commands);

    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!("Unit of work panicked: {}", e);
        }
    }

    debug!("Execution loop drained");
}
