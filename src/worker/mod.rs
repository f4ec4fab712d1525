//! Visit worker: consumes visit events from the broker and persists them.
//!
//! # Threading Model
//!
//! A worker process runs N task threads ([`runner`]) and one execution loop
//! ([`bridge`]). Task threads block on the broker and on
//! [`WorkerContext::submit`]; all database I/O runs on the loop thread, against
//! one connection pool owned by the process.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized --start--> Running --stop--> ShuttingDown --> Stopped
//! ```
//!
//! [`WorkerProcess`] wires the process start and stop hooks to the context and
//! the task threads.

pub mod bridge;
pub mod context;
pub mod process;
pub mod runner;
pub mod tasks;

pub use context::{LifecycleState, WorkerContext};
pub use process::WorkerProcess;
pub use runner::{RunnerOptions, TaskRunner};
pub use tasks::{TaskOptions, TaskOutcome};
