//! Domain layer: entities, repository contracts and the visit event model.
//!
//! - [`entities`] - Core data structures
//! - [`repositories`] - Data access trait definitions
//! - [`visit_event`] - Queue message model shared by producer and worker
//!
//! # Visit Processing Flow
//!
//! 1. The redirect path resolves a short code
//! 2. A [`visit_event::VisitEvent`] is wrapped in a [`visit_event::TaskMessage`] and enqueued
//! 3. A worker thread dequeues it and blocks on [`crate::worker::WorkerContext::submit`]
//! 4. The visit is persisted via [`repositories::VisitRepository`] on the worker's execution loop

pub mod entities;
pub mod repositories;
pub mod visit_event;
