//! Application layer services implementing business logic.
//!
//! Services consume repository and broker traits and provide a small API for
//! HTTP handlers and worker tasks.
//!
//! # Available Services
//!
//! - [`services::redirect_service::RedirectService`] - Short code resolution and visit handoff
//! - [`services::visit_service::VisitService`] - Visit persistence inside a worker

pub mod services;
