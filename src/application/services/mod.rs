//! Business logic services for the application layer.

pub mod redirect_service;
pub mod visit_service;

pub use redirect_service::{RedirectService, Resolution};
pub use visit_service::VisitService;
