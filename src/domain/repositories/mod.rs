//! Repository trait definitions for the domain layer.
//!
//! Traits define the data-access contract; implementations live in
//! `crate::infrastructure::persistence`, and mocks are generated via `mockall`.
//!
//! - [`ShortUrlRepository`] - Short link lookups (redirect path)
//! - [`VisitRepository`] - Visit inserts and counts (worker path)

pub mod short_url_repository;
pub mod visit_repository;

pub use short_url_repository::ShortUrlRepository;
pub use visit_repository::VisitRepository;

#[cfg(test)]
pub use short_url_repository::MockShortUrlRepository;
#[cfg(test)]
pub use visit_repository::MockVisitRepository;
