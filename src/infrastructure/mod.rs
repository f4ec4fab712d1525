//! Infrastructure layer for external integrations.
//!
//! - [`persistence`] - PostgreSQL repository implementations and pool setup
//! - [`queue`] - Broker implementations (Redis and in-process)

pub mod persistence;
pub mod queue;
