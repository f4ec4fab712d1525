//! Core domain entities.
//!
//! - [`ShortUrl`] - A short code mapped to an original URL (read-only here)
//! - [`Visit`] - A persisted redirect, with [`NewVisit`] as its insert form

pub mod short_url;
pub mod visit;

pub use short_url::ShortUrl;
pub use visit::{NewVisit, Visit};
