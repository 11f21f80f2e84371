//! service-core: Shared infrastructure for the invoicing workspace.
pub mod config;
pub mod error;
pub mod observability;

pub use axum;
pub use tracing;
pub use validator;
