//! AWS-oriented adapters and handlers for page watch execution.
//!
//! This crate owns runtime integration details (Lambda handlers, function
//! invocation, the DynamoDB state store and the HTTP clients for the content
//! API and the integration endpoint) and re-exports the domain crate as
//! `runtime`.

pub mod adapters;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod retry;
pub mod scheduler;

pub use page_watch_core as runtime;
