//! Docflow API server library.
//!
//! The front end of the pipeline: job submission and polling over HTTP, the
//! live notification channel, the correlation registry and the completion
//! listener. Exposed as a library so integration tests and the binary
//! entrypoint share the same building blocks.

pub mod config;
pub mod correlation;
pub mod error;
pub mod handlers;
pub mod notifications;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
