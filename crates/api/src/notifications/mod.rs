//! Completion notification pipeline.
//!
//! The [`CompletionListener`] consumes completion events from the event bus
//! and delivers them to interested live connections.

pub mod listener;

pub use listener::{
    CompletionListener, DispatchOutcome, ListenerError, ListenerHandle, ListenerStatus,
};
