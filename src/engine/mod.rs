//! Engine module housing the stream orchestrator.
//!
//! `core` owns the retrieval state machine; its subscription and stream
//! adapters live in `core_subscriptions`.

pub mod core;

pub use core::{DisplaySnapshot, FetchStatus, RetrievalMode, StreamOrchestrator};
