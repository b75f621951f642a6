//! Bookmarks worker — hosts the queue consumers and the feed saga.
//!
//! The binary loads a [`config::WorkerConfig`], connects the backends it
//! names and runs one [`bookmarks_events::worker::QueueWorker`] until
//! SIGINT or SIGTERM arrives. [`app`] keeps the wiring separate from the
//! connections so the whole pipeline can be assembled over in-memory
//! backends.

pub mod app;
pub mod config;
pub mod shutdown;
pub mod telemetry;
