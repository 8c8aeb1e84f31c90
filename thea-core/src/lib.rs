//! Core library for the Thea media-processing server.
//!
//! Two cooperating cores live here: the ingest pipeline, which turns files
//! arriving in a watched directory into persisted media entities, and the
//! transcode scheduler, which reacts to newly ingested media and drives
//! external transcoder processes under a global thread budget. They share an
//! in-process event bus and a durable store reached through port traits.

pub mod error;
pub mod events;
pub mod ingest;
pub mod store;
pub mod transcode;
pub mod trouble;
pub mod workers;
pub mod workflow;

pub use error::{CoreError, Result};
pub use events::{Event, EventBus, EventKind};
pub use trouble::{Resolution, ResolutionContext, ResolutionMethod, Trouble};
