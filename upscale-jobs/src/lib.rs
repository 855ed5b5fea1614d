//! Upscale job queue and video workflow.
//!
//! Jobs move through `Queued -> Processing -> Ready`, or to `Failed` once an
//! error proves terminal or the retry budget runs out.
//!
//! # Architecture
//!
//! - **Repositories**: job, model and video metadata behind async traits,
//!   with an in-memory implementation seeded from JSON snapshots
//! - **Blob store**: source media and output keyed by relative paths
//! - **Frame tool**: external decoder/encoder that splits a video into
//!   frames and muxes upscaled frames back
//! - **Coordinator**: claims one job per tick, upscales every frame in
//!   temporal order and publishes a `StreamAdded` event on success
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use upscale_jobs::{
//!     Collaborators, CoordinatorConfig, FfmpegFrameTool, FsBlobStore, MemoryStore,
//!     UpscaleCoordinator,
//! };
//! use upscale_neural::ResampleLoader;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(MemoryStore::new());
//!     let coordinator = UpscaleCoordinator::new(
//!         CoordinatorConfig::default(),
//!         Collaborators::from_store(
//!             store,
//!             Arc::new(FsBlobStore::new("/srv/media")),
//!             Arc::new(FfmpegFrameTool::new()),
//!             Arc::new(ResampleLoader::default()),
//!         ),
//!     );
//!
//!     let mut events = coordinator.subscribe();
//!     coordinator.run_until_idle().await.unwrap();
//!     while let Ok(event) = events.try_recv() {
//!         println!("{:?}", event);
//!     }
//! }
//! ```
//!
//! # Failure handling
//!
//! The coordinator is the only error boundary:
//!
//! - **Retryable** (missing source, storage, frame tool, I/O): the job goes
//!   back to `Queued` with `retry_count` incremented
//! - **Terminal** (unsupported precision, dimension mismatch, invalid model):
//!   the job is marked `Failed` at once
//!
//! A running job renews its claim while it works. Results are written back
//! only under the claim they were produced with, so a run whose claim went
//! stale and was taken over stops and records nothing.

pub mod blob;
pub mod coordinator;
pub mod error;
pub mod frames;
pub mod job;
pub mod store;

pub use blob::{BlobStore, FsBlobStore};
pub use coordinator::{
    Collaborators, CoordinatorConfig, CoordinatorEvent, JobOutcome, UpscaleCoordinator,
};
pub use error::{JobError, Result};
pub use frames::{frame_file_name, list_frames, FfmpegFrameTool, FrameTool, VideoProbe, FRAME_PATTERN};
pub use job::{
    resolution_label, JobStatus, ModelRecord, StreamDescriptor, UpscaleJob, VideoRecord,
    DEFAULT_MAX_RETRIES,
};
pub use store::{
    JobRepository, MemoryStore, ModelRepository, QueueSnapshot, QueueStats, VideoRepository,
};
