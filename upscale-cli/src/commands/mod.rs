//! CLI subcommand implementations.

pub mod image;
pub mod queue;
pub mod simd;
pub mod worker;

pub use image::CmdImage;
pub use queue::{CmdEnqueue, CmdStatus};
pub use simd::CmdSimd;
pub use worker::CmdWorker;
