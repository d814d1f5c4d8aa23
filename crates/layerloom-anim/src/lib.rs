//! # layerloom-anim
//!
//! Drives timed export runs. A [`Session`] owns the compositing pipeline; the
//! [`AnimationDriver`] walks an [`AnimationSequence`], loads one image per layer
//! for each frame, waits on the [`FrameSynchronizer`] and captures each
//! composite into a frame accumulator.

pub mod driver;
pub mod sequence;
pub mod session;
pub mod sync;

pub use driver::{AnimationDriver, DriverEvent, ExportSummary};
pub use sequence::{AnimationSequence, FrameRequest};
pub use session::{DriverState, RunGuard, Session};
pub use sync::{FrameSynchronizer, SyncState, SyncTransition};
