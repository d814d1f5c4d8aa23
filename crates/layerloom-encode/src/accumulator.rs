use async_trait::async_trait;

use layerloom_core::{FrameBuffer, LayerloomResult};

use crate::artifact::Artifact;

/// Collects captured frames in order and turns them into an [`Artifact`].
#[async_trait]
pub trait FrameAccumulator: Send {
    /// Append one capture. Frames keep the order they were added in.
    fn add_frame(&mut self, frame: FrameBuffer) -> LayerloomResult<()>;

    fn frame_count(&self) -> usize;

    /// Drop every capture added so far.
    fn clear(&mut self);

    /// Encode everything added so far. The accumulator is empty afterwards.
    async fn finish(&mut self) -> LayerloomResult<Artifact>;
}
