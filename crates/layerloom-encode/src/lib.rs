//! # layerloom-encode
//!
//! Encoding module: turns captured composites into the exported animated GIF.
//! Frames are palettized per frame (exact palette when a frame has few colors,
//! NeuQuant otherwise), error-diffused with the configured kernel and written
//! through the `gif` crate.

pub mod accumulator;
pub mod artifact;
pub mod dither;
pub mod gif_encoder;
pub mod options;

pub use accumulator::FrameAccumulator;
pub use artifact::{Artifact, ArtifactInfo, ArtifactSink, FileSink};
pub use gif_encoder::{encode_gif, GifAccumulator};
pub use options::EncoderOptions;
