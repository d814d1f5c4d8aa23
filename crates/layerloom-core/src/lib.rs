//! # layerloom-core
//!
//! Core types and primitives for the Layerloom compositor.
//! This crate contains foundational types shared across all Layerloom crates:
//! raster buffers, colors, matrices, frame naming, configuration, and error types.

pub mod color;
pub mod config;
pub mod error;
pub mod frame;
pub mod math;
pub mod naming;

pub use config::*;

pub use color::Color;
pub use error::{LayerloomError, LayerloomResult};
pub use frame::FrameBuffer;
pub use math::Mat4;
pub use naming::{frame_location, pad_index};

/// Upper bound on compositing slots. Sampler uniforms are named `img0..img6`.
pub const MAX_LAYERS: usize = 7;
