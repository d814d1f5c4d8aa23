//! # layerloom-render
//!
//! The Layerloom rendering side. Layer images are decoded into textures held by a
//! fixed-size registry and composited through one shared shader program onto a
//! full-canvas quad.
//!
//! Rendering goes through the [`RenderSurface`] capability trait. Two surfaces
//! ship with the crate: a deterministic CPU rasterizer ([`SoftwareSurface`]) and,
//! behind the `gpu` feature, a headless wgpu device ([`GpuSurface`]).

pub mod compositor;
pub mod geometry;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod loader;
pub mod registry;
pub mod shader;
pub mod software;
pub mod surface;

pub use compositor::Compositor;
pub use geometry::QuadGeometry;
#[cfg(feature = "gpu")]
pub use gpu::GpuSurface;
pub use loader::{
    decode_image, DefaultFetcher, LayerLoader, LayerSource, LoadOutcome, LoadTask, SourceFetcher,
};
pub use registry::{Layer, LayerRegistry};
pub use shader::ShaderProgram;
pub use software::SoftwareSurface;
pub use surface::{
    AttribLocation, BufferId, Filter, ProgramId, RenderSurface, Sampling, ShaderId,
    ShaderSources, ShaderStage, TextureId, UniformLocation, Wrap,
};
