//! The rendering context the compositor drives.
//!
//! A [`RenderSurface`] is an opaque capability object: it owns the GPU (or CPU)
//! resources and hands out typed handles. The pipeline never inspects what is
//! behind a handle.

use std::fmt;

use layerloom_core::{Color, FrameBuffer, LayerloomResult, Mat4};

/// Vertex attribute carrying the quad corner position.
pub const POSITION_ATTRIBUTE: &str = "aVertexPosition";
/// Projection matrix uniform.
pub const PROJECTION_UNIFORM: &str = "uProjectionMatrix";
/// Model-view matrix uniform.
pub const MODEL_VIEW_UNIFORM: &str = "uModelViewMatrix";

/// Sampler uniform name for a layer slot: `img0`, `img1`, ...
pub fn sampler_name(slot: usize) -> String {
    format!("img{}", slot)
}

/// Parse a sampler uniform name back into its slot.
pub fn sampler_slot(name: &str) -> Option<usize> {
    name.strip_prefix("img")?.parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttribLocation(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => write!(f, "vertex"),
            ShaderStage::Fragment => write!(f, "fragment"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wrap {
    ClampToEdge,
    Repeat,
}

/// Texture sampling parameters, fixed at upload time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sampling {
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub wrap_s: Wrap,
    pub wrap_t: Wrap,
}

impl Sampling {
    /// Nearest-neighbour, edge-clamped. Layers are small stylized sprites.
    pub const PIXEL_ART: Sampling = Sampling {
        min_filter: Filter::Nearest,
        mag_filter: Filter::Nearest,
        wrap_s: Wrap::ClampToEdge,
        wrap_t: Wrap::ClampToEdge,
    };
}

impl Default for Sampling {
    fn default() -> Self {
        Sampling::PIXEL_ART
    }
}

/// Source text for both stages of a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSources {
    pub vertex: String,
    pub fragment: String,
}

/// Operations the compositor needs from a rendering context.
///
/// Handles returned by one surface are only meaningful to that surface.
pub trait RenderSurface {
    /// Viewport size in pixels.
    fn size(&self) -> (u32, u32);

    /// Shader sources written for this surface's shading language.
    fn stock_shaders(&self) -> ShaderSources;

    /// Upload static vertex data.
    fn create_buffer(&mut self, data: &[f32]) -> LayerloomResult<BufferId>;

    /// Allocate an empty texture. It must receive pixels before it is sampled.
    fn create_texture(&mut self) -> LayerloomResult<TextureId>;

    /// Replace a texture's pixel store in place. The handle stays valid.
    fn upload_texture(
        &mut self,
        texture: TextureId,
        image: &FrameBuffer,
        sampling: Sampling,
    ) -> LayerloomResult<()>;

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> LayerloomResult<ShaderId>;

    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> LayerloomResult<ProgramId>;

    fn attrib_location(&self, program: ProgramId, name: &str) -> Option<AttribLocation>;

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    fn clear(&mut self, color: Color);

    fn use_program(&mut self, program: ProgramId);

    /// Feed `components` floats per vertex from `buffer` into `location`.
    fn bind_vertex_attrib(&mut self, location: AttribLocation, buffer: BufferId, components: u32);

    fn set_uniform_mat4(&mut self, location: UniformLocation, value: &Mat4);

    /// Point a sampler uniform at a texture unit.
    fn set_uniform_sampler(&mut self, location: UniformLocation, unit: u32);

    /// Bind a texture to a texture unit.
    fn bind_texture(&mut self, unit: u32, texture: TextureId);

    fn draw_triangle_strip(&mut self, first: u32, count: u32) -> LayerloomResult<()>;

    /// Snapshot the current contents of the render target, rows top-down.
    fn read_pixels(&mut self) -> LayerloomResult<FrameBuffer>;
}
