use layerloom_core::LayerloomResult;

use crate::surface::{BufferId, RenderSurface};

/// Unit-square corners in triangle-strip order: top-left, top-right,
/// bottom-left, bottom-right.
pub const QUAD_POSITIONS: [f32; 8] = [
    0.0, 1.0, //
    1.0, 1.0, //
    0.0, 0.0, //
    1.0, 0.0,
];

/// The static full-canvas quad, uploaded once.
#[derive(Debug, Clone, Copy)]
pub struct QuadGeometry {
    buffer: BufferId,
}

impl QuadGeometry {
    pub const COMPONENTS: u32 = 2;
    pub const VERTEX_COUNT: u32 = 4;

    pub fn upload<S: RenderSurface + ?Sized>(surface: &mut S) -> LayerloomResult<Self> {
        let buffer = surface.create_buffer(&QUAD_POSITIONS)?;
        Ok(Self { buffer })
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }
}
