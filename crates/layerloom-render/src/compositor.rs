use layerloom_core::{Color, LayerloomError, LayerloomResult, Mat4};

use crate::geometry::QuadGeometry;
use crate::registry::LayerRegistry;
use crate::shader::ShaderProgram;
use crate::surface::RenderSurface;

/// Draws every registered layer through the shared program onto the quad.
#[derive(Debug, Clone)]
pub struct Compositor {
    background: Color,
    projection: Mat4,
    model_view: Mat4,
}

impl Compositor {
    pub fn new(background: Color) -> Self {
        Self {
            background,
            // Unit square onto the full viewport.
            projection: Mat4::ortho(0.0, 1.0, 0.0, 1.0, 0.0, 1.0),
            model_view: Mat4::identity().translate([0.0, 0.0, 0.0]),
        }
    }

    pub fn background(&self) -> Color {
        self.background
    }

    /// Issue one redraw. Only reads registry state, so repeated calls with
    /// unchanged layers produce the same raster.
    pub fn draw<S: RenderSurface + ?Sized>(
        &self,
        surface: &mut S,
        program: &ShaderProgram,
        geometry: &QuadGeometry,
        registry: &LayerRegistry,
    ) -> LayerloomResult<()> {
        surface.clear(self.background);

        surface.bind_vertex_attrib(
            program.vertex_position(),
            geometry.buffer(),
            QuadGeometry::COMPONENTS,
        );
        surface.use_program(program.id());
        surface.set_uniform_mat4(program.projection(), &self.projection);
        surface.set_uniform_mat4(program.model_view(), &self.model_view);

        for layer in registry.layers() {
            let sampler = program
                .sampler(layer.slot)
                .ok_or_else(|| LayerloomError::MissingShaderInput(format!("img{}", layer.slot)))?;
            let unit = layer.slot as u32;
            registry.bind_for_draw(surface, layer.slot, unit)?;
            surface.set_uniform_sampler(sampler, unit);
        }

        surface.draw_triangle_strip(0, QuadGeometry::VERTEX_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::SoftwareSurface;
    use layerloom_core::FrameBuffer;

    struct Fixture {
        surface: SoftwareSurface,
        program: ShaderProgram,
        geometry: QuadGeometry,
        registry: LayerRegistry,
    }

    fn fixture(layers: usize) -> Fixture {
        let mut surface = SoftwareSurface::new(4, 4).unwrap();
        let sources = surface.stock_shaders();
        let program = ShaderProgram::build(&mut surface, &sources, layers).unwrap();
        let geometry = QuadGeometry::upload(&mut surface).unwrap();
        let registry = LayerRegistry::with_layers(&mut surface, layers, Color::BLUE).unwrap();
        Fixture {
            surface,
            program,
            geometry,
            registry,
        }
    }

    #[test]
    fn test_placeholders_render_before_any_load() {
        let mut f = fixture(2);
        let compositor = Compositor::new(Color::BLACK);
        compositor
            .draw(&mut f.surface, &f.program, &f.geometry, &f.registry)
            .unwrap();
        let frame = f.surface.read_pixels().unwrap();
        assert_eq!(frame.get_pixel(0, 0), Some([0, 0, 255, 255]));
        assert_eq!(frame.get_pixel(3, 3), Some([0, 0, 255, 255]));
    }

    #[test]
    fn test_draw_is_idempotent() {
        let mut f = fixture(2);
        let generation = f.registry.begin_load(0).unwrap();
        let mut sprite = FrameBuffer::solid(2, 2, &Color::RED);
        sprite.set_pixel(1, 1, [0, 0, 0, 0]);
        f.registry
            .apply(&mut f.surface, 0, generation, "sprite", &sprite)
            .unwrap();

        let compositor = Compositor::new(Color::BLACK);
        compositor
            .draw(&mut f.surface, &f.program, &f.geometry, &f.registry)
            .unwrap();
        let first = f.surface.read_pixels().unwrap();
        compositor
            .draw(&mut f.surface, &f.program, &f.geometry, &f.registry)
            .unwrap();
        let second = f.surface.read_pixels().unwrap();
        assert_eq!(first, second);
        assert_eq!(f.surface.stats().draw_calls, 2);
    }

    #[test]
    fn test_program_too_small_for_registry_fails() {
        let mut surface = SoftwareSurface::new(4, 4).unwrap();
        let sources = surface.stock_shaders();
        let program = ShaderProgram::build(&mut surface, &sources, 1).unwrap();
        let geometry = QuadGeometry::upload(&mut surface).unwrap();
        let registry = LayerRegistry::with_layers(&mut surface, 2, Color::BLUE).unwrap();
        let err = Compositor::new(Color::BLACK)
            .draw(&mut surface, &program, &geometry, &registry)
            .unwrap_err();
        assert!(matches!(err, LayerloomError::MissingShaderInput(_)));
    }
}
