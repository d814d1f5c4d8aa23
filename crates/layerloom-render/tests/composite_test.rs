use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use layerloom_core::{Color, FrameBuffer};
use layerloom_render::{
    Compositor, DefaultFetcher, LayerLoader, LayerRegistry, LayerSource, QuadGeometry,
    RenderSurface, ShaderProgram, SoftwareSurface,
};

fn png(width: u32, height: u32, paint: impl Fn(u32, u32) -> [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_fn(width, height, |x, y| image::Rgba(paint(x, y)));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

struct Stage {
    surface: SoftwareSurface,
    program: ShaderProgram,
    geometry: QuadGeometry,
    registry: LayerRegistry,
    compositor: Compositor,
}

impl Stage {
    fn new(size: u32, layers: usize) -> Self {
        let mut surface = SoftwareSurface::new(size, size).unwrap();
        let sources = surface.stock_shaders();
        let program = ShaderProgram::build(&mut surface, &sources, layers).unwrap();
        let geometry = QuadGeometry::upload(&mut surface).unwrap();
        let registry = LayerRegistry::with_layers(&mut surface, layers, Color::BLUE).unwrap();
        Stage {
            surface,
            program,
            geometry,
            registry,
            compositor: Compositor::new(Color::BLACK),
        }
    }

    fn render(&mut self) -> FrameBuffer {
        self.compositor
            .draw(&mut self.surface, &self.program, &self.geometry, &self.registry)
            .unwrap();
        self.surface.read_pixels().unwrap()
    }
}

#[tokio::test]
async fn test_loaded_layers_stack_in_slot_order() {
    let mut stage = Stage::new(4, 2);
    let loader = LayerLoader::new(Arc::new(DefaultFetcher::new()), Duration::from_secs(5));

    // Slot 0 is solid red, slot 1 is green on its left half and clear on the right.
    let bottom = LayerSource::bytes("bottom.png", png(4, 4, |_, _| [255, 0, 0, 255]));
    let top = LayerSource::bytes(
        "top.png",
        png(4, 4, |x, _| if x < 2 { [0, 255, 0, 255] } else { [0, 0, 0, 0] }),
    );

    let g0 = stage.registry.begin_load(0).unwrap();
    let g1 = stage.registry.begin_load(1).unwrap();
    let (first, second) = tokio::join!(loader.load(1, g1, top), loader.load(0, g0, bottom));

    for outcome in [first, second] {
        let image = outcome.result.unwrap();
        assert!(stage
            .registry
            .apply(&mut stage.surface, outcome.slot, outcome.generation, &outcome.source, &image)
            .unwrap());
    }

    let frame = stage.render();
    assert_eq!(frame.get_pixel(0, 0), Some([0, 255, 0, 255]));
    assert_eq!(frame.get_pixel(3, 3), Some([255, 0, 0, 255]));
}

#[test]
fn test_image_rows_are_not_flipped() {
    let mut stage = Stage::new(4, 1);
    let mut image = FrameBuffer::solid(4, 4, &Color::WHITE);
    for x in 0..4 {
        image.set_pixel(x, 0, [255, 0, 0, 255]);
    }
    let generation = stage.registry.begin_load(0).unwrap();
    stage
        .registry
        .apply(&mut stage.surface, 0, generation, "marker", &image)
        .unwrap();

    let frame = stage.render();
    assert_eq!(frame.get_pixel(2, 0), Some([255, 0, 0, 255]));
    assert_eq!(frame.get_pixel(2, 3), Some([255, 255, 255, 255]));
}

#[test]
fn test_unloaded_slot_shows_placeholder_under_loaded_one() {
    let mut stage = Stage::new(4, 2);
    let mut image = FrameBuffer::solid(4, 4, &Color::TRANSPARENT);
    image.set_pixel(0, 0, [255, 255, 255, 255]);
    let generation = stage.registry.begin_load(1).unwrap();
    stage
        .registry
        .apply(&mut stage.surface, 1, generation, "sparse", &image)
        .unwrap();

    let frame = stage.render();
    assert_eq!(frame.get_pixel(0, 0), Some([255, 255, 255, 255]));
    assert_eq!(frame.get_pixel(1, 1), Some([0, 0, 255, 255]));
}
