//! CPU implementation of [`RenderSurface`].
//!
//! Shader stages are checked for an entry point and scanned for their
//! `attribute`/`uniform` declarations, which become the program interface. The
//! shader bodies are not interpreted: every draw runs the stock layer routine,
//! which samples each declared `imgN` sampler in slot order and composites the
//! samples over a transparent fragment.

use std::collections::HashMap;

use layerloom_core::{Color, FrameBuffer, LayerloomError, LayerloomResult, Mat4};

use crate::surface::{
    sampler_slot, AttribLocation, BufferId, Filter, ProgramId, RenderSurface, Sampling, ShaderId,
    ShaderSources, ShaderStage, TextureId, UniformLocation, Wrap, MODEL_VIEW_UNIFORM,
    PROJECTION_UNIFORM,
};

const TEXTURE_UNITS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UniformKind {
    Mat4,
    Sampler,
    Other,
}

impl UniformKind {
    fn from_type(ty: &str) -> Self {
        match ty {
            "mat4" => UniformKind::Mat4,
            "sampler2D" => UniformKind::Sampler,
            _ => UniformKind::Other,
        }
    }
}

struct SoftShader {
    stage: ShaderStage,
    attributes: Vec<String>,
    uniforms: Vec<(String, UniformKind)>,
}

struct SoftProgram {
    attributes: Vec<String>,
    uniforms: Vec<(String, UniformKind)>,
    matrices: HashMap<u32, Mat4>,
    samplers: HashMap<u32, u32>,
}

impl SoftProgram {
    fn matrix(&self, name: &str) -> Mat4 {
        self.uniforms
            .iter()
            .position(|(n, _)| n == name)
            .and_then(|loc| self.matrices.get(&(loc as u32)))
            .copied()
            .unwrap_or(Mat4::IDENTITY)
    }
}

struct SoftTexture {
    image: Option<FrameBuffer>,
    sampling: Sampling,
}

/// Counters for work done by a [`SoftwareSurface`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SurfaceStats {
    pub clears: u64,
    pub draw_calls: u64,
    pub texture_uploads: u64,
}

/// Deterministic CPU rasterizer with an RGBA8 render target.
pub struct SoftwareSurface {
    target: FrameBuffer,
    buffers: Vec<Vec<f32>>,
    textures: Vec<SoftTexture>,
    shaders: Vec<SoftShader>,
    programs: Vec<SoftProgram>,
    current_program: Option<ProgramId>,
    vertex_input: Option<(AttribLocation, BufferId, u32)>,
    units: [Option<TextureId>; TEXTURE_UNITS],
    stats: SurfaceStats,
}

impl SoftwareSurface {
    pub fn new(width: u32, height: u32) -> LayerloomResult<Self> {
        if width == 0 || height == 0 {
            return Err(LayerloomError::SurfaceUnavailable(format!(
                "cannot create a {}x{} render target",
                width, height
            )));
        }
        Ok(Self {
            target: FrameBuffer::new(width, height),
            buffers: Vec::new(),
            textures: Vec::new(),
            shaders: Vec::new(),
            programs: Vec::new(),
            current_program: None,
            vertex_input: None,
            units: [None; TEXTURE_UNITS],
            stats: SurfaceStats::default(),
        })
    }

    pub fn stats(&self) -> SurfaceStats {
        self.stats
    }

    fn program_mut(&mut self) -> Option<&mut SoftProgram> {
        let id = self.current_program?;
        self.programs.get_mut(id.0 as usize)
    }
}

impl RenderSurface for SoftwareSurface {
    fn size(&self) -> (u32, u32) {
        (self.target.width, self.target.height)
    }

    fn stock_shaders(&self) -> ShaderSources {
        ShaderSources {
            vertex: include_str!("shaders/composite.vert").to_string(),
            fragment: include_str!("shaders/composite.frag").to_string(),
        }
    }

    fn create_buffer(&mut self, data: &[f32]) -> LayerloomResult<BufferId> {
        self.buffers.push(data.to_vec());
        Ok(BufferId(self.buffers.len() as u32 - 1))
    }

    fn create_texture(&mut self) -> LayerloomResult<TextureId> {
        self.textures.push(SoftTexture {
            image: None,
            sampling: Sampling::default(),
        });
        Ok(TextureId(self.textures.len() as u32 - 1))
    }

    fn upload_texture(
        &mut self,
        texture: TextureId,
        image: &FrameBuffer,
        sampling: Sampling,
    ) -> LayerloomResult<()> {
        if image.width == 0 || image.height == 0 {
            return Err(LayerloomError::InvalidArgument(
                "cannot upload an empty image".into(),
            ));
        }
        let slot = self
            .textures
            .get_mut(texture.0 as usize)
            .ok_or_else(|| LayerloomError::Render(format!("unknown texture {:?}", texture)))?;
        slot.image = Some(image.clone());
        slot.sampling = sampling;
        self.stats.texture_uploads += 1;
        Ok(())
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> LayerloomResult<ShaderId> {
        if source.trim().is_empty() {
            return Err(LayerloomError::ShaderCompile {
                stage: stage.to_string(),
                log: "empty source".into(),
            });
        }
        if !source.contains("main") {
            return Err(LayerloomError::ShaderCompile {
                stage: stage.to_string(),
                log: "missing entry point `main`".into(),
            });
        }
        let (attributes, uniforms) = parse_declarations(stage, source);
        self.shaders.push(SoftShader {
            stage,
            attributes,
            uniforms,
        });
        Ok(ShaderId(self.shaders.len() as u32 - 1))
    }

    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> LayerloomResult<ProgramId> {
        let (Some(vs), Some(fs)) = (
            self.shaders.get(vertex.0 as usize),
            self.shaders.get(fragment.0 as usize),
        ) else {
            return Err(LayerloomError::ShaderLink("unknown shader handle".into()));
        };
        if vs.stage != ShaderStage::Vertex || fs.stage != ShaderStage::Fragment {
            return Err(LayerloomError::ShaderLink("shader stages are swapped".into()));
        }
        if vs.attributes.is_empty() {
            return Err(LayerloomError::ShaderLink(
                "vertex stage declares no attributes".into(),
            ));
        }
        if !fs.uniforms.iter().any(|(_, kind)| *kind == UniformKind::Sampler) {
            return Err(LayerloomError::ShaderLink(
                "fragment stage samples no textures".into(),
            ));
        }

        let mut uniforms: Vec<(String, UniformKind)> = Vec::new();
        for (name, kind) in vs.uniforms.iter().chain(fs.uniforms.iter()) {
            let existing = uniforms.iter().find(|(n, _)| n == name).map(|(_, k)| *k);
            match existing {
                Some(existing) if existing != *kind => {
                    return Err(LayerloomError::ShaderLink(format!(
                        "uniform `{}` is declared with different types",
                        name
                    )));
                }
                Some(_) => {}
                None => uniforms.push((name.clone(), *kind)),
            }
        }

        self.programs.push(SoftProgram {
            attributes: vs.attributes.clone(),
            uniforms,
            matrices: HashMap::new(),
            samplers: HashMap::new(),
        });
        Ok(ProgramId(self.programs.len() as u32 - 1))
    }

    fn attrib_location(&self, program: ProgramId, name: &str) -> Option<AttribLocation> {
        let program = self.programs.get(program.0 as usize)?;
        let index = program.attributes.iter().position(|n| n == name)?;
        Some(AttribLocation(index as u32))
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let program = self.programs.get(program.0 as usize)?;
        let index = program.uniforms.iter().position(|(n, _)| n == name)?;
        Some(UniformLocation(index as u32))
    }

    fn clear(&mut self, color: Color) {
        let pixel = color.to_rgba8();
        for px in self.target.data.chunks_exact_mut(4) {
            px.copy_from_slice(&pixel);
        }
        self.stats.clears += 1;
    }

    fn use_program(&mut self, program: ProgramId) {
        if (program.0 as usize) < self.programs.len() {
            self.current_program = Some(program);
        } else {
            tracing::warn!("ignoring unknown program {:?}", program);
        }
    }

    fn bind_vertex_attrib(&mut self, location: AttribLocation, buffer: BufferId, components: u32) {
        self.vertex_input = Some((location, buffer, components));
    }

    fn set_uniform_mat4(&mut self, location: UniformLocation, value: &Mat4) {
        if let Some(program) = self.program_mut() {
            if let Some((_, UniformKind::Mat4)) = program.uniforms.get(location.0 as usize) {
                program.matrices.insert(location.0, *value);
                return;
            }
        }
        tracing::warn!("mat4 uniform {:?} is not part of the bound program", location);
    }

    fn set_uniform_sampler(&mut self, location: UniformLocation, unit: u32) {
        if let Some(program) = self.program_mut() {
            if let Some((_, UniformKind::Sampler)) = program.uniforms.get(location.0 as usize) {
                program.samplers.insert(location.0, unit);
                return;
            }
        }
        tracing::warn!("sampler uniform {:?} is not part of the bound program", location);
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureId) {
        match self.units.get_mut(unit as usize) {
            Some(slot) => *slot = Some(texture),
            None => tracing::warn!("texture unit {} out of range", unit),
        }
    }

    fn draw_triangle_strip(&mut self, first: u32, count: u32) -> LayerloomResult<()> {
        let program_id = self
            .current_program
            .ok_or_else(|| LayerloomError::Render("draw without a program".into()))?;
        let (location, buffer, components) = self
            .vertex_input
            .ok_or_else(|| LayerloomError::Render("draw without vertex input".into()))?;
        let program = &self.programs[program_id.0 as usize];
        if location.0 as usize >= program.attributes.len() || components < 2 {
            return Err(LayerloomError::Render(format!(
                "vertex input {:?} with {} components does not match the program",
                location, components
            )));
        }
        let data = self
            .buffers
            .get(buffer.0 as usize)
            .ok_or_else(|| LayerloomError::Render(format!("unknown buffer {:?}", buffer)))?;
        let stride = components as usize;
        if data.len() < (first + count) as usize * stride {
            return Err(LayerloomError::Render(format!(
                "draw of {} vertices overruns a {}-float buffer",
                first + count,
                data.len()
            )));
        }

        let mvp = program
            .matrix(PROJECTION_UNIFORM)
            .mul(&program.matrix(MODEL_VIEW_UNIFORM));

        let mut sampled: Vec<(usize, &SoftTexture)> = Vec::new();
        for (loc, (name, kind)) in program.uniforms.iter().enumerate() {
            if *kind != UniformKind::Sampler {
                continue;
            }
            let (Some(slot), Some(unit)) = (sampler_slot(name), program.samplers.get(&(loc as u32)))
            else {
                continue;
            };
            let bound = self
                .units
                .get(*unit as usize)
                .copied()
                .flatten()
                .and_then(|id| self.textures.get(id.0 as usize));
            if let Some(texture) = bound {
                sampled.push((slot, texture));
            }
        }
        sampled.sort_by_key(|(slot, _)| *slot);
        let layers: Vec<(&FrameBuffer, Sampling)> = sampled
            .iter()
            .filter_map(|(_, t)| t.image.as_ref().map(|image| (image, t.sampling)))
            .collect();

        let (width, height) = (self.target.width as f32, self.target.height as f32);
        let vertices: Vec<ScreenVertex> = (first..first + count)
            .map(|i| {
                let base = i as usize * stride;
                let attr = [data[base], data[base + 1]];
                let clip = mvp.transform([attr[0], attr[1], 0.0, 1.0]);
                let w = if clip[3].abs() < f32::EPSILON { 1.0 } else { clip[3] };
                ScreenVertex {
                    pos: [
                        (clip[0] / w + 1.0) * 0.5 * width,
                        (1.0 - clip[1] / w) * 0.5 * height,
                    ],
                    attr,
                }
            })
            .collect();

        for tri in vertices.windows(3) {
            rasterize(&mut self.target, [tri[0], tri[1], tri[2]], &layers);
        }
        self.stats.draw_calls += 1;
        Ok(())
    }

    fn read_pixels(&mut self) -> LayerloomResult<FrameBuffer> {
        Ok(self.target.clone())
    }
}

/// Scan `attribute`/`in`/`uniform` declarations out of GLSL-style source.
fn parse_declarations(
    stage: ShaderStage,
    source: &str,
) -> (Vec<String>, Vec<(String, UniformKind)>) {
    let stripped: String = source
        .lines()
        .map(|line| line.split("//").next().unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n");

    let mut attributes = Vec::new();
    let mut uniforms = Vec::new();
    for statement in stripped.split(|c| c == ';' || c == '{' || c == '}') {
        let tokens: Vec<&str> = statement.split_whitespace().collect();
        if tokens.len() < 3 {
            continue;
        }
        let name = tokens[tokens.len() - 1].to_string();
        let ty = tokens[tokens.len() - 2];
        match tokens[0] {
            "attribute" => attributes.push(name),
            "in" if stage == ShaderStage::Vertex => attributes.push(name),
            "uniform" => uniforms.push((name, UniformKind::from_type(ty))),
            _ => {}
        }
    }
    (attributes, uniforms)
}

#[derive(Debug, Clone, Copy)]
struct ScreenVertex {
    /// Window coordinates, y down.
    pos: [f32; 2],
    /// Raw position attribute, interpolated as the texture coordinate.
    attr: [f32; 2],
}

fn edge(a: [f32; 2], b: [f32; 2], p: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

fn rasterize(target: &mut FrameBuffer, tri: [ScreenVertex; 3], layers: &[(&FrameBuffer, Sampling)]) {
    let [a, b, c] = tri;
    let area = edge(a.pos, b.pos, c.pos);
    if area.abs() < f32::EPSILON {
        return;
    }
    let (tw, th) = (target.width, target.height);
    let min_x = a.pos[0].min(b.pos[0]).min(c.pos[0]).floor().max(0.0) as u32;
    let max_x = a.pos[0].max(b.pos[0]).max(c.pos[0]).ceil().min(tw as f32) as u32;
    let min_y = a.pos[1].min(b.pos[1]).min(c.pos[1]).floor().max(0.0) as u32;
    let max_y = a.pos[1].max(b.pos[1]).max(c.pos[1]).ceil().min(th as f32) as u32;

    for py in min_y..max_y {
        for px in min_x..max_x {
            let p = [px as f32 + 0.5, py as f32 + 0.5];
            let w0 = edge(b.pos, c.pos, p) / area;
            let w1 = edge(c.pos, a.pos, p) / area;
            let w2 = edge(a.pos, b.pos, p) / area;
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }
            let x = w0 * a.attr[0] + w1 * b.attr[0] + w2 * c.attr[0];
            let y = w0 * a.attr[1] + w1 * b.attr[1] + w2 * c.attr[1];
            let color = shade(layers, [x, 1.0 - y], (tw, th));
            target.set_pixel(px, py, color);
        }
    }
}

/// Stock fragment routine: layers composited in slot order, later slots on top.
fn shade(layers: &[(&FrameBuffer, Sampling)], uv: [f32; 2], viewport: (u32, u32)) -> [u8; 4] {
    let mut out = [0.0f32; 4];
    for (image, sampling) in layers {
        let src = sample(image, *sampling, uv, viewport);
        out = over(src, out);
    }
    [
        (out[0] * 255.0).round().clamp(0.0, 255.0) as u8,
        (out[1] * 255.0).round().clamp(0.0, 255.0) as u8,
        (out[2] * 255.0).round().clamp(0.0, 255.0) as u8,
        (out[3] * 255.0).round().clamp(0.0, 255.0) as u8,
    ]
}

fn over(src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
    let sa = src[3];
    let da = dst[3] * (1.0 - sa);
    let out_a = sa + da;
    if out_a <= 0.0 {
        return [0.0; 4];
    }
    [
        (src[0] * sa + dst[0] * da) / out_a,
        (src[1] * sa + dst[1] * da) / out_a,
        (src[2] * sa + dst[2] * da) / out_a,
        out_a,
    ]
}

fn wrap_coord(c: f32, wrap: Wrap) -> f32 {
    match wrap {
        Wrap::ClampToEdge => c.clamp(0.0, 1.0),
        Wrap::Repeat => c - c.floor(),
    }
}

fn wrap_texel(i: i64, size: u32, wrap: Wrap) -> u32 {
    match wrap {
        Wrap::ClampToEdge => i.clamp(0, size as i64 - 1) as u32,
        Wrap::Repeat => i.rem_euclid(size as i64) as u32,
    }
}

fn texel(image: &FrameBuffer, x: u32, y: u32) -> [f32; 4] {
    let px = image.get_pixel(x, y).unwrap_or([0, 0, 0, 0]);
    [
        px[0] as f32 / 255.0,
        px[1] as f32 / 255.0,
        px[2] as f32 / 255.0,
        px[3] as f32 / 255.0,
    ]
}

fn sample(image: &FrameBuffer, sampling: Sampling, uv: [f32; 2], viewport: (u32, u32)) -> [f32; 4] {
    let magnified = image.width < viewport.0 || image.height < viewport.1;
    let filter = if magnified {
        sampling.mag_filter
    } else {
        sampling.min_filter
    };
    let u = wrap_coord(uv[0], sampling.wrap_s);
    let v = wrap_coord(uv[1], sampling.wrap_t);
    let (w, h) = (image.width, image.height);

    match filter {
        Filter::Nearest => {
            let x = wrap_texel((u * w as f32).floor() as i64, w, sampling.wrap_s);
            let y = wrap_texel((v * h as f32).floor() as i64, h, sampling.wrap_t);
            texel(image, x, y)
        }
        Filter::Linear => {
            let fx = u * w as f32 - 0.5;
            let fy = v * h as f32 - 0.5;
            let (x0, y0) = (fx.floor(), fy.floor());
            let (tx, ty) = (fx - x0, fy - y0);
            let xs = [
                wrap_texel(x0 as i64, w, sampling.wrap_s),
                wrap_texel(x0 as i64 + 1, w, sampling.wrap_s),
            ];
            let ys = [
                wrap_texel(y0 as i64, h, sampling.wrap_t),
                wrap_texel(y0 as i64 + 1, h, sampling.wrap_t),
            ];
            let mut out = [0.0; 4];
            for (j, y) in ys.iter().enumerate() {
                for (i, x) in xs.iter().enumerate() {
                    let wx = if i == 0 { 1.0 - tx } else { tx };
                    let wy = if j == 0 { 1.0 - ty } else { ty };
                    let weight = wx * wy;
                    let t = texel(image, *x, *y);
                    for c in 0..4 {
                        out[c] += t[c] * weight;
                    }
                }
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::sampler_name;

    fn quad_program(surface: &mut SoftwareSurface) -> ProgramId {
        let sources = surface.stock_shaders();
        let vs = surface.compile_shader(ShaderStage::Vertex, &sources.vertex).unwrap();
        let fs = surface.compile_shader(ShaderStage::Fragment, &sources.fragment).unwrap();
        surface.link_program(vs, fs).unwrap()
    }

    fn draw_unit_quad(surface: &mut SoftwareSurface, program: ProgramId, textures: &[TextureId]) {
        let buffer = surface
            .create_buffer(&[0.0, 1.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0])
            .unwrap();
        surface.clear(Color::BLACK);
        let pos = surface.attrib_location(program, "aVertexPosition").unwrap();
        surface.bind_vertex_attrib(pos, buffer, 2);
        surface.use_program(program);
        let proj = surface.uniform_location(program, PROJECTION_UNIFORM).unwrap();
        surface.set_uniform_mat4(proj, &Mat4::ortho(0.0, 1.0, 0.0, 1.0, 0.0, 1.0));
        for (unit, texture) in textures.iter().enumerate() {
            surface.bind_texture(unit as u32, *texture);
            let loc = surface.uniform_location(program, &sampler_name(unit)).unwrap();
            surface.set_uniform_sampler(loc, unit as u32);
        }
        surface.draw_triangle_strip(0, 4).unwrap();
    }

    #[test]
    fn test_stock_program_exposes_interface() {
        let mut surface = SoftwareSurface::new(4, 4).unwrap();
        let program = quad_program(&mut surface);
        assert!(surface.attrib_location(program, "aVertexPosition").is_some());
        assert!(surface.uniform_location(program, PROJECTION_UNIFORM).is_some());
        assert!(surface.uniform_location(program, MODEL_VIEW_UNIFORM).is_some());
        for slot in 0..7 {
            assert!(surface.uniform_location(program, &sampler_name(slot)).is_some());
        }
        assert!(surface.uniform_location(program, "img7").is_none());
    }

    #[test]
    fn test_compile_rejects_source_without_entry_point() {
        let mut surface = SoftwareSurface::new(4, 4).unwrap();
        let err = surface
            .compile_shader(ShaderStage::Fragment, "uniform sampler2D img0;")
            .unwrap_err();
        assert!(matches!(err, LayerloomError::ShaderCompile { .. }));
    }

    #[test]
    fn test_link_rejects_fragment_without_samplers() {
        let mut surface = SoftwareSurface::new(4, 4).unwrap();
        let vs = surface
            .compile_shader(ShaderStage::Vertex, "attribute vec4 aVertexPosition; void main() {}")
            .unwrap();
        let fs = surface
            .compile_shader(ShaderStage::Fragment, "void main() { gl_FragColor = vec4(1.0); }")
            .unwrap();
        assert!(matches!(
            surface.link_program(vs, fs),
            Err(LayerloomError::ShaderLink(_))
        ));
    }

    #[test]
    fn test_quad_covers_viewport_with_upright_image() {
        let mut surface = SoftwareSurface::new(4, 4).unwrap();
        let program = quad_program(&mut surface);

        // Top row red, bottom row green.
        let mut image = FrameBuffer::new(1, 2);
        image.set_pixel(0, 0, [255, 0, 0, 255]);
        image.set_pixel(0, 1, [0, 255, 0, 255]);
        let texture = surface.create_texture().unwrap();
        surface.upload_texture(texture, &image, Sampling::PIXEL_ART).unwrap();

        draw_unit_quad(&mut surface, program, &[texture]);
        let frame = surface.read_pixels().unwrap();
        for x in 0..4 {
            assert_eq!(frame.get_pixel(x, 0), Some([255, 0, 0, 255]));
            assert_eq!(frame.get_pixel(x, 1), Some([255, 0, 0, 255]));
            assert_eq!(frame.get_pixel(x, 2), Some([0, 255, 0, 255]));
            assert_eq!(frame.get_pixel(x, 3), Some([0, 255, 0, 255]));
        }
        assert_eq!(surface.stats().draw_calls, 1);
    }

    #[test]
    fn test_later_slots_composite_on_top() {
        let mut surface = SoftwareSurface::new(2, 2).unwrap();
        let program = quad_program(&mut surface);

        let base = surface.create_texture().unwrap();
        surface
            .upload_texture(base, &FrameBuffer::solid(1, 1, &Color::RED), Sampling::PIXEL_ART)
            .unwrap();
        let mut half = FrameBuffer::new(2, 1);
        half.set_pixel(1, 0, [0, 0, 255, 255]);
        let top = surface.create_texture().unwrap();
        surface.upload_texture(top, &half, Sampling::PIXEL_ART).unwrap();

        draw_unit_quad(&mut surface, program, &[base, top]);
        let frame = surface.read_pixels().unwrap();
        assert_eq!(frame.get_pixel(0, 0), Some([255, 0, 0, 255]));
        assert_eq!(frame.get_pixel(1, 0), Some([0, 0, 255, 255]));
    }

    #[test]
    fn test_draw_without_program_fails() {
        let mut surface = SoftwareSurface::new(2, 2).unwrap();
        assert!(surface.draw_triangle_strip(0, 4).is_err());
    }

    #[test]
    fn test_zero_sized_surface_is_unavailable() {
        assert!(matches!(
            SoftwareSurface::new(0, 16),
            Err(LayerloomError::SurfaceUnavailable(_))
        ));
    }
}
