//! Headless wgpu implementation of [`RenderSurface`].
//!
//! WGSL stages use a fixed binding layout in group 0: binding 0 holds the
//! projection and model-view matrices, then each slot `n` owns a texture at
//! `1 + 2n` and its sampler at `2 + 2n`. Uniform "locations" map onto that
//! layout by name.

use std::sync::mpsc;

use anyhow::Result;
use wgpu::util::DeviceExt;
use wgpu::{Adapter, Device, Instance, Queue};

use layerloom_core::{
    Color, FrameBuffer, LayerloomError, LayerloomResult, Mat4, MAX_LAYERS,
};

use crate::surface::{
    sampler_slot, AttribLocation, BufferId, Filter, ProgramId, RenderSurface, Sampling, ShaderId,
    ShaderSources, ShaderStage, TextureId, UniformLocation, Wrap, MODEL_VIEW_UNIFORM,
    POSITION_ATTRIBUTE, PROJECTION_UNIFORM,
};

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const TEXTURE_UNITS: usize = 16;
const PROJECTION_LOCATION: u32 = 0;
const MODEL_VIEW_LOCATION: u32 = 1;
const FIRST_SAMPLER_LOCATION: u32 = 2;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Matrices {
    projection: [[f32; 4]; 4],
    model_view: [[f32; 4]; 4],
}

/// A shared context for all GPU-accelerated operations.
pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
}

impl GpuContext {
    /// Initializes WGPU, selecting the best available backend (Metal, Vulkan, DX12, etc.)
    pub fn init() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None, // Headless rendering
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| anyhow::anyhow!("Failed to find suitable wgpu adapter"))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Layerloom Headless GPU Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        ))?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    width: u32,
    height: u32,
}

struct GpuShader {
    stage: ShaderStage,
    module: wgpu::ShaderModule,
    source: String,
}

struct GpuProgram {
    pipeline: wgpu::RenderPipeline,
    vertex_source: String,
    fragment_source: String,
}

/// Offscreen RGBA8 render target on a headless wgpu device.
pub struct GpuSurface {
    gpu: GpuContext,
    width: u32,
    height: u32,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    uniform_buffer: wgpu::Buffer,
    matrices: Matrices,
    fallback: GpuTexture,
    buffers: Vec<wgpu::Buffer>,
    textures: Vec<Option<GpuTexture>>,
    shaders: Vec<GpuShader>,
    programs: Vec<GpuProgram>,
    current_program: Option<ProgramId>,
    vertex_input: Option<BufferId>,
    units: [Option<TextureId>; TEXTURE_UNITS],
    sampler_units: [Option<u32>; MAX_LAYERS],
}

impl GpuSurface {
    /// Acquire a device and allocate a `width`×`height` render target.
    pub fn headless(width: u32, height: u32) -> LayerloomResult<Self> {
        let gpu = GpuContext::init()
            .map_err(|e| LayerloomError::SurfaceUnavailable(e.to_string()))?;
        Self::new(gpu, width, height)
    }

    pub fn new(gpu: GpuContext, width: u32, height: u32) -> LayerloomResult<Self> {
        let max = gpu.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(LayerloomError::SurfaceUnavailable(format!(
                "cannot create a {}x{} render target (limit {})",
                width, height, max
            )));
        }
        tracing::info!("Using GPU adapter {}", gpu.adapter.get_info().name);

        let target = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("layerloom_target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }];
        for slot in 0..MAX_LAYERS as u32 {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 1 + 2 * slot,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 2 + 2 * slot,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
        }
        let bind_group_layout =
            gpu.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("layerloom_bind_group_layout"),
                    entries: &entries,
                });
        let pipeline_layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("layerloom_pipeline_layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        let matrices = Matrices {
            projection: Mat4::IDENTITY.to_cols(),
            model_view: Mat4::IDENTITY.to_cols(),
        };
        let uniform_buffer = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("layerloom_matrices"),
                contents: bytemuck::bytes_of(&matrices),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });

        let fallback = create_gpu_texture(
            &gpu,
            &FrameBuffer::solid(1, 1, &Color::TRANSPARENT),
            Sampling::PIXEL_ART,
        );

        Ok(Self {
            gpu,
            width,
            height,
            target,
            target_view,
            bind_group_layout,
            pipeline_layout,
            uniform_buffer,
            matrices,
            fallback,
            buffers: Vec::new(),
            textures: Vec::new(),
            shaders: Vec::new(),
            programs: Vec::new(),
            current_program: None,
            vertex_input: None,
            units: [None; TEXTURE_UNITS],
            sampler_units: [None; MAX_LAYERS],
        })
    }

    fn submit_pass(&self, load: wgpu::LoadOp<wgpu::Color>, draw: Option<DrawCall<'_>>) {
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("layerloom_pass"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("layerloom_composite"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            if let Some(call) = draw {
                pass.set_pipeline(call.pipeline);
                pass.set_bind_group(0, call.bind_group, &[]);
                pass.set_vertex_buffer(0, call.vertices.slice(..));
                pass.draw(call.first..call.first + call.count, 0..1);
            }
        }
        self.gpu.queue.submit(Some(encoder.finish()));
    }
}

struct DrawCall<'a> {
    pipeline: &'a wgpu::RenderPipeline,
    bind_group: &'a wgpu::BindGroup,
    vertices: &'a wgpu::Buffer,
    first: u32,
    count: u32,
}

fn address_mode(wrap: Wrap) -> wgpu::AddressMode {
    match wrap {
        Wrap::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        Wrap::Repeat => wgpu::AddressMode::Repeat,
    }
}

fn filter_mode(filter: Filter) -> wgpu::FilterMode {
    match filter {
        Filter::Nearest => wgpu::FilterMode::Nearest,
        Filter::Linear => wgpu::FilterMode::Linear,
    }
}

fn create_sampler(gpu: &GpuContext, sampling: Sampling) -> wgpu::Sampler {
    gpu.device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("layerloom_layer_sampler"),
        address_mode_u: address_mode(sampling.wrap_s),
        address_mode_v: address_mode(sampling.wrap_t),
        mag_filter: filter_mode(sampling.mag_filter),
        min_filter: filter_mode(sampling.min_filter),
        ..Default::default()
    })
}

fn create_gpu_texture(gpu: &GpuContext, image: &FrameBuffer, sampling: Sampling) -> GpuTexture {
    let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("layerloom_layer"),
        size: wgpu::Extent3d {
            width: image.width,
            height: image.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TARGET_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let gpu_texture = GpuTexture {
        texture,
        view,
        sampler: create_sampler(gpu, sampling),
        width: image.width,
        height: image.height,
    };
    write_pixels(gpu, &gpu_texture, image);
    gpu_texture
}

fn write_pixels(gpu: &GpuContext, texture: &GpuTexture, image: &FrameBuffer) {
    gpu.queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &texture.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &image.data,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(image.width * 4),
            rows_per_image: Some(image.height),
        },
        wgpu::Extent3d {
            width: image.width,
            height: image.height,
            depth_or_array_layers: 1,
        },
    );
}

impl RenderSurface for GpuSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn stock_shaders(&self) -> ShaderSources {
        ShaderSources {
            vertex: include_str!("shaders/composite_vs.wgsl").to_string(),
            fragment: include_str!("shaders/composite_fs.wgsl").to_string(),
        }
    }

    fn create_buffer(&mut self, data: &[f32]) -> LayerloomResult<BufferId> {
        let buffer = self
            .gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("layerloom_vertices"),
                contents: bytemuck::cast_slice(data),
                usage: wgpu::BufferUsages::VERTEX,
            });
        self.buffers.push(buffer);
        Ok(BufferId(self.buffers.len() as u32 - 1))
    }

    fn create_texture(&mut self) -> LayerloomResult<TextureId> {
        self.textures.push(None);
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
        match slot {
            Some(existing) if existing.width == image.width && existing.height == image.height => {
                write_pixels(&self.gpu, existing, image);
                existing.sampler = create_sampler(&self.gpu, sampling);
            }
            _ => *slot = Some(create_gpu_texture(&self.gpu, image, sampling)),
        }
        Ok(())
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> LayerloomResult<ShaderId> {
        let entry = match stage {
            ShaderStage::Vertex => "fn vs_main",
            ShaderStage::Fragment => "fn fs_main",
        };
        if !source.contains(entry) {
            return Err(LayerloomError::ShaderCompile {
                stage: stage.to_string(),
                log: format!("missing entry point `{}`", &entry[3..]),
            });
        }

        self.gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .gpu
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("layerloom_stage"),
                source: wgpu::ShaderSource::Wgsl(source.to_string().into()),
            });
        if let Some(err) = pollster::block_on(self.gpu.device.pop_error_scope()) {
            return Err(LayerloomError::ShaderCompile {
                stage: stage.to_string(),
                log: err.to_string(),
            });
        }

        self.shaders.push(GpuShader {
            stage,
            module,
            source: source.to_string(),
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

        self.gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .gpu
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("layerloom_composite_pipeline"),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vs.module,
                    entry_point: "vs_main",
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: (2 * std::mem::size_of::<f32>()) as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &wgpu::vertex_attr_array![0 => Float32x2],
                    }],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fs.module,
                    entry_point: "fs_main",
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TARGET_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });
        if let Some(err) = pollster::block_on(self.gpu.device.pop_error_scope()) {
            return Err(LayerloomError::ShaderLink(err.to_string()));
        }

        let program = GpuProgram {
            pipeline,
            vertex_source: vs.source.clone(),
            fragment_source: fs.source.clone(),
        };
        self.programs.push(program);
        Ok(ProgramId(self.programs.len() as u32 - 1))
    }

    fn attrib_location(&self, program: ProgramId, name: &str) -> Option<AttribLocation> {
        let program = self.programs.get(program.0 as usize)?;
        (name == POSITION_ATTRIBUTE && program.vertex_source.contains(name))
            .then_some(AttribLocation(0))
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let program = self.programs.get(program.0 as usize)?;
        let location = match name {
            PROJECTION_UNIFORM => PROJECTION_LOCATION,
            MODEL_VIEW_UNIFORM => MODEL_VIEW_LOCATION,
            _ => {
                let slot = sampler_slot(name).filter(|slot| *slot < MAX_LAYERS)?;
                FIRST_SAMPLER_LOCATION + slot as u32
            }
        };
        let declared =
            program.vertex_source.contains(name) || program.fragment_source.contains(name);
        declared.then_some(UniformLocation(location))
    }

    fn clear(&mut self, color: Color) {
        let clear = wgpu::Color {
            r: color.r as f64,
            g: color.g as f64,
            b: color.b as f64,
            a: color.a as f64,
        };
        self.submit_pass(wgpu::LoadOp::Clear(clear), None);
    }

    fn use_program(&mut self, program: ProgramId) {
        if (program.0 as usize) < self.programs.len() {
            self.current_program = Some(program);
        } else {
            tracing::warn!("ignoring unknown program {:?}", program);
        }
    }

    fn bind_vertex_attrib(&mut self, location: AttribLocation, buffer: BufferId, components: u32) {
        if location.0 != 0 || components != 2 {
            tracing::warn!(
                "vertex input {:?} with {} components does not match the fixed layout",
                location,
                components
            );
        }
        self.vertex_input = Some(buffer);
    }

    fn set_uniform_mat4(&mut self, location: UniformLocation, value: &Mat4) {
        match location.0 {
            PROJECTION_LOCATION => self.matrices.projection = value.to_cols(),
            MODEL_VIEW_LOCATION => self.matrices.model_view = value.to_cols(),
            other => tracing::warn!("uniform location {} is not a matrix", other),
        }
    }

    fn set_uniform_sampler(&mut self, location: UniformLocation, unit: u32) {
        let slot = location.0.checked_sub(FIRST_SAMPLER_LOCATION).map(|s| s as usize);
        match slot.and_then(|s| self.sampler_units.get_mut(s)) {
            Some(entry) => *entry = Some(unit),
            None => tracing::warn!("uniform location {} is not a sampler", location.0),
        }
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureId) {
        match self.units.get_mut(unit as usize) {
            Some(slot) => *slot = Some(texture),
            None => tracing::warn!("texture unit {} out of range", unit),
        }
    }

    fn draw_triangle_strip(&mut self, first: u32, count: u32) -> LayerloomResult<()> {
        let program = self
            .current_program
            .and_then(|id| self.programs.get(id.0 as usize))
            .ok_or_else(|| LayerloomError::Render("draw without a program".into()))?;
        let vertices = self
            .vertex_input
            .and_then(|id| self.buffers.get(id.0 as usize))
            .ok_or_else(|| LayerloomError::Render("draw without vertex input".into()))?;

        self.gpu
            .queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&self.matrices));

        let layer_textures: Vec<&GpuTexture> = (0..MAX_LAYERS)
            .map(|slot| {
                self.sampler_units[slot]
                    .and_then(|unit| self.units.get(unit as usize).copied().flatten())
                    .and_then(|id| self.textures.get(id.0 as usize))
                    .and_then(|t| t.as_ref())
                    .unwrap_or(&self.fallback)
            })
            .collect();
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: self.uniform_buffer.as_entire_binding(),
        }];
        for (slot, texture) in layer_textures.iter().enumerate() {
            let slot = slot as u32;
            entries.push(wgpu::BindGroupEntry {
                binding: 1 + 2 * slot,
                resource: wgpu::BindingResource::TextureView(&texture.view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: 2 + 2 * slot,
                resource: wgpu::BindingResource::Sampler(&texture.sampler),
            });
        }
        let bind_group = self
            .gpu
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("layerloom_bind_group"),
                layout: &self.bind_group_layout,
                entries: &entries,
            });

        self.submit_pass(
            wgpu::LoadOp::Load,
            Some(DrawCall {
                pipeline: &program.pipeline,
                bind_group: &bind_group,
                vertices,
                first,
                count,
            }),
        );
        Ok(())
    }

    fn read_pixels(&mut self) -> LayerloomResult<FrameBuffer> {
        let (width, height) = (self.width, self.height);
        let padded_bytes_per_row = (width * 4 + 255) & !255;
        let readback = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("layerloom_readback"),
            size: (padded_bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.gpu.queue.submit(Some(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |v| {
            let _ = tx.send(v);
        });
        self.gpu.device.poll(wgpu::Maintain::Wait);

        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(LayerloomError::Render(format!("failed to map readback: {}", e)))
            }
            Err(_) => return Err(LayerloomError::Render("readback was never mapped".into())),
        }

        let mut frame = FrameBuffer::new(width, height);
        {
            let data = slice.get_mapped_range();
            let row_bytes = (width * 4) as usize;
            for y in 0..height as usize {
                let src = y * padded_bytes_per_row as usize;
                frame.data[y * row_bytes..(y + 1) * row_bytes]
                    .copy_from_slice(&data[src..src + row_bytes]);
            }
        }
        readback.unmap();
        Ok(frame)
    }
}
