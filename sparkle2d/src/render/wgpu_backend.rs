//! `wgpu` implementation of [`GpuBackend`].
//!
//! The immediate-style calls are recorded into batches during the frame.
//! `end_frame` uploads every batch's vertices into one buffer and every
//! batch's uniforms into one dynamic-offset uniform buffer, then replays the
//! batches in a single render pass.

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use log::{info, warn};
use wgpu::util::DeviceExt;
use wgpu::{
    AddressMode, BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout,
    BindGroupLayoutDescriptor, BindGroupLayoutEntry, BindingResource, BindingType, BufferBinding,
    BufferBindingType, BufferUsages, ColorTargetState, ColorWrites, CommandEncoderDescriptor,
    CompositeAlphaMode, DeviceDescriptor, Extent3d, FilterMode, FragmentState, Instance, LoadOp,
    MultisampleState, Operations, Origin3d, PipelineLayoutDescriptor, PresentMode,
    PrimitiveState, RenderPassColorAttachment, RenderPassDescriptor, RenderPipeline,
    RenderPipelineDescriptor, RequestAdapterOptions, SamplerBindingType, SamplerDescriptor,
    ShaderModuleDescriptor, ShaderSource, SurfaceConfiguration, TexelCopyBufferLayout,
    TexelCopyTextureInfo, TextureAspect, TextureDescriptor, TextureDimension, TextureFormat,
    TextureSampleType, TextureUsages, TextureViewDescriptor, TextureViewDimension,
    VertexAttribute, VertexFormat, VertexState,
};
use winit::window::Window;

use crate::error::RenderError;
use crate::math::Color;
use crate::render::backend::{DrawMode, GpuBackend, Program, Uniform};
use crate::render::texture::{Texture, TextureHandle};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct GpuUniforms {
    projection: [[f32; 4]; 4],
    color: [f32; 4],
}

impl Default for GpuUniforms {
    fn default() -> Self {
        Self {
            projection: glam::Mat4::IDENTITY.to_cols_array_2d(),
            color: Color::WHITE.to_array(),
        }
    }
}

struct TextureEntry {
    /// Keeps the GPU texture alive for the bind group.
    _texture: wgpu::Texture,
    bind_group: BindGroup,
}

struct Batch {
    program: Program,
    texture: Option<TextureHandle>,
    uniforms: GpuUniforms,
    vertex_range: std::ops::Range<u64>,
    count: u32,
}

#[derive(Default)]
struct FrameState {
    clear: [f32; 4],
    program: Option<Program>,
    texture: Option<TextureHandle>,
    uniforms: GpuUniforms,
    vertex_data: Vec<u8>,
    uploaded: Option<std::ops::Range<u64>>,
    batches: Vec<Batch>,
}

pub struct WgpuBackend {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_config: SurfaceConfiguration,
    present_mode: PresentMode,
    uniform_layout: BindGroupLayout,
    texture_layout: BindGroupLayout,
    quad_pipeline: RenderPipeline,
    primitive_pipeline: RenderPipeline,
    uniform_alignment: u64,
    textures: HashMap<TextureHandle, TextureEntry>,
    next_texture_id: u32,
    frame: Option<FrameState>,
}

impl WgpuBackend {
    pub fn new(window: Arc<Window>, vsync: bool) -> Result<Self, RenderError> {
        let size = window.inner_size();
        let instance = Instance::default();
        let surface = instance.create_surface(window)?;

        let adapter = pollster::block_on(instance.request_adapter(&RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&DeviceDescriptor {
            label: Some("sparkle2d-device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: Default::default(),
            memory_hints: Default::default(),
            trace: wgpu::Trace::Off,
        }))?;

        let capabilities = surface.get_capabilities(&adapter);
        let format = capabilities
            .formats
            .iter()
            .copied()
            .find(|format| format.is_srgb())
            .or_else(|| capabilities.formats.first().copied())
            .ok_or_else(|| RenderError::Surface("surface reports no formats".into()))?;

        let present_mode = choose_present_mode(&capabilities.present_modes, vsync);
        let alpha_mode = choose_alpha_mode(&capabilities.alpha_modes);

        let surface_config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let uniform_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("uniform-bind-group-layout"),
            entries: &[BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: std::num::NonZeroU64::new(
                        std::mem::size_of::<GpuUniforms>() as u64,
                    ),
                },
                count: None,
            }],
        });

        let texture_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("texture-bind-group-layout"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: BindingType::Sampler(SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let quad_pipeline = create_pipeline(
            &device,
            format,
            Program::Quad,
            &[&uniform_layout, &texture_layout],
        );
        let primitive_pipeline =
            create_pipeline(&device, format, Program::Primitive, &[&uniform_layout]);

        let uniform_alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        info!(
            "wgpu backend ready: {}x{} {format:?} {present_mode:?}",
            surface_config.width, surface_config.height
        );

        Ok(Self {
            surface,
            device,
            queue,
            surface_config,
            present_mode,
            uniform_layout,
            texture_layout,
            quad_pipeline,
            primitive_pipeline,
            uniform_alignment,
            textures: HashMap::new(),
            next_texture_id: 1,
            frame: None,
        })
    }

    /// Upload tightly packed RGBA8 pixels and return a texture usable by the
    /// quad compositor.
    pub fn create_texture_rgba(&mut self, data: &[u8], width: u32, height: u32) -> Texture {
        let size = Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        let texture = self.device.create_texture(&TextureDescriptor {
            label: Some("texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8UnormSrgb,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        });

        self.queue.write_texture(
            TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            data,
            TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            size,
        );

        let view = texture.create_view(&TextureViewDescriptor::default());
        let sampler = self.device.create_sampler(&SamplerDescriptor {
            label: Some("texture-sampler"),
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            ..Default::default()
        });

        let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("texture-bind-group"),
            layout: &self.texture_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(&sampler),
                },
            ],
        });

        let handle = TextureHandle(self.next_texture_id);
        self.next_texture_id += 1;
        self.textures.insert(
            handle,
            TextureEntry {
                _texture: texture,
                bind_group,
            },
        );

        Texture::new(handle, width, height)
    }

    fn frame_mut(&mut self, call: &'static str) -> Option<&mut FrameState> {
        if self.frame.is_none() {
            warn!("{}", RenderError::NoFrame(call));
        }
        self.frame.as_mut()
    }

    fn acquire_surface_texture(&mut self) -> Result<Option<wgpu::SurfaceTexture>, RenderError> {
        loop {
            match self.surface.get_current_texture() {
                Ok(texture) => return Ok(Some(texture)),
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    warn!("surface lost or outdated, reconfiguring");
                    self.surface.configure(&self.device, &self.surface_config);
                }
                Err(wgpu::SurfaceError::Timeout) => {
                    warn!("surface timed out, skipping frame");
                    return Ok(None);
                }
                Err(err) => return Err(RenderError::Surface(err.to_string())),
            }
        }
    }

    fn submit(&mut self, frame: FrameState) -> Result<(), RenderError> {
        let Some(surface_texture) = self.acquire_surface_texture()? else {
            return Ok(());
        };
        let view = surface_texture
            .texture
            .create_view(&TextureViewDescriptor::default());

        let uniform_size = std::mem::size_of::<GpuUniforms>() as u64;
        let stride = uniform_size.div_ceil(self.uniform_alignment) * self.uniform_alignment;
        let mut uniform_data = vec![0u8; (stride * frame.batches.len().max(1) as u64) as usize];
        for (i, batch) in frame.batches.iter().enumerate() {
            let start = i * stride as usize;
            uniform_data[start..start + uniform_size as usize]
                .copy_from_slice(bytemuck::bytes_of(&batch.uniforms));
        }

        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("frame-uniforms"),
                contents: &uniform_data,
                usage: BufferUsages::UNIFORM,
            });
        let uniform_bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("frame-uniform-bind-group"),
            layout: &self.uniform_layout,
            entries: &[BindGroupEntry {
                binding: 0,
                resource: BindingResource::Buffer(BufferBinding {
                    buffer: &uniform_buffer,
                    offset: 0,
                    size: std::num::NonZeroU64::new(uniform_size),
                }),
            }],
        });

        let vertex_buffer = (!frame.vertex_data.is_empty()).then(|| {
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("frame-vertices"),
                    contents: &frame.vertex_data,
                    usage: BufferUsages::VERTEX,
                })
        });

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("frame-encoder"),
            });

        {
            let [r, g, b, a] = frame.clear;
            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("scene-pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(wgpu::Color {
                            r: r as f64,
                            g: g as f64,
                            b: b as f64,
                            a: a as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                multiview_mask: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            if let Some(vertex_buffer) = &vertex_buffer {
                for (i, batch) in frame.batches.iter().enumerate() {
                    match batch.program {
                        Program::Quad => {
                            let Some(entry) =
                                batch.texture.and_then(|handle| self.textures.get(&handle))
                            else {
                                warn!("{}", RenderError::UnknownTexture(batch.texture.map_or(0, |t| t.0)));
                                continue;
                            };
                            pass.set_pipeline(&self.quad_pipeline);
                            pass.set_bind_group(1, &entry.bind_group, &[]);
                        }
                        Program::Primitive => pass.set_pipeline(&self.primitive_pipeline),
                    }
                    pass.set_bind_group(0, &uniform_bind_group, &[(i as u64 * stride) as u32]);
                    pass.set_vertex_buffer(0, vertex_buffer.slice(batch.vertex_range.clone()));
                    pass.draw(0..batch.count, 0..1);
                }
            }
        }

        self.queue.submit(Some(encoder.finish()));
        surface_texture.present();
        Ok(())
    }
}

impl GpuBackend for WgpuBackend {
    fn begin_frame(&mut self, clear: Color) -> Result<(), RenderError> {
        self.frame = Some(FrameState {
            clear: clear.to_array(),
            ..Default::default()
        });
        Ok(())
    }

    fn use_program(&mut self, program: Program) {
        if let Some(frame) = self.frame_mut("use_program") {
            frame.program = Some(program);
        }
    }

    fn set_uniform(&mut self, uniform: Uniform) {
        if let Some(frame) = self.frame_mut("set_uniform") {
            match uniform {
                Uniform::Projection(m) => frame.uniforms.projection = m,
                Uniform::Color(c) => frame.uniforms.color = c.to_array(),
            }
        }
    }

    fn bind_texture(&mut self, texture: TextureHandle) {
        if let Some(frame) = self.frame_mut("bind_texture") {
            frame.texture = Some(texture);
        }
    }

    fn upload_buffer(&mut self, bytes: &[u8]) {
        if let Some(frame) = self.frame_mut("upload_buffer") {
            let start = frame.vertex_data.len() as u64;
            frame.vertex_data.extend_from_slice(bytes);
            frame.uploaded = Some(start..frame.vertex_data.len() as u64);
        }
    }

    fn draw_arrays(&mut self, mode: DrawMode, count: u32) {
        let Some(frame) = self.frame_mut("draw_arrays") else {
            return;
        };
        let DrawMode::Triangles = mode;
        let (Some(program), Some(vertex_range)) = (frame.program, frame.uploaded.clone()) else {
            warn!("draw_arrays without a program or uploaded vertices");
            return;
        };
        frame.batches.push(Batch {
            program,
            texture: frame.texture,
            uniforms: frame.uniforms,
            vertex_range,
            count,
        });
    }

    fn end_frame(&mut self) -> Result<(), RenderError> {
        let frame = self.frame.take().ok_or(RenderError::NoFrame("end_frame"))?;
        self.submit(frame)
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }

        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface_config.present_mode = self.present_mode;
        self.surface.configure(&self.device, &self.surface_config);
    }
}

fn vertex_attributes(program: Program) -> Vec<VertexAttribute> {
    program
        .attributes()
        .iter()
        .enumerate()
        .map(|(location, attribute)| VertexAttribute {
            format: match attribute.components {
                1 => VertexFormat::Float32,
                2 => VertexFormat::Float32x2,
                3 => VertexFormat::Float32x3,
                _ => VertexFormat::Float32x4,
            },
            offset: attribute.offset,
            shader_location: location as u32,
        })
        .collect()
}

fn create_pipeline(
    device: &wgpu::Device,
    surface_format: TextureFormat,
    program: Program,
    bind_group_layouts: &[&BindGroupLayout],
) -> RenderPipeline {
    let (label, source) = match program {
        Program::Quad => ("quad", include_str!("quad.wgsl")),
        Program::Primitive => ("primitive", include_str!("primitive.wgsl")),
    };

    let shader = device.create_shader_module(ShaderModuleDescriptor {
        label: Some(label),
        source: ShaderSource::Wgsl(source.into()),
    });

    let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts,
        immediate_size: 0,
    });

    let attributes = vertex_attributes(program);

    device.create_render_pipeline(&RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        vertex: VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[wgpu::VertexBufferLayout {
                array_stride: program.stride(),
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &attributes,
            }],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(ColorTargetState {
                format: surface_format,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}

fn choose_present_mode(modes: &[PresentMode], vsync: bool) -> PresentMode {
    if vsync {
        modes
            .iter()
            .copied()
            .find(|mode| matches!(mode, PresentMode::Fifo | PresentMode::FifoRelaxed))
            .unwrap_or(PresentMode::Fifo)
    } else {
        modes
            .iter()
            .copied()
            .find(|mode| matches!(mode, PresentMode::Immediate | PresentMode::Mailbox))
            .unwrap_or(PresentMode::Fifo)
    }
}

fn choose_alpha_mode(modes: &[CompositeAlphaMode]) -> CompositeAlphaMode {
    modes
        .iter()
        .copied()
        .find(|mode| matches!(mode, CompositeAlphaMode::Auto))
        .unwrap_or_else(|| modes.first().copied().unwrap_or(CompositeAlphaMode::Opaque))
}
