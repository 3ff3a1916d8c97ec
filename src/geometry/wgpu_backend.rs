//! wgpu implementation of [`GpuBackend`]
//!
//! One render pipeline is shared by every chunk. Each chunk geometry owns a
//! small uniform buffer holding its `projection * view * model` matrix, written
//! just before the frame's render pass is recorded.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use super::backend::{ChunkDraw, GpuBackend};
use crate::error::{gpu_operation_error, GeometryResult};
use crate::mesher::ChunkVertex;
use crate::resource_pack::TextureAtlas;

/// Depth format expected in every [`FrameTarget`]
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct ChunkUniform {
    transform: [[f32; 4]; 4],
}

/// Views the next `draw_chunks` renders into
pub struct FrameTarget {
    pub color: wgpu::TextureView,
    pub depth: wgpu::TextureView,
    /// Clear colour and depth first. `None` draws over existing contents.
    pub clear_color: Option<wgpu::Color>,
}

pub struct WgpuProgram {
    pipeline: wgpu::RenderPipeline,
}

pub struct WgpuTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
}

pub struct WgpuGeometry {
    /// `None` for an empty mesh
    vertex_buffer: Option<wgpu::Buffer>,
    vertex_count: u32,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

impl WgpuGeometry {
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}

pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    color_format: wgpu::TextureFormat,
    chunk_layout: wgpu::BindGroupLayout,
    atlas_layout: wgpu::BindGroupLayout,
    target: Option<FrameTarget>,
}

impl WgpuBackend {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, color_format: wgpu::TextureFormat) -> Self {
        let chunk_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
            label: Some("chunk_bind_group_layout"),
        });

        let atlas_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
            label: Some("atlas_bind_group_layout"),
        });

        Self {
            device,
            queue,
            color_format,
            chunk_layout,
            atlas_layout,
            target: None,
        }
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    /// Set where the following frames are drawn
    pub fn set_frame_target(&mut self, target: FrameTarget) {
        self.target = Some(target);
    }

    pub fn take_frame_target(&mut self) -> Option<FrameTarget> {
        self.target.take()
    }

    /// Create a depth view matching a colour target of the given size
    pub fn create_depth_view(&self, width: u32, height: u32) -> wgpu::TextureView {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Chunk Depth Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        texture.create_view(&wgpu::TextureViewDescriptor::default())
    }

    /// Run `create` inside an error scope and turn a captured error into a `GeometryError`
    fn scoped<T>(&self, operation: &str, filter: wgpu::ErrorFilter, create: impl FnOnce() -> T) -> GeometryResult<T> {
        self.device.push_error_scope(filter);
        let value = create();
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(gpu_operation_error(operation, error)),
            None => Ok(value),
        }
    }
}

impl GpuBackend for WgpuBackend {
    type Program = WgpuProgram;
    type Texture = WgpuTexture;
    type Geometry = WgpuGeometry;

    fn create_program(&mut self) -> GeometryResult<WgpuProgram> {
        let device = Arc::clone(&self.device);
        let color_format = self.color_format;
        let chunk_layout = &self.chunk_layout;
        let atlas_layout = &self.atlas_layout;

        let pipeline = self.scoped("create_program", wgpu::ErrorFilter::Validation, || {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Chunk Shader"),
                source: wgpu::ShaderSource::Wgsl(include_str!("shaders/chunk.wgsl").into()),
            });

            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Chunk Pipeline Layout"),
                bind_group_layouts: &[chunk_layout, atlas_layout],
                push_constant_ranges: &[],
            });

            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Chunk Pipeline"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: "vs_main",
                    buffers: &[ChunkVertex::desc()],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: "fs_main",
                    targets: &[Some(wgpu::ColorTargetState {
                        format: color_format,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: Some(wgpu::Face::Back),
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::LessEqual,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview: None,
            })
        })?;

        log::debug!("[WgpuBackend::create_program] Chunk pipeline created");
        Ok(WgpuProgram { pipeline })
    }

    fn destroy_program(&mut self, program: WgpuProgram) {
        drop(program);
    }

    fn create_texture(&mut self, atlas: &TextureAtlas) -> GeometryResult<WgpuTexture> {
        let size = atlas.size();
        let extent = wgpu::Extent3d {
            width: size,
            height: size,
            depth_or_array_layers: 1,
        };

        let (texture, bind_group) = self.scoped("create_texture", wgpu::ErrorFilter::Validation, || {
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Resource Pack Atlas"),
                size: extent,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });

            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                atlas.image(),
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * size),
                    rows_per_image: Some(size),
                },
                extent,
            );

            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("Resource Pack Atlas Sampler"),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: wgpu::FilterMode::Nearest,
                min_filter: wgpu::FilterMode::Nearest,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            });

            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                layout: &self.atlas_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&sampler),
                    },
                ],
                label: Some("atlas_bind_group"),
            });
            (texture, bind_group)
        })?;

        log::debug!("[WgpuBackend::create_texture] Uploaded {}x{} atlas", size, size);
        Ok(WgpuTexture { texture, bind_group })
    }

    fn destroy_texture(&mut self, texture: WgpuTexture) {
        texture.texture.destroy();
    }

    fn create_geometry(&mut self, vertex_bytes: &[u8], vertex_count: u32) -> GeometryResult<WgpuGeometry> {
        self.scoped("create_geometry", wgpu::ErrorFilter::OutOfMemory, || {
            let vertex_buffer = (!vertex_bytes.is_empty()).then(|| {
                self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Chunk Vertex Buffer"),
                    contents: vertex_bytes,
                    usage: wgpu::BufferUsages::VERTEX,
                })
            });

            let uniform_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Chunk Uniform Buffer"),
                size: std::mem::size_of::<ChunkUniform>() as wgpu::BufferAddress,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });

            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                layout: &self.chunk_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                }],
                label: Some("chunk_bind_group"),
            });

            WgpuGeometry {
                vertex_buffer,
                vertex_count,
                uniform_buffer,
                bind_group,
            }
        })
    }

    fn destroy_geometry(&mut self, geometry: WgpuGeometry) {
        if let Some(buffer) = &geometry.vertex_buffer {
            buffer.destroy();
        }
        geometry.uniform_buffer.destroy();
    }

    fn draw_chunks(
        &mut self,
        program: &WgpuProgram,
        texture: &WgpuTexture,
        draws: &[ChunkDraw<'_, WgpuGeometry>],
    ) -> GeometryResult<()> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| gpu_operation_error("draw_chunks", "no frame target set"))?;

        for draw in draws {
            let uniform = ChunkUniform {
                transform: draw.transform.into(),
            };
            self.queue
                .write_buffer(&draw.geometry.uniform_buffer, 0, bytemuck::cast_slice(&[uniform]));
        }

        let (color_load, depth_load) = match target.clear_color {
            Some(color) => (wgpu::LoadOp::Clear(color), wgpu::LoadOp::Clear(1.0)),
            None => (wgpu::LoadOp::Load, wgpu::LoadOp::Load),
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Chunk Render Encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Chunk Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.color,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &target.depth,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            render_pass.set_pipeline(&program.pipeline);
            render_pass.set_bind_group(1, &texture.bind_group, &[]);
            for draw in draws {
                let Some(vertex_buffer) = &draw.geometry.vertex_buffer else {
                    continue;
                };
                render_pass.set_bind_group(0, &draw.geometry.bind_group, &[]);
                render_pass.set_vertex_buffer(0, vertex_buffer.slice(..));
                render_pass.draw(0..draw.geometry.vertex_count, 0..1);
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}
