use rustc_hash::{FxHashMap, FxHashSet};
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingResource, BindingType, BlendState, Buffer, ColorTargetState,
    Device, FragmentState, PipelineCompilationOptions, PipelineLayoutDescriptor, PrimitiveState,
    Queue, RenderPipeline, Sampler, SamplerBindingType, ShaderStages, SurfaceError, Texture,
    TextureFormat, TextureSampleType, TextureViewDimension, VertexBufferLayout, VertexState,
};

use crate::media::Frame;
use crate::surface::{CanvasSize, SurfaceId};

use super::context::GpuContext;
use super::plan::{DrawItem, Fill, PLACEHOLDER};
use super::quad::{PixelSpace, SolidVertex, TexturedVertex, solid_quad, textured_quad};

const TEXTURED_SHADER: &str = r"
struct VertexInput {
    @location(0) position: vec2f,
    @location(1) uvq: vec3f,
    @location(2) opacity: f32,
};

struct VertexOutput {
    @builtin(position) clip: vec4f,
    @location(0) uvq: vec3f,
    @location(1) opacity: f32,
};

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip = vec4f(input.position, 0.0, 1.0);
    out.uvq = input.uvq;
    out.opacity = input.opacity;
    return out;
}

@group(0) @binding(0) var t_frame: texture_2d<f32>;
@group(0) @binding(1) var s_frame: sampler;

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4f {
    let uv = input.uvq.xy / input.uvq.z;
    let color = textureSample(t_frame, s_frame, uv);
    return vec4f(color.rgb, color.a * input.opacity);
}
";

const SOLID_SHADER: &str = r"
struct VertexInput {
    @location(0) position: vec2f,
    @location(1) color: vec4f,
};

struct VertexOutput {
    @builtin(position) clip: vec4f,
    @location(0) color: vec4f,
};

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip = vec4f(input.position, 0.0, 1.0);
    out.color = input.color;
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4f {
    return input.color;
}
";

const TEXTURED_ATTRIBUTES: [wgpu::VertexAttribute; 3] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x3, 2 => Float32];
const SOLID_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x4];

/// One uploaded frame, kept until the surface disappears or its frame
/// changes size.
struct CachedTexture {
    texture: Texture,
    bind_group: BindGroup,
    width: u32,
    height: u32,
    serial: u64,
}

/// Vertex buffer that grows to the largest batch seen.
struct GrowableBuffer {
    label: &'static str,
    buffer: Buffer,
    capacity: u64,
}

impl GrowableBuffer {
    fn new(device: &Device, label: &'static str) -> Self {
        let capacity = 4096;
        Self {
            label,
            buffer: create_vertex_buffer(device, label, capacity),
            capacity,
        }
    }

    fn upload(&mut self, device: &Device, queue: &Queue, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let needed = bytes.len() as u64;
        if needed > self.capacity {
            self.capacity = needed.next_power_of_two();
            self.buffer = create_vertex_buffer(device, self.label, self.capacity);
            log::debug!("{} grown to {} bytes", self.label, self.capacity);
        }
        queue.write_buffer(&self.buffer, 0, bytes);
    }
}

enum DrawCommand {
    Textured { id: SurfaceId, first: u32 },
    Solid { first: u32, count: u32 },
}

/// Draws warped surfaces for one output. Owned by that output's
/// `GpuContext`; nothing here is shared with the other window.
pub struct QuadCompositor {
    textured_pipeline: RenderPipeline,
    solid_pipeline: RenderPipeline,
    texture_bgl: BindGroupLayout,
    sampler: Sampler,
    textures: FxHashMap<SurfaceId, CachedTexture>,
    textured_vertices: GrowableBuffer,
    solid_vertices: GrowableBuffer,
}

impl QuadCompositor {
    pub fn new(device: &Device, format: TextureFormat) -> Self {
        let texture_bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("quad-texture-bgl"),
            entries: &[tex_entry(0), sampler_entry(1)],
        });

        let textured_pipeline = create_quad_pipeline(
            device,
            "quad-textured",
            TEXTURED_SHADER,
            &[&texture_bgl],
            VertexBufferLayout {
                array_stride: std::mem::size_of::<TexturedVertex>() as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &TEXTURED_ATTRIBUTES,
            },
            format,
        );
        let solid_pipeline = create_quad_pipeline(
            device,
            "quad-solid",
            SOLID_SHADER,
            &[],
            VertexBufferLayout {
                array_stride: std::mem::size_of::<SolidVertex>() as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &SOLID_ATTRIBUTES,
            },
            format,
        );

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("quad-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            textured_pipeline,
            solid_pipeline,
            texture_bgl,
            sampler,
            textures: FxHashMap::default(),
            textured_vertices: GrowableBuffer::new(device, "quad-textured-vertices"),
            solid_vertices: GrowableBuffer::new(device, "quad-solid-vertices"),
        }
    }

    /// Upload `frame` for `id` unless the cached copy is already this frame.
    fn ensure_texture(&mut self, device: &Device, queue: &Queue, id: SurfaceId, frame: &Frame) {
        if let Some(cached) = self.textures.get_mut(&id) {
            if cached.serial == frame.serial {
                return;
            }
            if cached.width == frame.width && cached.height == frame.height {
                write_frame(queue, &cached.texture, frame);
                cached.serial = frame.serial;
                return;
            }
        }

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("surface-frame"),
            size: wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        write_frame(queue, &texture, frame);

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("surface-frame-bg"),
            layout: &self.texture_bgl,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        self.textures.insert(
            id,
            CachedTexture {
                texture,
                bind_group,
                width: frame.width,
                height: frame.height,
                serial: frame.serial,
            },
        );
    }

    /// Drop textures of surfaces that are gone or no longer textured.
    fn evict_unused(&mut self, items: &[DrawItem]) {
        let live: FxHashSet<SurfaceId> = items
            .iter()
            .filter(|item| matches!(item.fill, Fill::Textured { .. }))
            .map(|item| item.id)
            .collect();
        self.textures.retain(|id, _| live.contains(id));
    }

    /// Draw one frame of `items` onto the context's window, cleared to black.
    pub fn render(
        &mut self,
        ctx: &GpuContext,
        items: &[DrawItem],
        canvas: CanvasSize,
    ) -> Result<(), SurfaceError> {
        self.evict_unused(items);

        let pixels = PixelSpace {
            canvas,
            viewport: ctx.viewport(),
        };
        let mut textured: Vec<TexturedVertex> = Vec::new();
        let mut solid: Vec<SolidVertex> = Vec::new();
        let mut commands = Vec::with_capacity(items.len() * 2);

        for item in items {
            match &item.fill {
                Fill::Textured { frame, opacity } => {
                    if frame.width == 0 || frame.height == 0 {
                        continue;
                    }
                    self.ensure_texture(&ctx.device, &ctx.queue, item.id, frame);
                    commands.push(DrawCommand::Textured {
                        id: item.id,
                        first: textured.len() as u32,
                    });
                    textured.extend(textured_quad(&item.corners, *opacity, canvas));
                }
                Fill::Placeholder => {
                    let first = solid.len() as u32;
                    solid.extend(solid_quad(&item.corners, PLACEHOLDER, canvas));
                    commands.push(DrawCommand::Solid { first, count: 6 });
                }
                Fill::Nothing => {}
            }
        }

        // Overlays go on top of every fill.
        let overlay_start = solid.len();
        for item in items {
            if let Some((color, width)) = item.outline {
                pixels.outline(&mut solid, &item.corners, width, color);
            }
            if let Some((color, size)) = item.handles {
                pixels.handles(&mut solid, &item.corners, size, color);
            }
        }
        if solid.len() > overlay_start {
            commands.push(DrawCommand::Solid {
                first: overlay_start as u32,
                count: (solid.len() - overlay_start) as u32,
            });
        }

        self.textured_vertices
            .upload(&ctx.device, &ctx.queue, bytemuck::cast_slice(&textured));
        self.solid_vertices
            .upload(&ctx.device, &ctx.queue, bytemuck::cast_slice(&solid));

        let output = ctx.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(ctx.label),
            });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("quad-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for command in &commands {
                match *command {
                    DrawCommand::Textured { id, first } => {
                        let Some(cached) = self.textures.get(&id) else {
                            continue;
                        };
                        pass.set_pipeline(&self.textured_pipeline);
                        pass.set_bind_group(0, &cached.bind_group, &[]);
                        pass.set_vertex_buffer(0, self.textured_vertices.buffer.slice(..));
                        pass.draw(first..first + 6, 0..1);
                    }
                    DrawCommand::Solid { first, count } => {
                        pass.set_pipeline(&self.solid_pipeline);
                        pass.set_vertex_buffer(0, self.solid_vertices.buffer.slice(..));
                        pass.draw(first..first + count, 0..1);
                    }
                }
            }
        }

        ctx.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}

fn write_frame(queue: &Queue, texture: &Texture, frame: &Frame) {
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &frame.data,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(frame.width * 4),
            rows_per_image: Some(frame.height),
        },
        wgpu::Extent3d {
            width: frame.width,
            height: frame.height,
            depth_or_array_layers: 1,
        },
    );
}

fn create_vertex_buffer(device: &Device, label: &str, size: u64) -> Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn tex_entry(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::FRAGMENT,
        ty: BindingType::Texture {
            sample_type: TextureSampleType::Float { filterable: true },
            view_dimension: TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::FRAGMENT,
        ty: BindingType::Sampler(SamplerBindingType::Filtering),
        count: None,
    }
}

fn create_quad_pipeline(
    device: &Device,
    label: &str,
    source: &str,
    bind_group_layouts: &[&BindGroupLayout],
    vertex_layout: VertexBufferLayout<'_>,
    target_format: TextureFormat,
) -> RenderPipeline {
    let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
        label: Some(&format!("{label}-layout")),
        bind_group_layouts,
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&format!("{label}-pipeline")),
        layout: Some(&pipeline_layout),
        vertex: VertexState {
            module: &shader_module,
            entry_point: Some("vs_main"),
            buffers: &[vertex_layout],
            compilation_options: PipelineCompilationOptions::default(),
        },
        fragment: Some(FragmentState {
            module: &shader_module,
            entry_point: Some("fs_main"),
            targets: &[Some(ColorTargetState {
                format: target_format,
                blend: Some(BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: PipelineCompilationOptions::default(),
        }),
        primitive: PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}
