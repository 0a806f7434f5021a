use crate::atlas::AtlasTextures;
use crate::error::{CrowdError, Result};
use crate::instances::InstanceRecord;
use crate::mesh::{CrowdMesh, CrowdVertex, MeshSubset};
use glam::Mat4;
use wgpu::util::DeviceExt;

use super::IndirectArgs;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Globals {
    view_proj: [[f32; 4]; 4],
}

/// The VAT draw pass: one pipeline sampling the stacked position/normal
/// atlas, one static mesh, one instanced vertex buffer, and one
/// draw-argument buffer consumed by `draw_indexed_indirect`.
pub struct VatPass {
    pipeline: wgpu::RenderPipeline,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    globals_buf: wgpu::Buffer,
    globals_bg: wgpu::BindGroup,
    atlas_bg: wgpu::BindGroup,
    instance_buffer: Option<wgpu::Buffer>,
    instance_capacity: usize,
    args_buffer: wgpu::Buffer,
    args: IndirectArgs,
}

impl VatPass {
    pub fn new(
        device: &wgpu::Device,
        surface_format: wgpu::TextureFormat,
        mesh: &CrowdMesh,
        subset: &MeshSubset,
        atlas: &AtlasTextures,
    ) -> Result<Self> {
        if mesh.vertices.is_empty() || mesh.indices.is_empty() {
            return Err(CrowdError::invalid_argument("instanced mesh has no geometry".to_string()));
        }

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("VAT Shader"),
            source: wgpu::ShaderSource::Wgsl(
                include_str!("../../assets/shaders/vat_instanced.wgsl").into(),
            ),
        });

        let globals_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("VAT Globals BGL"),
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
        });
        let globals_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("VAT Globals Buffer"),
            size: std::mem::size_of::<Globals>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let globals_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("VAT Globals BG"),
            layout: &globals_bgl,
            entries: &[wgpu::BindGroupEntry { binding: 0, resource: globals_buf.as_entire_binding() }],
        });

        let atlas_texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: wgpu::TextureViewDimension::D2,
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
            },
            count: None,
        };
        let atlas_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("VAT Atlas BGL"),
            entries: &[atlas_texture_entry(0), atlas_texture_entry(1)],
        });
        let atlas_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("VAT Atlas BG"),
            layout: &atlas_bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&atlas.position_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&atlas.normal_view),
                },
            ],
        });

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Crowd Mesh VB"),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Crowd Mesh IB"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let args = IndirectArgs {
            index_count: subset.index_count,
            instance_count: 0,
            first_index: subset.index_offset,
            base_vertex: subset.base_vertex,
            first_instance: 0,
        };
        let args_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Crowd Draw Args"),
            contents: bytemuck::bytes_of(&args),
            usage: wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::COPY_DST,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("VAT Pipeline Layout"),
            bind_group_layouts: &[&globals_bgl, &atlas_bgl],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("VAT Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[CrowdVertex::layout(), InstanceRecord::layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: Some(wgpu::Face::Back),
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Ok(Self {
            pipeline,
            vertex_buffer,
            index_buffer,
            globals_buf,
            globals_bg,
            atlas_bg,
            instance_buffer: None,
            instance_capacity: 0,
            args_buffer,
            args,
        })
    }

    pub fn write_globals(&self, queue: &wgpu::Queue, view_proj: Mat4) -> Result<()> {
        queue.write_buffer(
            &self.globals_buf,
            0,
            bytemuck::bytes_of(&Globals { view_proj: view_proj.to_cols_array_2d() }),
        );
        Ok(())
    }

    /// Full-replace upload of the packed instance records. Growing the
    /// buffer swaps in a fresh allocation; wgpu reclaims the old one once
    /// in-flight frames retire.
    pub fn upload_instances(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, bytes: &[u8]) -> Result<()> {
        let count = bytes.len() / std::mem::size_of::<InstanceRecord>();
        self.ensure_instance_capacity(device, count);
        let buffer = self
            .instance_buffer
            .as_ref()
            .ok_or(CrowdError::ResourceState("instance buffer"))?;
        if !bytes.is_empty() {
            queue.write_buffer(buffer, 0, bytes);
        }
        Ok(())
    }

    /// Rewrites the draw-argument record with this frame's instance count.
    pub fn write_instance_count(&mut self, queue: &wgpu::Queue, instance_count: u32) -> Result<()> {
        self.args.instance_count = instance_count;
        queue.write_buffer(&self.args_buffer, 0, bytemuck::bytes_of(&self.args));
        Ok(())
    }

    /// Encodes the single indirect instanced draw.
    pub fn encode(&self, pass: &mut wgpu::RenderPass<'_>) -> Result<()> {
        let instance_buffer = self
            .instance_buffer
            .as_ref()
            .ok_or(CrowdError::ResourceState("instance buffer"))?;
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.globals_bg, &[]);
        pass.set_bind_group(1, &self.atlas_bg, &[]);
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        pass.set_vertex_buffer(1, instance_buffer.slice(..));
        pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed_indirect(&self.args_buffer, 0);
        Ok(())
    }

    fn ensure_instance_capacity(&mut self, device: &wgpu::Device, count: usize) {
        let required = count.max(1);
        if self.instance_capacity >= required && self.instance_buffer.is_some() {
            return;
        }
        let mut new_cap = self.instance_capacity.max(256);
        while new_cap < required {
            new_cap *= 2;
        }
        let buf_size = (new_cap * std::mem::size_of::<InstanceRecord>()) as u64;
        let new_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Crowd Instance Buffer"),
            size: buf_size,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.instance_buffer = Some(new_buf);
        self.instance_capacity = new_cap;
    }
}
