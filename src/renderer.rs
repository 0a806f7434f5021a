pub mod vat_pass;

use crate::engine::Crowd;
use crate::error::{CrowdError, Result};
use glam::Mat4;

pub use vat_pass::VatPass;

/// Adapter/device acquisition for hosts that do not bring their own wgpu
/// setup (headless tools, bring-up scenes). Windowed hosts should pass in
/// the device and queue they already own instead.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    pub fn new_headless() -> anyhow::Result<Self> {
        pollster::block_on(async {
            let instance = wgpu::Instance::default();
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await?;
            let device_desc = wgpu::DeviceDescriptor {
                label: Some("Crowd Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::default(),
            };
            let (device, queue) = adapter.request_device(&device_desc).await?;
            Ok(Self { device, queue })
        })
    }
}

/// Indirect draw-argument record: five u32 words read by the GPU instead of
/// the CPU call site. The fifth word (first instance) is reserved and stays
/// zero in this design.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct IndirectArgs {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: u32,
    pub first_instance: u32,
}

/// GPU half of the sync facade: couples a `Crowd` with the VAT draw pass,
/// uploading the instance array and draw arguments each frame and issuing a
/// single indirect instanced draw.
pub struct CrowdRenderer {
    pass: Option<VatPass>,
    clear_color: wgpu::Color,
}

impl CrowdRenderer {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        surface_format: wgpu::TextureFormat,
        mesh: &crate::mesh::CrowdMesh,
        crowd: &Crowd,
    ) -> Result<Self> {
        let config = crowd.config();
        let atlas_textures = crowd.atlas()?.upload(device, queue);
        let subset = mesh.subset(config.submesh_index)?;
        let pass = VatPass::new(device, surface_format, mesh, subset, &atlas_textures)?;
        let [r, g, b, a] = config.clear_color;
        Ok(Self { pass: Some(pass), clear_color: wgpu::Color { r, g, b, a } })
    }

    /// Full-replace upload of the per-frame buffers. Must follow a completed
    /// `Crowd::update`; the pipeline never uploads mid-update state.
    pub fn sync(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, crowd: &Crowd, view_proj: Mat4) -> Result<()> {
        let pass = self.pass.as_mut().ok_or(CrowdError::ResourceState("crowd renderer"))?;
        pass.write_globals(queue, view_proj)?;
        pass.upload_instances(device, queue, crowd.instance_bytes()?)?;
        pass.write_instance_count(queue, crowd.renderable_count()? as u32)?;
        Ok(())
    }

    pub fn encode(&self, render_pass: &mut wgpu::RenderPass<'_>) -> Result<()> {
        let pass = self.pass.as_ref().ok_or(CrowdError::ResourceState("crowd renderer"))?;
        pass.encode(render_pass)
    }

    /// Convenience single-pass frame: clears the target, encodes the
    /// indirect draw, and submits one command buffer.
    pub fn frame(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        target: &wgpu::TextureView,
        crowd: &Crowd,
        view_proj: Mat4,
    ) -> Result<()> {
        self.sync(device, queue, crowd, view_proj)?;
        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Crowd Encoder") });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Crowd Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            self.encode(&mut render_pass)?;
        }
        queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.pass.is_none()
    }

    /// Drops every GPU-side buffer and the pipeline. Safe to call twice.
    pub fn release(&mut self) {
        if let Some(pass) = self.pass.take() {
            drop(pass);
        }
    }
}
