use crate::assets::{AnimationAsset, VatImage};
use crate::error::{CrowdError, Result};
use half::f16;

/// All baked animation clips stacked vertically into one addressable texture
/// region, with per-entry row offsets normalized to the atlas height.
///
/// Entry 0 is by convention the canonical idle animation that non-looping
/// playback falls back to when it finishes.
#[derive(Clone, Debug)]
pub struct AnimationAtlas {
    position: VatImage,
    normal: VatImage,
    start_offsets: Vec<f32>,
    end_offsets: Vec<f32>,
    durations_secs: Vec<f32>,
    loopings: Vec<bool>,
}

impl AnimationAtlas {
    /// Builds the atlas by vertical concatenation, preserving column order.
    /// Pure function of its input: the same assets always produce the same
    /// atlas.
    pub fn build(assets: &[AnimationAsset]) -> Result<Self> {
        if assets.is_empty() {
            return Err(CrowdError::EmptyInput("animation atlas needs at least one asset"));
        }
        let width = assets[0].position.width;
        let mut total_height: u32 = 0;
        for asset in assets {
            asset.validate()?;
            if asset.position.width != width {
                return Err(CrowdError::invalid_argument(format!(
                    "animation '{}' is {} texels wide but the atlas is {} texels wide",
                    asset.name, asset.position.width, width
                )));
            }
            total_height += asset.position.height;
        }

        let position = stack_images(assets, width, total_height, |a| &a.position);
        let normal = stack_images(assets, width, total_height, |a| &a.normal);

        let atlas_height = total_height as f32;
        let mut start_offsets = Vec::with_capacity(assets.len());
        let mut end_offsets = Vec::with_capacity(assets.len());
        let mut durations_secs = Vec::with_capacity(assets.len());
        let mut loopings = Vec::with_capacity(assets.len());
        let mut rows_before: u32 = 0;
        for asset in assets {
            let height = asset.position.height;
            start_offsets.push(rows_before as f32 / atlas_height);
            end_offsets.push((rows_before + height - 1) as f32 / atlas_height);
            durations_secs.push(asset.duration_secs);
            loopings.push(asset.looping);
            rows_before += height;
        }

        Ok(Self { position, normal, start_offsets, end_offsets, durations_secs, loopings })
    }

    pub fn entry_count(&self) -> usize {
        self.start_offsets.len()
    }

    pub fn width(&self) -> u32 {
        self.position.width
    }

    pub fn height(&self) -> u32 {
        self.position.height
    }

    /// Normalized row of the entry's first baked frame.
    pub fn start_offset(&self, entry: usize) -> f32 {
        self.start_offsets[entry]
    }

    /// Normalized row of the entry's last valid baked frame. The shader maps
    /// the elapsed-time fraction into `[start_offset, end_offset]`.
    pub fn end_offset(&self, entry: usize) -> f32 {
        self.end_offsets[entry]
    }

    pub fn duration_secs(&self, entry: usize) -> f32 {
        self.durations_secs[entry]
    }

    pub fn looping(&self, entry: usize) -> bool {
        self.loopings[entry]
    }

    pub fn position_image(&self) -> &VatImage {
        &self.position
    }

    pub fn normal_image(&self) -> &VatImage {
        &self.normal
    }

    /// Uploads the stacked position/normal images as rgba16f textures.
    pub fn upload(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> AtlasTextures {
        let position = upload_image(device, queue, &self.position, "VAT Position Atlas");
        let normal = upload_image(device, queue, &self.normal, "VAT Normal Atlas");
        let position_view = position.create_view(&wgpu::TextureViewDescriptor::default());
        let normal_view = normal.create_view(&wgpu::TextureViewDescriptor::default());
        AtlasTextures { position, normal, position_view, normal_view }
    }
}

/// GPU-side atlas textures, shared read-only by the draw pipeline.
pub struct AtlasTextures {
    pub position: wgpu::Texture,
    pub normal: wgpu::Texture,
    pub position_view: wgpu::TextureView,
    pub normal_view: wgpu::TextureView,
}

fn stack_images<'a>(
    assets: &'a [AnimationAsset],
    width: u32,
    total_height: u32,
    select: impl Fn(&'a AnimationAsset) -> &'a VatImage,
) -> VatImage {
    let mut texels: Vec<f16> = Vec::with_capacity((width * total_height * 4) as usize);
    for asset in assets {
        let image = select(asset);
        for y in 0..image.height {
            texels.extend_from_slice(image.row(y));
        }
    }
    VatImage { width, height: total_height, texels }
}

fn upload_image(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    image: &VatImage,
    label: &str,
) -> wgpu::Texture {
    let size = wgpu::Extent3d { width: image.width, height: image.height, depth_or_array_layers: 1 };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba16Float,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        image.byte_data(),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(image.width * 8),
            rows_per_image: Some(image.height),
        },
        size,
    );
    texture
}
