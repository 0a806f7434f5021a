use crate::error::{CrowdError, Result};
use half::f16;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// A baked vertex-animation texture: one texel row per sampled animation
/// frame, one texel column per mesh vertex, rgba16f texels.
#[derive(Clone, Debug)]
pub struct VatImage {
    pub width: u32,
    pub height: u32,
    /// Row-major rgba texels, 4 components per pixel.
    pub texels: Vec<f16>,
}

impl VatImage {
    pub fn from_f32_rgba(width: u32, height: u32, data: &[f32]) -> Result<Self> {
        let expected = (width as usize) * (height as usize) * 4;
        if data.len() != expected {
            return Err(CrowdError::asset(format!(
                "texel data length {} does not match {width}x{height} rgba ({expected})",
                data.len()
            )));
        }
        Ok(Self { width, height, texels: data.iter().copied().map(f16::from_f32).collect() })
    }

    /// Decodes a baked texture from disk. `.hdr` carries full float texels;
    /// `.png` is accepted for bakers that wrote range-remapped LDR data.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let img = image::open(path)
            .map_err(|err| CrowdError::asset(format!("failed to decode {}: {err}", path.display())))?;
        let rgba = img.to_rgba32f();
        let (width, height) = rgba.dimensions();
        Self::from_f32_rgba(width, height, rgba.as_raw())
    }

    pub fn byte_data(&self) -> &[u8] {
        bytemuck::cast_slice(&self.texels)
    }

    /// Texels of one row, in column order.
    pub(crate) fn row(&self, y: u32) -> &[f16] {
        let stride = self.width as usize * 4;
        let start = y as usize * stride;
        &self.texels[start..start + stride]
    }
}

/// One baked animation clip as produced by the offline baker: a position
/// texture, a normal texture, a duration, and whether playback repeats.
#[derive(Clone, Debug)]
pub struct AnimationAsset {
    pub name: String,
    pub position: VatImage,
    pub normal: VatImage,
    pub duration_secs: f32,
    pub looping: bool,
}

impl AnimationAsset {
    pub fn validate(&self) -> Result<()> {
        if self.position.width == 0 || self.position.height == 0 {
            return Err(CrowdError::asset(format!(
                "animation '{}' has an empty position texture",
                self.name
            )));
        }
        if self.position.width != self.normal.width || self.position.height != self.normal.height {
            return Err(CrowdError::asset(format!(
                "animation '{}': position texture is {}x{} but normal texture is {}x{}",
                self.name, self.position.width, self.position.height, self.normal.width, self.normal.height
            )));
        }
        if !self.duration_secs.is_finite() || self.duration_secs < 0.0 {
            return Err(CrowdError::asset(format!(
                "animation '{}' has invalid duration {}",
                self.name, self.duration_secs
            )));
        }
        Ok(())
    }

    /// Rows of baked frames in this clip.
    pub fn frame_rows(&self) -> u32 {
        self.position.height
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ManifestEntry {
    name: String,
    position: String,
    normal: String,
    duration: f32,
    #[serde(default)]
    looping: bool,
}

/// Loads a set of animation assets from a JSON manifest. Texture paths are
/// resolved relative to the manifest file.
pub fn load_manifest(path: impl AsRef<Path>) -> Result<Vec<AnimationAsset>> {
    let path = path.as_ref();
    let bytes = fs::read(path)
        .map_err(|err| CrowdError::asset(format!("failed to read manifest {}: {err}", path.display())))?;
    let entries: Vec<ManifestEntry> = serde_json::from_slice(&bytes)
        .map_err(|err| CrowdError::asset(format!("failed to parse manifest {}: {err}", path.display())))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let mut assets = Vec::with_capacity(entries.len());
    for entry in entries {
        let asset = AnimationAsset {
            position: VatImage::load(base.join(&entry.position))?,
            normal: VatImage::load(base.join(&entry.normal))?,
            duration_secs: entry.duration,
            looping: entry.looping,
            name: entry.name,
        };
        asset.validate()?;
        assets.push(asset);
    }
    Ok(assets)
}

#[cfg(test)]
pub(crate) fn test_asset(
    name: &str,
    width: u32,
    height: u32,
    duration: f32,
    looping: bool,
) -> AnimationAsset {
    let data = vec![0.0f32; (width * height * 4) as usize];
    AnimationAsset {
        name: name.to_string(),
        position: VatImage::from_f32_rgba(width, height, &data).unwrap(),
        normal: VatImage::from_f32_rgba(width, height, &data).unwrap(),
        duration_secs: duration,
        looping,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_f32_rejects_wrong_length() {
        let err = VatImage::from_f32_rgba(2, 2, &[0.0; 5]).unwrap_err();
        assert!(matches!(err, CrowdError::Asset(_)));
    }

    #[test]
    fn validate_rejects_mismatched_textures() {
        let pos = VatImage::from_f32_rgba(2, 4, &vec![0.0; 32]).unwrap();
        let nml = VatImage::from_f32_rgba(2, 2, &vec![0.0; 16]).unwrap();
        let asset = AnimationAsset {
            name: "walk".into(),
            position: pos,
            normal: nml,
            duration_secs: 1.0,
            looping: false,
        };
        let err = asset.validate().unwrap_err();
        assert!(err.to_string().contains("walk"), "error should name the offending clip: {err}");
    }

    #[test]
    fn validate_rejects_negative_duration() {
        let mut asset = test_asset("idle", 2, 2, 1.0, true);
        asset.duration_secs = -0.5;
        assert!(asset.validate().is_err());
    }
}
