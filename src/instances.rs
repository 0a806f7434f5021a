use crate::atlas::AnimationAtlas;
use crate::error::{CrowdError, Result};
use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Per-instance playback record, laid out exactly as the draw shader reads
/// it: 13 floats + 1 u32, 56 bytes, instanced vertex stride.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceRecord {
    pub position: [f32; 3],
    /// Euler angles in radians, matching the shader's rotation math.
    pub rotation: [f32; 3],
    pub scale: [f32; 3],
    /// Normalized atlas row of the current animation's first frame.
    pub anim_offset: f32,
    pub anim_duration: f32,
    /// Normalized atlas row of the current animation's last frame.
    pub anim_scale: f32,
    /// 0 while a one-shot entry animation plays, 1 once looping.
    pub looping: u32,
    pub elapsed: f32,
}

impl InstanceRecord {
    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<InstanceRecord>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 3,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: 12,
                    shader_location: 4,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: 24,
                    shader_location: 5,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: 36,
                    shader_location: 6,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: 48,
                    shader_location: 7,
                    format: wgpu::VertexFormat::Uint32,
                },
                wgpu::VertexAttribute {
                    offset: 52,
                    shader_location: 8,
                    format: wgpu::VertexFormat::Float32,
                },
            ],
        }
    }
}

/// World transform the host supplies for one instance each frame. The host
/// keeps ownership; the engine only copies these into its records.
#[derive(Clone, Copy, Debug, Default)]
pub struct InstanceTransform {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

/// Fixed-capacity, index-addressed store of instance playback records. Sized
/// once at initialization; changing the instance count means rebuilding.
#[derive(Debug)]
pub struct InstanceStore {
    records: Vec<InstanceRecord>,
    atlas_entries: usize,
}

impl InstanceStore {
    /// Creates `count` records, each starting a pseudo-randomly chosen
    /// animation from the atlas. The choice is seeded per index (seed =
    /// index + 1) so repeated runs produce the same crowd.
    pub fn initialize(count: usize, atlas: &AnimationAtlas) -> Self {
        let entries = atlas.entry_count();
        let mut records = Vec::with_capacity(count);
        for index in 0..count {
            let mut rng = StdRng::seed_from_u64(index as u64 + 1);
            let entry = rng.gen_range(0..entries);
            records.push(InstanceRecord {
                position: [0.0; 3],
                rotation: [0.0; 3],
                scale: [1.0; 3],
                anim_offset: atlas.start_offset(entry),
                anim_duration: atlas.duration_secs(entry),
                anim_scale: atlas.end_offset(entry),
                looping: 0,
                elapsed: 0.0,
            });
        }
        Self { records, atlas_entries: entries }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn atlas_entry_count(&self) -> usize {
        self.atlas_entries
    }

    pub fn record(&self, index: usize) -> Result<&InstanceRecord> {
        self.records
            .get(index)
            .ok_or(CrowdError::OutOfRange { what: "instance", index, len: self.records.len() })
    }

    pub fn records(&self) -> &[InstanceRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [InstanceRecord] {
        &mut self.records
    }

    /// The packed byte view uploaded to the instance buffer.
    pub fn byte_data(&self) -> &[u8] {
        bytemuck::cast_slice(&self.records)
    }

    /// Swaps instance `index` onto atlas entry `entry`, overwriting only the
    /// animation fields and restarting playback; the transform fields are
    /// untouched. Fails without modifying anything when either index is out
    /// of range. Must be called between frames, never concurrently with the
    /// update stages.
    pub fn change_animation(
        &mut self,
        index: usize,
        entry: usize,
        atlas: &AnimationAtlas,
        looping: bool,
    ) -> Result<()> {
        if entry >= self.atlas_entries {
            return Err(CrowdError::OutOfRange {
                what: "animation",
                index: entry,
                len: self.atlas_entries,
            });
        }
        let len = self.records.len();
        let record = self
            .records
            .get_mut(index)
            .ok_or(CrowdError::OutOfRange { what: "instance", index, len })?;
        record.anim_offset = atlas.start_offset(entry);
        record.anim_scale = atlas.end_offset(entry);
        record.anim_duration = atlas.duration_secs(entry);
        record.looping = looping as u32;
        record.elapsed = 0.0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::test_asset;

    fn three_entry_atlas() -> AnimationAtlas {
        AnimationAtlas::build(&[
            test_asset("idle", 4, 4, 1.0, true),
            test_asset("walk", 4, 8, 2.0, false),
            test_asset("hit", 4, 4, 0.5, false),
        ])
        .unwrap()
    }

    #[test]
    fn initialize_produces_count_fresh_records() {
        let atlas = three_entry_atlas();
        let store = InstanceStore::initialize(128, &atlas);
        assert_eq!(store.len(), 128);
        for record in store.records() {
            assert_eq!(record.elapsed, 0.0);
            assert_eq!(record.looping, 0);
            assert!(record.anim_duration > 0.0);
        }
    }

    #[test]
    fn initialize_is_deterministic_per_index() {
        let atlas = three_entry_atlas();
        let a = InstanceStore::initialize(64, &atlas);
        let b = InstanceStore::initialize(64, &atlas);
        assert_eq!(a.records(), b.records(), "same seed per index must give the same crowd");
    }

    #[test]
    fn change_animation_updates_only_animation_fields() {
        let atlas = three_entry_atlas();
        let mut store = InstanceStore::initialize(4, &atlas);
        {
            let record = &mut store.records_mut()[2];
            record.position = [1.0, 2.0, 3.0];
            record.elapsed = 0.7;
        }
        store.change_animation(2, 1, &atlas, false).unwrap();
        let record = *store.record(2).unwrap();
        assert_eq!(record.position, [1.0, 2.0, 3.0], "transform fields stay untouched");
        assert_eq!(record.anim_offset, atlas.start_offset(1));
        assert_eq!(record.anim_scale, atlas.end_offset(1));
        assert_eq!(record.anim_duration, atlas.duration_secs(1));
        assert_eq!(record.looping, 0);
        assert_eq!(record.elapsed, 0.0);
    }

    #[test]
    fn change_animation_past_the_end_leaves_record_unchanged() {
        let atlas = three_entry_atlas();
        let mut store = InstanceStore::initialize(4, &atlas);
        let before = *store.record(1).unwrap();
        let err = store.change_animation(1, atlas.entry_count(), &atlas, true).unwrap_err();
        assert!(matches!(err, CrowdError::OutOfRange { what: "animation", .. }));
        assert_eq!(before, *store.record(1).unwrap());
    }

    #[test]
    fn change_animation_checks_instance_bounds() {
        let atlas = three_entry_atlas();
        let mut store = InstanceStore::initialize(2, &atlas);
        let err = store.change_animation(2, 0, &atlas, true).unwrap_err();
        assert!(matches!(err, CrowdError::OutOfRange { what: "instance", .. }));
    }

    #[test]
    fn record_stride_matches_shader_contract() {
        assert_eq!(std::mem::size_of::<InstanceRecord>(), 13 * 4 + 4);
    }
}
