use crate::assets::AnimationAsset;
use crate::atlas::AnimationAtlas;
use crate::config::CrowdConfig;
use crate::error::{CrowdError, Result};
use crate::instances::{InstanceStore, InstanceTransform};
use crate::stages::{self, CullOutput};
use glam::Vec3;

/// What one `update` did, mostly for the host's diagnostics.
#[derive(Clone, Copy, Debug)]
pub struct FrameStats {
    pub instance_count: usize,
    /// Instances the indirect draw will render this frame.
    pub renderable_count: usize,
    pub culled: bool,
}

#[derive(Debug)]
struct CrowdState {
    atlas: AnimationAtlas,
    store: InstanceStore,
    cull: CullOutput,
    /// Compacted records for upload when culling shrank the renderable set.
    compacted: Vec<crate::instances::InstanceRecord>,
    culled_this_frame: bool,
}

/// CPU side of the per-frame sync facade: owns the instance store and the
/// atlas metadata, runs the update pipeline in its contractual order, and
/// exposes the packed bytes the GPU half uploads.
///
/// `release` is idempotent; every other operation fails with a
/// `ResourceState` error once the crowd is released.
#[derive(Debug)]
pub struct Crowd {
    state: Option<CrowdState>,
    config: CrowdConfig,
}

impl Crowd {
    /// Builds the atlas from the baked assets and populates `count` instance
    /// records. Reinitializing with a different count means constructing a
    /// new `Crowd`; there is no partial resize.
    pub fn initialize(count: usize, assets: &[AnimationAsset], config: CrowdConfig) -> Result<Self> {
        let atlas = AnimationAtlas::build(assets)?;
        let store = InstanceStore::initialize(count, &atlas);
        let cull = CullOutput::with_capacity(count);
        let compacted = Vec::with_capacity(count);
        Ok(Self {
            state: Some(CrowdState { atlas, store, cull, compacted, culled_this_frame: false }),
            config,
        })
    }

    pub fn config(&self) -> &CrowdConfig {
        &self.config
    }

    /// Runs one frame of the update pipeline: transform sync, loop
    /// transitions (against time accumulated through the previous frame),
    /// time advance, then optional distance culling when a reference point
    /// is supplied and culling is enabled.
    pub fn update(
        &mut self,
        dt_secs: f32,
        transforms: &[InstanceTransform],
        reference: Option<Vec3>,
    ) -> Result<FrameStats> {
        let state = self.state.as_mut().ok_or(CrowdError::ResourceState("crowd"))?;
        if dt_secs < 0.0 {
            eprintln!("[crowd] negative frame delta {dt_secs}; playback clocks will rewind");
        }
        stages::sync_transforms(&mut state.store, transforms)?;
        stages::apply_loop_transitions(&mut state.store, &state.atlas);
        stages::advance_playback(&mut state.store, dt_secs);

        state.culled_this_frame = false;
        if self.config.cull.enabled {
            if let Some(reference) = reference {
                stages::cull_by_distance(
                    &state.store,
                    reference,
                    self.config.cull.max_distance_sq(),
                    &mut state.cull,
                );
                state.compacted.clear();
                state
                    .compacted
                    .extend(state.cull.full_detail.iter().map(|&i| state.store.records()[i as usize]));
                state.culled_this_frame = true;
            }
        }

        let instance_count = state.store.len();
        let renderable_count =
            if state.culled_this_frame { state.compacted.len() } else { instance_count };
        Ok(FrameStats { instance_count, renderable_count, culled: state.culled_this_frame })
    }

    /// Swaps one instance onto another atlas entry between frames.
    pub fn change_animation(&mut self, index: usize, animation: usize, looping: bool) -> Result<()> {
        let state = self.state.as_mut().ok_or(CrowdError::ResourceState("crowd"))?;
        let CrowdState { store, atlas, .. } = state;
        store.change_animation(index, animation, atlas, looping)
    }

    pub fn atlas(&self) -> Result<&AnimationAtlas> {
        self.state.as_ref().map(|s| &s.atlas).ok_or(CrowdError::ResourceState("crowd"))
    }

    pub fn store(&self) -> Result<&InstanceStore> {
        self.state.as_ref().map(|s| &s.store).ok_or(CrowdError::ResourceState("crowd"))
    }

    /// Indices classified full-detail by the most recent culled update.
    pub fn full_detail_indices(&self) -> Result<&[u32]> {
        self.state
            .as_ref()
            .map(|s| s.cull.full_detail.as_slice())
            .ok_or(CrowdError::ResourceState("crowd"))
    }

    /// Number of instances the indirect draw renders this frame.
    pub fn renderable_count(&self) -> Result<usize> {
        let state = self.state.as_ref().ok_or(CrowdError::ResourceState("crowd"))?;
        if state.culled_this_frame {
            Ok(state.compacted.len())
        } else {
            Ok(state.store.len())
        }
    }

    /// Packed instance bytes for the full-replace buffer upload: the whole
    /// store normally, or just the full-detail records after a culled frame.
    pub fn instance_bytes(&self) -> Result<&[u8]> {
        let state = self.state.as_ref().ok_or(CrowdError::ResourceState("crowd"))?;
        if state.culled_this_frame {
            Ok(bytemuck::cast_slice(&state.compacted))
        } else {
            Ok(state.store.byte_data())
        }
    }

    pub fn is_released(&self) -> bool {
        self.state.is_none()
    }

    /// Discards the instance array and atlas. Safe to call more than once.
    pub fn release(&mut self) {
        self.state = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::test_asset;

    fn assets() -> Vec<AnimationAsset> {
        vec![
            test_asset("idle", 4, 4, 1.0, true),
            test_asset("walk", 4, 8, 2.0, false),
            test_asset("hit", 4, 4, 0.5, false),
        ]
    }

    fn transforms(count: usize) -> Vec<InstanceTransform> {
        vec![InstanceTransform { scale: Vec3::ONE, ..Default::default() }; count]
    }

    #[test]
    fn release_twice_is_a_no_op() {
        let mut crowd = Crowd::initialize(8, &assets(), CrowdConfig::default()).unwrap();
        crowd.release();
        crowd.release();
        assert!(crowd.is_released());
    }

    #[test]
    fn update_after_release_fails_cleanly() {
        let mut crowd = Crowd::initialize(8, &assets(), CrowdConfig::default()).unwrap();
        crowd.release();
        let err = crowd.update(0.016, &transforms(8), None).unwrap_err();
        assert!(matches!(err, CrowdError::ResourceState(_)));
        let err = crowd.change_animation(0, 0, true).unwrap_err();
        assert!(matches!(err, CrowdError::ResourceState(_)));
    }

    #[test]
    fn update_renders_everything_without_a_reference_point() {
        let mut config = CrowdConfig::default();
        config.cull.enabled = true;
        let mut crowd = Crowd::initialize(16, &assets(), config).unwrap();
        let stats = crowd.update(0.016, &transforms(16), None).unwrap();
        assert!(!stats.culled);
        assert_eq!(stats.renderable_count, 16);
    }

    #[test]
    fn culled_update_shrinks_the_renderable_count() {
        let mut config = CrowdConfig::default();
        config.cull.enabled = true;
        config.cull.distance = 5.0;
        let mut crowd = Crowd::initialize(3, &assets(), config).unwrap();
        let transforms = vec![
            InstanceTransform { position: Vec3::ZERO, scale: Vec3::ONE, ..Default::default() },
            InstanceTransform {
                position: Vec3::new(100.0, 0.0, 0.0),
                scale: Vec3::ONE,
                ..Default::default()
            },
            InstanceTransform { position: Vec3::new(1.0, 0.0, 1.0), scale: Vec3::ONE, ..Default::default() },
        ];
        let stats = crowd.update(0.016, &transforms, Some(Vec3::ZERO)).unwrap();
        assert!(stats.culled);
        assert_eq!(stats.instance_count, 3);
        assert_eq!(stats.renderable_count, 2);
        let bytes = crowd.instance_bytes().unwrap();
        assert_eq!(bytes.len(), 2 * std::mem::size_of::<crate::instances::InstanceRecord>());
    }

    #[test]
    fn failed_update_does_not_corrupt_state() {
        let mut crowd = Crowd::initialize(4, &assets(), CrowdConfig::default()).unwrap();
        crowd.update(0.5, &transforms(4), None).unwrap();
        let before: Vec<_> = crowd.store().unwrap().records().to_vec();
        let err = crowd.update(0.5, &transforms(3), None).unwrap_err();
        assert!(matches!(err, CrowdError::InvalidArgument(_)));
        assert_eq!(before, crowd.store().unwrap().records().to_vec());
    }
}
