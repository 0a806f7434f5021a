//! Per-frame update stages over the instance store. Every stage is a
//! data-parallel loop with no cross-instance communication; the facade runs
//! them strictly in sequence and each runs to completion before the next
//! starts (the transition stage must observe time as accumulated through the
//! previous frame, so transitions always run before the time advance).

use crate::atlas::AnimationAtlas;
use crate::error::{CrowdError, Result};
use crate::instances::{InstanceStore, InstanceTransform};
use glam::Vec3;
use rayon::prelude::*;

/// Copies host-owned world transforms into the records at matching indices.
/// A length mismatch is a hard failure, never a silent partial copy.
pub fn sync_transforms(store: &mut InstanceStore, transforms: &[InstanceTransform]) -> Result<()> {
    if transforms.len() != store.len() {
        return Err(CrowdError::invalid_argument(format!(
            "{} transforms supplied for {} instances",
            transforms.len(),
            store.len()
        )));
    }
    store.records_mut().par_iter_mut().zip(transforms.par_iter()).for_each(|(record, transform)| {
        record.position = transform.position.to_array();
        record.rotation = transform.rotation.to_array();
        record.scale = transform.scale.to_array();
    });
    Ok(())
}

/// The two-state playback automaton, evaluated once per instance per frame.
///
/// Playing (`looping == 0`) moves to Looping when its one-shot animation has
/// run out, snapping onto atlas entry 0 with a fresh clock. Looping never
/// leaves on its own; only an explicit `change_animation` re-enters Playing.
/// A zero-duration animation finishes on its very next evaluation.
pub fn apply_loop_transitions(store: &mut InstanceStore, atlas: &AnimationAtlas) {
    let idle_offset = atlas.start_offset(0);
    let idle_scale = atlas.end_offset(0);
    let idle_duration = atlas.duration_secs(0);
    store.records_mut().par_iter_mut().for_each(|record| {
        if record.looping != 0 {
            return;
        }
        if record.elapsed >= record.anim_duration {
            record.anim_offset = idle_offset;
            record.anim_scale = idle_scale;
            record.anim_duration = idle_duration;
            record.looping = 1;
            record.elapsed = 0.0;
        }
    });
}

/// Advances every instance's playback clock. No clamping: looping playback
/// relies on the shader taking the elapsed time modulo the duration.
pub fn advance_playback(store: &mut InstanceStore, dt_secs: f32) {
    store.records_mut().par_iter_mut().for_each(|record| {
        record.elapsed += dt_secs;
    });
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetailLevel {
    Full,
    Reduced,
}

/// Output of the visibility classification, reused across frames so the
/// per-frame work is two parallel fills with no allocation in steady state.
#[derive(Debug, Default)]
pub struct CullOutput {
    /// Per-instance classification, index-aligned with the store.
    pub classes: Vec<DetailLevel>,
    /// Indices of instances needing full-detail rendering. Unordered.
    pub full_detail: Vec<u32>,
}

impl CullOutput {
    pub fn with_capacity(count: usize) -> Self {
        Self { classes: Vec::with_capacity(count), full_detail: Vec::with_capacity(count) }
    }
}

/// Classifies every instance against a squared-distance threshold around a
/// reference point (typically the viewer). Instances within the threshold
/// are marked full detail and their indices recorded; the rest are reduced
/// detail. Render order is not guaranteed and not required.
pub fn cull_by_distance(
    store: &InstanceStore,
    reference: Vec3,
    max_distance_sq: f32,
    out: &mut CullOutput,
) {
    store
        .records()
        .par_iter()
        .map(|record| {
            let delta = Vec3::from_array(record.position) - reference;
            if delta.length_squared() <= max_distance_sq {
                DetailLevel::Full
            } else {
                DetailLevel::Reduced
            }
        })
        .collect_into_vec(&mut out.classes);

    out.full_detail.clear();
    out.full_detail.par_extend(
        out.classes
            .par_iter()
            .enumerate()
            .filter_map(|(index, class)| (*class == DetailLevel::Full).then(|| index as u32)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::test_asset;
    use crate::atlas::AnimationAtlas;

    fn atlas() -> AnimationAtlas {
        AnimationAtlas::build(&[
            test_asset("idle", 4, 4, 1.0, true),
            test_asset("walk", 4, 8, 2.0, false),
            test_asset("hit", 4, 4, 0.0, false),
        ])
        .unwrap()
    }

    #[test]
    fn sync_rejects_short_transform_slice() {
        let atlas = atlas();
        let mut store = InstanceStore::initialize(8, &atlas);
        let transforms = vec![InstanceTransform::default(); 7];
        let err = sync_transforms(&mut store, &transforms).unwrap_err();
        assert!(matches!(err, CrowdError::InvalidArgument(_)));
    }

    #[test]
    fn sync_copies_each_transform_to_its_index() {
        let atlas = atlas();
        let mut store = InstanceStore::initialize(3, &atlas);
        let transforms: Vec<InstanceTransform> = (0..3)
            .map(|i| InstanceTransform {
                position: Vec3::splat(i as f32),
                rotation: Vec3::new(0.0, i as f32 * 0.5, 0.0),
                scale: Vec3::ONE,
            })
            .collect();
        sync_transforms(&mut store, &transforms).unwrap();
        for (i, record) in store.records().iter().enumerate() {
            assert_eq!(record.position, [i as f32; 3]);
            assert_eq!(record.rotation[1], i as f32 * 0.5);
        }
    }

    #[test]
    fn playing_transitions_to_idle_when_time_runs_out() {
        let atlas = atlas();
        let mut store = InstanceStore::initialize(1, &atlas);
        store.change_animation(0, 1, &atlas, false).unwrap();
        advance_playback(&mut store, 2.0);
        apply_loop_transitions(&mut store, &atlas);
        let record = store.record(0).unwrap();
        assert_eq!(record.looping, 1);
        assert_eq!(record.elapsed, 0.0);
        assert_eq!(record.anim_offset, atlas.start_offset(0));
        assert_eq!(record.anim_scale, atlas.end_offset(0));
        assert_eq!(record.anim_duration, atlas.duration_secs(0));
    }

    #[test]
    fn playing_holds_until_duration_is_reached() {
        let atlas = atlas();
        let mut store = InstanceStore::initialize(1, &atlas);
        store.change_animation(0, 1, &atlas, false).unwrap();
        advance_playback(&mut store, 1.9);
        apply_loop_transitions(&mut store, &atlas);
        let record = store.record(0).unwrap();
        assert_eq!(record.looping, 0, "walk still has 0.1s left");
        assert_eq!(record.anim_offset, atlas.start_offset(1));
    }

    #[test]
    fn zero_duration_animation_fires_on_next_evaluation() {
        let atlas = atlas();
        let mut store = InstanceStore::initialize(1, &atlas);
        store.change_animation(0, 2, &atlas, false).unwrap();
        apply_loop_transitions(&mut store, &atlas);
        assert_eq!(store.record(0).unwrap().looping, 1);
    }

    #[test]
    fn looping_instances_never_leave_on_their_own() {
        let atlas = atlas();
        let mut store = InstanceStore::initialize(1, &atlas);
        store.change_animation(0, 0, &atlas, true).unwrap();
        advance_playback(&mut store, 100.0);
        apply_loop_transitions(&mut store, &atlas);
        let record = store.record(0).unwrap();
        assert_eq!(record.looping, 1);
        assert!(record.elapsed >= 100.0, "looping time grows unboundedly");
    }

    #[test]
    fn cull_marks_near_instances_and_collects_their_indices() {
        let atlas = atlas();
        let mut store = InstanceStore::initialize(4, &atlas);
        let transforms = vec![
            InstanceTransform { position: Vec3::ZERO, scale: Vec3::ONE, ..Default::default() },
            InstanceTransform { position: Vec3::new(10.0, 0.0, 0.0), scale: Vec3::ONE, ..Default::default() },
            InstanceTransform { position: Vec3::new(0.0, 0.0, 3.0), scale: Vec3::ONE, ..Default::default() },
            InstanceTransform { position: Vec3::new(0.0, 50.0, 0.0), scale: Vec3::ONE, ..Default::default() },
        ];
        sync_transforms(&mut store, &transforms).unwrap();
        let mut out = CullOutput::with_capacity(store.len());
        cull_by_distance(&store, Vec3::ZERO, 25.0, &mut out);
        assert_eq!(out.classes.len(), 4);
        assert_eq!(out.classes[0], DetailLevel::Full);
        assert_eq!(out.classes[1], DetailLevel::Reduced);
        assert_eq!(out.classes[2], DetailLevel::Full);
        assert_eq!(out.classes[3], DetailLevel::Reduced);
        let mut indices = out.full_detail.clone();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn boundary_distance_counts_as_full_detail() {
        let atlas = atlas();
        let mut store = InstanceStore::initialize(1, &atlas);
        let transforms =
            vec![InstanceTransform { position: Vec3::new(5.0, 0.0, 0.0), scale: Vec3::ONE, ..Default::default() }];
        sync_transforms(&mut store, &transforms).unwrap();
        let mut out = CullOutput::default();
        cull_by_distance(&store, Vec3::ZERO, 25.0, &mut out);
        assert_eq!(out.classes[0], DetailLevel::Full, "distance equal to the threshold is near");
    }
}
