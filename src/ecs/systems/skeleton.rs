use crate::ecs::physics::{iso_from_mat4, RapierState};
use crate::ecs::types::*;
use bevy_ecs::prelude::*;
use glam::Mat4;

/// Moves the bodies of animated skeletons towards the current bone pose.
pub fn sys_drive_kinematic_bones(
    mut rapier: ResMut<RapierState>,
    mut query: Query<(&Transform3D, &mut SkeletonInstance, &BoneBodies, &EntityType)>,
) {
    for (transform, mut skeleton, bodies, kind) in &mut query {
        if kind.0.contains(EntityTypeFlags::DYNAMIC) {
            continue;
        }
        if skeleton.is_dirty() {
            skeleton.update_model_poses();
        }
        let entity_matrix = transform.matrix();
        for (bone, handle) in bodies.handles() {
            if let Some(model) = skeleton.model_poses.get(bone) {
                rapier.drive_kinematic(handle, iso_from_mat4(entity_matrix * *model));
            }
        }
    }
}

/// Writes simulated bone bodies back into the pose of ragdolled skeletons.
pub fn sys_sync_ragdoll_pose(
    rapier: Res<RapierState>,
    mut query: Query<(&Transform3D, &mut SkeletonInstance, &BoneBodies, &EntityType)>,
) {
    for (transform, mut skeleton, bodies, kind) in &mut query {
        if !kind.0.contains(EntityTypeFlags::DYNAMIC) {
            continue;
        }
        let inverse = transform.matrix().inverse();
        let mut poses: Vec<Mat4> = skeleton.model_poses.clone();
        for (bone, handle) in bodies.handles() {
            let Some(body) = rapier.body(handle) else {
                continue;
            };
            if !body.is_dynamic() {
                continue;
            }
            if let (Some(pose), Some(world)) = (poses.get_mut(bone), rapier.body_pose(handle)) {
                *pose = inverse * world;
            }
        }
        skeleton.set_model_poses(&poses);
    }
}
