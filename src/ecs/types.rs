use crate::assets::SkeletonAsset;
use crate::ragdoll::JointKind;
use bevy_ecs::prelude::*;
use bitflags::bitflags;
use glam::{Mat4, Quat, Vec3};
use rapier3d::prelude::{ColliderHandle, ImpulseJointHandle, RigidBodyHandle};
use std::sync::Arc;

#[derive(Component, Clone, Copy, Debug)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform3D {
    fn default() -> Self {
        Self { translation: Vec3::ZERO, rotation: Quat::IDENTITY, scale: Vec3::ONE }
    }
}

impl Transform3D {
    pub fn from_translation(translation: Vec3) -> Self {
        Self { translation, ..Self::default() }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Velocity3D(pub Vec3);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EntityTypeFlags: u32 {
        /// Bone bodies are driven by the simulation instead of the animation.
        const DYNAMIC = 1 << 0;
        const SKELETAL = 1 << 1;
    }
}

#[derive(Component, Clone, Copy, Debug, Default)]
pub struct EntityType(pub EntityTypeFlags);

/// Skeleton attached to an entity together with its current pose.
#[derive(Component, Clone)]
pub struct SkeletonInstance {
    pub skeleton_key: Arc<str>,
    pub skeleton: Arc<SkeletonAsset>,
    /// Bone transforms relative to the parent bone.
    pub local_poses: Vec<Mat4>,
    /// Bone transforms relative to the entity.
    pub model_poses: Vec<Mat4>,
    dirty: bool,
}

impl SkeletonInstance {
    pub fn new(skeleton_key: Arc<str>, skeleton: Arc<SkeletonAsset>) -> Self {
        let count = skeleton.bone_count();
        let mut instance = Self {
            skeleton_key,
            skeleton,
            local_poses: vec![Mat4::IDENTITY; count],
            model_poses: vec![Mat4::IDENTITY; count],
            dirty: true,
        };
        instance.reset_to_rest_pose();
        instance
    }

    pub fn bone_count(&self) -> usize {
        self.skeleton.bone_count()
    }

    pub fn reset_to_rest_pose(&mut self) {
        for (pose, bone) in self.local_poses.iter_mut().zip(self.skeleton.bones.iter()) {
            *pose = bone.rest_local;
        }
        self.dirty = true;
        self.update_model_poses();
    }

    pub fn set_local_pose(&mut self, bone: usize, local: Mat4) -> bool {
        match self.local_poses.get_mut(bone) {
            Some(pose) => {
                *pose = local;
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Rebuilds model-space transforms from the local pose.
    pub fn update_model_poses(&mut self) {
        let count = self.bone_count();
        let mut resolved = vec![false; count];
        for index in 0..count {
            self.resolve_model_pose(index, &mut resolved);
        }
        self.dirty = false;
    }

    fn resolve_model_pose(&mut self, index: usize, resolved: &mut [bool]) {
        if resolved[index] {
            return;
        }
        // Parent indices were validated acyclic when the asset was built.
        let parent = self.skeleton.bones[index].parent.map(|p| p as usize);
        let base = match parent {
            Some(parent) => {
                self.resolve_model_pose(parent, resolved);
                self.model_poses[parent]
            }
            None => Mat4::IDENTITY,
        };
        self.model_poses[index] = base * self.local_poses[index];
        resolved[index] = true;
    }

    /// Replaces the model-space pose of every bone and re-derives local poses from it.
    pub fn set_model_poses(&mut self, poses: &[Mat4]) {
        for (target, pose) in self.model_poses.iter_mut().zip(poses) {
            *target = *pose;
        }
        for index in 0..self.bone_count() {
            let local = match self.skeleton.bones[index].parent {
                Some(parent) => self.model_poses[parent as usize].inverse() * self.model_poses[index],
                None => self.model_poses[index],
            };
            self.local_poses[index] = local;
        }
        self.dirty = false;
    }
}

/// Rigid bodies that follow each bone, indexed like the skeleton's bones.
#[derive(Component, Clone, Debug, Default)]
pub struct BoneBodies {
    pub bodies: Vec<Option<RigidBodyHandle>>,
    /// Sensor colliders used for character overlap tests; disabled while ragdolled.
    pub ghosts: Vec<Option<ColliderHandle>>,
}

impl BoneBodies {
    pub fn body(&self, bone: usize) -> Option<RigidBodyHandle> {
        self.bodies.get(bone).copied().flatten()
    }

    pub fn ghost(&self, bone: usize) -> Option<ColliderHandle> {
        self.ghosts.get(bone).copied().flatten()
    }

    pub fn handles(&self) -> impl Iterator<Item = (usize, RigidBodyHandle)> + '_ {
        self.bodies.iter().enumerate().filter_map(|(bone, body)| body.map(|handle| (bone, handle)))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RagdollLink {
    pub handle: ImpulseJointHandle,
    pub bone: u32,
    pub parent: u32,
    pub kind: JointKind,
}

/// Live ragdoll constraints on an entity.
#[derive(Component, Clone, Debug)]
pub struct RagdollJoints {
    pub links: Vec<RagdollLink>,
    pub hit_callback: String,
    pub body_count: usize,
    pub joint_cfm: f32,
    pub joint_erp: f32,
}
