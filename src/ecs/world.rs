use super::*;
use crate::assets::AssetManager;
use crate::config::{RagdollConfig, RagdollTuning};
use crate::ecs::systems::{sys_drive_kinematic_bones, sys_step_rapier, sys_sync_ragdoll_pose, TimeDelta};
use crate::events::{EventBus, GameEvent};
use crate::ragdoll::{angular_limits, build_joint, JointInfo, RagdollError, RagdollInfo, RagdollSetup};
use anyhow::{anyhow, Result};
use bevy_ecs::prelude::{Entity, Schedule, World};
use bevy_ecs::schedule::IntoSystemConfigs;
use glam::{Mat4, Quat, Vec3};
use rapier3d::prelude::{InteractionGroups, RigidBodyHandle};
use std::sync::Arc;

/// Pose and state of one bone body, as reported to tools.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneBodySnapshot {
    pub bone: u32,
    pub translation: Vec3,
    pub rotation: Quat,
    pub linvel: Vec3,
    pub dynamic: bool,
    pub sleeping: bool,
}

// ---------- World container ----------
pub struct EcsWorld {
    pub world: World,
    schedule_fixed: Schedule,
    tuning: RagdollTuning,
}

impl Default for EcsWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl EcsWorld {
    pub fn new() -> Self {
        Self::with_config(&RagdollConfig::default())
    }

    pub fn with_config(config: &RagdollConfig) -> Self {
        let mut world = World::new();
        world.insert_resource(TimeDelta(0.0));
        let physics_params = PhysicsParams { gravity: Vec3::from_array(config.physics.gravity) };
        world.insert_resource(physics_params);
        world.insert_resource(RapierState::new(&physics_params));
        world.insert_resource(EventBus::default());

        let mut schedule_fixed = Schedule::default();
        schedule_fixed.add_systems((sys_drive_kinematic_bones, sys_step_rapier, sys_sync_ragdoll_pose).chain());

        Self { world, schedule_fixed, tuning: config.ragdoll.clone() }
    }

    pub fn insert_ground(&mut self, height: f32) -> RigidBodyHandle {
        self.world.resource_mut::<RapierState>().insert_ground(height)
    }

    pub fn fixed_step(&mut self, dt: f32) {
        self.world.resource_mut::<TimeDelta>().0 = dt;
        self.schedule_fixed.run(&mut self.world);
    }

    pub fn drain_events(&mut self) -> Vec<GameEvent> {
        self.world.resource_mut::<EventBus>().drain()
    }

    pub fn push_event(&mut self, event: GameEvent) {
        self.world.resource_mut::<EventBus>().push(event);
    }

    pub fn spawn_skeletal_entity(
        &mut self,
        assets: &AssetManager,
        skeleton_key: &str,
        transform: Transform3D,
        velocity: Vec3,
    ) -> Result<Entity> {
        let skeleton = assets
            .skeleton(skeleton_key)
            .ok_or_else(|| anyhow!("Skeleton '{skeleton_key}' not loaded"))?;
        if skeleton.bone_count() == 0 {
            return Err(anyhow!("Skeleton '{skeleton_key}' has no bones"));
        }
        let instance = SkeletonInstance::new(Arc::from(skeleton_key), skeleton);
        let entity = self
            .world
            .spawn((transform, Velocity3D(velocity), instance, EntityType(EntityTypeFlags::SKELETAL)))
            .id();
        Ok(entity)
    }

    /// Creates one kinematic body per bone, shaped by the bone's bounds.
    pub fn attach_bone_bodies(&mut self, entity: Entity, with_ghosts: bool) -> bool {
        if self.world.get::<BoneBodies>(entity).is_some() {
            return false;
        }
        let Some(transform) = self.world.get::<Transform3D>(entity).copied() else {
            return false;
        };
        if !self.update_bone_pose(entity) {
            return false;
        }
        let Some(instance) = self.world.get::<SkeletonInstance>(entity) else {
            return false;
        };
        let skeleton = Arc::clone(&instance.skeleton);
        let model_poses = instance.model_poses.clone();
        let entity_matrix = transform.matrix();
        // Body poses carry no scale, so the entity scale goes into the collider shapes.
        let scale = transform.scale.abs();

        let mut bodies = BoneBodies::default();
        {
            let mut rapier = self.world.resource_mut::<RapierState>();
            for (index, bone) in skeleton.bones.iter().enumerate() {
                let owner = ColliderOwner { entity, bone: index as u32 };
                let pose = iso_from_mat4(entity_matrix * model_poses[index]);
                let (body, _) = rapier.spawn_bone_body(
                    owner,
                    pose,
                    bone.bounds.half_extents() * scale,
                    bone.bounds.center() * transform.scale,
                );
                let ghost_radius = bone.bounds.inner_radius() * 0.5 * scale.min_element();
                let ghost = with_ghosts.then(|| rapier.spawn_ghost(owner, body, ghost_radius));
                bodies.bodies.push(Some(body));
                bodies.ghosts.push(ghost);
            }
        }
        log::debug!(target: "ragdoll", "attached {} bone bodies to entity {}", bodies.bodies.len(), entity.index());
        self.world.entity_mut(entity).insert(bodies);
        true
    }

    pub fn set_bone_local_pose(&mut self, entity: Entity, bone: usize, local: Mat4) -> bool {
        match self.world.get_mut::<SkeletonInstance>(entity) {
            Some(mut instance) => instance.set_local_pose(bone, local),
            None => false,
        }
    }

    /// Recomputes the model-space pose of every bone from the local pose.
    pub fn update_bone_pose(&mut self, entity: Entity) -> bool {
        match self.world.get_mut::<SkeletonInstance>(entity) {
            Some(mut instance) => {
                instance.update_model_poses();
                true
            }
            None => false,
        }
    }

    /// Teleports every bone body to the entity transform times the bone's model pose.
    pub fn sync_bodies_to_pose(&mut self, entity: Entity) -> bool {
        let Some(transform) = self.world.get::<Transform3D>(entity).copied() else {
            return false;
        };
        let (Some(instance), Some(bodies)) =
            (self.world.get::<SkeletonInstance>(entity), self.world.get::<BoneBodies>(entity))
        else {
            return false;
        };
        let entity_matrix = transform.matrix();
        let targets: Vec<_> = bodies
            .handles()
            .filter_map(|(bone, handle)| {
                instance.model_poses.get(bone).map(|model| (handle, iso_from_mat4(entity_matrix * *model)))
            })
            .collect();
        let mut rapier = self.world.resource_mut::<RapierState>();
        for (handle, pose) in targets {
            rapier.set_body_pose(handle, pose);
        }
        true
    }

    /// Turns the bone bodies of `entity` into a jointed ragdoll.
    ///
    /// Any failure leaves the entity animated, with no joints and every body
    /// kinematic again, and pushes [`GameEvent::RagdollFailed`].
    pub fn create_ragdoll(&mut self, entity: Entity, setup: &RagdollSetup) -> Result<(), RagdollError> {
        match self.try_create_ragdoll(entity, setup) {
            Ok(()) => {
                log::info!(
                    target: "ragdoll",
                    "ragdoll created on entity {} ({} bodies, {} joints)",
                    entity.index(),
                    setup.body_count(),
                    setup.joint_count()
                );
                self.push_event(GameEvent::RagdollCreated {
                    entity,
                    bodies: setup.body_count(),
                    joints: setup.joint_count(),
                });
                Ok(())
            }
            Err(err) => {
                log::warn!(target: "ragdoll", "ragdoll creation failed on entity {}: {err}", entity.index());
                self.push_event(GameEvent::RagdollFailed { entity, reason: err.to_string() });
                Err(err)
            }
        }
    }

    fn try_create_ragdoll(&mut self, entity: Entity, setup: &RagdollSetup) -> Result<(), RagdollError> {
        if !self.world.entities().contains(entity) {
            return Err(RagdollError::UnknownEntity(entity));
        }
        setup.validate()?;
        let Some(instance) = self.world.get::<SkeletonInstance>(entity) else {
            return Err(RagdollError::NoSkeleton);
        };
        let skeleton = Arc::clone(&instance.skeleton);
        let Some(bodies) = self.world.get::<BoneBodies>(entity).cloned() else {
            return Err(RagdollError::NoBoneBodies);
        };
        let bone_count = skeleton.bone_count();
        if setup.body_count() > bone_count {
            return Err(RagdollError::BodyCountOverflow { bodies: setup.body_count(), bones: bone_count });
        }

        if self.world.get::<RagdollJoints>(entity).is_some() {
            self.delete_ragdoll(entity)?;
        }
        self.update_bone_pose(entity);
        self.world.entity_mut(entity).insert(RagdollJoints {
            links: Vec::with_capacity(setup.joint_count()),
            hit_callback: setup.hit_callback.clone(),
            body_count: setup.body_count(),
            joint_cfm: setup.joint_cfm,
            joint_erp: setup.joint_erp,
        });

        let result = self.build_ragdoll(entity, setup, &skeleton, &bodies);
        if let Err(err) = result {
            self.teardown_ragdoll(entity);
            return Err(err);
        }
        if let Some(mut kind) = self.world.get_mut::<EntityType>(entity) {
            kind.0.insert(EntityTypeFlags::DYNAMIC);
        }
        Ok(())
    }

    fn build_ragdoll(
        &mut self,
        entity: Entity,
        setup: &RagdollSetup,
        skeleton: &crate::assets::SkeletonAsset,
        bodies: &BoneBodies,
    ) -> Result<(), RagdollError> {
        let sleep_threshold = self.tuning.sleep_threshold;
        let ccd_factor = self.tuning.ccd_prediction_factor;
        let mut first_error = None;
        {
            let mut rapier = self.world.resource_mut::<RapierState>();
            for (index, body_setup) in setup.bodies.iter().enumerate() {
                let Some(handle) = bodies.body(index) else {
                    first_error.get_or_insert(RagdollError::MissingBody(index));
                    continue;
                };
                let bone = &skeleton.bones[index];
                let ccd_prediction =
                    bone.parent.is_none().then(|| bone.bounds.inner_radius() * ccd_factor).filter(|d| *d > 0.0);
                let props = DynamicBodyProps {
                    mass: body_setup.mass,
                    restitution: body_setup.restitution,
                    friction: body_setup.friction,
                    linear_damping: body_setup.damping[0].clamp(0.0, 1.0),
                    angular_damping: body_setup.damping[1].clamp(0.0, 1.0),
                    sleep_threshold,
                    ccd_prediction,
                };
                // Massless bodies stay under animation control.
                if body_setup.mass > 0.0 && !rapier.make_dynamic(handle, &props) {
                    first_error.get_or_insert(RagdollError::MissingBody(index));
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        self.sync_bodies_to_pose(entity);
        let velocity = self.world.get::<Velocity3D>(entity).map(|v| v.0).unwrap_or(Vec3::ZERO);
        {
            let mut rapier = self.world.resource_mut::<RapierState>();
            for (_, handle) in bodies.handles() {
                rapier.set_body_groups(handle, ragdoll_groups());
                rapier.launch(handle, velocity);
            }
            for ghost in bodies.ghosts.iter().flatten() {
                rapier.set_collider_groups(*ghost, InteractionGroups::none());
            }
        }

        for (index, joint_setup) in setup.joints.iter().enumerate() {
            let bone = joint_setup.body_index as usize;
            if bone >= skeleton.bone_count() {
                return Err(RagdollError::JointBoneOutOfRange { joint: index, bone });
            }
            let child = bodies.body(bone).ok_or(RagdollError::JointMissingBody { joint: index, bone })?;
            let parent_bone = skeleton.bones[bone]
                .parent
                .map(|p| p as usize)
                .ok_or(RagdollError::JointWithoutParent { joint: index, bone })?;
            let parent = bodies
                .body(parent_bone)
                .ok_or(RagdollError::JointMissingBody { joint: index, bone: parent_bone })?;
            let handle = {
                let mut rapier = self.world.resource_mut::<RapierState>();
                // Measured between the placed bodies, which already carry the entity scale.
                let (Some(parent_pose), Some(child_pose)) = (rapier.body_pose(parent), rapier.body_pose(child))
                else {
                    return Err(RagdollError::JointMissingBody { joint: index, bone });
                };
                let child_offset = (parent_pose.inverse() * child_pose).w_axis.truncate();
                rapier.insert_joint(parent, child, build_joint(joint_setup, child_offset))
            };
            if let Some(mut joints) = self.world.get_mut::<RagdollJoints>(entity) {
                joints.links.push(RagdollLink {
                    handle,
                    bone: bone as u32,
                    parent: parent_bone as u32,
                    kind: joint_setup.kind,
                });
            }
        }
        Ok(())
    }

    /// Removes the ragdoll joints of `entity` and hands its bones back to the animation.
    pub fn delete_ragdoll(&mut self, entity: Entity) -> Result<(), RagdollError> {
        if !self.world.entities().contains(entity) {
            return Err(RagdollError::UnknownEntity(entity));
        }
        if self.world.get::<RagdollJoints>(entity).is_none() {
            return Err(RagdollError::NoRagdoll);
        }
        self.teardown_ragdoll(entity);
        log::info!(target: "ragdoll", "ragdoll deleted on entity {}", entity.index());
        self.push_event(GameEvent::RagdollDeleted { entity });
        Ok(())
    }

    fn teardown_ragdoll(&mut self, entity: Entity) {
        let joints = self.world.entity_mut(entity).take::<RagdollJoints>();
        let bodies = self.world.get::<BoneBodies>(entity).cloned().unwrap_or_default();
        {
            let mut rapier = self.world.resource_mut::<RapierState>();
            for link in joints.iter().flat_map(|j| j.links.iter()) {
                rapier.remove_joint(link.handle);
            }
            for (_, handle) in bodies.handles() {
                rapier.make_kinematic(handle);
                rapier.set_body_groups(handle, kinematic_groups());
            }
            for ghost in bodies.ghosts.iter().flatten() {
                rapier.set_collider_groups(*ghost, character_groups());
            }
        }
        if let Some(mut kind) = self.world.get_mut::<EntityType>(entity) {
            kind.0.remove(EntityTypeFlags::DYNAMIC);
        }
    }

    pub fn is_ragdoll(&self, entity: Entity) -> bool {
        self.world.get::<EntityType>(entity).is_some_and(|kind| kind.0.contains(EntityTypeFlags::DYNAMIC))
    }

    pub fn ragdoll_info(&self, entity: Entity) -> Option<RagdollInfo> {
        let joints = self.world.get::<RagdollJoints>(entity)?;
        let rapier = self.world.resource::<RapierState>();
        let infos = joints
            .links
            .iter()
            .map(|link| JointInfo {
                bone: link.bone,
                parent: link.parent,
                kind: link.kind,
                limits: rapier.joint(link.handle).map(|j| angular_limits(&j.data)).unwrap_or_default(),
            })
            .collect();
        Some(RagdollInfo {
            hit_callback: joints.hit_callback.clone(),
            body_count: joints.body_count,
            joints: infos,
            joint_cfm: joints.joint_cfm,
            joint_erp: joints.joint_erp,
        })
    }

    pub fn bone_body(&self, entity: Entity, bone: usize) -> Option<RigidBodyHandle> {
        self.world.get::<BoneBodies>(entity)?.body(bone)
    }

    pub fn body_snapshot(&self, entity: Entity) -> Vec<BoneBodySnapshot> {
        let Some(bodies) = self.world.get::<BoneBodies>(entity) else {
            return Vec::new();
        };
        let rapier = self.world.resource::<RapierState>();
        bodies
            .handles()
            .filter_map(|(bone, handle)| {
                let body = rapier.body(handle)?;
                let r = body.rotation();
                Some(BoneBodySnapshot {
                    bone: bone as u32,
                    translation: vec3_from_rapier(body.translation()),
                    rotation: Quat::from_xyzw(r.i, r.j, r.k, r.w),
                    linvel: vec3_from_rapier(body.linvel()),
                    dynamic: body.is_dynamic(),
                    sleeping: body.is_sleeping(),
                })
            })
            .collect()
    }

    pub fn despawn_entity(&mut self, entity: Entity) -> bool {
        if !self.world.entities().contains(entity) {
            return false;
        }
        if self.world.get::<RagdollJoints>(entity).is_some() {
            self.teardown_ragdoll(entity);
        }
        if let Some(bodies) = self.world.get::<BoneBodies>(entity).cloned() {
            let mut rapier = self.world.resource_mut::<RapierState>();
            for (_, handle) in bodies.handles() {
                rapier.remove_body(handle);
            }
        }
        self.world.despawn(entity)
    }
}
