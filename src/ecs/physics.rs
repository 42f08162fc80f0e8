use bevy_ecs::prelude::*;
use glam::{Mat4, Quat, Vec3};
use rapier3d::geometry::{CollisionEvent, CollisionEventFlags};
use rapier3d::na::{Quaternion, Translation3, UnitQuaternion};
use rapier3d::pipeline::{ActiveEvents, EventHandler};
use rapier3d::prelude::{
    CCDSolver, Collider, ColliderBuilder, ColliderHandle, ColliderSet, ContactPair, DefaultBroadPhase,
    GenericJoint, Group, ImpulseJoint, ImpulseJointHandle, ImpulseJointSet, IntegrationParameters,
    InteractionGroups, IslandManager, Isometry, MultibodyJointSet, NarrowPhase, PhysicsPipeline, QueryPipeline,
    Real, RigidBody, RigidBodyBuilder, RigidBodyHandle, RigidBodySet, RigidBodyType, Vector,
};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Resource, Clone, Copy)]
pub struct PhysicsParams {
    pub gravity: Vec3,
}

/// Bodies of animated skeletons.
pub const GROUP_KINEMATIC: Group = Group::GROUP_1;
/// Ghost sensors used for character overlap tests.
pub const GROUP_CHARACTERS: Group = Group::GROUP_2;
/// Bodies of simulated ragdolls.
pub const GROUP_RAGDOLL: Group = Group::GROUP_3;

pub fn kinematic_groups() -> InteractionGroups {
    InteractionGroups::new(GROUP_KINEMATIC, Group::ALL)
}

pub fn character_groups() -> InteractionGroups {
    InteractionGroups::new(GROUP_CHARACTERS, Group::ALL)
}

pub fn ragdoll_groups() -> InteractionGroups {
    InteractionGroups::new(GROUP_RAGDOLL, Group::ALL)
}

/// Entity and bone a collider belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColliderOwner {
    pub entity: Entity,
    pub bone: u32,
}

/// Properties applied to a bone body when it becomes dynamic.
#[derive(Clone, Copy, Debug)]
pub struct DynamicBodyProps {
    pub mass: f32,
    pub restitution: f32,
    pub friction: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub sleep_threshold: f32,
    /// Soft CCD prediction distance; `None` leaves CCD off.
    pub ccd_prediction: Option<f32>,
}

struct CollisionEventCollector {
    collision_events: Mutex<Vec<CollisionEvent>>,
}

impl CollisionEventCollector {
    fn new() -> Self {
        Self { collision_events: Mutex::new(Vec::new()) }
    }

    fn drain(&self) -> Vec<CollisionEvent> {
        if let Ok(mut events) = self.collision_events.lock() {
            std::mem::take(&mut *events)
        } else {
            Vec::new()
        }
    }
}

impl EventHandler for CollisionEventCollector {
    fn handle_collision_event(
        &self,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        event: CollisionEvent,
        _contact_pair: Option<&ContactPair>,
    ) {
        if let Ok(mut events) = self.collision_events.lock() {
            events.push(event);
        }
    }

    fn handle_contact_force_event(
        &self,
        _dt: Real,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _contact_pair: &ContactPair,
        _total_force_magnitude: Real,
    ) {
    }
}

#[derive(Resource)]
pub struct RapierState {
    pipeline: PhysicsPipeline,
    gravity: Vector<Real>,
    integration_parameters: IntegrationParameters,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
    collider_owners: HashMap<ColliderHandle, ColliderOwner>,
    event_collector: CollisionEventCollector,
}

impl RapierState {
    pub fn new(params: &PhysicsParams) -> Self {
        Self {
            pipeline: PhysicsPipeline::new(),
            gravity: vec3_to_rapier(params.gravity),
            integration_parameters: IntegrationParameters::default(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            collider_owners: HashMap::new(),
            event_collector: CollisionEventCollector::new(),
        }
    }

    /// Static floor whose top face sits at `height`.
    pub fn insert_ground(&mut self, height: f32) -> RigidBodyHandle {
        let body = RigidBodyBuilder::fixed().translation(Vector::new(0.0, height - 0.5, 0.0)).build();
        let body_handle = self.bodies.insert(body);
        let collider = ColliderBuilder::cuboid(100.0, 0.5, 100.0)
            .friction(0.8)
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .build();
        self.colliders.insert_with_parent(collider, body_handle, &mut self.bodies);
        body_handle
    }

    /// Kinematic body following one bone, with a box collider of `half` extents offset by `center`.
    pub fn spawn_bone_body(
        &mut self,
        owner: ColliderOwner,
        pose: Isometry<Real>,
        half: Vec3,
        center: Vec3,
    ) -> (RigidBodyHandle, ColliderHandle) {
        let body = RigidBodyBuilder::kinematic_position_based().position(pose).build();
        let body_handle = self.bodies.insert(body);
        let collider = ColliderBuilder::cuboid(half.x.max(1e-3), half.y.max(1e-3), half.z.max(1e-3))
            .translation(vec3_to_rapier(center))
            .mass(0.0)
            .collision_groups(kinematic_groups())
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .build();
        let collider_handle = self.colliders.insert_with_parent(collider, body_handle, &mut self.bodies);
        self.collider_owners.insert(collider_handle, owner);
        (body_handle, collider_handle)
    }

    pub fn spawn_ghost(&mut self, owner: ColliderOwner, body: RigidBodyHandle, radius: f32) -> ColliderHandle {
        let collider = ColliderBuilder::ball(radius.max(1e-3))
            .sensor(true)
            .density(0.0)
            .collision_groups(character_groups())
            .build();
        let handle = self.colliders.insert_with_parent(collider, body, &mut self.bodies);
        self.collider_owners.insert(handle, owner);
        handle
    }

    fn solid_colliders(&self, handle: RigidBodyHandle) -> SmallVec<[ColliderHandle; 2]> {
        let Some(body) = self.bodies.get(handle) else {
            return SmallVec::new();
        };
        body.colliders()
            .iter()
            .copied()
            .filter(|collider| self.colliders.get(*collider).is_some_and(|c| !c.is_sensor()))
            .collect()
    }

    /// Hands a bone body over to the simulation. Mass goes on the body's colliders so the
    /// engine derives inertia from their shapes.
    pub fn make_dynamic(&mut self, handle: RigidBodyHandle, props: &DynamicBodyProps) -> bool {
        if self.bodies.get(handle).is_none() {
            return false;
        }
        for collider in self.solid_colliders(handle) {
            if let Some(collider) = self.colliders.get_mut(collider) {
                collider.set_mass(props.mass);
                collider.set_restitution(props.restitution);
                collider.set_friction(props.friction);
            }
        }
        let Some(body) = self.bodies.get_mut(handle) else {
            return false;
        };
        body.set_body_type(RigidBodyType::Dynamic, true);
        body.recompute_mass_properties_from_colliders(&self.colliders);
        body.reset_forces(false);
        body.reset_torques(false);
        body.set_enabled_translations(true, true, true, false);
        body.set_enabled_rotations(true, true, true, false);
        body.set_linear_damping(props.linear_damping.max(0.0));
        body.set_angular_damping(props.angular_damping.max(0.0));
        let activation = body.activation_mut();
        activation.normalized_linear_threshold = props.sleep_threshold;
        activation.angular_threshold = props.sleep_threshold;
        match props.ccd_prediction {
            Some(distance) => {
                body.enable_ccd(true);
                body.set_soft_ccd_prediction(distance);
            }
            None => body.enable_ccd(false),
        }
        true
    }

    /// Returns a bone body to animation control with zero mass. The pose is left untouched.
    pub fn make_kinematic(&mut self, handle: RigidBodyHandle) -> bool {
        if self.bodies.get(handle).is_none() {
            return false;
        }
        for collider in self.solid_colliders(handle) {
            if let Some(collider) = self.colliders.get_mut(collider) {
                collider.set_mass(0.0);
            }
        }
        let Some(body) = self.bodies.get_mut(handle) else {
            return false;
        };
        body.set_body_type(RigidBodyType::KinematicPositionBased, true);
        body.recompute_mass_properties_from_colliders(&self.colliders);
        body.set_linvel(Vector::zeros(), false);
        body.set_angvel(Vector::zeros(), false);
        body.enable_ccd(false);
        true
    }

    pub fn set_body_groups(&mut self, handle: RigidBodyHandle, groups: InteractionGroups) {
        for collider in self.solid_colliders(handle) {
            if let Some(collider) = self.colliders.get_mut(collider) {
                collider.set_collision_groups(groups);
            }
        }
    }

    pub fn set_collider_groups(&mut self, handle: ColliderHandle, groups: InteractionGroups) {
        if let Some(collider) = self.colliders.get_mut(handle) {
            collider.set_collision_groups(groups);
        }
    }

    pub fn launch(&mut self, handle: RigidBodyHandle, velocity: Vec3) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.wake_up(true);
            body.set_linvel(vec3_to_rapier(velocity), true);
        }
    }

    /// Teleports a body; kinematic bodies also stop interpolating towards a stale target.
    pub fn set_body_pose(&mut self, handle: RigidBodyHandle, pose: Isometry<Real>) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_position(pose, false);
        }
    }

    pub fn drive_kinematic(&mut self, handle: RigidBodyHandle, pose: Isometry<Real>) {
        if let Some(body) = self.bodies.get_mut(handle) {
            if body.is_kinematic() {
                body.set_next_kinematic_position(pose);
            }
        }
    }

    pub fn insert_joint(
        &mut self,
        parent: RigidBodyHandle,
        child: RigidBodyHandle,
        joint: GenericJoint,
    ) -> ImpulseJointHandle {
        self.impulse_joints.insert(parent, child, joint, true)
    }

    pub fn remove_joint(&mut self, handle: ImpulseJointHandle) -> bool {
        self.impulse_joints.remove(handle, true).is_some()
    }

    pub fn joint(&self, handle: ImpulseJointHandle) -> Option<&ImpulseJoint> {
        self.impulse_joints.get(handle)
    }

    pub fn joint_count(&self) -> usize {
        self.impulse_joints.len()
    }

    pub fn remove_body(&mut self, handle: RigidBodyHandle) {
        let collider_handles: Vec<ColliderHandle> = self
            .bodies
            .get(handle)
            .map(|body| body.colliders().to_vec())
            .unwrap_or_default();
        for collider in collider_handles {
            self.collider_owners.remove(&collider);
        }
        let _ = self.bodies.remove(
            handle,
            &mut self.island_manager,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
    }

    pub fn step(&mut self, dt: f32) {
        self.integration_parameters.dt = dt;
        let hooks = ();
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &hooks,
            &self.event_collector,
        );
        self.query_pipeline.update(&self.colliders);
    }

    /// Contacts that started this step, reported once per bone collider involved.
    pub fn drain_bone_contacts(&mut self) -> Vec<(ColliderOwner, Option<ColliderOwner>)> {
        let mut out = Vec::new();
        for event in self.event_collector.drain() {
            let CollisionEvent::Started(a, b, flags) = event else {
                continue;
            };
            if flags.contains(CollisionEventFlags::SENSOR) {
                continue;
            }
            let owner_a = self.collider_owners.get(&a).copied();
            let owner_b = self.collider_owners.get(&b).copied();
            if let Some(owner) = owner_a {
                out.push((owner, owner_b));
            }
            if let Some(owner) = owner_b {
                out.push((owner, owner_a));
            }
        }
        out
    }

    pub fn body(&self, handle: RigidBodyHandle) -> Option<&RigidBody> {
        self.bodies.get(handle)
    }

    pub fn collider(&self, handle: ColliderHandle) -> Option<&Collider> {
        self.colliders.get(handle)
    }

    /// First non-sensor collider of a body.
    pub fn solid_collider(&self, handle: RigidBodyHandle) -> Option<&Collider> {
        self.solid_colliders(handle).first().and_then(|collider| self.colliders.get(*collider))
    }

    pub fn body_pose(&self, handle: RigidBodyHandle) -> Option<Mat4> {
        self.bodies.get(handle).map(|body| mat4_from_iso(body.position()))
    }
}

pub fn vec3_to_rapier(v: Vec3) -> Vector<Real> {
    Vector::new(v.x, v.y, v.z)
}

pub fn vec3_from_rapier(v: &Vector<Real>) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

pub fn quat_to_rapier(q: Quat) -> UnitQuaternion<Real> {
    UnitQuaternion::new_normalize(Quaternion::new(q.w, q.x, q.y, q.z))
}

pub fn iso_from_parts(rotation: Quat, translation: Vec3) -> Isometry<Real> {
    Isometry::from_parts(Translation3::new(translation.x, translation.y, translation.z), quat_to_rapier(rotation))
}

/// Drops any scale carried by the matrix.
pub fn iso_from_mat4(matrix: Mat4) -> Isometry<Real> {
    let (_, rotation, translation) = matrix.to_scale_rotation_translation();
    iso_from_parts(rotation.normalize(), translation)
}

pub fn mat4_from_iso(iso: &Isometry<Real>) -> Mat4 {
    let r = &iso.rotation;
    let rotation = Quat::from_xyzw(r.i, r.j, r.k, r.w);
    Mat4::from_rotation_translation(rotation, vec3_from_rapier(&iso.translation.vector))
}
