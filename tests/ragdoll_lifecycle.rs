use bevy_ecs::prelude::Entity;
use glam::{Mat4, Vec3};
use kestrel_ragdoll::assets::{AssetManager, BoneBounds, BoneDef, SkeletonAsset};
use kestrel_ragdoll::config::RagdollConfig;
use kestrel_ragdoll::ecs::{
    character_groups, kinematic_groups, ragdoll_groups, BoneBodies, EcsWorld, RapierState, SkeletonInstance,
    Transform3D,
};
use kestrel_ragdoll::events::GameEvent;
use kestrel_ragdoll::ragdoll::{BodySetup, JointKind, JointSetup, RagdollError, RagdollSetup};
use rapier3d::prelude::InteractionGroups;

const DT: f32 = 1.0 / 60.0;

fn bone(name: &str, parent: Option<u32>, offset: Vec3, min: Vec3, max: Vec3) -> BoneDef {
    BoneDef {
        name: name.to_string(),
        parent,
        rest_local: Mat4::from_translation(offset),
        bounds: BoneBounds::new(min, max),
    }
}

/// Hips, spine and one leg; every box spans the bone towards its child.
fn leg_rig() -> SkeletonAsset {
    SkeletonAsset::from_bones(
        "leg_rig",
        vec![
            bone("hips", None, Vec3::new(0.0, 1.0, 0.0), Vec3::new(-0.15, -0.1, -0.1), Vec3::new(0.15, 0.1, 0.1)),
            bone("spine", Some(0), Vec3::new(0.0, 0.3, 0.0), Vec3::new(-0.1, 0.05, -0.1), Vec3::new(0.1, 0.3, 0.1)),
            bone("thigh", Some(0), Vec3::new(0.1, -0.15, 0.0), Vec3::new(-0.05, -0.45, -0.05), Vec3::new(0.05, -0.05, 0.05)),
            bone("shin", Some(2), Vec3::new(0.0, -0.5, 0.0), Vec3::new(-0.05, -0.45, -0.05), Vec3::new(0.05, -0.05, 0.05)),
        ],
    )
    .expect("valid rig")
}

fn body(mass: f32) -> BodySetup {
    BodySetup { mass, restitution: 0.1, friction: 0.7, damping: [0.05, 0.1] }
}

fn joint(bone: u16, kind: JointKind, limit: [f32; 3]) -> JointSetup {
    JointSetup {
        body_index: bone,
        kind,
        body1_offset: [0.0; 3],
        body2_offset: [0.0; 3],
        body1_angle: [0.0; 3],
        body2_angle: [0.0; 3],
        limit,
    }
}

fn full_setup() -> RagdollSetup {
    RagdollSetup {
        hit_callback: "onHit".to_string(),
        joint_cfm: 0.1,
        joint_erp: 0.7,
        bodies: vec![body(6.0), body(4.0), body(3.0), body(2.0)],
        joints: vec![
            joint(1, JointKind::Cone, [0.6, 0.4, 0.2]),
            joint(2, JointKind::Point, [0.0; 3]),
            joint(3, JointKind::Hinge, [0.0, 2.0, 0.0]),
        ],
    }
}

fn spawn_rig(ecs: &mut EcsWorld, velocity: Vec3) -> Entity {
    let mut assets = AssetManager::new();
    assets.insert_skeleton("leg_rig", leg_rig());
    let entity = ecs
        .spawn_skeletal_entity(&assets, "leg_rig", Transform3D::from_translation(Vec3::new(0.0, 0.5, 0.0)), velocity)
        .expect("spawn rig");
    assert!(ecs.attach_bone_bodies(entity, true));
    entity
}

fn weightless_world() -> EcsWorld {
    let mut config = RagdollConfig::default();
    config.physics.gravity = [0.0; 3];
    EcsWorld::with_config(&config)
}

fn spawn_scaled_rig(ecs: &mut EcsWorld, scale: f32) -> Entity {
    let mut assets = AssetManager::new();
    assets.insert_skeleton("leg_rig", leg_rig());
    let transform = Transform3D { scale: Vec3::splat(scale), ..Transform3D::from_translation(Vec3::new(0.0, 5.0, 0.0)) };
    let entity = ecs.spawn_skeletal_entity(&assets, "leg_rig", transform, Vec3::ZERO).expect("spawn rig");
    assert!(ecs.attach_bone_bodies(entity, true));
    entity
}

fn bone_gap(ecs: &EcsWorld, entity: Entity, a: usize, b: usize) -> f32 {
    let snapshot = ecs.body_snapshot(entity);
    (snapshot[a].translation - snapshot[b].translation).length()
}

fn rapier(ecs: &EcsWorld) -> &RapierState {
    ecs.world.resource::<RapierState>()
}

fn assert_animated(ecs: &EcsWorld, entity: Entity) {
    assert!(!ecs.is_ragdoll(entity));
    assert!(ecs.ragdoll_info(entity).is_none());
    let state = rapier(ecs);
    assert_eq!(state.joint_count(), 0);
    for bone in 0..4 {
        let handle = ecs.bone_body(entity, bone).expect("bone body");
        assert!(state.body(handle).expect("body").is_kinematic(), "bone {bone} should be kinematic");
        assert_eq!(state.solid_collider(handle).expect("collider").collision_groups(), kinematic_groups());
    }
}

fn hips_model_y(ecs: &EcsWorld, entity: Entity) -> f32 {
    let skeleton = ecs.world.get::<SkeletonInstance>(entity).expect("skeleton");
    skeleton.model_poses[0].w_axis.y
}

#[test]
fn create_ragdoll_builds_dynamic_bodies_and_joints() {
    let mut ecs = EcsWorld::new();
    let entity = spawn_rig(&mut ecs, Vec3::ZERO);
    ecs.create_ragdoll(entity, &full_setup()).expect("ragdoll created");

    assert!(ecs.is_ragdoll(entity));
    let info = ecs.ragdoll_info(entity).expect("ragdoll info");
    assert_eq!(info.hit_callback, "onHit");
    assert_eq!(info.body_count, 4);
    assert_eq!(info.joints.len(), 3);
    assert_eq!((info.joints[0].bone, info.joints[0].parent), (1, 0));
    assert_eq!((info.joints[2].bone, info.joints[2].parent), (3, 2));
    assert_eq!(info.joints[0].limits, [Some([-0.2, 0.2]), Some([-0.4, 0.4]), Some([-0.6, 0.6])]);
    assert_eq!(info.joints[1].limits, [None, None, None]);
    assert_eq!(info.joints[2].kind, JointKind::Hinge);
    assert_eq!(info.joints[2].limits[0], Some([0.0, 2.0]));

    let state = rapier(&ecs);
    assert_eq!(state.joint_count(), 3);
    for bone in 0..4 {
        let handle = ecs.bone_body(entity, bone).expect("bone body");
        assert!(state.body(handle).expect("body").is_dynamic());
        assert_eq!(state.solid_collider(handle).expect("collider").collision_groups(), ragdoll_groups());
    }
    let hips = state.body(ecs.bone_body(entity, 0).expect("hips")).expect("hips body");
    assert!((hips.mass() - 6.0).abs() < 1e-3, "hips mass {}", hips.mass());
    assert!(hips.is_ccd_enabled(), "root bone uses continuous collision");
    let shin = state.body(ecs.bone_body(entity, 3).expect("shin")).expect("shin body");
    assert!(!shin.is_ccd_enabled());

    let events = ecs.drain_events();
    assert_eq!(events, vec![GameEvent::RagdollCreated { entity, bodies: 4, joints: 3 }]);
}

#[test]
fn ghost_colliders_are_disabled_while_ragdolled() {
    let mut ecs = EcsWorld::new();
    let entity = spawn_rig(&mut ecs, Vec3::ZERO);
    let ghost = ecs.world.get::<BoneBodies>(entity).and_then(|bodies| bodies.ghost(1)).expect("ghost collider");
    assert_eq!(rapier(&ecs).collider(ghost).expect("ghost").collision_groups(), character_groups());

    ecs.create_ragdoll(entity, &full_setup()).expect("ragdoll created");
    assert_eq!(rapier(&ecs).collider(ghost).expect("ghost").collision_groups(), InteractionGroups::none());

    ecs.delete_ragdoll(entity).expect("ragdoll deleted");
    assert_eq!(rapier(&ecs).collider(ghost).expect("ghost").collision_groups(), character_groups());
}

#[test]
fn bodies_inherit_entity_velocity() {
    let mut ecs = EcsWorld::new();
    let velocity = Vec3::new(2.0, 0.0, -1.0);
    let entity = spawn_rig(&mut ecs, velocity);
    ecs.create_ragdoll(entity, &full_setup()).expect("ragdoll created");
    for snapshot in ecs.body_snapshot(entity) {
        assert!((snapshot.linvel - velocity).length() < 1e-5, "bone {} linvel {:?}", snapshot.bone, snapshot.linvel);
    }
}

#[test]
fn too_many_bodies_is_rejected_without_changes() {
    let mut ecs = EcsWorld::new();
    let entity = spawn_rig(&mut ecs, Vec3::ZERO);
    let mut setup = full_setup();
    setup.bodies.push(body(1.0));

    let err = ecs.create_ragdoll(entity, &setup).unwrap_err();
    assert_eq!(err, RagdollError::BodyCountOverflow { bodies: 5, bones: 4 });
    assert_animated(&ecs, entity);
    assert!(matches!(ecs.drain_events().as_slice(), [GameEvent::RagdollFailed { .. }]));
}

#[test]
fn joint_failure_rolls_back_everything() {
    let mut ecs = EcsWorld::new();
    let entity = spawn_rig(&mut ecs, Vec3::ZERO);
    let mut setup = full_setup();
    // The hips are the root; they have nothing to hang from.
    setup.joints.push(joint(0, JointKind::Point, [0.0; 3]));

    let err = ecs.create_ragdoll(entity, &setup).unwrap_err();
    assert_eq!(err, RagdollError::JointWithoutParent { joint: 3, bone: 0 });
    assert_animated(&ecs, entity);

    let events = ecs.drain_events();
    assert_eq!(events.len(), 1, "{events:?}");
    assert!(matches!(&events[0], GameEvent::RagdollFailed { reason, .. } if reason.contains("root bone 0")));
}

#[test]
fn out_of_range_joint_bone_fails() {
    let mut ecs = EcsWorld::new();
    let entity = spawn_rig(&mut ecs, Vec3::ZERO);
    let mut setup = full_setup();
    setup.joints[1].body_index = 9;
    let err = ecs.create_ragdoll(entity, &setup).unwrap_err();
    assert_eq!(err, RagdollError::JointBoneOutOfRange { joint: 1, bone: 9 });
    assert_animated(&ecs, entity);
}

#[test]
fn invalid_setup_is_rejected_before_touching_bodies() {
    let mut ecs = EcsWorld::new();
    let entity = spawn_rig(&mut ecs, Vec3::ZERO);
    let mut setup = full_setup();
    setup.bodies[2].mass = -1.0;
    let err = ecs.create_ragdoll(entity, &setup).unwrap_err();
    assert!(matches!(err, RagdollError::Setup(_)), "{err:?}");
    assert_animated(&ecs, entity);
}

#[test]
fn missing_components_are_reported() {
    let mut ecs = EcsWorld::new();
    let bare = ecs.world.spawn(Transform3D::default()).id();
    assert_eq!(ecs.create_ragdoll(bare, &full_setup()), Err(RagdollError::NoSkeleton));

    let mut assets = AssetManager::new();
    assets.insert_skeleton("leg_rig", leg_rig());
    let unattached =
        ecs.spawn_skeletal_entity(&assets, "leg_rig", Transform3D::default(), Vec3::ZERO).expect("spawn");
    assert_eq!(ecs.create_ragdoll(unattached, &full_setup()), Err(RagdollError::NoBoneBodies));

    let gone = spawn_rig(&mut ecs, Vec3::ZERO);
    assert!(ecs.despawn_entity(gone));
    assert_eq!(ecs.create_ragdoll(gone, &full_setup()), Err(RagdollError::UnknownEntity(gone)));
}

#[test]
fn delete_without_ragdoll_fails() {
    let mut ecs = EcsWorld::new();
    let entity = spawn_rig(&mut ecs, Vec3::ZERO);
    assert_eq!(ecs.delete_ragdoll(entity), Err(RagdollError::NoRagdoll));
    assert!(ecs.drain_events().is_empty());
}

#[test]
fn recreating_replaces_the_previous_ragdoll() {
    let mut ecs = EcsWorld::new();
    let entity = spawn_rig(&mut ecs, Vec3::ZERO);
    ecs.create_ragdoll(entity, &full_setup()).expect("first ragdoll");
    let mut smaller = full_setup();
    smaller.joints.truncate(1);
    ecs.create_ragdoll(entity, &smaller).expect("second ragdoll");

    assert_eq!(rapier(&ecs).joint_count(), 1);
    let events = ecs.drain_events();
    assert!(
        matches!(
            events.as_slice(),
            [
                GameEvent::RagdollCreated { .. },
                GameEvent::RagdollDeleted { .. },
                GameEvent::RagdollCreated { joints: 1, .. }
            ]
        ),
        "{events:?}"
    );
}

#[test]
fn massless_bodies_stay_under_animation() {
    let mut ecs = EcsWorld::new();
    let entity = spawn_rig(&mut ecs, Vec3::ZERO);
    let mut setup = full_setup();
    setup.bodies[0].mass = 0.0;
    ecs.create_ragdoll(entity, &setup).expect("ragdoll created");
    let state = rapier(&ecs);
    assert!(state.body(ecs.bone_body(entity, 0).expect("hips")).expect("hips").is_kinematic());
    assert!(state.body(ecs.bone_body(entity, 1).expect("spine")).expect("spine").is_dynamic());
}

#[test]
fn ragdoll_falls_and_drives_the_bone_pose() {
    let mut ecs = EcsWorld::new();
    ecs.insert_ground(0.0);
    let entity = spawn_rig(&mut ecs, Vec3::ZERO);
    let start = hips_model_y(&ecs, entity);
    ecs.create_ragdoll(entity, &full_setup()).expect("ragdoll created");
    ecs.drain_events();

    let mut hits = Vec::new();
    for _ in 0..180 {
        ecs.fixed_step(DT);
        hits.extend(ecs.drain_events().into_iter().filter(|e| matches!(e, GameEvent::RagdollHit { .. })));
    }
    let end = hips_model_y(&ecs, entity);
    assert!(end < start - 0.3, "hips should drop: start {start}, end {end}");
    let hips_world = ecs.body_snapshot(entity)[0].translation.y;
    assert!(hips_world > 0.0, "hips rest above the ground, got {hips_world}");
    assert!(
        hits.iter().any(|e| matches!(e, GameEvent::RagdollHit { entity: hit, other: None, callback, .. }
            if *hit == entity && callback == "onHit")),
        "expected a ground hit, got {hits:?}"
    );
}

#[test]
fn delete_leaves_bodies_where_the_simulation_put_them() {
    let mut ecs = EcsWorld::new();
    ecs.insert_ground(0.0);
    let entity = spawn_rig(&mut ecs, Vec3::ZERO);
    ecs.create_ragdoll(entity, &full_setup()).expect("ragdoll created");
    for _ in 0..30 {
        ecs.fixed_step(DT);
    }
    let before = ecs.body_snapshot(entity);
    ecs.delete_ragdoll(entity).expect("ragdoll deleted");
    let after = ecs.body_snapshot(entity);
    for (a, b) in before.iter().zip(&after) {
        assert!((a.translation - b.translation).length() < 1e-6);
    }
    assert_animated(&ecs, entity);
    assert_eq!(ecs.drain_events().last(), Some(&GameEvent::RagdollDeleted { entity }));
}

#[test]
fn body_properties_are_applied_with_clamped_damping() {
    let mut ecs = EcsWorld::new();
    let entity = spawn_rig(&mut ecs, Vec3::ZERO);
    let mut setup = full_setup();
    setup.bodies[1].damping = [1.5, -0.2];
    ecs.create_ragdoll(entity, &setup).expect("ragdoll created");

    let state = rapier(&ecs);
    let hips_handle = ecs.bone_body(entity, 0).expect("hips");
    let hips = state.body(hips_handle).expect("hips body");
    assert!((hips.linear_damping() - 0.05).abs() < 1e-6);
    assert!((hips.angular_damping() - 0.1).abs() < 1e-6);
    assert!((hips.activation().normalized_linear_threshold - 0.4).abs() < 1e-6);
    assert!((hips.activation().angular_threshold - 0.4).abs() < 1e-6);
    let collider = state.solid_collider(hips_handle).expect("hips collider");
    assert!((collider.friction() - 0.7).abs() < 1e-6);
    assert!((collider.restitution() - 0.1).abs() < 1e-6);

    let spine = state.body(ecs.bone_body(entity, 1).expect("spine")).expect("spine body");
    assert_eq!(spine.linear_damping(), 1.0);
    assert_eq!(spine.angular_damping(), 0.0);
}

#[test]
fn scaled_entity_keeps_its_bone_spacing() {
    let mut ecs = weightless_world();
    let entity = spawn_scaled_rig(&mut ecs, 2.0);
    let hips_handle = ecs.bone_body(entity, 0).expect("hips");
    let cuboid = rapier(&ecs).solid_collider(hips_handle).expect("collider").shape().as_cuboid().copied();
    let half = cuboid.expect("box collider").half_extents;
    assert!((half.x - 0.3).abs() < 1e-5 && (half.y - 0.2).abs() < 1e-5, "half extents {half:?}");

    let spine_gap = bone_gap(&ecs, entity, 0, 1);
    let shin_gap = bone_gap(&ecs, entity, 2, 3);
    assert!((spine_gap - 0.6).abs() < 1e-4, "spine gap {spine_gap}");
    assert!((shin_gap - 1.0).abs() < 1e-4, "shin gap {shin_gap}");

    ecs.create_ragdoll(entity, &full_setup()).expect("ragdoll created");
    for _ in 0..60 {
        ecs.fixed_step(DT);
    }
    assert!((bone_gap(&ecs, entity, 0, 1) - spine_gap).abs() < 0.02, "spine gap {}", bone_gap(&ecs, entity, 0, 1));
    assert!((bone_gap(&ecs, entity, 2, 3) - shin_gap).abs() < 0.02, "shin gap {}", bone_gap(&ecs, entity, 2, 3));
}

#[test]
fn authored_body_offsets_leave_the_rest_pose_in_place() {
    let mut ecs = weightless_world();
    let entity = spawn_scaled_rig(&mut ecs, 1.0);
    let spine_gap = bone_gap(&ecs, entity, 0, 1);
    let mut setup = full_setup();
    setup.joints[0].body1_offset = [0.0, 0.3, 0.0];
    setup.joints[0].body2_offset = [0.1, 0.0, 0.0];
    ecs.create_ragdoll(entity, &setup).expect("ragdoll created");
    for _ in 0..60 {
        ecs.fixed_step(DT);
    }
    let gap = bone_gap(&ecs, entity, 0, 1);
    assert!((gap - spine_gap).abs() < 0.02, "spine gap moved from {spine_gap} to {gap}");
}

#[test]
fn attaching_bone_bodies_twice_is_refused() {
    let mut ecs = EcsWorld::new();
    let entity = spawn_rig(&mut ecs, Vec3::ZERO);
    let hips = ecs.bone_body(entity, 0);
    assert!(!ecs.attach_bone_bodies(entity, true));
    assert_eq!(ecs.bone_body(entity, 0), hips);
    assert!(!ecs.attach_bone_bodies(Entity::from_raw(999), true));
}
