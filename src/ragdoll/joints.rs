use super::setup::{JointKind, JointSetup};
use super::JointLimitsView;
use crate::ecs::iso_from_parts;
use glam::{EulerRot, Quat, Vec3};
use rapier3d::prelude::{GenericJoint, GenericJointBuilder, JointAxesMask, JointAxis};
use std::f32::consts::FRAC_PI_2;

/// Rotation built from Euler angles applied as Z, then Y, then X.
pub fn euler_zyx(angles: Vec3) -> Quat {
    Quat::from_euler(EulerRot::ZYX, angles.z, angles.y, angles.x)
}

/// Revolute joints turn about the frame X axis; hinges are authored about Z.
fn hinge_axis_to_x() -> Quat {
    Quat::from_rotation_y(-FRAC_PI_2)
}

/// Builds the joint linking a bone to its parent.
///
/// `child_offset` is the child body's origin in the parent body's frame; the
/// pivot sits at the child bone's origin. The authored body offsets are kept on
/// the setup but never move the pivot, so the current pose always satisfies the joint.
pub fn build_joint(setup: &JointSetup, child_offset: Vec3) -> GenericJoint {
    let anchor1 = child_offset;
    let anchor2 = Vec3::ZERO;
    let rot1 = euler_zyx(setup.body1_angle());
    let rot2 = euler_zyx(setup.body2_angle());
    let [l0, l1, l2] = setup.limit;

    match setup.kind {
        JointKind::Point => GenericJointBuilder::new(JointAxesMask::LOCKED_SPHERICAL_AXES)
            .local_frame1(iso_from_parts(Quat::IDENTITY, anchor1))
            .local_frame2(iso_from_parts(Quat::IDENTITY, anchor2))
            .contacts_enabled(false)
            .build(),
        JointKind::Hinge => {
            let mut builder = GenericJointBuilder::new(JointAxesMask::LOCKED_REVOLUTE_AXES)
                .local_frame1(iso_from_parts(rot1 * hinge_axis_to_x(), anchor1))
                .local_frame2(iso_from_parts(rot2 * hinge_axis_to_x(), anchor2))
                .contacts_enabled(false);
            // A reversed range leaves the hinge unlimited.
            if l0 <= l1 {
                builder = builder.limits(JointAxis::AngX, [l0, l1]);
            }
            builder.build()
        }
        JointKind::Cone => {
            let (swing1, swing2, twist) = (l0.abs(), l1.abs(), l2.abs());
            GenericJointBuilder::new(JointAxesMask::LOCKED_SPHERICAL_AXES)
                .local_frame1(iso_from_parts(rot1, anchor1))
                .local_frame2(iso_from_parts(rot2, anchor2))
                .limits(JointAxis::AngX, [-twist, twist])
                .limits(JointAxis::AngY, [-swing2, swing2])
                .limits(JointAxis::AngZ, [-swing1, swing1])
                .contacts_enabled(false)
                .build()
        }
    }
}

/// Angular limits of a joint, in X/Y/Z order; `None` where an axis is unlimited.
pub fn angular_limits(joint: &GenericJoint) -> JointLimitsView {
    let read = |axis| joint.limits(axis).map(|limits| [limits.min, limits.max]);
    [read(JointAxis::AngX), read(JointAxis::AngY), read(JointAxis::AngZ)]
}
