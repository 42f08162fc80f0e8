use bevy_ecs::prelude::Entity;
use thiserror::Error;

pub mod joints;
pub mod setup;

pub use joints::{angular_limits, build_joint, euler_zyx};
pub use setup::{BodySetup, JointKind, JointSetup, RagdollSetup, SetupError};

/// Per-axis (X, Y, Z) angular limits of a live joint.
pub type JointLimitsView = [Option<[f32; 2]>; 3];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RagdollError {
    #[error("entity {0:?} does not exist")]
    UnknownEntity(Entity),
    #[error("entity has no skeleton")]
    NoSkeleton,
    #[error("entity has no bone bodies attached")]
    NoBoneBodies,
    #[error("setup describes {bodies} bodies but the skeleton only has {bones} bones")]
    BodyCountOverflow { bodies: usize, bones: usize },
    #[error("bone {0} has no rigid body")]
    MissingBody(usize),
    #[error("joint {joint} references bone {bone} outside the skeleton")]
    JointBoneOutOfRange { joint: usize, bone: usize },
    #[error("joint {joint} targets bone {bone}, which has no rigid body")]
    JointMissingBody { joint: usize, bone: usize },
    #[error("joint {joint} targets root bone {bone}, which has no parent to attach to")]
    JointWithoutParent { joint: usize, bone: usize },
    #[error("entity has no ragdoll")]
    NoRagdoll,
    #[error(transparent)]
    Setup(#[from] SetupError),
}

/// Snapshot of a live ragdoll for tooling and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct RagdollInfo {
    pub hit_callback: String,
    pub body_count: usize,
    pub joints: Vec<JointInfo>,
    pub joint_cfm: f32,
    pub joint_erp: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JointInfo {
    pub bone: u32,
    pub parent: u32,
    pub kind: JointKind,
    pub limits: JointLimitsView,
}
