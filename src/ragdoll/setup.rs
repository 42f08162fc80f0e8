//! Declarative ragdoll description: per-bone body properties plus the joints
//! that hold neighbouring bones together.
//!
//! Setups normally come from the script function `getRagdollSetup(index)`, which
//! returns a map shaped like:
//!
//! ```text
//! #{
//!     hit_callback: "onRagdollHit",
//!     joint_cfm: 0.1, joint_erp: 0.8,
//!     body: [ #{ mass: 8.0, restitution: 0.1, friction: 0.9, damping: [0.1, 0.2] }, ... ],
//!     joint: [ #{ body_index: 1, joint_type: 1, body1_offset: [0, 0, 0], body2_offset: [0, 0, 0],
//!                 body1_angle: [0, 0, 0], body2_angle: [0, 0, 0], joint_limit: [-1.0, 1.0, 0.0] }, ... ],
//! }
//! ```
//!
//! The same shape can be stored as JSON and loaded with [`RagdollSetup::load_json`].

use anyhow::{Context, Result};
use glam::Vec3;
use rhai::{Array, Dynamic, Map};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SetupError {
    #[error("field '{0}' is missing or not a string")]
    ExpectedString(String),
    #[error("field '{0}' is missing or not an array")]
    ExpectedArray(String),
    #[error("entry {index} of '{field}' is not a map")]
    ExpectedMap { field: String, index: usize },
    #[error("field '{0}' is not a number")]
    ExpectedNumber(String),
    #[error("'{0}' must contain at least one entry")]
    Empty(String),
    #[error("'{field}' requests {count} entries but only {available} are provided")]
    CountExceedsEntries { field: String, count: usize, available: usize },
    #[error("field '{field}' must not be negative (got {value})")]
    Negative { field: String, value: f64 },
    #[error("unknown joint type {0}")]
    UnknownJointType(u16),
    #[error("field '{0}' is not finite")]
    NonFinite(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u16")]
pub enum JointKind {
    Point,
    Hinge,
    Cone,
}

impl TryFrom<u16> for JointKind {
    type Error = SetupError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(JointKind::Point),
            1 => Ok(JointKind::Hinge),
            2 => Ok(JointKind::Cone),
            other => Err(SetupError::UnknownJointType(other)),
        }
    }
}

impl JointKind {
    pub fn label(self) -> &'static str {
        match self {
            JointKind::Point => "point",
            JointKind::Hinge => "hinge",
            JointKind::Cone => "cone",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct BodySetup {
    pub mass: f32,
    pub restitution: f32,
    pub friction: f32,
    /// Linear and angular damping.
    pub damping: [f32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct JointSetup {
    /// Child bone; the joint links it to its parent bone.
    pub body_index: u16,
    #[serde(rename = "joint_type")]
    pub kind: JointKind,
    #[serde(default)]
    pub body1_offset: [f32; 3],
    #[serde(default)]
    pub body2_offset: [f32; 3],
    #[serde(default)]
    pub body1_angle: [f32; 3],
    #[serde(default)]
    pub body2_angle: [f32; 3],
    #[serde(rename = "joint_limit", default)]
    pub limit: [f32; 3],
}

impl JointSetup {
    pub fn body1_angle(&self) -> Vec3 {
        Vec3::from_array(self.body1_angle)
    }

    pub fn body2_angle(&self) -> Vec3 {
        Vec3::from_array(self.body2_angle)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct RagdollSetup {
    pub hit_callback: String,
    #[serde(default)]
    pub joint_cfm: f32,
    #[serde(default)]
    pub joint_erp: f32,
    #[serde(rename = "body")]
    pub bodies: Vec<BodySetup>,
    #[serde(rename = "joint")]
    pub joints: Vec<JointSetup>,
}

impl RagdollSetup {
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    pub fn clear(&mut self) {
        self.bodies.clear();
        self.joints.clear();
        self.hit_callback.clear();
    }

    pub fn from_script_map(map: &Map) -> Result<Self, SetupError> {
        let hit_callback = map
            .get("hit_callback")
            .filter(|value| value.is_string())
            .and_then(|value| value.clone().into_string().ok())
            .ok_or_else(|| SetupError::ExpectedString("hit_callback".to_string()))?;
        let joint_cfm = scalar_field(map, "joint_cfm", "")?;
        let joint_erp = scalar_field(map, "joint_erp", "")?;

        let bodies = map_entries(map, "body", "body_count")?
            .iter()
            .enumerate()
            .map(|(index, entry)| parse_body(entry, &format!("body[{index}].")))
            .collect::<Result<Vec<_>, _>>()?;
        let joints = map_entries(map, "joint", "joint_count")?
            .iter()
            .enumerate()
            .map(|(index, entry)| parse_joint(entry, &format!("joint[{index}].")))
            .collect::<Result<Vec<_>, _>>()?;

        let setup = Self { hit_callback, joint_cfm, joint_erp, bodies, joints };
        setup.validate()?;
        Ok(setup)
    }

    pub fn from_json_str(source: &str) -> Result<Self> {
        let setup: Self = serde_json::from_str(source).context("Failed to parse ragdoll setup JSON")?;
        setup.validate()?;
        Ok(setup)
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)
            .with_context(|| format!("Failed to read ragdoll setup {}", path.display()))?;
        Self::from_json_str(&source).with_context(|| format!("Invalid ragdoll setup {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), SetupError> {
        if self.bodies.is_empty() {
            return Err(SetupError::Empty("body".to_string()));
        }
        if self.joints.is_empty() {
            return Err(SetupError::Empty("joint".to_string()));
        }
        ensure_finite("joint_cfm", &[self.joint_cfm])?;
        ensure_finite("joint_erp", &[self.joint_erp])?;
        for (index, body) in self.bodies.iter().enumerate() {
            ensure_finite(&format!("body[{index}]"), &[body.mass, body.restitution, body.friction])?;
            ensure_finite(&format!("body[{index}].damping"), &body.damping)?;
            if body.mass < 0.0 {
                return Err(SetupError::Negative {
                    field: format!("body[{index}].mass"),
                    value: f64::from(body.mass),
                });
            }
        }
        for (index, joint) in self.joints.iter().enumerate() {
            let prefix = format!("joint[{index}]");
            ensure_finite(&format!("{prefix}.body1_offset"), &joint.body1_offset)?;
            ensure_finite(&format!("{prefix}.body2_offset"), &joint.body2_offset)?;
            ensure_finite(&format!("{prefix}.body1_angle"), &joint.body1_angle)?;
            ensure_finite(&format!("{prefix}.body2_angle"), &joint.body2_angle)?;
            ensure_finite(&format!("{prefix}.joint_limit"), &joint.limit)?;
        }
        Ok(())
    }
}

fn ensure_finite(field: &str, values: &[f32]) -> Result<(), SetupError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(SetupError::NonFinite(field.to_string()))
    }
}

fn parse_body(map: &Map, prefix: &str) -> Result<BodySetup, SetupError> {
    let damping = number_array(map, "damping", prefix)?;
    Ok(BodySetup {
        mass: scalar_field(map, "mass", prefix)?,
        restitution: scalar_field(map, "restitution", prefix)?,
        friction: scalar_field(map, "friction", prefix)?,
        damping: [component(&damping, 0, prefix, "damping")?, component(&damping, 1, prefix, "damping")?],
    })
}

fn parse_joint(map: &Map, prefix: &str) -> Result<JointSetup, SetupError> {
    let body_index = index_field(map, "body_index", prefix)?;
    let joint_type = index_field(map, "joint_type", prefix)?;
    Ok(JointSetup {
        body_index,
        kind: JointKind::try_from(joint_type)?,
        body1_offset: vector3_field(map, "body1_offset", prefix)?,
        body2_offset: vector3_field(map, "body2_offset", prefix)?,
        body1_angle: vector3_field(map, "body1_angle", prefix)?,
        body2_angle: vector3_field(map, "body2_angle", prefix)?,
        limit: vector3_field(map, "joint_limit", prefix)?,
    })
}

fn number(value: &Dynamic) -> Option<f64> {
    if let Ok(float) = value.as_float() {
        return Some(f64::from(float));
    }
    value.as_int().ok().map(|int| int as f64)
}

/// Numeric field; an absent or unit value reads as zero.
fn scalar_field(map: &Map, key: &str, prefix: &str) -> Result<f32, SetupError> {
    match map.get(key) {
        None => Ok(0.0),
        Some(value) if value.is_unit() => Ok(0.0),
        Some(value) => {
            number(value).map(|v| v as f32).ok_or_else(|| SetupError::ExpectedNumber(format!("{prefix}{key}")))
        }
    }
}

fn index_field(map: &Map, key: &str, prefix: &str) -> Result<u16, SetupError> {
    let value = f64::from(scalar_field(map, key, prefix)?);
    if value < 0.0 {
        return Err(SetupError::Negative { field: format!("{prefix}{key}"), value });
    }
    Ok(value.min(f64::from(u16::MAX)) as u16)
}

fn number_array(map: &Map, key: &str, prefix: &str) -> Result<Array, SetupError> {
    map.get(key)
        .and_then(|value| value.clone().try_cast::<Array>())
        .ok_or_else(|| SetupError::ExpectedArray(format!("{prefix}{key}")))
}

/// Missing trailing components read as zero.
fn component(values: &Array, index: usize, prefix: &str, key: &str) -> Result<f32, SetupError> {
    match values.get(index) {
        None => Ok(0.0),
        Some(value) if value.is_unit() => Ok(0.0),
        Some(value) => number(value)
            .map(|v| v as f32)
            .ok_or_else(|| SetupError::ExpectedNumber(format!("{prefix}{key}[{index}]"))),
    }
}

fn vector3_field(map: &Map, key: &str, prefix: &str) -> Result<[f32; 3], SetupError> {
    let values = number_array(map, key, prefix)?;
    Ok([
        component(&values, 0, prefix, key)?,
        component(&values, 1, prefix, key)?,
        component(&values, 2, prefix, key)?,
    ])
}

/// Collects the map entries of an array field, honouring an optional explicit count.
fn map_entries(map: &Map, key: &str, count_key: &str) -> Result<Vec<Map>, SetupError> {
    let entries = number_array(map, key, "")?;
    let count = match map.get(count_key) {
        Some(value) if !value.is_unit() => usize::from(index_field(map, count_key, "")?),
        _ => entries.len(),
    };
    if count == 0 {
        return Err(SetupError::Empty(key.to_string()));
    }
    if count > entries.len() {
        return Err(SetupError::CountExceedsEntries {
            field: key.to_string(),
            count,
            available: entries.len(),
        });
    }
    entries
        .into_iter()
        .take(count)
        .enumerate()
        .map(|(index, entry)| {
            entry.try_cast::<Map>().ok_or_else(|| SetupError::ExpectedMap { field: key.to_string(), index })
        })
        .collect()
}
