use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct PhysicsConfig {
    #[serde(default = "PhysicsConfig::default_gravity")]
    pub gravity: [f32; 3],
    #[serde(default = "PhysicsConfig::default_fixed_dt")]
    pub fixed_dt: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RagdollTuning {
    /// Linear and angular velocity below which ragdoll bodies may fall asleep.
    #[serde(default = "RagdollTuning::default_sleep_threshold")]
    pub sleep_threshold: f32,
    /// Fraction of the root bone's inner radius used as CCD prediction distance.
    #[serde(default = "RagdollTuning::default_ccd_prediction_factor")]
    pub ccd_prediction_factor: f32,
    #[serde(default = "RagdollTuning::default_bone_thickness")]
    pub bone_thickness: f32,
    #[serde(default = "RagdollTuning::default_ghost_colliders")]
    pub ghost_colliders: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RagdollConfig {
    #[serde(default)]
    pub physics: PhysicsConfig,
    #[serde(default)]
    pub ragdoll: RagdollTuning,
}

#[derive(Debug, Clone, Default)]
pub struct RagdollConfigOverrides {
    pub fixed_dt: Option<f32>,
    pub sleep_threshold: Option<f32>,
}

impl PhysicsConfig {
    fn default_gravity() -> [f32; 3] {
        [0.0, -9.81, 0.0]
    }

    fn default_fixed_dt() -> f32 {
        1.0 / 60.0
    }
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self { gravity: Self::default_gravity(), fixed_dt: Self::default_fixed_dt() }
    }
}

impl RagdollTuning {
    fn default_sleep_threshold() -> f32 {
        0.4
    }

    fn default_ccd_prediction_factor() -> f32 {
        0.8
    }

    fn default_bone_thickness() -> f32 {
        0.05
    }

    const fn default_ghost_colliders() -> bool {
        true
    }
}

impl Default for RagdollTuning {
    fn default() -> Self {
        Self {
            sleep_threshold: Self::default_sleep_threshold(),
            ccd_prediction_factor: Self::default_ccd_prediction_factor(),
            bone_thickness: Self::default_bone_thickness(),
            ghost_colliders: Self::default_ghost_colliders(),
        }
    }
}

impl RagdollConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &RagdollConfigOverrides) {
        if let Some(dt) = overrides.fixed_dt {
            self.physics.fixed_dt = dt;
        }
        if let Some(threshold) = overrides.sleep_threshold {
            self.ragdoll.sleep_threshold = threshold;
        }
    }
}

impl RagdollConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.fixed_dt.is_none() && self.sleep_threshold.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let cfg: RagdollConfig = serde_json::from_str(r#"{ "ragdoll": { "sleep_threshold": 1.5 } }"#)
            .expect("partial config parses");
        assert!((cfg.ragdoll.sleep_threshold - 1.5).abs() < f32::EPSILON);
        assert!((cfg.ragdoll.ccd_prediction_factor - 0.8).abs() < f32::EPSILON);
        assert_eq!(cfg.physics.gravity, [0.0, -9.81, 0.0]);
        assert!(cfg.ragdoll.ghost_colliders);
    }

    #[test]
    fn load_reads_file_and_overrides_apply() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{ "physics": {{ "gravity": [0.0, -1.0, 0.0], "fixed_dt": 0.01 }} }}"#)
            .expect("write config");
        let mut cfg = RagdollConfig::load(file.path()).expect("config loads");
        assert_eq!(cfg.physics.gravity, [0.0, -1.0, 0.0]);

        let overrides = RagdollConfigOverrides { fixed_dt: Some(0.02), sleep_threshold: None };
        assert!(!overrides.is_empty());
        cfg.apply_overrides(&overrides);
        assert!((cfg.physics.fixed_dt - 0.02).abs() < f32::EPSILON);
    }

    #[test]
    fn load_or_default_tolerates_missing_file() {
        let cfg = RagdollConfig::load_or_default("does/not/exist.json");
        assert!((cfg.physics.fixed_dt - 1.0 / 60.0).abs() < f32::EPSILON);
    }
}
