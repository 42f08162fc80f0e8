use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Arc;

pub mod skeletal;

pub use skeletal::{BoneBounds, BoneDef, SkeletonAsset, SkeletonBone};

const DEFAULT_BONE_THICKNESS: f32 = 0.05;

pub struct AssetManager {
    skeletons: HashMap<String, Arc<SkeletonAsset>>,
    skeleton_sources: HashMap<String, String>,
    skeleton_refs: HashMap<String, usize>,
    bone_thickness: f32,
}

impl Default for AssetManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetManager {
    pub fn new() -> Self {
        Self {
            skeletons: HashMap::new(),
            skeleton_sources: HashMap::new(),
            skeleton_refs: HashMap::new(),
            bone_thickness: DEFAULT_BONE_THICKNESS,
        }
    }

    pub fn with_bone_thickness(mut self, thickness: f32) -> Self {
        self.bone_thickness = thickness.max(0.0);
        self
    }

    /// Registers an already assembled skeleton under `key`, replacing any previous entry.
    pub fn insert_skeleton(&mut self, key: &str, skeleton: SkeletonAsset) -> Arc<SkeletonAsset> {
        let skeleton = Arc::new(skeleton);
        self.skeletons.insert(key.to_string(), Arc::clone(&skeleton));
        *self.skeleton_refs.entry(key.to_string()).or_insert(0) += 1;
        skeleton
    }

    pub fn retain_skeleton(&mut self, key: &str, gltf_path: Option<&str>) -> Result<()> {
        if self.skeletons.contains_key(key) {
            *self.skeleton_refs.entry(key.to_string()).or_insert(0) += 1;
            if let Some(path) = gltf_path {
                self.skeleton_sources.insert(key.to_string(), path.to_string());
            }
            return Ok(());
        }
        let path_owned = if let Some(path) = gltf_path {
            path.to_string()
        } else if let Some(stored) = self.skeleton_sources.get(key) {
            stored.clone()
        } else {
            return Err(anyhow!("Skeleton '{key}' is not loaded and no GLTF path provided to retain it."));
        };
        let skeleton = skeletal::load_skeleton_from_gltf(&path_owned, self.bone_thickness)?;
        log::debug!(target: "assets", "loaded skeleton '{key}' ({} bones) from {path_owned}", skeleton.bone_count());
        self.skeletons.insert(key.to_string(), Arc::new(skeleton));
        self.skeleton_sources.insert(key.to_string(), path_owned);
        self.skeleton_refs.insert(key.to_string(), 1);
        Ok(())
    }

    pub fn release_skeleton(&mut self, key: &str) -> bool {
        if let Some(count) = self.skeleton_refs.get_mut(key) {
            if *count > 0 {
                *count -= 1;
                if *count == 0 {
                    self.skeleton_refs.remove(key);
                    self.skeletons.remove(key);
                }
                return true;
            }
        }
        false
    }

    pub fn skeleton(&self, key: &str) -> Option<Arc<SkeletonAsset>> {
        self.skeletons.get(key).cloned()
    }

    pub fn skeleton_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.skeletons.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn skeleton_source(&self, key: &str) -> Option<&str> {
        self.skeleton_sources.get(key).map(|s| s.as_str())
    }
}
