use anyhow::{anyhow, bail, Context, Result};
use glam::{Mat4, Vec3};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Axis-aligned bounds of a bone's collision volume, in the bone's local space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneBounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoneBounds {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min: min.min(max), max: min.max(max) }
    }

    pub fn cube(half: f32) -> Self {
        Self::new(Vec3::splat(-half), Vec3::splat(half))
    }

    /// Bounds enclosing every point, grown by `thickness` on each side.
    pub fn enclosing(points: impl IntoIterator<Item = Vec3>, thickness: f32) -> Self {
        let mut min = Vec3::ZERO;
        let mut max = Vec3::ZERO;
        for point in points {
            min = min.min(point);
            max = max.max(point);
        }
        let pad = Vec3::splat(thickness.max(0.0));
        Self { min: min - pad, max: max + pad }
    }

    pub fn extents(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn half_extents(&self) -> Vec3 {
        self.extents() * 0.5
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Smallest extent of the box. Used to size swept volumes for fast-moving bones.
    pub fn inner_radius(&self) -> f32 {
        let e = self.extents();
        e.x.min(e.y).min(e.z)
    }
}

#[derive(Clone, Debug)]
pub struct SkeletonBone {
    pub name: Arc<str>,
    pub parent: Option<u32>,
    pub rest_local: Mat4,
    pub rest_world: Mat4,
    pub bounds: BoneBounds,
}

/// Bone description used to assemble a skeleton outside of the glTF importer.
#[derive(Clone, Debug)]
pub struct BoneDef {
    pub name: String,
    pub parent: Option<u32>,
    pub rest_local: Mat4,
    pub bounds: BoneBounds,
}

#[derive(Clone, Debug)]
pub struct SkeletonAsset {
    pub name: Arc<str>,
    pub bones: Arc<[SkeletonBone]>,
    pub roots: Arc<[u32]>,
}

impl SkeletonAsset {
    pub fn from_bones(name: impl Into<Arc<str>>, defs: Vec<BoneDef>) -> Result<Self> {
        let name = name.into();
        if defs.is_empty() {
            bail!("Skeleton '{name}' has no bones");
        }
        let count = defs.len();
        for (index, def) in defs.iter().enumerate() {
            if let Some(parent) = def.parent {
                if parent as usize >= count {
                    bail!("Bone '{}' references parent {parent} outside of {count} bones", def.name);
                }
                if parent as usize == index {
                    bail!("Bone '{}' is its own parent", def.name);
                }
            }
        }

        let locals: Vec<Mat4> = defs.iter().map(|def| def.rest_local).collect();
        let parents: Vec<Option<u32>> = defs.iter().map(|def| def.parent).collect();
        let mut cache: Vec<Option<Mat4>> = vec![None; count];
        let mut bones = Vec::with_capacity(count);
        let mut roots = Vec::new();
        for (index, def) in defs.into_iter().enumerate() {
            let rest_world = bone_world_matrix(index, &locals, &parents, &mut cache)
                .with_context(|| format!("Skeleton '{name}'"))?;
            if def.parent.is_none() {
                roots.push(index as u32);
            }
            bones.push(SkeletonBone {
                name: Arc::from(def.name),
                parent: def.parent,
                rest_local: def.rest_local,
                rest_world,
                bounds: def.bounds,
            });
        }
        if roots.is_empty() {
            bail!("Skeleton '{name}' has no root bone");
        }
        Ok(Self { name, bones: Arc::from(bones.into_boxed_slice()), roots: Arc::from(roots.into_boxed_slice()) })
    }

    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    pub fn bone_index(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|bone| bone.name.as_ref() == name)
    }
}

fn bone_world_matrix(
    index: usize,
    locals: &[Mat4],
    parents: &[Option<u32>],
    cache: &mut [Option<Mat4>],
) -> Result<Mat4> {
    // Walk up to the first cached ancestor, then fold back down.
    let mut chain = Vec::new();
    let mut cursor = Some(index);
    while let Some(current) = cursor {
        if cache[current].is_some() {
            break;
        }
        if chain.len() > locals.len() {
            bail!("bone {index} is part of a parent cycle");
        }
        chain.push(current);
        cursor = parents[current].map(|p| p as usize);
    }
    let mut world = cursor.and_then(|c| cache[c]).unwrap_or(Mat4::IDENTITY);
    for &bone in chain.iter().rev() {
        world *= locals[bone];
        cache[bone] = Some(world);
    }
    Ok(world)
}

/// Imports the first skin of a glTF document as a skeleton.
///
/// Bone bounds span the bone origin and the rest offsets of its child joints,
/// padded by `thickness`. Leaf bones get a cube of `thickness` half-size.
pub fn load_skeleton_from_gltf(path: impl AsRef<Path>, thickness: f32) -> Result<SkeletonAsset> {
    let path_ref = path.as_ref();
    let (document, _buffers, _) = gltf::import(path_ref)
        .with_context(|| format!("Failed to import GLTF skeleton from {}", path_ref.display()))?;

    let mut skins = document.skins();
    let skin =
        skins.next().ok_or_else(|| anyhow!("GLTF '{}' does not contain a skin", path_ref.display()))?;
    if skins.next().is_some() {
        log::warn!(
            target: "assets",
            "GLTF '{}' contains multiple skins; only the first will be imported.",
            path_ref.display()
        );
    }

    let skeleton_name: Arc<str> = Arc::<str>::from(
        skin.name()
            .map(|s| s.to_string())
            .or_else(|| {
                path_ref.file_stem().and_then(|stem| stem.to_str()).map(|stem| format!("{stem}_skeleton"))
            })
            .unwrap_or_else(|| "skeleton".to_string()),
    );

    let joint_nodes: Vec<_> = skin.joints().collect();
    if joint_nodes.is_empty() {
        bail!("GLTF '{}' skin '{}' has no joints", path_ref.display(), skeleton_name);
    }

    let node_to_joint: HashMap<usize, u32> =
        joint_nodes.iter().enumerate().map(|(idx, node)| (node.index(), idx as u32)).collect();

    let mut parent_by_joint: Vec<Option<u32>> = vec![None; joint_nodes.len()];
    let mut children_by_joint: Vec<Vec<u32>> = vec![Vec::new(); joint_nodes.len()];
    for (parent_idx, node) in joint_nodes.iter().enumerate() {
        for child in node.children() {
            if let Some(&child_joint) = node_to_joint.get(&child.index()) {
                parent_by_joint[child_joint as usize] = Some(parent_idx as u32);
                children_by_joint[parent_idx].push(child_joint);
            }
        }
    }

    let locals: Vec<Mat4> =
        joint_nodes.iter().map(|node| Mat4::from_cols_array_2d(&node.transform().matrix())).collect();

    let mut defs = Vec::with_capacity(joint_nodes.len());
    for (index, node) in joint_nodes.iter().enumerate() {
        let offsets = children_by_joint[index]
            .iter()
            .map(|&child| locals[child as usize].w_axis.truncate());
        let bounds = if children_by_joint[index].is_empty() {
            BoneBounds::cube(thickness)
        } else {
            BoneBounds::enclosing(offsets, thickness)
        };
        defs.push(BoneDef {
            name: node.name().map(|n| n.to_string()).unwrap_or_else(|| format!("joint_{index}")),
            parent: parent_by_joint[index],
            rest_local: locals[index],
            bounds,
        });
    }

    SkeletonAsset::from_bones(skeleton_name, defs)
}
