use anyhow::{anyhow, Context, Result};
use glam::Vec3;
use kestrel_ragdoll::assets::AssetManager;
use kestrel_ragdoll::cli::CheckArgs;
use kestrel_ragdoll::config::RagdollConfig;
use kestrel_ragdoll::ecs::{EcsWorld, Transform3D};
use kestrel_ragdoll::events::GameEvent;
use kestrel_ragdoll::scripts::ScriptHost;
use serde::Serialize;
use std::process;

const SKELETON_KEY: &str = "subject";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run() {
        Ok(report) => {
            match serde_json::to_string_pretty(&report) {
                Ok(text) => println!("{text}"),
                Err(err) => eprintln!("ragdoll_check error: {err}"),
            }
            if !report.created {
                process::exit(2);
            }
        }
        Err(err) => {
            eprintln!("ragdoll_check error: {err:?}");
            process::exit(1);
        }
    }
}

#[derive(Serialize)]
struct BoneReport {
    bone: u32,
    name: String,
    position: [f32; 3],
    dynamic: bool,
    sleeping: bool,
}

#[derive(Serialize)]
struct CheckReport {
    created: bool,
    error: Option<String>,
    steps: u32,
    dt: f32,
    joint_count: usize,
    bones: Vec<BoneReport>,
    events: Vec<String>,
}

fn print_usage() {
    eprintln!(
        "Usage: ragdoll_check --script <file.rhai> --skeleton <file.gltf> [--index N] [--steps N] [--dt SECONDS] [--config FILE]"
    );
}

fn run() -> Result<CheckReport> {
    let args = CheckArgs::parse_from_env()?;
    if args.show_help {
        print_usage();
        process::exit(0);
    }
    let mut config = match args.config.as_ref() {
        Some(path) => RagdollConfig::load(path)?,
        None => RagdollConfig::default(),
    };
    config.apply_overrides(&args.config_overrides());
    let script = args.script.as_ref().ok_or_else(|| anyhow!("--script is required"))?;
    let skeleton = args.skeleton.as_ref().ok_or_else(|| anyhow!("--skeleton is required"))?;

    let mut assets = AssetManager::new().with_bone_thickness(config.ragdoll.bone_thickness);
    let skeleton_path = skeleton.to_str().ok_or_else(|| anyhow!("Skeleton path is not valid UTF-8"))?;
    assets.retain_skeleton(SKELETON_KEY, Some(skeleton_path))?;
    let skeleton_asset =
        assets.skeleton(SKELETON_KEY).ok_or_else(|| anyhow!("Skeleton '{SKELETON_KEY}' failed to load"))?;

    let mut ecs = EcsWorld::with_config(&config);
    ecs.insert_ground(0.0);
    let entity = ecs
        .spawn_skeletal_entity(&assets, SKELETON_KEY, Transform3D::from_translation(Vec3::new(0.0, 1.0, 0.0)), Vec3::ZERO)
        .context("Spawning skeletal entity")?;
    if !ecs.attach_bone_bodies(entity, config.ragdoll.ghost_colliders) {
        return Err(anyhow!("Failed to attach bone bodies to entity {}", entity.index()));
    }

    let mut host = ScriptHost::new(script);
    let (created, error) = match host.create_ragdoll(&mut ecs, entity, args.index) {
        Ok(()) => (true, None),
        Err(err) => (false, Some(format!("{err:#}"))),
    };

    let dt = config.physics.fixed_dt;
    let mut events: Vec<GameEvent> = host.dispatch_events(&mut ecs);
    if created {
        for _ in 0..args.steps {
            ecs.fixed_step(dt);
            events.extend(host.dispatch_events(&mut ecs));
        }
    }

    let joint_count = ecs.ragdoll_info(entity).map(|info| info.joints.len()).unwrap_or(0);
    let bones = ecs
        .body_snapshot(entity)
        .into_iter()
        .map(|snapshot| BoneReport {
            bone: snapshot.bone,
            name: skeleton_asset
                .bones
                .get(snapshot.bone as usize)
                .map(|bone| bone.name.to_string())
                .unwrap_or_default(),
            position: snapshot.translation.to_array(),
            dynamic: snapshot.dynamic,
            sleeping: snapshot.sleeping,
        })
        .collect();
    Ok(CheckReport {
        created,
        error,
        steps: if created { args.steps } else { 0 },
        dt,
        joint_count,
        bones,
        events: events.iter().map(ToString::to_string).collect(),
    })
}
