pub mod assets;
pub mod cli;
pub mod config;
pub mod ecs;
pub mod events;
pub mod ragdoll;
pub mod scripts;

pub use ecs::EcsWorld;
pub use ragdoll::{RagdollError, RagdollSetup};
pub use scripts::ScriptHost;
