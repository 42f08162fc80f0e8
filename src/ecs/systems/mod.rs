use bevy_ecs::prelude::Resource;

mod physics;
mod skeleton;

pub use physics::*;
pub use skeleton::*;

#[derive(Resource, Clone, Copy)]
pub struct TimeDelta(pub f32);
