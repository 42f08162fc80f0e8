mod physics;
pub mod systems;
mod types;
mod world;

pub use physics::*;
pub use types::*;
pub use world::*;
