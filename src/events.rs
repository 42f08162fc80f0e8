use bevy_ecs::prelude::{Entity, Resource};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    RagdollCreated { entity: Entity, bodies: usize, joints: usize },
    RagdollDeleted { entity: Entity },
    RagdollFailed { entity: Entity, reason: String },
    RagdollHit { entity: Entity, bone: u32, other: Option<Entity>, callback: String },
    ScriptMessage { message: String },
}

impl fmt::Display for GameEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameEvent::RagdollCreated { entity, bodies, joints } => {
                write!(f, "RagdollCreated entity={} bodies={} joints={}", entity.index(), bodies, joints)
            }
            GameEvent::RagdollDeleted { entity } => write!(f, "RagdollDeleted entity={}", entity.index()),
            GameEvent::RagdollFailed { entity, reason } => {
                write!(f, "RagdollFailed entity={} reason={}", entity.index(), reason)
            }
            GameEvent::RagdollHit { entity, bone, other, callback } => match other {
                Some(other) => write!(
                    f,
                    "RagdollHit entity={} bone={} other={} callback={}",
                    entity.index(),
                    bone,
                    other.index(),
                    callback
                ),
                None => write!(f, "RagdollHit entity={} bone={} callback={}", entity.index(), bone, callback),
            },
            GameEvent::ScriptMessage { message } => write!(f, "ScriptMessage {message}"),
        }
    }
}

#[derive(Default, Resource)]
pub struct EventBus {
    events: Vec<GameEvent>,
}

impl EventBus {
    pub fn push(&mut self, event: GameEvent) {
        self.events.push(event);
    }

    pub fn drain(&mut self) -> Vec<GameEvent> {
        self.events.drain(..).collect()
    }
}
