use super::TimeDelta;
use crate::ecs::physics::RapierState;
use crate::ecs::types::RagdollJoints;
use crate::events::{EventBus, GameEvent};
use bevy_ecs::prelude::*;

pub fn sys_step_rapier(
    mut rapier: ResMut<RapierState>,
    mut events: ResMut<EventBus>,
    ragdolls: Query<&RagdollJoints>,
    dt: Res<TimeDelta>,
) {
    if dt.0 > 0.0 {
        rapier.step(dt.0);
    }
    for (owner, other) in rapier.drain_bone_contacts() {
        let Ok(joints) = ragdolls.get(owner.entity) else {
            continue;
        };
        if joints.hit_callback.is_empty() {
            continue;
        }
        // Contacts between bones of the same ragdoll are not hits.
        let other = other.map(|o| o.entity);
        if other == Some(owner.entity) {
            continue;
        }
        events.push(GameEvent::RagdollHit {
            entity: owner.entity,
            bone: owner.bone,
            other,
            callback: joints.hit_callback.clone(),
        });
    }
}
