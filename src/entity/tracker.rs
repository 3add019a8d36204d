use super::{fields, Entity, EntityHandle, EntityId, EntityKind, EntityRef};
use crate::protocol::{
    descriptor::{PacketRole, ProtocolDescriptor},
    metadata::Metadata,
    packet::{Packet, PacketData},
};
use ahash::AHashMap;
use std::collections::BTreeMap;

/// Mirrors the entities of one connection, built only from observed
/// clientbound traffic, and swaps raw entity ids in packets for handles.
///
/// Never fails: ids it does not know are left as they are.
#[derive(Debug, Default)]
pub struct EntityTracker {
    entities: AHashMap<EntityId, Entity>,
    next_generation: u64,
}

impl EntityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// The entity behind a handle, unless it has since been removed or its
    /// id reused.
    pub fn resolve(&self, handle: EntityHandle) -> Option<&Entity> {
        self.get(handle.id)
            .filter(|entity| entity.generation == handle.generation)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }

    /// Updates the shadow state from `packet` and returns the packet with
    /// tracked entity ids substituted and recognized metadata consumed.
    pub fn observe(&mut self, descriptor: &dyn ProtocolDescriptor, packet: Packet) -> Packet {
        let role = descriptor.role(packet.kind);
        if role == PacketRole::WorldReset {
            tracing::trace!("Clearing {} tracked entities", self.entities.len());
            self.clear();
            return packet;
        }

        let Packet { kind, data } = packet;
        let data = match data {
            PacketData::SpawnPlayer(mut spawn) => {
                let (entity_id, metadata) =
                    self.spawn(spawn.entity_id, EntityKind::Player, spawn.metadata);
                spawn.entity_id = entity_id;
                spawn.metadata = metadata;
                spawn.into()
            }
            PacketData::SpawnMob(mut spawn) => {
                let kind = descriptor.mob_kind(spawn.mob_type);
                let (entity_id, metadata) = self.spawn(spawn.entity_id, kind, spawn.metadata);
                spawn.entity_id = entity_id;
                spawn.metadata = metadata;
                spawn.into()
            }
            PacketData::SpawnObject(mut spawn) => {
                let kind = descriptor.object_kind(spawn.object_type);
                let (entity_id, _) = self.spawn(spawn.entity_id, kind, Metadata::default());
                spawn.entity_id = entity_id;
                spawn.into()
            }
            PacketData::EntityMetadata(mut update) => {
                if let Some(entity) = self.entities.get_mut(&update.entity_id.id()) {
                    update.entity_id = EntityRef::Tracked(entity.handle());
                    update.metadata = apply_metadata(entity, update.metadata);
                }
                update.into()
            }
            PacketData::EntityList(mut list) => {
                for entity in &mut list.entities {
                    *entity = self.substitute(*entity);
                }
                if role == PacketRole::Despawn {
                    for entity in &list.entities {
                        if self.entities.remove(&entity.id()).is_some() {
                            tracing::trace!("Entity {:?} despawned", entity.id());
                        }
                    }
                }
                list.into()
            }
            PacketData::EntityVarInt(mut packet) => {
                packet.entity_id = self.substitute(packet.entity_id);
                packet.into()
            }
            PacketData::EntityInt(mut packet) => {
                packet.entity_id = self.substitute(packet.entity_id);
                packet.into()
            }
            other => other,
        };
        Packet { kind, data }
    }

    fn substitute(&self, entity: EntityRef) -> EntityRef {
        match self.entities.get(&entity.id()) {
            Some(tracked) => EntityRef::Tracked(tracked.handle()),
            None => entity,
        }
    }

    fn spawn(
        &mut self,
        entity: EntityRef,
        kind: EntityKind,
        metadata: Metadata,
    ) -> (EntityRef, Metadata) {
        let id = entity.id();
        let generation = self.next_generation;
        self.next_generation += 1;

        let mut tracked = Entity {
            kind,
            id,
            generation,
            fields: BTreeMap::new(),
        };
        let metadata = apply_metadata(&mut tracked, metadata);
        let handle = tracked.handle();
        if self.entities.insert(id, tracked).is_some() {
            tracing::debug!("Entity {id:?} spawned again without being destroyed");
        }
        tracing::trace!("Tracking {kind:?} entity {id:?}");
        (EntityRef::Tracked(handle), metadata)
    }
}

/// Moves the entries `entity`'s field tables recognize out of the packet's
/// metadata list and records their values on the entity.
fn apply_metadata(entity: &mut Entity, metadata: Metadata) -> Metadata {
    let Metadata {
        mut fields,
        mut entries,
    } = metadata;
    let consumed = fields::consume(entity.kind, &mut entries);
    for update in &consumed {
        entity.fields.insert(update.field, update.value.clone());
    }
    fields.extend(consumed);
    Metadata { fields, entries }
}
