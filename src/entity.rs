//! Best-effort shadow copies of the entities a connection has seen.

mod fields;
mod tracker;

pub use fields::{layers, shadowed_indices, FieldSpec, ShadowedField};
pub use tracker::EntityTracker;

use crate::protocol::{decoder, metadata::MetadataValue, Decode, Decoder, Encode, Encoder};
use bitflags::bitflags;
use std::collections::BTreeMap;

/// Wrapper for a Minecraft network entity ID.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(i32);

impl EntityId {
    pub fn new(id: i32) -> Self {
        Self(id)
    }

    pub fn as_i32(self) -> i32 {
        self.0
    }
}

/// Mob type id as sent in Spawn Mob.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MobType(pub u8);

/// Selects which metadata field tables apply to an entity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::AsRefStr)]
pub enum EntityKind {
    /// Objects other than armor stands.
    Untyped,
    ArmorStand,
    Player,
    Creeper,
    Zombie,
    Ageable(MobType),
    Mob(MobType),
}

impl EntityKind {
    pub fn is_living(self) -> bool {
        !matches!(self, EntityKind::Untyped)
    }

    /// Mobs driven by server-side AI.
    pub fn is_insentient(self) -> bool {
        matches!(
            self,
            EntityKind::Creeper | EntityKind::Zombie | EntityKind::Ageable(_) | EntityKind::Mob(_)
        )
    }
}

/// Stable, typed reference to a tracked entity.
///
/// `generation` tells apart two entities that reused the same numeric id.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntityHandle {
    pub id: EntityId,
    pub kind: EntityKind,
    pub generation: u64,
}

/// An entity id field of a packet.
///
/// Freshly decoded packets carry `Raw` ids; the tracker swaps in `Tracked`
/// handles for ids it knows. Both encode as the numeric id.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Raw(i32),
    Tracked(EntityHandle),
}

impl EntityRef {
    pub fn id(self) -> EntityId {
        match self {
            EntityRef::Raw(id) => EntityId(id),
            EntityRef::Tracked(handle) => handle.id,
        }
    }

    pub fn handle(self) -> Option<EntityHandle> {
        match self {
            EntityRef::Raw(_) => None,
            EntityRef::Tracked(handle) => Some(handle),
        }
    }
}

impl From<i32> for EntityRef {
    fn from(id: i32) -> Self {
        EntityRef::Raw(id)
    }
}

impl From<EntityRef> for i32 {
    fn from(entity: EntityRef) -> Self {
        entity.id().as_i32()
    }
}

impl Encode for EntityRef {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_i32((*self).into());
    }
}

impl Decode for EntityRef {
    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        decoder.read_i32().map(EntityRef::Raw)
    }
}

bitflags! {
    /// Bits of the generic `state` field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EntityFlags: u8 {
        const ON_FIRE = 0x01;
        const CROUCHED = 0x02;
        const SPRINTING = 0x08;
        const EATING = 0x10;
        const INVISIBLE = 0x20;
    }
}

/// What the proxy knows about one entity.
#[derive(Clone, Debug, PartialEq)]
pub struct Entity {
    pub kind: EntityKind,
    pub id: EntityId,
    pub generation: u64,
    pub fields: BTreeMap<&'static str, MetadataValue>,
}

impl Entity {
    pub fn handle(&self) -> EntityHandle {
        EntityHandle {
            id: self.id,
            kind: self.kind,
            generation: self.generation,
        }
    }

    pub fn field(&self, name: &str) -> Option<&MetadataValue> {
        self.fields.get(name)
    }

    pub fn flags(&self) -> EntityFlags {
        match self.field("state") {
            Some(MetadataValue::Byte(state)) => {
                EntityFlags::from_bits_truncate(bytemuck::cast(*state))
            }
            _ => EntityFlags::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refs_encode_as_plain_ids() {
        let handle = EntityHandle {
            id: EntityId::new(-5),
            kind: EntityKind::Player,
            generation: 3,
        };
        for entity in [EntityRef::Raw(-5), EntityRef::Tracked(handle)] {
            let mut buf = Vec::new();
            entity.encode(&mut Encoder::new(&mut buf));
            assert_eq!(buf, (-5i32).to_be_bytes());
            assert_eq!(entity.id(), EntityId::new(-5));
        }
    }

    #[test]
    fn flags_from_state() {
        let mut entity = Entity {
            kind: EntityKind::Player,
            id: EntityId::new(1),
            generation: 0,
            fields: BTreeMap::new(),
        };
        assert_eq!(entity.flags(), EntityFlags::empty());
        entity.fields.insert("state", MetadataValue::Byte(0x22));
        assert_eq!(entity.flags(), EntityFlags::CROUCHED | EntityFlags::INVISIBLE);
    }
}
