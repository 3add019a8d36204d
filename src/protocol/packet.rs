//! Typed packet values.
//!
//! Only the fields the proxy needs to reason about are decoded. Everything
//! else stays in trailing byte vectors, so any packet re-encodes to exactly
//! the bytes it was decoded from.
//!
//! Which layout a given packet id uses is decided by the version's
//! [`ProtocolDescriptor`](super::descriptor::ProtocolDescriptor).

use super::{decoder, metadata::Metadata, Decode, Decoder, Encode, Encoder, PacketKind};
use crate::entity::EntityRef;
use minecraft_mitm_proxy_macros::{Decode, Encode, FromVariants};

/// A decoded packet. Treated as an immutable value: rewriting a packet
/// means building a new one.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    pub kind: PacketKind,
    pub data: PacketData,
}

impl Packet {
    pub fn new(kind: PacketKind, data: impl Into<PacketData>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    /// Same kind, different contents.
    pub fn with_data(&self, data: impl Into<PacketData>) -> Self {
        Self::new(self.kind, data)
    }

    /// Encodes the packet id followed by the body.
    pub fn encode_body(&self) -> Vec<u8> {
        let mut body = Vec::new();
        let mut encoder = Encoder::new(&mut body);
        encoder.write_var_int(self.kind.id);
        self.data.encode(&mut encoder);
        body
    }
}

#[derive(Clone, Debug, PartialEq, FromVariants, strum::AsRefStr)]
pub enum PacketData {
    Handshake(Handshake),
    LoginStart(LoginStart),
    EncryptionRequest(EncryptionRequest),
    EncryptionResponse(EncryptionResponse),
    LoginSuccess(LoginSuccess),
    SetCompression(SetCompression),
    ClientboundChat(ClientboundChat),
    ServerboundChat(ServerboundChat),
    SpawnPlayer(SpawnPlayer),
    SpawnObject(SpawnObject),
    SpawnMob(SpawnMob),
    EntityMetadata(EntityMetadata),
    EntityList(EntityList),
    EntityVarInt(EntityVarInt),
    EntityInt(EntityInt),
    Opaque(Opaque),
}

impl PacketData {
    /// The entity a spawn packet introduces.
    pub fn spawned_entity(&self) -> Option<EntityRef> {
        match self {
            Self::SpawnPlayer(p) => Some(p.entity_id),
            Self::SpawnObject(p) => Some(p.entity_id),
            Self::SpawnMob(p) => Some(p.entity_id),
            _ => None,
        }
    }

    /// The first entity referenced by the packet, if any.
    pub fn entity(&self) -> Option<EntityRef> {
        match self {
            Self::EntityMetadata(p) => Some(p.entity_id),
            Self::EntityList(p) => p.entities.first().copied(),
            Self::EntityVarInt(p) => Some(p.entity_id),
            Self::EntityInt(p) => Some(p.entity_id),
            other => other.spawned_entity(),
        }
    }
}

impl Encode for PacketData {
    fn encode(&self, encoder: &mut Encoder) {
        match self {
            Self::Handshake(p) => p.encode(encoder),
            Self::LoginStart(p) => p.encode(encoder),
            Self::EncryptionRequest(p) => p.encode(encoder),
            Self::EncryptionResponse(p) => p.encode(encoder),
            Self::LoginSuccess(p) => p.encode(encoder),
            Self::SetCompression(p) => p.encode(encoder),
            Self::ClientboundChat(p) => p.encode(encoder),
            Self::ServerboundChat(p) => p.encode(encoder),
            Self::SpawnPlayer(p) => p.encode(encoder),
            Self::SpawnObject(p) => p.encode(encoder),
            Self::SpawnMob(p) => p.encode(encoder),
            Self::EntityMetadata(p) => p.encode(encoder),
            Self::EntityList(p) => p.encode(encoder),
            Self::EntityVarInt(p) => p.encode(encoder),
            Self::EntityInt(p) => p.encode(encoder),
            Self::Opaque(p) => p.encode(encoder),
        }
    }
}

/// First packet of every modern connection. Its layout never changes
/// between versions.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct Handshake {
    #[encoding(varint)]
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_state: NextState,
}

/// Intent announced by the Handshake. Anything but a status request
/// (login, or the transfer intent of newer clients) leads to the login
/// sequence.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NextState {
    Status,
    Login,
    Other(i32),
}

impl NextState {
    pub fn id(self) -> i32 {
        match self {
            NextState::Status => 1,
            NextState::Login => 2,
            NextState::Other(id) => id,
        }
    }
}

impl Encode for NextState {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_int(self.id());
    }
}

impl Decode for NextState {
    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(match decoder.read_var_int()? {
            1 => NextState::Status,
            2 => NextState::Login,
            id => NextState::Other(id),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct LoginStart {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct EncryptionRequest {
    pub server_id: String,
    #[encoding(length_prefix = "varint")]
    pub public_key: Vec<u8>,
    #[encoding(length_prefix = "varint")]
    pub verify_token: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct EncryptionResponse {
    #[encoding(length_prefix = "varint")]
    pub shared_secret: Vec<u8>,
    #[encoding(length_prefix = "varint")]
    pub verify_token: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct LoginSuccess {
    pub uuid: String,
    pub username: String,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct SetCompression {
    /// Negative disables compression.
    #[encoding(varint)]
    pub threshold: i32,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct ClientboundChat {
    /// JSON chat component.
    pub json: String,
    pub position: i8,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct ServerboundChat {
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct SpawnPlayer {
    #[encoding(varint)]
    pub entity_id: EntityRef,
    pub uuid: u128,
    /// Fixed-point (1/32 block) coordinates.
    pub x: i32,
    pub y: i32,
    pub z: i32,
    #[encoding(angle)]
    pub yaw: f32,
    #[encoding(angle)]
    pub pitch: f32,
    pub current_item: i16,
    pub metadata: Metadata,
}

/// Vehicles, projectiles, dropped items, armor stands...
#[derive(Clone, Debug, PartialEq)]
pub struct SpawnObject {
    pub entity_id: EntityRef,
    pub object_type: i8,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub pitch: f32,
    pub yaw: f32,
    pub data: i32,
    /// Only on the wire when `data > 0`.
    pub velocity: Option<[i16; 3]>,
}

impl Encode for SpawnObject {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_int(self.entity_id.into());
        encoder.write_i8(self.object_type);
        encoder.write_i32(self.x);
        encoder.write_i32(self.y);
        encoder.write_i32(self.z);
        encoder.write_angle(self.pitch);
        encoder.write_angle(self.yaw);
        encoder.write_i32(self.data);
        if self.data > 0 {
            for component in self.velocity.unwrap_or_default() {
                encoder.write_i16(component);
            }
        }
    }
}

impl Decode for SpawnObject {
    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        let entity_id = EntityRef::from(decoder.read_var_int()?);
        let object_type = decoder.read_i8()?;
        let x = decoder.read_i32()?;
        let y = decoder.read_i32()?;
        let z = decoder.read_i32()?;
        let pitch = decoder.read_angle()?;
        let yaw = decoder.read_angle()?;
        let data = decoder.read_i32()?;
        let velocity = if data > 0 {
            Some([
                decoder.read_i16()?,
                decoder.read_i16()?,
                decoder.read_i16()?,
            ])
        } else {
            None
        };
        Ok(Self {
            entity_id,
            object_type,
            x,
            y,
            z,
            pitch,
            yaw,
            data,
            velocity,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct SpawnMob {
    #[encoding(varint)]
    pub entity_id: EntityRef,
    pub mob_type: u8,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    #[encoding(angle)]
    pub yaw: f32,
    #[encoding(angle)]
    pub pitch: f32,
    #[encoding(angle)]
    pub head_pitch: f32,
    pub velocity_x: i16,
    pub velocity_y: i16,
    pub velocity_z: i16,
    pub metadata: Metadata,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct EntityMetadata {
    #[encoding(varint)]
    pub entity_id: EntityRef,
    pub metadata: Metadata,
}

/// A varint-counted list of varint entity ids, e.g. Destroy Entities.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityList {
    pub entities: Vec<EntityRef>,
    pub trailing: Vec<u8>,
}

impl Encode for EntityList {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_int(self.entities.len().try_into().unwrap_or(i32::MAX));
        for entity in &self.entities {
            encoder.write_var_int((*entity).into());
        }
        encoder.write_slice(&self.trailing);
    }
}

impl Decode for EntityList {
    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        let count = usize::try_from(decoder.read_var_int()?)?;
        let mut entities = Vec::with_capacity(count.min(decoder.buffer().len()));
        for _ in 0..count {
            entities.push(EntityRef::from(decoder.read_var_int()?));
        }
        let trailing = decoder.consume_rest().to_vec();
        Ok(Self { entities, trailing })
    }
}

/// Any packet that leads with a varint entity id.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct EntityVarInt {
    #[encoding(varint)]
    pub entity_id: EntityRef,
    #[encoding(length_prefix = "inferred")]
    pub trailing: Vec<u8>,
}

/// Any packet that leads with a 32-bit entity id.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct EntityInt {
    pub entity_id: EntityRef,
    #[encoding(length_prefix = "inferred")]
    pub trailing: Vec<u8>,
}

/// A packet the proxy does not look into.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct Opaque {
    #[encoding(length_prefix = "inferred")]
    pub data: Vec<u8>,
}
