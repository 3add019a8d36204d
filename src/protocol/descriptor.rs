//! Version-specific packet catalogues and the registry that selects one
//! from the version number carried by the Handshake.

use super::{
    packet::{
        ClientboundChat, EncryptionRequest, EncryptionResponse, EntityInt, EntityList,
        EntityMetadata, EntityVarInt, Handshake, LoginStart, LoginSuccess, Opaque, Packet,
        PacketData, ServerboundChat, SetCompression, SpawnMob, SpawnObject, SpawnPlayer,
    },
    Decode, DecodeError, Decoder, Direction, PacketKind, PacketPath, ProtocolPhase,
};
use crate::entity::{EntityKind, MobType};
use ahash::AHashMap;
use once_cell::sync::Lazy;
use std::{fmt, str::FromStr, sync::Arc};

/// What a packet kind means to the entity tracker beyond its layout.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum PacketRole {
    #[default]
    Plain,
    /// Listed entities cease to exist.
    Despawn,
    /// Every tracked entity ceases to exist (dimension change, respawn).
    WorldReset,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("path `{0}` must have exactly three segments: direction, phase and packet name")]
    WrongLength(PacketPath),
    #[error("unknown direction `{0}`")]
    UnknownDirection(String),
    #[error("unknown phase `{0}`")]
    UnknownPhase(String),
    #[error("no packet named `{name}` in {direction:?}/{phase:?}")]
    UnknownPacket {
        direction: Direction,
        phase: ProtocolPhase,
        name: String,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("protocol version {0} is not supported")]
pub struct UnsupportedVersion(pub i32);

/// The codec and namespace of one protocol version.
pub trait ProtocolDescriptor: Send + Sync {
    /// Protocol version number as sent in the Handshake.
    fn version(&self) -> i32;

    /// Human readable game version, e.g. `1.8`.
    fn name(&self) -> &str;

    /// Looks up a `[direction, phase, name]` path in this version's namespace.
    fn resolve_path(&self, path: &PacketPath) -> Result<PacketKind, ResolveError>;

    fn packet_name(&self, kind: PacketKind) -> Option<&str>;

    /// Decodes a frame body (packet id included) into a typed value.
    fn decode(
        &self,
        direction: Direction,
        phase: ProtocolPhase,
        body: &[u8],
    ) -> Result<Packet, DecodeError>;

    /// Encodes a packet into a frame body (packet id included).
    fn encode(&self, packet: &Packet) -> Vec<u8>;

    fn role(&self, kind: PacketKind) -> PacketRole;

    /// Entity kind of a spawned object of the given type.
    fn object_kind(&self, object_type: i8) -> EntityKind;

    /// Entity kind of a spawned mob of the given type.
    fn mob_kind(&self, mob_type: u8) -> EntityKind;
}

/// Which [`PacketData`] variant a packet id decodes into.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Layout {
    Opaque,
    Handshake,
    LoginStart,
    EncryptionRequest,
    EncryptionResponse,
    LoginSuccess,
    SetCompression,
    ClientboundChat,
    ServerboundChat,
    SpawnPlayer,
    SpawnObject,
    SpawnMob,
    EntityMetadata,
    EntityList,
    EntityVarInt,
    EntityInt,
}

impl Layout {
    pub fn decode(self, decoder: &mut Decoder) -> Result<PacketData, DecodeError> {
        Ok(match self {
            Layout::Opaque => Opaque::decode(decoder)?.into(),
            Layout::Handshake => Handshake::decode(decoder)?.into(),
            Layout::LoginStart => LoginStart::decode(decoder)?.into(),
            Layout::EncryptionRequest => EncryptionRequest::decode(decoder)?.into(),
            Layout::EncryptionResponse => EncryptionResponse::decode(decoder)?.into(),
            Layout::LoginSuccess => LoginSuccess::decode(decoder)?.into(),
            Layout::SetCompression => SetCompression::decode(decoder)?.into(),
            Layout::ClientboundChat => ClientboundChat::decode(decoder)?.into(),
            Layout::ServerboundChat => ServerboundChat::decode(decoder)?.into(),
            Layout::SpawnPlayer => SpawnPlayer::decode(decoder)?.into(),
            Layout::SpawnObject => SpawnObject::decode(decoder)?.into(),
            Layout::SpawnMob => SpawnMob::decode(decoder)?.into(),
            Layout::EntityMetadata => EntityMetadata::decode(decoder)?.into(),
            Layout::EntityList => EntityList::decode(decoder)?.into(),
            Layout::EntityVarInt => EntityVarInt::decode(decoder)?.into(),
            Layout::EntityInt => EntityInt::decode(decoder)?.into(),
        })
    }
}

#[derive(Clone, Debug)]
pub struct CatalogueEntry {
    pub kind: PacketKind,
    pub name: &'static str,
    pub layout: Layout,
    pub role: PacketRole,
}

/// Builder for the packet table of a version.
#[derive(Clone, Debug, Default)]
pub struct Catalogue {
    entries: Vec<CatalogueEntry>,
}

impl Catalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packet(
        self,
        direction: Direction,
        phase: ProtocolPhase,
        id: i32,
        name: &'static str,
        layout: Layout,
    ) -> Self {
        self.packet_with_role(direction, phase, id, name, layout, PacketRole::Plain)
    }

    pub fn packet_with_role(
        mut self,
        direction: Direction,
        phase: ProtocolPhase,
        id: i32,
        name: &'static str,
        layout: Layout,
        role: PacketRole,
    ) -> Self {
        self.entries.push(CatalogueEntry {
            kind: PacketKind::new(direction, phase, id),
            name,
            layout,
            role,
        });
        self
    }

    /// Registers a run of packets sharing direction, phase and layout,
    /// numbered consecutively from `first_id`.
    pub fn opaque_run(
        mut self,
        direction: Direction,
        phase: ProtocolPhase,
        first_id: i32,
        names: &[&'static str],
    ) -> Self {
        for (id, name) in (first_id..).zip(names) {
            self = self.packet(direction, phase, id, *name, Layout::Opaque);
        }
        self
    }

    pub fn entries(&self) -> &[CatalogueEntry] {
        &self.entries
    }
}

/// How a version maps object and mob type ids to entity kinds.
#[derive(Clone, Debug, Default)]
pub struct EntityKinds {
    pub armor_stand_object: Option<i8>,
    pub mobs: AHashMap<u8, EntityKind>,
}

/// A [`ProtocolDescriptor`] backed by a [`Catalogue`].
pub struct TableDescriptor {
    version: i32,
    name: String,
    by_kind: AHashMap<PacketKind, CatalogueEntry>,
    by_name: AHashMap<(Direction, ProtocolPhase), AHashMap<&'static str, PacketKind>>,
    entity_kinds: EntityKinds,
}

impl TableDescriptor {
    pub fn new(
        version: i32,
        name: impl Into<String>,
        catalogue: Catalogue,
        entity_kinds: EntityKinds,
    ) -> Self {
        let mut by_kind = AHashMap::new();
        let mut by_name: AHashMap<_, AHashMap<_, _>> = AHashMap::new();
        for entry in catalogue.entries {
            by_name
                .entry((entry.kind.direction, entry.kind.phase))
                .or_default()
                .insert(entry.name, entry.kind);
            by_kind.insert(entry.kind, entry);
        }
        Self {
            version,
            name: name.into(),
            by_kind,
            by_name,
            entity_kinds,
        }
    }
}

impl fmt::Debug for TableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableDescriptor")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("packets", &self.by_kind.len())
            .finish()
    }
}

impl ProtocolDescriptor for TableDescriptor {
    fn version(&self) -> i32 {
        self.version
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn resolve_path(&self, path: &PacketPath) -> Result<PacketKind, ResolveError> {
        let [direction, phase, name] = path.segments() else {
            return Err(ResolveError::WrongLength(path.clone()));
        };
        let direction = Direction::from_str(direction)
            .map_err(|_| ResolveError::UnknownDirection(direction.clone()))?;
        let phase = ProtocolPhase::from_str(phase)
            .map_err(|_| ResolveError::UnknownPhase(phase.clone()))?;
        self.by_name
            .get(&(direction, phase))
            .and_then(|names| names.get(name.as_str()))
            .copied()
            .ok_or_else(|| ResolveError::UnknownPacket {
                direction,
                phase,
                name: name.clone(),
            })
    }

    fn packet_name(&self, kind: PacketKind) -> Option<&str> {
        self.by_kind.get(&kind).map(|entry| entry.name)
    }

    fn decode(
        &self,
        direction: Direction,
        phase: ProtocolPhase,
        body: &[u8],
    ) -> Result<Packet, DecodeError> {
        let mut decoder = Decoder::new(body);
        let id = decoder.read_var_int()?;
        let kind = PacketKind::new(direction, phase, id);
        let layout = self
            .by_kind
            .get(&kind)
            .map_or(Layout::Opaque, |entry| entry.layout);
        let data = layout.decode(&mut decoder)?;
        decoder.finish()?;
        Ok(Packet::new(kind, data))
    }

    fn encode(&self, packet: &Packet) -> Vec<u8> {
        packet.encode_body()
    }

    fn role(&self, kind: PacketKind) -> PacketRole {
        self.by_kind
            .get(&kind)
            .map_or(PacketRole::Plain, |entry| entry.role)
    }

    fn object_kind(&self, object_type: i8) -> EntityKind {
        if self.entity_kinds.armor_stand_object == Some(object_type) {
            EntityKind::ArmorStand
        } else {
            EntityKind::Untyped
        }
    }

    fn mob_kind(&self, mob_type: u8) -> EntityKind {
        self.entity_kinds
            .mobs
            .get(&mob_type)
            .copied()
            .unwrap_or(EntityKind::Mob(MobType(mob_type)))
    }
}

static BUILTIN: Lazy<VersionRegistry> = Lazy::new(|| {
    let mut registry = VersionRegistry::new();
    registry.register(Arc::new(super::v47::descriptor()));
    registry
});

/// Protocol descriptors by version number.
#[derive(Clone, Default)]
pub struct VersionRegistry {
    descriptors: AHashMap<i32, Arc<dyn ProtocolDescriptor>>,
}

impl VersionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every version this crate ships a descriptor for.
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    /// Adds a descriptor, replacing any previous one for the same version.
    pub fn register(&mut self, descriptor: Arc<dyn ProtocolDescriptor>) {
        self.descriptors.insert(descriptor.version(), descriptor);
    }

    pub fn get(&self, version: i32) -> Result<Arc<dyn ProtocolDescriptor>, UnsupportedVersion> {
        self.descriptors
            .get(&version)
            .cloned()
            .ok_or(UnsupportedVersion(version))
    }

    pub fn versions(&self) -> impl Iterator<Item = i32> + '_ {
        self.descriptors.keys().copied()
    }
}

impl fmt::Debug for VersionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut versions: Vec<_> = self.versions().collect();
        versions.sort_unstable();
        f.debug_struct("VersionRegistry")
            .field("versions", &versions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> TableDescriptor {
        TableDescriptor::new(
            1,
            "test",
            Catalogue::new()
                .packet(
                    Direction::Serverbound,
                    ProtocolPhase::Play,
                    0x01,
                    "ChatMessage",
                    Layout::ServerboundChat,
                )
                .packet_with_role(
                    Direction::Clientbound,
                    ProtocolPhase::Play,
                    0x05,
                    "DestroyEntities",
                    Layout::EntityList,
                    PacketRole::Despawn,
                ),
            EntityKinds {
                armor_stand_object: Some(78),
                mobs: [(50, EntityKind::Creeper)].into_iter().collect(),
            },
        )
    }

    #[test]
    fn resolves_paths() {
        let descriptor = tiny();
        let kind = descriptor
            .resolve_path(&["ServerBound", "Play", "ChatMessage"].into())
            .unwrap();
        assert_eq!(
            kind,
            PacketKind::new(Direction::Serverbound, ProtocolPhase::Play, 0x01)
        );
        assert_eq!(descriptor.packet_name(kind), Some("ChatMessage"));
    }

    #[test]
    fn path_errors_name_the_failing_segment() {
        let descriptor = tiny();
        assert!(matches!(
            descriptor.resolve_path(&["ServerBound", "Play"].into()),
            Err(ResolveError::WrongLength(_))
        ));
        assert!(matches!(
            descriptor.resolve_path(&["Sideways", "Play", "ChatMessage"].into()),
            Err(ResolveError::UnknownDirection(d)) if d == "Sideways"
        ));
        assert!(matches!(
            descriptor.resolve_path(&["ServerBound", "Lobby", "ChatMessage"].into()),
            Err(ResolveError::UnknownPhase(p)) if p == "Lobby"
        ));
        assert!(matches!(
            descriptor.resolve_path(&["ClientBound", "Play", "ChatMessage"].into()),
            Err(ResolveError::UnknownPacket { .. })
        ));
    }

    #[test]
    fn unknown_ids_decode_opaque() {
        let descriptor = tiny();
        let packet = descriptor
            .decode(Direction::Clientbound, ProtocolPhase::Play, &[0x40, 1, 2, 3])
            .unwrap();
        assert_eq!(packet.data, PacketData::Opaque(Opaque { data: vec![1, 2, 3] }));
        assert_eq!(descriptor.encode(&packet), [0x40, 1, 2, 3]);
    }

    #[test]
    fn trailing_bytes_are_a_decode_error() {
        let descriptor = tiny();
        // chat "a" followed by a stray byte
        let body = [0x01, 0x01, b'a', 0xff];
        assert!(matches!(
            descriptor.decode(Direction::Serverbound, ProtocolPhase::Play, &body),
            Err(DecodeError::TrailingBytes(1))
        ));
    }

    #[test]
    fn entity_kinds() {
        let descriptor = tiny();
        assert_eq!(descriptor.object_kind(78), EntityKind::ArmorStand);
        assert_eq!(descriptor.object_kind(1), EntityKind::Untyped);
        assert_eq!(descriptor.mob_kind(50), EntityKind::Creeper);
        assert_eq!(descriptor.mob_kind(65), EntityKind::Mob(MobType(65)));
        assert_eq!(
            descriptor.role(PacketKind::new(Direction::Clientbound, ProtocolPhase::Play, 0x05)),
            PacketRole::Despawn
        );
    }

    #[test]
    fn registry_reports_unsupported_versions() {
        let registry = VersionRegistry::builtin();
        assert_eq!(registry.get(47).unwrap().version(), 47);
        assert!(matches!(registry.get(5), Err(UnsupportedVersion(5))));

        let mut custom = VersionRegistry::new();
        custom.register(Arc::new(tiny()));
        assert_eq!(custom.versions().collect::<Vec<_>>(), [1]);
    }
}
