//! Protocol 47: Minecraft 1.8 through 1.8.9.

use super::{
    descriptor::{Catalogue, EntityKinds, Layout, PacketRole, TableDescriptor},
    Direction::{Clientbound, Serverbound},
    ProtocolPhase::{Handshaking, Login, Play, Status},
};
use crate::entity::{EntityKind, MobType};

pub const VERSION: i32 = 47;

/// Object type of armor stands in Spawn Object.
pub const ARMOR_STAND_OBJECT: i8 = 78;

const AGEABLE_MOBS: &[u8] = &[90, 91, 92, 93, 95, 96, 98, 100, 101, 120];

pub fn descriptor() -> TableDescriptor {
    TableDescriptor::new(VERSION, "1.8", catalogue(), entity_kinds())
}

fn entity_kinds() -> EntityKinds {
    let mut mobs: ahash::AHashMap<u8, EntityKind> = AGEABLE_MOBS
        .iter()
        .map(|&id| (id, EntityKind::Ageable(MobType(id))))
        .collect();
    mobs.insert(50, EntityKind::Creeper);
    // zombie pigmen share the zombie metadata layout
    mobs.insert(54, EntityKind::Zombie);
    mobs.insert(57, EntityKind::Zombie);
    EntityKinds {
        armor_stand_object: Some(ARMOR_STAND_OBJECT),
        mobs,
    }
}

fn catalogue() -> Catalogue {
    Catalogue::new()
        .packet(Serverbound, Handshaking, 0x00, "Handshake", Layout::Handshake)
        .packet(Clientbound, Status, 0x00, "Response", Layout::Opaque)
        .packet(Clientbound, Status, 0x01, "Pong", Layout::Opaque)
        .packet(Serverbound, Status, 0x00, "Request", Layout::Opaque)
        .packet(Serverbound, Status, 0x01, "Ping", Layout::Opaque)
        .packet(Clientbound, Login, 0x00, "Disconnect", Layout::Opaque)
        .packet(Clientbound, Login, 0x01, "EncryptionRequest", Layout::EncryptionRequest)
        .packet(Clientbound, Login, 0x02, "LoginSuccess", Layout::LoginSuccess)
        .packet(Clientbound, Login, 0x03, "SetCompression", Layout::SetCompression)
        .packet(Serverbound, Login, 0x00, "LoginStart", Layout::LoginStart)
        .packet(Serverbound, Login, 0x01, "EncryptionResponse", Layout::EncryptionResponse)
        .opaque_run(Clientbound, Play, 0x00, &["KeepAlive"])
        .packet(Clientbound, Play, 0x01, "JoinGame", Layout::EntityInt)
        .packet(Clientbound, Play, 0x02, "ChatMessage", Layout::ClientboundChat)
        .opaque_run(Clientbound, Play, 0x03, &["TimeUpdate"])
        .packet(Clientbound, Play, 0x04, "EntityEquipment", Layout::EntityVarInt)
        .opaque_run(Clientbound, Play, 0x05, &["SpawnPosition", "UpdateHealth"])
        .packet_with_role(
            Clientbound,
            Play,
            0x07,
            "Respawn",
            Layout::Opaque,
            PacketRole::WorldReset,
        )
        .opaque_run(
            Clientbound,
            Play,
            0x08,
            &["PlayerPositionAndLook", "HeldItemChange"],
        )
        .packet(Clientbound, Play, 0x0a, "UseBed", Layout::EntityVarInt)
        .packet(Clientbound, Play, 0x0b, "Animation", Layout::EntityVarInt)
        .packet(Clientbound, Play, 0x0c, "SpawnPlayer", Layout::SpawnPlayer)
        .packet(Clientbound, Play, 0x0d, "CollectItem", Layout::EntityVarInt)
        .packet(Clientbound, Play, 0x0e, "SpawnObject", Layout::SpawnObject)
        .packet(Clientbound, Play, 0x0f, "SpawnMob", Layout::SpawnMob)
        .packet(Clientbound, Play, 0x10, "SpawnPainting", Layout::EntityVarInt)
        .packet(Clientbound, Play, 0x11, "SpawnExperienceOrb", Layout::EntityVarInt)
        .packet(Clientbound, Play, 0x12, "EntityVelocity", Layout::EntityVarInt)
        .packet_with_role(
            Clientbound,
            Play,
            0x13,
            "DestroyEntities",
            Layout::EntityList,
            PacketRole::Despawn,
        )
        .packet(Clientbound, Play, 0x14, "Entity", Layout::EntityVarInt)
        .packet(Clientbound, Play, 0x15, "EntityRelativeMove", Layout::EntityVarInt)
        .packet(Clientbound, Play, 0x16, "EntityLook", Layout::EntityVarInt)
        .packet(Clientbound, Play, 0x17, "EntityLookAndRelativeMove", Layout::EntityVarInt)
        .packet(Clientbound, Play, 0x18, "EntityTeleport", Layout::EntityVarInt)
        .packet(Clientbound, Play, 0x19, "EntityHeadLook", Layout::EntityVarInt)
        .packet(Clientbound, Play, 0x1a, "EntityStatus", Layout::EntityInt)
        .packet(Clientbound, Play, 0x1b, "AttachEntity", Layout::EntityInt)
        .packet(Clientbound, Play, 0x1c, "EntityMetadata", Layout::EntityMetadata)
        .packet(Clientbound, Play, 0x1d, "EntityEffect", Layout::EntityVarInt)
        .packet(Clientbound, Play, 0x1e, "RemoveEntityEffect", Layout::EntityVarInt)
        .opaque_run(Clientbound, Play, 0x1f, &["SetExperience"])
        .packet(Clientbound, Play, 0x20, "EntityProperties", Layout::EntityVarInt)
        .opaque_run(
            Clientbound,
            Play,
            0x21,
            &["ChunkData", "MultiBlockChange", "BlockChange", "BlockAction"],
        )
        .packet(Clientbound, Play, 0x25, "BlockBreakAnimation", Layout::EntityVarInt)
        .opaque_run(
            Clientbound,
            Play,
            0x26,
            &[
                "MapChunkBulk",
                "Explosion",
                "Effect",
                "SoundEffect",
                "Particle",
                "ChangeGameState",
            ],
        )
        .packet(Clientbound, Play, 0x2c, "SpawnGlobalEntity", Layout::EntityVarInt)
        .opaque_run(
            Clientbound,
            Play,
            0x2d,
            &[
                "OpenWindow",
                "CloseWindow",
                "SetSlot",
                "WindowItems",
                "WindowProperty",
                "ConfirmTransaction",
                "UpdateSign",
                "Map",
                "UpdateBlockEntity",
                "OpenSignEditor",
                "Statistics",
                "PlayerListItem",
                "PlayerAbilities",
                "TabComplete",
                "ScoreboardObjective",
                "UpdateScore",
                "DisplayScoreboard",
                "Teams",
                "PluginMessage",
                "Disconnect",
                "ServerDifficulty",
                "CombatEvent",
            ],
        )
        .packet(Clientbound, Play, 0x43, "Camera", Layout::EntityVarInt)
        .opaque_run(Clientbound, Play, 0x44, &["WorldBorder", "Title"])
        .packet(Clientbound, Play, 0x46, "SetCompression", Layout::SetCompression)
        .opaque_run(
            Clientbound,
            Play,
            0x47,
            &["PlayerListHeaderFooter", "ResourcePackSend"],
        )
        .packet(Clientbound, Play, 0x49, "UpdateEntityNbt", Layout::EntityVarInt)
        .opaque_run(Serverbound, Play, 0x00, &["KeepAlive"])
        .packet(Serverbound, Play, 0x01, "ChatMessage", Layout::ServerboundChat)
        .packet(Serverbound, Play, 0x02, "UseEntity", Layout::EntityVarInt)
        .opaque_run(
            Serverbound,
            Play,
            0x03,
            &[
                "Player",
                "PlayerPosition",
                "PlayerLook",
                "PlayerPositionAndLook",
                "PlayerDigging",
                "PlayerBlockPlacement",
                "HeldItemChange",
                "Animation",
            ],
        )
        .packet(Serverbound, Play, 0x0b, "EntityAction", Layout::EntityVarInt)
        .opaque_run(
            Serverbound,
            Play,
            0x0c,
            &[
                "SteerVehicle",
                "CloseWindow",
                "ClickWindow",
                "ConfirmTransaction",
                "CreativeInventoryAction",
                "EnchantItem",
                "UpdateSign",
                "PlayerAbilities",
                "TabComplete",
                "ClientSettings",
                "ClientStatus",
                "PluginMessage",
                "Spectate",
                "ResourcePackStatus",
            ],
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        descriptor::ProtocolDescriptor,
        packet::{ClientboundChat, PacketData},
        PacketKind, ProtocolPhase,
    };

    #[test]
    fn catalogue_ids_are_unique_and_contiguous() {
        let catalogue = catalogue();
        let mut seen = ahash::AHashSet::new();
        for entry in catalogue.entries() {
            assert!(seen.insert(entry.kind), "duplicate {}", entry.kind);
        }
        let play_ids = |direction| {
            let mut ids: Vec<i32> = catalogue
                .entries()
                .iter()
                .filter(|e| e.kind.direction == direction && e.kind.phase == ProtocolPhase::Play)
                .map(|e| e.kind.id)
                .collect();
            ids.sort_unstable();
            ids
        };
        assert_eq!(play_ids(Clientbound), (0x00..=0x49).collect::<Vec<_>>());
        assert_eq!(play_ids(Serverbound), (0x00..=0x19).collect::<Vec<_>>());
    }

    #[test]
    fn well_known_packets() {
        let descriptor = descriptor();
        let chat = descriptor
            .resolve_path(&["ClientBound", "Play", "ChatMessage"].into())
            .unwrap();
        assert_eq!(chat, PacketKind::new(Clientbound, Play, 0x02));
        let destroy = descriptor
            .resolve_path(&["ClientBound", "Play", "DestroyEntities"].into())
            .unwrap();
        assert_eq!(descriptor.role(destroy), PacketRole::Despawn);
        let respawn = PacketKind::new(Clientbound, Play, 0x07);
        assert_eq!(descriptor.role(respawn), PacketRole::WorldReset);
        assert_eq!(descriptor.packet_name(respawn), Some("Respawn"));
    }

    #[test]
    fn decodes_chat() {
        let descriptor = descriptor();
        let mut body = vec![0x02, 0x0e];
        body.extend(br#"{"text":"hey"}"#);
        body.push(0);
        let packet = descriptor.decode(Clientbound, Play, &body).unwrap();
        assert_eq!(
            packet.data,
            PacketData::ClientboundChat(ClientboundChat {
                json: r#"{"text":"hey"}"#.into(),
                position: 0,
            })
        );
        assert_eq!(descriptor.encode(&packet), body);
    }

    #[test]
    fn mob_kinds() {
        let descriptor = descriptor();
        assert_eq!(descriptor.mob_kind(54), EntityKind::Zombie);
        assert_eq!(descriptor.mob_kind(90), EntityKind::Ageable(MobType(90)));
        assert_eq!(descriptor.mob_kind(51), EntityKind::Mob(MobType(51)));
        assert_eq!(
            descriptor.object_kind(ARMOR_STAND_OBJECT),
            EntityKind::ArmorStand
        );
    }
}
