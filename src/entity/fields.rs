//! Metadata index tables per entity kind.
//!
//! An entity's tables are applied in layer order, most generic first. Each
//! layer claims the indices it lists, so when two layers list the same index
//! the earlier one wins and the later field is never filled in. See
//! [`shadowed_indices`].

use super::EntityKind;
use crate::protocol::metadata::{
    FieldUpdate, MetadataEntry, MetadataType,
    MetadataType::{Byte, Float, Int, Rotation, Short, String as Text},
};

/// One known metadata index.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub index: u8,
    pub name: &'static str,
    pub value_type: MetadataType,
}

const fn field(index: u8, name: &'static str, value_type: MetadataType) -> FieldSpec {
    FieldSpec {
        index,
        name,
        value_type,
    }
}

pub const GENERIC: &[FieldSpec] = &[
    field(0, "state", Byte),
    field(1, "air", Short),
    field(2, "custom_name", Text),
    field(3, "custom_name_visible", Byte),
    field(4, "silent", Byte),
];

pub const LIVING: &[FieldSpec] = &[
    field(6, "health", Float),
    field(7, "potion_color", Int),
    field(8, "potion_ambient", Byte),
    field(9, "arrows", Byte),
];

pub const INSENTIENT: &[FieldSpec] = &[field(15, "no_ai", Byte)];

pub const PLAYER: &[FieldSpec] = &[
    field(10, "skin_parts", Byte),
    field(16, "hide_cape", Byte),
    field(17, "absorption", Float),
    field(18, "score", Int),
];

pub const ARMOR_STAND: &[FieldSpec] = &[
    field(10, "armor_stand_flags", Byte),
    field(11, "head_pose", Rotation),
    field(12, "body_pose", Rotation),
    field(13, "left_arm_pose", Rotation),
    field(14, "right_arm_pose", Rotation),
    field(15, "left_leg_pose", Rotation),
    field(16, "right_leg_pose", Rotation),
];

// Same index as INSENTIENT's no_ai.
pub const AGEABLE: &[FieldSpec] = &[field(15, "age", Byte)];

pub const CREEPER: &[FieldSpec] = &[field(16, "fuse_state", Byte), field(17, "powered", Byte)];

pub const ZOMBIE: &[FieldSpec] = &[
    field(12, "is_child", Byte),
    field(13, "is_villager", Byte),
    field(14, "is_converting", Byte),
];

/// Field tables of `kind`, in application order.
pub fn layers(kind: EntityKind) -> &'static [&'static [FieldSpec]] {
    match kind {
        EntityKind::Untyped => &[GENERIC],
        EntityKind::ArmorStand => &[GENERIC, LIVING, ARMOR_STAND],
        EntityKind::Player => &[GENERIC, LIVING, PLAYER],
        EntityKind::Creeper => &[GENERIC, LIVING, INSENTIENT, CREEPER],
        EntityKind::Zombie => &[GENERIC, LIVING, INSENTIENT, ZOMBIE],
        EntityKind::Ageable(_) => &[GENERIC, LIVING, INSENTIENT, AGEABLE],
        EntityKind::Mob(_) => &[GENERIC, LIVING, INSENTIENT],
    }
}

/// A field that can never be filled in because an earlier layer owns its index.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ShadowedField {
    pub index: u8,
    pub field: &'static str,
    pub shadowed_by: &'static str,
}

pub fn shadowed_indices(kind: EntityKind) -> Vec<ShadowedField> {
    let mut owners: Vec<&FieldSpec> = Vec::new();
    let mut shadowed = Vec::new();
    for spec in layers(kind).iter().flat_map(|layer| layer.iter()) {
        match owners.iter().find(|owner| owner.index == spec.index) {
            Some(owner) => shadowed.push(ShadowedField {
                index: spec.index,
                field: spec.name,
                shadowed_by: owner.name,
            }),
            None => owners.push(spec),
        }
    }
    shadowed
}

/// Removes from `entries` every entry the tables of `kind` recognize and
/// returns them labelled with their field names.
///
/// An entry is only claimed when its value has the type the table expects.
pub fn consume(kind: EntityKind, entries: &mut Vec<MetadataEntry>) -> Vec<FieldUpdate> {
    let mut consumed = Vec::new();
    for spec in layers(kind).iter().flat_map(|layer| layer.iter()) {
        let position = entries.iter().position(|entry| {
            entry.index == spec.index && entry.value.value_type() == spec.value_type
        });
        if let Some(position) = position {
            let entry = entries.remove(position);
            consumed.push(FieldUpdate {
                index: entry.index,
                field: spec.name,
                value: entry.value,
            });
        }
    }
    consumed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{entity::MobType, protocol::metadata::MetadataValue};

    const ALL_KINDS: [EntityKind; 7] = [
        EntityKind::Untyped,
        EntityKind::ArmorStand,
        EntityKind::Player,
        EntityKind::Creeper,
        EntityKind::Zombie,
        EntityKind::Ageable(MobType(90)),
        EntityKind::Mob(MobType(51)),
    ];

    #[test]
    fn only_ageable_has_a_shadowed_index() {
        for kind in ALL_KINDS {
            let shadowed = shadowed_indices(kind);
            if matches!(kind, EntityKind::Ageable(_)) {
                assert_eq!(
                    shadowed,
                    [ShadowedField {
                        index: 15,
                        field: "age",
                        shadowed_by: "no_ai",
                    }]
                );
            } else {
                assert!(shadowed.is_empty(), "{kind:?} shadows {shadowed:?}");
            }
        }
    }

    #[test]
    fn ageable_index_15_lands_in_no_ai() {
        let mut entries = vec![MetadataEntry::new(15, MetadataValue::Byte(-1))];
        let consumed = consume(EntityKind::Ageable(MobType(92)), &mut entries);
        assert!(entries.is_empty());
        assert_eq!(consumed[0].field, "no_ai");
    }

    #[test]
    fn generic_fields_come_first() {
        let mut entries = vec![
            MetadataEntry::new(17, MetadataValue::Byte(1)),
            MetadataEntry::new(0, MetadataValue::Byte(0)),
            MetadataEntry::new(6, MetadataValue::Float(20.0)),
        ];
        let consumed = consume(EntityKind::Creeper, &mut entries);
        let names: Vec<_> = consumed.iter().map(|update| update.field).collect();
        assert_eq!(names, ["state", "health", "powered"]);
    }

    #[test]
    fn unknown_and_mistyped_entries_stay() {
        let mut entries = vec![
            MetadataEntry::new(20, MetadataValue::Int(0)),
            MetadataEntry::new(1, MetadataValue::Byte(0)),
            MetadataEntry::new(6, MetadataValue::Float(1.0)),
        ];
        let consumed = consume(EntityKind::Untyped, &mut entries);
        assert!(consumed.is_empty());
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn indices_are_unique_within_each_table() {
        for table in [GENERIC, LIVING, INSENTIENT, PLAYER, ARMOR_STAND, AGEABLE, CREEPER, ZOMBIE] {
            let mut indices: Vec<_> = table.iter().map(|spec| spec.index).collect();
            indices.sort_unstable();
            indices.dedup();
            assert_eq!(indices.len(), table.len());
        }
    }
}
