//! Entity metadata lists.
//!
//! Each entry starts with a header byte `(type << 5) | index`; the list ends
//! with `0x7f`. Slot values embed an optional NBT tag, which is walked only
//! to find its end and is otherwise kept as raw bytes.

use super::{decoder, Decode, DecodeError, Decoder, Encode, Encoder};

const END_OF_METADATA: u8 = 0x7f;
const MAX_NBT_DEPTH: usize = 512;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::AsRefStr)]
pub enum MetadataType {
    Byte,
    Short,
    Int,
    Float,
    String,
    Slot,
    Position,
    Rotation,
}

impl MetadataType {
    fn from_id(id: u8) -> decoder::Result<Self> {
        Ok(match id {
            0 => Self::Byte,
            1 => Self::Short,
            2 => Self::Int,
            3 => Self::Float,
            4 => Self::String,
            5 => Self::Slot,
            6 => Self::Position,
            7 => Self::Rotation,
            _ => return Err(DecodeError::InvalidMetadataType(id)),
        })
    }

    fn id(self) -> u8 {
        match self {
            Self::Byte => 0,
            Self::Short => 1,
            Self::Int => 2,
            Self::Float => 3,
            Self::String => 4,
            Self::Slot => 5,
            Self::Position => 6,
            Self::Rotation => 7,
        }
    }
}

/// A typed metadata value.
#[derive(Clone, Debug, PartialEq)]
pub enum MetadataValue {
    Byte(i8),
    Short(i16),
    Int(i32),
    Float(f32),
    String(String),
    /// Item stack, kept in its wire form.
    Slot(Vec<u8>),
    Position(i32, i32, i32),
    Rotation(f32, f32, f32),
}

impl MetadataValue {
    pub fn value_type(&self) -> MetadataType {
        match self {
            Self::Byte(_) => MetadataType::Byte,
            Self::Short(_) => MetadataType::Short,
            Self::Int(_) => MetadataType::Int,
            Self::Float(_) => MetadataType::Float,
            Self::String(_) => MetadataType::String,
            Self::Slot(_) => MetadataType::Slot,
            Self::Position(..) => MetadataType::Position,
            Self::Rotation(..) => MetadataType::Rotation,
        }
    }

    fn decode_as(value_type: MetadataType, decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(match value_type {
            MetadataType::Byte => Self::Byte(decoder.read_i8()?),
            MetadataType::Short => Self::Short(decoder.read_i16()?),
            MetadataType::Int => Self::Int(decoder.read_i32()?),
            MetadataType::Float => Self::Float(decoder.read_f32()?),
            MetadataType::String => Self::String(decoder.read_string()?.to_owned()),
            MetadataType::Slot => Self::Slot(read_slot(decoder)?.to_vec()),
            MetadataType::Position => Self::Position(
                decoder.read_i32()?,
                decoder.read_i32()?,
                decoder.read_i32()?,
            ),
            MetadataType::Rotation => Self::Rotation(
                decoder.read_f32()?,
                decoder.read_f32()?,
                decoder.read_f32()?,
            ),
        })
    }

    fn encode_value(&self, encoder: &mut Encoder) {
        match self {
            Self::Byte(x) => encoder.write_i8(*x),
            Self::Short(x) => encoder.write_i16(*x),
            Self::Int(x) => encoder.write_i32(*x),
            Self::Float(x) => encoder.write_f32(*x),
            Self::String(x) => encoder.write_string(x),
            Self::Slot(raw) => encoder.write_slice(raw),
            Self::Position(x, y, z) => {
                encoder.write_i32(*x);
                encoder.write_i32(*y);
                encoder.write_i32(*z);
            }
            Self::Rotation(x, y, z) => {
                encoder.write_f32(*x);
                encoder.write_f32(*y);
                encoder.write_f32(*z);
            }
        }
    }
}

/// One `(index, value)` pair of a metadata list.
#[derive(Clone, Debug, PartialEq)]
pub struct MetadataEntry {
    pub index: u8,
    pub value: MetadataValue,
}

impl MetadataEntry {
    pub fn new(index: u8, value: MetadataValue) -> Self {
        Self { index, value }
    }
}

impl Encode for MetadataEntry {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_u8((self.value.value_type().id() << 5) | (self.index & 0x1f));
        self.value.encode_value(encoder);
    }
}

/// An entry the entity tracker consumed and attributed to a named field.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldUpdate {
    pub index: u8,
    pub field: &'static str,
    pub value: MetadataValue,
}

/// Metadata list of a packet.
///
/// Freshly decoded lists hold everything in `entries`. The entity tracker
/// moves entries it recognizes into `fields`; both halves are written back
/// out on encode.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metadata {
    pub fields: Vec<FieldUpdate>,
    pub entries: Vec<MetadataEntry>,
}

impl Metadata {
    pub fn from_entries(entries: Vec<MetadataEntry>) -> Self {
        Self {
            fields: Vec::new(),
            entries,
        }
    }

    pub fn entry(&self, index: u8) -> Option<&MetadataValue> {
        self.entries
            .iter()
            .find(|entry| entry.index == index)
            .map(|entry| &entry.value)
    }

    pub fn field(&self, name: &str) -> Option<&MetadataValue> {
        self.fields
            .iter()
            .find(|update| update.field == name)
            .map(|update| &update.value)
    }
}

impl Encode for Metadata {
    fn encode(&self, encoder: &mut Encoder) {
        for update in &self.fields {
            MetadataEntry::new(update.index, update.value.clone()).encode(encoder);
        }
        for entry in &self.entries {
            entry.encode(encoder);
        }
        encoder.write_u8(END_OF_METADATA);
    }
}

impl Decode for Metadata {
    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        let mut entries = Vec::new();
        loop {
            let header = decoder.read_u8()?;
            if header == END_OF_METADATA {
                break;
            }
            let value_type = MetadataType::from_id(header >> 5)?;
            let value = MetadataValue::decode_as(value_type, decoder)?;
            entries.push(MetadataEntry::new(header & 0x1f, value));
        }
        Ok(Self::from_entries(entries))
    }
}

/// Reads an item stack, returning its raw bytes.
fn read_slot<'a>(decoder: &mut Decoder<'a>) -> decoder::Result<&'a [u8]> {
    let start = decoder.buffer();
    let item_id = decoder.read_i16()?;
    if item_id != -1 {
        let _count = decoder.read_u8()?;
        let _damage = decoder.read_i16()?;
        let tag_type = decoder.read_u8()?;
        if tag_type != 0 {
            skip_nbt_string(decoder)?;
            skip_nbt_payload(decoder, tag_type, 0)?;
        }
    }
    let consumed = start.len() - decoder.buffer().len();
    Ok(&start[..consumed])
}

fn skip_nbt_string(decoder: &mut Decoder) -> decoder::Result<()> {
    let length = decoder.read_u16()?;
    decoder.consume_slice(usize::from(length))?;
    Ok(())
}

fn skip_nbt_array(decoder: &mut Decoder, element_size: usize) -> decoder::Result<()> {
    let length = usize::try_from(decoder.read_i32()?)?;
    decoder.consume_slice(length.saturating_mul(element_size))?;
    Ok(())
}

fn skip_nbt_payload(decoder: &mut Decoder, tag_type: u8, depth: usize) -> decoder::Result<()> {
    if depth > MAX_NBT_DEPTH {
        return Err(DecodeError::NbtTooDeep(MAX_NBT_DEPTH));
    }
    match tag_type {
        1 => drop(decoder.consume_slice(1)?),
        2 => drop(decoder.consume_slice(2)?),
        3 | 5 => drop(decoder.consume_slice(4)?),
        4 | 6 => drop(decoder.consume_slice(8)?),
        7 => skip_nbt_array(decoder, 1)?,
        8 => skip_nbt_string(decoder)?,
        9 => {
            let element_type = decoder.read_u8()?;
            let length = decoder.read_i32()?;
            for _ in 0..length.max(0) {
                skip_nbt_payload(decoder, element_type, depth + 1)?;
            }
        }
        10 => loop {
            let child_type = decoder.read_u8()?;
            if child_type == 0 {
                break;
            }
            skip_nbt_string(decoder)?;
            skip_nbt_payload(decoder, child_type, depth + 1)?;
        },
        11 => skip_nbt_array(decoder, 4)?,
        _ => return Err(DecodeError::InvalidNbtTag(tag_type)),
    }
    Ok(())
}
