//! Wire-level protocol: primitive codec, framing, encryption,
//! packet values and the per-version packet catalogues.

pub mod cipher;
pub(crate) mod decoder;
pub mod descriptor;
pub(crate) mod encoder;
pub mod frame;
pub mod metadata;
pub mod packet;
pub mod v47;

pub use decoder::{Decode, DecodeError, Decoder};
pub use encoder::{Encode, Encoder};

use std::fmt::{self, Display, Formatter};

/// Limit to avoid out-of-memory DOS.
///
/// The vanilla protocol caps a frame at a 3-byte VarInt length (2^21 - 1).
pub const BUFFER_LIMIT: usize = 2 * 1024 * 1024; // 2 MiB

/// Direction a packet travels in.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, strum::EnumString, strum::AsRefStr,
)]
pub enum Direction {
    /// Server to client.
    #[strum(serialize = "ClientBound")]
    Clientbound,
    /// Client to server.
    #[strum(serialize = "ServerBound")]
    Serverbound,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Clientbound => Direction::Serverbound,
            Direction::Serverbound => Direction::Clientbound,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Direction::Clientbound => 0,
            Direction::Serverbound => 1,
        }
    }
}

/// Coarse stage of a connection, gating which packets are meaningful.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, strum::EnumString, strum::AsRefStr,
)]
pub enum ProtocolPhase {
    Handshaking,
    Status,
    Login,
    Play,
}

/// Concrete, version-specific identity of a packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PacketKind {
    pub direction: Direction,
    pub phase: ProtocolPhase,
    pub id: i32,
}

impl PacketKind {
    pub const fn new(direction: Direction, phase: ProtocolPhase, id: i32) -> Self {
        Self {
            direction,
            phase,
            id,
        }
    }
}

impl Display for PacketKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/0x{:02x}",
            self.direction.as_ref(),
            self.phase.as_ref(),
            self.id
        )
    }
}

/// Version-independent, symbolic name of a packet kind,
/// e.g. `["ClientBound", "Play", "ChatMessage"]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PacketPath(Vec<String>);

impl PacketPath {
    pub fn new<S: Into<String>>(segments: impl IntoIterator<Item = S>) -> Self {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl<const N: usize> From<[&str; N]> for PacketPath {
    fn from(segments: [&str; N]) -> Self {
        Self::new(segments)
    }
}

impl From<&[&str]> for PacketPath {
    fn from(segments: &[&str]) -> Self {
        Self::new(segments.iter().copied())
    }
}

impl Display for PacketPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}
