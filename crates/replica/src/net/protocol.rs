use std::mem::size_of;

use bytemuck::{Pod, Zeroable};

use super::codec::{self, CodecError, MessageBuffer};

// Records are copied to the wire as-is; both ends must agree on byte order.
#[cfg(not(target_endian = "little"))]
compile_error!("replica wire records are little-endian; big-endian targets are not supported");

pub const PROTOCOL_MAGIC: u32 = 0x5245_504C;
pub const DEFAULT_SERVER_PORT: u16 = 27015;
pub const DEFAULT_CLIENT_PORT: u16 = 27016;
pub const TEXT_CAPACITY: usize = 256;

pub type EntityId = u32;

/// Parent id used on the wire for "no parent".
pub const NO_PARENT: EntityId = u32::MAX;

/// A fixed-size record with a stable type tag.
///
/// Tags and record sizes are part of the wire format and must never change
/// once shipped; the format carries no version.
pub trait WireMessage: Pod {
    const TAG: u32;
    const NAME: &'static str;

    fn wire_size() -> usize {
        size_of::<u32>() + size_of::<Self>()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ServerBeaconMessage {
    pub message_id: u32,
    pub protocol_magic: u32,
    pub server_time: u32,
}

impl ServerBeaconMessage {
    pub fn new(server_time: u32) -> Self {
        Self {
            message_id: 0,
            protocol_magic: PROTOCOL_MAGIC,
            server_time,
        }
    }

    pub fn is_compatible(&self) -> bool {
        self.protocol_magic == PROTOCOL_MAGIC
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ServerQuitMessage {
    pub message_id: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ConnectMessage {
    pub message_id: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ConnectAcceptedMessage {
    pub message_id: u32,
    pub server_time: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DisconnectMessage {
    pub message_id: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct HeartBeatMessage {
    pub message_id: u32,
}

/// Sent by the client with its local clock; the server echoes it back with
/// `server_time` filled in.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PingMessage {
    pub message_id: u32,
    pub local_time_stamp: u32,
    pub server_time: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SpawnMessage {
    pub message_id: u32,
    pub entity_id: EntityId,
    pub timestamp: u32,
    pub spawn: u8,
    pub _padding: [u8; 3],
}

impl SpawnMessage {
    pub fn new(entity_id: EntityId, spawn: bool, timestamp: u32) -> Self {
        Self {
            message_id: 0,
            entity_id,
            timestamp,
            spawn: spawn as u8,
            _padding: [0; 3],
        }
    }

    pub fn is_spawn(&self) -> bool {
        self.spawn != 0
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct TransformMessage {
    pub message_id: u32,
    pub entity_id: EntityId,
    pub timestamp: u32,
    pub position: [f32; 2],
    pub rotation: f32,
    pub parent_id: EntityId,
    pub settled: u8,
    pub _padding: [u8; 3],
}

impl TransformMessage {
    pub fn parent(&self) -> Option<EntityId> {
        (self.parent_id != NO_PARENT).then_some(self.parent_id)
    }

    pub fn is_settled(&self) -> bool {
        self.settled != 0
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct SpriteMessage {
    pub message_id: u32,
    pub entity_id: EntityId,
    pub sprite_hash: u32,
    pub hex_color: u32,
    pub animation_id: i32,
    pub properties: u32,
    pub layer: i32,
    pub shadow_offset: [f32; 2],
    pub shadow_size: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct TextMessage {
    pub message_id: u32,
    pub text: [u8; TEXT_CAPACITY],
}

impl TextMessage {
    /// Truncates on a char boundary so at least one NUL terminator remains.
    pub fn new(text: &str) -> Self {
        let mut end = text.len().min(TEXT_CAPACITY - 1);
        while !text.is_char_boundary(end) {
            end -= 1;
        }

        let mut message = Self::zeroed();
        message.text[..end].copy_from_slice(&text.as_bytes()[..end]);
        message
    }

    pub fn text(&self) -> &str {
        let end = self
            .text
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(TEXT_CAPACITY);
        match std::str::from_utf8(&self.text[..end]) {
            Ok(text) => text,
            Err(e) => std::str::from_utf8(&self.text[..e.valid_up_to()]).unwrap_or_default(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct ViewportMessage {
    pub message_id: u32,
    /// min x, min y, max x, max y
    pub viewport: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct LevelMetadataMessage {
    pub message_id: u32,
    pub camera_position: [f32; 2],
    pub camera_size: [f32; 2],
    pub background_texture_hash: u32,
    pub world_file_hash: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DamageInfoMessage {
    pub message_id: u32,
    pub entity_id: EntityId,
    pub health: i32,
    pub full_health: i32,
    pub damage_timestamp: u32,
    pub is_boss: u8,
    pub _padding: [u8; 3],
}

macro_rules! wire_messages {
    ($($variant:ident($ty:ident) = $tag:literal,)+) => {
        $(
            impl WireMessage for $ty {
                const TAG: u32 = $tag;
                const NAME: &'static str = stringify!($ty);
            }

            impl From<$ty> for Message {
                fn from(message: $ty) -> Self {
                    Message::$variant(message)
                }
            }
        )+

        #[derive(Debug, Clone, Copy, PartialEq)]
        pub enum Message {
            $($variant($ty),)+
        }

        impl Message {
            pub fn tag(&self) -> u32 {
                match self {
                    $(Message::$variant(_) => $tag,)+
                }
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $(Message::$variant(_) => <$ty as WireMessage>::NAME,)+
                }
            }

            /// Decodes one `{type_tag, body}` span as produced by `unpack_batch`.
            pub fn decode(span: &[u8]) -> Result<Self, CodecError> {
                let tag = codec::peek_type(span).ok_or(CodecError::TooShort {
                    expected: size_of::<u32>(),
                    actual: span.len(),
                })?;
                match tag {
                    $($tag => codec::deserialize::<$ty>(span).map(Message::$variant),)+
                    other => Err(CodecError::UnknownTag(other)),
                }
            }

            pub fn encode_into(&self, buffer: &mut MessageBuffer) -> bool {
                match self {
                    $(Message::$variant(message) => codec::serialize_into(message, buffer),)+
                }
            }
        }
    };
}

wire_messages! {
    ServerBeacon(ServerBeaconMessage) = 1,
    ServerQuit(ServerQuitMessage) = 2,
    Connect(ConnectMessage) = 3,
    ConnectAccepted(ConnectAcceptedMessage) = 4,
    Disconnect(DisconnectMessage) = 5,
    HeartBeat(HeartBeatMessage) = 6,
    Ping(PingMessage) = 7,
    Spawn(SpawnMessage) = 8,
    Transform(TransformMessage) = 9,
    Sprite(SpriteMessage) = 10,
    Text(TextMessage) = 11,
    Viewport(ViewportMessage) = 12,
    LevelMetadata(LevelMetadataMessage) = 13,
    DamageInfo(DamageInfoMessage) = 14,
}

const _: () = {
    assert!(size_of::<ServerBeaconMessage>() == 12);
    assert!(size_of::<ConnectAcceptedMessage>() == 8);
    assert!(size_of::<PingMessage>() == 12);
    assert!(size_of::<SpawnMessage>() == 16);
    assert!(size_of::<TransformMessage>() == 32);
    assert!(size_of::<SpriteMessage>() == 40);
    assert!(size_of::<TextMessage>() == 260);
    assert!(size_of::<ViewportMessage>() == 20);
    assert!(size_of::<LevelMetadataMessage>() == 28);
    assert!(size_of::<DamageInfoMessage>() == 24);
};
