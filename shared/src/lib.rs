//! Protocol and game-state core shared by the lobby server and the client.
//!
//! Layered bottom-up: [`codec`] reads and writes Hazel primitives,
//! [`packet`], [`payload`], [`gamedata`] and [`rpc`] model the messages,
//! [`transport`] adds reliable delivery, and [`room`] replicates a game on
//! top. Nothing in here opens a socket.

pub mod code;
pub mod codec;
pub mod data;
pub mod enums;
pub mod error;
pub mod gamedata;
pub mod packet;
pub mod payload;
pub mod room;
pub mod rpc;
pub mod settings;
pub mod systems;
pub mod transport;
pub mod version;

pub use code::{code_to_int, display_code, generate_code, int_to_code, LOCAL_GAME};
pub use codec::{HazelReader, HazelWriter, Vector2};
pub use data::{BuiltinData, MapData};
pub use enums::{DisconnectReason, GameMap, GameOverReason, SpawnType, SystemType};
pub use error::{CodecError, CodecResult};
pub use gamedata::GameDataMessage;
pub use packet::{DecodeOptions, Direction, DisconnectBody, HelloBody, Packet};
pub use payload::RootMessage;
pub use room::{Authority, Intent, Room, RoomConfig, RoomError, RoomEvent, RoomState};
pub use rpc::RpcMessage;
pub use settings::GameSettings;
pub use transport::{AckConvention, Connection, ConnectionState, Inbound, TransportConfig, TransportError};
pub use version::VersionInfo;
