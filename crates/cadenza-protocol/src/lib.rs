//! Binary wire protocol for Cadenza.
//!
//! This crate defines the language clients and the server speak:
//!
//! - **Primitives** ([`BinaryReader`], [`BinaryWriter`], ULEB128): the
//!   little-endian byte-level encoding.
//! - **Types** ([`RoomId`], [`UserInfo`], [`TouchFrame`], [`Message`], ...):
//!   everything that travels inside a frame.
//! - **Commands** ([`ClientCommand`], [`ServerCommand`]): the tagged
//!   request/response sets.
//!
//! The protocol layer sits between transport (raw frames) and session
//! (player context); it knows nothing about connections or rooms.

mod binary;
mod commands;
mod error;
mod types;

pub use binary::{decode, encode, BinaryReader, BinaryWriter, Wire};
pub use commands::{ClientCommand, ServerCommand, CHAT_MAX_LEN, TOKEN_MAX_LEN};
pub use error::ProtocolError;
pub use types::{
    AuthInfo, Chart, ClientRoomState, CompactPos, JoinResponse, JudgeEvent, Judgement, Message,
    Profile, Record, RoomId, RoomState, TouchFrame, TouchPoint, UserInfo,
};
