//! The two tagged command sets that travel inside frames.

use crate::binary::{BinaryReader, BinaryWriter, Wire};
use crate::types::{
    AuthInfo, JoinResponse, JudgeEvent, Message, RoomId, RoomState, TouchFrame, UserInfo,
};
use crate::ProtocolError;

/// Maximum encoded length of an authentication token.
pub const TOKEN_MAX_LEN: usize = 32;
/// Maximum encoded length of a chat message.
pub const CHAT_MAX_LEN: usize = 200;

/// Everything a client can send.
///
/// An unknown tag fails decoding, which ends the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Ping,
    Authenticate { token: String },
    Chat { message: String },
    Touches { frames: Vec<TouchFrame> },
    Judges { judges: Vec<JudgeEvent> },
    CreateRoom { id: RoomId },
    JoinRoom { id: RoomId, monitor: bool },
    LeaveRoom,
    LockRoom { lock: bool },
    CycleRoom { cycle: bool },
    SelectChart { id: i32 },
    RequestStart,
    Ready,
    CancelReady,
    Played { id: i32 },
    Abort,
}

impl Wire for ClientCommand {
    fn write(&self, w: &mut BinaryWriter) {
        match self {
            Self::Ping => w.write_u8(0),
            Self::Authenticate { token } => {
                w.write_u8(1);
                w.write_str(token);
            }
            Self::Chat { message } => {
                w.write_u8(2);
                w.write_str(message);
            }
            Self::Touches { frames } => {
                w.write_u8(3);
                w.write_slice(frames);
            }
            Self::Judges { judges } => {
                w.write_u8(4);
                w.write_slice(judges);
            }
            Self::CreateRoom { id } => {
                w.write_u8(5);
                id.write(w);
            }
            Self::JoinRoom { id, monitor } => {
                w.write_u8(6);
                id.write(w);
                w.write_bool(*monitor);
            }
            Self::LeaveRoom => w.write_u8(7),
            Self::LockRoom { lock } => {
                w.write_u8(8);
                w.write_bool(*lock);
            }
            Self::CycleRoom { cycle } => {
                w.write_u8(9);
                w.write_bool(*cycle);
            }
            Self::SelectChart { id } => {
                w.write_u8(10);
                w.write_i32(*id);
            }
            Self::RequestStart => w.write_u8(11),
            Self::Ready => w.write_u8(12),
            Self::CancelReady => w.write_u8(13),
            Self::Played { id } => {
                w.write_u8(14);
                w.write_i32(*id);
            }
            Self::Abort => w.write_u8(15),
        }
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        match r.read_u8()? {
            0 => Ok(Self::Ping),
            1 => Ok(Self::Authenticate {
                token: r.read_varchar(TOKEN_MAX_LEN)?,
            }),
            2 => Ok(Self::Chat {
                message: r.read_varchar(CHAT_MAX_LEN)?,
            }),
            3 => Ok(Self::Touches {
                frames: r.read_vec()?,
            }),
            4 => Ok(Self::Judges {
                judges: r.read_vec()?,
            }),
            5 => Ok(Self::CreateRoom { id: RoomId::read(r)? }),
            6 => Ok(Self::JoinRoom {
                id: RoomId::read(r)?,
                monitor: r.read_bool()?,
            }),
            7 => Ok(Self::LeaveRoom),
            8 => Ok(Self::LockRoom {
                lock: r.read_bool()?,
            }),
            9 => Ok(Self::CycleRoom {
                cycle: r.read_bool()?,
            }),
            10 => Ok(Self::SelectChart { id: r.read_i32()? }),
            11 => Ok(Self::RequestStart),
            12 => Ok(Self::Ready),
            13 => Ok(Self::CancelReady),
            14 => Ok(Self::Played { id: r.read_i32()? }),
            15 => Ok(Self::Abort),
            tag => Err(ProtocolError::UnknownTag {
                kind: "client command",
                tag,
            }),
        }
    }
}

/// Everything the server can send.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerCommand {
    Pong,
    Authenticate(Result<AuthInfo, String>),
    Chat(Result<(), String>),
    Touches { player: i32, frames: Vec<TouchFrame> },
    Judges { player: i32, judges: Vec<JudgeEvent> },
    Message(Message),
    ChangeState(RoomState),
    ChangeHost(bool),
    CreateRoom(Result<(), String>),
    JoinRoom(Result<JoinResponse, String>),
    OnJoinRoom(UserInfo),
    LeaveRoom(Result<(), String>),
    LockRoom(Result<(), String>),
    CycleRoom(Result<(), String>),
    SelectChart(Result<(), String>),
    RequestStart(Result<(), String>),
    Ready(Result<(), String>),
    CancelReady(Result<(), String>),
    Played(Result<(), String>),
    Abort(Result<(), String>),
}

impl Wire for ServerCommand {
    fn write(&self, w: &mut BinaryWriter) {
        match self {
            Self::Pong => w.write_u8(0),
            Self::Authenticate(res) => {
                w.write_u8(1);
                res.write(w);
            }
            Self::Chat(res) => {
                w.write_u8(2);
                res.write(w);
            }
            Self::Touches { player, frames } => {
                w.write_u8(3);
                w.write_i32(*player);
                w.write_slice(frames);
            }
            Self::Judges { player, judges } => {
                w.write_u8(4);
                w.write_i32(*player);
                w.write_slice(judges);
            }
            Self::Message(msg) => {
                w.write_u8(5);
                msg.write(w);
            }
            Self::ChangeState(state) => {
                w.write_u8(6);
                state.write(w);
            }
            Self::ChangeHost(is_host) => {
                w.write_u8(7);
                w.write_bool(*is_host);
            }
            Self::CreateRoom(res) => {
                w.write_u8(8);
                res.write(w);
            }
            Self::JoinRoom(res) => {
                w.write_u8(9);
                res.write(w);
            }
            Self::OnJoinRoom(user) => {
                w.write_u8(10);
                user.write(w);
            }
            Self::LeaveRoom(res) => {
                w.write_u8(11);
                res.write(w);
            }
            Self::LockRoom(res) => {
                w.write_u8(12);
                res.write(w);
            }
            Self::CycleRoom(res) => {
                w.write_u8(13);
                res.write(w);
            }
            Self::SelectChart(res) => {
                w.write_u8(14);
                res.write(w);
            }
            Self::RequestStart(res) => {
                w.write_u8(15);
                res.write(w);
            }
            Self::Ready(res) => {
                w.write_u8(16);
                res.write(w);
            }
            Self::CancelReady(res) => {
                w.write_u8(17);
                res.write(w);
            }
            Self::Played(res) => {
                w.write_u8(18);
                res.write(w);
            }
            Self::Abort(res) => {
                w.write_u8(19);
                res.write(w);
            }
        }
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        match r.read_u8()? {
            0 => Ok(Self::Pong),
            1 => Ok(Self::Authenticate(r.read()?)),
            2 => Ok(Self::Chat(r.read()?)),
            3 => Ok(Self::Touches {
                player: r.read_i32()?,
                frames: r.read_vec()?,
            }),
            4 => Ok(Self::Judges {
                player: r.read_i32()?,
                judges: r.read_vec()?,
            }),
            5 => Ok(Self::Message(r.read()?)),
            6 => Ok(Self::ChangeState(r.read()?)),
            7 => Ok(Self::ChangeHost(r.read_bool()?)),
            8 => Ok(Self::CreateRoom(r.read()?)),
            9 => Ok(Self::JoinRoom(r.read()?)),
            10 => Ok(Self::OnJoinRoom(r.read()?)),
            11 => Ok(Self::LeaveRoom(r.read()?)),
            12 => Ok(Self::LockRoom(r.read()?)),
            13 => Ok(Self::CycleRoom(r.read()?)),
            14 => Ok(Self::SelectChart(r.read()?)),
            15 => Ok(Self::RequestStart(r.read()?)),
            16 => Ok(Self::Ready(r.read()?)),
            17 => Ok(Self::CancelReady(r.read()?)),
            18 => Ok(Self::Played(r.read()?)),
            19 => Ok(Self::Abort(r.read()?)),
            tag => Err(ProtocolError::UnknownTag {
                kind: "server command",
                tag,
            }),
        }
    }
}
