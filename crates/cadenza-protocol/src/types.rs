//! Wire-visible data types and external-API records.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::binary::{BinaryReader, BinaryWriter, Wire};
use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Room id
// ---------------------------------------------------------------------------

/// A validated room identifier.
///
/// Non-empty, at most 20 bytes, characters restricted to
/// `[A-Za-z0-9_-]`. Validation runs both on construction and on decode, so
/// every `RoomId` in the process is well-formed. Two ids compare by byte
/// equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(String);

impl RoomId {
    pub const MAX_LEN: usize = 20;

    pub fn new(value: impl Into<String>) -> Result<Self, ProtocolError> {
        let value = value.into();
        let valid = !value.is_empty()
            && value.len() <= Self::MAX_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if valid {
            Ok(Self(value))
        } else {
            Err(ProtocolError::InvalidRoomId)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Wire for RoomId {
    fn write(&self, w: &mut BinaryWriter) {
        w.write_str(&self.0);
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        Self::new(r.read_varchar(Self::MAX_LEN)?)
    }
}

// ---------------------------------------------------------------------------
// User info
// ---------------------------------------------------------------------------

/// The identity a client sees for each room member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: i32,
    pub name: String,
    pub monitor: bool,
}

impl Wire for UserInfo {
    fn write(&self, w: &mut BinaryWriter) {
        w.write_i32(self.id);
        w.write_str(&self.name);
        w.write_bool(self.monitor);
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: r.read_i32()?,
            name: r.read_string()?,
            monitor: r.read_bool()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Compact positions (binary16)
// ---------------------------------------------------------------------------

/// A touch position as a pair of half-precision floats, stored as raw bits.
///
/// Conversion truncates the fraction; exponents below the half range clamp
/// to signed zero and above it to signed infinity. Round-trips through the
/// half format stay within 0.01 absolute error over the normalized play
/// area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactPos {
    pub x: u16,
    pub y: u16,
}

impl CompactPos {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x: f32_to_f16_bits(x),
            y: f32_to_f16_bits(y),
        }
    }

    pub fn x(&self) -> f32 {
        f16_bits_to_f32(self.x)
    }

    pub fn y(&self) -> f32 {
        f16_bits_to_f32(self.y)
    }
}

impl Wire for CompactPos {
    fn write(&self, w: &mut BinaryWriter) {
        w.write_u16(self.x);
        w.write_u16(self.y);
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            x: r.read_u16()?,
            y: r.read_u16()?,
        })
    }
}

fn f32_to_f16_bits(v: f32) -> u16 {
    let bits = v.to_bits();
    let sign = ((bits >> 31) & 0x1) as u16;
    let exp = (((bits >> 23) & 0xff) as i32) - 127 + 15;
    let frac = ((bits >> 13) & 0x3ff) as u16;

    if exp <= 0 {
        return sign << 15;
    }
    if exp >= 31 {
        return (sign << 15) | 0x7c00;
    }
    (sign << 15) | ((exp as u16) << 10) | frac
}

fn f16_bits_to_f32(bits: u16) -> f32 {
    let sign = u32::from(bits >> 15) & 0x1;
    let mut exp = i32::from((bits >> 10) & 0x1f);
    let mut frac = u32::from(bits & 0x3ff);

    if exp == 0 {
        if frac == 0 {
            return f32::from_bits(sign << 31);
        }
        // Normalize a subnormal into f32 range.
        exp = -14;
        while frac & 0x400 == 0 {
            frac <<= 1;
            exp -= 1;
        }
        frac &= 0x3ff;
        exp += 127;
    } else if exp == 31 {
        if frac == 0 {
            return f32::from_bits((sign << 31) | 0x7f80_0000);
        }
        return f32::from_bits((sign << 31) | 0x7fc0_0000);
    } else {
        exp = exp - 15 + 127;
    }

    f32::from_bits((sign << 31) | ((exp as u32) << 23) | (frac << 13))
}

// ---------------------------------------------------------------------------
// Touch and judgement frames
// ---------------------------------------------------------------------------

/// One touch point inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchPoint {
    pub id: i8,
    pub pos: CompactPos,
}

impl Wire for TouchPoint {
    fn write(&self, w: &mut BinaryWriter) {
        w.write_i8(self.id);
        self.pos.write(w);
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: r.read_i8()?,
            pos: CompactPos::read(r)?,
        })
    }
}

/// A batch of touch points captured at one game-time instant.
#[derive(Debug, Clone, PartialEq)]
pub struct TouchFrame {
    pub time: f32,
    pub points: Vec<TouchPoint>,
}

impl Wire for TouchFrame {
    fn write(&self, w: &mut BinaryWriter) {
        w.write_f32(self.time);
        w.write_slice(&self.points);
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            time: r.read_f32()?,
            points: r.read_vec()?,
        })
    }
}

/// Note judgement kinds, as a one-byte wire enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Judgement {
    Perfect = 0,
    Good = 1,
    Bad = 2,
    Miss = 3,
    HoldPerfect = 4,
    HoldGood = 5,
}

impl Wire for Judgement {
    fn write(&self, w: &mut BinaryWriter) {
        w.write_u8(*self as u8);
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        match r.read_u8()? {
            0 => Ok(Self::Perfect),
            1 => Ok(Self::Good),
            2 => Ok(Self::Bad),
            3 => Ok(Self::Miss),
            4 => Ok(Self::HoldPerfect),
            5 => Ok(Self::HoldGood),
            tag => Err(ProtocolError::UnknownTag {
                kind: "judgement",
                tag,
            }),
        }
    }
}

/// A single judged note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JudgeEvent {
    pub time: f32,
    pub line_id: u32,
    pub note_id: u32,
    pub judgement: Judgement,
}

impl Wire for JudgeEvent {
    fn write(&self, w: &mut BinaryWriter) {
        w.write_f32(self.time);
        w.write_u32(self.line_id);
        w.write_u32(self.note_id);
        self.judgement.write(w);
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            time: r.read_f32()?,
            line_id: r.read_u32()?,
            note_id: r.read_u32()?,
            judgement: Judgement::read(r)?,
        })
    }
}

// ---------------------------------------------------------------------------
// External-API records
// ---------------------------------------------------------------------------

/// An authenticated identity, as returned by `GET /me`.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub id: i32,
    pub name: String,
    pub language: String,
}

/// A chart reference. The server stores the identifier and name and never
/// interprets chart content.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Chart {
    pub id: i32,
    pub name: String,
}

/// A finished-play record, as returned by `GET /record/{id}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Record {
    pub id: i32,
    pub player: i32,
    pub score: i32,
    pub perfect: i32,
    pub good: i32,
    pub bad: i32,
    pub miss: i32,
    pub max_combo: i32,
    pub accuracy: f32,
    pub full_combo: bool,
    pub std: f32,
    pub std_score: f32,
}

// ---------------------------------------------------------------------------
// Room state as clients see it
// ---------------------------------------------------------------------------

/// The wire form of a room's lifecycle state.
///
/// `SelectChart` carries the currently selected chart id, when any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    SelectChart(Option<i32>),
    WaitingForReady,
    Playing,
}

impl Wire for RoomState {
    fn write(&self, w: &mut BinaryWriter) {
        match self {
            Self::SelectChart(chart) => {
                w.write_u8(0);
                match chart {
                    Some(id) => {
                        w.write_bool(true);
                        w.write_i32(*id);
                    }
                    None => w.write_bool(false),
                }
            }
            Self::WaitingForReady => w.write_u8(1),
            Self::Playing => w.write_u8(2),
        }
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        match r.read_u8()? {
            0 => {
                let chart = if r.read_bool()? {
                    Some(r.read_i32()?)
                } else {
                    None
                };
                Ok(Self::SelectChart(chart))
            }
            1 => Ok(Self::WaitingForReady),
            2 => Ok(Self::Playing),
            tag => Err(ProtocolError::UnknownTag {
                kind: "room state",
                tag,
            }),
        }
    }
}

/// Full room snapshot delivered with a successful authentication, letting a
/// reconnecting client restore its view without rejoining.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRoomState {
    pub id: RoomId,
    pub state: RoomState,
    pub live: bool,
    pub locked: bool,
    pub cycle: bool,
    pub is_host: bool,
    pub is_ready: bool,
    pub users: HashMap<i32, UserInfo>,
}

impl Wire for ClientRoomState {
    fn write(&self, w: &mut BinaryWriter) {
        self.id.write(w);
        self.state.write(w);
        w.write_bool(self.live);
        w.write_bool(self.locked);
        w.write_bool(self.cycle);
        w.write_bool(self.is_host);
        w.write_bool(self.is_ready);
        w.write_uleb(self.users.len() as u32);
        for (id, user) in &self.users {
            w.write_i32(*id);
            user.write(w);
        }
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        let id = RoomId::read(r)?;
        let state = RoomState::read(r)?;
        let live = r.read_bool()?;
        let locked = r.read_bool()?;
        let cycle = r.read_bool()?;
        let is_host = r.read_bool()?;
        let is_ready = r.read_bool()?;
        let count = r.read_uleb()?;
        let mut users = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            let key = r.read_i32()?;
            users.insert(key, UserInfo::read(r)?);
        }
        Ok(Self {
            id,
            state,
            live,
            locked,
            cycle,
            is_host,
            is_ready,
            users,
        })
    }
}

/// The payload of a successful `JoinRoom`.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinResponse {
    pub state: RoomState,
    pub users: Vec<UserInfo>,
    pub live: bool,
}

impl Wire for JoinResponse {
    fn write(&self, w: &mut BinaryWriter) {
        self.state.write(w);
        w.write_slice(&self.users);
        w.write_bool(self.live);
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            state: RoomState::read(r)?,
            users: r.read_vec()?,
            live: r.read_bool()?,
        })
    }
}

/// The payload of a successful `Authenticate`.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthInfo {
    pub user: UserInfo,
    pub room: Option<ClientRoomState>,
}

impl Wire for AuthInfo {
    fn write(&self, w: &mut BinaryWriter) {
        self.user.write(w);
        match &self.room {
            Some(room) => {
                w.write_bool(true);
                room.write(w);
            }
            None => w.write_bool(false),
        }
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        let user = UserInfo::read(r)?;
        let room = if r.read_bool()? {
            Some(ClientRoomState::read(r)?)
        } else {
            None
        };
        Ok(Self { user, room })
    }
}

// ---------------------------------------------------------------------------
// Result encoding
// ---------------------------------------------------------------------------

impl Wire for () {
    fn write(&self, _w: &mut BinaryWriter) {}

    fn read(_r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        Ok(())
    }
}

/// `bool ok`, then the payload or an error string.
impl<T: Wire> Wire for Result<T, String> {
    fn write(&self, w: &mut BinaryWriter) {
        match self {
            Ok(value) => {
                w.write_bool(true);
                value.write(w);
            }
            Err(message) => {
                w.write_bool(false);
                w.write_str(message);
            }
        }
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        if r.read_bool()? {
            Ok(Ok(T::read(r)?))
        } else {
            Ok(Err(r.read_string()?))
        }
    }
}

// ---------------------------------------------------------------------------
// Room messages
// ---------------------------------------------------------------------------

/// Events fanned out to everyone in a room.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Chat { user: i32, content: String },
    CreateRoom { user: i32 },
    JoinRoom { user: i32, name: String },
    LeaveRoom { user: i32, name: String },
    NewHost { user: i32 },
    SelectChart { user: i32, name: String, id: i32 },
    GameStart { user: i32 },
    Ready { user: i32 },
    CancelReady { user: i32 },
    CancelGame { user: i32 },
    StartPlaying,
    Played { user: i32, score: i32, accuracy: f32, full_combo: bool },
    GameEnd,
    Abort { user: i32 },
    LockRoom { lock: bool },
    CycleRoom { cycle: bool },
}

impl Wire for Message {
    fn write(&self, w: &mut BinaryWriter) {
        match self {
            Self::Chat { user, content } => {
                w.write_u8(0);
                w.write_i32(*user);
                w.write_str(content);
            }
            Self::CreateRoom { user } => {
                w.write_u8(1);
                w.write_i32(*user);
            }
            Self::JoinRoom { user, name } => {
                w.write_u8(2);
                w.write_i32(*user);
                w.write_str(name);
            }
            Self::LeaveRoom { user, name } => {
                w.write_u8(3);
                w.write_i32(*user);
                w.write_str(name);
            }
            Self::NewHost { user } => {
                w.write_u8(4);
                w.write_i32(*user);
            }
            Self::SelectChart { user, name, id } => {
                w.write_u8(5);
                w.write_i32(*user);
                w.write_str(name);
                w.write_i32(*id);
            }
            Self::GameStart { user } => {
                w.write_u8(6);
                w.write_i32(*user);
            }
            Self::Ready { user } => {
                w.write_u8(7);
                w.write_i32(*user);
            }
            Self::CancelReady { user } => {
                w.write_u8(8);
                w.write_i32(*user);
            }
            Self::CancelGame { user } => {
                w.write_u8(9);
                w.write_i32(*user);
            }
            Self::StartPlaying => w.write_u8(10),
            Self::Played {
                user,
                score,
                accuracy,
                full_combo,
            } => {
                w.write_u8(11);
                w.write_i32(*user);
                w.write_i32(*score);
                w.write_f32(*accuracy);
                w.write_bool(*full_combo);
            }
            Self::GameEnd => w.write_u8(12),
            Self::Abort { user } => {
                w.write_u8(13);
                w.write_i32(*user);
            }
            Self::LockRoom { lock } => {
                w.write_u8(14);
                w.write_bool(*lock);
            }
            Self::CycleRoom { cycle } => {
                w.write_u8(15);
                w.write_bool(*cycle);
            }
        }
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        match r.read_u8()? {
            0 => Ok(Self::Chat {
                user: r.read_i32()?,
                content: r.read_string()?,
            }),
            1 => Ok(Self::CreateRoom { user: r.read_i32()? }),
            2 => Ok(Self::JoinRoom {
                user: r.read_i32()?,
                name: r.read_string()?,
            }),
            3 => Ok(Self::LeaveRoom {
                user: r.read_i32()?,
                name: r.read_string()?,
            }),
            4 => Ok(Self::NewHost { user: r.read_i32()? }),
            5 => Ok(Self::SelectChart {
                user: r.read_i32()?,
                name: r.read_string()?,
                id: r.read_i32()?,
            }),
            6 => Ok(Self::GameStart { user: r.read_i32()? }),
            7 => Ok(Self::Ready { user: r.read_i32()? }),
            8 => Ok(Self::CancelReady { user: r.read_i32()? }),
            9 => Ok(Self::CancelGame { user: r.read_i32()? }),
            10 => Ok(Self::StartPlaying),
            11 => Ok(Self::Played {
                user: r.read_i32()?,
                score: r.read_i32()?,
                accuracy: r.read_f32()?,
                full_combo: r.read_bool()?,
            }),
            12 => Ok(Self::GameEnd),
            13 => Ok(Self::Abort { user: r.read_i32()? }),
            14 => Ok(Self::LockRoom {
                lock: r.read_bool()?,
            }),
            15 => Ok(Self::CycleRoom {
                cycle: r.read_bool()?,
            }),
            tag => Err(ProtocolError::UnknownTag {
                kind: "message",
                tag,
            }),
        }
    }
}
