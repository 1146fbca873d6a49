//! Typed message model for both directions of the match protocol.
//!
//! Payloads are tagged variants; dispatch is a match on the tag byte carried
//! in the header. Field layouts live in [`crate::codec`].

use crate::ProtocolError;

/// Size of the `type:u8 || sequence:u32` header both directions share.
pub const HEADER_SIZE: usize = 5;

/// Fixed field widths of the `NewConnection` strings, terminator included.
pub const MATCH_ID_WIDTH: usize = 25;
pub const KEY_WIDTH: usize = 45;
pub const ENVIRONMENT_ID_WIDTH: usize = 25;

/// Per-slot values of `PlayersConfigurationData`, cycled modulo its length.
pub const PLAYER_CONFIG_VALUES: [u16; 4] = [0, 257, 512, 769];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientMessageType {
    NewConnection = 1,
    Input = 2,
    PlayerInputAck = 3,
    MatchResult = 4,
    QualityData = 5,
    Disconnecting = 6,
    PlayerDisconnectedAck = 7,
    ReadyToStartMatch = 8,
}

impl ClientMessageType {
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(Self::NewConnection),
            2 => Ok(Self::Input),
            3 => Ok(Self::PlayerInputAck),
            4 => Ok(Self::MatchResult),
            5 => Ok(Self::QualityData),
            6 => Ok(Self::Disconnecting),
            7 => Ok(Self::PlayerDisconnectedAck),
            8 => Ok(Self::ReadyToStartMatch),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerMessageType {
    NewConnectionReply = 1,
    StartGame = 2,
    InputAck = 3,
    PlayerInput = 4,
    RequestQualityData = 6,
    PlayersStatus = 7,
    Kick = 8,
    ChecksumAck = 9,
    PlayersConfigurationData = 10,
    PlayerDisconnected = 11,
    ChangePort = 12,
}

impl ServerMessageType {
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(Self::NewConnectionReply),
            2 => Ok(Self::StartGame),
            3 => Ok(Self::InputAck),
            4 => Ok(Self::PlayerInput),
            6 => Ok(Self::RequestQualityData),
            7 => Ok(Self::PlayersStatus),
            8 => Ok(Self::Kick),
            9 => Ok(Self::ChecksumAck),
            10 => Ok(Self::PlayersConfigurationData),
            11 => Ok(Self::PlayerDisconnected),
            12 => Ok(Self::ChangePort),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

// === Client → server payloads ===

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerData {
    pub team_id: u16,
    pub player_index: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchData {
    /// Up to 24 characters plus terminator on the wire.
    pub match_id: String,
    pub key: String,
    pub environment_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConnectionPayload {
    pub message_version: u16,
    pub player_data: PlayerData,
    pub match_data: MatchData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputPayload {
    pub start_frame: u32,
    /// How far the client's own simulation has advanced.
    pub client_frame: u32,
    pub input_per_frame: Vec<u32>,
    pub checksum_per_frame: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerInputAckPayload {
    /// Highest frame of each peer this client has received, 0 meaning none.
    pub ack_frame: Vec<u32>,
    pub server_sequence: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResultPayload {
    pub num_players: u8,
    pub last_frame_checksum: u32,
    pub winning_team_index: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityDataPayload {
    pub server_sequence: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectingPayload {
    pub reason: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerDisconnectedAckPayload {
    pub array_index: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyToStartMatchPayload {
    pub ready: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientPayload {
    NewConnection(NewConnectionPayload),
    Input(InputPayload),
    PlayerInputAck(PlayerInputAckPayload),
    MatchResult(MatchResultPayload),
    QualityData(QualityDataPayload),
    Disconnecting(DisconnectingPayload),
    PlayerDisconnectedAck(PlayerDisconnectedAckPayload),
    ReadyToStartMatch(ReadyToStartMatchPayload),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientMessage {
    pub sequence: u32,
    pub payload: ClientPayload,
}

// === Server → client payloads ===

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewConnectionReply {
    pub success: u8,
    pub match_num_players: u8,
    pub player_index: u8,
    pub match_duration_in_frames: u32,
    pub is_validation_server_debug_mode: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputAck {
    pub ack_frame: u32,
}

/// The per-tick combined input broadcast.
///
/// `start_frame` and `num_frames` are always serialised padded to
/// `max_players` entries; `input_per_frame[p]` carries `num_frames[p]` words.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerInputBroadcast {
    pub num_players: u8,
    pub start_frame: Vec<u32>,
    pub num_frames: Vec<u8>,
    pub num_predicted_overrides: u16,
    pub num_zeroed_overrides: u16,
    pub ping: i16,
    pub packets_loss_percent: i16,
    /// Serialised as `round(rift * 100)` in an i16; quantised to 0.01 frames.
    pub rift: f32,
    pub checksum_ack_frame: u32,
    pub input_per_frame: Vec<Vec<u32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestQualityData {
    pub ping: u16,
    pub packets_loss_percent: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayersStatus {
    /// Serialised padded to `max_players` entries.
    pub average_ping: Vec<i16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kick {
    pub reason: u16,
    pub param: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumAck {
    pub checksum_ack_frame: u32,
}

/// Only the live player count crosses the wire as data; the per-slot values
/// are the fixed [`PLAYER_CONFIG_VALUES`] table cycled over `max_players`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayersConfigurationData {
    pub num_players: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerDisconnected {
    pub player_index: u8,
    pub should_ai_take_control: u8,
    pub ai_take_control_frame: u32,
    pub array_index: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangePort {
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerPayload {
    NewConnectionReply(NewConnectionReply),
    StartGame,
    InputAck(InputAck),
    PlayerInput(PlayerInputBroadcast),
    RequestQualityData(RequestQualityData),
    PlayersStatus(PlayersStatus),
    Kick(Kick),
    ChecksumAck(ChecksumAck),
    PlayersConfigurationData(PlayersConfigurationData),
    PlayerDisconnected(PlayerDisconnected),
    ChangePort(ChangePort),
}

impl ServerPayload {
    pub fn message_type(&self) -> ServerMessageType {
        match self {
            Self::NewConnectionReply(_) => ServerMessageType::NewConnectionReply,
            Self::StartGame => ServerMessageType::StartGame,
            Self::InputAck(_) => ServerMessageType::InputAck,
            Self::PlayerInput(_) => ServerMessageType::PlayerInput,
            Self::RequestQualityData(_) => ServerMessageType::RequestQualityData,
            Self::PlayersStatus(_) => ServerMessageType::PlayersStatus,
            Self::Kick(_) => ServerMessageType::Kick,
            Self::ChecksumAck(_) => ServerMessageType::ChecksumAck,
            Self::PlayersConfigurationData(_) => ServerMessageType::PlayersConfigurationData,
            Self::PlayerDisconnected(_) => ServerMessageType::PlayerDisconnected,
            Self::ChangePort(_) => ServerMessageType::ChangePort,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerMessage {
    pub sequence: u32,
    pub payload: ServerPayload,
}
