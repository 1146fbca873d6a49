//! Bit-exact wire codec for the match protocol.
//!
//! Parsing and serialising are driven by the message tag in the five-byte
//! header. Unknown tags surface as [`ProtocolError::UnknownMessageType`] so
//! the dispatcher can drop the datagram without killing anything.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::messages::{
    ChangePort, ChecksumAck, ClientMessage, ClientMessageType, ClientPayload, DisconnectingPayload,
    InputAck, InputPayload, Kick, MatchData, MatchResultPayload, NewConnectionPayload,
    NewConnectionReply, PlayerData, PlayerDisconnected, PlayerDisconnectedAckPayload,
    PlayerInputAckPayload, PlayerInputBroadcast, PlayersConfigurationData, PlayersStatus,
    QualityDataPayload, ReadyToStartMatchPayload, RequestQualityData, ServerMessage,
    ServerMessageType, ServerPayload, ENVIRONMENT_ID_WIDTH, HEADER_SIZE, KEY_WIDTH,
    MATCH_ID_WIDTH, PLAYER_CONFIG_VALUES,
};
use crate::ProtocolError;

/// Reads a fixed-width, zero-terminated string field.
///
/// The cursor always advances the full field width; the string stops at the
/// first zero byte within it.
fn read_fixed_string(cursor: &mut Cursor<&[u8]>, width: usize) -> Result<String, ProtocolError> {
    let mut raw = vec![0u8; width];
    cursor.read_exact(&mut raw)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}

/// Parses one client datagram (already decompressed).
pub fn parse_client_message(buf: &[u8]) -> Result<ClientMessage, ProtocolError> {
    if buf.len() < HEADER_SIZE {
        return Err(ProtocolError::TruncatedPacket);
    }

    let mut cursor = Cursor::new(buf);
    let message_type = ClientMessageType::from_u8(cursor.read_u8()?)?;
    let sequence = cursor.read_u32::<LittleEndian>()?;

    let payload = match message_type {
        ClientMessageType::NewConnection => {
            let message_version = cursor.read_u16::<LittleEndian>()?;
            let team_id = cursor.read_u16::<LittleEndian>()?;
            let player_index = cursor.read_u16::<LittleEndian>()?;
            let match_id = read_fixed_string(&mut cursor, MATCH_ID_WIDTH)?;
            let key = read_fixed_string(&mut cursor, KEY_WIDTH)?;
            let environment_id = read_fixed_string(&mut cursor, ENVIRONMENT_ID_WIDTH)?;
            ClientPayload::NewConnection(NewConnectionPayload {
                message_version,
                player_data: PlayerData {
                    team_id,
                    player_index,
                },
                match_data: MatchData {
                    match_id,
                    key,
                    environment_id,
                },
            })
        }

        ClientMessageType::Input => {
            let start_frame = cursor.read_u32::<LittleEndian>()?;
            let client_frame = cursor.read_u32::<LittleEndian>()?;
            let num_frames = cursor.read_u8()?;
            let num_checksums = cursor.read_u8()?;
            let mut input_per_frame = Vec::with_capacity(num_frames as usize);
            for _ in 0..num_frames {
                input_per_frame.push(cursor.read_u32::<LittleEndian>()?);
            }
            let mut checksum_per_frame = Vec::with_capacity(num_checksums as usize);
            for _ in 0..num_checksums {
                checksum_per_frame.push(cursor.read_u32::<LittleEndian>()?);
            }
            ClientPayload::Input(InputPayload {
                start_frame,
                client_frame,
                input_per_frame,
                checksum_per_frame,
            })
        }

        ClientMessageType::PlayerInputAck => {
            let num_players = cursor.read_u8()?;
            let mut ack_frame = Vec::with_capacity(num_players as usize);
            for _ in 0..num_players {
                ack_frame.push(cursor.read_u32::<LittleEndian>()?);
            }
            let server_sequence = cursor.read_u32::<LittleEndian>()?;
            ClientPayload::PlayerInputAck(PlayerInputAckPayload {
                ack_frame,
                server_sequence,
            })
        }

        ClientMessageType::MatchResult => {
            let num_players = cursor.read_u8()?;
            let last_frame_checksum = cursor.read_u32::<LittleEndian>()?;
            let winning_team_index = cursor.read_u8()?;
            ClientPayload::MatchResult(MatchResultPayload {
                num_players,
                last_frame_checksum,
                winning_team_index,
            })
        }

        ClientMessageType::QualityData => ClientPayload::QualityData(QualityDataPayload {
            server_sequence: cursor.read_u32::<LittleEndian>()?,
        }),

        ClientMessageType::Disconnecting => ClientPayload::Disconnecting(DisconnectingPayload {
            reason: cursor.read_u8()?,
        }),

        ClientMessageType::PlayerDisconnectedAck => {
            ClientPayload::PlayerDisconnectedAck(PlayerDisconnectedAckPayload {
                array_index: cursor.read_u8()?,
            })
        }

        ClientMessageType::ReadyToStartMatch => {
            ClientPayload::ReadyToStartMatch(ReadyToStartMatchPayload {
                ready: cursor.read_u8()?,
            })
        }
    };

    Ok(ClientMessage { sequence, payload })
}

/// Serialises one server message, padding player-indexed arrays to
/// `max_players` as the wire format requires.
pub fn serialize_server_message(
    message: &ServerMessage,
    max_players: usize,
) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(64);
    buf.write_u8(message.payload.message_type() as u8)?;
    buf.write_u32::<LittleEndian>(message.sequence)?;

    match &message.payload {
        ServerPayload::NewConnectionReply(data) => {
            buf.write_u8(data.success)?;
            buf.write_u8(data.match_num_players)?;
            buf.write_u8(data.player_index)?;
            buf.write_u32::<LittleEndian>(data.match_duration_in_frames)?;
            buf.write_u8(data.is_validation_server_debug_mode)?;
        }

        ServerPayload::StartGame => {}

        ServerPayload::InputAck(data) => {
            buf.write_u32::<LittleEndian>(data.ack_frame)?;
        }

        ServerPayload::PlayerInput(data) => {
            buf.write_u8(data.num_players)?;
            for i in 0..max_players {
                buf.write_u32::<LittleEndian>(data.start_frame.get(i).copied().unwrap_or(0))?;
            }
            for i in 0..max_players {
                buf.write_u8(data.num_frames.get(i).copied().unwrap_or(0))?;
            }
            buf.write_u16::<LittleEndian>(data.num_predicted_overrides)?;
            buf.write_u16::<LittleEndian>(data.num_zeroed_overrides)?;
            buf.write_i16::<LittleEndian>(data.ping)?;
            buf.write_i16::<LittleEndian>(data.packets_loss_percent)?;
            buf.write_i16::<LittleEndian>((data.rift * 100.0).round() as i16)?;
            buf.write_u32::<LittleEndian>(data.checksum_ack_frame)?;
            let empty = Vec::new();
            for p in 0..max_players {
                let frames = data.input_per_frame.get(p).unwrap_or(&empty);
                let count = data.num_frames.get(p).copied().unwrap_or(0);
                for f in 0..count as usize {
                    buf.write_u32::<LittleEndian>(frames.get(f).copied().unwrap_or(0))?;
                }
            }
        }

        ServerPayload::RequestQualityData(data) => {
            buf.write_u16::<LittleEndian>(data.ping)?;
            buf.write_u16::<LittleEndian>(data.packets_loss_percent)?;
        }

        ServerPayload::PlayersStatus(data) => {
            for i in 0..max_players {
                buf.write_i16::<LittleEndian>(data.average_ping.get(i).copied().unwrap_or(0))?;
            }
        }

        ServerPayload::Kick(data) => {
            buf.write_u16::<LittleEndian>(data.reason)?;
            buf.write_u32::<LittleEndian>(data.param)?;
        }

        ServerPayload::ChecksumAck(data) => {
            buf.write_u32::<LittleEndian>(data.checksum_ack_frame)?;
        }

        ServerPayload::PlayersConfigurationData(data) => {
            buf.write_u8(data.num_players)?;
            for i in 0..max_players {
                buf.write_u16::<LittleEndian>(
                    PLAYER_CONFIG_VALUES[i % PLAYER_CONFIG_VALUES.len()],
                )?;
            }
        }

        ServerPayload::PlayerDisconnected(data) => {
            buf.write_u8(data.player_index)?;
            buf.write_u8(data.should_ai_take_control)?;
            buf.write_u32::<LittleEndian>(data.ai_take_control_frame)?;
            buf.write_u16::<LittleEndian>(data.array_index)?;
        }

        ServerPayload::ChangePort(data) => {
            buf.write_u16::<LittleEndian>(data.port)?;
        }
    }

    Ok(buf)
}

/// Parses one server datagram, the inverse of [`serialize_server_message`].
///
/// Player-indexed arrays need `max_players` to know their fixed width.
pub fn parse_server_message(
    buf: &[u8],
    max_players: usize,
) -> Result<ServerMessage, ProtocolError> {
    if buf.len() < HEADER_SIZE {
        return Err(ProtocolError::TruncatedPacket);
    }

    let mut cursor = Cursor::new(buf);
    let message_type = ServerMessageType::from_u8(cursor.read_u8()?)?;
    let sequence = cursor.read_u32::<LittleEndian>()?;

    let payload = match message_type {
        ServerMessageType::NewConnectionReply => {
            ServerPayload::NewConnectionReply(NewConnectionReply {
                success: cursor.read_u8()?,
                match_num_players: cursor.read_u8()?,
                player_index: cursor.read_u8()?,
                match_duration_in_frames: cursor.read_u32::<LittleEndian>()?,
                is_validation_server_debug_mode: cursor.read_u8()?,
            })
        }

        ServerMessageType::StartGame => ServerPayload::StartGame,

        ServerMessageType::InputAck => ServerPayload::InputAck(InputAck {
            ack_frame: cursor.read_u32::<LittleEndian>()?,
        }),

        ServerMessageType::PlayerInput => {
            let num_players = cursor.read_u8()?;
            let mut start_frame = Vec::with_capacity(max_players);
            for _ in 0..max_players {
                start_frame.push(cursor.read_u32::<LittleEndian>()?);
            }
            let mut num_frames = Vec::with_capacity(max_players);
            for _ in 0..max_players {
                num_frames.push(cursor.read_u8()?);
            }
            let num_predicted_overrides = cursor.read_u16::<LittleEndian>()?;
            let num_zeroed_overrides = cursor.read_u16::<LittleEndian>()?;
            let ping = cursor.read_i16::<LittleEndian>()?;
            let packets_loss_percent = cursor.read_i16::<LittleEndian>()?;
            let rift = cursor.read_i16::<LittleEndian>()? as f32 / 100.0;
            let checksum_ack_frame = cursor.read_u32::<LittleEndian>()?;
            let mut input_per_frame = Vec::with_capacity(max_players);
            for p in 0..max_players {
                let mut frames = Vec::with_capacity(num_frames[p] as usize);
                for _ in 0..num_frames[p] {
                    frames.push(cursor.read_u32::<LittleEndian>()?);
                }
                input_per_frame.push(frames);
            }
            ServerPayload::PlayerInput(PlayerInputBroadcast {
                num_players,
                start_frame,
                num_frames,
                num_predicted_overrides,
                num_zeroed_overrides,
                ping,
                packets_loss_percent,
                rift,
                checksum_ack_frame,
                input_per_frame,
            })
        }

        ServerMessageType::RequestQualityData => {
            ServerPayload::RequestQualityData(RequestQualityData {
                ping: cursor.read_u16::<LittleEndian>()?,
                packets_loss_percent: cursor.read_u16::<LittleEndian>()?,
            })
        }

        ServerMessageType::PlayersStatus => {
            let mut average_ping = Vec::with_capacity(max_players);
            for _ in 0..max_players {
                average_ping.push(cursor.read_i16::<LittleEndian>()?);
            }
            ServerPayload::PlayersStatus(PlayersStatus { average_ping })
        }

        ServerMessageType::Kick => ServerPayload::Kick(Kick {
            reason: cursor.read_u16::<LittleEndian>()?,
            param: cursor.read_u32::<LittleEndian>()?,
        }),

        ServerMessageType::ChecksumAck => ServerPayload::ChecksumAck(ChecksumAck {
            checksum_ack_frame: cursor.read_u32::<LittleEndian>()?,
        }),

        ServerMessageType::PlayersConfigurationData => {
            let num_players = cursor.read_u8()?;
            for _ in 0..max_players {
                // Fixed table values; nothing to keep.
                cursor.read_u16::<LittleEndian>()?;
            }
            ServerPayload::PlayersConfigurationData(PlayersConfigurationData { num_players })
        }

        ServerMessageType::PlayerDisconnected => {
            ServerPayload::PlayerDisconnected(PlayerDisconnected {
                player_index: cursor.read_u8()?,
                should_ai_take_control: cursor.read_u8()?,
                ai_take_control_frame: cursor.read_u32::<LittleEndian>()?,
                array_index: cursor.read_u16::<LittleEndian>()?,
            })
        }

        ServerMessageType::ChangePort => ServerPayload::ChangePort(ChangePort {
            port: cursor.read_u16::<LittleEndian>()?,
        }),
    };

    Ok(ServerMessage { sequence, payload })
}
