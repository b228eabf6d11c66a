//! NINJAM wire protocol: message type codes and one typed variant per code.

use std::fmt;

use crate::auth::PasswordHash;
use crate::wire::{self, cstring_len, Frame, MessageReader, MessageWriter, ReadError};

pub const MSG_AUTH_CHALLENGE: u8 = 0x00;
pub const MSG_AUTH_REPLY: u8 = 0x01;
pub const MSG_CONFIG_CHANGE: u8 = 0x02;
pub const MSG_USERINFO_CHANGE: u8 = 0x03;
pub const MSG_DOWNLOAD_BEGIN: u8 = 0x04;
pub const MSG_DOWNLOAD_WRITE: u8 = 0x05;
pub const MSG_AUTH_USER: u8 = 0x80;
pub const MSG_SET_USERMASK: u8 = 0x81;
pub const MSG_SET_CHANNEL_INFO: u8 = 0x82;
pub const MSG_CHAT: u8 = 0xc0;
pub const MSG_KEEPALIVE: u8 = 0xfd;

/// Version we report in the auth-user message.
pub const CLIENT_VERSION: u32 = 0x0002_0000;

/// Download-write flag marking the last chunk of an interval.
pub const DOWNLOAD_FLAG_FINAL: u8 = 0x01;

/// Usermask that subscribes to every channel of a user.
pub const SUBSCRIBE_ALL: u32 = 0xffff_ffff;

/// Per-channel parameter block size in set-channel-info (volume, pan, flags).
pub const CHANNEL_PARAM_SIZE: u16 = 4;

/// The only interval container this client accepts.
pub const FOURCC_OGG_VORBIS: FourCc = FourCc(*b"OGGv");

/// 16-byte interval identifier. Compared as raw bytes; hex is for display only.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid(pub [u8; 16]);

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({self})")
    }
}

/// 4-byte audio container tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({:?})", self.to_string())
    }
}

/// Server auth challenge (0x00).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub challenge: [u8; 8],
    pub server_capabilities: u32,
    pub protocol_version: u32,
    pub license: String,
}

/// Server auth reply (0x01). `message` is the error text on failure and the
/// server-assigned full username on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthReply {
    pub flag: u8,
    pub message: Option<String>,
    pub max_channels: Option<u8>,
}

impl AuthReply {
    pub fn succeeded(&self) -> bool {
        self.flag != 0
    }
}

/// Server config change (0x02).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigChange {
    pub bpm: u16,
    pub bpi: u16,
}

/// One record of a userinfo change (0x03).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelUpdate {
    pub active: bool,
    pub channel_index: u8,
    pub volume: i16,
    pub pan: i8,
    pub flags: u8,
    /// Full identity, `name@ip`.
    pub username: String,
    pub channel_name: String,
}

/// Start of an interval download (0x04).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadBegin {
    pub guid: Guid,
    pub estimated_size: u32,
    pub fourcc: FourCc,
    pub channel_index: u8,
    pub username: String,
}

/// One chunk of an interval download (0x05).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadWrite {
    pub guid: Guid,
    pub flags: u8,
    pub data: Vec<u8>,
}

impl DownloadWrite {
    pub fn is_final(&self) -> bool {
        self.flags & DOWNLOAD_FLAG_FINAL != 0
    }
}

/// Client auth response (0x80).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub password_hash: PasswordHash,
    pub username: String,
    pub capabilities: u32,
    pub client_version: u32,
}

/// One entry of a set-usermask message (0x81).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsermaskEntry {
    pub username: String,
    pub mask: u32,
}

/// One local channel announced by set-channel-info (0x82).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub name: String,
    pub volume: i16,
    pub pan: i8,
    pub flags: u8,
}

/// Chat message (0xC0): a command and four arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatMessage {
    pub command: String,
    pub arg1: String,
    pub arg2: String,
    pub arg3: String,
    pub arg4: String,
}

/// Chat commands the client knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatCommand {
    Msg,
    PrivMsg,
    Topic,
    Join,
    Part,
    UserCount,
    Other,
}

impl ChatMessage {
    pub fn new(command: &str, args: [&str; 4]) -> Self {
        Self {
            command: command.to_string(),
            arg1: args[0].to_string(),
            arg2: args[1].to_string(),
            arg3: args[2].to_string(),
            arg4: args[3].to_string(),
        }
    }

    pub fn kind(&self) -> ChatCommand {
        match self.command.as_str() {
            "MSG" => ChatCommand::Msg,
            "PRIVMSG" => ChatCommand::PrivMsg,
            "TOPIC" => ChatCommand::Topic,
            "JOIN" => ChatCommand::Join,
            "PART" => ChatCommand::Part,
            "USERCOUNT" => ChatCommand::UserCount,
            _ => ChatCommand::Other,
        }
    }

    fn fields(&self) -> [&str; 5] {
        [&self.command, &self.arg1, &self.arg2, &self.arg3, &self.arg4]
    }
}

/// All wire message types, one variant per type code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    AuthChallenge(AuthChallenge),
    AuthReply(AuthReply),
    ConfigChange(ConfigChange),
    UserInfoChange(Vec<ChannelUpdate>),
    DownloadBegin(DownloadBegin),
    DownloadWrite(DownloadWrite),
    AuthUser(AuthUser),
    SetUsermask(Vec<UsermaskEntry>),
    SetChannelInfo(Vec<ChannelInfo>),
    Chat(ChatMessage),
    Keepalive,
}

/// Error turning a frame into a `Message`. Either one ends the current parse pass.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown message type 0x{0:02x}")]
    UnknownMessageType(u8),
    #[error("malformed 0x{msg_type:02x} payload: {source}")]
    Malformed { msg_type: u8, source: ReadError },
    #[error("0x{msg_type:02x} message declares {len} payload bytes, over the frame limit")]
    FrameTooLarge { msg_type: u8, len: usize },
}

impl Message {
    pub fn msg_type(&self) -> u8 {
        match self {
            Message::AuthChallenge(_) => MSG_AUTH_CHALLENGE,
            Message::AuthReply(_) => MSG_AUTH_REPLY,
            Message::ConfigChange(_) => MSG_CONFIG_CHANGE,
            Message::UserInfoChange(_) => MSG_USERINFO_CHANGE,
            Message::DownloadBegin(_) => MSG_DOWNLOAD_BEGIN,
            Message::DownloadWrite(_) => MSG_DOWNLOAD_WRITE,
            Message::AuthUser(_) => MSG_AUTH_USER,
            Message::SetUsermask(_) => MSG_SET_USERMASK,
            Message::SetChannelInfo(_) => MSG_SET_CHANNEL_INFO,
            Message::Chat(_) => MSG_CHAT,
            Message::Keepalive => MSG_KEEPALIVE,
        }
    }

    /// Encode into a complete frame (header + payload), ready to write to the stream.
    pub fn encode(&self) -> Vec<u8> {
        wire::encode_frame(self.msg_type(), &self.encode_payload())
    }

    fn encode_payload(&self) -> Vec<u8> {
        match self {
            Message::AuthChallenge(m) => {
                let mut w = MessageWriter::new(8 + 4 + 4 + cstring_len(&m.license));
                w.put_bytes(&m.challenge);
                w.put_u32(m.server_capabilities);
                w.put_u32(m.protocol_version);
                w.put_cstring(&m.license);
                w.into_inner()
            }
            Message::AuthReply(m) => {
                let text = match (&m.message, m.max_channels) {
                    (Some(s), _) => Some(s.as_str()),
                    (None, Some(_)) => Some(""),
                    (None, None) => None,
                };
                let size = 1
                    + text.map(cstring_len).unwrap_or(0)
                    + usize::from(m.max_channels.is_some());
                let mut w = MessageWriter::new(size);
                w.put_u8(m.flag);
                if let Some(s) = text {
                    w.put_cstring(s);
                }
                if let Some(n) = m.max_channels {
                    w.put_u8(n);
                }
                w.into_inner()
            }
            Message::ConfigChange(m) => {
                let mut w = MessageWriter::new(4);
                w.put_u16(m.bpm);
                w.put_u16(m.bpi);
                w.into_inner()
            }
            Message::UserInfoChange(records) => {
                let size = records
                    .iter()
                    .map(|r| 6 + cstring_len(&r.username) + cstring_len(&r.channel_name))
                    .sum();
                let mut w = MessageWriter::new(size);
                for r in records {
                    w.put_u8(u8::from(r.active));
                    w.put_u8(r.channel_index);
                    w.put_i16(r.volume);
                    w.put_i8(r.pan);
                    w.put_u8(r.flags);
                    w.put_cstring(&r.username);
                    w.put_cstring(&r.channel_name);
                }
                w.into_inner()
            }
            Message::DownloadBegin(m) => {
                let mut w = MessageWriter::new(16 + 4 + 4 + 1 + cstring_len(&m.username));
                w.put_bytes(&m.guid.0);
                w.put_u32(m.estimated_size);
                w.put_bytes(&m.fourcc.0);
                w.put_u8(m.channel_index);
                w.put_cstring(&m.username);
                w.into_inner()
            }
            Message::DownloadWrite(m) => {
                let mut w = MessageWriter::new(16 + 1 + m.data.len());
                w.put_bytes(&m.guid.0);
                w.put_u8(m.flags);
                w.put_bytes(&m.data);
                w.into_inner()
            }
            Message::AuthUser(m) => {
                let mut w = MessageWriter::new(20 + cstring_len(&m.username) + 4 + 4);
                for word in m.password_hash.words() {
                    w.put_u32(word);
                }
                w.put_cstring(&m.username);
                w.put_u32(m.capabilities);
                w.put_u32(m.client_version);
                w.into_inner()
            }
            Message::SetUsermask(entries) => {
                let size = entries.iter().map(|e| cstring_len(&e.username) + 4).sum();
                let mut w = MessageWriter::new(size);
                for e in entries {
                    w.put_cstring(&e.username);
                    w.put_u32(e.mask);
                }
                w.into_inner()
            }
            Message::SetChannelInfo(channels) => {
                let size = 2 + channels
                    .iter()
                    .map(|c| cstring_len(&c.name) + CHANNEL_PARAM_SIZE as usize)
                    .sum::<usize>();
                let mut w = MessageWriter::new(size);
                w.put_u16(CHANNEL_PARAM_SIZE);
                for c in channels {
                    w.put_cstring(&c.name);
                    w.put_i16(c.volume);
                    w.put_i8(c.pan);
                    w.put_u8(c.flags);
                }
                w.into_inner()
            }
            Message::Chat(m) => {
                let fields = m.fields();
                let mut w = MessageWriter::new(fields.iter().map(|s| cstring_len(s)).sum());
                for s in fields {
                    w.put_cstring(s);
                }
                w.into_inner()
            }
            Message::Keepalive => Vec::new(),
        }
    }

    /// Decode a frame into a typed message. Trailing bytes after the last field are ignored.
    pub fn decode(frame: &Frame) -> Result<Message, ProtocolError> {
        let mut r = MessageReader::new(&frame.payload);
        match decode_payload(frame.msg_type, &mut r) {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(ProtocolError::UnknownMessageType(frame.msg_type)),
            Err(source) => Err(ProtocolError::Malformed {
                msg_type: frame.msg_type,
                source,
            }),
        }
    }
}

fn decode_payload(msg_type: u8, r: &mut MessageReader<'_>) -> Result<Option<Message>, ReadError> {
    let msg = match msg_type {
        MSG_AUTH_CHALLENGE => Message::AuthChallenge(AuthChallenge {
            challenge: r.array()?,
            server_capabilities: r.u32()?,
            protocol_version: r.u32()?,
            license: r.cstring()?,
        }),
        MSG_AUTH_REPLY => {
            let flag = r.u8()?;
            let message = if r.has_more() { Some(r.cstring()?) } else { None };
            let max_channels = if r.has_more() { Some(r.u8()?) } else { None };
            Message::AuthReply(AuthReply {
                flag,
                message,
                max_channels,
            })
        }
        MSG_CONFIG_CHANGE => Message::ConfigChange(ConfigChange {
            bpm: r.u16()?,
            bpi: r.u16()?,
        }),
        MSG_USERINFO_CHANGE => {
            let mut records = Vec::new();
            while r.has_more() {
                records.push(ChannelUpdate {
                    active: r.u8()? != 0,
                    channel_index: r.u8()?,
                    volume: r.i16()?,
                    pan: r.i8()?,
                    flags: r.u8()?,
                    username: r.cstring()?,
                    channel_name: r.cstring()?,
                });
            }
            Message::UserInfoChange(records)
        }
        MSG_DOWNLOAD_BEGIN => Message::DownloadBegin(DownloadBegin {
            guid: Guid(r.array()?),
            estimated_size: r.u32()?,
            fourcc: FourCc(r.array()?),
            channel_index: r.u8()?,
            username: r.cstring()?,
        }),
        MSG_DOWNLOAD_WRITE => Message::DownloadWrite(DownloadWrite {
            guid: Guid(r.array()?),
            flags: r.u8()?,
            data: r.rest().to_vec(),
        }),
        MSG_AUTH_USER => {
            let mut words = [0u32; 5];
            for w in &mut words {
                *w = r.u32()?;
            }
            Message::AuthUser(AuthUser {
                password_hash: PasswordHash::from_words(words),
                username: r.cstring()?,
                capabilities: r.u32()?,
                client_version: r.u32()?,
            })
        }
        MSG_SET_USERMASK => {
            let mut entries = Vec::new();
            while r.has_more() {
                entries.push(UsermaskEntry {
                    username: r.cstring()?,
                    mask: r.u32()?,
                });
            }
            Message::SetUsermask(entries)
        }
        MSG_SET_CHANNEL_INFO => {
            let param_size = r.u16()? as usize;
            let mut channels = Vec::new();
            while r.has_more() {
                let name = r.cstring()?;
                let mut params = MessageReader::new(r.bytes(param_size)?);
                channels.push(ChannelInfo {
                    name,
                    volume: params.i16().unwrap_or(0),
                    pan: params.i8().unwrap_or(0),
                    flags: params.u8().unwrap_or(0),
                });
            }
            Message::SetChannelInfo(channels)
        }
        MSG_CHAT => Message::Chat(ChatMessage {
            command: r.cstring()?,
            arg1: r.cstring()?,
            arg2: r.cstring()?,
            arg3: r.cstring()?,
            arg4: r.cstring()?,
        }),
        MSG_KEEPALIVE => Message::Keepalive,
        _ => return Ok(None),
    };
    Ok(Some(msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::decode_frame;

    fn roundtrip(msg: &Message) -> Message {
        let bytes = msg.encode();
        let (frame, n) = decode_frame(&bytes).unwrap();
        assert_eq!(n, bytes.len());
        assert_eq!(frame.msg_type, msg.msg_type());
        Message::decode(&frame).unwrap()
    }

    #[test]
    fn every_message_type_roundtrips() {
        let samples = vec![
            Message::AuthChallenge(AuthChallenge {
                challenge: *b"\x01\x02\x03\x04\x05\x06\x07\x08",
                server_capabilities: 0x0000_1e01,
                protocol_version: 0x0002_0000,
                license: "Be nice.".into(),
            }),
            Message::AuthReply(AuthReply {
                flag: 1,
                message: Some("anonymous:bob@1.2.3.x".into()),
                max_channels: Some(2),
            }),
            Message::AuthReply(AuthReply {
                flag: 0,
                message: None,
                max_channels: None,
            }),
            Message::ConfigChange(ConfigChange { bpm: 120, bpi: 16 }),
            Message::UserInfoChange(vec![
                ChannelUpdate {
                    active: true,
                    channel_index: 0,
                    volume: -3,
                    pan: -20,
                    flags: 0,
                    username: "alice@10.0.0.x".into(),
                    channel_name: "guitar".into(),
                },
                ChannelUpdate {
                    active: false,
                    channel_index: 3,
                    volume: 0,
                    pan: 0,
                    flags: 2,
                    username: "bob@10.0.0.y".into(),
                    channel_name: String::new(),
                },
            ]),
            Message::DownloadBegin(DownloadBegin {
                guid: Guid([7; 16]),
                estimated_size: 40_000,
                fourcc: FOURCC_OGG_VORBIS,
                channel_index: 1,
                username: "alice@10.0.0.x".into(),
            }),
            Message::DownloadWrite(DownloadWrite {
                guid: Guid([7; 16]),
                flags: DOWNLOAD_FLAG_FINAL,
                data: b"OggS tail".to_vec(),
            }),
            Message::AuthUser(AuthUser {
                password_hash: PasswordHash::from_bytes([0xab; 20]),
                username: "anonymous:bob".into(),
                capabilities: 1,
                client_version: CLIENT_VERSION,
            }),
            Message::SetUsermask(vec![
                UsermaskEntry {
                    username: "alice@10.0.0.x".into(),
                    mask: SUBSCRIBE_ALL,
                },
                UsermaskEntry {
                    username: "bob@10.0.0.y".into(),
                    mask: 1,
                },
            ]),
            Message::SetChannelInfo(vec![ChannelInfo {
                name: "mic".into(),
                volume: 0,
                pan: 0,
                flags: 1,
            }]),
            Message::Chat(ChatMessage::new("PRIVMSG", ["alice", "hi there", "", ""])),
            Message::Keepalive,
        ];
        for msg in &samples {
            assert_eq!(&roundtrip(msg), msg);
        }
    }

    #[test]
    fn unknown_type_is_reported() {
        let frame = Frame {
            msg_type: 0x42,
            payload: vec![1, 2, 3],
        };
        assert_eq!(
            Message::decode(&frame),
            Err(ProtocolError::UnknownMessageType(0x42))
        );
    }

    #[test]
    fn truncated_payload_is_malformed() {
        let frame = Frame {
            msg_type: MSG_CONFIG_CHANGE,
            payload: vec![120, 0],
        };
        assert!(matches!(
            Message::decode(&frame),
            Err(ProtocolError::Malformed {
                msg_type: MSG_CONFIG_CHANGE,
                ..
            })
        ));
    }

    #[test]
    fn auth_user_layout() {
        let hash = PasswordHash::from_bytes(std::array::from_fn(|i| i as u8));
        let msg = Message::AuthUser(AuthUser {
            password_hash: hash,
            username: "anonymous:bob".into(),
            capabilities: 1,
            client_version: CLIENT_VERSION,
        });
        let bytes = msg.encode();
        let payload = &bytes[wire::HEADER_SIZE..];
        assert_eq!(payload.len(), 29 + "anonymous:bob".len());
        assert_eq!(&payload[..20], hash.as_bytes());
        assert_eq!(&payload[20..34], b"anonymous:bob\0");
        assert_eq!(&payload[34..38], &1u32.to_le_bytes());
        assert_eq!(&payload[38..42], &CLIENT_VERSION.to_le_bytes());
    }

    #[test]
    fn channel_info_declares_param_size() {
        let msg = Message::SetChannelInfo(vec![ChannelInfo {
            name: "in".into(),
            volume: 0,
            pan: 0,
            flags: 1,
        }]);
        let bytes = msg.encode();
        assert_eq!(
            &bytes[wire::HEADER_SIZE..],
            &[4, 0, b'i', b'n', 0, 0, 0, 0, 1]
        );
    }

    #[test]
    fn download_write_takes_remaining_bytes() {
        let mut payload = vec![9u8; 16];
        payload.push(0);
        payload.extend_from_slice(b"chunk");
        let frame = Frame {
            msg_type: MSG_DOWNLOAD_WRITE,
            payload,
        };
        match Message::decode(&frame).unwrap() {
            Message::DownloadWrite(w) => {
                assert_eq!(w.guid, Guid([9; 16]));
                assert!(!w.is_final());
                assert_eq!(w.data, b"chunk");
            }
            other => panic!("expected DownloadWrite, got {other:?}"),
        }
    }

    #[test]
    fn chat_kind() {
        assert_eq!(ChatMessage::new("TOPIC", ["", "", "", ""]).kind(), ChatCommand::Topic);
        assert_eq!(ChatMessage::new("SESSION", ["", "", "", ""]).kind(), ChatCommand::Other);
    }

    #[test]
    fn guid_displays_as_hex() {
        let mut bytes = [0u8; 16];
        bytes[0] = 0xde;
        bytes[15] = 0x01;
        assert_eq!(Guid(bytes).to_string(), "de000000000000000000000000000001");
    }
}
