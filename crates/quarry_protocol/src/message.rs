//! The message catalog: a tagged union over every wire message in the
//! session-authentication protocol, each variant owning its payload fields and
//! its own field encoding.

use crate::error::CodecError;
use crate::wire::{WireReader, WireWriter};
use uuid::Uuid;

/// Which side of the protocol produced a message.
///
/// Used to prevent trust inversion: a handler can check that a message claiming
/// server authority actually arrived from a server-side channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageContext {
    /// Produced by a game client.
    Client,
    /// Produced by the game server or the auth server.
    Server,
}

/// One-byte type tag written ahead of every message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    AuthLogin = 0,
    AuthInit = 1,
    FailedLogin = 2,
    Session = 3,
    PublicKey = 4,
    ValidSession = 5,
    Init = 6,
    PluginDownload = 7,
    PingAuth = 8,
}

impl MessageKind {
    /// Stable lowercase name, used as the event key when routing inbound
    /// messages by kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthLogin => "auth_login",
            Self::AuthInit => "auth_init",
            Self::FailedLogin => "failed_login",
            Self::Session => "session",
            Self::PublicKey => "public_key",
            Self::ValidSession => "valid_session",
            Self::Init => "init",
            Self::PluginDownload => "plugin_download",
            Self::PingAuth => "ping_auth",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, CodecError> {
        match tag {
            0 => Ok(Self::AuthLogin),
            1 => Ok(Self::AuthInit),
            2 => Ok(Self::FailedLogin),
            3 => Ok(Self::Session),
            4 => Ok(Self::PublicKey),
            5 => Ok(Self::ValidSession),
            6 => Ok(Self::Init),
            7 => Ok(Self::PluginDownload),
            8 => Ok(Self::PingAuth),
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}

/// Client → auth server: credential login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthLogin {
    pub version: u32,
    pub username: String,
    pub password: String,
}

/// Auth server → client: the issued identity token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthInit {
    pub username: String,
    pub uuid: Uuid,
    pub private_key: String,
    pub public_key: String,
}

/// Auth server → client: login rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedLogin {
    pub reason: String,
}

/// Client → auth server: request a session with a target game server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub uuid: Uuid,
    pub private_key: String,
    pub target_host: String,
    pub target_port: u16,
}

/// Client → game server: connection hail carrying the public half of the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    pub username: String,
    pub uuid: Uuid,
    pub public_key: String,
}

/// Auth server → game server: verdict for a pending session, correlated by UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidSession {
    pub username: String,
    pub uuid: Uuid,
    pub valid: bool,
}

/// Summary of one level shown in the server's join list.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelInfo {
    pub name: String,
    pub uuid: Uuid,
    pub online: u32,
    pub rating: f64,
}

/// Game server → client: connection approval hail with the server's identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Init {
    pub server_name: String,
    pub description: String,
    pub intro: String,
    pub online_count: u32,
    pub levels: Vec<LevelInfo>,
}

/// Auth server → client: a plugin the client should fetch before joining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDownload {
    pub id: Uuid,
    pub mod_name: String,
    pub file_name: String,
}

/// Client ↔ auth server liveness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingAuth {
    pub response: u8,
    pub id: Uuid,
}

/// Payload union. Each variant encodes and decodes its own fields.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    AuthLogin(AuthLogin),
    AuthInit(AuthInit),
    FailedLogin(FailedLogin),
    Session(Session),
    PublicKey(PublicKey),
    ValidSession(ValidSession),
    Init(Init),
    PluginDownload(PluginDownload),
    PingAuth(PingAuth),
}

impl MessageBody {
    /// The type tag for this variant.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::AuthLogin(_) => MessageKind::AuthLogin,
            Self::AuthInit(_) => MessageKind::AuthInit,
            Self::FailedLogin(_) => MessageKind::FailedLogin,
            Self::Session(_) => MessageKind::Session,
            Self::PublicKey(_) => MessageKind::PublicKey,
            Self::ValidSession(_) => MessageKind::ValidSession,
            Self::Init(_) => MessageKind::Init,
            Self::PluginDownload(_) => MessageKind::PluginDownload,
            Self::PingAuth(_) => MessageKind::PingAuth,
        }
    }

    fn write_fields(&self, w: &mut WireWriter) -> Result<(), CodecError> {
        match self {
            Self::AuthLogin(m) => {
                w.write_u32(m.version);
                w.write_str(&m.username)?;
                w.write_str(&m.password)?;
            }
            Self::AuthInit(m) => {
                w.write_str(&m.username)?;
                w.write_uuid(&m.uuid);
                w.write_str(&m.private_key)?;
                w.write_str(&m.public_key)?;
            }
            Self::FailedLogin(m) => {
                w.write_str(&m.reason)?;
            }
            Self::Session(m) => {
                w.write_str(&m.username)?;
                w.write_uuid(&m.uuid);
                w.write_str(&m.private_key)?;
                w.write_str(&m.target_host)?;
                w.write_u16(m.target_port);
            }
            Self::PublicKey(m) => {
                w.write_str(&m.username)?;
                w.write_uuid(&m.uuid);
                w.write_str(&m.public_key)?;
            }
            Self::ValidSession(m) => {
                w.write_str(&m.username)?;
                w.write_uuid(&m.uuid);
                w.write_bool(m.valid);
            }
            Self::Init(m) => {
                w.write_str(&m.server_name)?;
                w.write_str(&m.description)?;
                w.write_str(&m.intro)?;
                w.write_u32(m.online_count);
                if m.levels.len() > u16::MAX as usize {
                    return Err(CodecError::CollectionTooLarge(m.levels.len()));
                }
                w.write_u16(m.levels.len() as u16);
                for level in &m.levels {
                    w.write_str(&level.name)?;
                    w.write_uuid(&level.uuid);
                    w.write_u32(level.online);
                    w.write_f64(level.rating);
                }
            }
            Self::PluginDownload(m) => {
                w.write_uuid(&m.id);
                w.write_str(&m.mod_name)?;
                w.write_str(&m.file_name)?;
            }
            Self::PingAuth(m) => {
                w.write_u8(m.response);
                w.write_uuid(&m.id);
            }
        }
        Ok(())
    }

    fn read_fields(kind: MessageKind, r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let body = match kind {
            MessageKind::AuthLogin => Self::AuthLogin(AuthLogin {
                version: r.read_u32()?,
                username: r.read_string()?,
                password: r.read_string()?,
            }),
            MessageKind::AuthInit => Self::AuthInit(AuthInit {
                username: r.read_string()?,
                uuid: r.read_uuid()?,
                private_key: r.read_string()?,
                public_key: r.read_string()?,
            }),
            MessageKind::FailedLogin => Self::FailedLogin(FailedLogin {
                reason: r.read_string()?,
            }),
            MessageKind::Session => Self::Session(Session {
                username: r.read_string()?,
                uuid: r.read_uuid()?,
                private_key: r.read_string()?,
                target_host: r.read_string()?,
                target_port: r.read_u16()?,
            }),
            MessageKind::PublicKey => Self::PublicKey(PublicKey {
                username: r.read_string()?,
                uuid: r.read_uuid()?,
                public_key: r.read_string()?,
            }),
            MessageKind::ValidSession => Self::ValidSession(ValidSession {
                username: r.read_string()?,
                uuid: r.read_uuid()?,
                valid: r.read_bool()?,
            }),
            MessageKind::Init => {
                let server_name = r.read_string()?;
                let description = r.read_string()?;
                let intro = r.read_string()?;
                let online_count = r.read_u32()?;
                let count = r.read_u16()? as usize;
                let mut levels = Vec::with_capacity(count.min(256));
                for _ in 0..count {
                    levels.push(LevelInfo {
                        name: r.read_string()?,
                        uuid: r.read_uuid()?,
                        online: r.read_u32()?,
                        rating: r.read_f64()?,
                    });
                }
                Self::Init(Init {
                    server_name,
                    description,
                    intro,
                    online_count,
                    levels,
                })
            }
            MessageKind::PluginDownload => Self::PluginDownload(PluginDownload {
                id: r.read_uuid()?,
                mod_name: r.read_string()?,
                file_name: r.read_string()?,
            }),
            MessageKind::PingAuth => Self::PingAuth(PingAuth {
                response: r.read_u8()?,
                id: r.read_uuid()?,
            }),
        };
        Ok(body)
    }
}

/// A wire message: provenance context plus the typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Who produced this message. Stamped on encode, supplied by the receiver
    /// on decode; never written to the wire.
    pub context: MessageContext,
    pub body: MessageBody,
}

impl Message {
    /// Wraps a body with client provenance. [`encode`](Self::encode) restamps
    /// the context before writing, so the initial value only matters for
    /// messages that are inspected without ever being sent.
    pub fn new(body: MessageBody) -> Self {
        Self {
            context: MessageContext::Client,
            body,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    /// Encodes the message, stamping `origin` as its context just before the
    /// bytes are written.
    pub fn encode(&mut self, origin: MessageContext) -> Result<Vec<u8>, CodecError> {
        self.context = origin;
        let mut writer = WireWriter::with_capacity(64);
        writer.write_u8(self.body.kind() as u8);
        self.body.write_fields(&mut writer)?;
        Ok(writer.into_bytes())
    }

    /// Decodes a whole buffer produced by [`encode`](Self::encode). The caller
    /// states who the buffer came from via `origin`.
    pub fn decode(buf: &[u8], origin: MessageContext) -> Result<Self, CodecError> {
        let mut reader = WireReader::new(buf);
        let kind = MessageKind::try_from(reader.read_u8()?)?;
        let body = MessageBody::read_fields(kind, &mut reader)?;
        if reader.remaining() > 0 {
            return Err(CodecError::TrailingBytes(reader.remaining()));
        }
        Ok(Self {
            context: origin,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_messages() -> Vec<MessageBody> {
        vec![
            MessageBody::AuthLogin(AuthLogin {
                version: crate::PROTOCOL_VERSION,
                username: "alice".into(),
                password: "pw".into(),
            }),
            MessageBody::AuthInit(AuthInit {
                username: "alice".into(),
                uuid: Uuid::new_v4(),
                private_key: "priv-key".into(),
                public_key: "pub-key".into(),
            }),
            MessageBody::FailedLogin(FailedLogin {
                reason: "bad credentials".into(),
            }),
            MessageBody::Session(Session {
                username: "alice".into(),
                uuid: Uuid::new_v4(),
                private_key: "priv-key".into(),
                target_host: "127.0.0.1".into(),
                target_port: 52300,
            }),
            MessageBody::PublicKey(PublicKey {
                username: "alice".into(),
                uuid: Uuid::new_v4(),
                public_key: "pub-key".into(),
            }),
            MessageBody::ValidSession(ValidSession {
                username: "alice".into(),
                uuid: Uuid::new_v4(),
                valid: true,
            }),
            MessageBody::Init(Init {
                server_name: "Quarry Test Server".into(),
                description: "a place to stack blocks".into(),
                intro: "welcome!".into(),
                online_count: 12,
                levels: vec![
                    LevelInfo {
                        name: "lobby".into(),
                        uuid: Uuid::new_v4(),
                        online: 4,
                        rating: 4.5,
                    },
                    LevelInfo {
                        name: "sandbox".into(),
                        uuid: Uuid::new_v4(),
                        online: 8,
                        rating: 3.0,
                    },
                ],
            }),
            MessageBody::PluginDownload(PluginDownload {
                id: Uuid::new_v4(),
                mod_name: "minimap".into(),
                file_name: "minimap.gz".into(),
            }),
            MessageBody::PingAuth(PingAuth {
                response: 1,
                id: Uuid::new_v4(),
            }),
        ]
    }

    #[test]
    fn every_variant_round_trips() {
        for body in sample_messages() {
            let mut message = Message::new(body);
            let bytes = message.encode(MessageContext::Client).unwrap();
            let decoded = Message::decode(&bytes, MessageContext::Client).unwrap();
            assert_eq!(decoded, message, "round trip mismatch for {:?}", message.kind());
        }
    }

    #[test]
    fn encode_stamps_context() {
        let mut message = Message::new(MessageBody::FailedLogin(FailedLogin {
            reason: "expired session".into(),
        }));
        assert_eq!(message.context, MessageContext::Client);
        message.encode(MessageContext::Server).unwrap();
        assert_eq!(message.context, MessageContext::Server);
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let mut message = Message::new(MessageBody::PublicKey(PublicKey {
            username: "alice".into(),
            uuid: Uuid::new_v4(),
            public_key: "pub-key".into(),
        }));
        let bytes = message.encode(MessageContext::Client).unwrap();
        let err = Message::decode(&bytes[..bytes.len() - 3], MessageContext::Client).unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedEof { .. }));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = Message::decode(&[0xEE, 0, 0], MessageContext::Client).unwrap_err();
        assert!(matches!(err, CodecError::UnknownTag(0xEE)));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut message = Message::new(MessageBody::PingAuth(PingAuth {
            response: 0,
            id: Uuid::new_v4(),
        }));
        let mut bytes = message.encode(MessageContext::Client).unwrap();
        bytes.push(0xAB);
        let err = Message::decode(&bytes, MessageContext::Client).unwrap_err();
        assert!(matches!(err, CodecError::TrailingBytes(1)));
    }
}
