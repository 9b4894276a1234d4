//! Hazel datagrams: one opcode byte, an optional big-endian nonce, then an
//! opcode-specific body.

use serde::{Deserialize, Serialize};

use crate::codec::{HazelReader, HazelWriter};
use crate::enums::DisconnectReason;
use crate::error::{CodecError, CodecResult};
use crate::payload::RootMessage;
use crate::version::{VersionInfo, DEFAULT_VERSION};

pub mod opcode {
    pub const UNRELIABLE: u8 = 0;
    pub const RELIABLE: u8 = 1;
    pub const HELLO: u8 = 8;
    pub const DISCONNECT: u8 = 9;
    pub const ACKNOWLEDGE: u8 = 10;
    pub const PING: u8 = 12;
}

/// Hazel protocol revision sent in Hello.
pub const HAZEL_VERSION: u8 = 1;

/// Which way a datagram travels. Payload shapes depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Client to server.
    Serverbound,
    /// Server to client.
    Clientbound,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Self::Serverbound => Self::Clientbound,
            Self::Clientbound => Self::Serverbound,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeOptions {
    /// Keep unknown payload, message and RPC tags as opaque bytes instead of
    /// dropping them. Needed to relay traffic from modded peers unchanged.
    pub retain_unknown: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            retain_unknown: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloBody {
    pub hazel_version: u8,
    pub client_version: VersionInfo,
    pub username: String,
    /// Opaque auth token, passed through untouched.
    pub auth: u32,
    pub language: u32,
    pub chat_mode: u8,
    pub trailing: Vec<u8>,
}

impl HelloBody {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            hazel_version: HAZEL_VERSION,
            client_version: DEFAULT_VERSION,
            username: username.into(),
            auth: 0,
            language: 0,
            chat_mode: 1,
            trailing: Vec::new(),
        }
    }

    fn decode(r: &mut HazelReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            hazel_version: r.u8()?,
            client_version: VersionInfo::decode(r.i32()?),
            username: r.string()?,
            auth: r.u32()?,
            language: r.u32()?,
            chat_mode: r.u8()?,
            trailing: r.rest().to_vec(),
        })
    }

    fn encode(&self, w: &mut HazelWriter) {
        w.u8(self.hazel_version);
        w.i32(self.client_version.encode());
        w.string(&self.username);
        w.u32(self.auth);
        w.u32(self.language);
        w.u8(self.chat_mode);
        w.bytes(&self.trailing);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectBody {
    pub forced: bool,
    pub reason: Option<DisconnectReason>,
    pub message: Option<String>,
}

impl DisconnectBody {
    pub fn with_reason(reason: DisconnectReason) -> Self {
        Self {
            forced: true,
            reason: Some(reason),
            message: None,
        }
    }

    fn decode(r: &mut HazelReader<'_>) -> CodecResult<Self> {
        let forced = r.bool()?;
        let mut body = Self {
            forced,
            reason: None,
            message: None,
        };
        if !r.is_empty() {
            let (_, mut inner) = r.message()?;
            let reason = DisconnectReason::from(inner.u8()?);
            body.reason = Some(reason);
            if !inner.is_empty() {
                body.message = Some(inner.string()?);
            }
        }
        Ok(body)
    }

    fn encode(&self, w: &mut HazelWriter) -> CodecResult<()> {
        w.bool(self.forced);
        if let Some(reason) = self.reason {
            w.message(0, |w| {
                w.u8(reason.into());
                if let Some(message) = &self.message {
                    w.string(message);
                }
                Ok(())
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    Unreliable {
        payloads: Vec<RootMessage>,
    },
    Reliable {
        nonce: u16,
        payloads: Vec<RootMessage>,
    },
    Hello {
        nonce: u16,
        body: HelloBody,
    },
    Disconnect(Option<DisconnectBody>),
    Acknowledge {
        nonce: u16,
        /// Received-history bitfield for the eight nonces before `nonce`.
        bitfield: u8,
    },
    Ping {
        nonce: u16,
    },
}

impl Packet {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Unreliable { .. } => opcode::UNRELIABLE,
            Self::Reliable { .. } => opcode::RELIABLE,
            Self::Hello { .. } => opcode::HELLO,
            Self::Disconnect(_) => opcode::DISCONNECT,
            Self::Acknowledge { .. } => opcode::ACKNOWLEDGE,
            Self::Ping { .. } => opcode::PING,
        }
    }

    /// Nonce of packets the receiver must acknowledge.
    pub fn reliable_nonce(&self) -> Option<u16> {
        match self {
            Self::Reliable { nonce, .. } | Self::Hello { nonce, .. } | Self::Ping { nonce } => {
                Some(*nonce)
            }
            _ => None,
        }
    }

    /// Parses a datagram travelling in `direction`.
    pub fn parse(bytes: &[u8], direction: Direction, options: &DecodeOptions) -> CodecResult<Self> {
        let mut r = HazelReader::new(bytes);
        let op = r.u8()?;
        match op {
            opcode::UNRELIABLE => Ok(Self::Unreliable {
                payloads: parse_payloads(&mut r, direction, options)?,
            }),
            opcode::RELIABLE => {
                let nonce = r.u16_be()?;
                Ok(Self::Reliable {
                    nonce,
                    payloads: parse_payloads(&mut r, direction, options)?,
                })
            }
            opcode::HELLO => {
                let nonce = r.u16_be()?;
                Ok(Self::Hello {
                    nonce,
                    body: HelloBody::decode(&mut r)?,
                })
            }
            opcode::DISCONNECT => Ok(Self::Disconnect(if r.is_empty() {
                None
            } else {
                Some(DisconnectBody::decode(&mut r)?)
            })),
            opcode::ACKNOWLEDGE => Ok(Self::Acknowledge {
                nonce: r.u16_be()?,
                bitfield: r.u8()?,
            }),
            opcode::PING => Ok(Self::Ping {
                nonce: r.u16_be()?,
            }),
            other => Err(CodecError::UnknownOpcode(other)),
        }
    }

    pub fn compose(&self) -> CodecResult<Vec<u8>> {
        let mut w = HazelWriter::new();
        w.u8(self.opcode());
        match self {
            Self::Unreliable { payloads } => {
                payloads.iter().try_for_each(|p| p.encode(&mut w))?;
            }
            Self::Reliable { nonce, payloads } => {
                w.u16_be(*nonce);
                payloads.iter().try_for_each(|p| p.encode(&mut w))?;
            }
            Self::Hello { nonce, body } => {
                w.u16_be(*nonce);
                body.encode(&mut w);
            }
            Self::Disconnect(body) => {
                if let Some(body) = body {
                    body.encode(&mut w)?;
                }
            }
            Self::Acknowledge { nonce, bitfield } => {
                w.u16_be(*nonce);
                w.u8(*bitfield);
            }
            Self::Ping { nonce } => w.u16_be(*nonce),
        }
        w.finish()
    }
}

fn parse_payloads(
    r: &mut HazelReader<'_>,
    direction: Direction,
    options: &DecodeOptions,
) -> CodecResult<Vec<RootMessage>> {
    let mut payloads = Vec::new();
    for item in r.messages() {
        let (tag, mut body) = item?;
        if let Some(payload) = RootMessage::decode(tag, &mut body, direction, options)? {
            payloads.push(payload);
        }
    }
    Ok(payloads)
}
