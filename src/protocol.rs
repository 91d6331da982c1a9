// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Wire format: message header, submessage header and payloads (spec §3, §6).
//
// Deserialization is length-bounded: every read checks remaining bytes and
// fails with `InvalidData` rather than panicking. Submessage boundaries
// align to 4-byte multiples within the datagram; padding between
// submessages is written as zeros and ignored on read.

use crate::error::{AgentError, StatusCode};

pub const MESSAGE_HEADER_MIN_SIZE: usize = 4;
pub const CLIENT_KEY_SIZE: usize = 4;
pub const SUBMESSAGE_HEADER_SIZE: usize = 4;

/// Session ids in `0x00..=0x7F` carry an explicit client key in the message
/// header (used for the CREATE_CLIENT handshake and any traffic before a
/// session id has been negotiated); `0x80..=0xFF` omit it and rely on the
/// transport/endpoint -> client-key mapping (spec §6).
pub const SESSION_ID_NONE: u8 = 0x00;

pub(crate) fn session_id_carries_client_key(session_id: u8) -> bool {
    session_id <= 0x7F
}

// ---------------------------------------------------------------------------
// Stream id (spec §3)
// ---------------------------------------------------------------------------

pub const STREAM_ID_NONE: u8 = 0x00;
pub const STREAM_ID_BUILTIN_BEST_EFFORT: u8 = 0x01;
pub const STREAM_ID_BUILTIN_RELIABLE: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamClass {
    /// stream_id == 0x00: fire-and-forget, zero reliability state.
    None,
    /// stream_id in 0x01..=0x7F: best-effort, ordered-by-discard.
    BestEffort,
    /// stream_id in 0x80..=0xFF: reliable.
    Reliable,
}

impl StreamClass {
    pub fn of(stream_id: u8) -> Self {
        if stream_id == STREAM_ID_NONE {
            StreamClass::None
        } else if stream_id < STREAM_ID_BUILTIN_RELIABLE {
            StreamClass::BestEffort
        } else {
            StreamClass::Reliable
        }
    }
}

// ---------------------------------------------------------------------------
// Object id / kind (spec §3: low 4 bits are kind, high 12 bits are serial)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectKind {
    Participant = 0x1,
    Topic = 0x2,
    Publisher = 0x3,
    Subscriber = 0x4,
    DataWriter = 0x5,
    DataReader = 0x6,
    Requester = 0x7,
    Replier = 0x8,
    Application = 0x9,
    QosProfile = 0xA,
    Type = 0xB,
}

impl ObjectKind {
    pub fn from_nibble(v: u8) -> Result<Self, AgentError> {
        match v {
            0x1 => Ok(Self::Participant),
            0x2 => Ok(Self::Topic),
            0x3 => Ok(Self::Publisher),
            0x4 => Ok(Self::Subscriber),
            0x5 => Ok(Self::DataWriter),
            0x6 => Ok(Self::DataReader),
            0x7 => Ok(Self::Requester),
            0x8 => Ok(Self::Replier),
            0x9 => Ok(Self::Application),
            0xA => Ok(Self::QosProfile),
            0xB => Ok(Self::Type),
            _ => Err(AgentError::Unsupported("object kind")),
        }
    }

    pub fn as_nibble(self) -> u8 {
        self as u8
    }
}

/// A 16-bit object identifier: low 4 bits are the [`ObjectKind`] discriminant,
/// the upper 12 bits are the object's serial number within that kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u16);

impl ObjectId {
    pub fn new(kind: ObjectKind, serial: u16) -> Self {
        ObjectId(((serial & 0x0FFF) << 4) | kind.as_nibble() as u16)
    }

    pub fn kind(self) -> Result<ObjectKind, AgentError> {
        ObjectKind::from_nibble((self.0 & 0xF) as u8)
    }

    pub fn serial(self) -> u16 {
        self.0 >> 4
    }

    pub fn raw(self) -> u16 {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Message header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub session_id: u8,
    pub stream_id: u8,
    pub sequence_nr: u16,
    /// Present only when `session_id` is in `0x00..=0x7F`.
    pub client_key: Option<[u8; 4]>,
}

impl MessageHeader {
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), AgentError> {
        if buf.len() < MESSAGE_HEADER_MIN_SIZE {
            return Err(AgentError::InvalidData("message header truncated"));
        }
        let session_id = buf[0];
        let stream_id = buf[1];
        let sequence_nr = u16::from_le_bytes([buf[2], buf[3]]);
        let mut consumed = MESSAGE_HEADER_MIN_SIZE;
        let client_key = if session_id_carries_client_key(session_id) {
            if buf.len() < consumed + CLIENT_KEY_SIZE {
                return Err(AgentError::InvalidData("message header missing client key"));
            }
            let mut key = [0u8; 4];
            key.copy_from_slice(&buf[consumed..consumed + CLIENT_KEY_SIZE]);
            consumed += CLIENT_KEY_SIZE;
            Some(key)
        } else {
            None
        };
        Ok((
            MessageHeader {
                session_id,
                stream_id,
                sequence_nr,
                client_key,
            },
            consumed,
        ))
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.session_id);
        buf.push(self.stream_id);
        buf.extend_from_slice(&self.sequence_nr.to_le_bytes());
        if session_id_carries_client_key(self.session_id) {
            let key = self.client_key.unwrap_or([0; 4]);
            buf.extend_from_slice(&key);
        }
    }

    pub fn len(&self) -> usize {
        if session_id_carries_client_key(self.session_id) {
            MESSAGE_HEADER_MIN_SIZE + CLIENT_KEY_SIZE
        } else {
            MESSAGE_HEADER_MIN_SIZE
        }
    }
}

// ---------------------------------------------------------------------------
// Submessage header
// ---------------------------------------------------------------------------

pub const FLAG_LITTLE_ENDIAN: u8 = 0b0000_0001;
pub const FLAG_LAST_FRAGMENT: u8 = 0b0000_0010;
pub const FLAG_REUSE: u8 = 0b0000_0100;
pub const FLAG_REPLACE: u8 = 0b0000_1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmessageHeader {
    pub submessage_id: u8,
    pub flags: u8,
    pub length: u16,
}

impl SubmessageHeader {
    pub fn parse(buf: &[u8]) -> Result<Self, AgentError> {
        if buf.len() < SUBMESSAGE_HEADER_SIZE {
            return Err(AgentError::InvalidData("submessage header truncated"));
        }
        Ok(SubmessageHeader {
            submessage_id: buf[0],
            flags: buf[1],
            length: u16::from_le_bytes([buf[2], buf[3]]),
        })
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.submessage_id);
        buf.push(self.flags);
        buf.extend_from_slice(&self.length.to_le_bytes());
    }
}

// Submessage ids (spec §3).
pub const SUBMSG_CREATE_CLIENT: u8 = 0x00;
pub const SUBMSG_CREATE: u8 = 0x01;
pub const SUBMSG_DELETE: u8 = 0x02;
pub const SUBMSG_GET_INFO: u8 = 0x03;
pub const SUBMSG_STATUS_AGENT: u8 = 0x04;
pub const SUBMSG_STATUS: u8 = 0x05;
pub const SUBMSG_INFO: u8 = 0x06;
pub const SUBMSG_WRITE_DATA: u8 = 0x07;
pub const SUBMSG_READ_DATA: u8 = 0x08;
pub const SUBMSG_DATA: u8 = 0x09;
pub const SUBMSG_RESET: u8 = 0x0A;
pub const SUBMSG_FRAGMENT: u8 = 0x0B;
pub const SUBMSG_TIMESTAMP: u8 = 0x0C;
pub const SUBMSG_HEARTBEAT: u8 = 0x0D;
pub const SUBMSG_ACKNACK: u8 = 0x0E;
pub const SUBMSG_TIMESTAMP_REPLY: u8 = 0x0F;
pub const SUBMSG_PERFORMANCE: u8 = 0x10;
pub const SUBMSG_ACK: u8 = 0x11;

// ---------------------------------------------------------------------------
// Length-prefixed field helpers (32-bit count, spec §4.3)
// ---------------------------------------------------------------------------

pub fn read_u32_le(buf: &[u8], off: usize) -> Result<u32, AgentError> {
    if off + 4 > buf.len() {
        return Err(AgentError::InvalidData("u32 field truncated"));
    }
    Ok(u32::from_le_bytes([
        buf[off],
        buf[off + 1],
        buf[off + 2],
        buf[off + 3],
    ]))
}

pub fn read_u16_le(buf: &[u8], off: usize) -> Result<u16, AgentError> {
    if off + 2 > buf.len() {
        return Err(AgentError::InvalidData("u16 field truncated"));
    }
    Ok(u16::from_le_bytes([buf[off], buf[off + 1]]))
}

/// Encode a variable-length byte field as `[len_u32_le][bytes]`.
pub fn write_bytes_field(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
}

/// Decode a `[len_u32_le][bytes]` field. Returns (bytes, bytes_consumed).
pub fn read_bytes_field(buf: &[u8]) -> Result<(Vec<u8>, usize), AgentError> {
    let len = read_u32_le(buf, 0)? as usize;
    if buf.len() < 4 + len {
        return Err(AgentError::InvalidData("length-prefixed field truncated"));
    }
    Ok((buf[4..4 + len].to_vec(), 4 + len))
}

pub fn write_string_field(out: &mut Vec<u8>, s: &str) {
    write_bytes_field(out, s.as_bytes());
}

pub fn read_string_field(buf: &[u8]) -> Result<(String, usize), AgentError> {
    let (bytes, consumed) = read_bytes_field(buf)?;
    Ok((String::from_utf8_lossy(&bytes).into_owned(), consumed))
}

// ---------------------------------------------------------------------------
// Submessage payloads
// ---------------------------------------------------------------------------

/// CREATE_CLIENT (0x00).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateClientPayload {
    pub cookie: [u8; 4],
    pub version_major: u8,
    pub version_minor: u8,
    pub vendor_id: u16,
    pub client_timestamp: i64,
    pub client_key: [u8; 4],
    pub session_id: u8,
    pub mtu: u16,
}

pub const XRCE_COOKIE: [u8; 4] = *b"XRCE";
pub const AGENT_VERSION_MAJOR: u8 = 1;
pub const AGENT_VERSION_MINOR: u8 = 0;

impl CreateClientPayload {
    const FIXED_SIZE: usize = 4 + 1 + 1 + 2 + 8 + 4 + 1 + 2;

    pub fn parse(buf: &[u8]) -> Result<Self, AgentError> {
        if buf.len() < Self::FIXED_SIZE {
            return Err(AgentError::InvalidData("CREATE_CLIENT payload truncated"));
        }
        let mut cookie = [0u8; 4];
        cookie.copy_from_slice(&buf[0..4]);
        let version_major = buf[4];
        let version_minor = buf[5];
        let vendor_id = u16::from_le_bytes([buf[6], buf[7]]);
        let client_timestamp = i64::from_le_bytes(buf[8..16].try_into().unwrap());
        let mut client_key = [0u8; 4];
        client_key.copy_from_slice(&buf[16..20]);
        let session_id = buf[20];
        let mtu = u16::from_le_bytes([buf[21], buf[22]]);
        Ok(CreateClientPayload {
            cookie,
            version_major,
            version_minor,
            vendor_id,
            client_timestamp,
            client_key,
            session_id,
            mtu,
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.cookie);
        out.push(self.version_major);
        out.push(self.version_minor);
        out.extend_from_slice(&self.vendor_id.to_le_bytes());
        out.extend_from_slice(&self.client_timestamp.to_le_bytes());
        out.extend_from_slice(&self.client_key);
        out.push(self.session_id);
        out.extend_from_slice(&self.mtu.to_le_bytes());
    }
}

/// The kind-specific fields of a CREATE (0x01) submessage (spec §4.8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectRepresentation {
    Participant {
        domain_id: u16,
    },
    Topic {
        participant_id: ObjectId,
        name: String,
        type_name: String,
    },
    Publisher {
        participant_id: ObjectId,
    },
    Subscriber {
        participant_id: ObjectId,
    },
    DataWriter {
        publisher_id: ObjectId,
        topic_id: ObjectId,
    },
    DataReader {
        subscriber_id: ObjectId,
        topic_id: ObjectId,
    },
    Requester {
        participant_id: ObjectId,
        service_name: String,
        request_type: String,
        reply_type: String,
    },
    Replier {
        participant_id: ObjectId,
        service_name: String,
        request_type: String,
        reply_type: String,
    },
    Application {
        name: String,
    },
    QosProfile {
        data: Vec<u8>,
    },
    Type {
        name: String,
        data: Vec<u8>,
    },
}

impl ObjectRepresentation {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Participant { .. } => ObjectKind::Participant,
            Self::Topic { .. } => ObjectKind::Topic,
            Self::Publisher { .. } => ObjectKind::Publisher,
            Self::Subscriber { .. } => ObjectKind::Subscriber,
            Self::DataWriter { .. } => ObjectKind::DataWriter,
            Self::DataReader { .. } => ObjectKind::DataReader,
            Self::Requester { .. } => ObjectKind::Requester,
            Self::Replier { .. } => ObjectKind::Replier,
            Self::Application { .. } => ObjectKind::Application,
            Self::QosProfile { .. } => ObjectKind::QosProfile,
            Self::Type { .. } => ObjectKind::Type,
        }
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Self::Participant { domain_id } => {
                out.extend_from_slice(&domain_id.to_le_bytes());
            }
            Self::Topic {
                participant_id,
                name,
                type_name,
            } => {
                out.extend_from_slice(&participant_id.raw().to_le_bytes());
                write_string_field(out, name);
                write_string_field(out, type_name);
            }
            Self::Publisher { participant_id } | Self::Subscriber { participant_id } => {
                out.extend_from_slice(&participant_id.raw().to_le_bytes());
            }
            Self::DataWriter {
                publisher_id,
                topic_id,
            } => {
                out.extend_from_slice(&publisher_id.raw().to_le_bytes());
                out.extend_from_slice(&topic_id.raw().to_le_bytes());
            }
            Self::DataReader {
                subscriber_id,
                topic_id,
            } => {
                out.extend_from_slice(&subscriber_id.raw().to_le_bytes());
                out.extend_from_slice(&topic_id.raw().to_le_bytes());
            }
            Self::Requester {
                participant_id,
                service_name,
                request_type,
                reply_type,
            }
            | Self::Replier {
                participant_id,
                service_name,
                request_type,
                reply_type,
            } => {
                out.extend_from_slice(&participant_id.raw().to_le_bytes());
                write_string_field(out, service_name);
                write_string_field(out, request_type);
                write_string_field(out, reply_type);
            }
            Self::Application { name } => {
                write_string_field(out, name);
            }
            Self::QosProfile { data } => {
                write_bytes_field(out, data);
            }
            Self::Type { name, data } => {
                write_string_field(out, name);
                write_bytes_field(out, data);
            }
        }
    }

    fn parse(kind: ObjectKind, buf: &[u8]) -> Result<Self, AgentError> {
        Ok(match kind {
            ObjectKind::Participant => {
                let domain_id = read_u16_le(buf, 0)?;
                Self::Participant { domain_id }
            }
            ObjectKind::Topic => {
                let participant_id = ObjectId(read_u16_le(buf, 0)?);
                let (name, n) = read_string_field(&buf[2..])?;
                let (type_name, _) = read_string_field(&buf[2 + n..])?;
                Self::Topic {
                    participant_id,
                    name,
                    type_name,
                }
            }
            ObjectKind::Publisher => Self::Publisher {
                participant_id: ObjectId(read_u16_le(buf, 0)?),
            },
            ObjectKind::Subscriber => Self::Subscriber {
                participant_id: ObjectId(read_u16_le(buf, 0)?),
            },
            ObjectKind::DataWriter => Self::DataWriter {
                publisher_id: ObjectId(read_u16_le(buf, 0)?),
                topic_id: ObjectId(read_u16_le(buf, 2)?),
            },
            ObjectKind::DataReader => Self::DataReader {
                subscriber_id: ObjectId(read_u16_le(buf, 0)?),
                topic_id: ObjectId(read_u16_le(buf, 2)?),
            },
            ObjectKind::Requester | ObjectKind::Replier => {
                let participant_id = ObjectId(read_u16_le(buf, 0)?);
                let (service_name, n1) = read_string_field(&buf[2..])?;
                let (request_type, n2) = read_string_field(&buf[2 + n1..])?;
                let (reply_type, _) = read_string_field(&buf[2 + n1 + n2..])?;
                if kind == ObjectKind::Requester {
                    Self::Requester {
                        participant_id,
                        service_name,
                        request_type,
                        reply_type,
                    }
                } else {
                    Self::Replier {
                        participant_id,
                        service_name,
                        request_type,
                        reply_type,
                    }
                }
            }
            ObjectKind::Application => {
                let (name, _) = read_string_field(buf)?;
                Self::Application { name }
            }
            ObjectKind::QosProfile => {
                let (data, _) = read_bytes_field(buf)?;
                Self::QosProfile { data }
            }
            ObjectKind::Type => {
                let (name, n) = read_string_field(buf)?;
                let (data, _) = read_bytes_field(&buf[n..])?;
                Self::Type { name, data }
            }
        })
    }
}

/// Whether CREATE should reuse/replace an existing object at the same id
/// (spec §4.8). Carried in the CREATE submessage's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CreationMode {
    pub reuse: bool,
    pub replace: bool,
}

impl CreationMode {
    fn from_flags(flags: u8) -> Self {
        CreationMode {
            reuse: flags & FLAG_REUSE != 0,
            replace: flags & FLAG_REPLACE != 0,
        }
    }

    fn to_flags(self) -> u8 {
        (if self.reuse { FLAG_REUSE } else { 0 }) | (if self.replace { FLAG_REPLACE } else { 0 })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePayload {
    pub object_id: ObjectId,
    pub creation_mode: CreationMode,
    pub representation: ObjectRepresentation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletePayload {
    pub object_id: ObjectId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetInfoPayload {
    pub object_id: ObjectId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoPayload {
    pub object_id: ObjectId,
    pub agent_version: (u8, u8),
    pub agent_vendor_id: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusAgentPayload {
    pub agent_version: (u8, u8),
    pub agent_vendor_id: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteDataPayload {
    pub writer_id: ObjectId,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadDataPayload {
    pub reader_id: ObjectId,
    pub max_samples: u16,
    /// Stream the agent should deliver DATA submessages back on.
    pub read_stream_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPayload {
    pub reader_id: ObjectId,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPayload {
    pub related_object_id: ObjectId,
    pub request_id: u16,
    pub operation: crate::error::OperationKind,
    pub status: StatusCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPayload {
    pub first_unacked_seq: u16,
    pub last_unacked_seq: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcknackPayload {
    pub first_unacked_seq: u16,
    pub nack_bitmap: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetPayload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentPayload {
    /// Raw bytes of this fragment; the LAST_FRAGMENT flag lives in the
    /// enclosing submessage header (spec §3).
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampPayload {
    pub transmit_timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampReplyPayload {
    pub original_transmit_timestamp: i64,
    pub receive_timestamp: i64,
    pub transmit_timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformancePayload {
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPayload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submessage {
    CreateClient(CreateClientPayload),
    Create(CreatePayload),
    Delete(DeletePayload),
    GetInfo(GetInfoPayload),
    StatusAgent(StatusAgentPayload),
    Status(StatusPayload),
    Info(InfoPayload),
    WriteData(WriteDataPayload),
    ReadData(ReadDataPayload),
    Data(DataPayload),
    Reset(ResetPayload),
    Fragment(FragmentPayload),
    Timestamp(TimestampPayload),
    Heartbeat(HeartbeatPayload),
    Acknack(AcknackPayload),
    TimestampReply(TimestampReplyPayload),
    Performance(PerformancePayload),
    Ack(AckPayload),
}

impl Submessage {
    /// True if this submessage's trailing flag bit marks the final
    /// fragment of a reassembly sequence (only meaningful for FRAGMENT).
    pub fn is_last_fragment(flags: u8) -> bool {
        flags & FLAG_LAST_FRAGMENT != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XrceMessage {
    pub header: MessageHeader,
    pub submessages: Vec<(Submessage, u8)>, // (submessage, flags)
}

// ---------------------------------------------------------------------------
// Submessage parsing / serialization
// ---------------------------------------------------------------------------

pub fn parse_submessage(buf: &[u8]) -> Result<(Submessage, u8, usize), AgentError> {
    let hdr = SubmessageHeader::parse(buf)?;
    let start = SUBMESSAGE_HEADER_SIZE;
    let end = start + hdr.length as usize;
    if buf.len() < end {
        return Err(AgentError::InvalidData("submessage payload truncated"));
    }
    let payload = &buf[start..end];

    let submsg = match hdr.submessage_id {
        SUBMSG_CREATE_CLIENT => Submessage::CreateClient(CreateClientPayload::parse(payload)?),
        SUBMSG_CREATE => {
            if payload.len() < 3 {
                return Err(AgentError::InvalidData("CREATE payload truncated"));
            }
            let object_id = ObjectId(read_u16_le(payload, 0)?);
            let kind = object_id.kind()?;
            let representation = ObjectRepresentation::parse(kind, &payload[2..])?;
            if representation.kind() != kind {
                return Err(AgentError::InvalidData(
                    "object_id kind nibble does not match representation",
                ));
            }
            Submessage::Create(CreatePayload {
                object_id,
                creation_mode: CreationMode::from_flags(hdr.flags),
                representation,
            })
        }
        SUBMSG_DELETE => Submessage::Delete(DeletePayload {
            object_id: ObjectId(read_u16_le(payload, 0)?),
        }),
        SUBMSG_GET_INFO => Submessage::GetInfo(GetInfoPayload {
            object_id: ObjectId(read_u16_le(payload, 0)?),
        }),
        SUBMSG_STATUS_AGENT => {
            if payload.len() < 4 {
                return Err(AgentError::InvalidData("STATUS_AGENT payload truncated"));
            }
            Submessage::StatusAgent(StatusAgentPayload {
                agent_version: (payload[0], payload[1]),
                agent_vendor_id: u16::from_le_bytes([payload[2], payload[3]]),
            })
        }
        SUBMSG_STATUS => {
            if payload.len() < 7 {
                return Err(AgentError::InvalidData("STATUS payload truncated"));
            }
            Submessage::Status(StatusPayload {
                related_object_id: ObjectId(read_u16_le(payload, 0)?),
                request_id: read_u16_le(payload, 2)?,
                operation: operation_from_u8(payload[4])?,
                status: StatusCode::from_u8(payload[5])?,
            })
        }
        SUBMSG_INFO => {
            if payload.len() < 6 {
                return Err(AgentError::InvalidData("INFO payload truncated"));
            }
            Submessage::Info(InfoPayload {
                object_id: ObjectId(read_u16_le(payload, 0)?),
                agent_version: (payload[2], payload[3]),
                agent_vendor_id: u16::from_le_bytes([payload[4], payload[5]]),
            })
        }
        SUBMSG_WRITE_DATA => {
            if payload.len() < 2 {
                return Err(AgentError::InvalidData("WRITE_DATA payload truncated"));
            }
            let writer_id = ObjectId(read_u16_le(payload, 0)?);
            let (data, _) = read_bytes_field(&payload[2..])?;
            Submessage::WriteData(WriteDataPayload { writer_id, data })
        }
        SUBMSG_READ_DATA => {
            if payload.len() < 5 {
                return Err(AgentError::InvalidData("READ_DATA payload truncated"));
            }
            Submessage::ReadData(ReadDataPayload {
                reader_id: ObjectId(read_u16_le(payload, 0)?),
                max_samples: read_u16_le(payload, 2)?,
                read_stream_id: payload[4],
            })
        }
        SUBMSG_DATA => {
            if payload.len() < 2 {
                return Err(AgentError::InvalidData("DATA payload truncated"));
            }
            let reader_id = ObjectId(read_u16_le(payload, 0)?);
            let (data, _) = read_bytes_field(&payload[2..])?;
            Submessage::Data(DataPayload { reader_id, data })
        }
        SUBMSG_RESET => Submessage::Reset(ResetPayload),
        SUBMSG_FRAGMENT => Submessage::Fragment(FragmentPayload {
            data: payload.to_vec(),
        }),
        SUBMSG_TIMESTAMP => {
            if payload.len() < 8 {
                return Err(AgentError::InvalidData("TIMESTAMP payload truncated"));
            }
            Submessage::Timestamp(TimestampPayload {
                transmit_timestamp: i64::from_le_bytes(payload[0..8].try_into().unwrap()),
            })
        }
        SUBMSG_HEARTBEAT => {
            if payload.len() < 4 {
                return Err(AgentError::InvalidData("HEARTBEAT payload truncated"));
            }
            Submessage::Heartbeat(HeartbeatPayload {
                first_unacked_seq: read_u16_le(payload, 0)?,
                last_unacked_seq: read_u16_le(payload, 2)?,
            })
        }
        SUBMSG_ACKNACK => {
            if payload.len() < 4 {
                return Err(AgentError::InvalidData("ACKNACK payload truncated"));
            }
            Submessage::Acknack(AcknackPayload {
                first_unacked_seq: read_u16_le(payload, 0)?,
                nack_bitmap: read_u16_le(payload, 2)?,
            })
        }
        SUBMSG_TIMESTAMP_REPLY => {
            if payload.len() < 24 {
                return Err(AgentError::InvalidData("TIMESTAMP_REPLY payload truncated"));
            }
            Submessage::TimestampReply(TimestampReplyPayload {
                original_transmit_timestamp: i64::from_le_bytes(payload[0..8].try_into().unwrap()),
                receive_timestamp: i64::from_le_bytes(payload[8..16].try_into().unwrap()),
                transmit_timestamp: i64::from_le_bytes(payload[16..24].try_into().unwrap()),
            })
        }
        SUBMSG_PERFORMANCE => Submessage::Performance(PerformancePayload {
            data: payload.to_vec(),
        }),
        SUBMSG_ACK => Submessage::Ack(AckPayload),
        _ => return Err(AgentError::Unsupported("submessage id")),
    };
    Ok((submsg, hdr.flags, end))
}

fn operation_from_u8(v: u8) -> Result<crate::error::OperationKind, AgentError> {
    use crate::error::OperationKind::*;
    match v {
        0x00 => Ok(Create),
        0x01 => Ok(Update),
        0x02 => Ok(Delete),
        0x03 => Ok(Lookup),
        0x04 => Ok(Read),
        0x05 => Ok(Write),
        _ => Err(AgentError::Unsupported("operation kind")),
    }
}

pub fn serialize_submessage(submsg: &Submessage, extra_flags: u8) -> Vec<u8> {
    let mut flags = FLAG_LITTLE_ENDIAN | extra_flags;
    let (id, payload) = match submsg {
        Submessage::CreateClient(p) => {
            let mut pl = Vec::new();
            p.write_to(&mut pl);
            (SUBMSG_CREATE_CLIENT, pl)
        }
        Submessage::Create(p) => {
            flags |= p.creation_mode.to_flags();
            let mut pl = Vec::new();
            pl.extend_from_slice(&p.object_id.raw().to_le_bytes());
            p.representation.write_to(&mut pl);
            (SUBMSG_CREATE, pl)
        }
        Submessage::Delete(p) => (SUBMSG_DELETE, p.object_id.raw().to_le_bytes().to_vec()),
        Submessage::GetInfo(p) => (SUBMSG_GET_INFO, p.object_id.raw().to_le_bytes().to_vec()),
        Submessage::StatusAgent(p) => {
            let mut pl = Vec::with_capacity(4);
            pl.push(p.agent_version.0);
            pl.push(p.agent_version.1);
            pl.extend_from_slice(&p.agent_vendor_id.to_le_bytes());
            (SUBMSG_STATUS_AGENT, pl)
        }
        Submessage::Status(p) => {
            let mut pl = Vec::with_capacity(7);
            pl.extend_from_slice(&p.related_object_id.raw().to_le_bytes());
            pl.extend_from_slice(&p.request_id.to_le_bytes());
            pl.push(p.operation as u8);
            pl.push(p.status.as_u8());
            (SUBMSG_STATUS, pl)
        }
        Submessage::Info(p) => {
            let mut pl = Vec::with_capacity(6);
            pl.extend_from_slice(&p.object_id.raw().to_le_bytes());
            pl.push(p.agent_version.0);
            pl.push(p.agent_version.1);
            pl.extend_from_slice(&p.agent_vendor_id.to_le_bytes());
            (SUBMSG_INFO, pl)
        }
        Submessage::WriteData(p) => {
            let mut pl = Vec::with_capacity(2 + 4 + p.data.len());
            pl.extend_from_slice(&p.writer_id.raw().to_le_bytes());
            write_bytes_field(&mut pl, &p.data);
            (SUBMSG_WRITE_DATA, pl)
        }
        Submessage::ReadData(p) => {
            let mut pl = Vec::with_capacity(5);
            pl.extend_from_slice(&p.reader_id.raw().to_le_bytes());
            pl.extend_from_slice(&p.max_samples.to_le_bytes());
            pl.push(p.read_stream_id);
            (SUBMSG_READ_DATA, pl)
        }
        Submessage::Data(p) => {
            let mut pl = Vec::with_capacity(2 + 4 + p.data.len());
            pl.extend_from_slice(&p.reader_id.raw().to_le_bytes());
            write_bytes_field(&mut pl, &p.data);
            (SUBMSG_DATA, pl)
        }
        Submessage::Reset(_) => (SUBMSG_RESET, Vec::new()),
        Submessage::Fragment(p) => (SUBMSG_FRAGMENT, p.data.clone()),
        Submessage::Timestamp(p) => (SUBMSG_TIMESTAMP, p.transmit_timestamp.to_le_bytes().to_vec()),
        Submessage::Heartbeat(p) => {
            let mut pl = Vec::with_capacity(4);
            pl.extend_from_slice(&p.first_unacked_seq.to_le_bytes());
            pl.extend_from_slice(&p.last_unacked_seq.to_le_bytes());
            (SUBMSG_HEARTBEAT, pl)
        }
        Submessage::Acknack(p) => {
            let mut pl = Vec::with_capacity(4);
            pl.extend_from_slice(&p.first_unacked_seq.to_le_bytes());
            pl.extend_from_slice(&p.nack_bitmap.to_le_bytes());
            (SUBMSG_ACKNACK, pl)
        }
        Submessage::TimestampReply(p) => {
            let mut pl = Vec::with_capacity(24);
            pl.extend_from_slice(&p.original_transmit_timestamp.to_le_bytes());
            pl.extend_from_slice(&p.receive_timestamp.to_le_bytes());
            pl.extend_from_slice(&p.transmit_timestamp.to_le_bytes());
            (SUBMSG_TIMESTAMP_REPLY, pl)
        }
        Submessage::Performance(p) => (SUBMSG_PERFORMANCE, p.data.clone()),
        Submessage::Ack(_) => (SUBMSG_ACK, Vec::new()),
    };

    let hdr = SubmessageHeader {
        submessage_id: id,
        flags,
        length: payload.len() as u16,
    };
    let mut out = Vec::with_capacity(SUBMESSAGE_HEADER_SIZE + payload.len());
    hdr.write_to(&mut out);
    out.extend_from_slice(&payload);
    out
}

fn pad_len(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

/// Parse a complete message: header followed by one or more submessages,
/// each individually padded to a 4-byte boundary.
pub fn parse_message(buf: &[u8]) -> Result<XrceMessage, AgentError> {
    let (header, mut offset) = MessageHeader::parse(buf)?;
    let mut submessages = Vec::new();
    while offset < buf.len() {
        let (submsg, flags, consumed) = parse_submessage(&buf[offset..])?;
        submessages.push((submsg, flags));
        offset += consumed;
        offset += pad_len(consumed).min(buf.len() - offset);
    }
    if submessages.is_empty() {
        return Err(AgentError::InvalidData("message has no submessages"));
    }
    Ok(XrceMessage { header, submessages })
}

/// Serialize a full message, padding each submessage to a 4-byte boundary.
pub fn serialize_message(msg: &XrceMessage) -> Vec<u8> {
    let mut buf = Vec::new();
    msg.header.write_to(&mut buf);
    for (submsg, flags) in &msg.submessages {
        let bytes = serialize_submessage(submsg, *flags & !FLAG_LITTLE_ENDIAN);
        buf.extend_from_slice(&bytes);
        buf.resize(buf.len() + pad_len(bytes.len()), 0);
    }
    buf
}

/// Build a one-submessage message (the common reply shape).
pub fn single_message(header: MessageHeader, submsg: Submessage, flags: u8) -> XrceMessage {
    XrceMessage {
        header,
        submessages: vec![(submsg, flags)],
    }
}

// ---------------------------------------------------------------------------
// Fragmentation
// ---------------------------------------------------------------------------

/// Slice `data` (an already-serialized submessage) into chunks of at most
/// `max_payload` bytes each, to be wrapped as FRAGMENT submessages by the
/// caller (the output stream, which also assigns sequence numbers and the
/// last-fragment flag — spec §4.5.3).
pub fn split_for_fragmentation(data: &[u8], max_payload: usize) -> Result<Vec<Vec<u8>>, AgentError> {
    if max_payload == 0 {
        return Err(AgentError::FragmentError("max_payload must be > 0".into()));
    }
    if data.is_empty() {
        return Err(AgentError::FragmentError("empty payload".into()));
    }
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + max_payload).min(data.len());
        out.push(data[offset..end].to_vec());
        offset = end;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_create_client() -> CreateClientPayload {
        CreateClientPayload {
            cookie: XRCE_COOKIE,
            version_major: 1,
            version_minor: 0,
            vendor_id: 1,
            client_timestamp: 0,
            client_key: [0xAA, 0xBB, 0xCC, 0xDD],
            session_id: 0x81,
            mtu: 512,
        }
    }

    #[test]
    fn create_client_roundtrip() {
        let header = MessageHeader {
            session_id: SESSION_ID_NONE,
            stream_id: STREAM_ID_NONE,
            sequence_nr: 0,
            client_key: Some([0xAA, 0xBB, 0xCC, 0xDD]),
        };
        let msg = single_message(header, Submessage::CreateClient(sample_create_client()), 0);
        let bytes = serialize_message(&msg);
        let parsed = parse_message(&bytes).unwrap();
        assert_eq!(parsed.header, header);
        assert_eq!(parsed.submessages.len(), 1);
        match &parsed.submessages[0].0 {
            Submessage::CreateClient(p) => assert_eq!(*p, sample_create_client()),
            _ => panic!("wrong submessage"),
        }
    }

    #[test]
    fn object_id_kind_and_serial() {
        let id = ObjectId::new(ObjectKind::DataWriter, 0x123);
        assert_eq!(id.kind().unwrap(), ObjectKind::DataWriter);
        assert_eq!(id.serial(), 0x123);
    }

    #[test]
    fn create_payload_kind_mismatch_is_rejected() {
        // object_id nibble says DataWriter (0x5) but representation is Topic.
        let object_id = ObjectId::new(ObjectKind::DataWriter, 1);
        let mut payload = Vec::new();
        payload.extend_from_slice(&object_id.raw().to_le_bytes());
        let rep = ObjectRepresentation::Topic {
            participant_id: ObjectId::new(ObjectKind::Participant, 1),
            name: "foo".into(),
            type_name: "Bar".into(),
        };
        rep.write_to(&mut payload);
        let hdr = SubmessageHeader {
            submessage_id: SUBMSG_CREATE,
            flags: 0,
            length: payload.len() as u16,
        };
        let mut buf = Vec::new();
        hdr.write_to(&mut buf);
        buf.extend_from_slice(&payload);
        let result = parse_submessage(&buf);
        assert!(matches!(result, Err(AgentError::InvalidData(_))));
    }

    #[test]
    fn multi_submessage_padding_roundtrip() {
        let header = MessageHeader {
            session_id: 0x81,
            stream_id: STREAM_ID_BUILTIN_RELIABLE,
            sequence_nr: 5,
            client_key: None,
        };
        let msg = XrceMessage {
            header,
            submessages: vec![
                (
                    Submessage::Delete(DeletePayload {
                        object_id: ObjectId::new(ObjectKind::Topic, 1),
                    }),
                    0,
                ),
                (
                    Submessage::Heartbeat(HeartbeatPayload {
                        first_unacked_seq: 1,
                        last_unacked_seq: 4,
                    }),
                    0,
                ),
            ],
        };
        let bytes = serialize_message(&msg);
        assert_eq!(bytes.len() % 4, 0);
        let parsed = parse_message(&bytes).unwrap();
        assert_eq!(parsed.submessages.len(), 2);
    }

    #[test]
    fn underflow_is_invalid_data_not_panic() {
        let buf = [0u8; 2];
        assert!(matches!(
            MessageHeader::parse(&buf),
            Err(AgentError::InvalidData(_))
        ));
    }

    #[test]
    fn unknown_submessage_id_is_unsupported() {
        let hdr = SubmessageHeader {
            submessage_id: 0xEE,
            flags: 0,
            length: 0,
        };
        let mut buf = Vec::new();
        hdr.write_to(&mut buf);
        assert!(matches!(
            parse_submessage(&buf),
            Err(AgentError::Unsupported(_))
        ));
    }
}
