// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Error type for the session/stream subsystem.
//
// All parsing and stream operations are safe: malformed input returns
// Err, never panics.

use std::fmt;

/// Errors produced by the agent's session and stream subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// Not enough bytes to parse a header / payload.
    InvalidData(&'static str),
    /// A value exceeds the negotiated MTU.
    TooLarge,
    /// Unknown submessage id, object kind, or status code.
    Unsupported(&'static str),
    /// A blocking primitive would have to wait; caller should retry.
    WouldBlock,
    /// A blocking primitive's timeout expired before it could proceed.
    Timeout,
    /// The underlying connection was closed by the peer.
    ConnectionClosed,
    /// No object/session/client exists for the given identifier.
    UnknownReference,
    /// An object already exists and neither REUSE nor REPLACE applies.
    AlreadyExists,
    /// An existing object's representation does not match a REUSE request.
    Mismatch,
    /// The client's cookie or protocol version is not supported.
    Incompatible,
    /// A bounded resource (session table, stream window, ...) is exhausted.
    ResourceExhausted,
    /// A transport write failed.
    WriteFailed(String),
    /// Fragmentation / reassembly error.
    FragmentError(String),
    /// Configuration validation error.
    Config(String),
    /// Anything else unexpected; carries a message for logging.
    Internal(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidData(ctx) => write!(f, "invalid data: {ctx}"),
            Self::TooLarge => write!(f, "value exceeds negotiated MTU"),
            Self::Unsupported(what) => write!(f, "unsupported: {what}"),
            Self::WouldBlock => write!(f, "would block"),
            Self::Timeout => write!(f, "timed out"),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::UnknownReference => write!(f, "unknown reference"),
            Self::AlreadyExists => write!(f, "already exists"),
            Self::Mismatch => write!(f, "representation mismatch"),
            Self::Incompatible => write!(f, "incompatible client"),
            Self::ResourceExhausted => write!(f, "resources exhausted"),
            Self::WriteFailed(msg) => write!(f, "write failed: {msg}"),
            Self::FragmentError(msg) => write!(f, "fragment error: {msg}"),
            Self::Config(msg) => write!(f, "config error: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for AgentError {}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::WouldBlock => Self::WouldBlock,
            std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
                Self::ConnectionClosed
            }
            _ => Self::WriteFailed(e.to_string()),
        }
    }
}

/// Status codes carried on the wire in STATUS submessages (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
    Ok = 0x00,
    OkMatched = 0x01,
    DdsError = 0x80,
    Mismatch = 0x81,
    AlreadyExists = 0x82,
    Denied = 0x83,
    UnknownReference = 0x84,
    InvalidData = 0x85,
    Incompatible = 0x86,
    Resources = 0x87,
    WriteError = 0xF0,
}

impl StatusCode {
    pub fn from_u8(v: u8) -> Result<Self, AgentError> {
        match v {
            0x00 => Ok(Self::Ok),
            0x01 => Ok(Self::OkMatched),
            0x80 => Ok(Self::DdsError),
            0x81 => Ok(Self::Mismatch),
            0x82 => Ok(Self::AlreadyExists),
            0x83 => Ok(Self::Denied),
            0x84 => Ok(Self::UnknownReference),
            0x85 => Ok(Self::InvalidData),
            0x86 => Ok(Self::Incompatible),
            0x87 => Ok(Self::Resources),
            0xF0 => Ok(Self::WriteError),
            _ => Err(AgentError::Unsupported("status code")),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<&AgentError> for StatusCode {
    fn from(e: &AgentError) -> Self {
        match e {
            AgentError::UnknownReference => StatusCode::UnknownReference,
            AgentError::AlreadyExists => StatusCode::AlreadyExists,
            AgentError::Mismatch => StatusCode::Mismatch,
            AgentError::Incompatible => StatusCode::Incompatible,
            AgentError::ResourceExhausted => StatusCode::Resources,
            AgentError::InvalidData(_) | AgentError::TooLarge | AgentError::Unsupported(_) => {
                StatusCode::InvalidData
            }
            AgentError::WriteFailed(_) => StatusCode::WriteError,
            _ => StatusCode::DdsError,
        }
    }
}

/// The operation a STATUS submessage is reporting on (echoed alongside the
/// request id, per spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperationKind {
    Create = 0x00,
    Update = 0x01,
    Delete = 0x02,
    Lookup = 0x03,
    Read = 0x04,
    Write = 0x05,
}
