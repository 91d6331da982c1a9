// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DDS-XRCE v1.0 agent/client bridge.
//!
//! Implements the OMG DDS-XRCE (eXtremely Resource Constrained Environments)
//! protocol for bridging resource-constrained devices (MCUs, sensors, embedded
//! Linux) into a full DDS network.
//!
//! # Architecture
//!
//! ```text
//! XRCE Client (MCU)                XRCE Agent (this crate)         DDS Network
//!   ESP32 / STM32                    Linux / Windows
//!        |                                |                            |
//!        |--- CREATE_CLIENT ------------>|                            |
//!        |--- CREATE(topic) ------------>|--- create DDS reader ----->|
//!        |--- WRITE_DATA(payload) ------>|--- DDS write ------------->|
//!        |<-- DATA(payload) -------------|<-- DDS sample ------------|
//!        |--- DELETE ------------------->|--- cleanup --------------->|
//! ```
//!
//! # Key Features
//!
//! - **Transport-agnostic**: Supports UDP, Serial (UART), and TCP transports
//! - **DDS-agnostic**: Any DDS implementation can be plugged in via [`Middleware`]
//! - **Fragmentation**: Large payloads are fragmented and reassembled transparently
//! - **Session management**: Reliable delivery with sequence numbers and heartbeats
//!
//! # Transports
//!
//! | Transport | Use Case | MTU |
//! |-----------|----------|-----|
//! | [`UdpTransport`] | WiFi / Ethernet MCUs | 1500 |
//! | [`SerialTransport`] | UART / RS-485 / HC-12 | 64-256 |
//! | [`TcpTransport`] | Cloud / NAT traversal | 65535 |

pub mod agent;
pub mod config;
pub mod error;
pub mod framing;
pub mod middleware;
pub mod processor;
pub mod protocol;
pub mod proxy;
pub mod registry;
pub mod seqnum;
pub mod session;
pub mod transport;

// Re-exports for convenience.
pub use agent::Agent;
pub use config::{AgentConfig, ConfigSource};
pub use error::{AgentError, OperationKind, StatusCode};
pub use framing::{Frame, FrameDecoder};
pub use middleware::{EntityHandle, Middleware, NullMiddleware};
pub use protocol::{
    // Message types
    MessageHeader, SubmessageHeader, Submessage, XrceMessage,
    // Payload types
    CreateClientPayload, CreatePayload, DeletePayload,
    WriteDataPayload, ReadDataPayload, DataPayload,
    StatusPayload, HeartbeatPayload, AcknackPayload,
    // Enums
    ObjectKind, ObjectId, ObjectRepresentation, CreationMode,
    // Fragmentation
    FragmentPayload, split_for_fragmentation,
    // Functions
    parse_message, parse_submessage,
    serialize_message, serialize_submessage,
};
pub use proxy::{CreateOutcome, ProxyClient};
pub use registry::{ClientEntry, Registry};
pub use seqnum::{SeqNum, SeqRange};
pub use session::{Session, SessionInfo};
pub use transport::{
    EndpointBindings, SerialTransport, TcpTransport, Transport, TransportAddr, UdpTransport,
};
