// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Transport adapter (spec §4.10, §3 "Message").
//
// Every `Transport::recv` yields one complete, already-deframed message:
// UDP datagrams are message-bounded by the kernel; serial links are
// deframed through the C2 framing codec; TCP connections are deframed
// through a 2-byte little-endian length prefix. The processor never sees
// raw stream bytes, only whole messages.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use crate::error::AgentError;
use crate::framing::{self, FrameDecoder};

/// Address identifying a remote XRCE client on any transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransportAddr {
    Udp(SocketAddr),
    Serial,
    Tcp(SocketAddr),
}

/// Abstraction over the physical link between the agent and its clients
/// (spec §4.10: "datagram transports" vs "stream/serial transports").
pub trait Transport: Send {
    /// Receive one complete message. Returns `AgentError::WouldBlock` if
    /// nothing is available yet (the listener thread should retry).
    fn recv(&mut self, buf: &mut [u8]) -> Result<(usize, TransportAddr), AgentError>;

    /// Send one complete message to `addr`.
    fn send(&mut self, addr: &TransportAddr, data: &[u8]) -> Result<(), AgentError>;
}

// ---------------------------------------------------------------------------
// UDP transport
// ---------------------------------------------------------------------------

/// UDP transport (spec §4.10 "datagram transports"): each recv/send call
/// is already one message, no reassembly needed.
pub struct UdpTransport {
    socket: socket2::Socket,
}

impl UdpTransport {
    /// Bind a UDP socket to `0.0.0.0:<port>`.
    pub fn bind(port: u16) -> Result<Self, AgentError> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let sa: socket2::SockAddr = addr.into();
        let socket = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )?;
        socket.set_reuse_address(true)?;
        socket.bind(&sa)?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }
}

impl Transport for UdpTransport {
    fn recv(&mut self, buf: &mut [u8]) -> Result<(usize, TransportAddr), AgentError> {
        let buf_ref = unsafe { &mut *(buf as *mut [u8] as *mut [std::mem::MaybeUninit<u8>]) };
        let (n, addr) = self.socket.recv_from(buf_ref)?;
        let peer: SocketAddr = addr
            .as_socket()
            .ok_or(AgentError::InvalidData("peer address is not an IP socket"))?;
        Ok((n, TransportAddr::Udp(peer)))
    }

    fn send(&mut self, addr: &TransportAddr, data: &[u8]) -> Result<(), AgentError> {
        match addr {
            TransportAddr::Udp(sa) => {
                let sa2: socket2::SockAddr = (*sa).into();
                self.socket.send_to(data, &sa2)?;
                Ok(())
            }
            _ => Err(AgentError::Mismatch),
        }
    }
}

// ---------------------------------------------------------------------------
// Serial transport
// ---------------------------------------------------------------------------

/// Serial transport (spec §4.2, §4.10): a single peer over a byte stream,
/// deframed through the octet-stuffed framing codec. Baud rate and line
/// discipline are configured externally (e.g. via `stty`); this only
/// performs the read/write and framing.
pub struct SerialTransport {
    reader: std::fs::File,
    writer: std::fs::File,
    local_addr: u8,
    peer_addr: u8,
    decoder: FrameDecoder,
    read_buf: [u8; 256],
}

impl SerialTransport {
    /// Open a serial device for XRCE communication.
    pub fn open(device_path: &str, local_addr: u8, peer_addr: u8, max_payload: usize) -> Result<Self, AgentError> {
        use std::fs::OpenOptions;
        let reader = OpenOptions::new().read(true).open(device_path)?;
        let writer = OpenOptions::new().write(true).open(device_path)?;
        Ok(Self {
            reader,
            writer,
            local_addr,
            peer_addr,
            decoder: FrameDecoder::new(local_addr, max_payload),
            read_buf: [0u8; 256],
        })
    }
}

impl Transport for SerialTransport {
    fn recv(&mut self, buf: &mut [u8]) -> Result<(usize, TransportAddr), AgentError> {
        loop {
            let n = self.reader.read(&mut self.read_buf)?;
            if n == 0 {
                return Err(AgentError::ConnectionClosed);
            }
            for &byte in &self.read_buf[..n] {
                if let Some(frame) = self.decoder.feed(byte)? {
                    if frame.payload.len() > buf.len() {
                        return Err(AgentError::TooLarge);
                    }
                    buf[..frame.payload.len()].copy_from_slice(&frame.payload);
                    return Ok((frame.payload.len(), TransportAddr::Serial));
                }
            }
        }
    }

    fn send(&mut self, addr: &TransportAddr, data: &[u8]) -> Result<(), AgentError> {
        if !matches!(addr, TransportAddr::Serial) {
            return Err(AgentError::Mismatch);
        }
        let frame = framing::encode(data, self.local_addr, self.peer_addr)?;
        self.writer
            .write_all(&frame)
            .map_err(|e| AgentError::WriteFailed(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// TCP transport
// ---------------------------------------------------------------------------

/// Per-connection reassembly state (spec §4.10: "{BUFFER_EMPTY,
/// SIZE_INCOMPLETE, SIZE_READ, MESSAGE_INCOMPLETE, MESSAGE_AVAILABLE}").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReassemblyState {
    BufferEmpty,
    SizeIncomplete,
    MessageIncomplete,
    MessageAvailable,
}

struct TcpReassembly {
    buf: Vec<u8>,
    expected_len: Option<u16>,
}

impl TcpReassembly {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            expected_len: None,
        }
    }

    fn state(&self) -> ReassemblyState {
        match self.expected_len {
            None if self.buf.is_empty() => ReassemblyState::BufferEmpty,
            None => ReassemblyState::SizeIncomplete,
            Some(len) if self.buf.len() < len as usize => ReassemblyState::MessageIncomplete,
            Some(_) => ReassemblyState::MessageAvailable,
        }
    }

    fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extract one complete message if the length prefix and payload have
    /// both fully arrived.
    fn take_message(&mut self) -> Option<Vec<u8>> {
        if self.expected_len.is_none() {
            if self.buf.len() < 2 {
                return None;
            }
            let len = u16::from_le_bytes([self.buf[0], self.buf[1]]);
            self.buf.drain(0..2);
            self.expected_len = Some(len);
        }
        let len = self.expected_len.expect("just set") as usize;
        if self.buf.len() < len {
            return None;
        }
        let message: Vec<u8> = self.buf.drain(0..len).collect();
        self.expected_len = None;
        Some(message)
    }
}

/// TCP transport (spec §4.10): accepts connections and multiplexes reads
/// across them, deframing each connection's byte stream independently.
pub struct TcpTransport {
    listener: TcpListener,
    connections: HashMap<SocketAddr, TcpStream>,
    reassembly: HashMap<SocketAddr, TcpReassembly>,
    read_buf: [u8; 4096],
}

impl TcpTransport {
    /// Bind a TCP listener on `0.0.0.0:<port>`.
    pub fn bind(port: u16) -> Result<Self, AgentError> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            connections: HashMap::new(),
            reassembly: HashMap::new(),
            read_buf: [0u8; 4096],
        })
    }

    fn accept_new(&mut self) {
        while let Ok((stream, addr)) = self.listener.accept() {
            let _ = stream.set_nonblocking(true);
            self.connections.insert(addr, stream);
            self.reassembly.insert(addr, TcpReassembly::new());
        }
    }

    /// Drop a connection and its reassembly state (peer closed or errored).
    fn disconnect(&mut self, addr: &SocketAddr) {
        self.connections.remove(addr);
        self.reassembly.remove(addr);
    }
}

impl Transport for TcpTransport {
    fn recv(&mut self, buf: &mut [u8]) -> Result<(usize, TransportAddr), AgentError> {
        self.accept_new();

        // Whole messages may already be sitting in reassembly buffers
        // from a previous read that delivered more than one message.
        let ready: Vec<SocketAddr> = self
            .reassembly
            .iter()
            .filter(|(_, r)| r.state() == ReassemblyState::MessageAvailable)
            .map(|(&a, _)| a)
            .collect();
        for addr in ready {
            if let Some(message) = self.reassembly.get_mut(&addr).and_then(|r| r.take_message()) {
                if message.len() > buf.len() {
                    return Err(AgentError::TooLarge);
                }
                buf[..message.len()].copy_from_slice(&message);
                return Ok((message.len(), TransportAddr::Tcp(addr)));
            }
        }

        let addrs: Vec<SocketAddr> = self.connections.keys().copied().collect();
        for addr in addrs {
            let stream = match self.connections.get_mut(&addr) {
                Some(s) => s,
                None => continue,
            };
            match stream.read(&mut self.read_buf) {
                Ok(0) => {
                    self.disconnect(&addr);
                    continue;
                }
                Ok(n) => {
                    let chunk = self.read_buf[..n].to_vec();
                    let reassembly = self.reassembly.entry(addr).or_insert_with(TcpReassembly::new);
                    reassembly.feed(&chunk);
                    if let Some(message) = reassembly.take_message() {
                        if message.len() > buf.len() {
                            return Err(AgentError::TooLarge);
                        }
                        buf[..message.len()].copy_from_slice(&message);
                        return Ok((message.len(), TransportAddr::Tcp(addr)));
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(_) => {
                    self.disconnect(&addr);
                    continue;
                }
            }
        }
        Err(AgentError::WouldBlock)
    }

    fn send(&mut self, addr: &TransportAddr, data: &[u8]) -> Result<(), AgentError> {
        let TransportAddr::Tcp(sa) = addr else {
            return Err(AgentError::Mismatch);
        };
        let stream = self
            .connections
            .get_mut(sa)
            .ok_or(AgentError::ConnectionClosed)?;
        if data.len() > u16::MAX as usize {
            return Err(AgentError::TooLarge);
        }
        let len = (data.len() as u16).to_le_bytes();
        stream
            .write_all(&len)
            .and_then(|_| stream.write_all(data))
            .map_err(|e| AgentError::WriteFailed(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Endpoint <-> client key binding (spec §4.10 last paragraph)
// ---------------------------------------------------------------------------

/// Maintains `endpoint -> client_key` and `client_key -> endpoint`,
/// updated on CREATE_CLIENT and cleared on disconnect (spec §4.10).
#[derive(Default)]
pub struct EndpointBindings {
    by_endpoint: HashMap<TransportAddr, [u8; 4]>,
    by_client: HashMap<[u8; 4], TransportAddr>,
}

impl EndpointBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_key_of(&self, endpoint: &TransportAddr) -> Option<[u8; 4]> {
        self.by_endpoint.get(endpoint).copied()
    }

    pub fn endpoint_of(&self, client_key: [u8; 4]) -> Option<TransportAddr> {
        self.by_client.get(&client_key).cloned()
    }

    /// Bind `endpoint` to `client_key` on a CREATE_CLIENT (spec §9 open
    /// question): rebinds a fresh endpoint, or an endpoint previously
    /// bound to the same key; refuses to steal an endpoint already bound
    /// to a different key.
    pub fn bind(&mut self, endpoint: TransportAddr, client_key: [u8; 4]) -> Result<(), AgentError> {
        if let Some(existing) = self.by_endpoint.get(&endpoint) {
            if *existing != client_key {
                return Err(AgentError::AlreadyExists);
            }
            return Ok(());
        }
        if let Some(previous) = self.by_client.insert(client_key, endpoint.clone()) {
            self.by_endpoint.remove(&previous);
        }
        self.by_endpoint.insert(endpoint, client_key);
        Ok(())
    }

    pub fn unbind_client(&mut self, client_key: [u8; 4]) {
        if let Some(endpoint) = self.by_client.remove(&client_key) {
            self.by_endpoint.remove(&endpoint);
        }
    }

    pub fn unbind_endpoint(&mut self, endpoint: &TransportAddr) {
        if let Some(client_key) = self.by_endpoint.remove(endpoint) {
            self.by_client.remove(&client_key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_reassembly_yields_exactly_one_message_per_length_prefix() {
        let mut r = TcpReassembly::new();
        assert_eq!(r.state(), ReassemblyState::BufferEmpty);
        r.feed(&[3, 0]); // length prefix: 3 bytes payload
        assert_eq!(r.state(), ReassemblyState::MessageIncomplete);
        assert!(r.take_message().is_none());
        r.feed(&[1, 2]);
        assert!(r.take_message().is_none());
        r.feed(&[3]);
        assert_eq!(r.take_message(), Some(vec![1, 2, 3]));
        assert_eq!(r.state(), ReassemblyState::BufferEmpty);
    }

    #[test]
    fn tcp_reassembly_handles_two_messages_in_one_read() {
        let mut r = TcpReassembly::new();
        r.feed(&[2, 0, 0xAA, 0xBB, 1, 0, 0xCC]);
        assert_eq!(r.take_message(), Some(vec![0xAA, 0xBB]));
        assert_eq!(r.take_message(), Some(vec![0xCC]));
        assert!(r.take_message().is_none());
    }

    #[test]
    fn endpoint_binding_rebind_same_key_is_idempotent() {
        let mut bindings = EndpointBindings::new();
        let addr = TransportAddr::Udp(([127, 0, 0, 1], 9000).into());
        bindings.bind(addr.clone(), [0, 0, 0, 1]).unwrap();
        bindings.bind(addr.clone(), [0, 0, 0, 1]).unwrap();
        assert_eq!(bindings.client_key_of(&addr), Some([0, 0, 0, 1]));
    }

    #[test]
    fn endpoint_binding_refuses_to_steal_endpoint_bound_to_other_key() {
        let mut bindings = EndpointBindings::new();
        let addr = TransportAddr::Udp(([127, 0, 0, 1], 9000).into());
        bindings.bind(addr.clone(), [0, 0, 0, 1]).unwrap();
        let err = bindings.bind(addr, [0, 0, 0, 2]);
        assert!(matches!(err, Err(AgentError::AlreadyExists)));
    }

    #[test]
    fn endpoint_binding_moves_with_client_key_across_endpoints() {
        let mut bindings = EndpointBindings::new();
        let a = TransportAddr::Udp(([127, 0, 0, 1], 9000).into());
        let b = TransportAddr::Udp(([127, 0, 0, 1], 9001).into());
        bindings.bind(a.clone(), [0, 0, 0, 1]).unwrap();
        bindings.bind(b.clone(), [0, 0, 0, 1]).unwrap();
        assert_eq!(bindings.client_key_of(&a), None);
        assert_eq!(bindings.client_key_of(&b), Some([0, 0, 0, 1]));
    }
}
