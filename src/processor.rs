// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Processor (spec §4.9): decodes an incoming message, delivers submessages
// to the session, invokes the middleware, and emits replies onto the
// session's output streams for a reply-writer thread to drain.
//
// Grounded in `include/agent/Root.h`'s `Agent::on_message` dispatch and
// `XRCEListener` overloads, generalized to the session/stream model here
// instead of the original's flat `std::map<int32_t, ProxyClient>` plus a
// separate reply queue.

use std::time::{Duration, Instant};

use crate::config::AgentConfig;
use crate::error::{AgentError, OperationKind, StatusCode};
use crate::middleware::Middleware;
use crate::protocol::{
    self, AckPayload, AcknackPayload, CreateClientPayload, DataPayload, DeletePayload,
    GetInfoPayload, HeartbeatPayload, InfoPayload, ObjectId, ReadDataPayload, Submessage,
    StatusAgentPayload, StatusPayload, StreamClass, WriteDataPayload, XRCE_COOKIE,
};
use crate::proxy::CreateOutcome;
use crate::registry::Registry;
use crate::transport::{EndpointBindings, TransportAddr};

/// Request id echoed on STATUS replies. The wire format has no explicit
/// request-id field on CREATE/DELETE/READ_DATA, so this crate uses the
/// acted-upon object's serial, matching how a client can correlate a
/// STATUS against the CREATE/DELETE it just issued (documented decision,
/// see DESIGN.md).
fn request_id_for(object_id: ObjectId) -> u16 {
    object_id.serial()
}

/// Decodes incoming messages and drives the session/proxy-client/
/// middleware pipeline for one agent instance.
pub struct Processor {
    registry: Registry,
    middleware: Box<dyn Middleware>,
    config: AgentConfig,
    bindings: parking_lot::Mutex<EndpointBindings>,
}

impl Processor {
    pub fn new(config: AgentConfig, middleware: Box<dyn Middleware>) -> Self {
        let registry = Registry::new(config.max_clients);
        Self {
            registry,
            middleware,
            config,
            bindings: parking_lot::Mutex::new(EndpointBindings::new()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.config.reliable_push_timeout_ms)
    }

    /// Process one decoded message from `source` (spec §4.9 `process`).
    pub fn process(&self, source: &TransportAddr, bytes: &[u8], now: Instant) -> Result<(), AgentError> {
        let message = protocol::parse_message(bytes)?;
        let header = &message.header;

        let client_key = if let Some(key) = header.client_key {
            key
        } else {
            self.bindings
                .lock()
                .client_key_of(source)
                .ok_or(AgentError::UnknownReference)?
        };

        // CREATE_CLIENT is handled before a session necessarily exists.
        if let Some((Submessage::CreateClient(payload), _)) = message.submessages.first() {
            self.handle_create_client(source, client_key, payload, now)?;
            return Ok(());
        }

        let entry = self
            .registry
            .get_client(client_key)
            .ok_or(AgentError::UnknownReference)?;
        entry.touch(now);
        let session = entry.session.clone();

        match StreamClass::of(header.stream_id) {
            StreamClass::Reliable => {
                if !session.push_input_message(
                    header.stream_id,
                    header.sequence_nr,
                    message.submessages.clone(),
                ) {
                    log::debug!(
                        "processor: dropped out-of-window reliable message seq={} stream={:#x}",
                        header.sequence_nr,
                        header.stream_id
                    );
                }
                while let Some(queued) = session.pop_input_message(header.stream_id) {
                    for (submsg, flags) in queued {
                        self.dispatch(&entry, header.stream_id, &submsg, flags, now)?;
                    }
                }
                // A HEARTBEAT/ACKNACK inside this same message still needs
                // handling even though the stream above only queues
                // ordinary submessages; the dispatch loop already saw them
                // because they were included in `message.submessages`.
                // Always echo an ACKNACK after a reliable receive, gap or
                // not, so the peer's output stream learns its window moved.
                let ack = session.fill_acknack(header.stream_id);
                self.enqueue_acknack(&entry.session, header.stream_id, ack);
            }
            StreamClass::BestEffort => {
                session.push_input_message(
                    header.stream_id,
                    header.sequence_nr,
                    message.submessages.clone(),
                );
                while let Some(queued) = session.pop_input_message(header.stream_id) {
                    for (submsg, flags) in queued {
                        self.dispatch(&entry, header.stream_id, &submsg, flags, now)?;
                    }
                }
            }
            StreamClass::None => {
                for (submsg, flags) in &message.submessages {
                    self.dispatch(&entry, header.stream_id, submsg, *flags, now)?;
                }
            }
        }
        Ok(())
    }

    fn handle_create_client(
        &self,
        source: &TransportAddr,
        client_key: [u8; 4],
        payload: &CreateClientPayload,
        now: Instant,
    ) -> Result<(), AgentError> {
        if payload.cookie != XRCE_COOKIE {
            log::warn!("processor: CREATE_CLIENT with bad cookie from {source:?}");
            return Err(AgentError::InvalidData("bad magic cookie"));
        }
        if payload.version_major != protocol::AGENT_VERSION_MAJOR {
            return Err(AgentError::Incompatible);
        }

        let mtu = if payload.mtu == 0 {
            self.config.default_mtu
        } else {
            payload.mtu
        };

        let entry = self.registry.create_client(
            client_key,
            payload.session_id,
            mtu,
            self.config.best_effort_window,
            self.config.reliable_window,
            now,
        )?;
        self.bindings.lock().bind(source.clone(), client_key)?;

        let reply = Submessage::StatusAgent(StatusAgentPayload {
            agent_version: (protocol::AGENT_VERSION_MAJOR, protocol::AGENT_VERSION_MINOR),
            agent_vendor_id: self.config.vendor_id,
        });
        entry.session.push_output_submessage(
            protocol::STREAM_ID_NONE,
            reply,
            0,
            self.push_timeout(),
        )?;
        Ok(())
    }

    fn dispatch(
        &self,
        entry: &crate::registry::ClientEntry,
        request_stream_id: u8,
        submsg: &Submessage,
        flags: u8,
        now: Instant,
    ) -> Result<(), AgentError> {
        match submsg {
            Submessage::Create(p) => {
                let mut proxy = entry.proxy.write();
                let outcome = proxy.create(
                    p.object_id,
                    p.creation_mode,
                    p.representation.clone(),
                    self.middleware.as_ref(),
                );
                drop(proxy);
                self.reply_create_status(entry, request_stream_id, p.object_id, outcome)
            }
            Submessage::Delete(DeletePayload { object_id }) => {
                let mut proxy = entry.proxy.write();
                let outcome = proxy.delete_object(*object_id, self.middleware.as_ref());
                drop(proxy);
                self.reply_status(entry, request_stream_id, *object_id, OperationKind::Delete, outcome)
            }
            Submessage::WriteData(WriteDataPayload { writer_id, data }) => {
                let handle = entry
                    .proxy
                    .read()
                    .handle_of(*writer_id)
                    .ok_or(AgentError::UnknownReference)?;
                let result = self.middleware.write(handle, data);
                if result.is_err() {
                    self.reply_status(entry, request_stream_id, *writer_id, OperationKind::Write, result)?;
                }
                Ok(())
            }
            Submessage::ReadData(ReadDataPayload {
                reader_id,
                max_samples,
                read_stream_id,
            }) => {
                let handle = entry
                    .proxy
                    .read()
                    .handle_of(*reader_id)
                    .ok_or(AgentError::UnknownReference)?;
                self.middleware.read(handle, *max_samples)?;
                for (_, sample) in self.middleware.poll_samples() {
                    let data = Submessage::Data(DataPayload {
                        reader_id: *reader_id,
                        data: sample,
                    });
                    entry
                        .session
                        .push_output_submessage(*read_stream_id, data, 0, self.push_timeout())?;
                }
                Ok(())
            }
            Submessage::GetInfo(GetInfoPayload { object_id }) => {
                let info = Submessage::Info(InfoPayload {
                    object_id: *object_id,
                    agent_version: (protocol::AGENT_VERSION_MAJOR, protocol::AGENT_VERSION_MINOR),
                    agent_vendor_id: self.config.vendor_id,
                });
                entry
                    .session
                    .push_output_submessage(request_stream_id, info, 0, self.push_timeout())?;
                Ok(())
            }
            Submessage::Acknack(AcknackPayload {
                first_unacked_seq,
                nack_bitmap,
            }) => {
                entry
                    .session
                    .update_from_acknack(request_stream_id, *first_unacked_seq);
                let missing: Vec<u16> = (0..16u16)
                    .filter(|i| nack_bitmap & (1 << i) != 0)
                    .map(|i| first_unacked_seq.wrapping_add(i))
                    .collect();
                if !missing.is_empty() {
                    entry.session.queue_retransmit(request_stream_id, &missing);
                }
                Ok(())
            }
            Submessage::Heartbeat(HeartbeatPayload {
                first_unacked_seq,
                last_unacked_seq,
            }) => {
                entry
                    .session
                    .update_from_heartbeat(request_stream_id, *first_unacked_seq, *last_unacked_seq);
                Ok(())
            }
            Submessage::Fragment(p) => {
                let last = Submessage::is_last_fragment(flags);
                entry.session.push_input_fragment(request_stream_id, &p.data, last);
                if let Some(reassembled) = entry.session.pop_input_fragment(request_stream_id) {
                    let (inner, inner_flags, _) = protocol::parse_submessage(&reassembled)?;
                    self.dispatch(entry, request_stream_id, &inner, inner_flags, now)?;
                }
                Ok(())
            }
            Submessage::Reset(_) => {
                entry.session.reset();
                Ok(())
            }
            Submessage::Ack(AckPayload) | Submessage::Timestamp(_) | Submessage::TimestampReply(_)
            | Submessage::Performance(_) | Submessage::StatusAgent(_) | Submessage::Status(_)
            | Submessage::Info(_) | Submessage::CreateClient(_) | Submessage::Data(_) => Ok(()),
        }
    }

    fn reply_status(
        &self,
        entry: &crate::registry::ClientEntry,
        reply_stream_id: u8,
        related_object_id: ObjectId,
        operation: OperationKind,
        result: Result<(), AgentError>,
    ) -> Result<(), AgentError> {
        let status = match &result {
            Ok(()) => StatusCode::Ok,
            Err(e) => StatusCode::from(e),
        };
        let reply = Submessage::Status(StatusPayload {
            related_object_id,
            request_id: request_id_for(related_object_id),
            operation,
            status,
        });
        entry
            .session
            .push_output_submessage(reply_stream_id, reply, 0, self.push_timeout())?;
        Ok(())
    }

    /// CREATE's outcome needs its own reply path: a matched reuse reports
    /// `OK_Matched`, not plain `OK` (spec §4.8's table, §6 status codes).
    fn reply_create_status(
        &self,
        entry: &crate::registry::ClientEntry,
        reply_stream_id: u8,
        object_id: ObjectId,
        outcome: Result<CreateOutcome, AgentError>,
    ) -> Result<(), AgentError> {
        let status = match &outcome {
            Ok(CreateOutcome::Created) => StatusCode::Ok,
            Ok(CreateOutcome::Matched) => StatusCode::OkMatched,
            Err(e) => StatusCode::from(e),
        };
        let reply = Submessage::Status(StatusPayload {
            related_object_id: object_id,
            request_id: request_id_for(object_id),
            operation: OperationKind::Create,
            status,
        });
        entry
            .session
            .push_output_submessage(reply_stream_id, reply, 0, self.push_timeout())?;
        Ok(())
    }

    fn enqueue_acknack(&self, session: &crate::session::Session, input_stream_id: u8, ack: AcknackPayload) {
        // Replies travel on the matching reliable output stream (same id
        // as the input stream they acknowledge, per the builtin-stream
        // convention — spec §6 "built-in reliable stream").
        let _ = session.push_output_submessage(
            input_stream_id,
            Submessage::Acknack(ack),
            0,
            Duration::from_millis(0),
        );
    }

    /// Background per-session heartbeat/acknack task (spec §4.9 last
    /// paragraph): run periodically from a dedicated timer thread.
    pub fn run_heartbeat_tick(&self) {
        for entry in self.registry.all_entries() {
            for stream_id in entry.session.list_reliable_output_streams() {
                if let Some(heartbeat) = entry.session.fill_heartbeat(stream_id) {
                    let _ = entry.session.push_output_submessage(
                        stream_id,
                        Submessage::Heartbeat(heartbeat),
                        0,
                        Duration::from_millis(0),
                    );
                }
            }
            for stream_id in entry.session.reliable_inputs_needing_acknack() {
                let ack = entry.session.fill_acknack(stream_id);
                self.enqueue_acknack(&entry.session, stream_id, ack);
            }
        }
    }

    /// Evict clients inactive for longer than the configured session
    /// timeout (spec §3, §7).
    pub fn evict_expired(&self, now: Instant) {
        self.registry.evict_expired(
            now,
            Duration::from_millis(self.config.session_timeout_ms),
            self.middleware.as_ref(),
        );
    }

    pub fn unbind_endpoint(&self, endpoint: &TransportAddr) {
        self.bindings.lock().unbind_endpoint(endpoint);
    }

    /// The transport endpoint a client is currently bound to, for a
    /// reply-writer thread to address outgoing datagrams to (spec §4.9,
    /// §5).
    pub fn endpoint_of(&self, client_key: [u8; 4]) -> Option<TransportAddr> {
        self.bindings.lock().endpoint_of(client_key)
    }

    pub fn heartbeat_period_ms(&self) -> u64 {
        self.config.heartbeat_period_ms
    }
}
