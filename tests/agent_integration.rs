// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end processor integration tests.
//!
//! Drives [`Processor::process`] with hand-built wire messages the way a
//! real client would send them, instead of calling session/proxy APIs
//! directly, so these exercise the full decode -> dispatch -> reply path.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use xrce_agent::config::AgentConfig;
use xrce_agent::error::AgentError;
use xrce_agent::middleware::{EntityHandle, Middleware};
use xrce_agent::processor::Processor;
use xrce_agent::protocol::{
    self, AcknackPayload, CreateClientPayload, CreatePayload, CreationMode, FragmentPayload,
    MessageHeader, ObjectId, ObjectKind, ObjectRepresentation, StatusCode, Submessage,
    WriteDataPayload, FLAG_LAST_FRAGMENT, STREAM_ID_NONE, XRCE_COOKIE,
};
use xrce_agent::transport::TransportAddr;

/// A middleware that behaves like the null one but records every write, so
/// fragment reassembly can be checked end to end.
#[derive(Default)]
struct RecordingMiddleware {
    next_handle: AtomicU64,
    writes: Mutex<Vec<(EntityHandle, Vec<u8>)>>,
}

impl RecordingMiddleware {
    fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            writes: Mutex::new(Vec::new()),
        }
    }

    fn writes(&self) -> Vec<(EntityHandle, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }
}

impl Middleware for RecordingMiddleware {
    fn create_entity(
        &self,
        _parent: Option<EntityHandle>,
        _representation: &ObjectRepresentation,
    ) -> Result<EntityHandle, AgentError> {
        Ok(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    fn matches(
        &self,
        _existing: EntityHandle,
        _representation: &ObjectRepresentation,
    ) -> Result<bool, AgentError> {
        Ok(true)
    }

    fn delete_entity(&self, _handle: EntityHandle) -> Result<(), AgentError> {
        Ok(())
    }

    fn write(&self, handle: EntityHandle, data: &[u8]) -> Result<(), AgentError> {
        self.writes.lock().unwrap().push((handle, data.to_vec()));
        Ok(())
    }

    fn read(&self, _handle: EntityHandle, _max_samples: u16) -> Result<(), AgentError> {
        Ok(())
    }

    fn poll_samples(&self) -> Vec<(EntityHandle, Vec<u8>)> {
        Vec::new()
    }
}

impl Middleware for Arc<RecordingMiddleware> {
    fn create_entity(
        &self,
        parent: Option<EntityHandle>,
        representation: &ObjectRepresentation,
    ) -> Result<EntityHandle, AgentError> {
        (**self).create_entity(parent, representation)
    }

    fn matches(
        &self,
        existing: EntityHandle,
        representation: &ObjectRepresentation,
    ) -> Result<bool, AgentError> {
        (**self).matches(existing, representation)
    }

    fn delete_entity(&self, handle: EntityHandle) -> Result<(), AgentError> {
        (**self).delete_entity(handle)
    }

    fn write(&self, handle: EntityHandle, data: &[u8]) -> Result<(), AgentError> {
        (**self).write(handle, data)
    }

    fn read(&self, handle: EntityHandle, max_samples: u16) -> Result<(), AgentError> {
        (**self).read(handle, max_samples)
    }

    fn poll_samples(&self) -> Vec<(EntityHandle, Vec<u8>)> {
        (**self).poll_samples()
    }
}

fn udp_addr(port: u16) -> TransportAddr {
    TransportAddr::Udp(SocketAddr::from(([127, 0, 0, 1], port)))
}

fn send(processor: &Processor, addr: &TransportAddr, header: MessageHeader, submsg: Submessage, flags: u8) {
    let message = protocol::single_message(header, submsg, flags);
    let bytes = protocol::serialize_message(&message);
    processor
        .process(addr, &bytes, Instant::now())
        .expect("message should be accepted");
}

/// CREATE_CLIENT always carries the client key in the header, since no
/// session exists yet to resolve it from the transport endpoint.
fn handshake(processor: &Processor, addr: &TransportAddr, client_key: [u8; 4], session_id: u8) {
    let header = MessageHeader {
        session_id: 0,
        stream_id: STREAM_ID_NONE,
        sequence_nr: 0,
        client_key: Some(client_key),
    };
    let payload = CreateClientPayload {
        cookie: XRCE_COOKIE,
        version_major: protocol::AGENT_VERSION_MAJOR,
        version_minor: protocol::AGENT_VERSION_MINOR,
        vendor_id: 0,
        client_timestamp: 0,
        client_key,
        session_id,
        mtu: 0,
    };
    send(processor, addr, header, Submessage::CreateClient(payload), 0);
}

fn reliable_header(stream_id: u8, sequence_nr: u16) -> MessageHeader {
    MessageHeader {
        session_id: 0x80,
        stream_id,
        sequence_nr,
        client_key: None,
    }
}

#[test]
fn handshake_replies_with_status_agent() {
    let processor = Processor::new(AgentConfig::default(), Box::new(RecordingMiddleware::new()));
    let addr = udp_addr(9100);
    let client_key = [0, 0, 0, 1];

    handshake(&processor, &addr, client_key, 0x80);

    let entry = processor.registry().get_client(client_key).expect("client registered");
    let reply = entry
        .session
        .get_next_output_message(STREAM_ID_NONE)
        .expect("a STATUS_AGENT reply is queued");
    let parsed = protocol::parse_message(&reply).unwrap();
    assert!(matches!(
        parsed.submessages[0].0,
        Submessage::StatusAgent(_)
    ));
    assert_eq!(processor.endpoint_of(client_key), Some(addr));
}

#[test]
fn reliable_out_of_order_messages_are_reordered_before_dispatch() {
    let processor = Processor::new(AgentConfig::default(), Box::new(RecordingMiddleware::new()));
    let addr = udp_addr(9101);
    let client_key = [0, 0, 0, 2];
    handshake(&processor, &addr, client_key, 0x80);

    let participant_id = ObjectId::new(ObjectKind::Participant, 1);
    let topic_id = ObjectId::new(ObjectKind::Topic, 1);

    let topic_create = CreatePayload {
        object_id: topic_id,
        creation_mode: CreationMode::default(),
        representation: ObjectRepresentation::Topic {
            participant_id,
            name: "chatter".into(),
            type_name: "std_msgs/String".into(),
        },
    };
    let participant_create = CreatePayload {
        object_id: participant_id,
        creation_mode: CreationMode::default(),
        representation: ObjectRepresentation::Participant { domain_id: 0 },
    };

    // Topic (sequence 2, depends on the participant) arrives first.
    send(
        &processor,
        &addr,
        reliable_header(0x80, 2),
        Submessage::Create(topic_create),
        0,
    );

    let entry = processor.registry().get_client(client_key).unwrap();
    assert!(
        !entry.proxy.read().contains(topic_id),
        "topic must not be created before its parent arrives"
    );

    // Participant (sequence 1) arrives second; both should now dispatch in order.
    send(
        &processor,
        &addr,
        reliable_header(0x80, 1),
        Submessage::Create(participant_create),
        0,
    );

    assert!(entry.proxy.read().contains(participant_id));
    assert!(entry.proxy.read().contains(topic_id));
}

#[test]
fn acknack_bitmap_triggers_retransmission_of_missing_sequences() {
    let processor = Processor::new(AgentConfig::default(), Box::new(RecordingMiddleware::new()));
    let addr = udp_addr(9102);
    let client_key = [0, 0, 0, 3];
    handshake(&processor, &addr, client_key, 0x80);
    let entry = processor.registry().get_client(client_key).unwrap();

    for i in 0..4u16 {
        entry
            .session
            .push_output_submessage(
                0x80,
                Submessage::Data(protocol::DataPayload {
                    reader_id: ObjectId::new(ObjectKind::DataReader, 1),
                    data: vec![i as u8],
                }),
                0,
                Duration::from_millis(100),
            )
            .unwrap();
    }

    let expected_seq2 = entry.session.get_output_message(0x80, 2).unwrap();
    let expected_seq3 = entry.session.get_output_message(0x80, 3).unwrap();

    // Simulate all four having gone out over the wire already.
    for _ in 0..4 {
        entry.session.get_next_output_message(0x80).unwrap();
    }
    assert!(entry.session.get_next_output_message(0x80).is_none());

    // Client only saw sequence 1: first_unacked=2, bits 0 and 1 flag 2 and 3 missing.
    send(
        &processor,
        &addr,
        reliable_header(0x80, 1),
        Submessage::Acknack(AcknackPayload {
            first_unacked_seq: 2,
            nack_bitmap: 0b11,
        }),
        0,
    );

    assert_eq!(entry.session.get_next_output_message(0x80), Some(expected_seq2));
    assert_eq!(entry.session.get_next_output_message(0x80), Some(expected_seq3));
    assert!(entry.session.get_next_output_message(0x80).is_none());
}

#[test]
fn fragmented_write_is_reassembled_before_reaching_the_middleware() {
    let middleware = Arc::new(RecordingMiddleware::new());
    let processor = Processor::new(AgentConfig::default(), Box::new(Arc::clone(&middleware)));
    let addr = udp_addr(9103);
    let client_key = [0, 0, 0, 4];
    handshake(&processor, &addr, client_key, 0x80);

    let participant_id = ObjectId::new(ObjectKind::Participant, 1);
    let publisher_id = ObjectId::new(ObjectKind::Publisher, 1);
    let writer_id = ObjectId::new(ObjectKind::DataWriter, 1);

    for (object_id, representation) in [
        (
            participant_id,
            ObjectRepresentation::Participant { domain_id: 0 },
        ),
        (
            publisher_id,
            ObjectRepresentation::Publisher { participant_id },
        ),
        (
            writer_id,
            ObjectRepresentation::DataWriter {
                publisher_id,
                topic_id: ObjectId::new(ObjectKind::Topic, 1),
            },
        ),
    ] {
        send(
            &processor,
            &addr,
            MessageHeader {
                session_id: 0x80,
                stream_id: STREAM_ID_NONE,
                sequence_nr: 0,
                client_key: None,
            },
            Submessage::Create(CreatePayload {
                object_id,
                creation_mode: CreationMode::default(),
                representation,
            }),
            0,
        );
    }

    let payload = vec![0xABu8; 64];
    let write_bytes = protocol::serialize_submessage(
        &Submessage::WriteData(WriteDataPayload {
            writer_id,
            data: payload.clone(),
        }),
        0,
    );
    let chunks = protocol::split_for_fragmentation(&write_bytes, 20).unwrap();
    assert!(chunks.len() >= 2, "payload should need more than one fragment");

    let last = chunks.len() - 1;
    for (i, chunk) in chunks.into_iter().enumerate() {
        let flags = if i == last { FLAG_LAST_FRAGMENT } else { 0 };
        send(
            &processor,
            &addr,
            reliable_header(0x80, (i + 1) as u16),
            Submessage::Fragment(FragmentPayload { data: chunk }),
            flags,
        );
    }

    // The write only reaches the middleware once every fragment has arrived.
    let entry = processor.registry().get_client(client_key).unwrap();
    let handle = entry.proxy.read().handle_of(writer_id).unwrap();
    let writes = middleware.writes();
    assert_eq!(writes.len(), 1, "exactly one write after reassembly completes");
    assert_eq!(writes[0], (handle, payload));
}

#[test]
fn create_reuse_reports_matched_without_recreating() {
    let processor = Processor::new(AgentConfig::default(), Box::new(RecordingMiddleware::new()));
    let addr = udp_addr(9104);
    let client_key = [0, 0, 0, 5];
    handshake(&processor, &addr, client_key, 0x80);
    let entry = processor.registry().get_client(client_key).unwrap();

    let participant_id = ObjectId::new(ObjectKind::Participant, 1);
    let none_header = || MessageHeader {
        session_id: 0x80,
        stream_id: STREAM_ID_NONE,
        sequence_nr: 0,
        client_key: None,
    };

    send(
        &processor,
        &addr,
        none_header(),
        Submessage::Create(CreatePayload {
            object_id: participant_id,
            creation_mode: CreationMode::default(),
            representation: ObjectRepresentation::Participant { domain_id: 0 },
        }),
        0,
    );
    // Drain the first STATUS (OK) so the next one is unambiguous.
    entry.session.get_next_output_message(STREAM_ID_NONE).unwrap();

    send(
        &processor,
        &addr,
        none_header(),
        Submessage::Create(CreatePayload {
            object_id: participant_id,
            creation_mode: CreationMode {
                reuse: true,
                replace: true,
            },
            representation: ObjectRepresentation::Participant { domain_id: 0 },
        }),
        0,
    );
    let reply = entry
        .session
        .get_next_output_message(STREAM_ID_NONE)
        .expect("a STATUS reply for the reused create");
    let parsed = protocol::parse_message(&reply).unwrap();
    let Submessage::Status(status) = &parsed.submessages[0].0 else {
        panic!("expected a STATUS submessage");
    };
    assert_eq!(status.status, StatusCode::OkMatched);
}
