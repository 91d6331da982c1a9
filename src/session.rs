// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Session and stream subsystem (spec §3 "Session", §4.4-§4.6, §9).
//
// A `Session` is the aggregate of one client's input/output streams. Input
// streams reorder and deduplicate; output streams batch, fragment, and
// retain messages for retransmission. Stream id alone determines reliability
// class (spec §3); streams are created lazily on first use.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::AgentError;
use crate::protocol::{
    self, AcknackPayload, FragmentPayload, HeartbeatPayload, MessageHeader, StreamClass,
    Submessage, FLAG_LAST_FRAGMENT,
};
use crate::seqnum::SeqNum;

/// One decoded message's submessages, as queued on an input stream — a
/// message may bundle more than one submessage under a single sequence
/// number (spec §3 "Message").
pub type QueuedSubmessages = Vec<(Submessage, u8)>;

/// Session-wide identity, stable once a client has completed the
/// CREATE_CLIENT handshake (spec §3 "Session").
#[derive(Debug, Clone, Copy)]
pub struct SessionInfo {
    pub session_id: u8,
    pub client_key: [u8; 4],
    pub mtu: u16,
}

impl SessionInfo {
    fn message_header(&self, stream_id: u8, sequence_nr: u16) -> MessageHeader {
        MessageHeader {
            session_id: self.session_id,
            stream_id,
            sequence_nr,
            client_key: if protocol::session_id_carries_client_key(self.session_id) {
                Some(self.client_key)
            } else {
                None
            },
        }
    }
}

// ---------------------------------------------------------------------------
// None stream (spec §4.4.1, §4.5.1)
// ---------------------------------------------------------------------------

struct NoneInputState {
    messages: VecDeque<QueuedSubmessages>,
}

struct NoneOutputState {
    messages: VecDeque<Vec<u8>>,
}

// ---------------------------------------------------------------------------
// Best-effort streams (spec §4.4.2, §4.5.2)
// ---------------------------------------------------------------------------

struct BestEffortInputState {
    last_received: SeqNum,
    messages: VecDeque<QueuedSubmessages>,
}

impl BestEffortInputState {
    fn new() -> Self {
        Self {
            last_received: SeqNum(u16::MAX),
            messages: VecDeque::new(),
        }
    }
}

struct BestEffortOutputState {
    last_sent: SeqNum,
    messages: VecDeque<Vec<u8>>,
}

impl BestEffortOutputState {
    fn new() -> Self {
        Self {
            last_sent: SeqNum(u16::MAX),
            messages: VecDeque::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reliable input stream (spec §4.4.3)
// ---------------------------------------------------------------------------

struct ReliableInputState {
    last_handled: SeqNum,
    last_announced: SeqNum,
    messages: BTreeMap<u16, QueuedSubmessages>,
    fragment_buf: Vec<u8>,
    fragment_complete: bool,
    window: u16,
}

impl ReliableInputState {
    fn new(window: u16) -> Self {
        Self {
            last_handled: SeqNum(u16::MAX),
            last_announced: SeqNum(u16::MAX),
            messages: BTreeMap::new(),
            fragment_buf: Vec::new(),
            fragment_complete: false,
            window,
        }
    }

    fn push(&mut self, seq: SeqNum, message: QueuedSubmessages) -> bool {
        if !(self.last_handled < seq && seq <= self.last_handled.add(self.window)) {
            return false;
        }
        if seq > self.last_announced {
            self.last_announced = seq;
            self.messages.insert(seq.value(), message);
            true
        } else if let std::collections::btree_map::Entry::Vacant(e) =
            self.messages.entry(seq.value())
        {
            e.insert(message);
            true
        } else {
            false
        }
    }

    fn pop(&mut self) -> Option<QueuedSubmessages> {
        let next = self.last_handled.add(1);
        let message = self.messages.remove(&next.value())?;
        self.last_handled = next;
        Some(message)
    }

    fn heartbeat_update(&mut self, first_unacked: SeqNum, last_unacked: SeqNum) {
        if self.last_handled.add(1) < first_unacked {
            self.last_handled = first_unacked.sub(1);
        }
        if self.last_announced < last_unacked {
            self.last_announced = last_unacked;
        }
    }

    fn fill_acknack(&self) -> AcknackPayload {
        let first_unacked = self.last_handled.add(1);
        let mut bitmap: u16 = 0;
        for i in 0..16u16 {
            let seq = self.last_handled.add(i + 1);
            if seq <= self.last_announced && !self.messages.contains_key(&seq.value()) {
                bitmap |= 1 << i;
            }
        }
        AcknackPayload {
            first_unacked_seq: first_unacked.value(),
            nack_bitmap: bitmap,
        }
    }

    fn push_fragment(&mut self, data: &[u8], last: bool) {
        self.fragment_buf.extend_from_slice(data);
        self.fragment_complete = last;
    }

    fn pop_fragment_message(&mut self) -> Option<Vec<u8>> {
        if !self.fragment_complete {
            return None;
        }
        self.fragment_complete = false;
        Some(std::mem::take(&mut self.fragment_buf))
    }
}

// ---------------------------------------------------------------------------
// Reliable output stream (spec §4.5.3)
// ---------------------------------------------------------------------------

struct ReliableOutputInner {
    messages: BTreeMap<u16, Vec<u8>>,
    first_unacked: SeqNum,
    last_unacked: SeqNum,
    last_sent: SeqNum,
    /// Sequences an ACKNACK's bitmap flagged as missing, queued ahead of
    /// ordinary in-order delivery (spec §4.5.3 negative-ack handling).
    retransmit_queue: VecDeque<u16>,
}

/// A reliable output stream owns its own mutex/condvar pair (spec §4.6:
/// "each individual stream has its own mutex; its condition variable wakes
/// only waiters on that stream").
struct ReliableOutputStream {
    inner: Mutex<ReliableOutputInner>,
    window_available: Condvar,
    window: u16,
}

impl ReliableOutputStream {
    fn new(window: u16) -> Self {
        Self {
            inner: Mutex::new(ReliableOutputInner {
                messages: BTreeMap::new(),
                first_unacked: SeqNum(0),
                last_unacked: SeqNum(u16::MAX),
                last_sent: SeqNum(u16::MAX),
                retransmit_queue: VecDeque::new(),
            }),
            window_available: Condvar::new(),
            window,
        }
    }

    fn has_room(inner: &ReliableOutputInner, window: u16) -> bool {
        inner.last_unacked < inner.first_unacked.add(window - 1)
    }

    /// Push one or more wire messages (fragmented if `submessage_bytes`
    /// does not fit `max_single_message`), blocking for window space.
    fn push_submessage(
        &self,
        info: &SessionInfo,
        stream_id: u8,
        submessage_bytes: Vec<u8>,
        submessage_id_fits_unfragmented: bool,
        max_fragment_payload: usize,
        timeout: Duration,
        closing: &AtomicBool,
    ) -> Result<bool, AgentError> {
        let mut inner = self.inner.lock();
        let deadline = std::time::Instant::now() + timeout;
        while !Self::has_room(&inner, self.window) {
            if closing.load(AtomicOrdering::Acquire) {
                return Ok(false);
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let remaining = deadline - now;
            let result = self.window_available.wait_for(&mut inner, remaining);
            if result.timed_out() {
                return Ok(false);
            }
        }

        if submessage_id_fits_unfragmented {
            let seq = inner.last_unacked.add(1);
            let header = info.message_header(stream_id, seq.value());
            let bytes = wrap_single_submessage(header, submessage_bytes);
            inner.messages.insert(seq.value(), bytes);
            inner.last_unacked = seq;
            return Ok(true);
        }

        let chunks = protocol::split_for_fragmentation(&submessage_bytes, max_fragment_payload)?;
        let last_index = chunks.len() - 1;
        let mut seq = inner.last_unacked;
        for (i, chunk) in chunks.into_iter().enumerate() {
            seq = seq.add(1);
            let flags = if i == last_index { FLAG_LAST_FRAGMENT } else { 0 };
            let header = info.message_header(stream_id, seq.value());
            let fragment = Submessage::Fragment(FragmentPayload { data: chunk });
            let bytes = protocol::serialize_message(&protocol::single_message(
                header, fragment, flags,
            ));
            inner.messages.insert(seq.value(), bytes);
        }
        inner.last_unacked = seq;
        Ok(true)
    }

    fn get_next_message(&self) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        while let Some(seq) = inner.retransmit_queue.pop_front() {
            if let Some(bytes) = inner.messages.get(&seq).cloned() {
                return Some(bytes);
            }
        }
        if inner.last_sent < inner.last_unacked {
            let next = inner.last_sent.add(1);
            inner.last_sent = next;
            return inner.messages.get(&next.value()).cloned();
        }
        None
    }

    fn get_message(&self, seq: SeqNum) -> Option<Vec<u8>> {
        self.inner.lock().messages.get(&seq.value()).cloned()
    }

    /// Queue retained sequences for re-delivery ahead of new traffic (spec
    /// §4.5.3: "for each bit set, re-transmit the corresponding message").
    fn queue_retransmit(&self, seqs: &[u16]) {
        let mut inner = self.inner.lock();
        for &seq in seqs {
            if inner.messages.contains_key(&seq) {
                inner.retransmit_queue.push_back(seq);
            }
        }
    }

    fn update_from_acknack(&self, first_unacked_peer: SeqNum) {
        let mut inner = self.inner.lock();
        if first_unacked_peer <= inner.last_sent.add(1) {
            let mut seq = inner.first_unacked;
            while seq < first_unacked_peer {
                inner.messages.remove(&seq.value());
                seq = seq.add(1);
            }
            inner.first_unacked = first_unacked_peer;
            self.window_available.notify_one();
        }
    }

    fn fill_heartbeat(&self) -> (HeartbeatPayload, bool) {
        let inner = self.inner.lock();
        (
            HeartbeatPayload {
                first_unacked_seq: inner.first_unacked.value(),
                last_unacked_seq: inner.last_unacked.value(),
            },
            !inner.messages.is_empty(),
        )
    }

    fn wake_all(&self) {
        self.window_available.notify_all();
    }
}

fn wrap_single_submessage(header: MessageHeader, submessage_bytes: Vec<u8>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(header.len() + submessage_bytes.len());
    header.write_to(&mut buf);
    buf.extend_from_slice(&submessage_bytes);
    let pad = (4 - (buf.len() % 4)) % 4;
    buf.resize(buf.len() + pad, 0);
    buf
}

// ---------------------------------------------------------------------------
// Session (spec §4.6)
// ---------------------------------------------------------------------------

/// The aggregate of all streams between one client and the agent.
pub struct Session {
    pub info: SessionInfo,
    best_effort_window: usize,
    reliable_window: u16,

    none_input: Mutex<NoneInputState>,
    best_effort_inputs: Mutex<HashMap<u8, BestEffortInputState>>,
    reliable_inputs: Mutex<HashMap<u8, ReliableInputState>>,

    none_output: Mutex<NoneOutputState>,
    best_effort_outputs: RwLock<HashMap<u8, Mutex<BestEffortOutputState>>>,
    reliable_outputs: RwLock<HashMap<u8, ReliableOutputStream>>,

    /// Set when the session is being torn down; wakes every reliable
    /// output waiter so `delete_client` never leaves a thread blocked
    /// (spec §5 "Cancellation/timeouts", §9).
    closing: AtomicBool,
}

impl Session {
    pub fn new(info: SessionInfo, best_effort_window: usize, reliable_window: u16) -> Self {
        Self {
            info,
            best_effort_window,
            reliable_window,
            none_input: Mutex::new(NoneInputState {
                messages: VecDeque::new(),
            }),
            best_effort_inputs: Mutex::new(HashMap::new()),
            reliable_inputs: Mutex::new(HashMap::new()),
            none_output: Mutex::new(NoneOutputState {
                messages: VecDeque::new(),
            }),
            best_effort_outputs: RwLock::new(HashMap::new()),
            reliable_outputs: RwLock::new(HashMap::new()),
            closing: AtomicBool::new(false),
        }
    }

    /// Mark the session as closing and wake every blocked reliable-output
    /// waiter. Idempotent.
    pub fn close(&self) {
        self.closing.store(true, AtomicOrdering::Release);
        for stream in self.reliable_outputs.read().values() {
            stream.wake_all();
        }
    }

    // -- input --------------------------------------------------------

    pub fn push_input_message(&self, stream_id: u8, seq: u16, message: QueuedSubmessages) -> bool {
        match StreamClass::of(stream_id) {
            StreamClass::None => {
                let mut state = self.none_input.lock();
                if state.messages.len() < self.best_effort_window {
                    state.messages.push_back(message);
                    true
                } else {
                    false
                }
            }
            StreamClass::BestEffort => {
                let mut map = self.best_effort_inputs.lock();
                let stream = map.entry(stream_id).or_insert_with(BestEffortInputState::new);
                let seq = SeqNum(seq);
                if seq > stream.last_received && stream.messages.len() < self.best_effort_window {
                    stream.messages.push_back(message);
                    stream.last_received = seq;
                    true
                } else {
                    false
                }
            }
            StreamClass::Reliable => {
                let mut map = self.reliable_inputs.lock();
                let window = self.reliable_window;
                let stream = map
                    .entry(stream_id)
                    .or_insert_with(|| ReliableInputState::new(window));
                stream.push(SeqNum(seq), message)
            }
        }
    }

    pub fn pop_input_message(&self, stream_id: u8) -> Option<QueuedSubmessages> {
        match StreamClass::of(stream_id) {
            StreamClass::None => self.none_input.lock().messages.pop_front(),
            StreamClass::BestEffort => self
                .best_effort_inputs
                .lock()
                .get_mut(&stream_id)
                .and_then(|s| s.messages.pop_front()),
            StreamClass::Reliable => self
                .reliable_inputs
                .lock()
                .get_mut(&stream_id)
                .and_then(|s| s.pop()),
        }
    }

    pub fn push_input_fragment(&self, stream_id: u8, data: &[u8], last: bool) {
        let mut map = self.reliable_inputs.lock();
        let window = self.reliable_window;
        let stream = map
            .entry(stream_id)
            .or_insert_with(|| ReliableInputState::new(window));
        stream.push_fragment(data, last);
    }

    pub fn pop_input_fragment(&self, stream_id: u8) -> Option<Vec<u8>> {
        self.reliable_inputs
            .lock()
            .get_mut(&stream_id)
            .and_then(|s| s.pop_fragment_message())
    }

    pub fn update_from_heartbeat(&self, stream_id: u8, first_unacked: u16, last_unacked: u16) {
        let mut map = self.reliable_inputs.lock();
        let window = self.reliable_window;
        let stream = map
            .entry(stream_id)
            .or_insert_with(|| ReliableInputState::new(window));
        stream.heartbeat_update(SeqNum(first_unacked), SeqNum(last_unacked));
    }

    pub fn fill_acknack(&self, stream_id: u8) -> AcknackPayload {
        let mut map = self.reliable_inputs.lock();
        let window = self.reliable_window;
        let stream = map
            .entry(stream_id)
            .or_insert_with(|| ReliableInputState::new(window));
        stream.fill_acknack()
    }

    /// Reliable input streams with unacknowledged gaps (spec §4.9
    /// background task: "for each reliable input stream whose
    /// `last_announced > last_handled`, push an ACKNACK").
    pub fn reliable_inputs_needing_acknack(&self) -> Vec<u8> {
        self.reliable_inputs
            .lock()
            .iter()
            .filter(|(_, s)| s.last_announced > s.last_handled)
            .map(|(&id, _)| id)
            .collect()
    }

    // -- output -------------------------------------------------------

    fn best_effort_overhead(&self) -> usize {
        self.info.message_header(0, 0).len()
    }

    /// Push one submessage onto the output stream identified by
    /// `stream_id`, per spec §4.5. Reliable pushes block up to `timeout`
    /// for window space.
    pub fn push_output_submessage(
        &self,
        stream_id: u8,
        submessage: Submessage,
        extra_flags: u8,
        timeout: Duration,
    ) -> Result<bool, AgentError> {
        match StreamClass::of(stream_id) {
            StreamClass::None => {
                let mut state = self.none_output.lock();
                if state.messages.len() >= self.best_effort_window {
                    return Ok(false);
                }
                let header = self.info.message_header(protocol::STREAM_ID_NONE, 0);
                let msg = protocol::single_message(header, submessage, extra_flags);
                state.messages.push_back(protocol::serialize_message(&msg));
                Ok(true)
            }
            StreamClass::BestEffort => {
                let lock = self.best_effort_outputs.upgradable_read();
                if !lock.contains_key(&stream_id) {
                    let mut write = parking_lot::RwLockUpgradableReadGuard::upgrade(lock);
                    write
                        .entry(stream_id)
                        .or_insert_with(|| Mutex::new(BestEffortOutputState::new()));
                    drop(write);
                }
                let read = self.best_effort_outputs.read();
                let mut state = read.get(&stream_id).expect("just inserted").lock();
                if state.messages.len() >= self.best_effort_window {
                    return Ok(false);
                }
                let seq = state.last_sent.add(1);
                let overhead = self.best_effort_overhead() + protocol::SUBMESSAGE_HEADER_SIZE;
                let body = protocol::serialize_submessage(&submessage, extra_flags);
                if overhead + body.len() > self.info.mtu as usize {
                    log::warn!(
                        "session: dropping oversize best-effort submessage ({} bytes, mtu {})",
                        body.len(),
                        self.info.mtu
                    );
                    return Ok(true);
                }
                let header = self.info.message_header(stream_id, seq.value());
                let msg = protocol::single_message(header, submessage, extra_flags);
                state.messages.push_back(protocol::serialize_message(&msg));
                state.last_sent = seq;
                Ok(true)
            }
            StreamClass::Reliable => {
                let lock = self.reliable_outputs.upgradable_read();
                if !lock.contains_key(&stream_id) {
                    let mut write = parking_lot::RwLockUpgradableReadGuard::upgrade(lock);
                    write
                        .entry(stream_id)
                        .or_insert_with(|| ReliableOutputStream::new(self.reliable_window));
                    drop(write);
                }
                let read = self.reliable_outputs.read();
                let stream = read.get(&stream_id).expect("just inserted");

                let body = protocol::serialize_submessage(&submessage, extra_flags);
                let message_header_len = self.info.message_header(stream_id, 0).len();
                let fits = message_header_len + body.len() <= self.info.mtu as usize;
                let max_fragment_payload = (self.info.mtu as usize)
                    .saturating_sub(message_header_len + protocol::SUBMESSAGE_HEADER_SIZE);
                stream.push_submessage(
                    &self.info,
                    stream_id,
                    body,
                    fits,
                    max_fragment_payload,
                    timeout,
                    &self.closing,
                )
            }
        }
    }

    pub fn get_next_output_message(&self, stream_id: u8) -> Option<Vec<u8>> {
        match StreamClass::of(stream_id) {
            StreamClass::None => self.none_output.lock().messages.pop_front(),
            StreamClass::BestEffort => self
                .best_effort_outputs
                .read()
                .get(&stream_id)
                .and_then(|s| s.lock().messages.pop_front()),
            StreamClass::Reliable => self
                .reliable_outputs
                .read()
                .get(&stream_id)
                .and_then(|s| s.get_next_message()),
        }
    }

    pub fn get_output_message(&self, stream_id: u8, seq: u16) -> Option<Vec<u8>> {
        self.reliable_outputs
            .read()
            .get(&stream_id)
            .and_then(|s| s.get_message(SeqNum(seq)))
    }

    pub fn update_from_acknack(&self, stream_id: u8, first_unacked: u16) {
        if let Some(stream) = self.reliable_outputs.read().get(&stream_id) {
            stream.update_from_acknack(SeqNum(first_unacked));
        }
    }

    /// Queue the sequences an ACKNACK's bitmap flagged as missing for
    /// re-delivery (spec §4.5.3).
    pub fn queue_retransmit(&self, stream_id: u8, seqs: &[u16]) {
        if let Some(stream) = self.reliable_outputs.read().get(&stream_id) {
            stream.queue_retransmit(seqs);
        }
    }

    /// Fill a HEARTBEAT for `stream_id`; returns `None` if the stream does
    /// not exist yet or has nothing retained.
    pub fn fill_heartbeat(&self, stream_id: u8) -> Option<HeartbeatPayload> {
        let read = self.reliable_outputs.read();
        let stream = read.get(&stream_id)?;
        let (payload, pending) = stream.fill_heartbeat();
        pending.then_some(payload)
    }

    pub fn list_reliable_output_streams(&self) -> Vec<u8> {
        self.reliable_outputs.read().keys().copied().collect()
    }

    /// Every output stream currently holding (or able to hold) traffic,
    /// for a reply-writer thread to drain (spec §4.9, §5).
    pub fn output_stream_ids(&self) -> Vec<u8> {
        let mut ids = vec![protocol::STREAM_ID_NONE];
        ids.extend(self.best_effort_outputs.read().keys().copied());
        ids.extend(self.reliable_outputs.read().keys().copied());
        ids
    }

    /// Clear all stream state (RESET submessage, spec §3 submessage kinds).
    pub fn reset(&self) {
        self.none_input.lock().messages.clear();
        self.best_effort_inputs.lock().clear();
        self.reliable_inputs.lock().clear();
        self.none_output.lock().messages.clear();
        self.best_effort_outputs.write().clear();
        self.reliable_outputs.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DeletePayload, ObjectId, ObjectKind};

    fn info() -> SessionInfo {
        SessionInfo {
            session_id: 0x81,
            client_key: [0, 0, 0, 1],
            mtu: 512,
        }
    }

    fn delete_submsg(serial: u16) -> Submessage {
        Submessage::Delete(DeletePayload {
            object_id: ObjectId::new(ObjectKind::Topic, serial),
        })
    }

    #[test]
    fn reliable_input_delivers_in_order_despite_out_of_order_arrival() {
        let session = Session::new(info(), 16, 16);
        let stream_id = 0x80;
        session.push_input_message(stream_id, 2, vec![(delete_submsg(2), 0)]);
        session.push_input_message(stream_id, 0, vec![(delete_submsg(0), 0)]);
        session.push_input_message(stream_id, 1, vec![(delete_submsg(1), 0)]);

        let first = session.pop_input_message(stream_id).unwrap();
        let second = session.pop_input_message(stream_id).unwrap();
        let third = session.pop_input_message(stream_id).unwrap();
        assert!(session.pop_input_message(stream_id).is_none());

        assert_eq!(first, vec![(delete_submsg(0), 0)]);
        assert_eq!(second, vec![(delete_submsg(1), 0)]);
        assert_eq!(third, vec![(delete_submsg(2), 0)]);

        let ack = session.fill_acknack(stream_id);
        assert_eq!(ack.first_unacked_seq, 3);
        assert_eq!(ack.nack_bitmap, 0);
    }

    #[test]
    fn reliable_input_gap_blocks_pop() {
        let session = Session::new(info(), 16, 16);
        let stream_id = 0x80;
        session.push_input_message(stream_id, 0, vec![(delete_submsg(0), 0)]);
        session.push_input_message(stream_id, 2, vec![(delete_submsg(2), 0)]);

        assert!(session.pop_input_message(stream_id).is_some()); // seq 0
        assert!(session.pop_input_message(stream_id).is_none()); // seq 1 missing
    }

    #[test]
    fn best_effort_input_drops_stale_duplicates() {
        let session = Session::new(info(), 16, 16);
        let stream_id = 0x02;
        assert!(session.push_input_message(stream_id, 5, vec![(delete_submsg(5), 0)]));
        assert!(!session.push_input_message(stream_id, 5, vec![(delete_submsg(5), 0)]));
        assert!(!session.push_input_message(stream_id, 3, vec![(delete_submsg(3), 0)]));
        assert!(session.push_input_message(stream_id, 6, vec![(delete_submsg(6), 0)]));
    }

    #[test]
    fn reliable_output_acknack_invariant_holds() {
        let session = Session::new(info(), 16, 16);
        let stream_id = 0x80;
        for i in 0..5u16 {
            session
                .push_output_submessage(stream_id, delete_submsg(i), 0, Duration::from_millis(10))
                .unwrap();
        }
        // Advance last_sent past seq 2 so the peer's acknack of first_unacked=3
        // is not claiming to have acknowledged messages never sent.
        for _ in 0..3 {
            session.get_next_output_message(stream_id).unwrap();
        }
        session.update_from_acknack(stream_id, 3);
        // Sequences 0,1,2 acknowledged and erased; 3,4 remain retained.
        assert!(session.get_output_message(stream_id, 0).is_none());
        assert!(session.get_output_message(stream_id, 3).is_some());
        assert!(session.get_output_message(stream_id, 4).is_some());
    }

    #[test]
    fn fragmented_push_produces_last_fragment_flag_on_final_piece() {
        let session = Session::new(info(), 16, 16);
        let stream_id = 0x80;
        // mtu small enough, payload large enough to force fragmentation.
        let small_info = SessionInfo {
            mtu: 64,
            ..info()
        };
        let session = Session::new(small_info, 16, 16);
        let payload = vec![0xABu8; 200];
        let submsg = Submessage::WriteData(crate::protocol::WriteDataPayload {
            writer_id: ObjectId::new(ObjectKind::DataWriter, 1),
            data: payload,
        });
        session
            .push_output_submessage(stream_id, submsg, 0, Duration::from_millis(10))
            .unwrap();

        let mut fragments = Vec::new();
        while let Some(bytes) = session.get_next_output_message(stream_id) {
            fragments.push(bytes);
        }
        assert!(fragments.len() > 1);
        for (i, bytes) in fragments.iter().enumerate() {
            let msg = protocol::parse_message(bytes).unwrap();
            let (submsg, flags) = &msg.submessages[0];
            assert!(matches!(submsg, Submessage::Fragment(_)));
            let is_last = i == fragments.len() - 1;
            assert_eq!(Submessage::is_last_fragment(*flags), is_last);
        }
        let _ = session;
    }
}
