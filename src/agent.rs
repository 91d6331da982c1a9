// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Agent orchestrator (spec §5 "Concurrency Model", §4.9).
//!
//! Wires the [`Processor`] to one or more [`Transport`] implementations and
//! owns the background threads spec §5 calls for: a listener per transport,
//! a reply writer per transport, and a single heartbeat timer. Every thread
//! cooperates on a shared stop flag instead of being killed outright, so
//! in-flight sends and session teardown always complete cleanly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::middleware::Middleware;
use crate::processor::Processor;
use crate::transport::Transport;

/// Receive buffer size: large enough for the biggest message a TCP
/// transport's 16-bit length prefix can carry (spec §4.10).
const RECV_BUFFER_SIZE: usize = 65536;

/// How long a listener thread sleeps after `WouldBlock`/no-data before
/// polling its transport again.
const LISTENER_IDLE_POLL_MS: u64 = 5;

/// How long a reply-writer thread sleeps after a pass that drained nothing.
const WRITER_IDLE_POLL_MS: u64 = 5;

/// The running agent: one [`Processor`] plus the background threads
/// servicing whichever transports were attached to it (spec §5).
///
/// Transports are attached with [`Agent::attach_transport`] before
/// [`Agent::spawn_heartbeat_timer`] is called; an agent with no transports
/// attached is a processor with nothing feeding it, useful for tests that
/// drive [`Processor::process`] directly.
pub struct Agent {
    processor: Arc<Processor>,
    stop_flag: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Agent {
    /// Build an agent around `config` and `middleware`. Does not start any
    /// threads; call [`Agent::attach_transport`] and
    /// [`Agent::spawn_heartbeat_timer`] to bring it up.
    pub fn new(config: AgentConfig, middleware: Box<dyn Middleware>) -> Result<Self, AgentError> {
        config.validate()?;
        Ok(Self {
            processor: Arc::new(Processor::new(config, middleware)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        })
    }

    pub fn processor(&self) -> &Arc<Processor> {
        &self.processor
    }

    /// Attach a transport, spawning its listener and reply-writer threads
    /// (spec §5: one listener thread and one reply-writer thread per
    /// configured transport). Both threads share the transport behind a
    /// mutex; the listener's read and the writer's write are independent
    /// operations that never need to interleave within a single I/O call.
    pub fn attach_transport(&mut self, transport: Box<dyn Transport>) {
        let transport = Arc::new(Mutex::new(transport));
        self.spawn_listener(Arc::clone(&transport));
        self.spawn_reply_writer(transport);
    }

    fn spawn_listener(&mut self, transport: Arc<Mutex<Box<dyn Transport>>>) {
        let processor = Arc::clone(&self.processor);
        let stop_flag = Arc::clone(&self.stop_flag);

        let handle = thread::spawn(move || {
            let mut buf = vec![0u8; RECV_BUFFER_SIZE];
            while !stop_flag.load(Ordering::Relaxed) {
                let received = transport
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .recv(&mut buf);
                match received {
                    Ok((len, source)) => {
                        if let Err(e) = processor.process(&source, &buf[..len], Instant::now()) {
                            log::debug!("agent: dropped message from {source:?}: {e}");
                        }
                    }
                    Err(AgentError::WouldBlock) | Err(AgentError::ConnectionClosed) => {
                        thread::sleep(Duration::from_millis(LISTENER_IDLE_POLL_MS));
                    }
                    Err(e) => {
                        log::warn!("agent: transport receive error: {e}");
                        thread::sleep(Duration::from_millis(LISTENER_IDLE_POLL_MS));
                    }
                }
            }
        });
        self.handles.push(handle);
    }

    /// Reply-writer thread (spec §4.9 "all replies are placed on the
    /// appropriate output stream"): drains every client's output streams
    /// and hands the framed bytes to the transport they are bound to.
    fn spawn_reply_writer(&mut self, transport: Arc<Mutex<Box<dyn Transport>>>) {
        let processor = Arc::clone(&self.processor);
        let stop_flag = Arc::clone(&self.stop_flag);

        let handle = thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                let mut drained_any = false;
                for entry in processor.registry().all_entries() {
                    let client_key = entry.session.info.client_key;
                    let Some(addr) = processor.endpoint_of(client_key) else {
                        continue;
                    };
                    for stream_id in entry.session.output_stream_ids() {
                        while let Some(bytes) = entry.session.get_next_output_message(stream_id) {
                            drained_any = true;
                            let mut guard = transport.lock().unwrap_or_else(|e| e.into_inner());
                            if let Err(e) = guard.send(&addr, &bytes) {
                                log::warn!(
                                    "agent: send to {addr:?} on stream {stream_id:#x} failed: {e}"
                                );
                                break;
                            }
                        }
                    }
                }
                if !drained_any {
                    thread::sleep(Duration::from_millis(WRITER_IDLE_POLL_MS));
                }
            }
        });
        self.handles.push(handle);
    }

    /// Background heartbeat/eviction timer (spec §4.9 last paragraph, §3,
    /// §7): periodically re-sends HEARTBEAT/ACKNACK for reliable streams
    /// and evicts clients past their inactivity timeout.
    pub fn spawn_heartbeat_timer(&mut self) {
        let processor = Arc::clone(&self.processor);
        let stop_flag = Arc::clone(&self.stop_flag);
        let period = Duration::from_millis(processor.heartbeat_period_ms());

        let handle = thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                thread::sleep(period);
                if stop_flag.load(Ordering::Relaxed) {
                    break;
                }
                processor.run_heartbeat_tick();
                processor.evict_expired(Instant::now());
            }
        });
        self.handles.push(handle);
    }

    /// Signal every background thread to stop, wake any session waiting on
    /// reliable-output window space, and join them all.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        for entry in self.processor.registry().all_entries() {
            entry.session.close();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::NullMiddleware;

    #[test]
    fn agent_builds_from_default_config() {
        let agent = Agent::new(AgentConfig::default(), Box::new(NullMiddleware::new())).unwrap();
        assert!(agent.processor().registry().is_empty());
    }

    #[test]
    fn agent_rejects_invalid_config() {
        let mut config = AgentConfig::default();
        config.max_clients = 0;
        let err = Agent::new(config, Box::new(NullMiddleware::new()));
        assert!(matches!(err, Err(AgentError::Config(_))));
    }

    #[test]
    fn stop_joins_background_threads_without_transports() {
        let mut agent = Agent::new(AgentConfig::default(), Box::new(NullMiddleware::new())).unwrap();
        agent.spawn_heartbeat_timer();
        agent.stop();
        assert!(agent.handles.is_empty());
    }
}
