// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Client registry / "Root" (spec §3 "Client registry", §4.7).
//
// The registry is the top-level owner of sessions and proxy-clients,
// keyed by the 32-bit client key the client itself chooses — not by the
// per-session `session_id` octet, which is only a property negotiated
// during CREATE_CLIENT and lives inside `SessionInfo` (spec §3: "each
// client key maps to at most one session"). Grounded in
// `include/agent/Root.h`'s `std::map<int32_t, ProxyClient> clients_`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::error::AgentError;
use crate::middleware::Middleware;
use crate::proxy::ProxyClient;
use crate::session::{Session, SessionInfo};

/// Everything the registry owns for one connected client.
pub struct ClientEntry {
    pub session: Arc<Session>,
    pub proxy: RwLock<ProxyClient>,
    pub last_activity: RwLock<Instant>,
}

impl ClientEntry {
    fn new(session: Session, now: Instant) -> Self {
        Self {
            session: Arc::new(session),
            proxy: RwLock::new(ProxyClient::new()),
            last_activity: RwLock::new(now),
        }
    }

    pub fn touch(&self, now: Instant) {
        *self.last_activity.write() = now;
    }
}

/// Client registry (spec §4.7 "Root"): `map<client_key, client_entry>`.
#[derive(Default)]
pub struct Registry {
    clients: RwLock<HashMap<[u8; 4], Arc<ClientEntry>>>,
    max_clients: usize,
}

impl Registry {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            max_clients,
        }
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    pub fn get_client(&self, client_key: [u8; 4]) -> Option<Arc<ClientEntry>> {
        self.clients.read().get(&client_key).cloned()
    }

    /// Snapshot of every currently registered client, for the background
    /// heartbeat/eviction tasks (spec §4.9, §7).
    pub fn all_entries(&self) -> Vec<Arc<ClientEntry>> {
        self.clients.read().values().cloned().collect()
    }

    /// CREATE_CLIENT handling (spec §4.7): reuse a session with a matching
    /// `session_id`, replace one with a different `session_id`, or insert
    /// fresh. The magic cookie and protocol version are validated by the
    /// caller (the processor) before this is invoked.
    pub fn create_client(
        &self,
        client_key: [u8; 4],
        session_id: u8,
        mtu: u16,
        best_effort_window: usize,
        reliable_window: u16,
        now: Instant,
    ) -> Result<Arc<ClientEntry>, AgentError> {
        let mut clients = self.clients.write();

        if let Some(existing) = clients.get(&client_key) {
            if existing.session.info.session_id == session_id {
                existing.touch(now);
                return Ok(existing.clone());
            }
            // Different session id under the same key: tear down and
            // replace (spec §4.7).
            clients.remove(&client_key);
        } else if clients.len() >= self.max_clients {
            return Err(AgentError::ResourceExhausted);
        }

        let info = SessionInfo {
            session_id,
            client_key,
            mtu,
        };
        let entry = Arc::new(ClientEntry::new(
            Session::new(info, best_effort_window, reliable_window),
            now,
        ));
        clients.insert(client_key, entry.clone());
        Ok(entry)
    }

    /// DELETE_CLIENT handling: destroys the proxy-client tree child-first
    /// and releases the session (spec §4.7).
    pub fn delete_client(
        &self,
        client_key: [u8; 4],
        middleware: &dyn Middleware,
    ) -> Result<(), AgentError> {
        let entry = {
            let mut clients = self.clients.write();
            clients.remove(&client_key).ok_or(AgentError::UnknownReference)?
        };
        entry.session.close();
        let mut proxy = entry.proxy.write();
        for object_id in proxy.object_ids() {
            let _ = proxy.delete_object(object_id, middleware);
        }
        Ok(())
    }

    /// Evict clients inactive for longer than `timeout`, closing their
    /// sessions and tearing down their proxy trees (spec §3, §7).
    pub fn evict_expired(&self, now: Instant, timeout: std::time::Duration, middleware: &dyn Middleware) {
        let expired: Vec<[u8; 4]> = self
            .clients
            .read()
            .iter()
            .filter(|(_, e)| now.duration_since(*e.last_activity.read()) >= timeout)
            .map(|(&k, _)| k)
            .collect();
        for key in expired {
            let _ = self.delete_client(key, middleware);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::NullMiddleware;
    use std::time::Duration;

    fn now() -> Instant {
        Instant::now()
    }

    #[test]
    fn create_client_inserts_new_entry() {
        let reg = Registry::new(4);
        let entry = reg.create_client([0, 0, 0, 1], 0x81, 512, 16, 16, now()).unwrap();
        assert_eq!(entry.session.info.session_id, 0x81);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn create_client_same_session_id_reuses_entry() {
        let reg = Registry::new(4);
        let key = [0, 0, 0, 1];
        let first = reg.create_client(key, 0x81, 512, 16, 16, now()).unwrap();
        let second = reg.create_client(key, 0x81, 512, 16, 16, now()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn create_client_different_session_id_replaces_entry() {
        let reg = Registry::new(4);
        let key = [0, 0, 0, 1];
        let first = reg.create_client(key, 0x81, 512, 16, 16, now()).unwrap();
        let second = reg.create_client(key, 0x82, 512, 16, 16, now()).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.session.info.session_id, 0x82);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn registry_rejects_beyond_max_clients() {
        let reg = Registry::new(1);
        reg.create_client([0, 0, 0, 1], 0x81, 512, 16, 16, now()).unwrap();
        let err = reg.create_client([0, 0, 0, 2], 0x81, 512, 16, 16, now());
        assert!(matches!(err, Err(AgentError::ResourceExhausted)));
    }

    #[test]
    fn delete_client_removes_entry() {
        let reg = Registry::new(4);
        let mw = NullMiddleware::new();
        let key = [0, 0, 0, 1];
        reg.create_client(key, 0x81, 512, 16, 16, now()).unwrap();
        reg.delete_client(key, &mw).unwrap();
        assert!(reg.get_client(key).is_none());
        assert!(matches!(
            reg.delete_client(key, &mw),
            Err(AgentError::UnknownReference)
        ));
    }

    #[test]
    fn evict_expired_removes_stale_clients() {
        let reg = Registry::new(4);
        let mw = NullMiddleware::new();
        let key = [0, 0, 0, 1];
        let created_at = now();
        reg.create_client(key, 0x81, 512, 16, 16, created_at).unwrap();
        let later = created_at + Duration::from_secs(60);
        reg.evict_expired(later, Duration::from_secs(30), &mw);
        assert!(reg.get_client(key).is_none());
    }
}
