// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// The middleware façade (spec §1, §4.9; glossary "Middleware").
//
// Entity creation/deletion/matching and sample transport live in a real
// publish-subscribe stack external to this crate. This trait is the seam:
// the session/stream subsystem only ever calls through it.

use crate::error::AgentError;
use crate::protocol::ObjectRepresentation;

/// A handle to an entity realized by the middleware, opaque to this crate.
pub type EntityHandle = u64;

/// The pluggable collaborator that realizes the proxy-client's object tree
/// on a real publish-subscribe transport (spec §1 "middleware", §4.8/§4.9).
///
/// Every method takes the *parent's* middleware handle (not the XRCE
/// `ObjectId`) so a middleware implementation never has to understand XRCE
/// object-id encoding.
pub trait Middleware: Send + Sync {
    /// Realize `representation` as a middleware entity under `parent`
    /// (`None` for participants, which have no middleware parent).
    /// Returns the new entity's handle.
    fn create_entity(
        &self,
        parent: Option<EntityHandle>,
        representation: &ObjectRepresentation,
    ) -> Result<EntityHandle, AgentError>;

    /// Whether `representation` would produce an entity semantically
    /// equivalent to the one already realized at `existing` (spec §4.8
    /// "Matches": same domain id for participant, same topic name for
    /// topic, same backing topic for endpoints).
    fn matches(
        &self,
        existing: EntityHandle,
        representation: &ObjectRepresentation,
    ) -> Result<bool, AgentError>;

    /// Tear down a previously created entity. Idempotent: deleting an
    /// already-deleted handle is not an error at this layer (the proxy
    /// client tree is the source of truth for what still exists).
    fn delete_entity(&self, handle: EntityHandle) -> Result<(), AgentError>;

    /// Publish `data` through the datawriter at `handle`.
    fn write(&self, handle: EntityHandle, data: &[u8]) -> Result<(), AgentError>;

    /// Register interest in samples from the datareader at `handle`; up to
    /// `max_samples` samples should subsequently be delivered through
    /// [`Middleware::poll_samples`] (spec §4.9 READ_DATA).
    fn read(&self, handle: EntityHandle, max_samples: u16) -> Result<(), AgentError>;

    /// Drain samples made available by prior `read` calls across all
    /// datareaders. Returns `(reader_handle, payload)` pairs; the caller
    /// (the processor) wraps each as a DATA submessage on the requester's
    /// chosen return stream.
    fn poll_samples(&self) -> Vec<(EntityHandle, Vec<u8>)>;

    /// Load an out-of-band configuration/profile file (spec §4.7
    /// `load_config_file`). XML/reference-profile parsing is external to
    /// this crate; the middleware owns the format.
    fn load_config_file(&self, _path: &str) -> Result<(), AgentError> {
        Err(AgentError::Unsupported("load_config_file"))
    }
}

/// A no-op middleware that always succeeds and never produces samples.
/// Useful for exercising the session/stream subsystem in isolation.
#[derive(Debug, Default)]
pub struct NullMiddleware {
    next_handle: std::sync::atomic::AtomicU64,
}

impl NullMiddleware {
    pub fn new() -> Self {
        Self {
            next_handle: std::sync::atomic::AtomicU64::new(1),
        }
    }
}

impl Middleware for NullMiddleware {
    fn create_entity(
        &self,
        _parent: Option<EntityHandle>,
        _representation: &ObjectRepresentation,
    ) -> Result<EntityHandle, AgentError> {
        Ok(self
            .next_handle
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed))
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

    fn write(&self, _handle: EntityHandle, _data: &[u8]) -> Result<(), AgentError> {
        Ok(())
    }

    fn read(&self, _handle: EntityHandle, _max_samples: u16) -> Result<(), AgentError> {
        Ok(())
    }

    fn poll_samples(&self) -> Vec<(EntityHandle, Vec<u8>)> {
        Vec::new()
    }
}
