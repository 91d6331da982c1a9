// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Proxy-client object tree (spec §3 "Proxy-client tree", §4.8, §9
// "Cyclic and parent/child graphs").
//
// Each connected client's view of its DDS entities is a map from
// `ObjectId` to an entity descriptor. Parent/child links are stored as
// child-holds-parent-id only; deletion walks a side index from parent id
// to its children, as the design notes prescribe.

use std::collections::HashMap;

use crate::error::AgentError;
use crate::middleware::{EntityHandle, Middleware};
use crate::protocol::{ObjectId, ObjectKind, ObjectRepresentation};

/// Whether a CREATE should reuse/replace an existing object at the same id.
pub use crate::protocol::CreationMode;

/// Outcome of [`ProxyClient::create`] (spec §4.8's table; the two `Ok`
/// shades map to `StatusCode::Ok` / `StatusCode::OkMatched` at the wire
/// layer, kept separate here so the caller can log accordingly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new entity was created (and any prior entity at that id replaced).
    Created,
    /// An existing entity matched the request; nothing was recreated.
    Matched,
}

#[derive(Debug, Clone)]
struct Entity {
    kind: ObjectKind,
    parent: Option<ObjectId>,
    handle: EntityHandle,
    representation: ObjectRepresentation,
}

/// The expected parent kind for each object kind, and the parent id the
/// representation names (spec §4.8's `datawriter->publisher->participant`
/// chain). Root-level kinds (participant, application, qos profile, type)
/// have no parent.
fn expected_parent(representation: &ObjectRepresentation) -> Option<(ObjectKind, ObjectId)> {
    match representation {
        ObjectRepresentation::Topic { participant_id, .. } => {
            Some((ObjectKind::Participant, *participant_id))
        }
        ObjectRepresentation::Publisher { participant_id }
        | ObjectRepresentation::Subscriber { participant_id } => {
            Some((ObjectKind::Participant, *participant_id))
        }
        ObjectRepresentation::DataWriter { publisher_id, .. } => {
            Some((ObjectKind::Publisher, *publisher_id))
        }
        ObjectRepresentation::DataReader { subscriber_id, .. } => {
            Some((ObjectKind::Subscriber, *subscriber_id))
        }
        ObjectRepresentation::Requester { participant_id, .. }
        | ObjectRepresentation::Replier { participant_id, .. } => {
            Some((ObjectKind::Participant, *participant_id))
        }
        ObjectRepresentation::Participant { .. }
        | ObjectRepresentation::Application { .. }
        | ObjectRepresentation::QosProfile { .. }
        | ObjectRepresentation::Type { .. } => None,
    }
}

/// One connected client's tree of proxy DDS entities.
#[derive(Debug, Default)]
pub struct ProxyClient {
    objects: HashMap<ObjectId, Entity>,
    /// parent id -> children ids, maintained alongside `objects` for
    /// cascading deletes without a tree walk.
    children: HashMap<ObjectId, Vec<ObjectId>>,
}

impl ProxyClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, object_id: ObjectId) -> bool {
        self.objects.contains_key(&object_id)
    }

    pub fn handle_of(&self, object_id: ObjectId) -> Option<EntityHandle> {
        self.objects.get(&object_id).map(|e| e.handle)
    }

    /// Root-level object ids (no parent) — the starting points for a
    /// full-tree teardown (spec §4.7 `delete_client`).
    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.objects
            .iter()
            .filter(|(_, e)| e.parent.is_none())
            .map(|(&id, _)| id)
            .collect()
    }

    /// Create (or match/replace) an object per spec §4.8's table.
    pub fn create(
        &mut self,
        object_id: ObjectId,
        mode: CreationMode,
        representation: ObjectRepresentation,
        middleware: &dyn Middleware,
    ) -> Result<CreateOutcome, AgentError> {
        let kind = representation.kind();
        if object_id.kind()? != kind {
            return Err(AgentError::InvalidData(
                "object_id kind nibble does not match representation",
            ));
        }

        let parent = match expected_parent(&representation) {
            Some((expected_kind, parent_id)) => {
                let parent_entity = self
                    .objects
                    .get(&parent_id)
                    .ok_or(AgentError::UnknownReference)?;
                if parent_entity.kind != expected_kind {
                    return Err(AgentError::InvalidData("parent object kind mismatch"));
                }
                Some(parent_id)
            }
            None => None,
        };

        match self.objects.get(&object_id) {
            None => {
                self.insert(object_id, kind, parent, representation, middleware)?;
                Ok(CreateOutcome::Created)
            }
            Some(existing) => {
                if mode.reuse {
                    if middleware.matches(existing.handle, &representation)? {
                        return Ok(CreateOutcome::Matched);
                    }
                    if !mode.replace {
                        return Err(AgentError::Mismatch);
                    }
                    self.replace(object_id, kind, parent, representation, middleware)?;
                    Ok(CreateOutcome::Created)
                } else if mode.replace {
                    self.replace(object_id, kind, parent, representation, middleware)?;
                    Ok(CreateOutcome::Created)
                } else {
                    Err(AgentError::AlreadyExists)
                }
            }
        }
    }

    fn insert(
        &mut self,
        object_id: ObjectId,
        kind: ObjectKind,
        parent: Option<ObjectId>,
        representation: ObjectRepresentation,
        middleware: &dyn Middleware,
    ) -> Result<(), AgentError> {
        let parent_handle = parent.and_then(|p| self.handle_of(p));
        let handle = middleware.create_entity(parent_handle, &representation)?;
        self.objects.insert(
            object_id,
            Entity {
                kind,
                parent,
                handle,
                representation,
            },
        );
        if let Some(parent_id) = parent {
            self.children.entry(parent_id).or_default().push(object_id);
        }
        Ok(())
    }

    fn replace(
        &mut self,
        object_id: ObjectId,
        kind: ObjectKind,
        parent: Option<ObjectId>,
        representation: ObjectRepresentation,
        middleware: &dyn Middleware,
    ) -> Result<(), AgentError> {
        self.delete_object(object_id, middleware)?;
        self.insert(object_id, kind, parent, representation, middleware)
    }

    /// Delete an object and, for containers, all descendants (child-first).
    pub fn delete_object(
        &mut self,
        object_id: ObjectId,
        middleware: &dyn Middleware,
    ) -> Result<(), AgentError> {
        if !self.objects.contains_key(&object_id) {
            return Err(AgentError::UnknownReference);
        }
        // Post-order: delete every descendant before the object itself.
        let mut order = Vec::new();
        self.collect_postorder(object_id, &mut order);
        for id in order {
            if let Some(entity) = self.objects.remove(&id) {
                let _ = middleware.delete_entity(entity.handle);
                if let Some(parent_id) = entity.parent {
                    if let Some(siblings) = self.children.get_mut(&parent_id) {
                        siblings.retain(|&c| c != id);
                    }
                }
            }
            self.children.remove(&id);
        }
        Ok(())
    }

    fn collect_postorder(&self, object_id: ObjectId, out: &mut Vec<ObjectId>) {
        if let Some(kids) = self.children.get(&object_id) {
            for &child in kids.clone().iter() {
                self.collect_postorder(child, out);
            }
        }
        out.push(object_id);
    }

    /// Every resident entity with a parent id has a living parent of the
    /// expected kind, or is parentless (spec §8 proxy-client invariant).
    #[cfg(test)]
    fn check_invariants(&self) -> bool {
        self.objects.values().all(|e| match e.parent {
            None => true,
            Some(parent_id) => self.objects.contains_key(&parent_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::NullMiddleware;

    fn participant(id: u16) -> (ObjectId, ObjectRepresentation) {
        (
            ObjectId::new(ObjectKind::Participant, id),
            ObjectRepresentation::Participant { domain_id: 0 },
        )
    }

    #[test]
    fn create_participant_then_child_topic() {
        let mw = NullMiddleware::new();
        let mut pc = ProxyClient::new();
        let (pid, rep) = participant(1);
        assert_eq!(
            pc.create(pid, CreationMode::default(), rep, &mw).unwrap(),
            CreateOutcome::Created
        );

        let topic_id = ObjectId::new(ObjectKind::Topic, 1);
        let topic_rep = ObjectRepresentation::Topic {
            participant_id: pid,
            name: "chatter".into(),
            type_name: "std_msgs/String".into(),
        };
        assert_eq!(
            pc.create(topic_id, CreationMode::default(), topic_rep, &mw)
                .unwrap(),
            CreateOutcome::Created
        );
        assert!(pc.check_invariants());
    }

    #[test]
    fn topic_with_unknown_participant_is_rejected() {
        let mw = NullMiddleware::new();
        let mut pc = ProxyClient::new();
        let topic_id = ObjectId::new(ObjectKind::Topic, 1);
        let topic_rep = ObjectRepresentation::Topic {
            participant_id: ObjectId::new(ObjectKind::Participant, 9),
            name: "chatter".into(),
            type_name: "std_msgs/String".into(),
        };
        assert!(matches!(
            pc.create(topic_id, CreationMode::default(), topic_rep, &mw),
            Err(AgentError::UnknownReference)
        ));
    }

    #[test]
    fn create_without_reuse_or_replace_on_existing_is_already_exists() {
        let mw = NullMiddleware::new();
        let mut pc = ProxyClient::new();
        let (pid, rep) = participant(1);
        pc.create(pid, CreationMode::default(), rep.clone(), &mw)
            .unwrap();
        assert!(matches!(
            pc.create(pid, CreationMode::default(), rep, &mw),
            Err(AgentError::AlreadyExists)
        ));
    }

    #[test]
    fn reuse_matched_does_not_recreate() {
        let mw = NullMiddleware::new();
        let mut pc = ProxyClient::new();
        let (pid, rep) = participant(1);
        pc.create(pid, CreationMode::default(), rep.clone(), &mw)
            .unwrap();
        let handle_before = pc.handle_of(pid).unwrap();

        let mode = CreationMode {
            reuse: true,
            replace: true,
        };
        let outcome = pc.create(pid, mode, rep, &mw).unwrap();
        assert_eq!(outcome, CreateOutcome::Matched);
        assert_eq!(pc.handle_of(pid).unwrap(), handle_before);
    }

    #[test]
    fn deleting_participant_cascades_to_children() {
        let mw = NullMiddleware::new();
        let mut pc = ProxyClient::new();
        let (pid, rep) = participant(1);
        pc.create(pid, CreationMode::default(), rep, &mw).unwrap();
        let topic_id = ObjectId::new(ObjectKind::Topic, 1);
        let topic_rep = ObjectRepresentation::Topic {
            participant_id: pid,
            name: "chatter".into(),
            type_name: "std_msgs/String".into(),
        };
        pc.create(topic_id, CreationMode::default(), topic_rep, &mw)
            .unwrap();

        pc.delete_object(pid, &mw).unwrap();
        assert!(!pc.contains(pid));
        assert!(!pc.contains(topic_id));
    }

    #[test]
    fn delete_unknown_object_is_unknown_reference() {
        let mw = NullMiddleware::new();
        let mut pc = ProxyClient::new();
        assert!(matches!(
            pc.delete_object(ObjectId::new(ObjectKind::Topic, 1), &mw),
            Err(AgentError::UnknownReference)
        ));
    }
}
