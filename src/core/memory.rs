//! Purpose: Generic in-memory resource usable by plugins, the demo service and tests.
//! Exports: `MemoryResource`.
//! Role: Reference implementation of `Resource` with configurable capabilities.
//! Invariants: Elements keep insertion order; ids are lower-case UUIDs.
//! Invariants: Every create/update/delete publishes exactly one `ResourceChange`.
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use super::feed::{ChangeFeed, ElementCell};
use super::plugin::{
    Capabilities, ChangeKind, ChangeStream, Element, Payload, Resource, ResourceChange,
};
use super::projection::ListBound;
use super::registry::resource_uri;

pub struct MemoryResource {
    name: String,
    base_uri: String,
    capabilities: Capabilities,
    elements: RwLock<Vec<Arc<ElementCell>>>,
    changes: ChangeFeed<ResourceChange>,
}

impl MemoryResource {
    pub fn new(service: &str, name: impl Into<String>, capabilities: Capabilities) -> Self {
        let name = name.into();
        Self {
            base_uri: resource_uri(service, &name),
            name,
            capabilities,
            elements: RwLock::new(Vec::new()),
            changes: ChangeFeed::new(),
        }
    }

    /// Insert an element with a fresh id, filling in `id`, `uri` and a default `name`.
    pub fn insert(&self, payload: Payload) -> Arc<ElementCell> {
        self.insert_with_id(&uuid::Uuid::new_v4().to_string(), payload)
    }

    pub fn insert_with_id(&self, id: &str, mut payload: Payload) -> Arc<ElementCell> {
        let id = id.to_lowercase();
        payload.insert("id".to_string(), Value::String(id.clone()));
        payload.insert("uri".to_string(), Value::String(format!("{}{id}", self.base_uri)));
        payload
            .entry("name".to_string())
            .or_insert_with(|| Value::String(id.clone()));
        let cell = Arc::new(ElementCell::new(id.clone(), payload));
        self.elements
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&cell));
        self.changes
            .publish(ResourceChange::new(ChangeKind::Added, id));
        cell
    }

    pub fn cell(&self, id: &str) -> Option<Arc<ElementCell>> {
        let id = id.to_lowercase();
        self.elements
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|cell| cell.id() == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.elements
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Resource for MemoryResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn element(&self, id: &str) -> Option<Arc<dyn Element>> {
        self.cell(id).map(|cell| cell as Arc<dyn Element>)
    }

    /// Numeric bounds are indexes. A token offset names the first element to include;
    /// a token limit is not understood and yields no listing.
    fn list(
        &self,
        offset: Option<&ListBound>,
        limit: Option<&ListBound>,
    ) -> Option<Vec<Arc<dyn Element>>> {
        let elements = self.elements.read().unwrap_or_else(PoisonError::into_inner);
        let start = match offset {
            None => 0,
            Some(ListBound::Token(id)) => {
                let id = id.to_lowercase();
                elements.iter().position(|cell| cell.id() == id)?
            }
            Some(bound) => bound.as_index()?,
        };
        let take = match limit {
            None => usize::MAX,
            Some(bound) => bound.as_index()?,
        };
        Some(
            elements
                .iter()
                .skip(start)
                .take(take)
                .map(|cell| Arc::clone(cell) as Arc<dyn Element>)
                .collect(),
        )
    }

    fn create(&self, payload: Payload) -> Option<Arc<dyn Element>> {
        Some(self.insert(payload) as Arc<dyn Element>)
    }

    fn update(&self, id: &str, payload: Payload) -> bool {
        let Some(cell) = self.cell(id) else {
            return false;
        };
        cell.merge(payload);
        self.changes
            .publish(ResourceChange::new(ChangeKind::Changed, cell.id()));
        true
    }

    fn delete(&self, id: &str) -> bool {
        let id = id.to_lowercase();
        let removed = {
            let mut elements = self.elements.write().unwrap_or_else(PoisonError::into_inner);
            let before = elements.len();
            elements.retain(|cell| cell.id() != id);
            elements.len() != before
        };
        if removed {
            self.changes
                .publish(ResourceChange::new(ChangeKind::Removed, id));
        }
        removed
    }

    fn changes(&self) -> ChangeStream<ResourceChange> {
        self.changes.subscribe()
    }
}
