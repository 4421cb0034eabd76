//! Purpose: Define the interface plugins implement to expose services, resources and elements.
//! Exports: `Service`, `Resource`, `Element`, `Capability`, `Capabilities`, `ResourceChange`,
//! `ChangeKind`, `ChangeStream`, `Payload`.
//! Role: Seam between the dispatch/subscription core and plugin-owned state.
//! Invariants: The core calls an optional operation only when its capability is declared.
//! Invariants: Element lookup is always available; it backs update and element subscriptions.
//! Invariants: Plugins own all mutation; the core only reads snapshots.
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{Map, Value};

use super::error::Error;
use super::projection::ListBound;

/// Element payload: a JSON object that always carries `id`, `name` and `uri`.
pub type Payload = Map<String, Value>;

/// Continuous notification of changes. An `Err` item ends the consumer's subscription.
pub type ChangeStream<T> = BoxStream<'static, Result<T, Error>>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Capability {
    List,
    Get,
    Create,
    Update,
    Delete,
    ResourceSubscribe,
    ElementSubscribe,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::List,
        Capability::Get,
        Capability::Create,
        Capability::Update,
        Capability::Delete,
        Capability::ResourceSubscribe,
        Capability::ElementSubscribe,
    ];

    fn bit(self) -> u8 {
        match self {
            Capability::List => 1,
            Capability::Get => 1 << 1,
            Capability::Create => 1 << 2,
            Capability::Update => 1 << 3,
            Capability::Delete => 1 << 4,
            Capability::ResourceSubscribe => 1 << 5,
            Capability::ElementSubscribe => 1 << 6,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::List => "list",
            Capability::Get => "get",
            Capability::Create => "create",
            Capability::Update => "update",
            Capability::Delete => "delete",
            Capability::ResourceSubscribe => "resource subscription",
            Capability::ElementSubscribe => "element subscription",
        };
        f.write_str(name)
    }
}

/// Fixed set of operations a resource supports.
#[derive(Clone, Copy, Default, Eq, PartialEq)]
pub struct Capabilities(u8);

impl Capabilities {
    pub fn none() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Capability::ALL
            .iter()
            .fold(Self::none(), |caps, cap| caps.with(*cap))
    }

    pub fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    pub fn without(self, capability: Capability) -> Self {
        Self(self.0 & !capability.bit())
    }

    pub fn has(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL.into_iter().filter(move |cap| self.has(*cap))
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::none(), |caps, cap| caps.with(cap))
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

/// Resource-level change notification. The core treats it as a trigger only.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceChange {
    pub kind: ChangeKind,
    pub element_id: Option<String>,
}

impl ResourceChange {
    pub fn new(kind: ChangeKind, element_id: impl Into<String>) -> Self {
        Self {
            kind,
            element_id: Some(element_id.into()),
        }
    }
}

pub trait Element: Send + Sync {
    fn id(&self) -> &str;

    /// Current payload.
    fn snapshot(&self) -> Payload;

    /// Payload changes; plugins decide whether the current value is replayed first.
    fn changes(&self) -> ChangeStream<Payload>;
}

/// A collection of elements of one kind.
///
/// Optional operations have defaults that behave as "absent"; the dispatcher never calls
/// them unless `capabilities` declares the matching [`Capability`].
pub trait Resource: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    fn element(&self, id: &str) -> Option<Arc<dyn Element>>;

    fn list(
        &self,
        _offset: Option<&ListBound>,
        _limit: Option<&ListBound>,
    ) -> Option<Vec<Arc<dyn Element>>> {
        None
    }

    fn create(&self, _payload: Payload) -> Option<Arc<dyn Element>> {
        None
    }

    fn update(&self, _id: &str, _payload: Payload) -> bool {
        false
    }

    fn delete(&self, _id: &str) -> bool {
        false
    }

    fn changes(&self) -> ChangeStream<ResourceChange> {
        stream::empty().boxed()
    }
}

pub struct Service {
    id: String,
    name: String,
    resources: Vec<Arc<dyn Resource>>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            resources: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_resource(mut self, resource: Arc<dyn Resource>) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resources(&self) -> &[Arc<dyn Resource>] {
        &self.resources
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.id)
            .field("name", &self.name)
            .field(
                "resources",
                &self.resources.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Capabilities, Capability};

    #[test]
    fn capabilities_compose() {
        let caps = Capabilities::none()
            .with(Capability::List)
            .with(Capability::Get);
        assert!(caps.has(Capability::List));
        assert!(caps.has(Capability::Get));
        assert!(!caps.has(Capability::Delete));
        assert!(!caps.without(Capability::List).has(Capability::List));
    }

    #[test]
    fn all_contains_every_capability() {
        let caps = Capabilities::all();
        for cap in Capability::ALL {
            assert!(caps.has(cap), "missing {cap}");
        }
        assert_eq!(caps.iter().count(), Capability::ALL.len());
    }

    #[test]
    fn collects_from_iterator() {
        let caps: Capabilities = [Capability::Create, Capability::ElementSubscribe]
            .into_iter()
            .collect();
        assert_eq!(
            caps.iter().collect::<Vec<_>>(),
            vec![Capability::Create, Capability::ElementSubscribe]
        );
    }
}
