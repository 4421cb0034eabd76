//! Purpose: Define the public Rust API boundary for switchyard.
//! Exports: Plugin interface, registry, dispatcher, subscription engine and wire types.
//! Role: Stable surface for plugins and transports; hides internal module layout.
//! Invariants: This module is the only public path to core types.

pub use crate::core::dispatch::{Dispatcher, Operation};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::feed::{ChangeFeed, ElementCell};
pub use crate::core::memory::MemoryResource;
pub use crate::core::plugin::{
    Capabilities, Capability, ChangeKind, ChangeStream, Element, Payload, Resource,
    ResourceChange, Service,
};
pub use crate::core::projection::{IDENTITY_FIELDS, ListBound, Projection};
pub use crate::core::protocol::{ClientMessage, Frame, MessageType, decode_message, ok_envelope};
pub use crate::core::registry::{Registry, RegistryBuilder, ResourceRef, resource_uri, service_uri};
pub use crate::core::subscription::{ConnectionId, Session, SubscriptionEngine};
pub use crate::core::topic::{Address, resolve as resolve_topic};
