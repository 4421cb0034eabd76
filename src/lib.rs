//! Purpose: Library crate backing the `switchyard` server binary and its tests.
//! Exports: `api` (registry, plugin interface, dispatcher, subscription engine, wire shapes).
//! Role: Transport-neutral core; HTTP/WebSocket plumbing lives in the binary.
//! Invariants: Plugins are reached only through `api::Resource`/`api::Element`.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
mod core;
