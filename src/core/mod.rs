// Core modules implementing addressing, dispatch, subscriptions and wire shapes.
pub mod dispatch;
pub mod error;
pub mod feed;
pub mod memory;
pub mod plugin;
pub mod projection;
pub mod protocol;
pub mod registry;
pub mod subscription;
pub mod topic;
