#![allow(clippy::collapsible_else_if)]

pub mod client;
pub mod crypto;
pub mod diff;
pub mod server;
pub mod signal;

pub use crate::{
    client::Client,
    diff::{SyncDiffEngine, SyncDirection, SyncOptions, SyncPlan},
};
