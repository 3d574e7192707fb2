//! Control-plane plumbing for the crestore harness.
//!
//! - **exec**: deadline-bounded execution of external commands.
//! - **probe**: host capability gate run before any scenario.
//! - **backend**: the [`backend::ControlPlane`] trait and its `crictl` client.
//! - **payload**: field patching of pod and container request templates.
//! - **container**: harness-side pod and container lifecycle records.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod backend;
pub mod container;
pub mod exec;
pub mod payload;
pub mod probe;
