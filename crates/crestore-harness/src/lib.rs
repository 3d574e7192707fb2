//! # crestore-harness
//!
//! Drives a container runtime through checkpoint and restore and decides
//! whether the runtime preserved what it must.
//!
//! - **signal**: termination signals become a cooperative abort flag.
//! - **context**: the run-local temp directory and success flag, released
//!   on drop.
//! - **sequencer**: the scenario state machine for both restore variants.
//! - **checker**: post-restore invariants.
//! - **reporter**: one verdict for the whole run.
//! - **run**: capability gate plus both scenarios in order.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod checker;
pub mod context;
pub mod reporter;
pub mod run;
pub mod sequencer;
pub mod signal;
pub mod trace;
