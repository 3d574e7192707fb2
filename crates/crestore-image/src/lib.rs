//! # crestore-image
//!
//! Image handling for the image-mediated restore path.
//!
//! Handles:
//! - **Hashing**: SHA-256 digests that pin a checkpoint archive between
//!   export and consumption.
//! - **Converter**: wrapping a checkpoint archive as a single-layer image
//!   and exporting it to disk.
//! - **Store**: importing the exported image into the runtime's image store
//!   and removing it again.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod converter;
pub mod hash;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod store;
