//! Storage layer for the convention companion cache
//!
//! This crate provides the asynchronous key-value backend that persisted
//! cache keys are written to, with a sled-backed on-device implementation
//! and an in-memory implementation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod kv;
pub mod memory;

pub use kv::{Result, SledConfig, SledStorage, StorageBackend, StorageError};
pub use memory::MemoryStorage;
