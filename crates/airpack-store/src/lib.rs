//! # Airpack Store
//!
//! In-memory implementation of the core's `Storage` contract. This is the
//! storage the core ships with: production deployments substitute their
//! own database-backed implementation behind the same trait.

mod memory;

pub use memory::MemoryStore;
