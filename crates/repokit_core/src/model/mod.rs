//! Generic domain record model.
//!
//! # Responsibility
//! - Define the entity contract every repository works against.
//! - Keep one metadata shape (id, timestamps, tombstone) for all entities.
//!
//! # Invariants
//! - Every entity is identified by a stable key.
//! - Deletion is represented by soft-delete tombstones unless hard-deleted.

pub mod entity;
