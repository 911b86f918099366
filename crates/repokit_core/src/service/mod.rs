//! Core use-case services.
//!
//! # Responsibility
//! - Compose a repository with a transaction manager.
//! - Give every mutation all-or-nothing semantics.
//!
//! # Invariants
//! - Services add no error translation; repository errors surface unchanged.
//! - Service layer remains storage-agnostic.

pub mod crud_service;

pub use crud_service::Service;
