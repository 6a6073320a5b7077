//! Kiosk Core - Shared types for the kiosk control service
//!
//! This crate provides the domain types shared between the daemon
//! (kioskd), its wire protocol and the control CLI (kioskctl).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod app;
pub mod error;
pub mod lock;

// Re-exports for convenience
pub use app::{AppDescriptor, AppName, DEFAULT_APP_DESCRIPTION};
pub use error::{DomainError, DomainResult};
pub use lock::LockRecord;
