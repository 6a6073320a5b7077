//! Kiosk daemon - display controller and application supervisor
//!
//! This crate provides the core infrastructure for the kiosk daemon:
//! - `serial` - Serialized access to the display controller link
//! - `lock_store` - The active-application lock file
//! - `supervisor` - Launching applications and stopping process trees
//! - `apps` - Single-instance application management
//! - `server` - Unix socket server for control clients
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       kioskd daemon                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  DaemonServer   │────▶│        Controller           │   │
//! │  │ (Unix Socket)   │     │  (replies, never fails)     │   │
//! │  └────────┬────────┘     └──────┬───────────────┬──────┘   │
//! │           │                     │               │           │
//! │           │ connections         │ commands      │ apps      │
//! │           ▼                     ▼               ▼           │
//! │  ┌─────────────────┐  ┌──────────────────┐ ┌─────────────┐ │
//! │  │ConnectionHandler│  │ TransportWorker  │ │ AppManager  │ │
//! │  │  (per client)   │  │ (owns the link)  │ │ lock + procs│ │
//! │  └─────────────────┘  └──────────────────┘ └─────────────┘ │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod apps;
pub mod catalog;
pub mod client;
pub mod config;
pub mod controller;
pub mod lock_store;
pub mod process_tree;
pub mod serial;
pub mod server;
pub mod supervisor;
