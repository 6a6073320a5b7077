//! Serial transport for the display controller.
//!
//! ```text
//! ┌──────────────────┐   mpsc   ┌──────────────────┐  open/write/read  ┌────────────┐
//! │ TransportHandle  │─────────▶│ TransportWorker  │──────────────────▶│ SerialLink │
//! │ (any task)       │◀─────────│ (single task)    │◀──────────────────│ (device)   │
//! └──────────────────┘ oneshot  └──────────────────┘   closed on drop  └────────────┘
//! ```
//!
//! Every command gets a freshly opened link, one write, and at most one
//! bounded read. Broadcast commands skip the read entirely.

mod link;
mod memory;
mod transport;

pub use link::{LinkStream, SerialLink, SerialPortLink};
pub use memory::MemoryLink;
pub use transport::{
    read_reply, spawn_transport, TransportError, TransportHandle, DEFAULT_RESPONSE_TIMEOUT,
    MAX_REPLY_LEN,
};
