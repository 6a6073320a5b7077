//! Kiosk Protocol - Wire formats for the kiosk control service
//!
//! Two protocols live here:
//! - the serial command protocol spoken to the display controller
//!   ([`command`], [`codec`]), pure and free of I/O
//! - the JSON-lines control protocol spoken on the daemon socket
//!   ([`message`], [`version`])

pub mod codec;
pub mod command;
pub mod message;
pub mod version;

pub use codec::{decode, CodecError, CommandResponse, ACK_LINE};
pub use command::{CommandMode, SerialCommand, BROADCAST_MARKER, DEFAULT_SELECTOR, TERMINATOR};
pub use message::{ClientMessage, DaemonMessage, DisplayAction, MessageType};
pub use version::ProtocolVersion;
