//! Reply decoding for the serial command protocol.
//!
//! Success for a set command is the literal line `ACK\r`; nothing else
//! counts, not even a well-formed value. Success for a query is the text
//! after the first `=` of the reply, with the terminator stripped.

use thiserror::Error;

use crate::command::{CommandMode, TERMINATOR};

/// Literal acknowledgement line for set commands.
pub const ACK_LINE: &str = "ACK\r";

/// Successful outcome of a serial command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResponse {
    /// Set command acknowledged
    Ack,
    /// Query answered with a value
    Value(String),
    /// Broadcast command written; no reply is ever read
    NoReply,
}

impl CommandResponse {
    /// Returns the queried value, if this is one.
    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Returns true for an acknowledged set command.
    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }
}

/// Errors produced while building or decoding protocol lines.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A command field would break the line framing
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Set command answered with something other than ACK
    #[error("expected ACK, controller replied {line:?}")]
    ExpectedAck { line: String },

    /// Query answered with ACK instead of a value
    #[error("controller acknowledged a query instead of returning a value")]
    UnexpectedAck,

    /// Query reply without `=`
    #[error("reply carries no value: {line:?}")]
    MissingValue { line: String },
}

impl CodecError {
    /// Returns true if the controller answered, but not the way the
    /// command requires.
    pub fn is_protocol_mismatch(&self) -> bool {
        !matches!(self, Self::InvalidField { .. })
    }
}

/// Decodes one terminated reply line for a command of the given mode.
pub fn decode(line: &str, mode: CommandMode) -> Result<CommandResponse, CodecError> {
    let is_ack = line == ACK_LINE;

    match mode {
        CommandMode::Set if is_ack => Ok(CommandResponse::Ack),
        CommandMode::Set => Err(CodecError::ExpectedAck {
            line: line.to_string(),
        }),
        CommandMode::Query if is_ack => Err(CodecError::UnexpectedAck),
        CommandMode::Query => {
            let (_, value) = line.split_once('=').ok_or_else(|| CodecError::MissingValue {
                line: line.to_string(),
            })?;
            let value = value.strip_suffix(TERMINATOR).unwrap_or(value);
            Ok(CommandResponse::Value(value.to_string()))
        }
    }
}
