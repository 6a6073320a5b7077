//! Serial command construction and encoding.
//!
//! A command is one ASCII line terminated by a carriage return:
//!
//! ```text
//! <kind><selector><command>[(<sub_target>)]=<value>\r   set
//! <kind><selector><command>[(<sub_target>)]?\r          query
//! ```

use std::fmt;

use crate::codec::CodecError;

/// Default command kind.
pub const DEFAULT_KIND: &str = "op";

/// Default target selector (first display).
pub const DEFAULT_SELECTOR: &str = "A1";

/// Selector character that addresses every device at once.
pub const BROADCAST_MARKER: char = '*';

/// Line terminator for commands and replies.
pub const TERMINATOR: char = '\r';

/// Whether a command writes a value or reads one back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandMode {
    /// `=<value>` command, answered by a literal `ACK`
    Set,
    /// `?` command, answered by `<echo>=<value>`
    Query,
}

/// A single command for the display controller.
///
/// Built with [`SerialCommand::query`] or [`SerialCommand::set`] and the
/// `with_*` builders. Fields cannot be changed after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialCommand {
    kind: String,
    selector: String,
    command: String,
    sub_target: Option<String>,
    value: Option<String>,
}

impl SerialCommand {
    /// Creates a query for `command` on the default selector.
    pub fn query(command: impl Into<String>) -> Self {
        Self {
            kind: DEFAULT_KIND.to_string(),
            selector: DEFAULT_SELECTOR.to_string(),
            command: command.into(),
            sub_target: None,
            value: None,
        }
    }

    /// Creates a set command for `command` on the default selector.
    ///
    /// An empty value carries no information on the wire and turns the
    /// command into a query.
    pub fn set(command: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            value: (!value.is_empty()).then_some(value),
            ..Self::query(command)
        }
    }

    /// Replaces the command kind (`op` by default).
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Replaces the target selector (`A1` by default).
    #[must_use]
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = selector.into();
        self
    }

    /// Adds a sub-target, encoded as `(<sub_target>)`.
    #[must_use]
    pub fn with_sub_target(mut self, sub_target: impl Into<String>) -> Self {
        let sub_target = sub_target.into();
        self.sub_target = (!sub_target.is_empty()).then_some(sub_target);
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn sub_target(&self) -> Option<&str> {
        self.sub_target.as_deref()
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Returns whether this is a set or a query.
    pub fn mode(&self) -> CommandMode {
        if self.value.is_some() {
            CommandMode::Set
        } else {
            CommandMode::Query
        }
    }

    /// Returns true if the selector addresses all devices.
    ///
    /// Broadcast commands are fire-and-forget: nobody answers them.
    pub fn is_broadcast(&self) -> bool {
        self.selector.contains(BROADCAST_MARKER)
    }

    /// Checks that no field would break the line framing.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.command.is_empty() {
            return Err(CodecError::InvalidField {
                field: "command",
                reason: "must not be empty".to_string(),
            });
        }

        let fields = [
            ("kind", Some(self.kind.as_str())),
            ("selector", Some(self.selector.as_str())),
            ("command", Some(self.command.as_str())),
            ("sub_target", self.sub_target.as_deref()),
            ("value", self.value.as_deref()),
        ];

        for (field, text) in fields {
            let Some(text) = text else { continue };
            if !text.is_ascii() {
                return Err(CodecError::InvalidField {
                    field,
                    reason: format!("non-ASCII content in {text:?}"),
                });
            }
            if text.contains(['\r', '\n']) {
                return Err(CodecError::InvalidField {
                    field,
                    reason: format!("line break in {text:?}"),
                });
            }
        }

        Ok(())
    }

    /// Encodes the command as a terminated wire line.
    pub fn encode(&self) -> String {
        let mut line = format!("{}{}{}", self.kind, self.selector, self.command);
        if let Some(sub_target) = &self.sub_target {
            line.push('(');
            line.push_str(sub_target);
            line.push(')');
        }
        match &self.value {
            Some(value) => {
                line.push('=');
                line.push_str(value);
            }
            None => line.push('?'),
        }
        line.push(TERMINATOR);
        line
    }
}

/// Displays the wire line without its terminator (for logs).
impl fmt::Display for SerialCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = self.encode();
        write!(f, "{}", line.trim_end_matches(TERMINATOR))
    }
}
