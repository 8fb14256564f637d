//! The emulator scripting dialect.
//!
//! One line per command, sent to the emulator's control port by a
//! control-client process. Coordinates are 0-based on the wire; the driver
//! converts from the 1-based coordinates workflows use.

use crate::keys::AidKey;
use std::fmt;

/// A single scripting command, rendered to wire text via [`fmt::Display`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptCommand {
    /// Move the cursor to a 0-based (row, column) position.
    MoveCursor { row: u16, col: u16 },
    /// Type a string at the current cursor position.
    SetString(String),
    /// Read the entire screen buffer.
    AsciiAll,
    /// Read `length` characters at a 0-based (row, column) position.
    AsciiAt { row: u16, col: u16, length: u16 },
    /// Number of rows in the saved screen image.
    SnapRows,
    /// Number of columns in the saved screen image.
    SnapCols,
    /// Press an attention key.
    Key(AidKey),
    /// Query the connection state; an empty reply means not connected.
    QueryConnectionState,
    /// Query the current cursor position.
    QueryCursor,
    /// Wait until the screen is ready and the cursor sits on an input field.
    WaitInputField { seconds: u64 },
    /// Tear the emulator down.
    Quit,
}

impl fmt::Display for ScriptCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptCommand::MoveCursor { row, col } => write!(f, "MoveCursor({row},{col})"),
            ScriptCommand::SetString(text) => write!(f, "String({text})"),
            ScriptCommand::AsciiAll => write!(f, "Ascii()"),
            ScriptCommand::AsciiAt { row, col, length } => {
                write!(f, "Ascii({row},{col},{length})")
            }
            ScriptCommand::SnapRows => write!(f, "Snap(Rows)"),
            ScriptCommand::SnapCols => write!(f, "Snap(Cols)"),
            ScriptCommand::Key(key) => write!(f, "{key}"),
            ScriptCommand::QueryConnectionState => write!(f, "Query(ConnectionState)"),
            ScriptCommand::QueryCursor => write!(f, "Query(cursor)"),
            ScriptCommand::WaitInputField { seconds } => {
                write!(f, "Wait({seconds}, InputField)")
            }
            ScriptCommand::Quit => write!(f, "Quit"),
        }
    }
}
