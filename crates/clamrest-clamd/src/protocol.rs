//! Command framing for the clamd protocol.
//!
//! Wire format (see clamd(8)):
//! - Command: `[1B specifier][command text][1B terminator]`
//! - The specifier is `z` for NUL-terminated commands and `n` for
//!   newline-terminated commands. clamd answers with the same terminator.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::ClamdError;

/// Byte that ends every command and every reply line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Terminator {
    /// `\0`, announced with the `z` specifier.
    #[default]
    Nul,
    /// `\n`, announced with the `n` specifier.
    Newline,
}

impl Terminator {
    /// The terminator byte.
    pub const fn byte(self) -> u8 {
        match self {
            Terminator::Nul => b'\0',
            Terminator::Newline => b'\n',
        }
    }

    /// The specifier byte prefixed to commands using this terminator.
    pub const fn specifier(self) -> u8 {
        match self {
            Terminator::Nul => b'z',
            Terminator::Newline => b'n',
        }
    }

    /// The terminator as a `char`, for splitting decoded replies.
    pub const fn as_char(self) -> char {
        self.byte() as char
    }
}

impl TryFrom<u8> for Terminator {
    type Error = ClamdError;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        match b {
            b'\0' => Ok(Terminator::Nul),
            b'\n' => Ok(Terminator::Newline),
            other => Err(ClamdError::UnsupportedTerminator(
                char::from(other).escape_default().to_string(),
            )),
        }
    }
}

impl FromStr for Terminator {
    type Err = ClamdError;

    /// Accepts the configuration names (`nul`, `newline`) and the literal
    /// characters.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_matches(' ').to_ascii_lowercase().as_str() {
            "nul" | "null" | "\0" | "\\0" | "z" => Ok(Terminator::Nul),
            "newline" | "\n" | "\\n" | "n" => Ok(Terminator::Newline),
            _ => Err(ClamdError::UnsupportedTerminator(s.escape_default().to_string())),
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Terminator::Nul => "nul",
            Terminator::Newline => "newline",
        })
    }
}

/// A clamd command issued by this client.
///
/// Session commands (`IDSESSION`/`END`) are not modelled: every command
/// runs on its own connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Ping,
    Version,
    Stats,
    /// Scan a file or directory on the daemon's filesystem.
    Scan(&'a Path),
    /// Scan content streamed on the same connection.
    Instream,
}

impl Command<'_> {
    /// The command text as sent on the wire, without framing.
    pub fn text(&self) -> String {
        match self {
            Command::Ping => "PING".to_string(),
            Command::Version => "VERSION".to_string(),
            Command::Stats => "STATS".to_string(),
            Command::Scan(path) => format!("SCAN {}", path.display()),
            Command::Instream => "INSTREAM".to_string(),
        }
    }

    /// Whether the reply follows the scan status-line grammar.
    pub fn is_scan(&self) -> bool {
        matches!(self, Command::Scan(_) | Command::Instream)
    }
}

/// A framed command, ready to be written to the socket.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandFrame(Vec<u8>);

impl CommandFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandFrame(\"{}\")", self.0.escape_ascii())
    }
}

/// Wrap `command` in the specifier and terminator for `terminator`.
pub fn frame(command: &str, terminator: Terminator) -> CommandFrame {
    let mut bytes = Vec::with_capacity(command.len() + 2);
    bytes.push(terminator.specifier());
    bytes.extend_from_slice(command.as_bytes());
    bytes.push(terminator.byte());
    CommandFrame(bytes)
}
