//! Command codes understood by the on-device file agent.

/// Separator between a path and inline file data in a payload.
pub const PATH_SEPARATOR: char = '\0';

/// Marker the device puts in the `FinishWrite` reply once the file is stored.
pub const DONE_MARKER: &str = "done";

/// Command codes (first byte after the frame head).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandCode {
    /// List a directory; reply is newline-separated entry names (0x01).
    ListDir = 0x01,

    /// Read a whole file; reply is the file content (0x02).
    ReadFile = 0x02,

    /// Create or truncate a file with the given data (0x03).
    WriteFile = 0x03,

    /// Append data to a file (0x04).
    AppendFile = 0x04,

    /// Close and verify a file written by `WriteFile`/`AppendFile` (0x05).
    FinishWrite = 0x05,

    /// Execute a script stored on the device (0x06).
    RunFile = 0x06,
}

impl CommandCode {
    /// Wire value of the command.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Human-readable command name for logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::ListDir => "list-dir",
            Self::ReadFile => "read-file",
            Self::WriteFile => "write-file",
            Self::AppendFile => "append-file",
            Self::FinishWrite => "finish-write",
            Self::RunFile => "run-file",
        }
    }
}

impl TryFrom<u8> for CommandCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::ListDir),
            0x02 => Ok(Self::ReadFile),
            0x03 => Ok(Self::WriteFile),
            0x04 => Ok(Self::AppendFile),
            0x05 => Ok(Self::FinishWrite),
            0x06 => Ok(Self::RunFile),
            other => Err(other),
        }
    }
}

/// Payload for commands that carry a path plus inline file data.
///
/// Format: `path\0data`
pub fn file_payload(path: &str, data: &str) -> String {
    let mut payload = String::with_capacity(path.len() + 1 + data.len());
    payload.push_str(path);
    payload.push(PATH_SEPARATOR);
    payload.push_str(data);
    payload
}

/// Split a `path\0data` payload back into its parts.
pub fn split_file_payload(payload: &str) -> Option<(&str, &str)> {
    payload.split_once(PATH_SEPARATOR)
}

/// Check whether a reply payload carries the done marker.
pub fn contains_done_marker(reply: &[u8]) -> bool {
    String::from_utf8_lossy(reply).contains(DONE_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_code_roundtrip() {
        for cmd in [
            CommandCode::ListDir,
            CommandCode::ReadFile,
            CommandCode::WriteFile,
            CommandCode::AppendFile,
            CommandCode::FinishWrite,
            CommandCode::RunFile,
        ] {
            assert_eq!(CommandCode::try_from(cmd.code()), Ok(cmd));
        }
        assert_eq!(CommandCode::try_from(0x7F), Err(0x7F));
    }

    #[test]
    fn test_file_payload() {
        let payload = file_payload("/flash/main.py", "import m5\n");
        assert_eq!(payload, "/flash/main.py\0import m5\n");
        assert_eq!(
            split_file_payload(&payload),
            Some(("/flash/main.py", "import m5\n"))
        );
    }

    #[test]
    fn test_done_marker() {
        assert!(contains_done_marker(b"write done\r\n"));
        assert!(!contains_done_marker(b"error: ENOSPC"));
    }
}
