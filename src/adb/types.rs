// Core ADB types shared by the dispatcher, the sync engine and callers
use serde::Serialize;
use std::fmt;

/// One line of a `host:devices` listing, e.g. `emulator-5554\tdevice`.
#[derive(Debug, PartialEq, Eq, Serialize, Clone)]
pub struct DeviceRecord {
    pub serial: String,
    pub state: String,
}

impl DeviceRecord {
    /// Parses one listing line. The first whitespace token is the serial;
    /// lines without one yield `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let serial = parts.next()?.to_string();
        let state = parts.next().unwrap_or("unknown").to_string();
        Some(DeviceRecord { serial, state })
    }

    pub fn parse_listing(body: &str) -> Vec<Self> {
        body.lines().filter_map(Self::parse_line).collect()
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.serial, self.state)
    }
}

const S_IFMT: u32 = 0o170_000;
const S_IFDIR: u32 = 0o040_000;

/// The 12 byte STAT reply. All zero means the path does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RemoteStat {
    pub mode: u32,
    pub size: u32,
    pub mtime: u32,
}

impl RemoteStat {
    pub fn exists(&self) -> bool {
        *self != RemoteStat::default()
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }
}

/// Byte counter for one transfer; `expected_length` is only known on RECV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferProgress {
    pub bytes_transferred: u64,
    pub expected_length: Option<u64>,
}

impl TransferProgress {
    pub fn expecting(length: u64) -> Self {
        Self {
            bytes_transferred: 0,
            expected_length: Some(length),
        }
    }

    pub fn add(&mut self, chunk_len: usize) {
        self.bytes_transferred += chunk_len as u64;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Pushed,
    Pulled,
}

/// Final report of a push or pull, printed as
/// `hello.txt: 1 file pushed. (12 bytes)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferSummary {
    pub direction: Direction,
    pub name: String,
    pub bytes: u64,
}

impl fmt::Display for TransferSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.direction {
            Direction::Pushed => "pushed",
            Direction::Pulled => "pulled",
        };
        write!(f, "{}: 1 file {verb}. ({} bytes)", self.name, self.bytes)
    }
}
