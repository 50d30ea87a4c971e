use std::path::PathBuf;
use thiserror::Error;

/// A specialized `Result` type for ADB operations.
pub type AdbResult<T> = Result<T, AdbError>;

/// The error type for all ADB-related operations.
#[derive(Debug, Error)]
pub enum AdbError {
    #[error("Failed to connect to adb server at {addr}: {source}. Is the adb server running?")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("Connection to adb server dropped: {source}")]
    ConnectionLost {
        #[from]
        source: std::io::Error,
    },

    /// The server answered `FAIL`; the message is its text, unmodified.
    #[error("{message}")]
    ProtocolFail { message: String },

    #[error("failed to copy '{}' to '{remote}': {message}", local.display())]
    TransferFailed {
        local: PathBuf,
        remote: String,
        message: String,
    },

    #[error("ADB protocol desync: expected {expected}, got {found}")]
    FramingDesync { expected: String, found: String },

    #[error("adb: error: cannot stat '{}': No such file or directory", path.display())]
    LocalFileMissing { path: PathBuf },

    #[error("Local file error on '{}': {source}", path.display())]
    LocalIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("adb: error: remote object '{path}' does not exist")]
    RemoteNotFound { path: String },

    #[error("adb: error: remote object '{path}' is a directory")]
    RemoteIsDirectory { path: String },

    #[error("No device found. Pass -s <serial>, set ANDROID_SERIAL or connect a device.")]
    NoDeviceFound,

    #[error("Request of {len} bytes exceeds the 65535 byte host frame limit")]
    RequestTooLong { len: usize },

    #[error("Service '{service}' needs a device transport; select one with host:transport first")]
    TransportNotSelected { service: String },
}

impl AdbError {
    /// Builds a `FramingDesync` from the raw bytes found on the wire.
    pub fn desync(expected: impl Into<String>, found: &[u8]) -> Self {
        AdbError::FramingDesync {
            expected: expected.into(),
            found: format!("{:?}", String::from_utf8_lossy(found)),
        }
    }

    pub fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AdbError::LocalIo {
            path: path.into(),
            source,
        }
    }

    /// Check if this error means the byte stream lost its framing
    pub fn is_framing_desync(&self) -> bool {
        matches!(self, AdbError::FramingDesync { .. })
    }

    /// Check if the adb server itself reported the failure
    pub fn is_server_failure(&self) -> bool {
        matches!(
            self,
            AdbError::ProtocolFail { .. }
                | AdbError::TransferFailed { .. }
                | AdbError::RemoteNotFound { .. }
                | AdbError::RemoteIsDirectory { .. }
        )
    }
}
