// Read-only settings handed to a Session: which server, which device, what to print
use log::{LevelFilter, warn};
use std::fs::Metadata;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5037;
/// `0o100664`: regular file, rw-rw-r--.
pub const DEFAULT_FILE_MODE: u32 = 33204;
/// Largest DATA chunk sent on push (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

const S_IFREG: u32 = 0o100_000;

/// Permission bits announced in the SEND request of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Always announce this mode.
    Fixed(u32),
    /// Mirror the local file's permission bits (unix only; elsewhere the
    /// default mode is used).
    Local,
}

impl Default for FileMode {
    fn default() -> Self {
        FileMode::Fixed(DEFAULT_FILE_MODE)
    }
}

impl FileMode {
    /// Accepts `local`, a decimal mode (`33204`) or an octal one (`0o644`, `0644`).
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("local") {
            return Some(FileMode::Local);
        }
        let mode = if let Some(octal) = raw.strip_prefix("0o") {
            u32::from_str_radix(octal, 8).ok()?
        } else if raw.len() > 1 && raw.starts_with('0') {
            u32::from_str_radix(&raw[1..], 8).ok()?
        } else {
            raw.parse::<u32>().ok()?
        };
        // Bare permission bits get the regular-file type added.
        Some(FileMode::Fixed(if mode <= 0o7777 { S_IFREG | mode } else { mode }))
    }

    pub fn resolve(&self, metadata: &Metadata) -> u32 {
        match self {
            FileMode::Fixed(mode) => *mode,
            FileMode::Local => local_mode(metadata),
        }
    }
}

#[cfg(unix)]
fn local_mode(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    S_IFREG | (metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn local_mode(_metadata: &Metadata) -> u32 {
    DEFAULT_FILE_MODE
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Default device serial, used when an operation names none.
    pub serial: Option<String>,
    /// Show full framed requests in wire traces.
    pub verbose: bool,
    /// Emit protocol traces at all.
    pub logging: bool,
    pub host: String,
    pub port: u16,
    pub file_mode: FileMode,
    pub chunk_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            serial: None,
            verbose: false,
            logging: false,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            file_mode: FileMode::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Settings {
    /// Defaults overridden by `ANDROID_SERIAL`, `ANDROID_ADB_SERVER_ADDRESS`
    /// and `ANDROID_ADB_SERVER_PORT`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();
        if let Some(serial) = lookup("ANDROID_SERIAL").filter(|s| !s.is_empty()) {
            settings.serial = Some(serial);
        }
        if let Some(host) = lookup("ANDROID_ADB_SERVER_ADDRESS").filter(|s| !s.is_empty()) {
            settings.host = host;
        }
        if let Some(port) = lookup("ANDROID_ADB_SERVER_PORT") {
            match port.parse::<u16>() {
                Ok(port) if port != 0 => settings.port = port,
                _ => warn!("Invalid ANDROID_ADB_SERVER_PORT '{port}', using {DEFAULT_PORT}"),
            }
        }
        settings
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn with_logging(mut self, logging: bool) -> Self {
        self.logging = logging;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_file_mode(mut self, file_mode: FileMode) -> Self {
        self.file_mode = file_mode;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Log level for the binary's logger: quiet unless asked otherwise.
    pub fn log_level(&self) -> LevelFilter {
        match (self.logging, self.verbose) {
            (_, true) => LevelFilter::Trace,
            (true, false) => LevelFilter::Debug,
            (false, false) => LevelFilter::Warn,
        }
    }
}
