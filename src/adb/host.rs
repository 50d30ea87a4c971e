// Host service requests: framing, the OKAY/FAIL handshake and per-service replies
use super::codec::{self, FAIL, OKAY};
use super::connection::{Connection, ConnectionState};
use super::error::{AdbError, AdbResult};
use super::types::DeviceRecord;
use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncWrite};

const VERSION_SERVICE: &str = "host:version";
const DEVICES_SERVICE: &str = "host:devices";
const TRANSPORT_SERVICE: &str = "host:transport:";
const SHELL_SERVICE: &str = "shell:";
const SYNC_SERVICE: &str = "sync:";

/// A host request as it goes on the wire: `hex4(len) + service_id + argument`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    pub service_id: &'static str,
    pub argument: String,
}

impl ServiceRequest {
    pub fn frame(&self) -> AdbResult<Vec<u8>> {
        codec::host_frame(self.service_id, &self.argument)
    }
}

/// Which service a request targets. Chosen before sending; the reply is
/// read according to this tag, never inferred from the reply text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceKind {
    Version,
    Devices,
    Transport(String),
    Shell(String),
    Sync,
}

impl ServiceKind {
    pub fn request(&self) -> ServiceRequest {
        let (service_id, argument) = match self {
            ServiceKind::Version => (VERSION_SERVICE, ""),
            ServiceKind::Devices => (DEVICES_SERVICE, ""),
            ServiceKind::Transport(serial) => (TRANSPORT_SERVICE, serial.as_str()),
            ServiceKind::Shell(command) => (SHELL_SERVICE, command.as_str()),
            ServiceKind::Sync => (SYNC_SERVICE, ""),
        };
        ServiceRequest {
            service_id,
            argument: argument.to_string(),
        }
    }

    pub fn frame(&self) -> AdbResult<Vec<u8>> {
        self.request().frame()
    }

    /// Parses a decoded service string back into its kind.
    pub fn parse(service: &str) -> Option<Self> {
        match service {
            VERSION_SERVICE => Some(ServiceKind::Version),
            DEVICES_SERVICE => Some(ServiceKind::Devices),
            SYNC_SERVICE => Some(ServiceKind::Sync),
            _ => {
                if let Some(serial) = service.strip_prefix(TRANSPORT_SERVICE) {
                    Some(ServiceKind::Transport(serial.to_string()))
                } else {
                    service
                        .strip_prefix(SHELL_SERVICE)
                        .map(|command| ServiceKind::Shell(command.to_string()))
                }
            }
        }
    }

    /// Device services only make sense after a transport has been selected.
    fn needs_transport(&self) -> bool {
        matches!(self, ServiceKind::Shell(_) | ServiceKind::Sync)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    None,
    Version(u32),
    Devices(Vec<DeviceRecord>),
    Lines(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Okay(ResponseBody),
    Fail(String),
}

impl Outcome {
    pub fn into_result(self) -> AdbResult<ResponseBody> {
        match self {
            Outcome::Okay(body) => Ok(body),
            Outcome::Fail(message) => Err(AdbError::ProtocolFail { message }),
        }
    }
}

/// Sends `kind` on `conn` and reads its reply. Shell output is collected.
pub async fn dispatch<S>(conn: &mut Connection<S>, kind: &ServiceKind) -> AdbResult<Outcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut lines = Vec::new();
    let outcome = dispatch_with(conn, kind, |line| lines.push(line.to_string())).await?;
    Ok(match outcome {
        Outcome::Okay(ResponseBody::None) if matches!(kind, ServiceKind::Shell(_)) => {
            Outcome::Okay(ResponseBody::Lines(lines))
        }
        other => other,
    })
}

/// Sends `kind` on `conn` and reads its reply, handing each shell output
/// line to `on_line` as it arrives.
pub async fn dispatch_with<S, F>(
    conn: &mut Connection<S>,
    kind: &ServiceKind,
    mut on_line: F,
) -> AdbResult<Outcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnMut(&str),
{
    let request = kind.request();
    if kind.needs_transport() && !matches!(conn.state(), ConnectionState::TransportActive { .. }) {
        return Err(AdbError::TransportNotSelected {
            service: format!("{}{}", request.service_id, request.argument),
        });
    }

    let frame = request.frame()?;
    conn.send(&frame).await?;
    if conn.verbose() {
        debug!("-> {}", String::from_utf8_lossy(&frame));
    } else {
        debug!("-> {}{}", request.service_id, request.argument);
    }

    let status = conn.read_word().await?;
    debug!("<- {}", String::from_utf8_lossy(&status));
    if &status == FAIL {
        let len = conn.read_hex_length().await?;
        let message = String::from_utf8_lossy(&conn.read_bytes(len).await?).into_owned();
        debug!("<- {message}");
        return Ok(Outcome::Fail(message));
    }
    if &status != OKAY {
        return Err(AdbError::desync("OKAY or FAIL", &status));
    }

    let body = match kind {
        ServiceKind::Version => {
            let len = conn.read_hex_length().await?;
            let raw = conn.read_bytes(len).await?;
            let text = String::from_utf8_lossy(&raw);
            let version = u32::from_str_radix(text.trim(), 16)
                .map_err(|_| AdbError::desync("hex server version", &raw))?;
            debug!("<- {text} (adb server version {version})");
            ResponseBody::Version(version)
        }
        ServiceKind::Devices => {
            let len = conn.read_hex_length().await?;
            let raw = conn.read_bytes(len).await?;
            let devices = DeviceRecord::parse_listing(&String::from_utf8_lossy(&raw));
            trace!("<- {} device line(s)", devices.len());
            ResponseBody::Devices(devices)
        }
        ServiceKind::Transport(serial) => {
            conn.set_state(ConnectionState::TransportActive {
                serial: serial.clone(),
            });
            debug!("Transport established with {serial}");
            ResponseBody::None
        }
        ServiceKind::Shell(_) => {
            while let Some(line) = conn.read_line().await? {
                trace!("<- {line}");
                on_line(&line);
            }
            ResponseBody::None
        }
        ServiceKind::Sync => {
            let serial = conn.serial().unwrap_or_default().to_string();
            conn.set_state(ConnectionState::SyncMode { serial });
            ResponseBody::None
        }
    };
    Ok(Outcome::Okay(body))
}
