// Per-operation orchestration: every call opens its own connection, runs the
// request chain to completion and closes the socket on every exit path.
use super::connection::Connection;
use super::error::{AdbError, AdbResult};
use super::host::{self, ResponseBody, ServiceKind};
use super::resolver::{self, DeviceSource};
use super::sync::SyncEngine;
use super::types::{DeviceRecord, Direction, TransferProgress, TransferSummary};
use crate::config::Settings;
use log::{debug, info};
use std::path::{Path, PathBuf};
use tokio::net::TcpStream;

/// Immutable handle for talking to one adb server. Holds no connection and
/// no device state between calls.
#[derive(Debug, Clone)]
pub struct Session {
    settings: Settings,
}

impl Session {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    async fn connect(&self) -> AdbResult<Connection<TcpStream>> {
        Connection::open(&self.settings.server_addr(), self.settings.verbose).await
    }

    /// Runs `host:version` on its own connection.
    pub async fn server_version(&self) -> AdbResult<u32> {
        let mut conn = self.connect().await?;
        let result = host::dispatch(&mut conn, &ServiceKind::Version).await;
        conn.close().await;
        match result?.into_result()? {
            ResponseBody::Version(version) => Ok(version),
            other => Err(unexpected_body("server version", &other)),
        }
    }

    /// Runs `host:devices` on its own connection.
    pub async fn devices(&self) -> AdbResult<Vec<DeviceRecord>> {
        let mut conn = self.connect().await?;
        let result = host::dispatch(&mut conn, &ServiceKind::Devices).await;
        conn.close().await;
        match result?.into_result()? {
            ResponseBody::Devices(devices) => Ok(devices),
            other => Err(unexpected_body("device listing", &other)),
        }
    }

    /// Explicit serial, else the configured one, else the first listed device.
    pub async fn resolve_serial(&self, explicit: Option<&str>) -> AdbResult<String> {
        resolver::resolve(explicit, self.settings.serial.as_deref(), self).await
    }

    /// Resolves the device and checks the server answers before the real
    /// request chain starts.
    async fn prepare(&self, explicit: Option<&str>) -> AdbResult<String> {
        let serial = self.resolve_serial(explicit).await?;
        let version = self.server_version().await?;
        debug!("adb server version {version}, target device {serial}");
        Ok(serial)
    }

    /// Opens a connection with the device transport already selected.
    async fn open_transport(&self, serial: &str) -> AdbResult<Connection<TcpStream>> {
        let mut conn = self.connect().await?;
        let selected = host::dispatch(&mut conn, &ServiceKind::Transport(serial.to_string()))
            .await
            .and_then(|outcome| outcome.into_result());
        match selected {
            Ok(_) => Ok(conn),
            Err(e) => {
                conn.close().await;
                Err(e)
            }
        }
    }

    /// Runs `command` in the device shell, handing each output line to
    /// `on_line` in order until the device closes the stream.
    pub async fn shell<F>(&self, command: &str, serial: Option<&str>, on_line: F) -> AdbResult<()>
    where
        F: FnMut(&str),
    {
        let serial = self.prepare(serial).await?;
        let mut conn = self.open_transport(&serial).await?;
        let result = host::dispatch_with(&mut conn, &ServiceKind::Shell(command.to_string()), on_line)
            .await
            .and_then(|outcome| outcome.into_result());
        conn.close().await;
        result.map(|_| ())
    }

    /// Copies `local` to `remote` on the device. A remote that is an
    /// existing directory, or ends with `/`, receives the local file name.
    pub async fn push(&self, local: &Path, remote: &str, serial: Option<&str>) -> AdbResult<TransferSummary> {
        let metadata = match tokio::fs::metadata(local).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => {
                return Err(AdbError::local_io(
                    local,
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
                ));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AdbError::LocalFileMissing {
                    path: local.to_path_buf(),
                });
            }
            Err(e) => return Err(AdbError::local_io(local, e)),
        };
        let name = file_name(local)?;
        let mode = self.settings.file_mode.resolve(&metadata);

        let serial = self.prepare(serial).await?;
        let mut conn = self.open_transport(&serial).await?;
        let result: AdbResult<TransferProgress> = async {
            host::dispatch(&mut conn, &ServiceKind::Sync)
                .await?
                .into_result()?;
            let mut engine = SyncEngine::new(&mut conn, self.settings.chunk_size)?;

            let stat = engine.stat(remote).await?;
            let target = if remote.ends_with('/') || (stat.exists() && stat.is_dir()) {
                join_remote(remote, &name)
            } else {
                remote.to_string()
            };
            info!("Pushing {} to {serial}:{target}", local.display());

            let progress = engine.send(local, &target, mode).await?;
            engine.quit().await?;
            Ok(progress)
        }
        .await;
        conn.close().await;

        let progress = result?;
        Ok(TransferSummary {
            direction: Direction::Pushed,
            name,
            bytes: progress.bytes_transferred,
        })
    }

    /// Copies `remote` from the device to `local`, or to the remote file
    /// name in the current directory when `local` is `None`.
    pub async fn pull(&self, remote: &str, local: Option<&Path>, serial: Option<&str>) -> AdbResult<TransferSummary> {
        let local = match local {
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(remote_file_name(remote).ok_or_else(|| AdbError::RemoteIsDirectory {
                path: remote.to_string(),
            })?),
        };
        check_parent_dir(&local)?;

        let serial = self.prepare(serial).await?;
        let mut conn = self.open_transport(&serial).await?;
        let result: AdbResult<TransferProgress> = async {
            host::dispatch(&mut conn, &ServiceKind::Sync)
                .await?
                .into_result()?;
            let mut engine = SyncEngine::new(&mut conn, self.settings.chunk_size)?;

            let stat = engine.stat(remote).await?;
            if !stat.exists() {
                return Err(AdbError::RemoteNotFound {
                    path: remote.to_string(),
                });
            }
            if stat.is_dir() {
                return Err(AdbError::RemoteIsDirectory {
                    path: remote.to_string(),
                });
            }
            info!("Pulling {serial}:{remote} to {}", local.display());

            let progress = engine.recv(remote, &local).await?;
            engine.quit().await?;
            Ok(progress)
        }
        .await;
        conn.close().await;

        let progress = result?;
        Ok(TransferSummary {
            direction: Direction::Pulled,
            name: remote.to_string(),
            bytes: progress.bytes_transferred,
        })
    }
}

impl DeviceSource for Session {
    async fn list_devices(&self) -> AdbResult<Vec<DeviceRecord>> {
        self.devices().await
    }
}

fn unexpected_body(wanted: &str, body: &ResponseBody) -> AdbError {
    AdbError::FramingDesync {
        expected: wanted.to_string(),
        found: format!("{body:?}"),
    }
}

fn file_name(local: &Path) -> AdbResult<String> {
    local
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            AdbError::local_io(
                local,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
            )
        })
}

/// Last component of a device path; `None` for `/` or a trailing slash.
fn remote_file_name(remote: &str) -> Option<&str> {
    remote.rsplit('/').next().filter(|name| !name.is_empty())
}

fn join_remote(dir: &str, name: &str) -> String {
    format!("{}/{name}", dir.trim_end_matches('/'))
}

/// Fails before any network traffic when the pull destination cannot exist.
fn check_parent_dir(local: &Path) -> AdbResult<()> {
    match local.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.is_dir() => Err(AdbError::local_io(
            local,
            std::io::Error::new(std::io::ErrorKind::NotFound, "destination directory does not exist"),
        )),
        _ => Ok(()),
    }
}
