// Sync sub-protocol: STAT, chunked SEND and RECV, QUIT
//
// Runs on a connection that has already accepted `sync:`. Every length is a
// 4 byte little-endian word, and every chunk is read by its announced length,
// so a chunk boundary is never guessed from the content of the stream.

use super::codec::{self, SYNC_DATA_MAX, SyncId, WORD_SIZE};
use super::connection::{Connection, ConnectionState};
use super::error::{AdbError, AdbResult};
use super::types::{RemoteStat, TransferProgress};
use log::{debug, trace, warn};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Where a sync session is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    AwaitingStat,
    FileExists,
    FileAbsent,
    Transferring,
    Done,
}

pub struct SyncEngine<'a, S> {
    conn: &'a mut Connection<S>,
    chunk_size: usize,
    phase: SyncPhase,
    last_stat: Option<RemoteStat>,
}

impl<'a, S: AsyncRead + AsyncWrite + Unpin> SyncEngine<'a, S> {
    /// Wraps a connection in sync mode. `chunk_size` bounds outgoing DATA
    /// chunks and is clamped to the protocol maximum of 64 KiB.
    pub fn new(conn: &'a mut Connection<S>, chunk_size: usize) -> AdbResult<Self> {
        if !matches!(conn.state(), ConnectionState::SyncMode { .. }) {
            return Err(AdbError::TransportNotSelected {
                service: "sync:".to_string(),
            });
        }
        Ok(Self {
            conn,
            chunk_size: chunk_size.clamp(1, SYNC_DATA_MAX),
            phase: SyncPhase::AwaitingStat,
            last_stat: None,
        })
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    fn set_phase(&mut self, phase: SyncPhase) {
        trace!("sync phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    async fn send_request(&mut self, id: SyncId, payload: &str) -> AdbResult<()> {
        let frame = codec::sync_frame(id, payload.as_bytes())?;
        self.conn.send(&frame).await?;
        if self.conn.verbose() {
            debug!("-> {id}{:?}{payload}", &frame[WORD_SIZE..2 * WORD_SIZE]);
        } else {
            debug!("-> {id} {payload}");
        }
        Ok(())
    }

    /// Reads the length-prefixed message that follows a sync `FAIL`.
    async fn read_fail_message(&mut self) -> AdbResult<String> {
        let len = self.conn.read_le_word().await? as usize;
        if len > SYNC_DATA_MAX {
            return Err(AdbError::FramingDesync {
                expected: format!("FAIL message of at most {SYNC_DATA_MAX} bytes"),
                found: format!("{len} bytes"),
            });
        }
        let raw = self.conn.read_bytes(len).await?;
        let message = String::from_utf8_lossy(&raw).into_owned();
        debug!("<- FAIL {message}");
        Ok(message)
    }

    /// Queries mode/size/mtime of `remote`. An all-zero reply means the
    /// path does not exist; there is no other existence signal.
    pub async fn stat(&mut self, remote: &str) -> AdbResult<RemoteStat> {
        self.send_request(SyncId::Stat, remote).await?;

        let id = self.conn.read_word().await?;
        if SyncId::from_code(&id) != Some(SyncId::Stat) {
            return Err(AdbError::desync("STAT reply", &id));
        }
        let stat = RemoteStat {
            mode: self.conn.read_le_word().await?,
            size: self.conn.read_le_word().await?,
            mtime: self.conn.read_le_word().await?,
        };
        debug!(
            "<- STAT mode={:o} size={} mtime={}",
            stat.mode, stat.size, stat.mtime
        );

        self.last_stat = Some(stat);
        self.set_phase(if stat.exists() {
            SyncPhase::FileExists
        } else {
            SyncPhase::FileAbsent
        });
        Ok(stat)
    }

    /// Uploads `local` to `remote` with permission bits `mode`.
    pub async fn send(&mut self, local: &Path, remote: &str, mode: u32) -> AdbResult<TransferProgress> {
        let mut source = File::open(local)
            .await
            .map_err(|e| AdbError::local_io(local, e))?;
        let metadata = source
            .metadata()
            .await
            .map_err(|e| AdbError::local_io(local, e))?;
        let mtime = metadata.modified().map(mtime_word).unwrap_or_default();

        self.send_request(SyncId::Send, &format!("{remote},{mode}"))
            .await?;
        self.set_phase(SyncPhase::Transferring);

        let mut progress = TransferProgress::default();
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let n = fill_chunk(&mut source, &mut buf)
                .await
                .map_err(|e| AdbError::local_io(local, e))?;
            if n == 0 {
                break;
            }
            let frame = codec::sync_frame(SyncId::Data, &buf[..n])?;
            self.conn.send(&frame).await?;
            progress.add(n);
            trace!("-> DATA {n} bytes ({} total)", progress.bytes_transferred);
        }

        self.conn.send(&codec::sync_header(SyncId::Done, mtime)).await?;
        debug!("-> DONE mtime={mtime}");

        let status = self.conn.read_word().await?;
        match SyncId::from_code(&status) {
            Some(SyncId::Okay) => {
                // The OKAY length word carries nothing.
                self.conn.read_le_word().await?;
                debug!("<- OKAY");
            }
            Some(SyncId::Fail) => {
                let message = self.read_fail_message().await?;
                return Err(AdbError::TransferFailed {
                    local: local.to_path_buf(),
                    remote: remote.to_string(),
                    message,
                });
            }
            _ => return Err(AdbError::desync("OKAY or FAIL after DONE", &status)),
        }

        self.set_phase(SyncPhase::Done);
        Ok(progress)
    }

    /// Downloads `remote` into `local`, truncating whatever was there.
    pub async fn recv(&mut self, remote: &str, local: &Path) -> AdbResult<TransferProgress> {
        let mut output = File::create(local)
            .await
            .map_err(|e| AdbError::local_io(local, e))?;
        let progress = self.recv_stream(remote, &mut output, local).await;
        // Flush what arrived even when the transfer broke off.
        let flushed = output.flush().await;
        finish_recv(progress, flushed, local)
    }

    /// Downloads `remote` into any writer. Stops at `DONE`; any id other
    /// than `DATA`, `DONE` or `FAIL` aborts with `FramingDesync` before
    /// another byte is written.
    pub async fn recv_into<W: AsyncWrite + Unpin>(
        &mut self,
        remote: &str,
        writer: &mut W,
    ) -> AdbResult<TransferProgress> {
        self.recv_stream(remote, writer, Path::new("<writer>")).await
    }

    async fn recv_stream<W: AsyncWrite + Unpin>(
        &mut self,
        remote: &str,
        writer: &mut W,
        local: &Path,
    ) -> AdbResult<TransferProgress> {
        // A preceding STAT tells how many bytes to expect.
        let mut progress = match self.last_stat {
            Some(stat) if stat.exists() => TransferProgress::expecting(u64::from(stat.size)),
            _ => TransferProgress::default(),
        };
        self.send_request(SyncId::Recv, remote).await?;
        self.set_phase(SyncPhase::Transferring);

        let mut buf = vec![0u8; SYNC_DATA_MAX];
        loop {
            let id = self.conn.read_word().await?;
            match SyncId::from_code(&id) {
                Some(SyncId::Data) => {
                    let len = self.conn.read_le_word().await? as usize;
                    if len > SYNC_DATA_MAX {
                        return Err(AdbError::FramingDesync {
                            expected: format!("DATA chunk of at most {SYNC_DATA_MAX} bytes"),
                            found: format!("{len} bytes"),
                        });
                    }
                    self.conn.read_exact_into(&mut buf[..len]).await?;
                    writer
                        .write_all(&buf[..len])
                        .await
                        .map_err(|e| AdbError::local_io(local, e))?;
                    progress.add(len);
                    trace!("<- DATA {len} bytes ({} total)", progress.bytes_transferred);
                }
                Some(SyncId::Done) => {
                    self.conn.read_le_word().await?;
                    debug!("<- DONE");
                    break;
                }
                Some(SyncId::Fail) => {
                    let message = self.read_fail_message().await?;
                    return Err(AdbError::ProtocolFail { message });
                }
                _ => return Err(AdbError::desync("DATA or DONE", &id)),
            }
        }

        if let Some(expected) = progress.expected_length
            && expected != progress.bytes_transferred
        {
            warn!(
                "{remote}: STAT announced {expected} bytes, received {}",
                progress.bytes_transferred
            );
        }
        self.set_phase(SyncPhase::Done);
        Ok(progress)
    }

    /// Ends the sync session with a bare `QUIT`. The server tears the
    /// service down, so the socket can carry no further device request; the
    /// owner closes it.
    pub async fn quit(self) -> AdbResult<()> {
        self.conn.send(SyncId::Quit.code()).await?;
        debug!("-> QUIT");
        self.conn.set_state(ConnectionState::Idle);
        Ok(())
    }
}

/// The transfer error wins over a flush error, which is only logged then.
fn finish_recv(
    progress: AdbResult<TransferProgress>,
    flushed: std::io::Result<()>,
    local: &Path,
) -> AdbResult<TransferProgress> {
    match (progress, flushed) {
        (Ok(progress), Ok(())) => Ok(progress),
        (Ok(_), Err(e)) => Err(AdbError::local_io(local, e)),
        (Err(e), flushed) => {
            if let Err(flush_err) = flushed {
                warn!("Failed to flush {}: {flush_err}", local.display());
            }
            Err(e)
        }
    }
}

/// Local mtime as the 32-bit seconds word sent with `DONE`. Times before the
/// epoch become 0, times past 2106 saturate.
fn mtime_word(modified: SystemTime) -> u32 {
    let secs = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    u32::try_from(secs).unwrap_or_else(|_| {
        warn!("mtime {secs} does not fit in 32 bits, sending {}", u32::MAX);
        u32::MAX
    })
}

/// Reads until `buf` is full or the source is exhausted.
async fn fill_chunk<R: AsyncRead + Unpin>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adb::codec::{encode_le_word, sync_header};
    use crate::adb::host::{ServiceKind, dispatch};
    use std::time::Duration;
    use tokio::io::duplex;

    fn sync_connection(stream: tokio::io::DuplexStream) -> Connection<tokio::io::DuplexStream> {
        let mut conn = Connection::new(stream, false);
        conn.set_state(ConnectionState::SyncMode {
            serial: "emulator-5554".to_string(),
        });
        conn
    }

    #[tokio::test]
    async fn engine_requires_sync_mode() {
        let (client, _server) = duplex(64);
        let mut conn = Connection::new(client, false);
        assert!(SyncEngine::new(&mut conn, SYNC_DATA_MAX).is_err());
    }

    #[tokio::test]
    async fn stat_all_zero_means_absent() {
        let (client, mut server) = duplex(256);
        let mut conn = sync_connection(client);
        server.write_all(b"STAT").await.unwrap();
        server.write_all(&[0u8; 12]).await.unwrap();

        let mut engine = SyncEngine::new(&mut conn, SYNC_DATA_MAX).unwrap();
        let stat = engine.stat("/sdcard/missing").await.unwrap();
        assert!(!stat.exists());
        assert_eq!(engine.phase(), SyncPhase::FileAbsent);

        let mut sent = [0u8; 8 + 15];
        server.read_exact(&mut sent).await.unwrap();
        assert_eq!(&sent[..8], b"STAT\x0f\x00\x00\x00");
        assert_eq!(&sent[8..], b"/sdcard/missing");
    }

    #[tokio::test]
    async fn stat_reports_mode_size_mtime() {
        let (client, mut server) = duplex(256);
        let mut conn = sync_connection(client);
        server.write_all(b"STAT").await.unwrap();
        server.write_all(&encode_le_word(0o100_664)).await.unwrap();
        server.write_all(&encode_le_word(12)).await.unwrap();
        server.write_all(&encode_le_word(1_700_000_000)).await.unwrap();

        let mut engine = SyncEngine::new(&mut conn, SYNC_DATA_MAX).unwrap();
        let stat = engine.stat("/sdcard/hello.txt").await.unwrap();
        assert!(stat.exists());
        assert_eq!(stat.mode, 0o100_664);
        assert_eq!(stat.size, 12);
        assert_eq!(stat.mtime, 1_700_000_000);
        assert_eq!(engine.phase(), SyncPhase::FileExists);
    }

    #[tokio::test]
    async fn recv_concatenates_chunks_in_order() {
        let (client, mut server) = duplex(1024);
        let mut conn = sync_connection(client);
        for chunk in [&b"hello "[..], b"sync ", b"world"] {
            server
                .write_all(&sync_header(SyncId::Data, chunk.len() as u32))
                .await
                .unwrap();
            server.write_all(chunk).await.unwrap();
        }
        server.write_all(&sync_header(SyncId::Done, 0)).await.unwrap();

        let mut engine = SyncEngine::new(&mut conn, SYNC_DATA_MAX).unwrap();
        let mut out = Vec::new();
        let progress = engine.recv_into("/sdcard/a.txt", &mut out).await.unwrap();
        assert_eq!(out, b"hello sync world");
        assert_eq!(progress.bytes_transferred, 16);
        assert_eq!(engine.phase(), SyncPhase::Done);
    }

    #[tokio::test]
    async fn recv_unknown_id_is_desync_and_stops_writing() {
        let (client, mut server) = duplex(1024);
        let mut conn = sync_connection(client);
        server.write_all(&sync_header(SyncId::Data, 3)).await.unwrap();
        server.write_all(b"abc").await.unwrap();
        // A header split mid-word: looks like data, is not a sync id.
        server.write_all(b"ATA\x03\x00\x00\x00xyz").await.unwrap();

        let mut engine = SyncEngine::new(&mut conn, SYNC_DATA_MAX).unwrap();
        let mut out = Vec::new();
        let err = engine.recv_into("/sdcard/a.txt", &mut out).await.unwrap_err();
        assert!(err.is_framing_desync(), "unexpected error: {err}");
        assert_eq!(out, b"abc");
        assert_eq!(engine.phase(), SyncPhase::Transferring);
    }

    #[tokio::test]
    async fn recv_oversized_chunk_is_desync() {
        let (client, mut server) = duplex(64);
        let mut conn = sync_connection(client);
        server
            .write_all(&sync_header(SyncId::Data, (SYNC_DATA_MAX + 1) as u32))
            .await
            .unwrap();

        let mut engine = SyncEngine::new(&mut conn, SYNC_DATA_MAX).unwrap();
        let mut out = Vec::new();
        let err = engine.recv_into("/x", &mut out).await.unwrap_err();
        assert!(err.is_framing_desync());
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn recv_fail_is_surfaced_verbatim() {
        let (client, mut server) = duplex(256);
        let mut conn = sync_connection(client);
        let message = b"open failed: Permission denied";
        server
            .write_all(&sync_header(SyncId::Fail, message.len() as u32))
            .await
            .unwrap();
        server.write_all(message).await.unwrap();

        let mut engine = SyncEngine::new(&mut conn, SYNC_DATA_MAX).unwrap();
        let mut out = Vec::new();
        let err = engine.recv_into("/data/secret", &mut out).await.unwrap_err();
        assert_eq!(err.to_string(), "open failed: Permission denied");
    }

    #[tokio::test]
    async fn send_splits_into_chunks_and_ends_with_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("payload.bin");
        std::fs::write(&local, b"0123456789").unwrap();
        let mtime = 1_700_000_123u32;
        std::fs::File::options()
            .write(true)
            .open(&local)
            .unwrap()
            .set_modified(UNIX_EPOCH + Duration::from_secs(u64::from(mtime)))
            .unwrap();

        let (client, mut server) = duplex(4096);
        let mut conn = sync_connection(client);
        server.write_all(&sync_header(SyncId::Okay, 0)).await.unwrap();

        let mut engine = SyncEngine::new(&mut conn, 4).unwrap();
        let progress = engine
            .send(&local, "/sdcard/payload.bin", 33204)
            .await
            .unwrap();
        assert_eq!(progress.bytes_transferred, 10);
        assert_eq!(engine.phase(), SyncPhase::Done);
        drop(engine);
        drop(conn);

        let mut sent = Vec::new();
        server.read_to_end(&mut sent).await.unwrap();
        let send_payload = b"/sdcard/payload.bin,33204";
        let mut expected = sync_header(SyncId::Send, send_payload.len() as u32).to_vec();
        expected.extend_from_slice(send_payload);
        for chunk in [&b"0123"[..], b"4567", b"89"] {
            expected.extend_from_slice(&sync_header(SyncId::Data, chunk.len() as u32));
            expected.extend_from_slice(chunk);
        }
        expected.extend_from_slice(b"DONE");
        expected.extend_from_slice(&encode_le_word(mtime));
        assert_eq!(sent, expected);
        assert_eq!(&sent[sent.len() - 4..], &[0x7b, 0xf1, 0x53, 0x65], "mtime is little-endian");
    }

    #[tokio::test]
    async fn send_fail_after_done_names_both_paths() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("hello.txt");
        std::fs::write(&local, b"hello world\n").unwrap();

        let (client, mut server) = duplex(4096);
        let mut conn = sync_connection(client);
        let message = b"Read-only file system";
        server
            .write_all(&sync_header(SyncId::Fail, message.len() as u32))
            .await
            .unwrap();
        server.write_all(message).await.unwrap();

        let mut engine = SyncEngine::new(&mut conn, SYNC_DATA_MAX).unwrap();
        let err = engine.send(&local, "/system/hello.txt", 33204).await.unwrap_err();
        match err {
            AdbError::TransferFailed {
                local: failed_local,
                remote,
                message,
            } => {
                assert_eq!(failed_local, local);
                assert_eq!(remote, "/system/hello.txt");
                assert_eq!(message, "Read-only file system");
            }
            other => panic!("expected TransferFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn quit_is_bare_and_ends_device_reuse() {
        let (client, mut server) = duplex(64);
        let mut conn = sync_connection(client);
        SyncEngine::new(&mut conn, SYNC_DATA_MAX)
            .unwrap()
            .quit()
            .await
            .unwrap();
        assert_eq!(conn.state(), &ConnectionState::Idle);

        let err = dispatch(&mut conn, &ServiceKind::Shell("id".to_string()))
            .await
            .unwrap_err();
        assert!(
            matches!(err, AdbError::TransportNotSelected { .. }),
            "shell after QUIT must be refused, got {err:?}"
        );
        drop(conn);

        let mut sent = Vec::new();
        server.read_to_end(&mut sent).await.unwrap();
        assert_eq!(sent, b"QUIT");
    }

    #[tokio::test]
    async fn recv_fail_oversized_length_is_desync() {
        let (client, mut server) = duplex(64);
        let mut conn = sync_connection(client);
        server
            .write_all(&sync_header(SyncId::Fail, 0x7FFF_FFFF))
            .await
            .unwrap();
        server.write_all(b"short").await.unwrap();
        drop(server);

        let mut engine = SyncEngine::new(&mut conn, SYNC_DATA_MAX).unwrap();
        let mut out = Vec::new();
        let err = engine.recv_into("/sdcard/a.txt", &mut out).await.unwrap_err();
        assert!(err.is_framing_desync(), "unexpected error: {err:?}");
    }

    #[test]
    fn mtime_word_saturates_and_clamps() {
        assert_eq!(mtime_word(UNIX_EPOCH + Duration::from_secs(1_700_000_000)), 1_700_000_000);
        assert_eq!(mtime_word(UNIX_EPOCH + Duration::from_secs(1 << 33)), u32::MAX);
        assert_eq!(mtime_word(UNIX_EPOCH - Duration::from_secs(60)), 0);
    }

    #[test]
    fn flush_error_does_not_mask_transfer_error() {
        let disk_full = || std::io::Error::other("disk full");
        let local = Path::new("out.bin");

        let err = finish_recv(Err(AdbError::desync("DATA or DONE", b"ATA\x03")), Err(disk_full()), local)
            .unwrap_err();
        assert!(err.is_framing_desync(), "unexpected error: {err:?}");

        let err = finish_recv(Ok(TransferProgress::default()), Err(disk_full()), local).unwrap_err();
        assert!(matches!(err, AdbError::LocalIo { .. }));

        let progress = finish_recv(Ok(TransferProgress::expecting(3)), Ok(()), local).unwrap();
        assert_eq!(progress.expected_length, Some(3));
    }
}
