// One socket to the adb server, owned for the length of one logical operation
use super::codec::{self, WORD_SIZE};
use super::error::{AdbError, AdbResult};
use log::{debug, trace};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;

/// What the server currently associates with this socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Fresh socket; only `host:` services are valid.
    Idle,
    /// `host:transport:<serial>` succeeded; the next request goes to the device.
    TransportActive { serial: String },
    /// `sync:` succeeded; the socket speaks the binary sync sub-protocol.
    SyncMode { serial: String },
}

pub struct Connection<S> {
    stream: BufReader<S>,
    state: ConnectionState,
    verbose: bool,
}

impl Connection<TcpStream> {
    /// Opens a TCP connection to the adb server at `addr` (`host:port`).
    pub async fn open(addr: &str, verbose: bool) -> AdbResult<Self> {
        debug!("Connecting to adb server at {addr}");
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| AdbError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {e}");
        }
        Ok(Self::new(stream, verbose))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    pub fn new(stream: S, verbose: bool) -> Self {
        Self {
            stream: BufReader::new(stream),
            state: ConnectionState::Idle,
            verbose,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        trace!("connection state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Serial of the selected device, in transport or sync state.
    pub fn serial(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Idle => None,
            ConnectionState::TransportActive { serial } | ConnectionState::SyncMode { serial } => {
                Some(serial)
            }
        }
    }

    /// Whether wire traces should show full frames instead of just payloads.
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Writes `bytes` and flushes them to the socket.
    pub async fn send(&mut self, bytes: &[u8]) -> AdbResult<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn read_exact_into(&mut self, buf: &mut [u8]) -> AdbResult<()> {
        self.stream.read_exact(buf).await?;
        Ok(())
    }

    /// Reads one 4 byte word: a status, a sync id or a length prefix.
    pub async fn read_word(&mut self) -> AdbResult<[u8; WORD_SIZE]> {
        let mut word = [0u8; WORD_SIZE];
        self.read_exact_into(&mut word).await?;
        Ok(word)
    }

    /// Reads a 4 digit ASCII hex length (host framing).
    pub async fn read_hex_length(&mut self) -> AdbResult<usize> {
        let word = self.read_word().await?;
        codec::parse_hex_length(&word)
    }

    /// Reads a 4 byte little-endian word (sync framing).
    pub async fn read_le_word(&mut self) -> AdbResult<u32> {
        Ok(codec::decode_le_word(self.read_word().await?))
    }

    pub async fn read_bytes(&mut self, len: usize) -> AdbResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact_into(&mut buf).await?;
        Ok(buf)
    }

    /// Reads one `\n` terminated line without its line ending.
    /// Returns `None` once the server has closed its side.
    pub async fn read_line(&mut self) -> AdbResult<Option<String>> {
        let mut raw = Vec::new();
        if self.stream.read_until(b'\n', &mut raw).await? == 0 {
            return Ok(None);
        }
        if raw.last() == Some(&b'\n') {
            raw.pop();
        }
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
    }

    /// Shuts the socket down. Errors are only logged: the operation's own
    /// result is what the caller needs.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("Error while closing adb connection: {e}");
        }
        debug!("Closed adb connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn reads_words_lengths_and_lines() {
        let (client, mut server) = duplex(256);
        let mut conn = Connection::new(client, false);

        server
            .write_all(b"OKAY000c\x0c\x00\x00\x00line one\r\nline two\n")
            .await
            .unwrap();
        drop(server);

        assert_eq!(&conn.read_word().await.unwrap(), b"OKAY");
        assert_eq!(conn.read_hex_length().await.unwrap(), 12);
        assert_eq!(conn.read_le_word().await.unwrap(), 12);
        assert_eq!(conn.read_line().await.unwrap().as_deref(), Some("line one"));
        assert_eq!(conn.read_line().await.unwrap().as_deref(), Some("line two"));
        assert_eq!(conn.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn short_read_is_connection_lost() {
        let (client, mut server) = duplex(64);
        let mut conn = Connection::new(client, false);
        server.write_all(b"OK").await.unwrap();
        drop(server);

        let err = conn.read_word().await.unwrap_err();
        assert!(matches!(err, AdbError::ConnectionLost { .. }));
    }

    #[tokio::test]
    async fn serial_follows_state() {
        let (client, _server) = duplex(64);
        let mut conn = Connection::new(client, false);
        assert_eq!(conn.serial(), None);
        conn.set_state(ConnectionState::TransportActive {
            serial: "emulator-5554".to_string(),
        });
        assert_eq!(conn.serial(), Some("emulator-5554"));
    }

    #[tokio::test]
    async fn open_reports_unreachable_server() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = Connection::open(&addr, false).await.err().unwrap();
        assert!(matches!(err, AdbError::Connect { .. }));
    }
}
