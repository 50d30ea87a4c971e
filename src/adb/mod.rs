// ADB module - client for the adb server's host protocol
// This module talks to an adb server already listening on the host (TCP,
// port 5037 by default): device listing, transport selection, remote shell
// and file transfer through the sync sub-protocol.

pub mod codec;
pub mod connection;
pub mod error;
pub mod host;
pub mod resolver;
pub mod session;
pub mod sync;
pub mod types;


// Re-export the main types and functions for easy access
pub use connection::{Connection, ConnectionState};
pub use error::{AdbError, AdbResult};
pub use host::{Outcome, ResponseBody, ServiceKind, ServiceRequest};
pub use resolver::DeviceSource;
pub use session::Session;
pub use sync::{SyncEngine, SyncPhase};
pub use types::{DeviceRecord, Direction, RemoteStat, TransferProgress, TransferSummary};
