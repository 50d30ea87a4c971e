// Wire framing for the adb host protocol and the sync sub-protocol.
//
// Host requests carry a 4 digit ASCII hex length. Sync sub-commands carry a
// 4 byte little-endian binary length. Every conversion between the two lives
// here and nowhere else.

use super::error::{AdbError, AdbResult};
use std::fmt;

/// Size of status words, sync ids and both kinds of length prefix.
pub const WORD_SIZE: usize = 4;

/// Largest payload a host frame can describe with four hex digits.
pub const MAX_HOST_PAYLOAD: usize = 0xFFFF;

/// Largest DATA chunk the sync protocol allows (64 KiB).
pub const SYNC_DATA_MAX: usize = 64 * 1024;

pub const OKAY: &[u8; WORD_SIZE] = b"OKAY";
pub const FAIL: &[u8; WORD_SIZE] = b"FAIL";

/// Four byte literal ids used inside sync mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncId {
    Stat,
    Send,
    Recv,
    Data,
    Done,
    Okay,
    Fail,
    Quit,
}

impl SyncId {
    pub fn code(self) -> &'static [u8; WORD_SIZE] {
        match self {
            SyncId::Stat => b"STAT",
            SyncId::Send => b"SEND",
            SyncId::Recv => b"RECV",
            SyncId::Data => b"DATA",
            SyncId::Done => b"DONE",
            SyncId::Okay => OKAY,
            SyncId::Fail => FAIL,
            SyncId::Quit => b"QUIT",
        }
    }

    pub fn from_code(code: &[u8]) -> Option<Self> {
        [
            SyncId::Stat,
            SyncId::Send,
            SyncId::Recv,
            SyncId::Data,
            SyncId::Done,
            SyncId::Okay,
            SyncId::Fail,
            SyncId::Quit,
        ]
        .into_iter()
        .find(|id| id.code().as_slice() == code)
    }
}

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Codes are ASCII literals.
        f.write_str(std::str::from_utf8(self.code()).unwrap_or("????"))
    }
}

/// `hex4(len(service_id + argument)) + service_id + argument`
pub fn host_frame(service_id: &str, argument: &str) -> AdbResult<Vec<u8>> {
    let len = service_id.len() + argument.len();
    if len > MAX_HOST_PAYLOAD {
        return Err(AdbError::RequestTooLong { len });
    }
    let mut frame = Vec::with_capacity(WORD_SIZE + len);
    frame.extend_from_slice(format!("{len:04x}").as_bytes());
    frame.extend_from_slice(service_id.as_bytes());
    frame.extend_from_slice(argument.as_bytes());
    Ok(frame)
}

/// Inverse of [`host_frame`]: returns the service string the frame carries.
pub fn decode_host_frame(frame: &[u8]) -> AdbResult<String> {
    if frame.len() < WORD_SIZE {
        return Err(AdbError::desync("4 digit hex length", frame));
    }
    let (prefix, body) = frame.split_at(WORD_SIZE);
    let mut word = [0u8; WORD_SIZE];
    word.copy_from_slice(prefix);
    let len = parse_hex_length(&word)?;
    if len != body.len() {
        return Err(AdbError::FramingDesync {
            expected: format!("{len} byte service string"),
            found: format!("{} bytes", body.len()),
        });
    }
    String::from_utf8(body.to_vec()).map_err(|e| AdbError::desync("UTF-8 service string", e.as_bytes()))
}

/// Parses the 4 ASCII hex digit length used by host responses.
pub fn parse_hex_length(word: &[u8; WORD_SIZE]) -> AdbResult<usize> {
    std::str::from_utf8(word)
        .ok()
        .filter(|s| s.bytes().all(|b| b.is_ascii_hexdigit()))
        .and_then(|s| usize::from_str_radix(s, 16).ok())
        .ok_or_else(|| AdbError::desync("4 digit hex length", word))
}

/// Byte 0 is the least significant byte.
pub fn encode_le_word(n: u32) -> [u8; WORD_SIZE] {
    n.to_le_bytes()
}

/// Exact inverse of [`encode_le_word`].
pub fn decode_le_word(word: [u8; WORD_SIZE]) -> u32 {
    u32::from_le_bytes(word)
}

/// A sync id followed by an arbitrary little-endian word and no payload.
/// `DONE <mtime>` and the server's `OKAY`/`DONE` replies have this shape.
pub fn sync_header(id: SyncId, word: u32) -> [u8; 2 * WORD_SIZE] {
    let mut header = [0u8; 2 * WORD_SIZE];
    header[..WORD_SIZE].copy_from_slice(id.code());
    header[WORD_SIZE..].copy_from_slice(&encode_le_word(word));
    header
}

/// `id + le32(len(payload)) + payload`
pub fn sync_frame(id: SyncId, payload: &[u8]) -> AdbResult<Vec<u8>> {
    let len = u32::try_from(payload.len()).map_err(|_| AdbError::RequestTooLong { len: payload.len() })?;
    let mut frame = Vec::with_capacity(2 * WORD_SIZE + payload.len());
    frame.extend_from_slice(&sync_header(id, len));
    frame.extend_from_slice(payload);
    Ok(frame)
}
