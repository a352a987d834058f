//! Discord local RPC framing and socket discovery.

use crate::transport::{self, IpcStream};
use serde_json::Value;
use std::io;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_FRAME_LEN: usize = 64 * 1024;
const HEADER_LEN: usize = 8;
const SOCKET_SLOTS: u32 = 10;

/// Errors that can occur while talking to the Discord client
#[derive(thiserror::Error, Debug)]
pub enum DiscordError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown opcode {0}")]
    UnknownOpcode(u32),
    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),
    #[error("no Discord IPC socket is accepting connections")]
    NotRunning,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Handshake = 0,
    Frame = 1,
    Close = 2,
    Ping = 3,
    Pong = 4,
}

impl TryFrom<u32> for Opcode {
    type Error = DiscordError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Opcode::Handshake,
            1 => Opcode::Frame,
            2 => Opcode::Close,
            3 => Opcode::Ping,
            4 => Opcode::Pong,
            other => return Err(DiscordError::UnknownOpcode(other)),
        })
    }
}

/// Header is opcode then body length, both little-endian u32.
pub fn encode_frame(op: Opcode, body: &Value) -> Result<Vec<u8>, DiscordError> {
    let payload = serde_json::to_vec(body)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(DiscordError::FrameTooLarge(payload.len()));
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&(op as u32).to_le_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, op: Opcode, body: &Value) -> Result<(), DiscordError> {
    let frame = encode_frame(op, body)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame. Not cancel safe.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(Opcode, Value), DiscordError> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let op = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(DiscordError::FrameTooLarge(len));
    }
    let op = Opcode::try_from(op)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    let body = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)?
    };
    Ok((op, body))
}

/// Every socket path the client may be listening on, in probing order.
#[cfg(unix)]
pub fn socket_candidates() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"]
        .iter()
        .filter_map(|var| std::env::var_os(var))
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .collect();
    dirs.push(PathBuf::from("/tmp"));
    dirs.dedup();
    candidates_in(&dirs)
}

#[cfg(windows)]
pub fn socket_candidates() -> Vec<PathBuf> {
    candidates_in(&[PathBuf::from(r"\\?\pipe")])
}

fn candidates_in(dirs: &[PathBuf]) -> Vec<PathBuf> {
    dirs.iter()
        .flat_map(|dir| (0..SOCKET_SLOTS).map(move |slot| dir.join(format!("discord-ipc-{slot}"))))
        .collect()
}

/// Connect to the first candidate that accepts.
pub async fn connect_any() -> Result<IpcStream, DiscordError> {
    for path in socket_candidates() {
        match transport::connect(&path).await {
            Ok(stream) => {
                tracing::debug!(socket = %path.display(), "connected to Discord IPC");
                return Ok(stream);
            }
            Err(e) => tracing::trace!(socket = %path.display(), error = %e, "Discord IPC socket unavailable"),
        }
    }
    Err(DiscordError::NotRunning)
}
