//! Discord's local IPC framing: a little-endian `i32` opcode, a
//! little-endian `i32` payload length, then a JSON payload.

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

pub const OPCODE_HANDSHAKE: i32 = 0;
pub const OPCODE_FRAME: i32 = 1;
pub const OPCODE_CLOSE: i32 = 2;

const MAX_FRAME_LEN: usize = 64 * 1024;

pub trait IpcIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> IpcIo for T {}

pub type IpcStream = Box<dyn IpcIo>;

pub fn encode_frame(opcode: i32, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8 + payload.len());
    frame.extend_from_slice(&opcode.to_le_bytes());
    frame.extend_from_slice(&(payload.len() as i32).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

pub async fn write_frame<S>(stream: &mut S, opcode: i32, payload: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    stream
        .write_all(&encode_frame(opcode, payload))
        .await
        .context("failed writing discord ipc frame")?;
    stream.flush().await?;
    Ok(())
}

pub async fn read_frame<S>(stream: &mut S) -> Result<(i32, Vec<u8>)>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; 8];
    stream
        .read_exact(&mut header)
        .await
        .context("failed reading discord ipc header")?;

    let opcode = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let len = i32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    let len = usize::try_from(len).map_err(|_| anyhow!("negative discord ipc frame length"))?;
    if len > MAX_FRAME_LEN {
        return Err(anyhow!("discord ipc frame of {len} bytes exceeds limit"));
    }

    let mut payload = vec![0u8; len];
    stream
        .read_exact(&mut payload)
        .await
        .context("failed reading discord ipc payload")?;

    if opcode == OPCODE_CLOSE {
        return Err(anyhow!(
            "discord closed the ipc connection: {}",
            String::from_utf8_lossy(&payload)
        ));
    }
    if opcode != OPCODE_FRAME && opcode != OPCODE_HANDSHAKE {
        warn!(opcode, "discord ipc unexpected opcode");
    }
    Ok((opcode, payload))
}

/// Fails when Discord answered a command with an `ERROR` event.
pub fn check_response(raw: &[u8]) -> Result<()> {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(raw) else {
        return Ok(());
    };

    let is_error = value
        .get("evt")
        .and_then(|v| v.as_str())
        .map(|evt| evt.eq_ignore_ascii_case("ERROR"))
        .unwrap_or(false);
    if !is_error {
        return Ok(());
    }

    let data = value.get("data");
    let code = data
        .and_then(|d| d.get("code"))
        .and_then(|c| c.as_i64())
        .unwrap_or_default();
    let message = data
        .and_then(|d| d.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or("unknown discord rpc error");
    Err(anyhow!("discord rpc error {code}: {message}"))
}

#[cfg(unix)]
pub fn socket_candidates(slot: u8) -> Vec<PathBuf> {
    let name = format!("discord-ipc-{slot}");
    let mut paths = Vec::new();
    for var in ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"] {
        if let Ok(dir) = std::env::var(var) {
            paths.push(PathBuf::from(dir).join(&name));
        }
    }
    paths.push(PathBuf::from("/tmp").join(&name));
    paths
}

#[cfg(windows)]
pub fn socket_candidates(slot: u8) -> Vec<PathBuf> {
    vec![PathBuf::from(format!(r"\\?\pipe\discord-ipc-{slot}"))]
}

#[cfg(unix)]
pub async fn connect(slot: u8) -> Result<IpcStream> {
    for path in socket_candidates(slot) {
        if let Ok(stream) = tokio::net::UnixStream::connect(&path).await {
            return Ok(Box::new(stream));
        }
    }
    Err(anyhow!("no discord ipc socket for slot {slot}"))
}

#[cfg(windows)]
pub async fn connect(slot: u8) -> Result<IpcStream> {
    use tokio::net::windows::named_pipe::ClientOptions;
    let path = format!(r"\\?\pipe\discord-ipc-{slot}");
    let pipe = ClientOptions::new()
        .open(&path)
        .with_context(|| format!("cannot open {path}"))?;
    Ok(Box::new(pipe))
}

#[cfg(test)]
mod tests {
    use super::{check_response, read_frame, write_frame, OPCODE_CLOSE, OPCODE_FRAME};
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn frames_survive_the_wire() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, OPCODE_FRAME, br#"{"cmd":"SET_ACTIVITY"}"#)
            .await
            .unwrap();

        let (opcode, payload) = read_frame(&mut server).await.unwrap();
        assert_eq!(opcode, OPCODE_FRAME);
        assert_eq!(payload, br#"{"cmd":"SET_ACTIVITY"}"#);
    }

    #[tokio::test]
    async fn close_frame_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, OPCODE_CLOSE, b"bye").await.unwrap();
        assert!(read_frame(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn negative_length_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut header = OPCODE_FRAME.to_le_bytes().to_vec();
        header.extend_from_slice(&(-5i32).to_le_bytes());
        client.write_all(&header).await.unwrap();

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(err.to_string().contains("negative"));
    }

    #[test]
    fn error_events_are_reported() {
        let err = check_response(
            br#"{"evt":"ERROR","data":{"code":4000,"message":"bad activity"}}"#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "discord rpc error 4000: bad activity");

        assert!(check_response(br#"{"evt":null,"cmd":"SET_ACTIVITY"}"#).is_ok());
        assert!(check_response(b"not json").is_ok());
    }
}
