//! Length-prefixed framing for [`crate::message::Message`] over a `TcpStream`.
//!
//! Frame shape: a 4-byte native-endian length, followed by that many bytes of
//! `|`-delimited message text. Reads and writes loop until the whole frame
//! is moved; a broken connection surfaces as an ordinary `io::Error` rather
//! than a process-terminating signal.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::message::{Message, MAX_FRAME_BYTES};

/// Writes one framed message, looping on partial writes.
///
/// `write_all` on a tokio stream already loops internally and surfaces a
/// broken pipe as `Err` rather than `SIGPIPE`, which is the async-runtime
/// equivalent of the C reference's `MSG_NOSIGNAL` + retry-on-partial-send.
pub async fn send_message(stream: &mut TcpStream, msg: &Message) -> std::io::Result<()> {
    let encoded = msg.encode();
    let bytes = encoded.as_bytes();
    if bytes.len() >= MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "encoded message exceeds frame size limit",
        ));
    }
    let len = bytes.len() as u32;
    stream.write_all(&len.to_ne_bytes()).await?;
    stream.write_all(bytes).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads one framed message, rejecting frames above [`MAX_FRAME_BYTES`].
pub async fn recv_message(stream: &mut TcpStream) -> std::io::Result<Message> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_ne_bytes(len_buf) as usize;

    if len == 0 || len >= MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame length out of bounds",
        ));
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    let text = String::from_utf8_lossy(&buf);
    Ok(Message::decode(&text))
}
