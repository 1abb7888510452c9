//! Inbound loop.

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::packet::PacketDecoder;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Bytes taken by the packet id inside a frame.
const ID_LEN: usize = 2;

const END_OF_STREAM: &str = "End of stream";

/// Read one frame: a big-endian `i32` length followed by that many bytes.
///
/// Lengths that cannot hold a packet id, or exceed `max_len`, are protocol
/// violations.
pub(crate) async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let length = reader.read_i32().await?;
    if length <= 0 {
        return Err(Error::ProtocolViolation(format!(
            "illegal frame length {length}"
        )));
    }

    let length = length as usize;
    if length < ID_LEN {
        return Err(Error::ProtocolViolation(format!(
            "frame of {length} byte has no packet id"
        )));
    }
    if length > max_len {
        return Err(Error::ProtocolViolation(format!(
            "frame length {length} exceeds limit {max_len}"
        )));
    }

    let mut frame = BytesMut::zeroed(length);
    reader.read_exact(&mut frame).await?;
    Ok(frame.freeze())
}

/// Run the inbound loop until the stream ends, fails or is cancelled.
pub(crate) async fn run<R>(connection: Connection, reader: R, cancel: CancellationToken)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let max_len = connection.config().max_frame_length;
    debug!(connection = %connection.name(), "Inbound loop started");

    let result = loop {
        if connection.is_closed() {
            break Ok(());
        }

        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(()),
            frame = read_frame(&mut reader, max_len) => frame,
        };

        let handled = match frame {
            Ok(frame) => handle_frame(&connection, frame).await,
            Err(e) => Err(e),
        };
        if let Err(e) = handled {
            break Err(e);
        }
    };

    match result {
        Ok(()) => {}
        Err(e) if cancel.is_cancelled() || connection.is_closed() => {
            trace!(connection = %connection.name(), error = %e, "Read error after close");
        }
        Err(e) if e.is_end_of_stream() => {
            connection.on_connection_closed(END_OF_STREAM, true).await;
        }
        Err(e) => connection.on_connection_fail(e).await,
    }
    debug!(connection = %connection.name(), "Inbound loop stopped");
}

/// Resolve, decode and dispatch one frame.
///
/// Only failures that must end the connection are returned.
async fn handle_frame(connection: &Connection, frame: Bytes) -> Result<()> {
    let len = frame.len();
    let mut payload = PacketDecoder::new(frame);
    let id = payload
        .read_i16()
        .map_err(|e| Error::ProtocolViolation(e.to_string()))?;
    connection.touch_received();

    let Some(mut packet) = connection.create_packet(id) else {
        trace!(connection = %connection.name(), id, len, "No packet type for id");
        connection.on_unknown_packet_received(id).await;
        return Ok(());
    };

    if let Err(source) = packet.decode(&mut payload) {
        if packet.is_critical() {
            return Err(Error::Decode { id, source });
        }
        warn!(connection = %connection.name(), id, error = %source, "Skipping undecodable packet");
        return Ok(());
    }

    if payload.remaining() > 0 {
        debug!(
            connection = %connection.name(),
            id,
            unread = payload.remaining(),
            "Packet payload not fully consumed"
        );
    }

    trace!(connection = %connection.name(), id, len, "Packet received");
    connection.on_packet_received(packet).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_read_frame() {
        let mut mock = Builder::new()
            .read(&3i32.to_be_bytes())
            .read(&[0xff, 0xfd, 0x01])
            .build();

        let frame = read_frame(&mut mock, 1024).await.unwrap();
        assert_eq!(&frame[..], &[0xff, 0xfd, 0x01]);
    }

    #[tokio::test]
    async fn test_read_frame_split_across_reads() {
        let mut mock = Builder::new()
            .read(&[0, 0])
            .read(&[0, 4, 0])
            .read(&[7, b'h'])
            .read(&[b'i'])
            .build();

        let frame = read_frame(&mut mock, 1024).await.unwrap();
        assert_eq!(&frame[..], &[0, 7, b'h', b'i']);
    }

    #[tokio::test]
    async fn test_illegal_lengths() {
        for length in [0i32, -1, i32::MIN, 1] {
            let mut mock = Builder::new().read(&length.to_be_bytes()).build();
            let err = read_frame(&mut mock, 1024).await.unwrap_err();
            assert!(
                matches!(err, Error::ProtocolViolation(_)),
                "length {length}: {err}"
            );
        }
    }

    #[tokio::test]
    async fn test_oversized_frame() {
        let mut mock = Builder::new().read(&65i32.to_be_bytes()).build();
        let err = read_frame(&mut mock, 64).await.unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_end_of_stream() {
        let mut mock = Builder::new()
            .read(&8i32.to_be_bytes())
            .read(&[0, 1, 2])
            .build();

        let err = read_frame(&mut mock, 1024).await.unwrap_err();
        assert!(err.is_end_of_stream());
    }
}
