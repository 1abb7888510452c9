//! Outbound loop.

use crate::connection::Connection;
use crate::error::{EncodeError, Error, Result};
use crate::packet::{Packet, PacketEncoder};
use crate::packets::KeepAlivePacket;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// How long the stream gets to shut down after the loop ends.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

const END_OF_STREAM: &str = "End of stream";

/// Encode `packet` and write it as one frame. Returns the frame body length.
pub(crate) async fn write_packet<W>(writer: &mut W, packet: &dyn Packet) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let id = packet.id();
    let mut encoder = PacketEncoder::new(id);
    packet
        .encode(&mut encoder)
        .map_err(|source| Error::Encode { id, source })?;
    let body = encoder.finish();

    let length = i32::try_from(body.len()).map_err(|_| Error::Encode {
        id,
        source: EncodeError::FrameTooLarge(body.len()),
    })?;
    writer.write_i32(length).await?;
    writer.write_all(&body).await?;
    Ok(body.len())
}

/// Run the outbound loop until cancelled or the transport fails.
pub(crate) async fn run<W>(connection: Connection, writer: W, cancel: CancellationToken)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut writer = BufWriter::new(writer);
    let flush_each = connection.config().flush_each_packet();
    let keep_alive = connection.config().auto_keep_alive;
    let queue = connection.queue();
    debug!(connection = %connection.name(), flush_each, keep_alive, "Outbound loop started");

    let result: Result<()> = loop {
        if cancel.is_cancelled() {
            break Ok(());
        }

        if let Some(packet) = queue.pop() {
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    queue.written();
                    break Ok(());
                }
                sent = async {
                    let len = write_packet(&mut writer, packet.as_ref()).await?;
                    if flush_each || queue.is_empty() {
                        writer.flush().await?;
                    }
                    Ok::<_, Error>(len)
                } => sent,
            };
            queue.written();

            match sent {
                Ok(len) => {
                    connection.touch_sent();
                    trace!(connection = %connection.name(), id = packet.id(), len, "Packet sent");
                }
                Err(e) => break Err(e),
            }
            continue;
        }

        if keep_alive && Instant::now() >= connection.keep_alive_deadline() {
            connection.record_keep_alive();
            if connection.send(KeepAlivePacket::request()).is_ok() {
                trace!(connection = %connection.name(), "Connection idle, keep-alive queued");
            }
            continue;
        }

        let wake_at = if keep_alive {
            connection.keep_alive_deadline()
        } else {
            connection.idle_deadline(Instant::now())
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(()),
            _ = queue.notified() => {}
            _ = tokio::time::sleep_until(wake_at) => {}
        }
    };

    connection.mark_outbound_stopped();
    match result {
        Ok(()) => {}
        Err(e) if cancel.is_cancelled() || connection.is_closed() => {
            trace!(connection = %connection.name(), error = %e, "Write error after close");
        }
        Err(e) if e.is_end_of_stream() => {
            connection.on_connection_closed(END_OF_STREAM, true).await;
        }
        Err(e) => connection.on_connection_fail(e).await,
    }

    queue.clear();
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => trace!(connection = %connection.name(), error = %e, "Shutdown failed"),
        Err(_) => trace!(connection = %connection.name(), "Shutdown timed out"),
    }
    debug!(connection = %connection.name(), "Outbound loop stopped");
}
