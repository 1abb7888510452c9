//! framelink: length-prefixed packet framing over any duplex byte stream.
//!
//! A [`Connection`] turns a reader/writer pair into a stream of typed
//! packets:
//! - frames are `i32` big-endian length + `i16` packet id + payload
//! - packets are resolved through a per-connection [`Registry`]
//! - Handshake, Close and KeepAlive are handled by the connection itself
//! - events reach a [`PacketListener`] inline or through a shared
//!   [`ProcessingQueue`]
//!
//! ```no_run
//! use framelink::{Connection, ConnectionConfig};
//!
//! # async fn demo(stream: tokio::net::TcpStream) -> framelink::Result<()> {
//! let connection = Connection::builder()
//!     .name("client")
//!     .config(ConnectionConfig::default().with_auto_keep_alive(true))
//!     .start_stream(stream)?;
//! connection.send_handshake()?;
//! connection.close().await;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod listener;
pub mod options;
pub mod packet;
pub mod packets;
mod runtime;

pub use connection::{Connection, ConnectionBuilder, ConnectionState};
pub use error::{DecodeError, EncodeError, Error, RegistrationError, Result};
pub use listener::{NoopListener, PacketListener};
pub use options::{ConnectionConfig, TransportKind};
pub use packet::{Packet, PacketDecoder, PacketEncoder, PacketId, PacketType, Registry};
pub use runtime::{Delivery, ProcessingQueue, WorkUnit};
