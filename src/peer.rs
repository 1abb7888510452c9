//! Demo peer: TCP echo server and line client.

use crate::config::{Config, Mode};
use framelink::{
    Connection, DecodeError, Delivery, EncodeError, Error, Packet, PacketDecoder, PacketEncoder,
    PacketId, PacketListener, PacketType, ProcessingQueue,
};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

type BoxError = Box<dyn std::error::Error>;

/// One line of text.
#[derive(Debug, Default, Clone)]
pub struct TextPacket {
    pub text: String,
}

impl TextPacket {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Packet for TextPacket {
    fn id(&self) -> PacketId {
        Self::ID
    }

    fn decode(&mut self, buf: &mut PacketDecoder) -> Result<(), DecodeError> {
        self.text = buf.read_str()?;
        Ok(())
    }

    fn encode(&self, buf: &mut PacketEncoder) -> Result<(), EncodeError> {
        buf.write_str(&self.text)
    }
}

impl PacketType for TextPacket {
    const ID: PacketId = 0;
}

/// Sends every text packet back where it came from.
struct EchoListener;

impl PacketListener for EchoListener {
    fn packet_received(&self, connection: &Connection, packet: &dyn Packet) {
        let Some(text) = packet.downcast_ref::<TextPacket>() else {
            return;
        };
        debug!(connection = %connection.name(), len = text.text.len(), "Echoing text");
        if let Err(e) = connection.send(text.clone()) {
            debug!(connection = %connection.name(), error = %e, "Echo dropped");
        }
    }

    fn connection_failed(&self, connection: &Connection, error: &Error) {
        warn!(connection = %connection.name(), error = %error, "Peer failed");
    }

    fn connection_closed(&self, connection: &Connection, message: &str, expected: bool) {
        info!(connection = %connection.name(), reason = message, expected, "Peer disconnected");
    }

    fn unknown_packet_received(&self, connection: &Connection, id: PacketId) {
        debug!(connection = %connection.name(), id, "Ignoring unknown packet");
    }
}

/// Prints received text to stdout.
struct PrintListener;

impl PacketListener for PrintListener {
    fn packet_received(&self, _connection: &Connection, packet: &dyn Packet) {
        if let Some(text) = packet.downcast_ref::<TextPacket>() {
            println!("{}", text.text);
        }
    }

    fn connection_closed(&self, connection: &Connection, message: &str, expected: bool) {
        info!(
            connection = %connection.name(),
            reason = message,
            expected,
            approved = connection.is_version_approved(),
            "Disconnected"
        );
    }
}

/// Run the peer in the configured mode until interrupted.
pub async fn run(config: Config) -> Result<(), BoxError> {
    match &config.mode {
        Mode::Listen(addr) => listen(addr.parse()?, &config).await,
        Mode::Connect(addr) => connect(addr, &config).await,
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    TcpListener::from_std(socket.into())
}

/// Drain the shared queue whenever deferred connections are open.
fn spawn_processor(queue: ProcessingQueue, accepted: Arc<Notify>) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = queue.process().await {
                warn!(error = %e, "Packet processing stopped");
                return;
            }
            accepted.notified().await;
        }
    });
}

async fn listen(addr: SocketAddr, config: &Config) -> Result<(), BoxError> {
    let listener = create_listener(addr)?;
    info!(%addr, deferred = config.deferred, "Listening");

    let accepted = Arc::new(Notify::new());
    let delivery = if config.deferred {
        let queue = ProcessingQueue::new();
        spawn_processor(queue.clone(), accepted.clone());
        Delivery::Deferred(queue)
    } else {
        Delivery::Inline
    };

    let echo: Arc<dyn PacketListener> = Arc::new(EchoListener);
    let mut connections: Vec<Connection> = Vec::new();

    loop {
        let (stream, peer_addr) = tokio::select! {
            _ = signal::ctrl_c() => break,
            result = listener.accept() => result?,
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer_addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let connection = Connection::builder()
            .name(peer_addr.to_string())
            .config(config.connection.clone())
            .listener(echo.clone())
            .delivery(delivery.clone())
            .register::<TextPacket>()?
            .start_stream(stream)?;
        accepted.notify_one();

        connections.retain(|c| !c.is_closed());
        connections.push(connection);
        debug!(%peer_addr, open = connections.len(), "Accepted peer");
    }

    info!(open = connections.len(), "Shutting down");
    for connection in &connections {
        connection.close().await;
    }
    for connection in &connections {
        connection.join().await;
    }
    Ok(())
}

async fn connect(addr: &str, config: &Config) -> Result<(), BoxError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;

    let connection = Connection::builder()
        .name(addr)
        .config(config.connection.clone())
        .listener(Arc::new(PrintListener))
        .register::<TextPacket>()?
        .start_stream(stream)?;
    connection.send_handshake()?;
    info!(addr, "Connected, sending stdin lines");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = signal::ctrl_c() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        if connection.send(TextPacket::new(line)).is_err() {
            break;
        }
    }

    connection.close().await;
    connection.join().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use framelink::ConnectionConfig;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Collect(mpsc::UnboundedSender<String>);

    impl PacketListener for Collect {
        fn packet_received(&self, _connection: &Connection, packet: &dyn Packet) {
            if let Some(text) = packet.downcast_ref::<TextPacket>() {
                let _ = self.0.send(text.text.clone());
            }
        }
    }

    fn start(
        stream: tokio::io::DuplexStream,
        listener: Arc<dyn PacketListener>,
        delivery: Delivery,
    ) -> Connection {
        Connection::builder()
            .config(ConnectionConfig::default())
            .listener(listener)
            .delivery(delivery)
            .register::<TextPacket>()
            .unwrap()
            .start_stream(stream)
            .unwrap()
    }

    #[tokio::test]
    async fn test_echo_inline() {
        let (left, right) = tokio::io::duplex(4096);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _server = start(left, Arc::new(EchoListener), Delivery::Inline);
        let client = start(right, Arc::new(Collect(tx)), Delivery::Inline);

        client.send(TextPacket::new("ping")).unwrap();
        let echoed = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap();
        assert_eq!(echoed.as_deref(), Some("ping"));
    }

    #[tokio::test]
    async fn test_echo_deferred() {
        let (left, right) = tokio::io::duplex(4096);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = ProcessingQueue::new();
        let accepted = Arc::new(Notify::new());
        let server = start(left, Arc::new(EchoListener), Delivery::Deferred(queue.clone()));
        accepted.notify_one();
        spawn_processor(queue.clone(), accepted);
        let client = start(right, Arc::new(Collect(tx)), Delivery::Inline);

        client.send(TextPacket::new("one")).unwrap();
        client.send(TextPacket::new("two")).unwrap();
        for expected in ["one", "two"] {
            let echoed = tokio::time::timeout(Duration::from_secs(3), rx.recv())
                .await
                .unwrap();
            assert_eq!(echoed.as_deref(), Some(expected));
        }

        server.close().await;
        assert_eq!(queue.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_create_listener_binds_ephemeral_port() {
        let listener = create_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
