//! Connection façade.
//!
//! A [`Connection`] wraps an already-connected reader/writer pair and runs
//! two tasks for its lifetime:
//!
//! - the inbound loop (`runtime::reader`) frames and decodes packets
//! - the outbound loop (`runtime::writer`) drains the send queue
//!
//! ## Lifecycle
//!
//! ```text
//! Open --close()/Close packet/EOF/failure--> Closing --drained or 5s--> Closed
//! ```
//!
//! In `Closing` a final `ClosePacket` is queued and given up to
//! [`CLOSE_TIMEOUT`] to reach the transport. Both loops are then cancelled
//! and release their stream halves.
//!
//! ## Delivery
//!
//! With [`Delivery::Inline`] received packets are dispatched on the inbound
//! task. With [`Delivery::Deferred`] they are queued on a shared
//! [`ProcessingQueue`](crate::ProcessingQueue) and dispatched by whoever
//! drains it (`ProcessingQueue::process` or [`Connection::cached_packets`]).
//! Control packets always reach the internal control listener first.

mod control;

use crate::error::{Error, RegistrationError, Result};
use crate::listener::{NoopListener, PacketListener};
use crate::options::ConnectionConfig;
use crate::packet::{Packet, PacketId, PacketType, Registry};
use crate::packets::{self, ClosePacket, HandshakeKind, HandshakePacket};
use crate::runtime::{self, reader, writer, Delivery, SendQueue, WorkUnit};
use chrono::{DateTime, Utc};
use control::ControlListener;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Upper bound on how long `close()` waits for the send queue to drain.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Drain check interval while closing.
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Stand-in horizon for idle periods too long to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365);

const CLOSED_LOCALLY: &str = "Connection closed locally";

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    /// `close()` started; the final Close packet is draining.
    Closing,
    /// Terminal: both loops are cancelled. After a `close()` from outside
    /// the loops they have also exited and released the stream.
    Closed,
}

/// Timestamps driving keep-alive decisions.
struct Activity {
    /// Connection start until the first packet arrives.
    last_received: Instant,
    last_received_at: Option<DateTime<Utc>>,
    last_sent_at: Option<DateTime<Utc>>,
    last_keep_alive: Option<Instant>,
}

struct Inner {
    name: String,
    config: ConnectionConfig,
    state: AtomicU8,
    failure_notified: AtomicBool,
    close_notified: AtomicBool,
    handshake_sent: AtomicBool,
    version_approved: AtomicBool,
    remote_version: Mutex<Option<i32>>,
    activity: Mutex<Activity>,
    registry: RwLock<Registry>,
    queue: SendQueue,
    listener: Arc<dyn PacketListener>,
    control: ControlListener,
    delivery: Delivery,
    shutdown: CancellationToken,
    outbound_stopped: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to one framed connection. Cheap to clone.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builds and starts a [`Connection`].
pub struct ConnectionBuilder {
    name: String,
    config: ConnectionConfig,
    listener: Option<Arc<dyn PacketListener>>,
    delivery: Delivery,
    registry: Registry,
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self {
            name: String::new(),
            config: ConnectionConfig::default(),
            listener: None,
            delivery: Delivery::Inline,
            registry: Registry::with_control_packets(),
        }
    }
}

impl ConnectionBuilder {
    /// Name used in logs and diagnostics.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Application listener. Without one, events are dropped.
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn PacketListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    #[must_use]
    pub fn delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }

    /// Register an application packet type before any frame is read.
    pub fn register<P: PacketType>(mut self) -> Result<Self> {
        check_application_id(P::ID)?;
        self.registry.register::<P>()?;
        Ok(self)
    }

    /// Start the connection over separate read and write halves.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start<R, W>(self, reader: R, writer: W) -> Result<Connection>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let shutdown = CancellationToken::new();

        let connection = Connection {
            inner: Arc::new(Inner {
                name: self.name,
                config: self.config,
                state: AtomicU8::new(OPEN),
                failure_notified: AtomicBool::new(false),
                close_notified: AtomicBool::new(false),
                handshake_sent: AtomicBool::new(false),
                version_approved: AtomicBool::new(false),
                remote_version: Mutex::new(None),
                activity: Mutex::new(Activity {
                    last_received: Instant::now(),
                    last_received_at: None,
                    last_sent_at: None,
                    last_keep_alive: None,
                }),
                registry: RwLock::new(self.registry),
                queue: SendQueue::default(),
                listener: self
                    .listener
                    .unwrap_or_else(|| Arc::new(NoopListener) as Arc<dyn PacketListener>),
                control: ControlListener,
                delivery: self.delivery,
                shutdown: shutdown.clone(),
                outbound_stopped: AtomicBool::new(false),
                tasks: Mutex::new(Vec::with_capacity(2)),
            }),
        };

        if let Delivery::Deferred(queue) = &connection.inner.delivery {
            queue.attach();
        }

        let inbound = runtime::spawn_loop(
            &handle,
            reader::run(connection.clone(), reader, shutdown.clone()),
        );
        let outbound =
            runtime::spawn_loop(&handle, writer::run(connection.clone(), writer, shutdown));
        lock(&connection.inner.tasks).extend([inbound, outbound]);

        debug!(
            connection = %connection.name(),
            deferred = connection.is_deferred(),
            keep_alive = connection.inner.config.auto_keep_alive,
            "Connection started"
        );
        Ok(connection)
    }

    /// Start the connection over a single duplex stream.
    pub fn start_stream<S>(self, stream: S) -> Result<Connection>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        self.start(reader, writer)
    }
}

fn check_application_id(id: PacketId) -> Result<(), RegistrationError> {
    if packets::is_reserved(id) {
        return Err(RegistrationError::Reserved(id));
    }
    Ok(())
}

impl Connection {
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::default()
    }

    /// Start a connection with default settings and inline delivery.
    pub fn new<R, W>(
        reader: R,
        writer: W,
        name: impl Into<String>,
        listener: Option<Arc<dyn PacketListener>>,
    ) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut builder = Self::builder().name(name);
        if let Some(listener) = listener {
            builder = builder.listener(listener);
        }
        builder.start(reader, writer)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        match self.inner.state.load(Ordering::Acquire) {
            OPEN => ConnectionState::Open,
            CLOSING => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    /// True from the moment closing starts.
    pub fn is_closed(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) != OPEN
    }

    /// True when the last handshake from the peer carried our version.
    pub fn is_version_approved(&self) -> bool {
        self.inner.version_approved.load(Ordering::Acquire)
    }

    pub fn is_handshake_sent(&self) -> bool {
        self.inner.handshake_sent.load(Ordering::Acquire)
    }

    /// Peer protocol version, `None` until a handshake arrives.
    pub fn remote_protocol_version(&self) -> Option<i32> {
        *lock(&self.inner.remote_version)
    }

    /// Wall-clock time of the last received frame.
    pub fn last_packet_received(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner.activity).last_received_at
    }

    /// Wall-clock time of the last frame handed to the transport.
    pub fn last_packet_sent(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner.activity).last_sent_at
    }

    /// Packets queued or being written.
    pub fn pending_packets(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self.inner.delivery, Delivery::Deferred(_))
    }

    /// Whether both handles refer to the same connection.
    pub fn ptr_eq(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register an application packet type.
    ///
    /// Frames with this id that arrived before registration were already
    /// reported as unknown; prefer [`ConnectionBuilder::register`].
    pub fn register<P: PacketType>(&self) -> Result<()> {
        check_application_id(P::ID)?;
        self.inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register::<P>()?;
        Ok(())
    }

    /// Queue a packet for sending.
    pub fn send<P: Packet>(&self, packet: P) -> Result<()> {
        self.send_boxed(Box::new(packet))
    }

    pub fn send_boxed(&self, packet: Box<dyn Packet>) -> Result<()> {
        if self.is_closed() {
            trace!(connection = %self.name(), id = packet.id(), "Dropping packet for closed connection");
            return Err(Error::Closed);
        }
        self.inner.queue.push(packet);
        Ok(())
    }

    /// Send a handshake request; the peer answers with its version.
    pub fn send_handshake(&self) -> Result<()> {
        self.send_handshake_as(HandshakeKind::Request)
    }

    pub fn send_handshake_as(&self, kind: HandshakeKind) -> Result<()> {
        self.send(HandshakePacket::new(kind, self.inner.config.protocol_version))?;
        self.inner.handshake_sent.store(true, Ordering::Release);
        Ok(())
    }

    /// Close the connection. Idempotent.
    ///
    /// Notifies the listeners (unless a closure was already reported), sends
    /// a Close packet, waits up to [`CLOSE_TIMEOUT`] for the queue to drain,
    /// then stops both loops and waits for them to release the stream.
    ///
    /// When the close starts on one of the connection's own loops (a Close
    /// packet from the peer, a transport failure, a listener hook with
    /// inline delivery) the loops are only cancelled; they release the
    /// stream as they exit and [`join`](Self::join) waits for that.
    pub async fn close(&self) {
        self.close_with(CLOSED_LOCALLY, true).await;
    }

    async fn close_with(&self, message: &str, expected: bool) {
        if self
            .inner
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        debug!(connection = %self.name(), reason = message, expected, "Closing connection");

        self.notify_closed(message, expected);

        self.inner.queue.push(Box::new(ClosePacket::default()));
        let deadline = Instant::now() + CLOSE_TIMEOUT;
        while !self.inner.queue.is_drained()
            && !self.inner.outbound_stopped.load(Ordering::Acquire)
            && Instant::now() < deadline
        {
            tokio::time::sleep(CLOSE_POLL_INTERVAL).await;
        }
        if !self.inner.queue.is_drained() {
            debug!(
                connection = %self.name(),
                pending = self.inner.queue.len(),
                "Close deadline reached with unsent packets"
            );
        }

        self.inner.shutdown.cancel();
        if !runtime::on_loop_task() {
            self.join().await;
        }
        self.inner.state.store(CLOSED, Ordering::Release);

        if let Delivery::Deferred(queue) = &self.inner.delivery {
            queue.detach();
        }
        debug!(connection = %self.name(), "Connection closed");
    }

    fn notify_closed(&self, message: &str, expected: bool) {
        if self.inner.close_notified.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.control.connection_closed(self, message, expected);
        self.inner.listener.connection_closed(self, message, expected);
    }

    /// Dispatch this connection's queued events and return the received
    /// packets, in arrival order.
    ///
    /// Returns `None` with inline delivery, where nothing is queued.
    pub async fn cached_packets(&self) -> Option<Vec<Box<dyn Packet>>> {
        let Delivery::Deferred(queue) = &self.inner.delivery else {
            return None;
        };

        let mut packets = Vec::new();
        for unit in queue.take_for(self) {
            if let Some(packet) = unit.dispatch().await {
                packets.push(packet);
            }
        }
        Some(packets)
    }

    /// Wait until both loops have finished.
    ///
    /// Must not be called from the connection's own loops, which includes
    /// listener hooks under inline delivery.
    pub async fn join(&self) {
        let tasks = std::mem::take(&mut *lock(&self.inner.tasks));
        for task in tasks {
            if let Err(e) = task.await {
                warn!(connection = %self.name(), error = %e, "Connection task ended abnormally");
            }
        }
    }

    pub(crate) fn create_packet(&self, id: PacketId) -> Option<Box<dyn Packet>> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .create(id)
    }

    pub(crate) fn queue(&self) -> &SendQueue {
        &self.inner.queue
    }

    pub(crate) fn touch_received(&self) {
        let mut activity = lock(&self.inner.activity);
        activity.last_received = Instant::now();
        activity.last_received_at = Some(Utc::now());
    }

    pub(crate) fn touch_sent(&self) {
        lock(&self.inner.activity).last_sent_at = Some(Utc::now());
    }

    /// When the next keep-alive is due if nothing arrives.
    pub(crate) fn keep_alive_deadline(&self) -> Instant {
        let activity = lock(&self.inner.activity);
        let since = match activity.last_keep_alive {
            Some(sent) if sent > activity.last_received => sent,
            _ => activity.last_received,
        };
        self.idle_deadline(since)
    }

    /// One idle period after `since`, capped at a far-future instant.
    pub(crate) fn idle_deadline(&self, since: Instant) -> Instant {
        let idle = self.inner.config.idle_period();
        since
            .checked_add(idle)
            .or_else(|| since.checked_add(FAR_FUTURE))
            .unwrap_or(since)
    }

    pub(crate) fn record_keep_alive(&self) {
        lock(&self.inner.activity).last_keep_alive = Some(Instant::now());
    }

    pub(crate) fn mark_outbound_stopped(&self) {
        self.inner.outbound_stopped.store(true, Ordering::Release);
    }

    pub(crate) fn set_remote_version(&self, version: i32) {
        *lock(&self.inner.remote_version) = Some(version);
        self.inner
            .version_approved
            .store(version == self.inner.config.protocol_version, Ordering::Release);
    }

    pub(crate) async fn on_packet_received(&self, packet: Box<dyn Packet>) {
        match &self.inner.delivery {
            Delivery::Inline => self.dispatch_packet(packet.as_ref()).await,
            Delivery::Deferred(queue) => {
                if let Err(unit) = queue.push(WorkUnit::received(self.clone(), packet)) {
                    trace!(connection = %self.name(), "Detached, dispatching inline");
                    unit.dispatch().await;
                }
            }
        }
    }

    pub(crate) async fn on_unknown_packet_received(&self, id: PacketId) {
        match &self.inner.delivery {
            Delivery::Inline => self.dispatch_unknown(id),
            Delivery::Deferred(queue) => {
                if let Err(unit) = queue.push(WorkUnit::unknown(self.clone(), id)) {
                    unit.dispatch().await;
                }
            }
        }
    }

    /// Route a packet: control packets to the control listener first, and
    /// to the application only when configured.
    pub(crate) async fn dispatch_packet(&self, packet: &dyn Packet) {
        if packets::is_control(packet.id()) {
            self.inner.control.packet_received(self, packet).await;
            if self.inner.config.notify_control_packets {
                self.inner.listener.packet_received(self, packet);
            }
        } else {
            self.inner.listener.packet_received(self, packet);
        }
    }

    pub(crate) fn dispatch_unknown(&self, id: PacketId) {
        self.inner.control.unknown_packet_received(self, id);
        self.inner.listener.unknown_packet_received(self, id);
    }

    /// Report a failure once and close the connection.
    pub(crate) async fn on_connection_fail(&self, error: Error) {
        if self.is_closed() || self.inner.failure_notified.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!(connection = %self.name(), error = %error, "Connection failed");
        self.inner.control.connection_failed(self, &error);
        self.inner.listener.connection_failed(self, &error);
        self.close_with(&error.to_string(), false).await;
    }

    /// Report a closure once and close the connection.
    pub(crate) async fn on_connection_closed(&self, message: &str, expected: bool) {
        if self.is_closed() {
            return;
        }
        self.close_with(message, expected).await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("version_approved", &self.is_version_approved())
            .field("deferred", &self.is_deferred())
            .finish()
    }
}
