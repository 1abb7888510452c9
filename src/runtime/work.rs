//! Deferred delivery.
//!
//! With [`Delivery::Deferred`], the inbound loop does not call listeners.
//! It wraps each event in a [`WorkUnit`] and pushes it on a
//! [`ProcessingQueue`] that may be shared by many connections. One task
//! claims the queue with [`ProcessingQueue::process`] and dispatches units
//! in arrival order.

use crate::connection::{Connection, ConnectionState};
use crate::error::{Error, Result};
use crate::packet::{Packet, PacketId};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Where received events are dispatched.
#[derive(Debug, Clone, Default)]
pub enum Delivery {
    /// On the connection's inbound task, as packets arrive.
    #[default]
    Inline,
    /// On whichever task drains the given queue.
    Deferred(ProcessingQueue),
}

enum WorkKind {
    PacketReceived(Box<dyn Packet>),
    UnknownIdReceived(PacketId),
}

/// One received event waiting to be dispatched.
pub struct WorkUnit {
    kind: WorkKind,
    connection: Connection,
}

impl WorkUnit {
    pub(crate) fn received(connection: Connection, packet: Box<dyn Packet>) -> Self {
        Self {
            kind: WorkKind::PacketReceived(packet),
            connection,
        }
    }

    pub(crate) fn unknown(connection: Connection, id: PacketId) -> Self {
        Self {
            kind: WorkKind::UnknownIdReceived(id),
            connection,
        }
    }

    /// Packet id carried by the event.
    pub fn id(&self) -> PacketId {
        match &self.kind {
            WorkKind::PacketReceived(packet) => packet.id(),
            WorkKind::UnknownIdReceived(id) => *id,
        }
    }

    /// Connection the event arrived on.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Run the listeners for this event. Returns the packet, if any.
    pub(crate) async fn dispatch(self) -> Option<Box<dyn Packet>> {
        match self.kind {
            WorkKind::PacketReceived(packet) => {
                self.connection.dispatch_packet(packet.as_ref()).await;
                Some(packet)
            }
            WorkKind::UnknownIdReceived(id) => {
                self.connection.dispatch_unknown(id);
                None
            }
        }
    }
}

impl fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            WorkKind::PacketReceived(_) => "packet",
            WorkKind::UnknownIdReceived(_) => "unknown",
        };
        f.debug_struct("WorkUnit")
            .field("kind", &kind)
            .field("id", &self.id())
            .field("connection", &self.connection.name())
            .finish()
    }
}

#[derive(Default)]
struct Shared {
    units: Mutex<VecDeque<WorkUnit>>,
    wake: Notify,
    claimed: AtomicBool,
    /// Deferred connections not yet closed.
    open: AtomicUsize,
}

/// FIFO of work units shared by deferred connections. Cheap to clone.
#[derive(Clone, Default)]
pub struct ProcessingQueue {
    shared: Arc<Shared>,
}

enum Next {
    Unit(WorkUnit),
    Wait,
    Done,
}

/// Releases the processing claim when dropped.
struct Claim<'a>(&'a AtomicBool);

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ProcessingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn units(&self) -> MutexGuard<'_, VecDeque<WorkUnit>> {
        self.shared
            .units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a unit. A connection that has already detached gets its unit
    /// back, since the claimant may have stopped waiting for it.
    pub(crate) fn push(&self, unit: WorkUnit) -> std::result::Result<(), WorkUnit> {
        let mut units = self.units();
        if unit.connection.state() == ConnectionState::Closed {
            return Err(unit);
        }
        trace!(connection = %unit.connection.name(), id = unit.id(), "Work unit queued");
        units.push_back(unit);
        drop(units);
        self.shared.wake.notify_one();
        Ok(())
    }

    pub(crate) fn attach(&self) {
        self.shared.open.fetch_add(1, Ordering::AcqRel);
    }

    /// Called after the connection is marked closed.
    pub(crate) fn detach(&self) {
        // Under the lock, so `push` and `next` see the count change in
        // order with the queue contents.
        let units = self.units();
        self.shared.open.fetch_sub(1, Ordering::AcqRel);
        drop(units);
        self.shared.wake.notify_one();
    }

    /// Remove and return every unit that belongs to `connection`, keeping
    /// the relative order of the rest.
    pub(crate) fn take_for(&self, connection: &Connection) -> Vec<WorkUnit> {
        let mut units = self.units();
        let (mine, others): (VecDeque<_>, VecDeque<_>) = units
            .drain(..)
            .partition(|unit| unit.connection.ptr_eq(connection));
        *units = others;
        mine.into()
    }

    fn next(&self) -> Next {
        let mut units = self.units();
        match units.pop_front() {
            Some(unit) => Next::Unit(unit),
            None if self.open_connections() == 0 => Next::Done,
            None => Next::Wait,
        }
    }

    /// Deferred connections started on this queue and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.shared.open.load(Ordering::Acquire)
    }

    /// Units waiting to be dispatched.
    pub fn len(&self) -> usize {
        self.units().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a task is currently inside [`process`](Self::process).
    pub fn is_claimed(&self) -> bool {
        self.shared.claimed.load(Ordering::Acquire)
    }

    /// Dispatch queued units on the calling task until the queue is empty
    /// and no deferred connection remains open.
    ///
    /// Only one task may process at a time; a second caller gets
    /// [`Error::AlreadyClaimed`]. Units still queued when their connection
    /// closed are dispatched as well.
    pub async fn process(&self) -> Result<()> {
        if self
            .shared
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyClaimed);
        }
        let _claim = Claim(&self.shared.claimed);
        debug!(connections = self.open_connections(), "Processing queue claimed");

        let mut dispatched = 0usize;
        loop {
            let next = self.next();
            match next {
                Next::Unit(unit) => {
                    unit.dispatch().await;
                    dispatched += 1;
                }
                Next::Done => break,
                Next::Wait => self.shared.wake.notified().await,
            }
        }

        debug!(dispatched, "Processing queue released");
        Ok(())
    }
}

impl fmt::Debug for ProcessingQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingQueue")
            .field("len", &self.len())
            .field("open_connections", &self.open_connections())
            .field("claimed", &self.is_claimed())
            .finish()
    }
}
