//! Outbound packet queue.

use crate::packet::Packet;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::Notify;

/// FIFO of packets waiting for the outbound loop.
///
/// Many producers push; only the outbound loop pops. The packet list and
/// the wake-up signal are guarded separately.
#[derive(Default)]
pub(crate) struct SendQueue {
    packets: Mutex<VecDeque<Box<dyn Packet>>>,
    wake: Notify,
    /// Packets pushed but not yet written to the transport.
    pending: AtomicUsize,
}

impl SendQueue {
    pub(crate) fn push(&self, packet: Box<dyn Packet>) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.packets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(packet);
        self.wake.notify_one();
    }

    /// Take the oldest packet. The caller must call [`written`](Self::written)
    /// once it has been handed to the transport.
    pub(crate) fn pop(&self) -> Option<Box<dyn Packet>> {
        self.packets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub(crate) fn written(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    /// True once every pushed packet has been written.
    pub(crate) fn is_drained(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }

    pub(crate) fn len(&self) -> usize {
        self.packets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything still queued.
    pub(crate) fn clear(&self) {
        let mut packets = self.packets.lock().unwrap_or_else(PoisonError::into_inner);
        self.pending.fetch_sub(packets.len(), Ordering::AcqRel);
        packets.clear();
    }

    /// Resolves after the next [`push`](Self::push), or immediately if a push
    /// happened since the last wake-up.
    pub(crate) async fn notified(&self) {
        self.wake.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::{ClosePacket, KeepAlivePacket};
    use std::time::Duration;

    #[test]
    fn test_fifo_and_drain_accounting() {
        let queue = SendQueue::default();
        assert!(queue.is_drained());

        queue.push(Box::new(KeepAlivePacket::request()));
        queue.push(Box::new(ClosePacket::default()));
        assert_eq!(queue.len(), 2);
        assert!(!queue.is_drained());

        assert!(queue.pop().unwrap().is::<KeepAlivePacket>());
        queue.written();
        // Second packet still pending
        assert!(!queue.is_drained());

        assert!(queue.pop().unwrap().is::<ClosePacket>());
        assert!(!queue.is_drained());
        queue.written();
        assert!(queue.is_drained());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_clear_resets_pending() {
        let queue = SendQueue::default();
        queue.push(Box::new(KeepAlivePacket::request()));
        queue.push(Box::new(KeepAlivePacket::response()));

        queue.clear();
        assert_eq!(queue.len(), 0);
        assert!(queue.is_drained());
    }

    #[tokio::test]
    async fn test_push_before_wait_is_not_lost() {
        let queue = SendQueue::default();
        queue.push(Box::new(KeepAlivePacket::request()));

        tokio::time::timeout(Duration::from_secs(1), queue.notified())
            .await
            .expect("stored wake-up should resolve immediately");
    }
}
