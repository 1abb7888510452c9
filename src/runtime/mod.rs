//! Per-connection tasks and delivery plumbing.
//!
//! Each connection runs two Tokio tasks sharing one cancellation token:
//! - `reader`: reads frames, resolves ids, decodes and dispatches packets
//! - `writer`: drains the send queue, flushes and originates keep-alives
//!
//! Received events are either dispatched inline on the reader task or
//! queued on a shared [`ProcessingQueue`] (see [`Delivery`]).

mod queue;
pub(crate) mod reader;
pub(crate) mod writer;
mod work;

pub(crate) use queue::SendQueue;
pub use work::{Delivery, ProcessingQueue, WorkUnit};

use std::future::Future;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

tokio::task_local! {
    /// Present on every connection's reader and writer task.
    static LOOP_TASK: ();
}

/// Spawn one of a connection's loops, marked so that [`on_loop_task`]
/// can recognise it.
pub(crate) fn spawn_loop<F>(handle: &Handle, task: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    handle.spawn(LOOP_TASK.scope((), task))
}

/// Whether the caller runs on a connection's reader or writer task.
pub(crate) fn on_loop_task() -> bool {
    LOOP_TASK.try_with(|_| ()).is_ok()
}
