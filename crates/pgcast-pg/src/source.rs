//! The connection-source seam.
//!
//! Subscriptions hold one dedicated connection for their whole lifetime,
//! which may be hours; routing that through the general query pool would
//! starve short-lived traffic. The lifecycle manager therefore talks to an
//! explicitly-passed pool of dedicated connections through these traits, and
//! tests substitute [`crate::mock::MockPool`].

use std::future::Future;

use pgcast_core::{ChannelName, RawNotification};

use crate::error::Result;

/// Delivery callback registered per channel on one connection.
///
/// Invoked on the connection driver's dispatch path, so it must not block:
/// a blocked callback stalls delivery for every channel on that connection.
pub type NotificationCallback = Box<dyn Fn(RawNotification) + Send + Sync>;

/// Deregistration handle for one registered callback.
///
/// Stops delivery when [`stop`](CallbackHandle::stop) is called or the handle
/// is dropped. Stopping twice is a no-op.
pub struct CallbackHandle {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl CallbackHandle {
    pub fn new(stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop: Some(Box::new(stop)),
        }
    }

    pub fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

/// One dedicated connection able to run LISTEN/UNLISTEN and deliver
/// notifications.
pub trait ListenConnection: Send + Sync + 'static {
    /// Execute a statement, discarding any result.
    fn execute(&self, sql: &str) -> impl Future<Output = Result<()>> + Send;

    /// Register a delivery callback for one channel.
    ///
    /// Registration is local bookkeeping only; the server does not start
    /// delivering until LISTEN runs. Callers register before issuing LISTEN
    /// so no notification can arrive unrouted.
    fn on_notification(
        &self,
        channel: &ChannelName,
        callback: NotificationCallback,
    ) -> CallbackHandle;

    /// Resolves when the connection terminates: `None` for an orderly close,
    /// `Some(error)` when the connection failed.
    fn closed(&self) -> impl Future<Output = Option<crate::error::Error>> + Send;
}

/// Source of dedicated, long-lived connections, distinct from the general
/// query pool. Explicitly constructed and passed; no global state.
pub trait ListenerPool: Send + Sync + 'static {
    type Conn: ListenConnection;

    /// Check out a dedicated connection for the lifetime of one
    /// subscription.
    fn acquire(&self) -> impl Future<Output = Result<Self::Conn>> + Send;

    /// Return a connection. Called exactly once per acquired connection.
    fn release(&self, conn: Self::Conn) -> impl Future<Output = ()> + Send;

    /// Number of currently checked-out connections.
    fn active(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_callback_handle_stops_once() {
        let calls = Arc::new(AtomicUsize::new(0));

        let handle = CallbackHandle::new({
            let calls = calls.clone();
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        });

        handle.stop();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_handle_stops_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));

        {
            let _handle = CallbackHandle::new({
                let calls = calls.clone();
                move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
