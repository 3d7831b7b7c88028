//! Subscription lifecycle management.
//!
//! A subscription owns one dedicated connection for its whole life. The
//! subscribe path registers the delivery callback, issues LISTEN, and only
//! returns once the server has acknowledged it; the return of `subscribe`
//! is the safe-to-publish point. From then on a background lifecycle task
//! waits for whichever comes first:
//!
//! - cancellation (the `Subscription` is closed or dropped),
//! - the connection terminating, orderly or not.
//!
//! Either way the same teardown runs exactly once: stop the callback, issue
//! UNLISTEN (cancellation only; a dead connection is already unsubscribed),
//! release the connection, finish the queue. A decode failure on the consumer
//! side feeds the cancellation path, so all three termination triggers funnel
//! into the one teardown.
//!
//! There is no reconnect: a failed subscription ends its sequence with the
//! error and callers re-subscribe if they want to continue.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use pgcast_core::{sql, ChannelDescriptor, ChannelName, Event};
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::queue::{NotificationQueue, Pull, DEFAULT_QUEUE_CAPACITY};
use crate::source::{ListenConnection, ListenerPool};

/// Entry point for subscribing to typed channels.
///
/// Holds the dedicated-connection pool; cheap to clone per call site via the
/// shared pool handle. Each `subscribe` call produces an independent
/// subscription with its own connection and buffer, so two subscribers on
/// the same channel each get every notification (broadcast, not work-queue).
pub struct NotifyHub<P> {
    pool: Arc<P>,
    queue_capacity: usize,
}

impl<P: ListenerPool> NotifyHub<P> {
    pub fn new(pool: Arc<P>) -> Self {
        Self {
            pool,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Override the per-subscription buffer bound.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Subscribe to a channel.
    ///
    /// Returns only after LISTEN has been acknowledged: once this returns, a
    /// concurrent publisher's NOTIFY will be observed. Acquisition or LISTEN
    /// failures surface here synchronously; no background task exists until
    /// this succeeds.
    pub async fn subscribe<T>(&self, descriptor: &ChannelDescriptor<T>) -> Result<Subscription<T>> {
        let channel = descriptor.name().clone();
        let conn = self.pool.acquire().await?;

        let queue = Arc::new(NotificationQueue::new(self.queue_capacity));

        // Register before LISTEN: a notification delivered between the two
        // commands must already have a route into the queue.
        let callback = conn.on_notification(&channel, {
            let queue = queue.clone();
            Box::new(move |raw| queue.push(raw))
        });

        if let Err(e) = conn.execute(&sql::listen_sql(&channel)).await {
            callback.stop();
            self.pool.release(conn).await;
            return Err(e);
        }

        debug!(channel = %channel, capacity = self.queue_capacity, "subscribed");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let cleanup = Arc::new(CleanupSlot::default());
        let task = tokio::spawn(run_lifecycle(
            self.pool.clone(),
            conn,
            callback,
            queue.clone(),
            shutdown_rx,
            cleanup.clone(),
            channel.clone(),
        ));

        Ok(Subscription {
            channel,
            queue,
            shutdown: Some(shutdown_tx),
            task: Some(task),
            cleanup,
            _payload: PhantomData,
        })
    }
}

/// A live subscription: the pull side of one channel's notification feed.
///
/// Dropping it cancels the subscription and cleans up in the background;
/// [`close`](Subscription::close) does the same but waits for teardown and
/// surfaces cleanup errors.
pub struct Subscription<T> {
    channel: ChannelName,
    queue: Arc<NotificationQueue>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    cleanup: Arc<CleanupSlot>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl<T: DeserializeOwned> Subscription<T> {
    /// Receive the next decoded event.
    ///
    /// Suspends while nothing is buffered. `None` means the subscription has
    /// terminated and nothing more will arrive. A decode failure is returned
    /// once and terminates the subscription; within one subscription events
    /// come out in server delivery order.
    pub async fn recv(&mut self) -> Option<Result<Event<T>>> {
        let pull = self.queue.pull().await;
        self.handle_pull(pull)
    }

    /// Non-blocking poll. `None` means nothing is buffered right now (or the
    /// subscription has terminated); it never suspends.
    pub fn try_recv(&mut self) -> Option<Result<Event<T>>> {
        let pull = self.queue.try_pull()?;
        self.handle_pull(pull)
    }

    fn handle_pull(&mut self, pull: Pull) -> Option<Result<Event<T>>> {
        match pull {
            Pull::Item(raw) => match raw.decode::<T>() {
                Ok(event) => Some(Ok(event)),
                Err(e) => {
                    // Terminal for the whole subscription, not just the
                    // message: discard the rest and start teardown.
                    self.queue.poison();
                    self.begin_shutdown();
                    Some(Err(e.into()))
                }
            },
            Pull::Closed => None,
            Pull::Failed(e) => Some(Err(e)),
        }
    }
}

impl<T> Subscription<T> {
    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    /// Notifications silently discarded due to buffer overflow.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    /// Cancel the subscription and wait for teardown to finish.
    ///
    /// When this returns the dedicated connection has been released. An
    /// UNLISTEN failure during teardown is surfaced as [`Error::Cleanup`];
    /// the connection is released regardless.
    pub async fn close(mut self) -> Result<()> {
        self.begin_shutdown();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(channel = %self.channel, error = %e, "lifecycle task failed");
            }
        }
        self.cleanup.take()
    }

    fn begin_shutdown(&mut self) {
        // The sender is single-use, which makes racing triggers harmless.
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        // Cleanup is tied to the value, not to an explicit call: dropping
        // signals the lifecycle task, which tears down in the background.
        self.begin_shutdown();
    }
}

#[derive(Debug)]
enum Trigger {
    Cancelled,
    ConnectionClosed,
    ConnectionLost(Error),
}

impl Trigger {
    fn name(&self) -> &'static str {
        match self {
            Trigger::Cancelled => "cancelled",
            Trigger::ConnectionClosed => "connection_closed",
            Trigger::ConnectionLost(_) => "connection_lost",
        }
    }
}

async fn run_lifecycle<P: ListenerPool>(
    pool: Arc<P>,
    conn: P::Conn,
    callback: crate::source::CallbackHandle,
    queue: Arc<NotificationQueue>,
    mut shutdown: oneshot::Receiver<()>,
    cleanup: Arc<CleanupSlot>,
    channel: ChannelName,
) {
    let trigger = tokio::select! {
        // Resolves on explicit shutdown and on Subscription drop alike.
        _ = &mut shutdown => Trigger::Cancelled,
        closed = conn.closed() => match closed {
            Some(error) => Trigger::ConnectionLost(error),
            None => Trigger::ConnectionClosed,
        },
    };

    debug!(channel = %channel, trigger = trigger.name(), "subscription terminating");

    callback.stop();

    // UNLISTEN only on cancellation: a terminated connection is already
    // unsubscribed server-side.
    let unlisten = match trigger {
        Trigger::Cancelled => conn.execute(&sql::unlisten_sql(&channel)).await,
        _ => Ok(()),
    };

    pool.release(conn).await;

    match trigger {
        Trigger::Cancelled | Trigger::ConnectionClosed => queue.close(None),
        Trigger::ConnectionLost(error) => queue.close(Some(error)),
    }

    cleanup.record(unlisten.map_err(|e| Error::Cleanup {
        channel: channel.to_string(),
        message: e.to_string(),
    }));
}

/// Where the lifecycle task records the outcome of teardown, for
/// [`Subscription::close`] to pick up. First write wins.
#[derive(Default)]
struct CleanupSlot {
    result: Mutex<Option<Result<()>>>,
}

impl CleanupSlot {
    fn record(&self, result: Result<()>) {
        if let Err(e) = &result {
            warn!(error = %e, "subscription cleanup failed");
        }
        let mut slot = self.result.lock().unwrap();
        if slot.is_none() {
            *slot = Some(result);
        }
    }

    fn take(&self) -> Result<()> {
        self.result.lock().unwrap().take().unwrap_or(Ok(()))
    }
}
