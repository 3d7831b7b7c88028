//! Bounded buffer between the delivery callback and the consumer.
//!
//! Single producer (the connection's dispatch path) and single consumer (the
//! subscription's recv loop). The push side never blocks: on overflow the
//! oldest buffered notification is dropped, keeping the newest N. Drops are
//! silent apart from a counter and a trace line; guaranteed delivery is a
//! layer above this primitive.

use std::collections::VecDeque;
use std::sync::Mutex;

use pgcast_core::RawNotification;
use tokio::sync::Notify;
use tracing::trace;

use crate::error::Error;

/// Default bound on buffered, not-yet-consumed notifications per
/// subscription.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Why the queue stopped accepting notifications.
#[derive(Debug)]
enum Terminal {
    /// Orderly end: cancellation or server-side connection close.
    Closed,
    /// The subscription failed; the error is handed to the consumer once.
    Failed(Option<Error>),
}

/// Result of one pull from the queue.
#[derive(Debug)]
pub enum Pull {
    Item(RawNotification),
    /// Orderly end of the sequence; no more items will ever arrive.
    Closed,
    /// Terminal failure. Reported once; subsequent pulls see `Closed`.
    Failed(Error),
}

#[derive(Default)]
struct State {
    buf: VecDeque<RawNotification>,
    terminal: Option<Terminal>,
    dropped: u64,
}

pub struct NotificationQueue {
    capacity: usize,
    state: Mutex<State>,
    notify: Notify,
}

impl NotificationQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    /// Enqueue without blocking, dropping the oldest entry on overflow.
    /// No-op once the queue is terminal.
    pub fn push(&self, notification: RawNotification) {
        let mut state = self.state.lock().unwrap();
        if state.terminal.is_some() {
            return;
        }

        if state.buf.len() == self.capacity {
            state.buf.pop_front();
            state.dropped += 1;
            trace!(
                channel = %notification.channel,
                dropped = state.dropped,
                "queue full, dropped oldest notification"
            );
        }
        state.buf.push_back(notification);
        drop(state);

        self.notify.notify_one();
    }

    /// Mark the queue terminal. The first terminal state wins; buffered items
    /// already accepted are still handed out before the terminal is reported.
    pub fn close(&self, error: Option<Error>) {
        let mut state = self.state.lock().unwrap();
        if state.terminal.is_none() {
            state.terminal = Some(match error {
                Some(e) => Terminal::Failed(Some(e)),
                None => Terminal::Closed,
            });
        }
        drop(state);

        self.notify.notify_one();
    }

    /// Discard anything buffered and go straight to `Closed`. Used when a
    /// decode failure makes the rest of the feed unusable.
    pub fn poison(&self) {
        let mut state = self.state.lock().unwrap();
        state.buf.clear();
        state.terminal = Some(Terminal::Closed);
        drop(state);

        self.notify.notify_one();
    }

    /// Dequeue the next notification, suspending while the queue is empty
    /// and not terminal.
    pub async fn pull(&self) -> Pull {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if let Some(notification) = state.buf.pop_front() {
                    return Pull::Item(notification);
                }

                match &mut state.terminal {
                    Some(Terminal::Failed(error)) => {
                        return match error.take() {
                            Some(e) => {
                                state.terminal = Some(Terminal::Closed);
                                Pull::Failed(e)
                            }
                            None => Pull::Closed,
                        };
                    }
                    Some(Terminal::Closed) => return Pull::Closed,
                    None => {}
                }
            }

            // notify_one stores a permit, so a push racing with this await
            // cannot be lost.
            self.notify.notified().await;
        }
    }

    /// Non-blocking variant of [`pull`](Self::pull). `None` means "nothing
    /// buffered right now".
    pub fn try_pull(&self) -> Option<Pull> {
        let mut state = self.state.lock().unwrap();
        if let Some(notification) = state.buf.pop_front() {
            return Some(Pull::Item(notification));
        }

        match &mut state.terminal {
            Some(Terminal::Failed(error)) => match error.take() {
                Some(e) => {
                    state.terminal = Some(Terminal::Closed);
                    Some(Pull::Failed(e))
                }
                None => Some(Pull::Closed),
            },
            Some(Terminal::Closed) => Some(Pull::Closed),
            None => None,
        }
    }

    /// Notifications discarded due to overflow so far.
    pub fn dropped(&self) -> u64 {
        self.state.lock().unwrap().dropped
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
