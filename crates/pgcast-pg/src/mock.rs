//! In-memory listener pool for testing.
//!
//! Stands in for both the pool and the server: `notify` plays the database's
//! fan-out, delivering to every acquired connection with a callback
//! registered for the channel. Operations are recorded so tests can assert
//! on ordering (register-before-LISTEN, exactly-one-UNLISTEN) and on
//! connection accounting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use pgcast_core::{ChannelName, RawNotification};
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::source::{CallbackHandle, ListenConnection, ListenerPool, NotificationCallback};

const DEFAULT_SENDER_PID: i32 = 4242;

/// One recorded pool or connection operation, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOp {
    Acquire { conn: u64 },
    Register { conn: u64, channel: String },
    Unregister { conn: u64, channel: String },
    Execute { conn: u64, sql: String },
    Release { conn: u64 },
}

#[derive(Clone)]
enum ConnState {
    Open,
    Closed(Option<String>),
}

struct ChannelCallbacks {
    channel: ChannelName,
    entries: Vec<(u64, NotificationCallback)>,
}

struct ConnShared {
    id: u64,
    next_callback_id: AtomicU64,
    callbacks: Mutex<HashMap<String, ChannelCallbacks>>,
    closed: watch::Sender<ConnState>,
}

struct PoolState {
    next_conn_id: u64,
    conns: HashMap<u64, Arc<ConnShared>>,
    peak: usize,
    ops: Vec<MockOp>,
    fail_acquire: Option<String>,
    fail_execute: Option<String>,
    unsupported: Option<String>,
    sender_pid: i32,
}

/// A mock listener pool for testing.
pub struct MockPool {
    state: Arc<Mutex<PoolState>>,
}

impl Default for MockPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPool {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                next_conn_id: 1,
                conns: HashMap::new(),
                peak: 0,
                ops: Vec::new(),
                fail_acquire: None,
                fail_execute: None,
                unsupported: None,
                sender_pid: DEFAULT_SENDER_PID,
            })),
        }
    }

    /// A pool whose acquire always fails.
    pub fn failing_acquire(message: impl Into<String>) -> Self {
        let pool = Self::new();
        pool.state.lock().unwrap().fail_acquire = Some(message.into());
        pool
    }

    /// A pool whose connections fail every statement.
    pub fn failing_execute(message: impl Into<String>) -> Self {
        let pool = Self::new();
        pool.state.lock().unwrap().fail_execute = Some(message.into());
        pool
    }

    /// A pool that cannot provide dedicated connections at all.
    pub fn unsupported(message: impl Into<String>) -> Self {
        let pool = Self::new();
        pool.state.lock().unwrap().unsupported = Some(message.into());
        pool
    }

    /// Play the server: fan one notification out to every acquired
    /// connection with a callback registered for `channel`.
    pub fn notify(&self, channel: &str, payload: &str) {
        let pid = self.state.lock().unwrap().sender_pid;
        self.notify_from(channel, payload, pid);
    }

    /// `notify` with an explicit sender backend pid.
    pub fn notify_from(&self, channel: &str, payload: &str, sender_pid: i32) {
        let conns: Vec<Arc<ConnShared>> = {
            let state = self.state.lock().unwrap();
            state.conns.values().cloned().collect()
        };

        for conn in conns {
            let callbacks = conn.callbacks.lock().unwrap();
            if let Some(registered) = callbacks.get(channel) {
                for (_, callback) in &registered.entries {
                    callback(RawNotification {
                        channel: registered.channel.clone(),
                        payload: payload.to_string(),
                        sender_pid,
                    });
                }
            }
        }
    }

    /// Terminate every acquired connection, as the server or network would:
    /// `None` is an orderly close, `Some` a connection error.
    pub fn close_connections(&self, error: Option<&str>) {
        let conns: Vec<Arc<ConnShared>> = {
            let state = self.state.lock().unwrap();
            state.conns.values().cloned().collect()
        };

        for conn in conns {
            let _ = conn
                .closed
                .send(ConnState::Closed(error.map(str::to_string)));
        }
    }

    /// Highest number of simultaneously checked-out connections seen.
    pub fn peak_active(&self) -> usize {
        self.state.lock().unwrap().peak
    }

    /// All recorded operations, in order.
    pub fn ops(&self) -> Vec<MockOp> {
        self.state.lock().unwrap().ops.clone()
    }

    /// All executed SQL, in order.
    pub fn executed(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .ops
            .iter()
            .filter_map(|op| match op {
                MockOp::Execute { sql, .. } => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }
}

impl ListenerPool for MockPool {
    type Conn = MockConn;

    async fn acquire(&self) -> Result<MockConn> {
        let mut state = self.state.lock().unwrap();

        if let Some(message) = &state.unsupported {
            return Err(Error::SubscriptionsUnsupported(message.clone()));
        }
        if let Some(message) = &state.fail_acquire {
            return Err(Error::Connection(message.clone()));
        }

        let id = state.next_conn_id;
        state.next_conn_id += 1;

        let shared = Arc::new(ConnShared {
            id,
            next_callback_id: AtomicU64::new(1),
            callbacks: Mutex::new(HashMap::new()),
            closed: watch::channel(ConnState::Open).0,
        });

        state.conns.insert(id, shared.clone());
        state.peak = state.peak.max(state.conns.len());
        state.ops.push(MockOp::Acquire { conn: id });

        Ok(MockConn {
            shared,
            pool: self.state.clone(),
        })
    }

    async fn release(&self, conn: MockConn) {
        let mut state = self.state.lock().unwrap();
        state.conns.remove(&conn.shared.id);
        state.ops.push(MockOp::Release {
            conn: conn.shared.id,
        });
        drop(state);

        let _ = conn.shared.closed.send(ConnState::Closed(None));
    }

    fn active(&self) -> usize {
        self.state.lock().unwrap().conns.len()
    }
}

/// A connection handed out by [`MockPool`].
pub struct MockConn {
    shared: Arc<ConnShared>,
    pool: Arc<Mutex<PoolState>>,
}

impl std::fmt::Debug for MockConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConn")
            .field("id", &self.shared.id)
            .finish_non_exhaustive()
    }
}

impl ListenConnection for MockConn {
    async fn execute(&self, sql: &str) -> Result<()> {
        let mut state = self.pool.lock().unwrap();
        state.ops.push(MockOp::Execute {
            conn: self.shared.id,
            sql: sql.to_string(),
        });

        match &state.fail_execute {
            Some(message) => Err(Error::Postgres(message.clone())),
            None => Ok(()),
        }
    }

    fn on_notification(
        &self,
        channel: &ChannelName,
        callback: NotificationCallback,
    ) -> CallbackHandle {
        let callback_id = self.shared.next_callback_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut callbacks = self.shared.callbacks.lock().unwrap();
            callbacks
                .entry(channel.as_str().to_string())
                .or_insert_with(|| ChannelCallbacks {
                    channel: channel.clone(),
                    entries: Vec::new(),
                })
                .entries
                .push((callback_id, callback));
        }

        self.pool.lock().unwrap().ops.push(MockOp::Register {
            conn: self.shared.id,
            channel: channel.as_str().to_string(),
        });

        let shared = self.shared.clone();
        let pool = self.pool.clone();
        let channel = channel.as_str().to_string();
        CallbackHandle::new(move || {
            let mut callbacks = shared.callbacks.lock().unwrap();
            if let Some(registered) = callbacks.get_mut(&channel) {
                registered.entries.retain(|(id, _)| *id != callback_id);
                if registered.entries.is_empty() {
                    callbacks.remove(&channel);
                }
            }
            drop(callbacks);

            pool.lock().unwrap().ops.push(MockOp::Unregister {
                conn: shared.id,
                channel,
            });
        })
    }

    async fn closed(&self) -> Option<Error> {
        let mut rx = self.shared.closed.subscribe();
        loop {
            let state = rx.borrow_and_update().clone();
            if let ConnState::Closed(error) = state {
                return error.map(Error::Connection);
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn channel() -> ChannelName {
        ChannelName::new("orders").unwrap()
    }

    #[tokio::test]
    async fn test_notify_reaches_registered_callbacks() {
        let pool = MockPool::new();
        let conn = pool.acquire().await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let _handle = conn.on_notification(&channel(), {
            let seen = seen.clone();
            Box::new(move |raw| seen.lock().unwrap().push(raw))
        });

        pool.notify("orders", "payload-1");
        pool.notify("invoices", "other-channel");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].payload, "payload-1");
        assert_eq!(seen[0].sender_pid, DEFAULT_SENDER_PID);
    }

    #[tokio::test]
    async fn test_stopped_callback_no_longer_delivers() {
        let pool = MockPool::new();
        let conn = pool.acquire().await.unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let handle = conn.on_notification(&channel(), {
            let count = count.clone();
            Box::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        });

        pool.notify("orders", "a");
        handle.stop();
        pool.notify("orders", "b");

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_accounting() {
        let pool = MockPool::new();
        assert_eq!(pool.active(), 0);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_eq!(pool.active(), 2);
        assert_eq!(pool.peak_active(), 2);

        pool.release(a).await;
        pool.release(b).await;
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.peak_active(), 2);
    }

    #[tokio::test]
    async fn test_released_connection_stops_receiving() {
        let pool = MockPool::new();
        let conn = pool.acquire().await.unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let _handle = conn.on_notification(&channel(), {
            let count = count.clone();
            Box::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        });

        pool.release(conn).await;
        pool.notify("orders", "late");

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_closed_resolves_on_connection_drop() {
        let pool = MockPool::new();
        let conn = pool.acquire().await.unwrap();

        let wait = tokio::time::timeout(Duration::from_secs(1), conn.closed());
        tokio::pin!(wait);

        pool.close_connections(Some("boom"));
        let closed = wait.await.expect("closed should resolve");
        assert!(closed.unwrap().to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_failing_pools() {
        assert!(MockPool::failing_acquire("down").acquire().await.is_err());

        let pool = MockPool::failing_execute("denied");
        let conn = pool.acquire().await.unwrap();
        assert!(conn.execute("LISTEN \"orders\"").await.is_err());

        let err = MockPool::unsupported("pgbouncer")
            .acquire()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SubscriptionsUnsupported(_)));
    }
}
