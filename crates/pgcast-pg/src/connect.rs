//! Dedicated listener connections with TLS support.
//!
//! Unlike an ordinary query connection, a listener connection must keep
//! polling its driver for asynchronous messages: the server pushes
//! notifications outside any statement. The driver task forwards each
//! notification to the per-connection dispatcher, which routes it to the
//! callbacks registered for its channel; the dispatch path only enqueues and
//! never blocks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::stream::StreamExt;
use pgcast_core::{ChannelName, RawNotification};
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_postgres::{AsyncMessage, Client, Connection, NoTls};
use tokio_postgres_rustls_improved::MakeRustlsConnect;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::source::{CallbackHandle, NotificationCallback};

#[derive(Clone)]
enum ConnState {
    Open,
    Closed(Option<String>),
}

/// One dedicated connection plus its message-polling driver.
pub(crate) struct ListenClient {
    client: Client,
    dispatcher: Arc<NotificationDispatcher>,
    closed: watch::Receiver<ConnState>,
}

impl ListenClient {
    pub(crate) async fn execute(&self, sql: &str) -> Result<()> {
        self.client.batch_execute(sql).await.map_err(Error::from)
    }

    pub(crate) fn on_notification(
        &self,
        channel: &ChannelName,
        callback: NotificationCallback,
    ) -> CallbackHandle {
        self.dispatcher.register(channel, callback)
    }

    pub(crate) async fn closed(&self) -> Option<Error> {
        let mut rx = self.closed.clone();
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

/// Connect with appropriate TLS settings based on sslmode in the connection
/// string, and spawn the driver that pumps asynchronous messages.
pub(crate) async fn connect_listener(connection_string: &str) -> Result<ListenClient> {
    let dispatcher = Arc::new(NotificationDispatcher::new());
    let (closed_tx, closed_rx) = watch::channel(ConnState::Open);

    let client = if requires_tls(connection_string) {
        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Connection(format!("TLS config error: {}", e)))?
        .with_root_certificates(root_certs())
        .with_no_client_auth();

        let connector = MakeRustlsConnect::new(config);

        let (client, connection) = tokio_postgres::connect(connection_string, connector)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        spawn_driver(connection, dispatcher.clone(), closed_tx);
        client
    } else {
        let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        spawn_driver(connection, dispatcher.clone(), closed_tx);
        client
    };

    Ok(ListenClient {
        client,
        dispatcher,
        closed: closed_rx,
    })
}

/// Pump the connection until it terminates, forwarding notifications.
///
/// The driver ends when the client half is dropped (orderly release) or the
/// connection fails; either way the watch channel records which it was.
fn spawn_driver<S, T>(
    mut connection: Connection<S, T>,
    dispatcher: Arc<NotificationDispatcher>,
    closed_tx: watch::Sender<ConnState>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut messages = futures_util::stream::poll_fn(move |cx| connection.poll_message(cx));

        while let Some(message) = messages.next().await {
            match message {
                Ok(AsyncMessage::Notification(notification)) => {
                    dispatcher.dispatch(notification);
                }
                Ok(AsyncMessage::Notice(notice)) => {
                    debug!(message = %notice.message(), "server notice");
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = closed_tx.send(ConnState::Closed(Some(e.to_string())));
                    return;
                }
            }
        }

        let _ = closed_tx.send(ConnState::Closed(None));
    });
}

/// Routes delivered notifications to the callbacks registered per channel.
pub(crate) struct NotificationDispatcher {
    inner: Mutex<DispatchState>,
}

struct DispatchState {
    next_id: u64,
    channels: HashMap<String, Registered>,
}

struct Registered {
    channel: ChannelName,
    callbacks: Vec<(u64, NotificationCallback)>,
}

impl NotificationDispatcher {
    fn new() -> Self {
        Self {
            inner: Mutex::new(DispatchState {
                next_id: 1,
                channels: HashMap::new(),
            }),
        }
    }

    fn register(self: &Arc<Self>, channel: &ChannelName, callback: NotificationCallback) -> CallbackHandle {
        let id = {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next_id;
            inner.next_id += 1;

            inner
                .channels
                .entry(channel.as_str().to_string())
                .or_insert_with(|| Registered {
                    channel: channel.clone(),
                    callbacks: Vec::new(),
                })
                .callbacks
                .push((id, callback));
            id
        };

        let dispatcher = self.clone();
        let channel = channel.as_str().to_string();
        CallbackHandle::new(move || dispatcher.unregister(&channel, id))
    }

    fn unregister(&self, channel: &str, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(registered) = inner.channels.get_mut(channel) {
            registered.callbacks.retain(|(cb_id, _)| *cb_id != id);
            if registered.callbacks.is_empty() {
                inner.channels.remove(channel);
            }
        }
    }

    fn dispatch(&self, notification: tokio_postgres::Notification) {
        let inner = self.inner.lock().unwrap();
        match inner.channels.get(notification.channel()) {
            Some(registered) => {
                for (_, callback) in &registered.callbacks {
                    callback(RawNotification {
                        channel: registered.channel.clone(),
                        payload: notification.payload().to_string(),
                        sender_pid: notification.process_id(),
                    });
                }
            }
            None => {
                trace!(
                    channel = notification.channel(),
                    "notification for channel with no registered callback"
                );
            }
        }
    }
}

/// Get root certificates from webpki-roots.
fn root_certs() -> rustls::RootCertStore {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

/// Check if the connection string requires TLS.
fn requires_tls(connection_string: &str) -> bool {
    connection_string.contains("sslmode=require")
        || connection_string.contains("sslmode=verify-ca")
        || connection_string.contains("sslmode=verify-full")
}
