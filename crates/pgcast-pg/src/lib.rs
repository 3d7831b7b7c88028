mod connect;
mod error;
pub mod mock;
pub mod pool;
pub mod provisioning;
pub mod publish;
mod queue;
pub mod source;
mod subscription;

pub use error::{Error, Result};
pub use pool::{ListenerPoolConfig, PgListenerPool, PooledConn, DEFAULT_MAX_LISTENERS};
pub use provisioning::{setup_channel, teardown_channel, ChannelSetup};
pub use publish::{publish, publish_raw, render_notify};
pub use queue::DEFAULT_QUEUE_CAPACITY;
pub use source::{CallbackHandle, ListenConnection, ListenerPool, NotificationCallback};
pub use subscription::{NotifyHub, Subscription};
