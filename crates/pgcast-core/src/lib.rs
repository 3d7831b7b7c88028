pub mod channel;
pub mod error;
pub mod event;
pub mod ident;
pub mod payload;
pub mod sql;

pub use channel::ChannelDescriptor;
pub use error::{Error, Result};
pub use event::{Event, RawNotification};
pub use ident::{
    validate_identifier, ChannelName, FunctionName, TriggerName, MAX_IDENTIFIER_LEN,
};
pub use payload::{check_size, decode, encode, EncodedPayload, MAX_PAYLOAD_BYTES};
pub use sql::TableEvent;
