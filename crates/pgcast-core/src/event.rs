//! Notification value types.

use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::ident::ChannelName;
use crate::payload;

/// A notification as delivered by one connection, payload still in its wire
/// text form. One per server-side NOTIFY observed by one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub channel: ChannelName,
    pub payload: String,
    /// Process id of the backend that issued the NOTIFY.
    pub sender_pid: i32,
}

impl RawNotification {
    /// Decode the payload, producing a typed event.
    pub fn decode<T: DeserializeOwned>(self) -> Result<Event<T>> {
        let payload = payload::decode(&self.payload)?;
        Ok(Event {
            channel: self.channel,
            payload,
            sender_pid: self.sender_pid,
        })
    }
}

/// A decoded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event<T> {
    pub channel: ChannelName,
    pub payload: T,
    /// Process id of the backend that issued the NOTIFY.
    pub sender_pid: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Order {
        id: i64,
    }

    fn raw(payload: &str) -> RawNotification {
        RawNotification {
            channel: ChannelName::new("orders").unwrap(),
            payload: payload.to_string(),
            sender_pid: 4242,
        }
    }

    #[test]
    fn test_decode_event() {
        let event = raw(r#"{"id":1}"#).decode::<Order>().unwrap();
        assert_eq!(event.payload, Order { id: 1 });
        assert_eq!(event.channel.as_str(), "orders");
        assert_eq!(event.sender_pid, 4242);
    }

    #[test]
    fn test_decode_failure_is_an_error() {
        let err = raw("definitely-not-json").decode::<Order>().unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }
}
