//! Validated SQL identifiers.
//!
//! Channel, trigger-function, and trigger names all end up interpolated into
//! generated statements, and the protocol does not parameterize identifiers.
//! Construction is the single validation point: once a name exists as one of
//! these types it is safe to splice.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Maximum identifier length accepted by Postgres (NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Check the allowed-character/length contract for a generated identifier.
///
/// Valid iff non-empty, at most 63 characters, and every character is ASCII
/// alphanumeric, `_`, or `-`.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidIdentifier {
            name: name.to_string(),
            reason: "must not be empty".to_string(),
        });
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::InvalidIdentifier {
            name: name.to_string(),
            reason: format!(
                "is {} characters, maximum is {}",
                name.len(),
                MAX_IDENTIFIER_LEN
            ),
        });
    }

    if let Some(c) = name
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '_' && *c != '-')
    {
        return Err(Error::InvalidIdentifier {
            name: name.to_string(),
            reason: format!("contains disallowed character '{}'", c),
        });
    }

    Ok(())
}

macro_rules! identifier_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap a name. Construction is the only place
            /// validation happens; the inner string is immutable afterwards.
            pub fn new(name: impl Into<String>) -> Result<Self> {
                let name = name.into();
                validate_identifier(&name)?;
                Ok(Self(name))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::new(s)
            }
        }
    };
}

identifier_type! {
    /// The name of a NOTIFY/LISTEN channel.
    ChannelName
}

identifier_type! {
    /// The name of a generated trigger function.
    FunctionName
}

identifier_type! {
    /// The name of a generated trigger.
    TriggerName
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_identifier("orders").is_ok());
        assert!(validate_identifier("order_events-v2").is_ok());
        assert!(validate_identifier("A").is_ok());
        assert!(validate_identifier("0starts_with_digit").is_ok());
        assert!(validate_identifier(&"x".repeat(63)).is_ok());
    }

    #[test]
    fn test_empty_identifier() {
        let err = validate_identifier("").unwrap_err();
        assert!(matches!(err, Error::InvalidIdentifier { .. }));
    }

    #[test]
    fn test_too_long_identifier() {
        assert!(validate_identifier(&"x".repeat(64)).is_err());
    }

    #[test]
    fn test_disallowed_characters() {
        assert!(validate_identifier("orders;drop table users").is_err());
        assert!(validate_identifier("orders events").is_err());
        assert!(validate_identifier("orders'").is_err());
        assert!(validate_identifier("sch\u{e9}ma").is_err());
        assert!(validate_identifier("a.b").is_err());
    }

    #[test]
    fn test_channel_name_roundtrip() {
        let name = ChannelName::new("orders").unwrap();
        assert_eq!(name.as_str(), "orders");
        assert_eq!(name.to_string(), "orders");
        assert_eq!("orders".parse::<ChannelName>().unwrap(), name);
    }

    #[test]
    fn test_identifier_kinds_are_distinct_types() {
        // Compile-time property: a FunctionName cannot be passed where a
        // ChannelName is expected. Runtime check on content equality only.
        let channel = ChannelName::new("orders").unwrap();
        let function = FunctionName::new("orders").unwrap();
        assert_eq!(channel.as_str(), function.as_str());
    }

    #[test]
    fn test_construction_rejects_invalid() {
        assert!(ChannelName::new("").is_err());
        assert!(FunctionName::new("no spaces").is_err());
        assert!(TriggerName::new("x".repeat(64)).is_err());
    }
}
