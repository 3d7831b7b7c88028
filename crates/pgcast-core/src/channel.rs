//! Typed channel descriptors.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::error::Result;
use crate::ident::ChannelName;

/// An immutable (channel name, payload type) pair.
///
/// Pairing the decode target type with the channel at the type level is what
/// keeps a caller from decoding channel A's bytes as channel B's type:
/// `subscribe` and `publish` both take the descriptor, so the two sides agree
/// by construction. `publish_raw` in pgcast-pg is the explicit override.
pub struct ChannelDescriptor<T> {
    name: ChannelName,
    _payload: PhantomData<fn() -> T>,
}

impl<T> ChannelDescriptor<T> {
    /// Validate a name and build a descriptor for payload type `T`.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Ok(Self::from_name(ChannelName::new(name)?))
    }

    /// Build a descriptor from an already-validated name.
    pub fn from_name(name: ChannelName) -> Self {
        Self {
            name,
            _payload: PhantomData,
        }
    }

    pub fn name(&self) -> &ChannelName {
        &self.name
    }
}

// Manual impls: derives would put bounds on T, and the descriptor carries no
// T value. Equality and hashing are by name only.

impl<T> Clone for ChannelDescriptor<T> {
    fn clone(&self) -> Self {
        Self::from_name(self.name.clone())
    }
}

impl<T> fmt::Debug for ChannelDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelDescriptor")
            .field("name", &self.name)
            .field("payload", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> PartialEq for ChannelDescriptor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<T> Eq for ChannelDescriptor<T> {}

impl<T> Hash for ChannelDescriptor<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_descriptor_validates_name() {
        assert!(ChannelDescriptor::<String>::new("orders").is_ok());
        assert!(ChannelDescriptor::<String>::new("bad name").is_err());
    }

    #[test]
    fn test_equality_by_name() {
        let a = ChannelDescriptor::<String>::new("orders").unwrap();
        let b = ChannelDescriptor::<String>::new("orders").unwrap();
        let c = ChannelDescriptor::<String>::new("invoices").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = HashSet::new();
        set.insert(a.clone());
        set.insert(b);
        set.insert(c);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_debug_names_payload_type() {
        let d = ChannelDescriptor::<u32>::new("orders").unwrap();
        let debug = format!("{d:?}");
        assert!(debug.contains("orders"));
        assert!(debug.contains("u32"));
    }
}
