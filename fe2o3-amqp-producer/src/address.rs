//! Destination address resolution

use fe2o3_amqp_types::{definitions::Fields, primitives::Value};

use crate::constants::{TOPIC_PREFIX_CAPACITY, TOPIC_PREFIX_KEY};

/// Error resolving a destination address
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// The prefixed address does not fit in the address buffer
    #[error("Address {prefix:?} + {topic:?} needs {required} bytes but only {capacity} are available")]
    AddressTooLong {
        /// Prefix that was used
        prefix: String,

        /// Topic that was used
        topic: String,

        /// Bytes needed, including the terminator
        required: usize,

        /// Bytes available
        capacity: usize,
    },
}

/// Combines `prefix` and `topic` into a destination address.
///
/// The result must fit in `capacity` bytes together with a terminator.
/// Nothing is returned when it doesn't, the address is never truncated.
pub fn resolve(capacity: usize, topic: &str, prefix: &str) -> Result<String, AddressError> {
    let required = prefix.len() + topic.len() + 1;
    if required > capacity {
        return Err(AddressError::AddressTooLong {
            prefix: prefix.to_string(),
            topic: topic.to_string(),
            required,
            capacity,
        });
    }

    let mut address = String::with_capacity(required - 1);
    address.push_str(prefix);
    address.push_str(topic);
    Ok(address)
}

/// Result of looking up the topic prefix in the remote connection properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixLookup {
    /// No properties, or no topic prefix among them
    Absent,

    /// The key is present but the value is not a string or is too long
    Unrepresentable,

    /// The advertised topic prefix
    Found(String),
}

impl PrefixLookup {
    /// Returns the prefix if it was found
    pub fn found(self) -> Option<String> {
        match self {
            PrefixLookup::Found(prefix) => Some(prefix),
            PrefixLookup::Absent | PrefixLookup::Unrepresentable => None,
        }
    }
}

/// Looks up the `topic-prefix` property a broker (eg. Solace PubSub+) may advertise
/// in its open frame
pub fn lookup_topic_prefix(properties: Option<&Fields>) -> PrefixLookup {
    let properties = match properties {
        Some(properties) => properties,
        None => return PrefixLookup::Absent,
    };

    let value = properties
        .iter()
        .find(|(key, _)| key.as_str() == TOPIC_PREFIX_KEY)
        .map(|(_, value)| value);

    let prefix = match value {
        Some(Value::String(s)) => s.as_str(),
        Some(Value::Symbol(s)) => s.as_str(),
        Some(_) => return PrefixLookup::Unrepresentable,
        None => return PrefixLookup::Absent,
    };

    if prefix.len() + 1 > TOPIC_PREFIX_CAPACITY {
        return PrefixLookup::Unrepresentable;
    }
    PrefixLookup::Found(prefix.to_string())
}
