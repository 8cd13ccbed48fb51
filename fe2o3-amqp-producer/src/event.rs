//! Protocol events delivered to the handler

use std::fmt;

use fe2o3_amqp_types::{
    definitions::{self, ErrorCondition, Fields},
    messaging::DeliveryState,
    primitives::Symbol,
};

/// An error condition attached to a remote close, a detach, a rejected delivery or a
/// closed transport
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Symbolic name of the condition, eg. `amqp:not-found`
    pub name: String,

    /// Human readable description
    pub description: Option<String>,

    /// Structured diagnostic information
    pub info: Option<Fields>,
}

impl Condition {
    /// Creates a new condition
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            name: name.into(),
            description,
            info: None,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {}", self.name, description),
            None => write!(f, "{}: ", self.name),
        }
    }
}

/// Returns the symbolic name of an error condition
pub fn condition_name(condition: &ErrorCondition) -> String {
    #[allow(unreachable_patterns)]
    let symbol = match condition {
        ErrorCondition::AmqpError(err) => Symbol::from(err),
        ErrorCondition::ConnectionError(err) => Symbol::from(err),
        ErrorCondition::SessionError(err) => Symbol::from(err),
        ErrorCondition::LinkError(err) => Symbol::from(err),
        ErrorCondition::Custom(symbol) => symbol.clone(),
        other => return format!("{:?}", other),
    };
    symbol.as_str().to_string()
}

impl From<definitions::Error> for Condition {
    fn from(error: definitions::Error) -> Self {
        Self {
            name: condition_name(&error.condition),
            description: error.description,
            info: error.info,
        }
    }
}

/// Outcome of a delivery as reported by the receiving peer
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The message was accepted
    Accepted,

    /// The message was rejected
    Rejected(Option<Condition>),

    /// The message was released
    Released,

    /// The message was modified
    Modified,

    /// A non-terminal received state
    Received,

    /// Any other delivery state
    Other,
}

impl Outcome {
    /// Descriptor code of the delivery state
    pub fn code(&self) -> u64 {
        match self {
            Outcome::Received => 0x23,
            Outcome::Accepted => 0x24,
            Outcome::Rejected(_) => 0x25,
            Outcome::Released => 0x26,
            Outcome::Modified => 0x27,
            Outcome::Other => 0,
        }
    }

    /// The condition attached to the outcome
    pub fn condition(&self) -> Option<&Condition> {
        match self {
            Outcome::Rejected(condition) => condition.as_ref(),
            _ => None,
        }
    }

    /// Whether the outcome is accepted
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted)
    }
}

impl From<DeliveryState> for Outcome {
    fn from(state: DeliveryState) -> Self {
        #[allow(unreachable_patterns)]
        match state {
            DeliveryState::Accepted(_) => Outcome::Accepted,
            DeliveryState::Rejected(rejected) => Outcome::Rejected(rejected.error.map(Into::into)),
            DeliveryState::Released(_) => Outcome::Released,
            DeliveryState::Modified(_) => Outcome::Modified,
            DeliveryState::Received(_) => Outcome::Received,
            _ => Outcome::Other,
        }
    }
}

/// Events produced by the I/O layer, in the order the transport produced them
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The connection object was created and can be configured
    ConnectionInit,

    /// The remote peer opened the connection
    ConnectionRemoteOpen {
        /// Properties carried in the remote open
        properties: Option<Fields>,
    },

    /// The remote peer began the session
    SessionRemoteOpen,

    /// The remote peer attached the link
    LinkRemoteOpen,

    /// The link has (new) credit
    LinkFlow {
        /// Credit available to the sender
        credit: u32,
    },

    /// The remote peer updated the state of a delivery
    Delivery {
        /// Tag of the delivery
        tag: Vec<u8>,

        /// Outcome reported by the peer
        outcome: Outcome,
    },

    /// The transport is closed
    TransportClosed {
        /// Reason the transport closed, if it closed abnormally
        condition: Option<Condition>,
    },

    /// The remote peer closed the connection
    ConnectionRemoteClose {
        /// Error attached to the close
        condition: Option<Condition>,
    },

    /// The remote peer ended the session
    SessionRemoteClose {
        /// Error attached to the end
        condition: Option<Condition>,
    },

    /// The remote peer closed the link
    LinkRemoteClose {
        /// Error attached to the detach
        condition: Option<Condition>,
    },

    /// The remote peer detached the link without closing it
    LinkRemoteDetach {
        /// Error attached to the detach
        condition: Option<Condition>,
    },

    /// There is no more work to do
    Inactive,
}

impl Event {
    /// Name of the event used in diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            Event::ConnectionInit => "ConnectionInit",
            Event::ConnectionRemoteOpen { .. } => "ConnectionRemoteOpen",
            Event::SessionRemoteOpen => "SessionRemoteOpen",
            Event::LinkRemoteOpen => "LinkRemoteOpen",
            Event::LinkFlow { .. } => "LinkFlow",
            Event::Delivery { .. } => "Delivery",
            Event::TransportClosed { .. } => "TransportClosed",
            Event::ConnectionRemoteClose { .. } => "ConnectionRemoteClose",
            Event::SessionRemoteClose { .. } => "SessionRemoteClose",
            Event::LinkRemoteClose { .. } => "LinkRemoteClose",
            Event::LinkRemoteDetach { .. } => "LinkRemoteDetach",
            Event::Inactive => "Inactive",
        }
    }
}
