//! The protocol actions the event handler performs on the connection

use crate::config::Credentials;

/// Error performing an action on an endpoint
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    /// The action is not allowed in the current local state
    #[error("Illegal local state")]
    IllegalState,

    /// A transfer was attempted without link credit
    #[error("Sending without link credit")]
    NoCredit,

    /// The delivery could not be split into frames
    #[error("Framing error: {0}")]
    Framing(String),
}

/// Actions on a connection and the single session and sending link it carries.
///
/// None of the actions block. The work they produce is flushed by the I/O layer once the
/// current batch of events has been handled.
pub trait Endpoint {
    /// Sets the credentials used to authenticate the connection
    fn set_credentials(&mut self, credentials: &Credentials);

    /// Sets the container id sent in the local open
    fn set_container_id(&mut self, container_id: &str);

    /// Requests the connection to be opened
    fn open_connection(&mut self);

    /// Begins the session
    fn open_session(&mut self);

    /// Attaches a sending link named `name` targeting `address`
    fn open_sender(&mut self, name: &str, address: &str);

    /// Credit currently available on the sending link
    fn credit(&self) -> u32;

    /// Sends a delivery on the sending link and advances the link.
    ///
    /// This consumes one unit of credit. A delivery larger than the max frame size is sent
    /// in multiple frames.
    fn send(&mut self, tag: &[u8], payload: &[u8]) -> Result<(), EndpointError>;

    /// Requests the connection to be closed. Closing an already closing connection has no
    /// effect
    fn close_connection(&mut self);
}
