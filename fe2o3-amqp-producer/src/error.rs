//! Errors that end a run of the producer

use crate::{config::ConfigError, encoder::EncodeError, endpoint::EndpointError, transport};

/// Error returned by the event loop
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid command line
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A message could not be encoded
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// An action was rejected by the endpoint
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    /// Error in the transport layer
    #[error(transparent)]
    Transport(#[from] transport::Error),

    /// IO Error
    #[error("IO Error {0:?}")]
    Io(#[from] std::io::Error),
}
