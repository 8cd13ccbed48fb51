//! Transport errors

use std::io;

use fe2o3_amqp_types::{
    definitions::{self, AmqpError, ConnectionError, ErrorCondition},
    primitives::Binary,
    sasl::SaslCode,
};

use crate::{event::Condition, frames, sasl_profile};

use super::protocol_header::{ProtocolHeader, PROTOCOL_HEADER_LEN};

/// Error on the transport
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO Error
    #[error("IO Error {0:?}")]
    Io(#[from] io::Error),

    /// Frame codec error
    #[error(transparent)]
    Frame(#[from] frames::Error),

    /// The bytes received are not a protocol header
    #[error("Invalid protocol header {0:?}")]
    ProtocolHeaderMismatch([u8; PROTOCOL_HEADER_LEN]),

    /// The peer answered with a different protocol header
    #[error("Unexpected protocol header {0:?}")]
    UnexpectedProtocolHeader(ProtocolHeader),

    /// SASL negotiation error
    #[error(transparent)]
    Sasl(#[from] sasl_profile::Error),

    /// The SASL outcome is not ok
    #[error("SASL error code {code:?}, additional data: {additional_data:?}")]
    SaslFailed {
        /// Outcome code
        code: SaslCode,

        /// Additional data sent with the outcome
        additional_data: Option<Binary>,
    },

    /// The peer closed the transport
    #[error("Connection closed by peer")]
    Closed,
}

impl Error {
    /// The error condition reported when the transport closes because of this error
    pub fn condition(&self) -> Condition {
        let condition: ErrorCondition = match self {
            Error::Io(_) | Error::Closed => ConnectionError::ConnectionForced.into(),
            Error::Frame(frames::Error::Io(_)) => ConnectionError::ConnectionForced.into(),
            Error::Frame(frames::Error::Codec(_)) => AmqpError::DecodeError.into(),
            Error::Frame(frames::Error::MaxFrameSizeExceeded) => {
                AmqpError::FrameSizeTooSmall.into()
            }
            Error::Frame(_) => ConnectionError::FramingError.into(),
            Error::ProtocolHeaderMismatch(_) | Error::UnexpectedProtocolHeader(_) => {
                AmqpError::NotImplemented.into()
            }
            Error::Sasl(sasl_profile::Error::MechanismNotSupported(_)) => {
                AmqpError::NotImplemented.into()
            }
            Error::Sasl(_) | Error::SaslFailed { .. } => AmqpError::UnauthorizedAccess.into(),
        };
        definitions::Error::new(condition, Some(self.to_string()), None).into()
    }
}
