//! Frame codec errors

use std::io;

use tokio_util::codec::LengthDelimitedCodecError;

/// Error encoding or decoding a frame
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO Error
    #[error("IO Error {0:?}")]
    Io(io::Error),

    /// Error serializing or deserializing a frame body
    #[error("Codec error: {0}")]
    Codec(serde_amqp::Error),

    /// The frame type does not match the codec
    #[error("Unexpected frame type {0:#04x}")]
    UnexpectedFrameType(u8),

    /// The frame body is not a known performative
    #[error("Unexpected frame body {0}")]
    UnexpectedBody(String),

    /// A frame is larger than the max frame size
    #[error("Max frame size exceeded")]
    MaxFrameSizeExceeded,

    /// Malformed frame header
    #[error("Framing error")]
    FramingError,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let too_long = err
            .get_ref()
            .map(|inner| inner.is::<LengthDelimitedCodecError>())
            .unwrap_or(false);
        match too_long {
            true => Self::MaxFrameSizeExceeded,
            false => Self::Io(err),
        }
    }
}

impl From<serde_amqp::Error> for Error {
    fn from(err: serde_amqp::Error) -> Self {
        match err {
            serde_amqp::Error::Io(err) => Self::Io(err),
            err => Self::Codec(err),
        }
    }
}
