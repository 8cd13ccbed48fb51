//! Encoding of the durable `sequence_<n>` messages

use std::io::{self, Cursor};

use fe2o3_amqp_types::messaging::{message::__private::Serializable, AmqpValue, Header, Message};
use serde::Serialize;
use serde_amqp::ser::Serializer;

use crate::constants::INITIAL_BUFFER_SIZE;

/// Error encoding a message other than running out of buffer space
#[derive(Debug, thiserror::Error)]
#[error("Error encoding message {sequence}: {source}")]
pub struct EncodeError {
    /// Sequence number of the message
    pub sequence: u32,

    /// Underlying serialization error
    #[source]
    pub source: serde_amqp::Error,
}

/// Builds the message sent with sequence number `sequence`
pub fn sequence_message(sequence: u32) -> Message<AmqpValue<String>> {
    Message {
        header: Some(Header {
            durable: true,
            ..Default::default()
        }),
        delivery_annotations: None,
        message_annotations: None,
        properties: None,
        application_properties: None,
        body: AmqpValue(format!("sequence_{}", sequence)),
        footer: None,
    }
}

/// Encodes messages into a buffer that is reused across calls.
///
/// The buffer grows when a message doesn't fit and never shrinks.
#[derive(Debug, Default)]
pub struct MessageEncoder {
    buf: Vec<u8>,
}

impl MessageEncoder {
    /// Creates an encoder with an empty buffer. The buffer is allocated on first use.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Creates an encoder with a buffer of `size` bytes
    pub fn with_size(size: usize) -> Self {
        Self { buf: vec![0; size] }
    }

    /// Current size of the buffer
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Encodes message `sequence` and returns the encoded bytes.
    ///
    /// The returned slice borrows the internal buffer and is only valid until the next call.
    pub fn encode(&mut self, sequence: u32) -> Result<&[u8], EncodeError> {
        if self.buf.is_empty() {
            self.buf.resize(INITIAL_BUFFER_SIZE, 0);
        }

        loop {
            match write_message(&mut self.buf, sequence) {
                Ok(len) => return Ok(&self.buf[..len]),
                Err(serde_amqp::Error::Io(err)) if err.kind() == io::ErrorKind::WriteZero => {
                    let size = self.buf.len() * 2;
                    self.buf.resize(size, 0);

                    #[cfg(feature = "tracing")]
                    tracing::trace!(sequence, size, "Encode buffer grown");
                    #[cfg(feature = "log")]
                    log::trace!("Encode buffer grown to {} for sequence {}", size, sequence);
                }
                Err(source) => return Err(EncodeError { sequence, source }),
            }
        }
    }
}

/// Writes the message into `buf` and returns the number of bytes written.
/// Fails with `WriteZero` if `buf` is too small
fn write_message(buf: &mut [u8], sequence: u32) -> Result<usize, serde_amqp::Error> {
    let mut cursor = Cursor::new(buf);
    let mut serializer = Serializer::new(&mut cursor);
    Serializable(sequence_message(sequence)).serialize(&mut serializer)?;
    Ok(cursor.position() as usize)
}
