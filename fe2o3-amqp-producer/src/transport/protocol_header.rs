//! Protocol headers exchanged before any frame

use bytes::{Buf, BufMut, BytesMut};
use fe2o3_amqp_types::definitions::{MAJOR, MINOR, REVISION};
use tokio_util::codec::{Decoder, Encoder};

use super::Error;

const PROTOCOL_HEADER_PREFIX: &[u8; 4] = b"AMQP";

/// Length of a protocol header
pub const PROTOCOL_HEADER_LEN: usize = 8;

/// Protocol ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolId {
    /// AMQP
    Amqp = 0x0,

    /// TLS
    Tls = 0x2,

    /// SASL
    Sasl = 0x3,
}

impl TryFrom<u8> for ProtocolId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Amqp),
            0x2 => Ok(Self::Tls),
            0x3 => Ok(Self::Sasl),
            _ => Err(value),
        }
    }
}

/// Protocol header `AMQP <id> <major> <minor> <revision>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolHeader {
    /// Protocol ID
    pub id: ProtocolId,

    /// Major number
    pub major: u8,

    /// Minor number
    pub minor: u8,

    /// Revision number
    pub revision: u8,
}

impl ProtocolHeader {
    /// Creates a header for protocol `id` with the supported version
    pub fn new(id: ProtocolId) -> Self {
        Self {
            id,
            major: MAJOR,
            minor: MINOR,
            revision: REVISION,
        }
    }

    /// Header that starts the AMQP protocol
    pub fn amqp() -> Self {
        Self::new(ProtocolId::Amqp)
    }

    /// Header that starts the SASL layer
    pub fn sasl() -> Self {
        Self::new(ProtocolId::Sasl)
    }

    /// Whether this is an AMQP header
    pub fn is_amqp(&self) -> bool {
        self.id == ProtocolId::Amqp
    }

    /// Whether this is a SASL header
    pub fn is_sasl(&self) -> bool {
        self.id == ProtocolId::Sasl
    }
}

impl From<ProtocolHeader> for [u8; PROTOCOL_HEADER_LEN] {
    fn from(value: ProtocolHeader) -> Self {
        let [a, m, q, p] = *PROTOCOL_HEADER_PREFIX;
        [a, m, q, p, value.id as u8, value.major, value.minor, value.revision]
    }
}

impl TryFrom<[u8; PROTOCOL_HEADER_LEN]> for ProtocolHeader {
    type Error = [u8; PROTOCOL_HEADER_LEN];

    fn try_from(value: [u8; PROTOCOL_HEADER_LEN]) -> Result<Self, Self::Error> {
        if &value[..4] != PROTOCOL_HEADER_PREFIX {
            return Err(value);
        }
        let id = ProtocolId::try_from(value[4]).map_err(|_| value)?;
        Ok(Self {
            id,
            major: value[5],
            minor: value[6],
            revision: value[7],
        })
    }
}

/// Encoder and decoder of protocol headers
#[derive(Debug, Clone, Default)]
pub struct ProtocolHeaderCodec {}

impl ProtocolHeaderCodec {
    /// Creates a new protocol header codec
    pub fn new() -> Self {
        Self {}
    }
}

impl Encoder<ProtocolHeader> for ProtocolHeaderCodec {
    type Error = Error;

    fn encode(&mut self, item: ProtocolHeader, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let buf: [u8; PROTOCOL_HEADER_LEN] = item.into();
        dst.put_slice(&buf);
        Ok(())
    }
}

impl Decoder for ProtocolHeaderCodec {
    type Item = ProtocolHeader;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.remaining() < PROTOCOL_HEADER_LEN {
            return Ok(None);
        }

        let mut buf = [0u8; PROTOCOL_HEADER_LEN];
        src.copy_to_slice(&mut buf);
        ProtocolHeader::try_from(buf)
            .map(Some)
            .map_err(Error::ProtocolHeaderMismatch)
    }
}
