//! AMQP and SASL frames and their codecs
//!
//! Every frame starts with an 8 byte header: a 4 byte size, the data offset (in 4 byte
//! words), the frame type and 2 type specific bytes. The size field is handled by a
//! `LengthDelimitedCodec`, the codecs here only deal with the rest.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::LengthDelimitedCodec;

pub mod amqp;
mod error;
pub mod sasl;

pub use error::Error;

/// Frame type of AMQP frames
pub const FRAME_TYPE_AMQP: u8 = 0x00;

/// Frame type of SASL frames
pub const FRAME_TYPE_SASL: u8 = 0x01;

/// Size of the length field
pub(crate) const FRAME_SIZE_LEN: usize = 4;

/// Size of the frame header following the length field
pub(crate) const FRAME_HEADER_LEN: usize = 4;

/// Smallest max frame size a peer may announce
pub const MIN_MAX_FRAME_SIZE: usize = 512;

pub(crate) fn length_delimited(max_frame_size: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .big_endian()
        .length_field_length(FRAME_SIZE_LEN)
        .max_frame_length(max_frame_size)
        // The size includes the length field itself
        .length_adjustment(-(FRAME_SIZE_LEN as isize))
        .new_codec()
}

/// Writes the frame header without the size
pub(crate) fn write_header(dst: &mut BytesMut, frame_type: u8, channel: u16) {
    // The extended header is never used so doff is always 2
    dst.put_u8(2);
    dst.put_u8(frame_type);
    dst.put_u16(channel);
}

/// Reads the frame header and skips the extended header. Returns the type specific bytes
pub(crate) fn read_header(src: &mut BytesMut, frame_type: u8) -> Result<u16, Error> {
    if src.len() < FRAME_HEADER_LEN {
        return Err(Error::FramingError);
    }

    let doff = src.get_u8() as usize;
    let ftype = src.get_u8();
    let channel = src.get_u16();

    if ftype != frame_type {
        return Err(Error::UnexpectedFrameType(ftype));
    }

    // doff counts the whole header in 4 byte words
    let extended = match (doff * 4).checked_sub(FRAME_SIZE_LEN + FRAME_HEADER_LEN) {
        Some(extended) => extended,
        None => return Err(Error::FramingError),
    };
    if src.len() < extended {
        return Err(Error::FramingError);
    }
    src.advance(extended);

    Ok(channel)
}
