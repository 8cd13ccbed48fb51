//! SASL frame type and its codec

use bytes::{BufMut, BytesMut};
use fe2o3_amqp_types::sasl::{SaslChallenge, SaslInit, SaslMechanisms, SaslOutcome, SaslResponse};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use super::{
    length_delimited, read_header, write_header, Error, FRAME_HEADER_LEN, FRAME_TYPE_SASL,
    MIN_MAX_FRAME_SIZE,
};

const MECHANISMS_CODE: u64 = 0x40;
const INIT_CODE: u64 = 0x41;
const CHALLENGE_CODE: u64 = 0x42;
const RESPONSE_CODE: u64 = 0x43;
const OUTCOME_CODE: u64 = 0x44;

/// SASL frame
#[derive(Debug)]
pub enum Frame {
    /// SASL Mechanisms
    Mechanisms(SaslMechanisms),

    /// SASL Init
    Init(SaslInit),

    /// SASL Challenge
    Challenge(SaslChallenge),

    /// SASL Response
    Response(SaslResponse),

    /// SASL Outcome
    Outcome(SaslOutcome),
}

/// Reads the descriptor code of a described list, either numeric or symbolic
fn descriptor_code(src: &[u8]) -> Option<u64> {
    // 0x00 marks a described type
    match src {
        [0x00, 0x53, code, ..] => Some(*code as u64),
        [0x00, 0x80, rest @ ..] if rest.len() >= 8 => {
            let mut code = [0u8; 8];
            code.copy_from_slice(&rest[..8]);
            Some(u64::from_be_bytes(code))
        }
        [0x00, 0xa3, len, rest @ ..] if rest.len() >= *len as usize => {
            match &rest[..*len as usize] {
                b"amqp:sasl-mechanisms:list" => Some(MECHANISMS_CODE),
                b"amqp:sasl-init:list" => Some(INIT_CODE),
                b"amqp:sasl-challenge:list" => Some(CHALLENGE_CODE),
                b"amqp:sasl-response:list" => Some(RESPONSE_CODE),
                b"amqp:sasl-outcome:list" => Some(OUTCOME_CODE),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Encoder and decoder of SASL frames, including the size field
#[derive(Debug)]
pub struct FrameCodec {
    length_delimited: LengthDelimitedCodec,
}

impl FrameCodec {
    /// Creates a new SASL frame codec.
    ///
    /// SASL frames are limited to the smallest max frame size
    pub fn new() -> Self {
        Self {
            length_delimited: length_delimited(MIN_MAX_FRAME_SIZE),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = match &item {
            Frame::Mechanisms(value) => serde_amqp::to_vec(value)?,
            Frame::Init(value) => serde_amqp::to_vec(value)?,
            Frame::Challenge(value) => serde_amqp::to_vec(value)?,
            Frame::Response(value) => serde_amqp::to_vec(value)?,
            Frame::Outcome(value) => serde_amqp::to_vec(value)?,
        };

        let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + body.len());
        // The type specific bytes are ignored for SASL frames
        write_header(&mut frame, FRAME_TYPE_SASL, 0);
        frame.put_slice(&body);
        self.length_delimited.encode(frame.freeze(), dst)?;
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut src = match self.length_delimited.decode(src)? {
            Some(frame) => frame,
            None => return Ok(None),
        };
        let _ignored = read_header(&mut src, FRAME_TYPE_SASL)?;

        let frame = match descriptor_code(&src) {
            Some(MECHANISMS_CODE) => Frame::Mechanisms(serde_amqp::from_slice(&src)?),
            Some(INIT_CODE) => Frame::Init(serde_amqp::from_slice(&src)?),
            Some(CHALLENGE_CODE) => Frame::Challenge(serde_amqp::from_slice(&src)?),
            Some(RESPONSE_CODE) => Frame::Response(serde_amqp::from_slice(&src)?),
            Some(OUTCOME_CODE) => Frame::Outcome(serde_amqp::from_slice(&src)?),
            Some(code) => return Err(Error::UnexpectedBody(format!("descriptor {:#x}", code))),
            None => return Err(Error::UnexpectedBody(String::from("not a SASL frame body"))),
        };
        Ok(Some(frame))
    }
}
