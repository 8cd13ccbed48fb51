//! AMQP frame type and its codec

use bytes::{Buf, BufMut, BytesMut};
use fe2o3_amqp_types::performatives::{
    Attach, Begin, Close, Detach, Disposition, End, Flow, Open, Performative, Transfer,
};
use serde::Deserialize;
use serde_amqp::{de::Deserializer, read::IoReader};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::Payload;

use super::{
    length_delimited, read_header, write_header, Error, FRAME_HEADER_LEN, FRAME_SIZE_LEN,
    FRAME_TYPE_AMQP, MIN_MAX_FRAME_SIZE,
};

/// AMQP frame
#[derive(Debug)]
pub struct Frame {
    /// Channel the frame is sent on
    pub channel: u16,

    /// Frame body
    pub body: FrameBody,
}

impl Frame {
    /// Creates a new AMQP frame
    pub fn new(channel: impl Into<u16>, body: FrameBody) -> Self {
        Self {
            channel: channel.into(),
            body,
        }
    }

    /// Creates an empty frame
    pub fn empty() -> Self {
        Self::new(0u16, FrameBody::Empty)
    }
}

/// AMQP frame body
pub enum FrameBody {
    /// Open performative
    Open(Open),

    /// Begin performative
    Begin(Begin),

    /// Attach performative
    Attach(Attach),

    /// Flow performative
    Flow(Flow),

    /// Transfer performative and the message bytes it carries
    Transfer {
        /// Transfer performative
        performative: Transfer,

        /// Message bytes
        payload: Payload,
    },

    /// Disposition performative
    Disposition(Disposition),

    /// Detach performative
    Detach(Detach),

    /// End performative
    End(End),

    /// Close performative
    Close(Close),

    /// A frame without body
    Empty,
}

impl FrameBody {
    /// Name of the performative
    pub fn name(&self) -> &'static str {
        match self {
            FrameBody::Open(_) => "Open",
            FrameBody::Begin(_) => "Begin",
            FrameBody::Attach(_) => "Attach",
            FrameBody::Flow(_) => "Flow",
            FrameBody::Transfer { .. } => "Transfer",
            FrameBody::Disposition(_) => "Disposition",
            FrameBody::Detach(_) => "Detach",
            FrameBody::End(_) => "End",
            FrameBody::Close(_) => "Close",
            FrameBody::Empty => "Empty",
        }
    }
}

impl From<Performative> for FrameBody {
    fn from(performative: Performative) -> Self {
        match performative {
            Performative::Open(open) => FrameBody::Open(open),
            Performative::Begin(begin) => FrameBody::Begin(begin),
            Performative::Attach(attach) => FrameBody::Attach(attach),
            Performative::Flow(flow) => FrameBody::Flow(flow),
            Performative::Transfer(performative) => FrameBody::Transfer {
                performative,
                payload: Payload::new(),
            },
            Performative::Disposition(disposition) => FrameBody::Disposition(disposition),
            Performative::Detach(detach) => FrameBody::Detach(detach),
            Performative::End(end) => FrameBody::End(end),
            Performative::Close(close) => FrameBody::Close(close),
        }
    }
}

impl std::fmt::Debug for FrameBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open(arg0) => f.debug_tuple("Open").field(arg0).finish(),
            Self::Begin(arg0) => f.debug_tuple("Begin").field(arg0).finish(),
            Self::Attach(arg0) => f.debug_tuple("Attach").field(arg0).finish(),
            Self::Flow(arg0) => f.debug_tuple("Flow").field(arg0).finish(),
            Self::Transfer {
                performative,
                payload,
            } => f
                .debug_struct("Transfer")
                .field("performative", performative)
                .field("payload.len", &payload.len())
                .finish(),
            Self::Disposition(arg0) => f.debug_tuple("Disposition").field(arg0).finish(),
            Self::Detach(arg0) => f.debug_tuple("Detach").field(arg0).finish(),
            Self::End(arg0) => f.debug_tuple("End").field(arg0).finish(),
            Self::Close(arg0) => f.debug_tuple("Close").field(arg0).finish(),
            Self::Empty => write!(f, "Empty"),
        }
    }
}

/// Encoder and decoder of AMQP frames, including the size field.
///
/// Transfers larger than the max frame size are split into multiple frames with `more`
/// set on all but the last one.
#[derive(Debug)]
pub struct FrameCodec {
    length_delimited: LengthDelimitedCodec,

    /// Largest frame that may be sent
    max_frame_size: usize,
}

impl FrameCodec {
    /// Creates a codec that sends and accepts frames up to `max_frame_size` bytes
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            length_delimited: length_delimited(max_frame_size),
            max_frame_size,
        }
    }

    /// Largest frame that will be sent
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Limits outgoing frames to the max frame size of the remote peer.
    ///
    /// A peer may not announce less than [`MIN_MAX_FRAME_SIZE`], smaller values are raised to it
    pub fn set_remote_max_frame_size(&mut self, max_frame_size: usize) {
        self.max_frame_size = max_frame_size
            .min(self.length_delimited.max_frame_length())
            .max(MIN_MAX_FRAME_SIZE);
    }

    fn write_frame(
        &mut self,
        dst: &mut BytesMut,
        channel: u16,
        performative: &[u8],
        payload: &[u8],
    ) -> Result<(), Error> {
        let mut frame =
            BytesMut::with_capacity(FRAME_HEADER_LEN + performative.len() + payload.len());
        write_header(&mut frame, FRAME_TYPE_AMQP, channel);
        frame.put_slice(performative);
        frame.put_slice(payload);
        self.length_delimited.encode(frame.freeze(), dst)?;
        Ok(())
    }

    fn encode_transfer(
        &mut self,
        dst: &mut BytesMut,
        channel: u16,
        transfer: Transfer,
        payload: Payload,
    ) -> Result<(), Error> {
        for (transfer, payload) in split_transfer(self.max_frame_size, transfer, payload)? {
            let performative = serde_amqp::to_vec(&transfer)?;
            self.write_frame(dst, channel, &performative, &payload)?;
        }
        Ok(())
    }
}

/// Splits a transfer into the frames needed to send it with frames of at most
/// `max_frame_size` bytes.
///
/// Only the first frame carries the delivery id and tag. All but the last frame have `more`
/// set. A transfer that already fits is returned unchanged.
pub fn split_transfer(
    max_frame_size: usize,
    mut transfer: Transfer,
    mut payload: Payload,
) -> Result<Vec<(Transfer, Payload)>, Error> {
    let max_body_size = max_frame_size
        .checked_sub(FRAME_SIZE_LEN + FRAME_HEADER_LEN)
        .ok_or(Error::FramingError)?;
    let more = transfer.more;
    let mut frames = Vec::new();

    loop {
        transfer.more = more;
        let performative = serde_amqp::to_vec(&transfer)?;
        if performative.len() + payload.len() <= max_body_size {
            frames.push((transfer, payload));
            return Ok(frames);
        }

        transfer.more = true;
        let performative = serde_amqp::to_vec(&transfer)?;
        let room = match max_body_size.checked_sub(performative.len()) {
            Some(room) if room > 0 => room,
            _ => return Err(Error::FramingError),
        };
        let partial = payload.split_to(room);

        // Continuation frames only need the handle
        let continuation = Transfer {
            handle: transfer.handle.clone(),
            delivery_id: None,
            delivery_tag: None,
            message_format: None,
            settled: None,
            more,
            rcv_settle_mode: None,
            state: None,
            resume: false,
            aborted: false,
            batchable: transfer.batchable,
        };
        frames.push((std::mem::replace(&mut transfer, continuation), partial));
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let performative = match item.body {
            FrameBody::Transfer {
                performative,
                payload,
            } => return self.encode_transfer(dst, item.channel, performative, payload),
            FrameBody::Open(performative) => serde_amqp::to_vec(&performative)?,
            FrameBody::Begin(performative) => serde_amqp::to_vec(&performative)?,
            FrameBody::Attach(performative) => serde_amqp::to_vec(&performative)?,
            FrameBody::Flow(performative) => serde_amqp::to_vec(&performative)?,
            FrameBody::Disposition(performative) => serde_amqp::to_vec(&performative)?,
            FrameBody::Detach(performative) => serde_amqp::to_vec(&performative)?,
            FrameBody::End(performative) => serde_amqp::to_vec(&performative)?,
            FrameBody::Close(performative) => serde_amqp::to_vec(&performative)?,
            FrameBody::Empty => Vec::new(),
        };
        self.write_frame(dst, item.channel, &performative, &[])
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
        let channel = read_header(&mut src, FRAME_TYPE_AMQP)?;

        if src.is_empty() {
            return Ok(Some(Frame::new(channel, FrameBody::Empty)));
        }

        let reader = IoReader::new((&mut src).reader());
        let mut deserializer = Deserializer::new(reader);
        let performative = Performative::deserialize(&mut deserializer)?;

        let body = match FrameBody::from(performative) {
            FrameBody::Transfer { performative, .. } => FrameBody::Transfer {
                performative,
                payload: src.freeze(),
            },
            body => body,
        };
        Ok(Some(Frame::new(channel, body)))
    }
}
