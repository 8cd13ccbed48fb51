//! Low level transport
//!
//! The same I/O object goes through three phases, each with its own codec: the
//! protocol header exchange, the SASL frames and finally the AMQP frames. Switching
//! codecs keeps the buffered bytes.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};

use fe2o3_amqp_types::sasl::SaslCode;

use crate::{
    frames::{amqp, sasl},
    sasl_profile::{Negotiation, SaslProfile},
};

mod error;
pub mod protocol_header;

pub use error::Error;
use protocol_header::{ProtocolHeader, ProtocolHeaderCodec};

pin_project! {
    /// Framed transport using codec `C`
    #[derive(Debug)]
    pub struct Transport<Io, C> {
        #[pin]
        framed: Framed<Io, C>,
    }
}

impl<Io, C> Transport<Io, C> {
    fn map_codec<C2>(self, f: impl FnOnce(C) -> C2) -> Transport<Io, C2> {
        Transport {
            framed: self.framed.map_codec(f),
        }
    }

    /// Consumes the transport and returns the I/O object
    pub fn into_inner(self) -> Io {
        self.framed.into_inner()
    }
}

impl<Io> Transport<Io, ProtocolHeaderCodec>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    /// Binds the I/O object. The first thing sent on it must be a protocol header
    pub fn bind(io: Io) -> Self {
        Self {
            framed: Framed::new(io, ProtocolHeaderCodec::new()),
        }
    }

    /// Sends `header` and waits for the header of the remote peer, which must be the same
    pub async fn negotiate(&mut self, header: ProtocolHeader) -> Result<ProtocolHeader, Error> {
        self.framed.send(header).await?;

        let incoming = match self.framed.next().await {
            Some(incoming) => incoming?,
            None => return Err(Error::Closed),
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(?incoming, "Received protocol header");
        #[cfg(feature = "log")]
        log::trace!("Received protocol header {:?}", incoming);

        if incoming != header {
            return Err(Error::UnexpectedProtocolHeader(incoming));
        }
        Ok(incoming)
    }

    /// Continues with SASL frames
    pub fn into_sasl(self) -> Transport<Io, sasl::FrameCodec> {
        self.map_codec(|_| sasl::FrameCodec::new())
    }

    /// Continues with AMQP frames no larger than `max_frame_size`
    pub fn into_amqp(self, max_frame_size: usize) -> Transport<Io, amqp::FrameCodec> {
        self.map_codec(|_| amqp::FrameCodec::new(max_frame_size))
    }
}

impl<Io> Transport<Io, sasl::FrameCodec>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    /// Authenticates with `profile`
    pub async fn negotiate_sasl(
        &mut self,
        profile: &mut SaslProfile,
        hostname: Option<&str>,
    ) -> Result<(), Error> {
        loop {
            let frame = match self.framed.next().await {
                Some(frame) => frame?,
                None => return Err(Error::Closed),
            };

            #[cfg(feature = "tracing")]
            tracing::trace!(?frame, "Received SASL frame");
            #[cfg(feature = "log")]
            log::trace!("Received SASL frame {:?}", frame);

            match profile.on_frame(frame, hostname)? {
                Negotiation::Init(init) => self.framed.send(sasl::Frame::Init(init)).await?,
                Negotiation::Outcome(outcome) => {
                    return match outcome.code {
                        SaslCode::Ok => Ok(()),
                        code => Err(Error::SaslFailed {
                            code,
                            additional_data: outcome.additional_data,
                        }),
                    }
                }
            }
        }
    }

    /// Goes back to the protocol header exchange once SASL is done
    pub fn into_header(self) -> Transport<Io, ProtocolHeaderCodec> {
        self.map_codec(|_| ProtocolHeaderCodec::new())
    }
}

impl<Io> Transport<Io, amqp::FrameCodec> {
    /// Limits outgoing frames to the max frame size of the remote peer
    pub fn set_remote_max_frame_size(&mut self, max_frame_size: usize) -> &mut Self {
        self.framed
            .codec_mut()
            .set_remote_max_frame_size(max_frame_size);
        self
    }
}

impl<Io, C, Item> Sink<Item> for Transport<Io, C>
where
    Io: AsyncWrite + Unpin,
    C: Encoder<Item>,
    Error: From<C::Error>,
{
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        this.framed.poll_ready(cx).map_err(Into::into)
    }

    fn start_send(self: Pin<&mut Self>, item: Item) -> Result<(), Self::Error> {
        let this = self.project();
        this.framed.start_send(item).map_err(Into::into)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        this.framed.poll_flush(cx).map_err(Into::into)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        this.framed.poll_close(cx).map_err(Into::into)
    }
}

impl<Io, C> Stream for Transport<Io, C>
where
    Io: AsyncRead + Unpin,
    C: Decoder,
    Error: From<C::Error>,
{
    type Item = Result<C::Item, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        this.framed
            .poll_next(cx)
            .map(|item| item.map(|result| result.map_err(Into::into)))
    }
}

#[cfg(test)]
mod tests {
    use fe2o3_amqp_types::{
        primitives::Symbol,
        sasl::{SaslCode, SaslInit, SaslMechanisms, SaslOutcome},
    };
    use futures_util::{SinkExt, StreamExt};
    use tokio_test::io::Builder;

    use crate::{
        frames::{
            amqp::{Frame, FrameBody},
            sasl,
        },
        sasl_profile::SaslProfile,
    };

    use super::{protocol_header::ProtocolHeader, Error, Transport};

    #[tokio::test]
    async fn test_header_exchange() {
        let mock = Builder::new()
            .write(b"AMQP\x00\x01\x00\x00")
            .read(b"AMQP\x00\x01\x00\x00")
            .build();

        let mut transport = Transport::bind(mock);
        let header = transport.negotiate(ProtocolHeader::amqp()).await.unwrap();
        assert!(header.is_amqp());
    }

    #[tokio::test]
    async fn test_header_mismatch() {
        let mock = Builder::new()
            .write(b"AMQP\x03\x01\x00\x00")
            .read(b"AMQP\x00\x01\x00\x00")
            .build();

        let mut transport = Transport::bind(mock);
        let err = transport.negotiate(ProtocolHeader::sasl()).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedProtocolHeader(h) if h.is_amqp()));
    }

    #[tokio::test]
    async fn test_empty_frame() {
        let mock = Builder::new()
            .write(&[0x00, 0x00, 0x00, 0x08, 0x02, 0x00, 0x00, 0x00])
            .build();
        let mut transport = Transport::bind(mock).into_amqp(512);
        transport.send(Frame::empty()).await.unwrap();
    }

    #[tokio::test]
    async fn test_frame_after_header_is_kept() {
        // The peer sends its header and an empty frame in one go
        let mock = Builder::new()
            .write(b"AMQP\x00\x01\x00\x00")
            .read(b"AMQP\x00\x01\x00\x00\x00\x00\x00\x08\x02\x00\x00\x00")
            .build();

        let mut transport = Transport::bind(mock);
        transport.negotiate(ProtocolHeader::amqp()).await.unwrap();
        let mut transport = transport.into_amqp(512);
        let frame = transport.next().await.unwrap().unwrap();
        assert!(matches!(frame.body, FrameBody::Empty));
    }

    fn sasl_frame(frame: sasl::Frame) -> Vec<u8> {
        use bytes::BytesMut;
        use tokio_util::codec::Encoder;

        let mut dst = BytesMut::new();
        sasl::FrameCodec::new().encode(frame, &mut dst).unwrap();
        dst.to_vec()
    }

    fn mechanisms() -> Vec<u8> {
        sasl_frame(sasl::Frame::Mechanisms(SaslMechanisms {
            sasl_server_mechanisms: vec![Symbol::from("ANONYMOUS")].into(),
        }))
    }

    fn init() -> Vec<u8> {
        sasl_frame(sasl::Frame::Init(SaslInit {
            mechanism: Symbol::from("ANONYMOUS"),
            initial_response: None,
            hostname: Some(String::from("localhost")),
        }))
    }

    fn outcome(code: SaslCode) -> Vec<u8> {
        sasl_frame(sasl::Frame::Outcome(SaslOutcome {
            code,
            additional_data: None,
        }))
    }

    #[tokio::test]
    async fn test_sasl_anonymous() {
        let mock = Builder::new()
            .write(b"AMQP\x03\x01\x00\x00")
            .read(b"AMQP\x03\x01\x00\x00")
            .read(&mechanisms())
            .write(&init())
            .read(&outcome(SaslCode::Ok))
            .build();

        let mut transport = Transport::bind(mock);
        transport.negotiate(ProtocolHeader::sasl()).await.unwrap();
        let mut transport = transport.into_sasl();
        transport
            .negotiate_sasl(&mut SaslProfile::Anonymous, Some("localhost"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sasl_auth_failure() {
        let mock = Builder::new()
            .read(&mechanisms())
            .write(&init())
            .read(&outcome(SaslCode::Auth))
            .build();

        let mut transport = Transport::bind(mock).into_sasl();
        let err = transport
            .negotiate_sasl(&mut SaslProfile::Anonymous, Some("localhost"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SaslFailed { .. }));
        assert_eq!(err.condition().name, "amqp:unauthorized-access");
    }
}
