//! Drives a [`ConnectionEndpoint`] over a socket
//!
//! The driver connects once the handler has configured the connection in response to
//! [`Event::ConnectionInit`]. It then negotiates SASL and the AMQP protocol header, and
//! from there on reads frames into events and writes the frames the handler queued.

use std::{future::Future, io};

use async_trait::async_trait;
use fe2o3_amqp_types::definitions::{self, ConnectionError};
use futures_util::{future::BoxFuture, FutureExt, SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use crate::{
    config::Config,
    connection::ConnectionEndpoint,
    error::Error,
    event::{Condition, Event},
    frames::amqp,
    proactor::Proactor,
    sasl_profile::SaslProfile,
    transport::{self, protocol_header::ProtocolHeader, Transport},
};

enum Phase<Io> {
    /// `ConnectionInit` is not delivered yet
    Start(BoxFuture<'static, io::Result<Io>>),

    /// Waiting for the handler to configure the connection
    Configuring(BoxFuture<'static, io::Result<Io>>),

    /// Frames are exchanged
    Running(Transport<Io, amqp::FrameCodec>),

    /// The transport is gone
    Stopped,
}

impl<Io> std::fmt::Debug for Phase<Io> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Start(_) => write!(f, "Start"),
            Phase::Configuring(_) => write!(f, "Configuring"),
            Phase::Running(_) => write!(f, "Running"),
            Phase::Stopped => write!(f, "Stopped"),
        }
    }
}

/// A [`Proactor`] over a single connection
#[derive(Debug)]
pub struct Driver<Io> {
    connection: ConnectionEndpoint,
    phase: Phase<Io>,
    pending: Vec<Event>,
}

impl Driver<TcpStream> {
    /// Creates a driver that connects to `host:port` once the connection is configured
    pub fn connect(host: &str, port: u16) -> Self {
        let addr = format!("{}:{}", host, port);
        Self::with_connector(Some(host.to_string()), TcpStream::connect(addr))
    }
}

impl From<&Config> for Driver<TcpStream> {
    fn from(config: &Config) -> Self {
        Self::with_connector(
            Some(config.host.clone()),
            TcpStream::connect(config.socket_addr()),
        )
    }
}

impl<Io> Driver<Io>
where
    Io: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Creates a driver that runs over the I/O object returned by `connect`
    pub fn with_connector<F>(hostname: impl Into<Option<String>>, connect: F) -> Self
    where
        F: Future<Output = io::Result<Io>> + Send + 'static,
    {
        Self {
            connection: ConnectionEndpoint::new(hostname),
            phase: Phase::Start(Box::pin(connect)),
            pending: Vec::new(),
        }
    }

    /// Creates a driver over an already connected I/O object
    pub fn new(hostname: impl Into<Option<String>>, io: Io) -> Self {
        Self::with_connector(hostname, futures_util::future::ready(Ok(io)))
    }

    /// The connection state
    pub fn connection(&self) -> &ConnectionEndpoint {
        &self.connection
    }

    async fn open(&mut self) {
        let connect = match std::mem::replace(&mut self.phase, Phase::Stopped) {
            Phase::Configuring(connect) => connect,
            phase => {
                self.phase = phase;
                return;
            }
        };

        let profile = SaslProfile::from(self.connection.credentials());
        let hostname = self.connection.hostname().map(ToString::to_string);
        let max_frame_size = self.connection.max_frame_size() as usize;

        match open_transport(connect, profile, hostname, max_frame_size).await {
            Ok(transport) => self.phase = Phase::Running(transport),
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::error!(?err, "Failed to open transport");
                #[cfg(feature = "log")]
                log::error!("Failed to open transport {:?}", err);

                let event = self.stop(Some(err.condition()));
                self.pending.push(event);
            }
        }
    }

    fn stop(&mut self, condition: Option<Condition>) -> Event {
        self.phase = Phase::Stopped;
        Event::TransportClosed { condition }
    }

    /// The condition reported when the peer goes away without closing the connection
    fn aborted() -> Condition {
        definitions::Error::new(
            ConnectionError::FramingError,
            Some(String::from("Connection aborted")),
            None,
        )
        .into()
    }

    async fn read_frames(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        let transport = match &mut self.phase {
            Phase::Running(transport) => transport,
            _ => return events,
        };

        // Block for the first frame, then take whatever else is already buffered
        let mut next = transport.next().await;
        let condition = loop {
            match next {
                Some(Ok(frame)) => self.connection.on_frame(frame, &mut events),
                Some(Err(err)) => break Some(err.condition()),
                None if self.connection.is_closed() => break None,
                None => break Some(Self::aborted()),
            }

            match transport.next().now_or_never() {
                Some(item) => next = item,
                None => {
                    if let Some(max_frame_size) = self.connection.remote_max_frame_size() {
                        transport.set_remote_max_frame_size(max_frame_size as usize);
                    }
                    return events;
                }
            }
        };

        let event = self.stop(condition);
        events.push(event);
        events
    }

    async fn write_frames(&mut self) -> Result<(), transport::Error> {
        let transport = match &mut self.phase {
            Phase::Running(transport) => transport,
            _ => {
                // Nothing can be sent anymore
                self.connection.drain_outgoing().for_each(drop);
                return Ok(());
            }
        };

        for frame in self.connection.drain_outgoing() {
            #[cfg(feature = "tracing")]
            tracing::trace!(channel = frame.channel, frame = ?frame.body, "SEND");
            #[cfg(feature = "log")]
            log::trace!("SEND channel = {}, frame = {:?}", frame.channel, frame.body);

            transport.feed(frame).await?;
        }
        transport.flush().await?;

        if self.connection.is_closed() {
            transport.close().await?;
        }
        Ok(())
    }
}

async fn open_transport<Io>(
    connect: BoxFuture<'static, io::Result<Io>>,
    mut profile: SaslProfile,
    hostname: Option<String>,
    max_frame_size: usize,
) -> Result<Transport<Io, amqp::FrameCodec>, transport::Error>
where
    Io: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let io = connect.await?;

    let mut transport = Transport::bind(io);
    transport.negotiate(ProtocolHeader::sasl()).await?;
    let mut transport = transport.into_sasl();
    transport
        .negotiate_sasl(&mut profile, hostname.as_deref())
        .await?;

    #[cfg(feature = "tracing")]
    tracing::debug!(mechanism = %profile.mechanism().as_str(), "SASL negotiated");
    #[cfg(feature = "log")]
    log::debug!("SASL negotiated with {}", profile.mechanism().as_str());

    let mut transport = transport.into_header();
    transport.negotiate(ProtocolHeader::amqp()).await?;
    Ok(transport.into_amqp(max_frame_size))
}

#[async_trait]
impl<Io> Proactor for Driver<Io>
where
    Io: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    type Endpoint = ConnectionEndpoint;

    async fn wait(&mut self) -> Result<Vec<Event>, Error> {
        if !self.pending.is_empty() {
            return Ok(std::mem::take(&mut self.pending));
        }

        match std::mem::replace(&mut self.phase, Phase::Stopped) {
            Phase::Start(connect) => {
                self.phase = Phase::Configuring(connect);
                return Ok(vec![Event::ConnectionInit]);
            }
            Phase::Configuring(connect) => {
                // The handler did not ask for anything to be flushed
                self.phase = Phase::Configuring(connect);
                self.open().await;
                if !self.pending.is_empty() {
                    return Ok(std::mem::take(&mut self.pending));
                }
            }
            Phase::Running(transport) => self.phase = Phase::Running(transport),
            Phase::Stopped => return Ok(vec![Event::Inactive]),
        }

        Ok(self.read_frames().await)
    }

    async fn done(&mut self) -> Result<(), Error> {
        self.open().await;
        self.connection.flush_drain();

        if let Err(err) = self.write_frames().await {
            #[cfg(feature = "tracing")]
            tracing::error!(?err, "Failed to write frames");
            #[cfg(feature = "log")]
            log::error!("Failed to write frames {:?}", err);

            let event = self.stop(Some(err.condition()));
            self.pending.push(event);
        } else if self.connection.is_closed() && matches!(self.phase, Phase::Running(_)) {
            let event = self.stop(None);
            self.pending.push(event);
        }
        Ok(())
    }

    fn endpoint(&mut self) -> &mut Self::Endpoint {
        &mut self.connection
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use fe2o3_amqp_types::{
        performatives::{ChannelMax, Close, MaxFrameSize, Open},
        sasl::{SaslCode, SaslMechanisms, SaslOutcome},
        primitives::Symbol,
    };
    use tokio_test::io::Builder;
    use tokio_util::codec::Encoder;

    use crate::{
        config::Config,
        endpoint::Endpoint,
        event::Event,
        frames::{
            amqp::{Frame, FrameBody, FrameCodec},
            sasl,
        },
        proactor::Proactor,
    };

    use super::Driver;

    #[test]
    fn test_from_config() {
        let config = Config {
            host: String::from("broker"),
            port: 5673,
            message_count: 1,
            topic: String::from("my_topic"),
            container_id: String::from("producer:1"),
            credentials: None,
        };
        let driver = Driver::from(&config);
        assert_eq!(driver.connection().hostname(), Some("broker"));
    }

    const SASL_HEADER: &[u8] = b"AMQP\x03\x01\x00\x00";
    const AMQP_HEADER: &[u8] = b"AMQP\x00\x01\x00\x00";

    fn sasl_bytes(frame: sasl::Frame) -> Vec<u8> {
        let mut dst = BytesMut::new();
        sasl::FrameCodec::new().encode(frame, &mut dst).unwrap();
        dst.to_vec()
    }

    fn amqp_bytes(frame: Frame) -> Vec<u8> {
        let mut dst = BytesMut::new();
        FrameCodec::new(65536).encode(frame, &mut dst).unwrap();
        dst.to_vec()
    }

    fn open(container_id: &str, hostname: Option<&str>) -> Frame {
        Frame::new(
            0u16,
            FrameBody::Open(Open {
                container_id: container_id.to_string(),
                hostname: hostname.map(ToString::to_string),
                max_frame_size: MaxFrameSize::from(65536u32),
                channel_max: ChannelMax::from(255u16),
                idle_time_out: None,
                outgoing_locales: None,
                incoming_locales: None,
                offered_capabilities: None,
                desired_capabilities: None,
                properties: None,
            }),
        )
    }

    fn handshake(builder: &mut Builder) -> &mut Builder {
        let mechanisms = sasl::Frame::Mechanisms(SaslMechanisms {
            sasl_server_mechanisms: vec![Symbol::from("ANONYMOUS")].into(),
        });
        let init = sasl::Frame::Init(fe2o3_amqp_types::sasl::SaslInit {
            mechanism: Symbol::from("ANONYMOUS"),
            initial_response: None,
            hostname: Some(String::from("localhost")),
        });
        let outcome = sasl::Frame::Outcome(SaslOutcome {
            code: SaslCode::Ok,
            additional_data: None,
        });

        builder
            .write(SASL_HEADER)
            .read(SASL_HEADER)
            .read(&sasl_bytes(mechanisms))
            .write(&sasl_bytes(init))
            .read(&sasl_bytes(outcome))
            .write(AMQP_HEADER)
            .read(AMQP_HEADER)
    }

    /// Collects the remaining events without acting on them
    async fn drive_to_end<Io>(driver: &mut Driver<Io>) -> Vec<Event>
    where
        Io: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        let mut events = Vec::new();
        loop {
            let batch = driver.wait().await.unwrap();
            driver.done().await.unwrap();
            let inactive = batch.contains(&Event::Inactive);
            events.extend(batch);
            if inactive {
                return events;
            }
        }
    }

    #[tokio::test]
    async fn test_open_and_close() {
        let mock = handshake(&mut Builder::new())
            .write(&amqp_bytes(open("producer:1", Some("localhost"))))
            .read(&amqp_bytes(open("broker", None)))
            .write(&amqp_bytes(Frame::new(0u16, FrameBody::Close(Close { error: None }))))
            .read(&amqp_bytes(Frame::new(0u16, FrameBody::Close(Close { error: None }))))
            .build();
        let mut driver = Driver::new(Some(String::from("localhost")), mock);

        assert_eq!(driver.wait().await.unwrap(), vec![Event::ConnectionInit]);
        driver.endpoint().set_container_id("producer:1");
        driver.endpoint().open_connection();
        driver.done().await.unwrap();

        assert_eq!(
            driver.wait().await.unwrap(),
            vec![Event::ConnectionRemoteOpen { properties: None }]
        );
        driver.endpoint().close_connection();
        driver.done().await.unwrap();

        let events = drive_to_end(&mut driver).await;
        assert_eq!(
            events,
            vec![
                Event::ConnectionRemoteClose { condition: None },
                Event::TransportClosed { condition: None },
                Event::Inactive,
            ]
        );
        assert!(driver.connection().is_closed());
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let mut driver = Driver::<tokio::io::DuplexStream>::with_connector(None, async {
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            ))
        });

        assert_eq!(driver.wait().await.unwrap(), vec![Event::ConnectionInit]);
        driver.endpoint().open_connection();
        driver.done().await.unwrap();

        match &driver.wait().await.unwrap()[..] {
            [Event::TransportClosed {
                condition: Some(condition),
            }] => assert_eq!(condition.name, "amqp:connection:forced"),
            events => panic!("Unexpected events {:?}", events),
        }
        driver.endpoint().close_connection();
        driver.done().await.unwrap();
        assert_eq!(driver.wait().await.unwrap(), vec![Event::Inactive]);
    }

    #[tokio::test]
    async fn test_peer_goes_away() {
        let mock = handshake(&mut Builder::new())
            .write(&amqp_bytes(open("producer:1", Some("localhost"))))
            .build();
        let mut driver = Driver::new(Some(String::from("localhost")), mock);

        driver.wait().await.unwrap();
        driver.endpoint().set_container_id("producer:1");
        driver.endpoint().open_connection();
        driver.done().await.unwrap();

        match &driver.wait().await.unwrap()[..] {
            [Event::TransportClosed {
                condition: Some(condition),
            }] => {
                assert_eq!(condition.name, "amqp:connection:framing-error");
                assert_eq!(condition.description.as_deref(), Some("Connection aborted"));
            }
            events => panic!("Unexpected events {:?}", events),
        }
    }
}
