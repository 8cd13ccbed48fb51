//! Connection bookkeeping
//!
//! [`ConnectionEndpoint`] keeps the state of the connection, its session and the sending
//! link. Actions of the handler queue frames, incoming frames update the state and turn
//! into [`Event`]s. No I/O happens here.

use std::collections::VecDeque;

use fe2o3_amqp_types::{
    definitions::Role,
    performatives::{ChannelMax, Close, Disposition, MaxFrameSize, Open},
};
use serde_bytes::ByteBuf;

use crate::{
    config::Credentials,
    constants::{
        DEFAULT_CHANNEL_MAX, DEFAULT_INCOMING_WINDOW, DEFAULT_MAX_FRAME_SIZE,
        DEFAULT_OUTGOING_WINDOW,
    },
    endpoint::{Endpoint, EndpointError},
    event::{Event, Outcome},
    frames::{
        amqp::{split_transfer, Frame, FrameBody},
        MIN_MAX_FRAME_SIZE,
    },
    link::{LinkState, SenderLink},
    session::{SessionEndpoint, SessionState},
    Payload,
};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing is sent
    Start,

    /// The local open is sent
    OpenSent,

    /// Both opens are exchanged
    Opened,

    /// The peer closed the connection first
    CloseReceived,

    /// The local close is sent
    CloseSent,

    /// Both closes are exchanged
    End,
}

/// State of the connection and everything on it
#[derive(Debug)]
pub struct ConnectionEndpoint {
    container_id: String,
    hostname: Option<String>,
    credentials: Option<Credentials>,
    max_frame_size: u32,
    channel_max: u16,
    remote_max_frame_size: Option<u32>,
    state: ConnectionState,

    session: Option<SessionEndpoint>,
    link: Option<SenderLink>,

    outgoing: VecDeque<Frame>,
}

impl ConnectionEndpoint {
    /// Creates a connection to `hostname`
    pub fn new(hostname: impl Into<Option<String>>) -> Self {
        Self {
            container_id: String::new(),
            hostname: hostname.into(),
            credentials: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            channel_max: DEFAULT_CHANNEL_MAX,
            remote_max_frame_size: None,
            state: ConnectionState::Start,
            session: None,
            link: None,
            outgoing: VecDeque::new(),
        }
    }

    /// Container id sent in the open
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Hostname sent in the open and the SASL init
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// Credentials for SASL PLAIN
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Largest frame this side accepts
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Largest frame the peer accepts, once known
    pub fn remote_max_frame_size(&self) -> Option<u32> {
        self.remote_max_frame_size
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The session, once requested
    pub fn session(&self) -> Option<&SessionEndpoint> {
        self.session.as_ref()
    }

    /// The sending link, once requested
    pub fn link(&self) -> Option<&SenderLink> {
        self.link.as_ref()
    }

    /// Largest frame sent to the peer
    pub fn outgoing_frame_size(&self) -> usize {
        let size = self
            .remote_max_frame_size
            .unwrap_or(self.max_frame_size)
            .min(self.max_frame_size) as usize;
        size.max(MIN_MAX_FRAME_SIZE)
    }

    /// Whether the close exchange is complete
    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::End
    }

    /// Whether a local close is sent
    pub fn is_closing(&self) -> bool {
        matches!(self.state, ConnectionState::CloseSent | ConnectionState::End)
    }

    /// Whether frames are waiting to be sent
    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Takes the frames waiting to be sent
    pub fn drain_outgoing(&mut self) -> impl Iterator<Item = Frame> + '_ {
        self.outgoing.drain(..)
    }

    fn session_channel(&self) -> u16 {
        self.session
            .as_ref()
            .map(|session| session.outgoing_channel())
            .unwrap_or(0)
    }

    /// Queues a flow if the receiver asked the link to drain
    pub fn flush_drain(&mut self) {
        let (session, link) = match (&self.session, &mut self.link) {
            (Some(session), Some(link)) => (session, link),
            _ => return,
        };
        if let Some(link_flow) = link.drained() {
            let flow = session.flow(Some(link_flow));
            self.outgoing.push_back(Frame::new(
                session.outgoing_channel(),
                FrameBody::Flow(flow),
            ));
        }
    }

    /// Updates the state from an incoming frame and appends the resulting events
    pub fn on_frame(&mut self, frame: Frame, events: &mut Vec<Event>) {
        #[cfg(feature = "tracing")]
        tracing::trace!(channel = frame.channel, frame = ?frame.body, "RECV");
        #[cfg(feature = "log")]
        log::trace!("RECV channel = {}, frame = {:?}", frame.channel, frame.body);

        let channel = frame.channel;
        match frame.body {
            FrameBody::Open(open) => self.on_open(open, events),
            FrameBody::Begin(begin) => {
                if let Some(session) = &mut self.session {
                    session.on_begin(channel, &begin);
                    events.push(Event::SessionRemoteOpen);
                }
            }
            FrameBody::Attach(attach) => {
                if let Some(link) = &mut self.link {
                    if !link.on_attach(&attach) {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(name = %attach.name, "Remote attach without target");
                        #[cfg(feature = "log")]
                        log::debug!("Remote attach {} without target", attach.name);
                    }
                    events.push(Event::LinkRemoteOpen);
                }
            }
            FrameBody::Flow(flow) => {
                let (session, link) = match (&mut self.session, &mut self.link) {
                    (Some(session), link) => (session, link),
                    (None, _) => return,
                };
                session.on_flow(&flow);

                let echo = match (flow.handle.is_some(), link.as_mut()) {
                    (true, Some(link)) => link.on_flow(&flow),
                    _ => None,
                };
                if let Some(link_flow) = echo {
                    let reply = session.flow(Some(link_flow));
                    self.outgoing.push_back(Frame::new(
                        session.outgoing_channel(),
                        FrameBody::Flow(reply),
                    ));
                }

                if let Some(link) = link {
                    if link.state() == LinkState::Attached {
                        let credit = link.link_credit().min(session.remote_incoming_window());
                        events.push(Event::LinkFlow { credit });
                    }
                }
            }
            FrameBody::Disposition(disposition) => self.on_disposition(disposition, events),
            FrameBody::Detach(detach) => {
                if let Some(link) = &mut self.link {
                    link.on_detach(&detach);
                }
                let condition = detach.error.map(Into::into);
                match detach.closed {
                    true => events.push(Event::LinkRemoteClose { condition }),
                    false => events.push(Event::LinkRemoteDetach { condition }),
                }
            }
            FrameBody::End(end) => {
                if let Some(session) = &mut self.session {
                    session.on_end();
                }
                events.push(Event::SessionRemoteClose {
                    condition: end.error.map(Into::into),
                });
            }
            FrameBody::Close(close) => {
                self.state = match self.state {
                    ConnectionState::CloseSent | ConnectionState::End => ConnectionState::End,
                    _ => ConnectionState::CloseReceived,
                };
                events.push(Event::ConnectionRemoteClose {
                    condition: close.error.map(Into::into),
                });
            }
            FrameBody::Transfer { .. } => {
                // A sender never receives transfers
                #[cfg(feature = "tracing")]
                tracing::warn!(channel, "Ignoring incoming transfer");
                #[cfg(feature = "log")]
                log::warn!("Ignoring incoming transfer on channel {}", channel);
            }
            FrameBody::Empty => {}
        }
    }

    fn on_open(&mut self, open: Open, events: &mut Vec<Event>) {
        self.remote_max_frame_size = Some(open.max_frame_size.0);
        if self.state == ConnectionState::OpenSent {
            self.state = ConnectionState::Opened;
        }
        events.push(Event::ConnectionRemoteOpen {
            properties: open.properties,
        });
    }

    fn on_disposition(&mut self, disposition: Disposition, events: &mut Vec<Event>) {
        if !matches!(disposition.role, Role::Receiver) {
            return;
        }
        let link = match &mut self.link {
            Some(link) => link,
            None => return,
        };

        let first = disposition.first;
        let last = disposition.last.unwrap_or(first);
        let outcome = disposition
            .state
            .clone()
            .map(Outcome::from)
            .unwrap_or(Outcome::Other);

        for tag in link.settle(first, last) {
            events.push(Event::Delivery {
                tag: tag.into_vec(),
                outcome: outcome.clone(),
            });
        }

        if !disposition.settled {
            let settle = Disposition {
                role: Role::Sender,
                first,
                last: disposition.last,
                settled: true,
                state: disposition.state,
                batchable: false,
            };
            self.outgoing.push_back(Frame::new(
                self.session_channel(),
                FrameBody::Disposition(settle),
            ));
        }
    }
}

impl Endpoint for ConnectionEndpoint {
    fn set_credentials(&mut self, credentials: &Credentials) {
        self.credentials = Some(credentials.clone());
    }

    fn set_container_id(&mut self, container_id: &str) {
        self.container_id = container_id.to_string();
    }

    fn open_connection(&mut self) {
        if self.state != ConnectionState::Start {
            return;
        }
        let open = Open {
            container_id: self.container_id.clone(),
            hostname: self.hostname.clone(),
            max_frame_size: MaxFrameSize::from(self.max_frame_size),
            channel_max: ChannelMax::from(self.channel_max),
            idle_time_out: None,
            outgoing_locales: None,
            incoming_locales: None,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
        };
        self.outgoing.push_back(Frame::new(0u16, FrameBody::Open(open)));
        self.state = ConnectionState::OpenSent;
    }

    fn open_session(&mut self) {
        if self.session.is_some() {
            return;
        }
        let mut session = SessionEndpoint::new(0, DEFAULT_INCOMING_WINDOW, DEFAULT_OUTGOING_WINDOW);
        let begin = session.begin();
        self.outgoing.push_back(Frame::new(
            session.outgoing_channel(),
            FrameBody::Begin(begin),
        ));
        self.session = Some(session);
    }

    fn open_sender(&mut self, name: &str, address: &str) {
        if self.link.is_some() {
            return;
        }
        let mut link = SenderLink::new(name, address, 0);
        let attach = link.attach();
        self.outgoing.push_back(Frame::new(
            self.session_channel(),
            FrameBody::Attach(attach),
        ));
        self.link = Some(link);
    }

    fn credit(&self) -> u32 {
        if self.is_closing() {
            return 0;
        }
        match (&self.session, &self.link) {
            (Some(session), Some(link)) if session.state() == SessionState::Mapped => {
                link.link_credit().min(session.remote_incoming_window())
            }
            _ => 0,
        }
    }

    fn send(&mut self, tag: &[u8], payload: &[u8]) -> Result<(), EndpointError> {
        if self.is_closing() {
            return Err(EndpointError::IllegalState);
        }
        let credit = self.credit();
        let outgoing_frame_size = self.outgoing_frame_size();
        let (session, link) = match (&mut self.session, &mut self.link) {
            (Some(session), Some(link)) if link.state() == LinkState::Attached => (session, link),
            _ => return Err(EndpointError::IllegalState),
        };
        if credit == 0 {
            return Err(EndpointError::NoCredit);
        }

        // The delivery id is the transfer id of the first frame
        let delivery_tag = ByteBuf::from(tag.to_vec());
        let transfer = fe2o3_amqp_types::performatives::Transfer {
            handle: link.handle().into(),
            delivery_id: Some(session.next_outgoing_id()),
            delivery_tag: Some(delivery_tag.clone()),
            message_format: Some(0),
            settled: Some(false),
            more: false,
            rcv_settle_mode: None,
            state: None,
            resume: false,
            aborted: false,
            batchable: false,
        };
        let payload = Payload::copy_from_slice(payload);
        let frames = split_transfer(outgoing_frame_size, transfer, payload)
            .map_err(|err| EndpointError::Framing(err.to_string()))?;

        let delivery_id = session.next_delivery_id(frames.len() as u32);
        link.on_send(delivery_id, delivery_tag);

        let channel = session.outgoing_channel();
        for (performative, payload) in frames {
            self.outgoing.push_back(Frame::new(
                channel,
                FrameBody::Transfer {
                    performative,
                    payload,
                },
            ));
        }
        Ok(())
    }

    fn close_connection(&mut self) {
        let next = match self.state {
            ConnectionState::CloseSent | ConnectionState::End => return,
            ConnectionState::CloseReceived => ConnectionState::End,
            _ => ConnectionState::CloseSent,
        };
        self.outgoing
            .push_back(Frame::new(0u16, FrameBody::Close(Close { error: None })));
        self.state = next;
    }
}
