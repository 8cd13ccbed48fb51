//! Session state and session flow control

use fe2o3_amqp_types::{
    definitions::{Handle, TransferNumber},
    performatives::{Begin, Flow},
};

use crate::link::LinkFlow;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No begin is exchanged
    Unmapped,

    /// A begin has been sent
    BeginSent,

    /// Both begins are exchanged
    Mapped,

    /// An end has been received
    EndReceived,
}

/// The single session of the connection
#[derive(Debug)]
pub struct SessionEndpoint {
    outgoing_channel: u16,
    incoming_channel: Option<u16>,
    state: SessionState,

    next_outgoing_id: TransferNumber,
    incoming_window: u32,
    outgoing_window: u32,

    next_incoming_id: TransferNumber,
    remote_incoming_window: u32,
    remote_outgoing_window: u32,
}

impl SessionEndpoint {
    /// Creates a session that will begin on `outgoing_channel`
    pub fn new(outgoing_channel: u16, incoming_window: u32, outgoing_window: u32) -> Self {
        Self {
            outgoing_channel,
            incoming_channel: None,
            state: SessionState::Unmapped,
            next_outgoing_id: 0,
            incoming_window,
            outgoing_window,
            next_incoming_id: 0,
            remote_incoming_window: 0,
            remote_outgoing_window: 0,
        }
    }

    /// Channel frames of this session are sent on
    pub fn outgoing_channel(&self) -> u16 {
        self.outgoing_channel
    }

    /// Channel the peer sends frames of this session on
    pub fn incoming_channel(&self) -> Option<u16> {
        self.incoming_channel
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of transfers the peer is still willing to take
    pub fn remote_incoming_window(&self) -> u32 {
        self.remote_incoming_window
    }

    /// The begin performative for this session
    pub fn begin(&mut self) -> Begin {
        self.state = SessionState::BeginSent;
        Begin {
            remote_channel: None,
            next_outgoing_id: self.next_outgoing_id,
            incoming_window: self.incoming_window,
            outgoing_window: self.outgoing_window,
            handle_max: Handle::from(0u32),
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
        }
    }

    /// Handles the remote begin received on `channel`
    pub fn on_begin(&mut self, channel: u16, begin: &Begin) {
        self.incoming_channel = Some(channel);
        self.next_incoming_id = begin.next_outgoing_id;
        self.remote_incoming_window = begin.incoming_window;
        self.remote_outgoing_window = begin.outgoing_window;
        if self.state == SessionState::BeginSent {
            self.state = SessionState::Mapped;
        }
    }

    /// Handles the remote end
    pub fn on_end(&mut self) {
        self.state = SessionState::EndReceived;
    }

    /// Updates the remote window from a flow
    pub fn on_flow(&mut self, flow: &Flow) {
        // remote-incoming-window := next-incoming-id_flow + incoming-window_flow - next-outgoing-id
        let next_incoming_id = flow.next_incoming_id.unwrap_or(0);
        self.remote_incoming_window = next_incoming_id
            .wrapping_add(flow.incoming_window)
            .wrapping_sub(self.next_outgoing_id);
        self.next_incoming_id = flow.next_outgoing_id;
        self.remote_outgoing_window = flow.outgoing_window;
    }

    /// Transfer id of the next transfer frame
    pub fn next_outgoing_id(&self) -> TransferNumber {
        self.next_outgoing_id
    }

    /// Allocates the ids of a delivery sent in `frames` transfer frames.
    ///
    /// Every frame takes one transfer id and one unit of the remote incoming window. The
    /// delivery id is the transfer id of the first frame
    pub fn next_delivery_id(&mut self, frames: u32) -> TransferNumber {
        let id = self.next_outgoing_id;
        self.next_outgoing_id = self.next_outgoing_id.wrapping_add(frames);
        self.remote_incoming_window = self.remote_incoming_window.saturating_sub(frames);
        id
    }

    /// A flow carrying the session state and optionally the state of a link
    pub fn flow(&self, link: Option<LinkFlow>) -> Flow {
        let (handle, delivery_count, link_credit, drain) = match link {
            Some(link) => (
                Some(Handle::from(link.handle)),
                Some(link.delivery_count),
                Some(link.link_credit),
                link.drain,
            ),
            None => (None, None, None, false),
        };

        Flow {
            next_incoming_id: Some(self.next_incoming_id),
            incoming_window: self.incoming_window,
            next_outgoing_id: self.next_outgoing_id,
            outgoing_window: self.outgoing_window,
            handle,
            delivery_count,
            link_credit,
            available: None,
            drain,
            echo: false,
            properties: None,
        }
    }
}
