//! The sending link and its flow state

use std::collections::BTreeMap;

use fe2o3_amqp_types::{
    definitions::{
        DeliveryNumber, DeliveryTag, Handle, ReceiverSettleMode, Role, SenderSettleMode,
        SequenceNo,
    },
    messaging::{Source, Target},
    performatives::{Attach, Detach, Flow},
};

/// Link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No attach is sent yet
    Unattached,

    /// An attach frame has been sent
    AttachSent,

    /// The link is attached
    Attached,

    /// A non-closing detach frame has been received
    DetachReceived,

    /// A closing detach has been received
    CloseReceived,
}

/// Sending link of the producer.
///
/// Deliveries stay in the unsettled map until the receiver reports their state.
#[derive(Debug)]
pub struct SenderLink {
    name: String,
    address: String,
    handle: u32,
    state: LinkState,

    initial_delivery_count: SequenceNo,
    delivery_count: SequenceNo,
    link_credit: u32,
    drain: bool,

    unsettled: BTreeMap<DeliveryNumber, DeliveryTag>,
}

impl SenderLink {
    /// Creates an unattached link
    pub fn new(name: impl Into<String>, address: impl Into<String>, handle: u32) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            handle,
            state: LinkState::Unattached,
            initial_delivery_count: 0,
            delivery_count: 0,
            link_credit: 0,
            drain: false,
            unsettled: BTreeMap::new(),
        }
    }

    /// Name of the link
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Output handle
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// Current state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Link credit, not bounded by the session window
    pub fn link_credit(&self) -> u32 {
        match self.state {
            LinkState::Attached => self.link_credit,
            _ => 0,
        }
    }

    /// Number of deliveries without a remote state
    pub fn unsettled_count(&self) -> usize {
        self.unsettled.len()
    }

    /// The attach performative for this link
    pub fn attach(&mut self) -> Attach {
        self.state = LinkState::AttachSent;
        let target = Target::builder().address(self.address.clone()).build();
        Attach {
            name: self.name.clone(),
            handle: Handle::from(self.handle),
            role: Role::Sender,
            snd_settle_mode: SenderSettleMode::Unsettled,
            rcv_settle_mode: ReceiverSettleMode::First,
            source: Some(Box::new(Source::default())),
            target: Some(Box::new(target.into())),
            unsettled: None,
            incomplete_unsettled: false,
            initial_delivery_count: Some(self.initial_delivery_count),
            max_message_size: None,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
        }
    }

    /// Handles the remote attach. Returns whether the peer created a target
    pub fn on_attach(&mut self, attach: &Attach) -> bool {
        if self.state == LinkState::AttachSent {
            self.state = LinkState::Attached;
        }
        // A missing target means the link will be detached right away
        attach.target.is_some()
    }

    /// Handles the remote detach
    pub fn on_detach(&mut self, detach: &Detach) {
        self.state = match detach.closed {
            true => LinkState::CloseReceived,
            false => LinkState::DetachReceived,
        };
        self.link_credit = 0;
    }

    /// Updates the credit from the flow sent by the receiver.
    ///
    /// Returns a flow to send back if the receiver asked for an echo.
    pub fn on_flow(&mut self, flow: &Flow) -> Option<LinkFlow> {
        // link-credit_snd := delivery-count_rcv + link-credit_rcv - delivery-count_snd
        let delivery_count_rcv = flow.delivery_count.unwrap_or(self.initial_delivery_count);
        if let Some(link_credit_rcv) = flow.link_credit {
            self.link_credit = delivery_count_rcv
                .wrapping_add(link_credit_rcv)
                .wrapping_sub(self.delivery_count);
        }
        self.drain = flow.drain;

        match flow.echo {
            true => Some(self.link_flow()),
            false => None,
        }
    }

    /// Uses up the remaining credit if the receiver asked to drain.
    ///
    /// Returns the flow that tells the receiver about it.
    pub fn drained(&mut self) -> Option<LinkFlow> {
        if !self.drain || self.link_credit == 0 {
            return None;
        }
        self.delivery_count = self.delivery_count.wrapping_add(self.link_credit);
        self.link_credit = 0;
        self.drain = false;
        Some(self.link_flow())
    }

    /// Records a delivery. The caller checks the credit
    pub fn on_send(&mut self, delivery_id: DeliveryNumber, tag: DeliveryTag) {
        self.delivery_count = self.delivery_count.wrapping_add(1);
        self.link_credit = self.link_credit.saturating_sub(1);
        self.unsettled.insert(delivery_id, tag);
    }

    /// Removes the deliveries in `first..=last` once the receiver reported their state
    pub fn settle(&mut self, first: DeliveryNumber, last: DeliveryNumber) -> Vec<DeliveryTag> {
        if first > last {
            return Vec::new();
        }
        let ids: Vec<DeliveryNumber> = self.unsettled.range(first..=last).map(|(id, _)| *id).collect();
        ids.iter()
            .filter_map(|id| self.unsettled.remove(id))
            .collect()
    }

    fn link_flow(&self) -> LinkFlow {
        LinkFlow {
            handle: self.handle,
            delivery_count: self.delivery_count,
            link_credit: self.link_credit,
            drain: self.drain,
        }
    }
}

/// Link part of a flow performative
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFlow {
    /// Output handle
    pub handle: u32,

    /// Delivery count of the sender
    pub delivery_count: SequenceNo,

    /// Link credit of the sender
    pub link_credit: u32,

    /// Drain flag
    pub drain: bool,
}
