//! The producer state machine

use std::ops::ControlFlow;

use crate::{
    address::{lookup_topic_prefix, resolve},
    config::{Config, Credentials},
    constants::{DEFAULT_TOPIC_PREFIX, MAX_ADDRESS_LEN, SENDER_LINK_NAME},
    encoder::MessageEncoder,
    endpoint::Endpoint,
    error::Error,
    event::{Condition, Event, Outcome},
};

/// Local state of the producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Nothing has happened yet
    Uninitialized,

    /// The local open is sent
    Opening,

    /// The session and sending link are requested
    Attaching,

    /// The link received credit
    Sending,

    /// The connection close is requested
    Closing,

    /// The run is over
    Closed,
}

/// Sends a fixed number of durable messages to a topic and waits until all of them are
/// accepted.
///
/// All state of a run lives here and is only mutated by [`Producer::handle`].
#[derive(Debug)]
pub struct Producer {
    topic: String,
    topic_prefix: String,
    container_id: String,
    credentials: Option<Credentials>,
    quota: u32,
    sent: u32,
    acknowledged: u32,
    encoder: MessageEncoder,
    state: State,
    failed: bool,
}

impl Producer {
    /// Creates a producer that sends `quota` messages to `topic`
    pub fn new(topic: impl Into<String>, container_id: impl Into<String>, quota: u32) -> Self {
        Self {
            topic: topic.into(),
            topic_prefix: String::from(DEFAULT_TOPIC_PREFIX),
            container_id: container_id.into(),
            credentials: None,
            quota,
            sent: 0,
            acknowledged: 0,
            encoder: MessageEncoder::new(),
            state: State::Uninitialized,
            failed: false,
        }
    }

    /// Sets the credentials used on the connection
    pub fn credentials(mut self, credentials: impl Into<Option<Credentials>>) -> Self {
        self.credentials = credentials.into();
        self
    }

    /// Topic without prefix
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The prefix currently in effect
    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    /// Number of messages to send
    pub fn quota(&self) -> u32 {
        self.quota
    }

    /// Number of messages handed to the link so far
    pub fn sent(&self) -> u32 {
        self.sent
    }

    /// Number of messages accepted by the peer
    pub fn acknowledged(&self) -> u32 {
        self.acknowledged
    }

    /// Current local state
    pub fn state(&self) -> State {
        self.state
    }

    /// Whether a fatal condition was seen
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Whether every message is sent and accepted
    pub fn is_complete(&self) -> bool {
        self.acknowledged == self.quota
    }

    /// Process exit status for the run.
    ///
    /// The run only succeeds if every message was accepted and no fatal condition was seen
    pub fn exit_code(&self) -> i32 {
        match !self.failed && self.is_complete() {
            true => 0,
            false => 1,
        }
    }

    /// Handles one event.
    ///
    /// Returns `Break` once the run should stop. An `Err` is fatal and aborts the run.
    pub fn handle<E>(&mut self, event: Event, endpoint: &mut E) -> Result<ControlFlow<()>, Error>
    where
        E: Endpoint + ?Sized,
    {
        let name = event.name();

        #[cfg(feature = "tracing")]
        tracing::trace!(event = name, state = ?self.state, "Handling event");
        #[cfg(feature = "log")]
        log::trace!("Handling event {} in state {:?}", name, self.state);

        match event {
            Event::ConnectionInit => {
                if let Some(credentials) = &self.credentials {
                    endpoint.set_credentials(credentials);
                }
                endpoint.set_container_id(&self.container_id);
                endpoint.open_connection();
                self.state = State::Opening;
            }
            Event::ConnectionRemoteOpen { properties } => {
                // The broker may only override the prefix while the connection is opening
                if self.state == State::Opening {
                    if let Some(prefix) = lookup_topic_prefix(properties.as_ref()).found() {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(prefix = %prefix, "Using broker topic prefix");
                        #[cfg(feature = "log")]
                        log::debug!("Using broker topic prefix {}", prefix);

                        self.topic_prefix = prefix;
                    }
                }
                endpoint.open_session();

                let address = match resolve(MAX_ADDRESS_LEN, &self.topic, &self.topic_prefix) {
                    Ok(address) => address,
                    Err(err) => {
                        eprintln!("{}", err);
                        self.failed = true;
                        self.close(endpoint);
                        return Ok(ControlFlow::Break(()));
                    }
                };
                println!("setting amqp topic:'{}'", address);
                endpoint.open_sender(SENDER_LINK_NAME, &address);
                self.state = State::Attaching;
            }
            Event::LinkFlow { credit: _credit } => {
                #[cfg(feature = "tracing")]
                tracing::debug!(credit = _credit, sent = self.sent, "Link flow");
                #[cfg(feature = "log")]
                log::debug!("Link flow credit={} sent={}", _credit, self.sent);

                match self.state {
                    State::Attaching => self.state = State::Sending,
                    // Nothing is sent once the close is requested
                    State::Closing | State::Closed => return Ok(ControlFlow::Continue(())),
                    _ => {}
                }
                self.send_available(endpoint)?;
            }
            Event::Delivery { tag, outcome } => self.on_delivery(name, &tag, outcome, endpoint),
            Event::TransportClosed { condition } => {
                if self.check_condition(name, condition.as_ref()) {
                    self.close(endpoint);
                }
            }
            Event::ConnectionRemoteClose { condition }
            | Event::SessionRemoteClose { condition }
            | Event::LinkRemoteClose { condition }
            | Event::LinkRemoteDetach { condition } => {
                self.check_condition(name, condition.as_ref());
                self.close(endpoint);
            }
            Event::SessionRemoteOpen | Event::LinkRemoteOpen => {}
            Event::Inactive => {
                if !self.failed && !self.is_complete() {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        acknowledged = self.acknowledged,
                        quota = self.quota,
                        "Connection ended before all messages were accepted"
                    );
                    #[cfg(feature = "log")]
                    log::warn!(
                        "Connection ended after {} of {} messages were accepted",
                        self.acknowledged,
                        self.quota
                    );
                    self.failed = true;
                }
                self.state = State::Closed;
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Sends as many messages as the link credit and the remaining quota allow
    fn send_available<E>(&mut self, endpoint: &mut E) -> Result<(), Error>
    where
        E: Endpoint + ?Sized,
    {
        if self.quota == 0 && self.state == State::Sending {
            self.complete(endpoint);
            return Ok(());
        }

        while endpoint.credit() > 0 && self.sent < self.quota {
            self.sent += 1;
            let tag = self.sent.to_be_bytes();
            let payload = self.encoder.encode(self.sent)?;
            endpoint.send(&tag, payload)?;

            #[cfg(feature = "tracing")]
            tracing::trace!(sent = self.sent, "Message sent");
            #[cfg(feature = "log")]
            log::trace!("Message {} sent", self.sent);
        }
        Ok(())
    }

    fn on_delivery<E>(&mut self, event: &str, _tag: &[u8], outcome: Outcome, endpoint: &mut E)
    where
        E: Endpoint + ?Sized,
    {
        if outcome.is_accepted() {
            if self.acknowledged >= self.sent {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    tag = ?_tag,
                    acknowledged = self.acknowledged,
                    "Unexpected acknowledgement"
                );
                #[cfg(feature = "log")]
                log::warn!("Unexpected acknowledgement for delivery {:?}", _tag);
                return;
            }

            self.acknowledged += 1;
            if self.is_complete() {
                self.complete(endpoint);
            }
        } else {
            eprintln!("unexpected delivery state {}", outcome.code());
            self.check_condition(event, outcome.condition());
            self.failed = true;
            self.close(endpoint);
        }
    }

    fn complete<E>(&mut self, endpoint: &mut E)
    where
        E: Endpoint + ?Sized,
    {
        println!("{} messages sent and acknowledged", self.acknowledged);
        self.close(endpoint);
    }

    /// Reports the condition and marks the run as failed. Returns whether a condition was set
    fn check_condition(&mut self, event: &str, condition: Option<&Condition>) -> bool {
        let condition = match condition {
            Some(condition) => condition,
            None => return false,
        };

        eprintln!("{}: {}", event, condition);
        if let Some(info) = &condition.info {
            eprintln!("Err info: {:?}", info);
        }
        self.failed = true;
        true
    }

    fn close<E>(&mut self, endpoint: &mut E)
    where
        E: Endpoint + ?Sized,
    {
        endpoint.close_connection();
        self.state = State::Closing;
    }
}

impl From<&Config> for Producer {
    fn from(config: &Config) -> Self {
        Producer::new(&config.topic, &config.container_id, config.message_count)
            .credentials(config.credentials.clone())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::ops::ControlFlow;

    use fe2o3_amqp_types::primitives::{OrderedMap, Symbol, Value};

    use crate::{
        config::Credentials,
        endpoint::{Endpoint, EndpointError},
        event::{Condition, Event, Outcome},
    };

    use super::{Producer, State};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Action {
        SetCredentials(String),
        SetContainerId(String),
        OpenConnection,
        OpenSession,
        OpenSender(String, String),
        Send(Vec<u8>),
        CloseConnection,
    }

    #[derive(Debug, Default)]
    pub(crate) struct MockEndpoint {
        pub(crate) credit: u32,
        pub(crate) actions: Vec<Action>,
    }

    impl MockEndpoint {
        fn sent_tags(&self) -> Vec<Vec<u8>> {
            self.actions
                .iter()
                .filter_map(|action| match action {
                    Action::Send(tag) => Some(tag.clone()),
                    _ => None,
                })
                .collect()
        }

        fn closed(&self) -> bool {
            self.actions.contains(&Action::CloseConnection)
        }

        fn opened_sender(&self) -> Option<&str> {
            self.actions.iter().find_map(|action| match action {
                Action::OpenSender(_, address) => Some(address.as_str()),
                _ => None,
            })
        }
    }

    impl Endpoint for MockEndpoint {
        fn set_credentials(&mut self, credentials: &Credentials) {
            self.actions
                .push(Action::SetCredentials(credentials.username.clone()));
        }

        fn set_container_id(&mut self, container_id: &str) {
            self.actions
                .push(Action::SetContainerId(container_id.to_string()));
        }

        fn open_connection(&mut self) {
            self.actions.push(Action::OpenConnection);
        }

        fn open_session(&mut self) {
            self.actions.push(Action::OpenSession);
        }

        fn open_sender(&mut self, name: &str, address: &str) {
            self.actions
                .push(Action::OpenSender(name.to_string(), address.to_string()));
        }

        fn credit(&self) -> u32 {
            self.credit
        }

        fn send(&mut self, tag: &[u8], payload: &[u8]) -> Result<(), EndpointError> {
            assert!(!payload.is_empty());
            if self.credit == 0 {
                return Err(EndpointError::NoCredit);
            }
            self.credit -= 1;
            self.actions.push(Action::Send(tag.to_vec()));
            Ok(())
        }

        fn close_connection(&mut self) {
            self.actions.push(Action::CloseConnection);
        }
    }

    fn accepted(sequence: u32) -> Event {
        Event::Delivery {
            tag: sequence.to_be_bytes().to_vec(),
            outcome: Outcome::Accepted,
        }
    }

    fn step(producer: &mut Producer, event: Event, endpoint: &mut MockEndpoint) -> ControlFlow<()> {
        let flow = producer.handle(event, endpoint).unwrap();
        assert!(producer.acknowledged() <= producer.sent());
        assert!(producer.sent() <= producer.quota());
        flow
    }

    fn open(producer: &mut Producer, endpoint: &mut MockEndpoint, properties: Option<OrderedMap<Symbol, Value>>) {
        assert!(step(producer, Event::ConnectionInit, endpoint).is_continue());
        assert!(step(producer, Event::ConnectionRemoteOpen { properties }, endpoint).is_continue());
        assert!(step(producer, Event::SessionRemoteOpen, endpoint).is_continue());
        assert!(step(producer, Event::LinkRemoteOpen, endpoint).is_continue());
    }

    #[test]
    fn test_connection_init() {
        let mut producer = Producer::new("my_topic", "producer:1", 1).credentials(Credentials {
            username: "user".into(),
            password: Some("pass".into()),
        });
        let mut endpoint = MockEndpoint::default();
        step(&mut producer, Event::ConnectionInit, &mut endpoint);

        assert_eq!(
            endpoint.actions,
            vec![
                Action::SetCredentials("user".into()),
                Action::SetContainerId("producer:1".into()),
                Action::OpenConnection,
            ]
        );
        assert_eq!(producer.state(), State::Opening);
    }

    #[test]
    fn test_all_messages_accepted() {
        let mut producer = Producer::new("my_topic", "producer:1", 3);
        let mut endpoint = MockEndpoint::default();
        open(&mut producer, &mut endpoint, None);
        assert_eq!(
            endpoint.opened_sender(),
            Some("topic://my_topic")
        );
        assert!(endpoint
            .actions
            .contains(&Action::OpenSender("my_sender".into(), "topic://my_topic".into())));

        endpoint.credit = 10;
        step(&mut producer, Event::LinkFlow { credit: 10 }, &mut endpoint);
        assert_eq!(producer.sent(), 3);
        assert_eq!(endpoint.credit, 7);
        assert_eq!(
            endpoint.sent_tags(),
            vec![vec![0, 0, 0, 1], vec![0, 0, 0, 2], vec![0, 0, 0, 3]]
        );

        step(&mut producer, accepted(1), &mut endpoint);
        step(&mut producer, accepted(2), &mut endpoint);
        assert!(!endpoint.closed());
        step(&mut producer, accepted(3), &mut endpoint);
        assert!(endpoint.closed());
        assert_eq!(producer.state(), State::Closing);
        assert!(producer.is_complete());

        step(&mut producer, Event::ConnectionRemoteClose { condition: None }, &mut endpoint);
        step(&mut producer, Event::TransportClosed { condition: None }, &mut endpoint);
        assert!(step(&mut producer, Event::Inactive, &mut endpoint).is_break());
        assert_eq!(producer.exit_code(), 0);
        assert_eq!(producer.acknowledged(), 3);
    }

    #[test]
    fn test_sending_is_paced_by_credit() {
        let mut producer = Producer::new("my_topic", "producer:1", 5);
        let mut endpoint = MockEndpoint::default();
        open(&mut producer, &mut endpoint, None);

        endpoint.credit = 2;
        step(&mut producer, Event::LinkFlow { credit: 2 }, &mut endpoint);
        assert_eq!(producer.sent(), 2);
        assert_eq!(endpoint.credit, 0);

        // Flow without credit sends nothing
        step(&mut producer, Event::LinkFlow { credit: 0 }, &mut endpoint);
        assert_eq!(producer.sent(), 2);

        endpoint.credit = 100;
        step(&mut producer, Event::LinkFlow { credit: 100 }, &mut endpoint);
        assert_eq!(producer.sent(), 5);
        assert_eq!(endpoint.credit, 97);
        assert_eq!(endpoint.sent_tags().len(), 5);
    }

    #[test]
    fn test_broker_topic_prefix() {
        let mut properties = OrderedMap::new();
        properties.insert(Symbol::from("topic-prefix"), Value::String("t/".into()));

        let mut producer = Producer::new("my_topic", "producer:1", 5);
        let mut endpoint = MockEndpoint::default();
        open(&mut producer, &mut endpoint, Some(properties));

        assert_eq!(producer.topic_prefix(), "t/");
        assert_eq!(endpoint.opened_sender(), Some("t/my_topic"));
    }

    #[test]
    fn test_unrepresentable_broker_prefix_keeps_default() {
        let mut properties = OrderedMap::new();
        properties.insert(Symbol::from("topic-prefix"), Value::Bool(true));

        let mut producer = Producer::new("my_topic", "producer:1", 1);
        let mut endpoint = MockEndpoint::default();
        open(&mut producer, &mut endpoint, Some(properties));

        assert_eq!(producer.topic_prefix(), "topic://");
        assert_eq!(endpoint.opened_sender(), Some("topic://my_topic"));
        assert!(!producer.failed());
    }

    #[test]
    fn test_prefix_is_not_overridden_after_open() {
        let mut properties = OrderedMap::new();
        properties.insert(Symbol::from("topic-prefix"), Value::String("t/".into()));

        let mut producer = Producer::new("my_topic", "producer:1", 1);
        let mut endpoint = MockEndpoint::default();
        open(&mut producer, &mut endpoint, None);

        step(
            &mut producer,
            Event::ConnectionRemoteOpen {
                properties: Some(properties),
            },
            &mut endpoint,
        );
        assert_eq!(producer.topic_prefix(), "topic://");
    }

    #[test]
    fn test_rejected_delivery() {
        let mut producer = Producer::new("my_topic", "producer:1", 1);
        let mut endpoint = MockEndpoint::default();
        open(&mut producer, &mut endpoint, None);

        endpoint.credit = 1;
        step(&mut producer, Event::LinkFlow { credit: 1 }, &mut endpoint);
        step(
            &mut producer,
            Event::Delivery {
                tag: 1u32.to_be_bytes().to_vec(),
                outcome: Outcome::Rejected(Some(Condition::new(
                    "amqp:internal-error",
                    Some("rejected".to_string()),
                ))),
            },
            &mut endpoint,
        );

        assert!(producer.failed());
        assert!(endpoint.closed());
        assert_eq!(producer.acknowledged(), 0);
        assert!(!producer.is_complete());

        step(&mut producer, Event::TransportClosed { condition: None }, &mut endpoint);
        assert!(step(&mut producer, Event::Inactive, &mut endpoint).is_break());
        assert_eq!(producer.exit_code(), 1);
    }

    #[test]
    fn test_released_delivery_without_condition_fails() {
        let mut producer = Producer::new("my_topic", "producer:1", 2);
        let mut endpoint = MockEndpoint::default();
        open(&mut producer, &mut endpoint, None);

        endpoint.credit = 2;
        step(&mut producer, Event::LinkFlow { credit: 2 }, &mut endpoint);
        step(&mut producer, accepted(1), &mut endpoint);
        step(
            &mut producer,
            Event::Delivery {
                tag: 2u32.to_be_bytes().to_vec(),
                outcome: Outcome::Released,
            },
            &mut endpoint,
        );
        assert!(producer.failed());
        assert_eq!(producer.acknowledged(), 1);
    }

    #[test]
    fn test_address_too_long() {
        let topic = "x".repeat(2000);
        let mut producer = Producer::new(topic, "producer:1", 1);
        let mut endpoint = MockEndpoint::default();

        step(&mut producer, Event::ConnectionInit, &mut endpoint);
        let flow = step(
            &mut producer,
            Event::ConnectionRemoteOpen { properties: None },
            &mut endpoint,
        );

        assert!(flow.is_break());
        assert!(producer.failed());
        assert!(endpoint.closed());
        assert!(endpoint.opened_sender().is_none());
        assert_eq!(producer.exit_code(), 1);
    }

    #[test]
    fn test_remote_close_with_condition() {
        let mut producer = Producer::new("my_topic", "producer:1", 1);
        let mut endpoint = MockEndpoint::default();
        open(&mut producer, &mut endpoint, None);

        step(
            &mut producer,
            Event::ConnectionRemoteClose {
                condition: Some(Condition::new(
                    "amqp:not-found",
                    Some("no such topic".to_string()),
                )),
            },
            &mut endpoint,
        );
        assert!(producer.failed());
        assert!(endpoint.closed());
        assert_eq!(producer.state(), State::Closing);
    }

    #[test]
    fn test_condition_without_description_fails() {
        let mut producer = Producer::new("my_topic", "producer:1", 1);
        let mut endpoint = MockEndpoint::default();
        open(&mut producer, &mut endpoint, None);

        step(
            &mut producer,
            Event::LinkRemoteDetach {
                condition: Some(Condition::new("amqp:link:detach-forced", None)),
            },
            &mut endpoint,
        );
        assert!(producer.failed());
        assert!(endpoint.closed());
    }

    #[test]
    fn test_remote_close_without_condition() {
        let mut producer = Producer::new("my_topic", "producer:1", 1);
        let mut endpoint = MockEndpoint::default();
        open(&mut producer, &mut endpoint, None);

        step(&mut producer, Event::SessionRemoteClose { condition: None }, &mut endpoint);
        assert!(!producer.failed());
        assert!(endpoint.closed());

        step(&mut producer, Event::TransportClosed { condition: None }, &mut endpoint);
        assert!(step(&mut producer, Event::Inactive, &mut endpoint).is_break());
        assert_eq!(producer.exit_code(), 1);
    }

    #[test]
    fn test_clean_close_before_completion_fails() {
        let mut producer = Producer::new("my_topic", "producer:1", 3);
        let mut endpoint = MockEndpoint::default();
        open(&mut producer, &mut endpoint, None);

        endpoint.credit = 3;
        step(&mut producer, Event::LinkFlow { credit: 3 }, &mut endpoint);
        step(&mut producer, accepted(1), &mut endpoint);

        step(&mut producer, Event::ConnectionRemoteClose { condition: None }, &mut endpoint);
        step(&mut producer, Event::TransportClosed { condition: None }, &mut endpoint);
        assert!(step(&mut producer, Event::Inactive, &mut endpoint).is_break());

        assert_eq!(producer.acknowledged(), 1);
        assert!(producer.failed());
        assert_eq!(producer.exit_code(), 1);
    }

    #[test]
    fn test_no_sends_after_close_is_requested() {
        let mut producer = Producer::new("my_topic", "producer:1", 3);
        let mut endpoint = MockEndpoint::default();
        open(&mut producer, &mut endpoint, None);

        endpoint.credit = 1;
        step(&mut producer, Event::LinkFlow { credit: 1 }, &mut endpoint);
        step(
            &mut producer,
            Event::Delivery {
                tag: 1u32.to_be_bytes().to_vec(),
                outcome: Outcome::Rejected(None),
            },
            &mut endpoint,
        );
        assert_eq!(producer.state(), State::Closing);

        // The peer still grants credit in the same batch
        endpoint.credit = 1;
        step(&mut producer, Event::LinkFlow { credit: 1 }, &mut endpoint);
        assert_eq!(producer.sent(), 1);
        assert_eq!(endpoint.sent_tags().len(), 1);
        assert_eq!(producer.state(), State::Closing);
    }

    #[test]
    fn test_transport_closed() {
        let mut producer = Producer::new("my_topic", "producer:1", 1);
        let mut endpoint = MockEndpoint::default();
        step(&mut producer, Event::ConnectionInit, &mut endpoint);

        step(&mut producer, Event::TransportClosed { condition: None }, &mut endpoint);
        assert!(!producer.failed());
        assert!(!endpoint.closed());

        step(
            &mut producer,
            Event::TransportClosed {
                condition: Some(Condition::new(
                    "amqp:connection:framing-error",
                    Some("connection refused".to_string()),
                )),
            },
            &mut endpoint,
        );
        assert!(producer.failed());
        assert!(endpoint.closed());
    }

    #[test]
    fn test_zero_quota_completes_on_first_flow() {
        let mut producer = Producer::new("my_topic", "producer:1", 0);
        let mut endpoint = MockEndpoint::default();
        open(&mut producer, &mut endpoint, None);

        endpoint.credit = 10;
        step(&mut producer, Event::LinkFlow { credit: 10 }, &mut endpoint);
        assert!(endpoint.sent_tags().is_empty());
        assert!(endpoint.closed());
        assert!(producer.is_complete());
        assert_eq!(producer.exit_code(), 0);
    }

    #[test]
    fn test_extra_acknowledgement_is_ignored() {
        let mut producer = Producer::new("my_topic", "producer:1", 2);
        let mut endpoint = MockEndpoint::default();
        open(&mut producer, &mut endpoint, None);

        endpoint.credit = 1;
        step(&mut producer, Event::LinkFlow { credit: 1 }, &mut endpoint);
        step(&mut producer, accepted(1), &mut endpoint);
        step(&mut producer, accepted(1), &mut endpoint);
        assert_eq!(producer.acknowledged(), 1);
        assert!(!endpoint.closed());
    }
}
