//! Constants shared by the producer

/// Address prefix used when the broker does not advertise one.
///
/// `topic://` is the topic address prefix of the Solace PubSub+ broker
pub const DEFAULT_TOPIC_PREFIX: &str = "topic://";

/// Remote connection property under which a broker may advertise its topic prefix
pub const TOPIC_PREFIX_KEY: &str = "topic-prefix";

/// Capacity of the scratch space an advertised topic prefix must fit in,
/// including the terminator
pub const TOPIC_PREFIX_CAPACITY: usize = 255;

/// Capacity of a resolved address, including the terminator
pub const MAX_ADDRESS_LEN: usize = 1060;

/// Size the encode buffer is given the first time it is used
pub const INITIAL_BUFFER_SIZE: usize = 128;

/// Name of the sending link
pub const SENDER_LINK_NAME: &str = "my_sender";

/// Default broker host
pub const DEFAULT_HOST: &str = "localhost";

/// Default broker port
pub const DEFAULT_PORT: u16 = 5672;

/// Default number of messages to send
pub const DEFAULT_MESSAGE_COUNT: i64 = 10;

/// Default destination topic
pub const DEFAULT_TOPIC: &str = "my_topic";

/// Max frame size advertised in the local open
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 65536;

/// Max channel advertised in the local open
pub const DEFAULT_CHANNEL_MAX: u16 = 255;

/// Incoming window advertised in the local begin
pub const DEFAULT_INCOMING_WINDOW: u32 = 2048;

/// Outgoing window advertised in the local begin
pub const DEFAULT_OUTGOING_WINDOW: u32 = 2048;
