//! Command line configuration

use clap::Parser;

use crate::constants::{
    DEFAULT_HOST, DEFAULT_MESSAGE_COUNT, DEFAULT_PORT, DEFAULT_TOPIC, MAX_ADDRESS_LEN,
};

/// Error in the startup configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The message count is negative or too large
    #[error("Invalid message count {0}")]
    InvalidMessageCount(i64),

    /// The container id does not fit in the address buffer
    #[error("Container id is {len} bytes long, at most {max} bytes are allowed")]
    ContainerIdTooLong {
        /// Length of the given container id
        len: usize,

        /// Maximum length
        max: usize,
    },

    /// A password was given without a username
    #[error("A password requires a username")]
    PasswordWithoutUsername,
}

/// Credentials used for SASL PLAIN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Username
    pub username: String,

    /// Password
    pub password: Option<String>,
}

/// Sends messages to a topic using an amqp address prefix
#[derive(Debug, Clone, Parser)]
#[command(name = "producer", version, about)]
pub struct Args {
    /// The host address
    #[arg(short = 'a', long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// The host port
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Number of messages to send
    #[arg(short = 'c', long, default_value_t = DEFAULT_MESSAGE_COUNT, allow_negative_numbers = true)]
    pub count: i64,

    /// Target address topic
    #[arg(short = 't', long, default_value = DEFAULT_TOPIC)]
    pub topic: String,

    /// AMQP container id [default: producer:<pid>]
    #[arg(short = 'i', long)]
    pub container_id: Option<String>,

    /// Client authentication username
    #[arg(short = 'u', long)]
    pub username: Option<String>,

    /// Client authentication password
    #[arg(short = 'P', long)]
    pub password: Option<String>,
}

/// Validated startup configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Broker host
    pub host: String,

    /// Broker port
    pub port: u16,

    /// Number of messages to send
    pub message_count: u32,

    /// Destination topic without prefix
    pub topic: String,

    /// Container id of the local connection
    pub container_id: String,

    /// Optional credentials
    pub credentials: Option<Credentials>,
}

impl Config {
    /// Address to connect to in the form `host:port`
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Container id used when none is given
pub fn default_container_id() -> String {
    let program = std::env::args()
        .next()
        .and_then(|arg| {
            std::path::Path::new(&arg)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| String::from("producer"));
    format!("{}:{}", program, std::process::id())
}

impl TryFrom<Args> for Config {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let message_count =
            u32::try_from(args.count).map_err(|_| ConfigError::InvalidMessageCount(args.count))?;

        let container_id = args.container_id.unwrap_or_else(default_container_id);
        if container_id.len() + 1 > MAX_ADDRESS_LEN {
            return Err(ConfigError::ContainerIdTooLong {
                len: container_id.len(),
                max: MAX_ADDRESS_LEN - 1,
            });
        }

        let credentials = match (args.username, args.password) {
            (Some(username), password) => Some(Credentials { username, password }),
            (None, Some(_)) => return Err(ConfigError::PasswordWithoutUsername),
            (None, None) => None,
        };

        Ok(Self {
            host: args.host,
            port: args.port,
            message_count,
            topic: args.topic,
            container_id,
            credentials,
        })
    }
}
