//! SASL profiles supported by the producer

use bytes::BufMut;
use fe2o3_amqp_types::{
    primitives::{Binary, Symbol},
    sasl::{SaslInit, SaslOutcome},
};
use serde_bytes::ByteBuf;

use crate::{config::Credentials, frames::sasl};

/// Anonymous mechanism
pub const ANONYMOUS: &str = "ANONYMOUS";

/// Plain text username and password
pub const PLAIN: &str = "PLAIN";

/// Error negotiating SASL
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The server does not offer the mechanism of the profile
    #[error("Mechanism {0} is not offered by the server")]
    MechanismNotSupported(String),

    /// The server sent a frame that is not expected by the profile
    #[error("Unexpected SASL frame {0}")]
    UnexpectedFrame(&'static str),
}

/// Next step of the negotiation
#[derive(Debug)]
pub enum Negotiation {
    /// Send the init frame
    Init(SaslInit),

    /// The server sent the outcome
    Outcome(SaslOutcome),
}

/// SASL profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaslProfile {
    /// SASL ANONYMOUS
    Anonymous,

    /// SASL PLAIN
    Plain {
        /// Username
        username: String,

        /// Password
        password: String,
    },
}

impl From<Option<&Credentials>> for SaslProfile {
    fn from(credentials: Option<&Credentials>) -> Self {
        match credentials {
            Some(credentials) => SaslProfile::Plain {
                username: credentials.username.clone(),
                password: credentials.password.clone().unwrap_or_default(),
            },
            None => SaslProfile::Anonymous,
        }
    }
}

impl SaslProfile {
    /// Mechanism name
    pub fn mechanism(&self) -> Symbol {
        match self {
            SaslProfile::Anonymous => Symbol::from(ANONYMOUS),
            SaslProfile::Plain { .. } => Symbol::from(PLAIN),
        }
    }

    /// Initial response sent with the init frame
    pub fn initial_response(&self) -> Option<Binary> {
        match self {
            SaslProfile::Anonymous => None,
            SaslProfile::Plain { username, password } => {
                // authzid NUL authcid NUL passwd, with an empty authzid
                let mut buf = Vec::with_capacity(username.len() + password.len() + 2);
                buf.put_u8(0);
                buf.put_slice(username.as_bytes());
                buf.put_u8(0);
                buf.put_slice(password.as_bytes());
                Some(ByteBuf::from(buf))
            }
        }
    }

    /// Handles a frame from the server
    pub fn on_frame(
        &mut self,
        frame: sasl::Frame,
        hostname: Option<&str>,
    ) -> Result<Negotiation, Error> {
        match frame {
            sasl::Frame::Mechanisms(mechanisms) => {
                let mechanism = self.mechanism();
                let offered = mechanisms
                    .sasl_server_mechanisms
                    .iter()
                    .any(|m| m == &mechanism);
                if !offered {
                    return Err(Error::MechanismNotSupported(mechanism.as_str().to_string()));
                }

                Ok(Negotiation::Init(SaslInit {
                    mechanism,
                    initial_response: self.initial_response(),
                    hostname: hostname.map(Into::into),
                }))
            }
            sasl::Frame::Outcome(outcome) => Ok(Negotiation::Outcome(outcome)),
            sasl::Frame::Challenge(_) => Err(Error::UnexpectedFrame("challenge")),
            sasl::Frame::Init(_) => Err(Error::UnexpectedFrame("init")),
            sasl::Frame::Response(_) => Err(Error::UnexpectedFrame("response")),
        }
    }
}
