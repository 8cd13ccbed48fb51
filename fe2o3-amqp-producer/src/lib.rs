#![deny(missing_docs, missing_debug_implementations)]

//! An event driven AMQP 1.0 producer that publishes a fixed number of durable messages to a
//! topic and waits until every one of them is accepted.
//!
//! The protocol logic lives in [`Producer`], a state machine driven by [`Event`]s. It acts
//! on the connection only through the [`Endpoint`] trait. [`Driver`] is the [`Proactor`]
//! that runs a [`ConnectionEndpoint`] over a TCP socket.
//!
//! ```rust,no_run
//! use fe2o3_amqp_producer::{proactor, Driver, Producer};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let mut producer = Producer::new("my_topic", "producer:1", 10);
//!     let mut driver = Driver::connect("localhost", 5672);
//!     proactor::run(&mut driver, &mut producer).await.unwrap();
//!     std::process::exit(producer.exit_code());
//! }
//! ```

pub mod address;
pub mod config;
pub mod connection;
pub mod constants;
pub mod driver;
pub mod encoder;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod frames;
pub mod handler;
pub mod link;
pub mod proactor;
pub mod sasl_profile;
pub mod session;
pub mod transport;

pub use connection::ConnectionEndpoint;
pub use driver::Driver;
pub use endpoint::Endpoint;
pub use error::Error;
pub use event::{Condition, Event, Outcome};
pub use handler::Producer;
pub use proactor::Proactor;

/// Payload of a transfer
pub type Payload = bytes::Bytes;
