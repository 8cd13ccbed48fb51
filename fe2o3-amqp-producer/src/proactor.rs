//! The event loop

use async_trait::async_trait;

use crate::{endpoint::Endpoint, error::Error, event::Event, handler::Producer};

/// Source of protocol events.
///
/// `wait` suspends until at least one event is available and returns every event that is
/// ready, in the order the transport produced them. `done` flushes the work the handler
/// requested while handling that batch.
#[async_trait]
pub trait Proactor {
    /// The endpoint the handler acts on
    type Endpoint: Endpoint + Send;

    /// Waits for the next batch of events
    async fn wait(&mut self) -> Result<Vec<Event>, Error>;

    /// Flushes the work produced while handling the last batch
    async fn done(&mut self) -> Result<(), Error>;

    /// The endpoint of the connection
    fn endpoint(&mut self) -> &mut Self::Endpoint;
}

/// Runs `producer` until the proactor becomes inactive or the producer stops the run.
///
/// Errors returned by the handler are fatal and abort the loop.
pub async fn run<P>(proactor: &mut P, producer: &mut Producer) -> Result<(), Error>
where
    P: Proactor + Send,
{
    loop {
        let events = proactor.wait().await?;
        for event in events {
            if producer.handle(event, proactor.endpoint())?.is_break() {
                proactor.done().await?;

                #[cfg(feature = "tracing")]
                tracing::debug!(
                    sent = producer.sent(),
                    acknowledged = producer.acknowledged(),
                    "Run stopped"
                );
                #[cfg(feature = "log")]
                log::debug!(
                    "Run stopped sent={} acknowledged={}",
                    producer.sent(),
                    producer.acknowledged()
                );
                return Ok(());
            }
        }
        proactor.done().await?;
    }
}
