//! Bus consumer. One durable queue, prefetch of one, manual acknowledgment:
//! a malformed body is rejected outright, a failed envelope is requeued, and
//! an envelope that no longer exists is dropped since redelivery cannot
//! bring it back.

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::infrastructure::config::BusConfig;
use crate::services::errors::SyncError;
use crate::services::replication::Replicator;

/// Wire format of a bus message: the id of one envelope document.
#[derive(Debug, Deserialize)]
struct EnvelopeMessage {
    #[serde(rename = "successfullyIngestedFirestoreDocsID")]
    envelope_id: String,
}

/// Parses a delivery body into an envelope id. `None` for invalid JSON, a
/// missing field, or a blank id; those deliveries are rejected without
/// requeue since they will never become processable.
fn envelope_id(body: &[u8]) -> Option<String> {
    let message: EnvelopeMessage = serde_json::from_slice(body).ok()?;
    let id = message.envelope_id.trim().to_string();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

pub struct BusConsumer {
    connection: Connection,
    channel: Channel,
    queue_name: String,
}

impl BusConsumer {
    /// Connects and declares the durable queue. Declaration is idempotent;
    /// the queue is created when absent.
    pub async fn connect(config: &BusConfig) -> lapin::Result<Self> {
        let connection = Connection::connect(&config.uri, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel
            .queue_declare(
                &config.queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        // One in-flight message per worker.
        channel.basic_qos(1, BasicQosOptions::default()).await?;

        Ok(Self {
            connection,
            channel,
            queue_name: config.queue_name.clone(),
        })
    }

    /// Consumes until the shutdown signal fires. The signal is only checked
    /// between deliveries, so an in-flight envelope always drains before the
    /// loop exits.
    pub async fn run(
        &self,
        replicator: &Replicator,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let mut deliveries = self
            .channel
            .basic_consume(
                &self.queue_name,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(queue = %self.queue_name, "consumer started");

        loop {
            tokio::select! {
                delivery = deliveries.next() => {
                    let Some(delivery) = delivery else {
                        warn!("delivery stream closed");
                        break;
                    };
                    let delivery = delivery?;
                    self.handle_delivery(replicator, delivery).await;
                }
                _ = shutdown.changed() => {
                    info!("shutdown requested, stopping consumer");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_delivery(&self, replicator: &Replicator, delivery: Delivery) {
        let Some(envelope_id) = envelope_id(&delivery.data) else {
            warn!(
                body = %String::from_utf8_lossy(&delivery.data),
                "invalid bus message, rejecting without requeue"
            );
            self.nack(&delivery, false).await;
            return;
        };

        match replicator.process_envelope(&envelope_id).await {
            Ok(()) => {
                info!(envelope_id = %envelope_id, "envelope processed");
                if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
                    error!(error = %err, "failed to acknowledge delivery");
                }
            }
            Err(SyncError::EnvelopeNotFound(id)) => {
                error!(envelope_id = %id, "envelope document not found, dropping message");
                self.nack(&delivery, false).await;
            }
            Err(err) => {
                error!(envelope_id = %envelope_id, error = %err, "envelope failed, requeueing");
                self.nack(&delivery, true).await;
            }
        }
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) {
        let options = BasicNackOptions {
            multiple: false,
            requeue,
        };
        if let Err(err) = delivery.nack(options).await {
            error!(error = %err, "failed to negatively acknowledge delivery");
        }
    }

    pub async fn close(&self) -> lapin::Result<()> {
        self.channel.close(200, "shutting down").await?;
        self.connection.close(200, "shutting down").await
    }
}

#[cfg(test)]
mod tests {
    use super::envelope_id;

    #[test]
    fn accepts_the_expected_message_shape() {
        let body = br#"{"successfullyIngestedFirestoreDocsID": "abc123"}"#;
        assert_eq!(envelope_id(body).as_deref(), Some("abc123"));
    }

    #[test]
    fn rejects_invalid_json() {
        assert_eq!(envelope_id(b"not json at all"), None);
    }

    #[test]
    fn rejects_a_missing_or_empty_id() {
        assert_eq!(envelope_id(br#"{}"#), None);
        assert_eq!(envelope_id(br#"{"successfullyIngestedFirestoreDocsID": ""}"#), None);
        assert_eq!(
            envelope_id(br#"{"successfullyIngestedFirestoreDocsID": "   "}"#),
            None
        );
    }

    #[test]
    fn rejects_other_shapes() {
        assert_eq!(envelope_id(br#"{"somethingElse": "abc"}"#), None);
        assert_eq!(envelope_id(br#"["abc"]"#), None);
    }
}
