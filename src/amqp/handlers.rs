//! Command queue consumer
//!
//! Each delivery is decoded into a [`Command`], dispatched to the
//! [`MatchService`] and acknowledged. When the message names a `reply_to`
//! queue, the [`CommandReply`] is published there with the same correlation id.

use crate::amqp::messages::decode_command;
use crate::error::{classify, MatchmakingError, Result};
use crate::service::{CommandReply, MatchService};
use amqprs::{
    channel::{
        BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, BasicPublishArguments,
        Channel, QueueDeclareArguments,
    },
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

pub struct CommandConsumer {
    service: MatchService,
    channel: Channel,
    consumer_tag: String,
}

impl CommandConsumer {
    pub fn new(service: MatchService, channel: Channel) -> Self {
        Self {
            service,
            channel,
            consumer_tag: format!("ladder-commands-{}", uuid::Uuid::new_v4()),
        }
    }

    /// Declare the queue and start delivering commands from it
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let declare = QueueDeclareArguments::new(queue_name)
            .durable(true)
            .auto_delete(false)
            .finish();
        self.channel.queue_declare(declare).await.map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to declare queue {}: {}", queue_name, e),
            }
        })?;

        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);
        self.channel
            .basic_consume(CommandDelivery::new(self.service.clone()), args)
            .await
            .map_err(|e| MatchmakingError::InternalError {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!(
            "Consuming commands - queue: '{}', consumer_tag: '{}'",
            queue_name, self.consumer_tag
        );
        Ok(())
    }

    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);
        self.channel.basic_cancel(args).await.map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to stop consuming: {}", e),
            }
        })?;
        info!("Stopped consuming commands - consumer_tag: '{}'", self.consumer_tag);
        Ok(())
    }
}

struct CommandDelivery {
    service: MatchService,
}

impl CommandDelivery {
    fn new(service: MatchService) -> Self {
        Self { service }
    }

    /// Decode and run one command; undecodable bodies become a rejection
    async fn process(&self, content: &[u8]) -> CommandReply {
        match decode_command(content) {
            Ok(command) => {
                debug!("Command decoded - command: {}", command.name());
                self.service.dispatch(command).await
            }
            Err(e) => {
                let preview_len = content.len().min(100);
                warn!(
                    "Undecodable command - error: {}, preview: {:?}",
                    e,
                    String::from_utf8_lossy(&content[..preview_len])
                );
                self.service.metrics().record_command("unknown", "rejected");
                CommandReply::Rejected {
                    kind: classify(&e),
                    message: e.to_string(),
                }
            }
        }
    }

    async fn send_reply(channel: &Channel, properties: &BasicProperties, reply: &CommandReply) {
        let Some(reply_to) = properties.reply_to() else {
            return;
        };
        let payload = match serde_json::to_vec(reply) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize command reply: {}", e);
                return;
            }
        };

        let mut reply_properties = BasicProperties::default();
        reply_properties.with_content_type("application/json");
        if let Some(correlation_id) = properties.correlation_id() {
            reply_properties.with_correlation_id(correlation_id);
        }

        let args = BasicPublishArguments::new("", reply_to);
        if let Err(e) = channel.basic_publish(reply_properties, payload, args).await {
            warn!("Failed to publish command reply - reply_to: '{}', error: {}", reply_to, e);
        }
    }
}

#[async_trait]
impl AsyncConsumer for CommandDelivery {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        let start_time = std::time::Instant::now();
        debug!(
            "Command received - delivery_tag: {}, size: {} bytes",
            delivery_tag,
            content.len()
        );

        let reply = self.process(&content).await;
        Self::send_reply(channel, &basic_properties, &reply).await;

        if let Err(e) = channel
            .basic_ack(BasicAckArguments::new(delivery_tag, false))
            .await
        {
            error!("Failed to ack command - delivery_tag: {}, error: {}", delivery_tag, e);
        }

        info!(
            "Command handled - delivery_tag: {}, ok: {}, processing_time: {:.2}ms",
            delivery_tag,
            reply.is_ok(),
            start_time.elapsed().as_secs_f64() * 1000.0
        );
    }
}
