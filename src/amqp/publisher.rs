//! Transport implementation that publishes requests to the gateway exchange

use crate::amqp::messages::{MessageEnvelope, TransportRequest};
use crate::error::{MatchmakingError, Result};
use crate::transport::{Notice, SessionHandle, Transport, TransportError, TransportResult};
use crate::types::{RequestContext, UserId};
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use tracing::{debug, info};

/// Publishes each transport call as one message on a topic exchange
///
/// Retries and throttling live in the gate; this type makes a single attempt.
pub struct AmqpTransport {
    channel: Channel,
    exchange: String,
}

impl AmqpTransport {
    pub async fn new(channel: Channel, exchange: &str) -> Result<Self> {
        let args = ExchangeDeclareArguments::new(exchange, "topic")
            .durable(true)
            .finish();
        channel.exchange_declare(args).await.map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to declare transport exchange {}: {}", exchange, e),
            }
        })?;
        info!("Transport exchange declared - exchange: '{}'", exchange);

        Ok(Self {
            channel,
            exchange: exchange.to_string(),
        })
    }

    async fn publish(&self, request: TransportRequest) -> TransportResult<()> {
        if !self.channel.is_open() {
            return Err(TransportError::Unavailable {
                message: "AMQP channel is closed".to_string(),
            });
        }

        let routing_key = request.routing_key();
        let envelope = MessageEnvelope::new(request, routing_key);
        let payload = envelope.to_bytes().map_err(|e| TransportError::Rejected {
            message: e.to_string(),
        })?;

        let args = BasicPublishArguments::new(&self.exchange, routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json")
            .with_persistence(true);

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| TransportError::Unavailable {
                message: format!("Failed to publish: {}", e),
            })?;

        debug!(
            "Transport request published - routing_key: '{}', message_id: '{}'",
            routing_key, envelope.correlation_id
        );
        Ok(())
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    async fn create_isolated_session(
        &self,
        name: &str,
        participants: &[UserId],
    ) -> TransportResult<SessionHandle> {
        let handle = SessionHandle {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
        };
        self.publish(TransportRequest::CreateSession {
            handle: handle.clone(),
            participants: participants.to_vec(),
        })
        .await?;
        Ok(handle)
    }

    async fn send_to_session(&self, handle: &SessionHandle, notice: &Notice) -> TransportResult<()> {
        self.publish(TransportRequest::SendToSession {
            handle: handle.clone(),
            notice: notice.clone(),
        })
        .await
    }

    async fn send_ephemeral_reply(
        &self,
        context: &RequestContext,
        notice: &Notice,
    ) -> TransportResult<()> {
        self.publish(TransportRequest::EphemeralReply {
            user_id: context.user_id.clone(),
            correlation_id: context.correlation_id.clone(),
            notice: notice.clone(),
        })
        .await
    }

    async fn grant_role(&self, user_id: &UserId, role: &str) -> TransportResult<()> {
        self.publish(TransportRequest::GrantRole {
            user_id: user_id.clone(),
            role: role.to_string(),
        })
        .await
    }

    async fn revoke_role(&self, user_id: &UserId, role: &str) -> TransportResult<()> {
        self.publish(TransportRequest::RevokeRole {
            user_id: user_id.clone(),
            role: role.to_string(),
        })
        .await
    }

    async fn delete_session(&self, handle: &SessionHandle) -> TransportResult<()> {
        self.publish(TransportRequest::DeleteSession {
            handle: handle.clone(),
        })
        .await
    }

    async fn alert_staff(&self, notice: &Notice) -> TransportResult<()> {
        self.publish(TransportRequest::AlertStaff {
            notice: notice.clone(),
        })
        .await
    }
}
