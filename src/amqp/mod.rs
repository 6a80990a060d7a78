//! AMQP adapters: inbound command queue and outbound transport exchange

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::CommandConsumer;
pub use messages::{
    decode_command, encode_command, MessageEnvelope, TransportRequest, DEFAULT_COMMAND_QUEUE,
    DEFAULT_TRANSPORT_EXCHANGE,
};
pub use publisher::AmqpTransport;
