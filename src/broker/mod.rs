//! Message broker plumbing: the wire model, the self-healing AMQP consumer
//! and the HTTP publish/pull client.

pub mod amqp;
pub mod connection;
pub mod http;
pub mod message;

pub use amqp::AmqpTransport;
pub use connection::{BrokerSession, BrokerTransport, Delivery, MessageHandler, ResilientBrokerConnection};
pub use http::{BrokerClient, HttpBroker};
pub use message::BrokerMessage;
