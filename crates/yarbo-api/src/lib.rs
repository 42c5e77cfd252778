// yarbo-api: wire layer for the Yarbo local MQTT protocol

pub mod codec;
pub mod endpoint;
pub mod error;
pub mod mqtt;
pub mod topic;
pub mod transport;

pub use codec::{Decoded, Encoding, Payload};
pub use endpoint::Endpoint;
pub use error::Error;
pub use mqtt::MqttTransport;
pub use topic::TopicBuilder;
pub use transport::{
    FeedRegistry, InboundFeed, InboundMessage, LinkState, Transport, TransportConfig,
};
