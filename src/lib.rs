pub mod amqp;
pub mod config;
pub mod consumer;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod products;
pub mod publisher;
pub mod rpc;
pub mod sellers;
pub mod topology;
pub mod types;
pub mod users;

pub use amqp::AmqpClient;
pub use config::Config;
pub use consumer::EventConsumer;
pub use publisher::EventPublisher;
pub use rpc::RpcClient;
