//! 订单服务
//!
//! 对外提供创建订单的 REST API，将订单发布到 `orders` topic，
//! 并在同一进程内消费该 topic 完成订单处理。

pub mod consumer;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod models;
pub mod processor;
pub mod routes;
pub mod service;
pub mod state;

pub use consumer::{ORDER_CONSUMER_GROUP, OrderMessageHandler};
pub use models::{Order, OrderItem, OrderResult};
pub use processor::{OrderProcessor, SimulatedOrderProcessor};
pub use service::{ORDERS_TOPIC, OrderService};
pub use state::AppState;
