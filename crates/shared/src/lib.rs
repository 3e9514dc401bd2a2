//! 共享库
//!
//! 包含订单服务使用的配置、错误处理、可观测性与 Kafka 消息基础设施。

pub mod config;
pub mod error;
pub mod kafka;
pub mod observability;
pub mod test_utils;
