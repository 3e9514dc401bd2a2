//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::observability::ObservabilityConfig;

/// 生产者配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProducerSettings {
    /// 单条消息的最长投递时间，超时后发送方收到失败而非无限等待
    pub message_timeout_ms: u64,
    pub acks: String,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            message_timeout_ms: 5000,
            acks: "all".to_string(),
        }
    }
}

impl ProducerSettings {
    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }
}

/// 消费组级别的基础配置
///
/// 同一服务内的多个消费循环共享这份配置，各自以 topic 专属的
/// group id 覆盖 `group_id`。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    pub group_id: String,
    pub auto_commit_enabled: bool,
    pub auto_offset_reset: String,
    pub poll_timeout_ms: u64,
    /// Broker 通信错误后的固定等待时间
    pub error_backoff_secs: u64,
    pub session_timeout_ms: u64,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            group_id: "order-service".to_string(),
            auto_commit_enabled: true,
            auto_offset_reset: "earliest".to_string(),
            poll_timeout_ms: 1000,
            error_backoff_secs: 5,
            session_timeout_ms: 45000,
        }
    }
}

/// Kafka 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub brokers: String,
    pub producer: ProducerSettings,
    pub consumer: ConsumerSettings,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            producer: ProducerSettings::default(),
            consumer: ConsumerSettings::default(),
        }
    }
}

/// 服务配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub server: ServerConfig,
    pub kafka: KafkaConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（ORDER_ 前缀，`__` 分隔层级，如 ORDER_KAFKA__BROKERS -> kafka.brokers）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("ORDER_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            // 字段名本身含下划线，层级分隔必须使用双下划线
            .add_source(
                Environment::with_prefix("ORDER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut config: Self = builder.build()?.try_deserialize()?;
        if config.observability.service_name.is_empty() {
            config.observability.service_name = config.service_name.clone();
        }

        Ok(config)
    }

    /// 获取服务地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.kafka.brokers, "localhost:9092");
        assert!(config.kafka.consumer.auto_commit_enabled);
        assert_eq!(config.kafka.consumer.error_backoff_secs, 5);
        assert_eq!(config.kafka.producer.message_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_server_addr() {
        let config = AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            ..Default::default()
        };
        assert_eq!(config.server_addr(), "127.0.0.1:3000");
    }

    #[test]
    fn test_partial_kafka_section_keeps_defaults() {
        let config: AppConfig = Config::builder()
            .set_override("kafka.brokers", "kafka-1:9092,kafka-2:9092")
            .unwrap()
            .set_override("kafka.consumer.auto_commit_enabled", false)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.kafka.brokers, "kafka-1:9092,kafka-2:9092");
        assert!(!config.kafka.consumer.auto_commit_enabled);
        assert_eq!(config.kafka.consumer.poll_timeout_ms, 1000);
        assert_eq!(config.kafka.producer.acks, "all");
    }

    #[test]
    fn test_load_without_files_uses_defaults() {
        // SAFETY: 测试中仅指向一个不存在的目录，不影响其他测试读取的变量
        unsafe {
            std::env::set_var("CONFIG_DIR", "/nonexistent-order-config");
        }
        let config = AppConfig::load("order-service").unwrap();
        assert_eq!(config.service_name, "order-service");
        assert_eq!(config.observability.service_name, "order-service");
        unsafe {
            std::env::remove_var("CONFIG_DIR");
        }
    }
}
