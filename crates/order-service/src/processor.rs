//! 订单处理
//!
//! 处理逻辑通过 `OrderProcessor` 注入消费端处理器，
//! 当前实现只模拟耗时，不接入下游系统。

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use crate::models::Order;

/// 模拟处理耗时
const SIMULATED_PROCESSING_TIME: Duration = Duration::from_millis(100);

/// 订单处理能力
///
/// 收到关闭信号时应尽快返回错误，未完成的订单不会被提交。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderProcessor: Send + Sync {
    async fn process(&self, order: &Order, shutdown: watch::Receiver<bool>) -> anyhow::Result<()>;
}

/// 模拟订单处理器
#[derive(Debug, Clone)]
pub struct SimulatedOrderProcessor {
    delay: Duration,
}

impl Default for SimulatedOrderProcessor {
    fn default() -> Self {
        Self::with_delay(SIMULATED_PROCESSING_TIME)
    }
}

impl SimulatedOrderProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl OrderProcessor for SimulatedOrderProcessor {
    async fn process(
        &self,
        order: &Order,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        info!(order_id = %order.id, customer_id = %order.customer_id, "开始处理订单");

        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            Ok(_) = shutdown.wait_for(|stop| *stop) => {
                anyhow::bail!("订单处理被取消: orderId={}", order.id);
            }
        }

        info!(order_id = %order.id, "订单处理完成");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderItem;

    fn order() -> Order {
        Order {
            id: "o1".to_string(),
            customer_id: "c1".to_string(),
            items: vec![OrderItem {
                product_id: "p1".to_string(),
                quantity: 2,
            }],
        }
    }

    #[tokio::test]
    async fn test_completes_after_delay() {
        let (_tx, rx) = watch::channel(false);
        let processor = SimulatedOrderProcessor::with_delay(Duration::from_millis(5));
        assert!(processor.process(&order(), rx).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_processing_returns_error() {
        let (tx, rx) = watch::channel(false);
        let processor = SimulatedOrderProcessor::with_delay(Duration::from_secs(30));

        let task = tokio::spawn(async move { processor.process(&order(), rx).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_dropped_signal_does_not_cancel() {
        let (tx, rx) = watch::channel(false);
        drop(tx);

        let processor = SimulatedOrderProcessor::with_delay(Duration::from_millis(5));
        assert!(processor.process(&order(), rx).await.is_ok());
    }
}
