//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_metric_descriptions();

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册指标描述，出现在 /metrics 端点的 HELP 注释中
fn register_metric_descriptions() {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "messages_published_total",
        "Total number of messages sent to the broker"
    );
    metrics::describe_histogram!(
        "message_publish_duration_seconds",
        "Time from publish call to broker acknowledgement in seconds"
    );

    metrics::describe_counter!(
        "messages_consumed_total",
        "Total number of messages received by consumer loops, by outcome"
    );
    metrics::describe_counter!(
        "consumer_commits_total",
        "Total number of explicit offset commits, by result"
    );
    metrics::describe_counter!(
        "consumer_transport_errors_total",
        "Total number of broker errors observed while polling"
    );
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录一次发布（result 为 success / failure）
#[inline]
pub fn record_publish(topic: &str, result: &str, duration_secs: f64) {
    metrics::counter!(
        "messages_published_total",
        "topic" => topic.to_string(),
        "result" => result.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "message_publish_duration_seconds",
        "topic" => topic.to_string()
    )
    .record(duration_secs);
}

/// 记录一条消息的消费结果
#[inline]
pub fn record_consumed(topic: &str, outcome: &str) {
    metrics::counter!(
        "messages_consumed_total",
        "topic" => topic.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录一次显式偏移量提交
#[inline]
pub fn record_commit(topic: &str, success: bool) {
    metrics::counter!(
        "consumer_commits_total",
        "topic" => topic.to_string(),
        "result" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// 记录拉取阶段的 Broker 错误
#[inline]
pub fn record_transport_error(topic: &str) {
    metrics::counter!("consumer_transport_errors_total", "topic" => topic.to_string())
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_http_request("POST", "/api/orders", 200, 0.1);
        record_publish("orders", "success", 0.02);
        record_consumed("orders", "handled");
        record_commit("orders", false);
        record_transport_error("orders");
    }
}
