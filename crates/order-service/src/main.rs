//! 订单服务
//!
//! 在同一进程中运行 HTTP 服务与 `orders` 消费循环，共享一个关闭信号。

use std::sync::Arc;

use order_service::{
    AppState, OrderService, SimulatedOrderProcessor,
    consumer::{order_consumer, order_consumer_options},
    routes,
};
use order_shared::{
    config::AppConfig,
    kafka::{KafkaSink, KafkaSource, MessagePublisher},
    observability,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

const SERVICE_NAME: &str = "order-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(
        addr = %config.server_addr(),
        brokers = %config.kafka.brokers,
        environment = %config.environment,
        "Starting order-service"
    );

    // 生产者进程内只创建一个，由所有请求共享
    let sink = KafkaSink::new(&config.kafka)?;
    let publisher = MessagePublisher::new(Arc::new(sink));
    let state = AppState::new(OrderService::new(publisher));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let options = order_consumer_options(&config.kafka.consumer);
    let source = KafkaSource::new(&config.kafka, &options)?;
    let consumer = order_consumer(
        source,
        Arc::new(SimulatedOrderProcessor::new()),
        &config.kafka.consumer,
    );
    let consumer_task = tokio::spawn(consumer.run(shutdown_rx));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = routes::app(state).layer(cors);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 收到 SIGTERM 或 Ctrl+C 后停止接收新连接，等待已有请求处理完毕
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = &serve_result {
        error!(error = %e, "HTTP 服务异常退出");
    }

    // HTTP 停止后再通知消费循环，正在处理的消息收到取消信号
    let _ = shutdown_tx.send(true);
    match consumer_task.await {
        Ok(Ok(stats)) => info!(?stats, "订单消费者已退出"),
        Ok(Err(e)) => error!(error = %e, "订单消费者启动失败"),
        Err(e) => error!(error = %e, "订单消费者任务异常"),
    }

    serve_result?;
    info!("Server shutdown complete");
    Ok(())
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
