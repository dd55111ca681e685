//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。
//! 未安装 recorder 时（例如单元测试）所有记录函数都是空操作。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::ObservabilityConfig;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 安装 Prometheus recorder 并启动 `/metrics` 服务器
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    describe_metrics();
    metrics::counter!("orderflow_service_starts_total", "service" => config.service_name.clone())
        .increment(1);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

fn describe_metrics() {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "orderflow_events_published_total",
        "Order events handed to the broker, by topic and status"
    );
    metrics::describe_counter!(
        "orderflow_events_consumed_total",
        "Deliveries handled by idempotent consumers, by service and outcome"
    );
    metrics::describe_histogram!(
        "orderflow_handler_duration_seconds",
        "Idempotent handler latency in seconds"
    );
    metrics::describe_counter!(
        "orderflow_redeliveries_total",
        "Records rewound for broker redelivery after a failed attempt"
    );
    metrics::describe_counter!(
        "orderflow_dead_letters_total",
        "Records quarantined to the dead-letter topic"
    );
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 全局 Prometheus handle
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 指标记录函数
// ============================================================================

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

/// 记录一次发布结果，status 为 "ok" / "retried_ok" / "dead_lettered" / "lost"
#[inline]
pub fn record_event_published(topic: &str, status: &str) {
    metrics::counter!(
        "orderflow_events_published_total",
        "topic" => topic.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录一次消费结果
#[inline]
pub fn record_event_consumed(service: &str, outcome: &str) {
    metrics::counter!(
        "orderflow_events_consumed_total",
        "service" => service.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_handler_duration(service: &str, duration_secs: f64) {
    metrics::histogram!(
        "orderflow_handler_duration_seconds",
        "service" => service.to_string()
    )
    .record(duration_secs);
}

#[inline]
pub fn record_redelivery(group: &str) {
    metrics::counter!("orderflow_redeliveries_total", "group" => group.to_string()).increment(1);
}

#[inline]
pub fn record_dead_letter(service: &str, code: &str) {
    metrics::counter!(
        "orderflow_dead_letters_total",
        "service" => service.to_string(),
        "code" => code.to_string()
    )
    .increment(1);
}
