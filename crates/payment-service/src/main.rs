//! 支付服务入口
//!
//! 消费订单事件并幂等地写入支付记录。

use orderflow_shared::config::AppConfig;
use orderflow_shared::database::Database;
use orderflow_shared::health::probe_routes;
use orderflow_shared::observability;
use orderflow_shared::shutdown::shutdown_channel;
use payment_service::{PaymentWorker, SERVICE_NAME};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;

    let _guard =
        observability::init(&config.observability.clone().with_service_name(SERVICE_NAME)).await?;

    info!(
        environment = %config.environment,
        brokers = %config.kafka.brokers,
        group_id = %config.kafka.consumer_group,
        "Starting payment-service..."
    );

    let db = Database::connect(&config.database).await?;
    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    // 探针服务器随关闭信号一起退出
    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Probe endpoints listening on {}", config.server_addr());
    let probe_app = probe_routes(SERVICE_NAME, db.clone());
    let mut probe_shutdown = shutdown_rx.clone();
    let probe_server = tokio::spawn(async move {
        let result = axum::serve(listener, probe_app)
            .with_graceful_shutdown(async move {
                let _ = probe_shutdown.wait_for(|stop| *stop).await;
            })
            .await;
        if let Err(e) = result {
            error!(error = %e, "探针服务器异常退出");
        }
    });

    let worker = PaymentWorker::new(&config, &db)?;
    let run_result = worker.run(shutdown_rx).await;

    // 消费循环因任何原因结束都要停掉探针
    let _ = shutdown_tx.send(true);
    let _ = probe_server.await;
    run_result?;

    db.close().await;
    info!("payment-service shutdown complete");
    Ok(())
}
