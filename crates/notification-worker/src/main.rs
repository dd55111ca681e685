//! 通知服务
//!
//! 消费订单事件，为每个订单幂等地写入一条通知记录。

use notification_worker::{NotificationWorker, SERVICE_NAME};
use orderflow_shared::config::AppConfig;
use orderflow_shared::database::Database;
use orderflow_shared::health::probe_routes;
use orderflow_shared::observability;
use orderflow_shared::shutdown::shutdown_channel;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;

    let _guard =
        observability::init(&config.observability.clone().with_service_name(SERVICE_NAME)).await?;
    info!(
        group_id = %config.kafka.consumer_group,
        "Starting notification-worker..."
    );

    let db = Database::connect(&config.database).await?;
    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let listener = TcpListener::bind(config.server_addr()).await?;
    let probe_app = probe_routes(SERVICE_NAME, db.clone());
    let mut probe_shutdown = shutdown_rx.clone();
    let probe_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, probe_app)
            .with_graceful_shutdown(async move {
                let _ = probe_shutdown.wait_for(|stop| *stop).await;
            })
            .await
        {
            error!(error = %e, "探针服务器异常退出");
        }
    });

    let result = NotificationWorker::new(&config, &db)?.run(shutdown_rx).await;

    let _ = shutdown_tx.send(true);
    let _ = probe_server.await;
    db.close().await;

    result?;
    info!("notification-worker shutdown complete");
    Ok(())
}
