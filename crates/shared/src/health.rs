//! 存活与就绪探针
//!
//! 消费者服务没有业务 HTTP 接口，只在 `server.port` 上暴露探针。

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde_json::{Value, json};

use crate::database::Database;

#[derive(Clone)]
struct ProbeState {
    service: String,
    db: Database,
}

/// `/health` 与 `/ready` 路由
pub fn probe_routes(service: &str, db: Database) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .with_state(ProbeState {
            service: service.to_string(),
            db,
        })
}

/// 存活探针：服务进程正常即返回 ok
async fn health_check(State(state): State<ProbeState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": state.service
    }))
}

/// 就绪探针：账本所在的数据库不可达时返回 503
async fn readiness_check(State(state): State<ProbeState>) -> (StatusCode, Json<Value>) {
    let db_ok = state.db.health_check().await.is_ok();
    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if db_ok { "ok" } else { "degraded" },
            "service": state.service,
            "checks": {
                "database": if db_ok { "ok" } else { "fail" }
            }
        })),
    )
}
