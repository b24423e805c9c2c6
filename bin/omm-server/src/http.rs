//! Operational HTTP endpoints: Prometheus metrics and health.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::routing::get;
use axum::{Json, Router};
use omm_core::OzoneManager;
use serde::Serialize;
use std::sync::Arc;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub node: String,
    /// Resources that hit a corruption or internal fault
    pub degraded: Vec<String>,
}

pub fn router(om: Arc<OzoneManager>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(om)
}

async fn metrics_handler(
    State(om): State<Arc<OzoneManager>>,
) -> (StatusCode, [(header::HeaderName, &'static str); 1], String) {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        om.metrics().export_prometheus(),
    )
}

/// Always 200 while serving; degraded ranges are reported, not fatal
async fn health_handler(State(om): State<Arc<OzoneManager>>) -> Json<HealthStatus> {
    let degraded = om.degraded_ranges();
    Json(HealthStatus {
        status: if degraded.is_empty() { "ok" } else { "degraded" },
        node: om.config().node.name.clone(),
        degraded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use omm_common::{OmConfig, VolumeArgs};
    use omm_core::{LocalBlockAllocator, RequestContext};
    use omm_store::MemoryKvStore;

    fn manager() -> Arc<OzoneManager> {
        Arc::new(
            OzoneManager::open(
                OmConfig::default(),
                Arc::new(MemoryKvStore::new()),
                Arc::new(LocalBlockAllocator::new(1024)),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_metrics_exposes_counters_and_gauges() {
        let om = manager();
        om.create_volume(&RequestContext::new(), &VolumeArgs::new("v", "alice"))
            .unwrap();

        let (status, headers, body) = metrics_handler(State(om)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[0].1, PROMETHEUS_CONTENT_TYPE);
        assert!(body.contains("omm_num_volume_creates 1"));
        assert!(body.contains("omm_num_volumes 1"));
    }

    #[tokio::test]
    async fn test_health_reports_ok() {
        let Json(health) = health_handler(State(manager())).await;
        let value = serde_json::to_value(&health).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["node"], "omm");
        assert!(value["degraded"].as_array().unwrap().is_empty());
    }
}
