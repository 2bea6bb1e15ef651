use axum::{routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{check_status, health_check, list_checks, status, subscribers, AppState};
use crate::config::ApiConfig;

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Alert state
        .route("/status", get(status))
        .route("/status/:name", get(check_status))
        .route("/checks", get(list_checks))
        // Subscribers
        .route("/subscribers", get(subscribers))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve the status API until `shutdown` resolves
pub async fn run_server(
    config: &ApiConfig,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting status API on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Status API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::notifier::testing::RecordingNotifier;
    use crate::alerts::{AlertDispatcher, AlertStateTracker, Scheduler, SubscriberStore};
    use crate::checks::{Cadence, Check, CheckError, Evaluation};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tower::util::ServiceExt;

    struct FixedCheck;

    #[async_trait::async_trait]
    impl Check for FixedCheck {
        fn name(&self) -> &str {
            "Sync"
        }

        fn cadence(&self) -> Cadence {
            Cadence::Ticked
        }

        async fn evaluate(&self) -> Result<Evaluation, CheckError> {
            Ok(Evaluation::new(true, "SYNC: ALERT: behind", "SYNC: behind"))
        }
    }

    async fn create_test_app() -> Router {
        let store = Arc::new(SubscriberStore::in_memory());
        store.add("1001").await.unwrap();
        store.add("1002").await.unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let (queue, _dispatcher) = AlertDispatcher::new(10, Arc::clone(&store), notifier);
        let tracker = Arc::new(AlertStateTracker::new(queue));

        let mut scheduler = Scheduler::new(Arc::clone(&tracker), Duration::from_secs(60));
        scheduler.register(Arc::new(FixedCheck), Cadence::Ticked);
        scheduler.run_batch().await;
        tracker
            .report("CPU", Evaluation::new(false, "", "CPU: Current CPU load (all CPUs) is 3.00%"))
            .await;

        let state = Arc::new(AppState {
            tracker,
            store,
            checks: scheduler.checks().to_vec(),
            hostname: "node-1".to_string(),
        });
        build_router(state)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = create_test_app().await;
        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_status_lists_every_check() {
        let app = create_test_app().await;
        let (status, body) = get_json(app, "/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["hostname"], "node-1");
        assert_eq!(body["alerting"], 1);
        let checks = body["checks"].as_array().unwrap();
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0]["name"], "CPU");
        assert_eq!(checks[1]["name"], "Sync");
        assert_eq!(checks[1]["alerting"], true);
        assert_eq!(checks[1]["message"], "SYNC: behind");
    }

    #[tokio::test]
    async fn test_single_check_status() {
        let app = create_test_app().await;
        let (status, body) = get_json(app.clone(), "/status/Sync").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alerting"], true);

        let (status, body) = get_json(app, "/status/Nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("Nope"));
    }

    #[tokio::test]
    async fn test_list_checks() {
        let app = create_test_app().await;
        let (status, body) = get_json(app, "/checks").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["name"], "Sync");
        assert_eq!(body[0]["cadence"], "ticked");
        assert_eq!(body[0]["enabled"], true);
    }

    #[tokio::test]
    async fn test_subscriber_count() {
        let app = create_test_app().await;
        let (status, body) = get_json(app, "/subscribers").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
    }
}
