//! Web server endpoints.
//!
//! Metric events are ingested through `/ingest`, aggregates are scraped from `/metrics`.

mod health_check;
mod ingest;
mod metrics;

use axum::Router;
use axum::routing::{get, post};

use crate::service::ServiceState;

pub fn routes() -> Router<ServiceState> {
    Router::new()
        .route("/healthcheck", get(health_check::handle))
        .route("/metrics", get(metrics::handle))
        .route("/ingest/{stream}/{topic}", post(ingest::handle))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use logjam_metrics::{CollectorManager, Options, StreamDefinition, StreamFilter};
    use tower::ServiceExt;

    use super::*;
    use crate::services::decoder::IngestMessage;
    use crate::stats::{Outcome, Stats};

    fn state(capacity: usize) -> (ServiceState, crossbeam_channel::Receiver<IngestMessage>) {
        let manager = CollectorManager::new(
            Arc::new(Options::default()),
            Duration::from_secs(60),
            StreamFilter::default(),
        );
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (
            ServiceState::new(Arc::new(manager), Arc::new(Stats::default()), tx),
            rx,
        )
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let (state, _rx) = state(1);
        let app = routes().with_state(state);

        let request = Request::get("/healthcheck").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, r#"{"is_healthy":true}"#);
    }

    #[tokio::test]
    async fn test_ingest_enqueues_until_full() {
        let stats = Arc::new(Stats::default());
        let manager = CollectorManager::new(
            Arc::new(Options::default()),
            Duration::from_secs(60),
            StreamFilter::default(),
        );
        let (tx, rx) = crossbeam_channel::bounded(1);
        let state = ServiceState::new(Arc::new(manager), Arc::clone(&stats), tx);
        let app = routes().with_state(state);

        let post = || {
            Request::post("/ingest/shop-production/logs.shop.production")
                .body(Body::from(r#"{"action":"A#b","total_time":1}"#))
                .unwrap()
        };

        let response = app.clone().oneshot(post()).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app.oneshot(post()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let message = rx.try_recv().unwrap();
        assert_eq!(message.stream, "shop-production");
        assert_eq!(message.topic, "logs.shop.production");
        assert_eq!(&message.body[..], br#"{"action":"A#b","total_time":1}"#);

        assert_eq!(stats.take().get(Outcome::Dropped), 1);
    }

    #[tokio::test]
    async fn test_metrics() {
        let (state, _rx) = state(1);
        let stream = StreamDefinition {
            app: "shop".to_owned(),
            env: "production".to_owned(),
            ..Default::default()
        };
        let collector = state
            .manager()
            .get_or_create(stream.app_env().unwrap(), &stream);
        collector.record(&logjam_metrics::MetricEvent::new(
            logjam_metrics::EventKind::Page,
            Default::default(),
            0.5,
        ));

        let app = routes().with_state(state);
        let request = Request::get("/metrics").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            crate::exposition::CONTENT_TYPE
        );

        let body = body_string(response).await;
        assert!(body.contains(
            r#"logjam:action:page_time_summary_seconds_sum{app="shop",env="production",metric="page",action="Unknown#unknown",dc="unknown"} 0.5"#
        ));
    }
}
