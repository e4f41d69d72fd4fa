use std::future::ready;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use health::HealthRegistry;
use serve_metrics::setup_metrics_routes;
use tower_http::trace::TraceLayer;

use crate::{endpoint, sink};

#[derive(Clone)]
pub struct State {
    pub sink: Arc<dyn sink::EventSink + Send + Sync>,
}

async fn index() -> &'static str {
    "session event ingest"
}

pub fn router<S: sink::EventSink + Send + Sync + 'static>(
    sink: S,
    liveness: HealthRegistry,
    metrics: bool,
) -> Router {
    let state = State {
        sink: Arc::new(sink),
    };

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())))
        .route("/events", post(endpoint::ingest_event))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Don't install metrics unless asked to. Installing a global recorder when
    // the router is built repeatedly (tests) does not work well.
    if metrics {
        setup_metrics_routes(router)
    } else {
        router
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::IngestError;
    use crate::event::PublishedEvent;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct MemorySink {
        events: Arc<Mutex<Vec<PublishedEvent>>>,
    }

    #[async_trait]
    impl sink::EventSink for MemorySink {
        async fn send(&self, event: PublishedEvent) -> Result<(), IngestError> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    fn test_app() -> (Router, Arc<Mutex<Vec<PublishedEvent>>>) {
        let sink = MemorySink::default();
        let events = sink.events.clone();
        (router(sink, HealthRegistry::new("liveness"), false), events)
    }

    fn post_events(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/events")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn valid_event_is_accepted_and_published() {
        let (app, events) = test_app();

        let response = app
            .oneshot(post_events(
                r#"{"sessionId":"s1","eventType":"click","payload":"{}"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].session_id, "s1");
        assert_eq!(events[0].event_type, "click");
        assert!(!events[0].event_id.is_empty());
        assert!(!events[0].ts.is_empty());
    }

    #[tokio::test]
    async fn producer_assigned_event_id_is_preserved() {
        let (app, events) = test_app();

        let response = app
            .oneshot(post_events(
                r#"{"eventId":"e-9","sessionId":"s1","eventType":"click","payload":"{}","ts":"2024-03-01T00:00:00Z"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(events.lock().unwrap()[0].event_id, "e-9");
    }

    #[tokio::test]
    async fn blank_session_id_is_rejected() {
        let (app, events) = test_app();

        let response = app
            .oneshot(post_events(
                r#"{"sessionId":"  ","eventType":"click","payload":"{}"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&body).contains("sessionId"));
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_required_field_is_rejected() {
        let (app, events) = test_app();

        let response = app
            .oneshot(post_events(r#"{"eventType":"click","payload":"{}"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_json_is_rejected() {
        let (app, _events) = test_app();

        let response = app.oneshot(post_events("not json")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
