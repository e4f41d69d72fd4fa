use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;

/// Liveness reporting for the long-running loops of a service.
///
/// Each loop registers itself with a deadline and must report healthy more
/// often than that deadline, otherwise the whole process is considered
/// unhealthy and the k8s liveness probe fails. This catches loops that are
/// deadlocked or stuck on a dependency without having to kill the process
/// from inside.
#[derive(Clone)]
pub struct HealthRegistry {
    name: &'static str,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Registered but has not reported yet
    Starting,
    /// Healthy as long as the deadline is in the future
    HealthyUntil(time::OffsetDateTime),
    /// Explicitly reported unhealthy
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_healthy(&self) -> bool {
        match self {
            ComponentStatus::HealthyUntil(until) => until.gt(&time::OffsetDateTime::now_utc()),
            _ => false,
        }
    }
}

/// Write side of the registry, handed to the component that reports.
#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

impl HealthHandle {
    /// Report healthy. Must be called more frequently than the registered deadline.
    pub async fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            time::OffsetDateTime::now_utc().add(self.deadline),
        ));
    }

    /// Same as `report_healthy`, callable from non-async contexts such as
    /// librdkafka callbacks.
    pub fn report_healthy_blocking(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            time::OffsetDateTime::now_utc().add(self.deadline),
        ));
    }

    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut components) => {
                components.insert(self.component.clone(), status);
            }
            Err(err) => warn!("failed to report health status: {}", err),
        }
    }
}

impl HealthRegistry {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            components: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a component. It is initially `Starting` and stays unhealthy
    /// until it reports for the first time.
    pub async fn register(&self, component: String, deadline: Duration) -> HealthHandle {
        if let Ok(mut components) = self.components.write() {
            components.insert(component.clone(), ComponentStatus::Starting);
        }
        HealthHandle {
            component,
            deadline,
            components: self.components.clone(),
        }
    }

    /// Point-in-time status of every registered component, for the liveness route.
    pub fn get_status(&self) -> HealthStatus {
        let components = match self.components.read() {
            Ok(components) => components.clone(),
            Err(_) => {
                return HealthStatus {
                    name: self.name,
                    healthy: false,
                    components: HashMap::new(),
                }
            }
        };
        let healthy = !components.is_empty() && components.values().all(ComponentStatus::is_healthy);
        HealthStatus {
            name: self.name,
            healthy,
            components,
        }
    }
}

#[derive(Debug)]
pub struct HealthStatus {
    pub name: &'static str,
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_registry_is_unhealthy() {
        let registry = HealthRegistry::new("liveness");
        assert!(!registry.get_status().healthy);

        let _handle = registry
            .register("worker".to_string(), Duration::from_secs(30))
            .await;
        // Registered but never reported
        assert!(!registry.get_status().healthy);
    }

    #[tokio::test]
    async fn reporting_flips_to_healthy_until_deadline() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry
            .register("worker".to_string(), Duration::from_secs(30))
            .await;

        handle.report_healthy().await;
        assert!(registry.get_status().healthy);

        handle.report_status(ComponentStatus::Unhealthy);
        assert!(!registry.get_status().healthy);
    }

    #[tokio::test]
    async fn one_stalled_component_fails_the_process() {
        let registry = HealthRegistry::new("liveness");
        let worker = registry
            .register("worker".to_string(), Duration::from_secs(30))
            .await;
        let kafka = registry
            .register("rdkafka".to_string(), Duration::from_secs(30))
            .await;

        worker.report_healthy().await;
        kafka.report_status(ComponentStatus::Starting);

        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(status.components.len(), 2);
    }
}
