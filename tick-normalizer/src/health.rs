use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

/// Liveness reporting for the long-running loops of the service.
///
/// The process is only live while every registered component keeps reporting healthy
/// before its deadline. The rdkafka clients report from their statistics callback, the
/// consumer loop on a timer while it is running.
#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Registered, has not reported yet
    Starting,
    /// Reported healthy, must report again before the deadline
    HealthyUntil(Instant),
    /// Reported unhealthy
    Unhealthy,
    /// Failed to report before its deadline
    Stalled,
}

#[derive(Debug, Default)]
pub struct HealthStatus {
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

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

impl HealthHandle {
    /// Must be called more often than the deadline the component registered with.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(Instant::now() + self.deadline));
    }

    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut map) => {
                map.insert(self.component.clone(), status);
            }
            Err(_) => warn!(component = %self.component, "poisoned health registry lock"),
        }
    }
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    pub fn register(&self, component: &str, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.to_owned(),
            deadline,
            components: self.components.clone(),
        };
        handle.report_status(ComponentStatus::Starting);
        info!(registry = %self.name, component, "registered health component");
        handle
    }

    /// Current status of every component. Components past their deadline are reported
    /// as stalled.
    pub fn get_status(&self) -> HealthStatus {
        let now = Instant::now();
        let components = self
            .components
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut status = HealthStatus {
            healthy: !components.is_empty(),
            components: HashMap::with_capacity(components.len()),
        };

        for (name, component_status) in components.iter() {
            let component_status = match component_status {
                ComponentStatus::HealthyUntil(until) if *until <= now => ComponentStatus::Stalled,
                other => *other,
            };
            if !matches!(component_status, ComponentStatus::HealthyUntil(_)) {
                status.healthy = false;
            }
            status.components.insert(name.clone(), component_status);
        }

        if !status.healthy {
            warn!(registry = %self.name, "health check failed: {:?}", status.components);
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry_is_unhealthy() {
        let registry = HealthRegistry::new("liveness");
        assert!(!registry.get_status().healthy);
    }

    #[test]
    fn test_all_components_must_report() {
        let registry = HealthRegistry::new("liveness");
        let consumer = registry.register("consumer", Duration::from_secs(30));
        let producer = registry.register("producer", Duration::from_secs(30));

        assert!(!registry.get_status().healthy);

        consumer.report_healthy();
        assert!(!registry.get_status().healthy);

        producer.report_healthy();
        assert!(registry.get_status().healthy);

        producer.report_status(ComponentStatus::Unhealthy);
        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(status.components["producer"], ComponentStatus::Unhealthy);
    }

    #[test]
    fn test_missed_deadline_is_stalled() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("worker", Duration::ZERO);
        handle.report_healthy();

        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(status.components["worker"], ComponentStatus::Stalled);
    }

    #[test]
    fn test_response_status_code() {
        let registry = HealthRegistry::new("liveness");
        registry
            .register("consumer", Duration::from_secs(30))
            .report_healthy();

        assert_eq!(registry.get_status().into_response().status(), StatusCode::OK);
        assert_eq!(
            HealthStatus::default().into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
