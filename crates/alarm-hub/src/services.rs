//! Service registry with async handlers

use crate::EventBus;
use alarm_core::events::CallServiceData;
use alarm_core::{Context, ServiceCall};
use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

pub type ServiceResult = Result<Option<serde_json::Value>, ServiceError>;

pub type ServiceFuture = Pin<Box<dyn Future<Output = ServiceResult> + Send>>;

pub type ServiceHandler = Arc<dyn Fn(ServiceCall) -> ServiceFuture + Send + Sync>;

#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("service not found: {domain}.{service}")]
    NotFound { domain: String, service: String },

    #[error("service call failed: {0}")]
    CallFailed(String),

    #[error("invalid service data: {0}")]
    InvalidData(String),
}

/// Metadata about a registered service
#[derive(Debug, Clone)]
pub struct ServiceDescription {
    pub domain: String,
    pub service: String,
    pub description: Option<String>,
}

struct RegisteredService {
    handler: ServiceHandler,
    description: ServiceDescription,
}

/// Routes `domain.service` calls to their handlers
///
/// Blocking calls wait for the handler and return its result. Non-blocking
/// calls are spawned onto the runtime and return as soon as the service is
/// known to exist; handler failures are logged.
pub struct ServiceRegistry {
    services: DashMap<String, RegisteredService>,
    bus: Option<Arc<EventBus>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
            bus: None,
        }
    }

    /// Registry that announces every call as a `call_service` event
    pub fn with_bus(bus: Arc<EventBus>) -> Self {
        Self {
            services: DashMap::new(),
            bus: Some(bus),
        }
    }

    #[instrument(skip(self, domain, service, handler))]
    pub fn register<F, Fut>(
        &self,
        domain: impl Into<String>,
        service: impl Into<String>,
        handler: F,
    ) where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        self.register_with_description(
            ServiceDescription {
                domain: domain.into(),
                service: service.into(),
                description: None,
            },
            handler,
        );
    }

    pub fn register_with_description<F, Fut>(&self, description: ServiceDescription, handler: F)
    where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        debug!(
            domain = %description.domain,
            service = %description.service,
            "Registering service"
        );

        let key = format!("{}.{}", description.domain, description.service);
        let handler: ServiceHandler =
            Arc::new(move |call| Box::pin(handler(call)) as ServiceFuture);

        self.services.insert(
            key,
            RegisteredService {
                handler,
                description,
            },
        );
    }

    /// Run a service
    #[instrument(skip(self, service_data, context))]
    pub async fn call(
        &self,
        domain: &str,
        service: &str,
        service_data: serde_json::Value,
        context: Context,
        blocking: bool,
    ) -> ServiceResult {
        let handler = self
            .services
            .get(&format!("{}.{}", domain, service))
            .map(|s| s.handler.clone())
            .ok_or_else(|| {
                warn!(domain, service, "Service not found");
                ServiceError::NotFound {
                    domain: domain.to_string(),
                    service: service.to_string(),
                }
            })?;

        if let Some(bus) = &self.bus {
            bus.fire_typed(
                CallServiceData {
                    domain: domain.to_string(),
                    service: service.to_string(),
                    service_data: service_data.clone(),
                },
                context.clone(),
            );
        }

        let call = ServiceCall::new(domain, service, service_data, context);
        debug!(domain, service, blocking, "Calling service");

        if blocking {
            return handler(call).await;
        }

        let service_id = call.service_id();
        tokio::spawn(async move {
            if let Err(e) = handler(call).await {
                warn!(service = %service_id, error = %e, "Service call failed");
            }
        });
        Ok(None)
    }

    pub fn has_service(&self, domain: &str, service: &str) -> bool {
        self.services
            .contains_key(&format!("{}.{}", domain, service))
    }

    /// Services of one domain, sorted by name
    pub fn domain_services(&self, domain: &str) -> Vec<ServiceDescription> {
        let mut services: Vec<ServiceDescription> = self
            .services
            .iter()
            .filter(|s| s.description.domain == domain)
            .map(|s| s.description.clone())
            .collect();
        services.sort_by(|a, b| a.service.cmp(&b.service));
        services
    }

    pub fn all_services(&self) -> HashMap<String, Vec<ServiceDescription>> {
        let mut result: HashMap<String, Vec<ServiceDescription>> = HashMap::new();
        for entry in self.services.iter() {
            result
                .entry(entry.description.domain.clone())
                .or_default()
                .push(entry.description.clone());
        }
        result
    }

    #[instrument(skip(self))]
    pub fn unregister(&self, domain: &str, service: &str) -> bool {
        let removed = self
            .services
            .remove(&format!("{}.{}", domain, service))
            .is_some();
        if removed {
            debug!("Unregistered service");
        }
        removed
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedServiceRegistry = Arc<ServiceRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_blocking_call_returns_result() {
        let registry = ServiceRegistry::new();
        registry.register("test", "echo", |call: ServiceCall| async move {
            Ok(Some(call.service_data))
        });

        let result = registry
            .call("test", "echo", json!({"msg": "hi"}), Context::new(), true)
            .await
            .unwrap();
        assert_eq!(result, Some(json!({"msg": "hi"})));
    }

    #[tokio::test]
    async fn test_missing_service() {
        let registry = ServiceRegistry::new();
        let result = registry
            .call("scene", "turn_on", json!({}), Context::new(), false)
            .await;
        assert!(matches!(result, Err(ServiceError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_non_blocking_call_runs_in_background() {
        let registry = ServiceRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        registry.register("light", "turn_on", move |call: ServiceCall| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(call.entity_ids());
                Err(ServiceError::CallFailed("bulb offline".to_string()))
            }
        });

        let result = registry
            .call(
                "light",
                "turn_on",
                json!({"entity_id": "light.hall"}),
                Context::new(),
                false,
            )
            .await;
        // Failures of background calls never reach the caller
        assert!(matches!(result, Ok(None)));

        tokio::task::yield_now().await;
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_calls_are_announced_on_bus() {
        let bus = Arc::new(EventBus::new());
        let registry = ServiceRegistry::with_bus(bus.clone());
        registry.register("siren", "turn_on", |_: ServiceCall| async { Ok(None) });
        let mut rx = bus.subscribe_typed::<CallServiceData>();

        registry
            .call(
                "siren",
                "turn_on",
                json!({"entity_id": "siren.hall"}),
                Context::new(),
                true,
            )
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.data.domain, "siren");
        assert_eq!(event.data.service_data["entity_id"], "siren.hall");
    }

    #[test]
    fn test_domain_services_and_unregister() {
        let registry = ServiceRegistry::new();
        for service in ["mobile_app_anna", "mobile_app_bob"] {
            registry.register("notify", service, |_: ServiceCall| async { Ok(None) });
        }
        registry.register("light", "turn_on", |_: ServiceCall| async { Ok(None) });

        let notify: Vec<String> = registry
            .domain_services("notify")
            .into_iter()
            .map(|s| s.service)
            .collect();
        assert_eq!(notify, vec!["mobile_app_anna", "mobile_app_bob"]);
        assert_eq!(registry.all_services().len(), 2);

        assert!(registry.unregister("notify", "mobile_app_bob"));
        assert!(!registry.unregister("notify", "mobile_app_bob"));
        assert!(!registry.has_service("notify", "mobile_app_bob"));
        assert_eq!(registry.service_count(), 2);
    }
}
