//! Component health for the modeling service
//!
//! Each model kind and the storage root report a status. Liveness is the
//! worst of them; readiness additionally requires startup to have finished.

use crate::models::ModelKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Parts of the service that report health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Storage,
    PriceModel,
    ImageModel,
}

impl From<ModelKind> for Component {
    fn from(kind: ModelKind) -> Self {
        match kind {
            ModelKind::Price => Component::PriceModel,
            ModelKind::Image => Component::ImageModel,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Component::Storage => "storage",
            Component::PriceModel => "price_model",
            Component::ImageModel => "image_model",
        })
    }
}

/// Ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Usable but incomplete, e.g. a model that has not been trained yet
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub since: DateTime<Utc>,
}

impl ComponentHealth {
    pub fn new(status: ComponentStatus, detail: Option<String>) -> Self {
        Self {
            status,
            detail,
            since: Utc::now(),
        }
    }
}

/// Body of the liveness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
}

impl HealthReport {
    fn from_components(components: BTreeMap<Component, ComponentHealth>) -> Self {
        let status = components
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        Self { status, components }
    }
}

/// Body of the readiness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Readiness {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct HealthState {
    components: BTreeMap<Component, ComponentHealth>,
    started: bool,
}

/// Shared, cloneable health table
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a component's status; an unchanged status keeps its `since`
    pub async fn set(&self, component: Component, status: ComponentStatus, detail: Option<String>) {
        let mut state = self.state.write().await;
        match state.components.get_mut(&component) {
            Some(current) if current.status == status => current.detail = detail,
            _ => {
                state
                    .components
                    .insert(component, ComponentHealth::new(status, detail));
            }
        }
    }

    pub async fn get(&self, component: Component) -> Option<ComponentHealth> {
        self.state.read().await.components.get(&component).cloned()
    }

    /// Startup finished; readiness now depends on component health only
    pub async fn mark_started(&self) {
        self.state.write().await.started = true;
    }

    pub async fn report(&self) -> HealthReport {
        HealthReport::from_components(self.state.read().await.components.clone())
    }

    /// Untrained models only degrade health, so the service is ready as
    /// soon as startup finished and nothing is unhealthy.
    pub async fn readiness(&self) -> Readiness {
        let state = self.state.read().await;
        if !state.started {
            return Readiness {
                ready: false,
                reason: Some("service is still starting".to_string()),
            };
        }

        let failing: Vec<String> = state
            .components
            .iter()
            .filter(|(_, h)| h.status == ComponentStatus::Unhealthy)
            .map(|(c, h)| match &h.detail {
                Some(detail) => format!("{c}: {detail}"),
                None => c.to_string(),
            })
            .collect();

        if failing.is_empty() {
            Readiness {
                ready: true,
                reason: None,
            }
        } else {
            Readiness {
                ready: false,
                reason: Some(format!("unhealthy: {}", failing.join(", "))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_is_healthy_but_not_ready() {
        let registry = HealthRegistry::new();

        let report = registry.report().await;
        assert_eq!(report.status, ComponentStatus::Healthy);
        assert!(report.components.is_empty());

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());
    }

    #[tokio::test]
    async fn test_worst_status_wins() {
        let registry = HealthRegistry::new();
        registry
            .set(Component::Storage, ComponentStatus::Healthy, None)
            .await;
        registry
            .set(
                ModelKind::Price.into(),
                ComponentStatus::Degraded,
                Some("not trained".into()),
            )
            .await;
        assert_eq!(registry.report().await.status, ComponentStatus::Degraded);

        registry
            .set(
                Component::Storage,
                ComponentStatus::Unhealthy,
                Some("read-only filesystem".into()),
            )
            .await;
        assert_eq!(registry.report().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_ready_while_models_untrained() {
        let registry = HealthRegistry::new();
        registry
            .set(Component::ImageModel, ComponentStatus::Degraded, None)
            .await;
        registry.mark_started().await;

        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_not_ready_names_unhealthy_component() {
        let registry = HealthRegistry::new();
        registry.mark_started().await;
        registry
            .set(
                Component::Storage,
                ComponentStatus::Unhealthy,
                Some("permission denied".into()),
            )
            .await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("unhealthy: storage: permission denied")
        );
    }

    #[tokio::test]
    async fn test_unchanged_status_keeps_since() {
        let registry = HealthRegistry::new();
        registry
            .set(Component::PriceModel, ComponentStatus::Degraded, Some("a".into()))
            .await;
        let first = registry.get(Component::PriceModel).await.unwrap();

        registry
            .set(Component::PriceModel, ComponentStatus::Degraded, Some("b".into()))
            .await;
        let second = registry.get(Component::PriceModel).await.unwrap();

        assert_eq!(first.since, second.since);
        assert_eq!(second.detail.as_deref(), Some("b"));
    }

    #[test]
    fn test_component_keys_serialize_as_names() {
        let mut components = BTreeMap::new();
        components.insert(
            Component::ImageModel,
            ComponentHealth::new(ComponentStatus::Healthy, None),
        );
        let json = serde_json::to_value(HealthReport::from_components(components)).unwrap();

        assert_eq!(json["status"], "healthy");
        assert_eq!(json["components"]["image_model"]["status"], "healthy");
        assert_eq!(Component::ImageModel.to_string(), "image_model");
    }
}
