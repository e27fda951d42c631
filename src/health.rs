use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

use crate::db::OrderStore;
use crate::messaging::RedpandaClient;
use crate::utils::CircuitState;

// ============================================================================
// Health Monitor - Component Health Registry
// ============================================================================
//
// Components report their own status; the overall status is the worst of
// them. Served as JSON on GET /health.
//
// Components: postgres, cache, ingestion, dead_letter
//
// ============================================================================

/// Health status of a component
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }
}

/// Health information for a component
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    #[serde(flatten)]
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub check_time: DateTime<Utc>,
}

#[derive(Default)]
pub struct HealthMonitor {
    components: RwLock<HashMap<String, ComponentHealth>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update(&self, component: &str, status: HealthStatus, details: Option<String>) {
        tracing::debug!(component = %component, status = ?status, "Updated component health");

        let health = ComponentHealth {
            name: component.to_string(),
            status,
            last_check: Utc::now(),
            details,
        };
        self.components.write().await.insert(component.to_string(), health);
    }

    pub async fn system_health(&self) -> SystemHealth {
        let components = self.components.read().await.clone();

        SystemHealth {
            overall_status: compute_overall_status(&components),
            components,
            check_time: Utc::now(),
        }
    }

    /// Ping the store once and record the result as the `postgres` component.
    pub async fn check_store(&self, store: &dyn OrderStore) -> HealthStatus {
        let status = match store.ping().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                tracing::warn!(error = %e, "Order store ping failed");
                HealthStatus::Unhealthy(e.to_string())
            }
        };
        self.update("postgres", status.clone(), None).await;
        status
    }

    /// Ping the store every `period` until shutdown.
    pub fn watch_store(
        self: Arc<Self>,
        store: Arc<dyn OrderStore>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.changed() => break,
                }
                self.check_store(store.as_ref()).await;
            }
        })
    }

    /// Poll the dead-letter producer's circuit breaker until shutdown.
    pub fn watch_dead_letters(
        self: Arc<Self>,
        client: Arc<RedpandaClient>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.changed() => break,
                }

                let status = match client.circuit_state().await {
                    CircuitState::Closed => HealthStatus::Healthy,
                    CircuitState::HalfOpen => {
                        HealthStatus::Degraded("Circuit breaker half-open".to_string())
                    }
                    CircuitState::Open => {
                        // Ingestion keeps going without dead letters.
                        HealthStatus::Degraded("Circuit breaker open".to_string())
                    }
                };
                self.update("dead_letter", status, None).await;
            }
        })
    }
}

fn compute_overall_status(components: &HashMap<String, ComponentHealth>) -> HealthStatus {
    let mut has_degraded = false;
    let mut unhealthy_components = Vec::new();

    for (name, health) in components {
        match &health.status {
            HealthStatus::Unhealthy(msg) => {
                unhealthy_components.push(format!("{}: {}", name, msg));
            }
            HealthStatus::Degraded(_) => {
                has_degraded = true;
            }
            HealthStatus::Healthy => {}
        }
    }

    if !unhealthy_components.is_empty() {
        unhealthy_components.sort();
        HealthStatus::Unhealthy(unhealthy_components.join(", "))
    } else if has_degraded {
        HealthStatus::Degraded("Some components degraded".to_string())
    } else {
        HealthStatus::Healthy
    }
}
