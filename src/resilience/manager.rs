//! # Circuit Breaker Manager
//!
//! Registry of named circuit breakers shared by the runtime. Breakers are
//! created lazily with the manager's default thresholds unless a caller
//! supplies its own configuration on first use.

use crate::events::EventBus;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, SystemCircuitBreakerMetrics};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct CircuitBreakerManager {
    circuit_breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
    event_bus: Option<EventBus>,
}

impl CircuitBreakerManager {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            circuit_breakers: DashMap::new(),
            default_config,
            event_bus: None,
        }
    }

    /// Breakers created from now on announce their transitions on `event_bus`
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn default_config(&self) -> &CircuitBreakerConfig {
        &self.default_config
    }

    /// Get or create a breaker with the default thresholds
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, &self.default_config)
    }

    /// Get or create a breaker; `config` is only used when creating
    pub fn get_or_create_with(&self, name: &str, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.circuit_breakers.get(name) {
            return Arc::clone(breaker.value());
        }

        let breaker = {
            let entry = self
                .circuit_breakers
                .entry(name.to_string())
                .or_insert_with(|| {
                    let breaker = CircuitBreaker::new(name, config.clone());
                    let breaker = match &self.event_bus {
                        Some(bus) => breaker.with_event_bus(bus.clone()),
                        None => breaker,
                    };
                    Arc::new(breaker)
                });
            Arc::clone(entry.value())
        };

        info!(
            component = name,
            total_circuit_breakers = self.circuit_breakers.len(),
            "Registered circuit breaker"
        );
        breaker
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.circuit_breakers.get(name).map(|b| Arc::clone(b.value()))
    }

    pub fn remove(&self, name: &str) -> bool {
        self.circuit_breakers.remove(name).is_some()
    }

    pub fn list_components(&self) -> Vec<String> {
        self.circuit_breakers.iter().map(|e| e.key().clone()).collect()
    }

    /// Force every breaker closed with zeroed counters
    pub async fn reset_all(&self) {
        warn!("🚨 Resetting all circuit breakers");
        // Collect first so no map shard lock is held across an await
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .circuit_breakers
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        for breaker in breakers {
            breaker.reset().await;
        }
    }

    pub fn system_metrics(&self) -> SystemCircuitBreakerMetrics {
        SystemCircuitBreakerMetrics {
            circuit_breakers: self
                .circuit_breakers
                .iter()
                .map(|e| (e.key().clone(), e.value().metrics()))
                .collect(),
            collected_at: Some(Utc::now()),
        }
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
