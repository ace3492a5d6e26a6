//! # Resilience Module
//!
//! Circuit breakers that fail fast while a guarded operation keeps failing
//! and probe for recovery before fully re-enabling calls.
//!
//! ## Usage
//!
//! ```rust
//! use procflow_core::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig::new(5, Duration::from_secs(30), 2);
//! let circuit_breaker = CircuitBreaker::new("inventory_api", config);
//!
//! let stock = circuit_breaker
//!     .call(|| async { Ok::<u32, std::io::Error>(12) })
//!     .await?;
//! assert_eq!(stock, 12);
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod manager;
pub mod metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::CircuitBreakerConfig;
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
