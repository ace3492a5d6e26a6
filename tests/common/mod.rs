#![allow(dead_code)]

pub mod builders;
pub mod strategies;

pub use builders::*;
pub use strategies::*;

/// Install the crate's console logging once per test binary
pub fn init_test_logging() {
    std::env::set_var("PROCFLOW_ENV", "test");
    procflow_core::logging::init_structured_logging();
}
