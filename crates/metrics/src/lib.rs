#![deny(clippy::arithmetic_side_effects)]
#![deny(clippy::cast_possible_truncation)]

use parking_lot::Mutex;
use prometheus_client::{
    encoding::text::encode,
    registry::Registry,
};
use std::sync::OnceLock;

pub mod subscription_metrics;

/// The process-wide registry every metric group registers itself into.
#[derive(Default)]
pub struct GlobalRegistry {
    pub registry: Mutex<Registry>,
}

static GLOBAL_REGISTER: OnceLock<GlobalRegistry> = OnceLock::new();

pub fn global_registry() -> &'static GlobalRegistry {
    GLOBAL_REGISTER.get_or_init(GlobalRegistry::default)
}

/// Renders every registered metric in the OpenMetrics text format.
pub fn encode_metrics() -> Result<String, std::fmt::Error> {
    let mut encoded = String::new();
    let registry = global_registry().registry.lock();
    encode(&mut encoded, &registry)?;
    Ok(encoded)
}

// recommended bucket defaults for logging response times
static BUCKETS: OnceLock<Vec<f64>> = OnceLock::new();
pub fn timing_buckets() -> &'static Vec<f64> {
    BUCKETS.get_or_init(|| {
        vec![
            0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]
    })
}
