/*!
 * # Metrics Module
 *
 * Prometheus counters for the fleet engine: reservations, stock transfers,
 * optimistic-lock retries and allocation outcomes. `gather()` renders every
 * registered metric in the Prometheus text exposition format.
 */

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new_custom(Some("fleet".into()), None)
        .expect("registry can be created");
    pub static ref RESERVATIONS: IntCounter = IntCounter::new(
        "reservations_total",
        "Total number of successful truck inventory reservations"
    )
    .expect("metric can be created");
    pub static ref RESERVATION_RELEASES: IntCounter = IntCounter::new(
        "reservation_releases_total",
        "Total number of released truck inventory reservations"
    )
    .expect("metric can be created");
    pub static ref RESERVATION_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "reservation_failures_total",
            "Total number of failed reservation attempts"
        ),
        &["reason"]
    )
    .expect("metric can be created");
    pub static ref TRANSFERS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "transfers_total",
            "Total number of committed warehouse/truck stock transfers"
        ),
        &["direction"]
    )
    .expect("metric can be created");
    pub static ref TRANSFER_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "transfer_failures_total",
            "Total number of failed warehouse/truck stock transfers"
        ),
        &["direction"]
    )
    .expect("metric can be created");
    pub static ref OPTIMISTIC_RETRIES: IntCounter = IntCounter::new(
        "optimistic_retries_total",
        "Total number of optimistic lock retries after a version conflict"
    )
    .expect("metric can be created");
    pub static ref ALLOCATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("allocations_total", "Allocation attempts by outcome"),
        &["outcome"]
    )
    .expect("metric can be created");
}

/// Registers every collector with [`REGISTRY`]; safe to call more than once.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(RESERVATIONS.clone()),
        Box::new(RESERVATION_RELEASES.clone()),
        Box::new(RESERVATION_FAILURES.clone()),
        Box::new(TRANSFERS.clone()),
        Box::new(TRANSFER_FAILURES.clone()),
        Box::new(OPTIMISTIC_RETRIES.clone()),
        Box::new(ALLOCATIONS.clone()),
    ];

    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => error!("Failed to register metric: {}", e),
        }
    }
}

/// Renders all fleet metrics in the Prometheus text format.
pub fn gather() -> String {
    register_metrics();

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
