use prometheus::{IntCounter, IntGauge, Opts};
use tracing::warn;

#[derive(Clone)]
pub struct IngestMetrics {
    pub received: IntCounter,
    pub unique: IntCounter,
    pub duplicate: IntCounter,
    pub store_failures: IntCounter,
    pub queue_depth: IntGauge,
}

impl IngestMetrics {
    pub fn new(service: &str) -> Self {
        let registry = prometheus::default_registry();

        let counter = |name: &str, help: &str| {
            IntCounter::with_opts(
                Opts::new(name, help).const_label("service", service.to_string()),
            )
            .expect("valid metric opts for ingest counter")
        };

        let received = counter(
            "aggregator_events_received_total",
            "Events admitted to the intake queue",
        );
        let unique = counter(
            "aggregator_events_unique_total",
            "Events persisted on first sight of their dedup key",
        );
        let duplicate = counter(
            "aggregator_events_duplicate_total",
            "Events dropped because their dedup key was already stored",
        );
        let store_failures = counter(
            "aggregator_store_failures_total",
            "Events dropped because the store write failed",
        );

        let queue_depth = IntGauge::with_opts(
            Opts::new(
                "aggregator_intake_queue_depth",
                "Events admitted but not yet processed",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for aggregator_intake_queue_depth");

        for metric in [
            Box::new(received.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(unique.clone()),
            Box::new(duplicate.clone()),
            Box::new(store_failures.clone()),
            Box::new(queue_depth.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register ingest metric: {}", e);
            }
        }

        Self {
            received,
            unique,
            duplicate,
            store_failures,
            queue_depth,
        }
    }
}
