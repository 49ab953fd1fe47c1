//! Observability for batch loading.
//!
//! With the `metrics` feature, [`METRICS`] records every batch query the loader
//! issues through OpenTelemetry instruments exported to a Prometheus registry.
//! With the `tracing` feature, [`tracing_helpers`] provides the spans wrapped
//! around load levels and batch queries.

#[cfg(feature = "metrics")]
pub use self::otel::{LoaderMetrics, METRICS};

#[cfg(feature = "metrics")]
mod otel {
    use once_cell::sync::Lazy;
    use opentelemetry::{
        global,
        metrics::{Counter, Histogram, Meter, MeterProvider},
        KeyValue,
    };
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use prometheus::{Encoder, Registry, TextEncoder};
    use std::time::Duration;

    pub static METRICS: Lazy<LoaderMetrics> = Lazy::new(LoaderMetrics::init);

    pub struct LoaderMetrics {
        registry: Registry,
        // Private to the loader; the process-wide provider is left to the host
        provider: Option<SdkMeterProvider>,
        pub batch_queries_total: Counter<u64>,
        pub batch_query_duration: Histogram<f64>,
        pub batch_query_errors_total: Counter<u64>,
        pub entities_hydrated_total: Counter<u64>,
    }

    impl LoaderMetrics {
        pub fn init() -> Self {
            let registry = Registry::new();
            let provider = match opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
            {
                Ok(exporter) => Some(SdkMeterProvider::builder().with_reader(exporter).build()),
                Err(e) => {
                    log::warn!("failed to build prometheus exporter, using the global meter: {e}");
                    None
                }
            };
            let meter: Meter = match &provider {
                Some(provider) => provider.meter("postfetch"),
                None => global::meter("postfetch"),
            };

            let batch_queries_total = meter
                .u64_counter("postfetch_batch_queries_total")
                .with_description("Total batch queries issued by the loader")
                .build();

            let batch_query_duration = meter
                .f64_histogram("postfetch_batch_query_duration_seconds")
                .with_description("Duration of batch queries")
                .build();

            let batch_query_errors_total = meter
                .u64_counter("postfetch_batch_query_errors_total")
                .with_description("Batch queries that returned an error")
                .build();

            let entities_hydrated_total = meter
                .u64_counter("postfetch_entities_hydrated_total")
                .with_description("Entities assigned into association slots")
                .build();

            Self {
                registry,
                provider,
                batch_queries_total,
                batch_query_duration,
                batch_query_errors_total,
                entities_hydrated_total,
            }
        }

        pub fn record_query(&self, kind: &'static str, elapsed: Duration) {
            let attrs = [KeyValue::new("kind", kind)];
            self.batch_queries_total.add(1, &attrs);
            self.batch_query_duration.record(elapsed.as_secs_f64(), &attrs);
        }

        pub fn record_query_error(&self, kind: &'static str) {
            self.batch_query_errors_total
                .add(1, &[KeyValue::new("kind", kind)]);
        }

        pub fn record_hydrated(&self, count: usize) {
            self.entities_hydrated_total.add(count as u64, &[]);
        }

        /// Whether instruments report to the loader's own Prometheus registry
        pub fn has_exporter(&self) -> bool {
            self.provider.is_some()
        }

        /// Prometheus text exposition of the collected metrics
        pub fn render(&self) -> String {
            let mut buffer = Vec::new();
            if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
                log::warn!("failed to encode metrics: {e}");
            }
            String::from_utf8_lossy(&buffer).into_owned()
        }
    }
}

/// Span helpers for the `tracing` feature.
#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    /// Span around one level of the post-fetch recursion
    pub fn load_level_span(entity: &str, depth: usize, roots: usize) -> Span {
        info_span!("postfetch.level", entity = %entity, depth, roots)
    }

    /// Span around one batch query
    pub fn batch_query_span(kind: &'static str, entity: &str) -> Span {
        info_span!("postfetch.query", kind, entity = %entity)
    }
}
