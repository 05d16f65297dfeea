use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use crate::error::{Error, Result};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Source metrics
    pub static ref PROVIDER_FETCHES: IntCounterVec = IntCounterVec::new(
        Opts::new("provider_fetches_total", "Provider fetch attempts by outcome"),
        &["source", "outcome"]
    ).unwrap();

    pub static ref RATE_LIMIT_DENIALS: IntCounterVec = IntCounterVec::new(
        Opts::new("rate_limit_denials_total", "Calls denied by a provider's rate limit"),
        &["source"]
    ).unwrap();

    // Cache metrics
    pub static ref CACHE_LOOKUPS: IntCounterVec = IntCounterVec::new(
        Opts::new("cache_lookups_total", "Cache lookups by the layer that answered"),
        &["origin"]
    ).unwrap();

    // Cycle metrics
    pub static ref CYCLES: IntCounterVec = IntCounterVec::new(
        Opts::new("cycles_total", "Pipeline cycles by outcome"),
        &["outcome"]
    ).unwrap();

    pub static ref CYCLE_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "cycle_duration_seconds",
            "Wall time of one pipeline cycle"
        ).buckets(vec![0.1, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0])
    ).unwrap();

    pub static ref OPPORTUNITIES_PUBLISHED: IntGauge = IntGauge::new(
        "opportunities_published",
        "Opportunities in the latest published cycle"
    ).unwrap();
}

/// Registers every collector with `REGISTRY`. Safe to call more than once.
pub fn register_metrics() -> Result<()> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(PROVIDER_FETCHES.clone()),
        Box::new(RATE_LIMIT_DENIALS.clone()),
        Box::new(CACHE_LOOKUPS.clone()),
        Box::new(CYCLES.clone()),
        Box::new(CYCLE_DURATION.clone()),
        Box::new(OPPORTUNITIES_PUBLISHED.clone()),
    ];

    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(Error::ConfigError(format!("metrics registration failed: {}", e))),
        }
    }
    Ok(())
}

/// Prometheus text exposition of `REGISTRY`.
pub fn gather() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| Error::SerializationError(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| Error::SerializationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_is_idempotent_and_gathers() {
        register_metrics().unwrap();
        register_metrics().unwrap();

        CYCLES.with_label_values(&["published"]).inc();
        let text = gather().unwrap();
        assert!(text.contains("cycles_total"));
    }
}
