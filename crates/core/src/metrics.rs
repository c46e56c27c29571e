use prometheus::{Gauge, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};

/// Outcome labels for `stampede_broadcast_endpoint_results_total`.
pub const OUTCOME_ACCEPTED: &str = "accepted";
pub const OUTCOME_REJECTED: &str = "rejected";
pub const OUTCOME_TIMED_OUT: &str = "timed_out";

#[derive(Clone, Debug)]
pub struct BroadcastMetrics {
    pub endpoint_results: IntCounterVec,
    pub fan_out_latency: Histogram,
}

impl BroadcastMetrics {
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let endpoint_results = IntCounterVec::new(
            Opts::new(
                "stampede_broadcast_endpoint_results_total",
                "Per-endpoint results of raw transaction submissions",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(endpoint_results.clone()))?;
        let fan_out_latency = Histogram::with_opts(
            HistogramOpts::new(
                "stampede_broadcast_fan_out_seconds",
                "Time spent waiting on endpoints for one broadcast",
            )
            .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        )?;
        registry.register(Box::new(fan_out_latency.clone()))?;
        Ok(Self {
            endpoint_results,
            fan_out_latency,
        })
    }

    pub fn observe(&self, accepted: usize, rejected: usize, timed_out: usize, elapsed_secs: f64) {
        for (outcome, count) in [
            (OUTCOME_ACCEPTED, accepted),
            (OUTCOME_REJECTED, rejected),
            (OUTCOME_TIMED_OUT, timed_out),
        ] {
            self.endpoint_results
                .with_label_values(&[outcome])
                .inc_by(count as u64);
        }
        self.fan_out_latency.observe(elapsed_secs);
    }
}

#[derive(Clone, Debug)]
pub struct MonitorMetrics {
    pub last_block: IntGauge,
    pub base_fee_gwei: IntGauge,
    pub gas_used_fraction: Gauge,
}

impl MonitorMetrics {
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let last_block = IntGauge::with_opts(Opts::new(
            "stampede_monitor_last_block",
            "Number of the last block scanned by the monitor",
        ))?;
        registry.register(Box::new(last_block.clone()))?;
        let base_fee_gwei = IntGauge::with_opts(Opts::new(
            "stampede_monitor_base_fee_gwei",
            "Base fee of the last scanned block",
        ))?;
        registry.register(Box::new(base_fee_gwei.clone()))?;
        let gas_used_fraction = Gauge::with_opts(Opts::new(
            "stampede_monitor_gas_used_fraction",
            "Fraction of the gas limit used by the last scanned block",
        ))?;
        registry.register(Box::new(gas_used_fraction.clone()))?;
        Ok(Self {
            last_block,
            base_fee_gwei,
            gas_used_fraction,
        })
    }
}

/// Renders every metric in `registry` in the prometheus text format.
pub fn encode_text(registry: &Registry) -> prometheus::Result<String> {
    use prometheus::Encoder;
    let mut buf = Vec::new();
    prometheus::TextEncoder::new().encode(&registry.gather(), &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
